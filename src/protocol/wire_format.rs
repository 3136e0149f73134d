//! Frame header encoding and decoding.
//!
//! Implements the 8-byte AMQP 1.0 frame header:
//! ```text
//! ┌──────────┬───────┬───────┬──────────┐
//! │ Size     │ DOFF  │ Type  │ Channel  │
//! │ 4 bytes  │ 1 byte│ 1 byte│ 2 bytes  │
//! │ uint32 BE│       │       │ uint16 BE│
//! └──────────┴───────┴───────┴──────────┘
//! ```
//!
//! `size` counts the whole frame including the header. `doff` is the
//! offset of the frame body in 4-byte words (minimum 2). All multi-byte
//! integers are Big Endian.

use crate::error::{BrokerError, ErrorCondition, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Smallest max-frame-size a peer may advertise.
pub const MIN_MAX_FRAME_SIZE: u32 = 512;

/// Max-frame-size used when nothing else is configured.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 65_536;

/// Minimum data offset (no extended header).
pub const MIN_DOFF: u8 = 2;

/// Protocol header sent by both peers before any frame.
pub const PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x01\x00\x00";

/// Frame type codes.
pub mod frame_type {
    pub const AMQP: u8 = 0x00;
    pub const SASL: u8 = 0x01;
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total frame size in bytes, header included.
    pub size: u32,
    /// Data offset in 4-byte words.
    pub doff: u8,
    /// Frame type (see `frame_type`).
    pub frame_type: u8,
    /// Channel the frame belongs to.
    pub channel: u16,
}

impl Header {
    /// Create a new header.
    pub fn new(size: u32, doff: u8, frame_type: u8, channel: u16) -> Self {
        Self {
            size,
            doff,
            frame_type,
            channel,
        }
    }

    /// Header for an AMQP frame with no extended header and a body of
    /// `body_len` bytes.
    pub fn for_body(channel: u16, body_len: usize) -> Self {
        Self::new(
            (HEADER_SIZE + body_len) as u32,
            MIN_DOFF,
            frame_type::AMQP,
            channel,
        )
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use amqp_broker_core::protocol::Header;
    ///
    /// let header = Header::for_body(1, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 8);
    /// assert_eq!(&bytes[..4], &108u32.to_be_bytes());
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.size.to_be_bytes());
        buf[4] = self.doff;
        buf[5] = self.frame_type;
        buf[6..8].copy_from_slice(&self.channel.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            size: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            doff: buf[4],
            frame_type: buf[5],
            channel: u16::from_be_bytes([buf[6], buf[7]]),
        })
    }

    /// Validate the header against framing rules.
    ///
    /// Checks:
    /// - DOFF is at least 2 and fits inside the frame
    /// - Size doesn't exceed the negotiated max-frame-size
    /// - Frame type is AMQP
    pub fn validate(&self, max_frame_size: u32) -> Result<()> {
        if self.doff < MIN_DOFF {
            return Err(BrokerError::connection(
                ErrorCondition::FramingError,
                format!("DOFF {} is below minimum {}", self.doff, MIN_DOFF),
            ));
        }

        if (self.size as usize) < self.body_offset() {
            return Err(BrokerError::connection(
                ErrorCondition::FramingError,
                format!(
                    "Frame size {} is smaller than data offset {}",
                    self.size,
                    self.body_offset()
                ),
            ));
        }

        if self.size > max_frame_size {
            return Err(BrokerError::connection(
                ErrorCondition::FramingError,
                format!(
                    "Frame size {} exceeds maximum {}",
                    self.size, max_frame_size
                ),
            ));
        }

        if self.frame_type != frame_type::AMQP {
            return Err(BrokerError::connection(
                ErrorCondition::FramingError,
                format!("Unsupported frame type 0x{:02x}", self.frame_type),
            ));
        }

        Ok(())
    }

    /// Byte offset of the body from the start of the frame.
    #[inline]
    pub fn body_offset(&self) -> usize {
        self.doff as usize * 4
    }

    /// Body length in bytes. Zero for heartbeat frames.
    #[inline]
    pub fn body_len(&self) -> usize {
        (self.size as usize).saturating_sub(self.body_offset())
    }
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    header.encode()
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: &[u8]) -> Option<Header> {
    Header::decode(buf)
}

/// Validate a header for framing compliance (standalone function).
#[inline]
pub fn validate_header(header: &Header, max_frame_size: u32) -> Result<()> {
    header.validate(max_frame_size)
}
