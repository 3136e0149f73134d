//! Frame struct with typed accessors.
//!
//! Represents one complete AMQP frame: header plus body. Uses
//! `bytes::Bytes` so the body can be shared without copying.
//!
//! # Example
//!
//! ```
//! use amqp_broker_core::protocol::{Frame, Header};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Header::for_body(3, 5), Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.channel(), 3);
//! assert_eq!(frame.body(), b"hello");
//! assert!(!frame.is_heartbeat());
//! ```

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Frame body after the data offset (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Frame {
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get a clone of the body as Bytes (cheap, zero-copy).
    #[inline]
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    #[inline]
    pub fn channel(&self) -> u16 {
        self.header.channel
    }

    /// An empty frame, used as keep-alive.
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.body.is_empty()
    }
}

/// Build a complete frame as a single byte vector.
///
/// Use `build_frame_parts` for scatter/gather I/O (writev).
pub fn build_frame(channel: u16, body: &[u8]) -> Vec<u8> {
    let header = Header::for_body(channel, body.len());
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(body);
    buf
}

/// Build frame parts for scatter/gather I/O.
///
/// The header is sized for the concatenation of `body_parts`; the parts
/// themselves are returned as cheap clones so they are never copied.
pub fn build_frame_parts(channel: u16, body_parts: &[Bytes]) -> Vec<Bytes> {
    let body_len: usize = body_parts.iter().map(Bytes::len).sum();
    let header = Header::for_body(channel, body_len);

    let mut parts = Vec::with_capacity(1 + body_parts.len());
    parts.push(Bytes::copy_from_slice(&header.encode()));
    parts.extend(body_parts.iter().filter(|p| !p.is_empty()).cloned());
    parts
}
