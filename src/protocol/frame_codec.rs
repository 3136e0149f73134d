//! Performative frame encoding and decoding.
//!
//! A frame body is one described performative optionally followed by
//! payload bytes (Transfer only). Encoding returns a sequence of buffers
//! whose concatenation is the wire representation: header, performative,
//! payload. The payload is never copied.

use bytes::Bytes;

use super::frame::build_frame_parts;
use super::performative::Performative;
use super::registry::DescribedTypeRegistry;
use super::wire_format::{Header, HEADER_SIZE, MIN_DOFF};
use crate::error::DecodeError;

/// Encode one performative (plus optional payload) as frame parts.
///
/// # Example
///
/// ```
/// use amqp_broker_core::protocol::{encode_frame, FrameDecoder, Performative, End};
///
/// let parts = encode_frame(3, &Performative::End(End::default()), None);
/// let wire: Vec<u8> = parts.iter().flat_map(|p| p.iter().copied()).collect();
///
/// let decoded = FrameDecoder::new().decode(&wire.into()).unwrap();
/// assert_eq!(decoded.channel, 3);
/// ```
pub fn encode_frame(channel: u16, performative: &Performative, payload: Option<&Bytes>) -> Vec<Bytes> {
    let body = performative.to_value().to_bytes();
    match payload {
        Some(payload) => build_frame_parts(channel, &[body, payload.clone()]),
        None => build_frame_parts(channel, &[body]),
    }
}

/// Encoded size of a performative's frame without payload.
pub fn performative_frame_size(performative: &Performative) -> usize {
    HEADER_SIZE + performative.to_value().to_bytes().len()
}

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub channel: u16,
    /// `None` for an empty (heartbeat) frame.
    pub performative: Option<Performative>,
    /// Bytes after the performative.
    pub payload: Bytes,
    /// Total bytes consumed from the input.
    pub consumed: usize,
}

/// Decodes frames into typed performatives via the transport registry.
pub struct FrameDecoder {
    registry: DescribedTypeRegistry<Performative>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            registry: DescribedTypeRegistry::transport(),
        }
    }

    /// Decode a frame body (the bytes after the data offset).
    pub fn decode_body(&self, body: &Bytes) -> Result<(Performative, Bytes), DecodeError> {
        let (performative, used) = self.registry.decode(body).map_err(|err| match err {
            // The body is complete, so running out of bytes is corruption.
            DecodeError::InsufficientData { .. } => {
                DecodeError::Malformed("performative truncated inside frame body".to_string())
            }
            other => other,
        })?;
        Ok((performative, body.slice(used..)))
    }

    /// Decode one frame from the start of `buf`.
    ///
    /// Fails with `InsufficientData` if `buf` does not yet hold a whole
    /// frame, so streaming callers can wait for more bytes.
    pub fn decode(&self, buf: &Bytes) -> Result<DecodedFrame, DecodeError> {
        let header = Header::decode(buf).ok_or_else(|| DecodeError::InsufficientData {
            needed: HEADER_SIZE.saturating_sub(buf.len()),
        })?;

        if header.doff < MIN_DOFF || (header.size as usize) < header.body_offset() {
            return Err(DecodeError::Malformed(format!(
                "invalid frame header: size {} doff {}",
                header.size, header.doff
            )));
        }

        let size = header.size as usize;
        if buf.len() < size {
            return Err(DecodeError::InsufficientData {
                needed: size - buf.len(),
            });
        }

        let body = buf.slice(header.body_offset()..size);
        if body.is_empty() {
            return Ok(DecodedFrame {
                channel: header.channel,
                performative: None,
                payload: Bytes::new(),
                consumed: size,
            });
        }

        let (performative, payload) = self.decode_body(&body)?;
        Ok(DecodedFrame {
            channel: header.channel,
            performative: Some(performative),
            payload,
            consumed: size,
        })
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
