//! Message sections of an AMQP 1.0 message payload.
//!
//! The broker treats payloads as opaque except for what it must inspect:
//! the header's `durable` flag and, on the coordinator link, the
//! amqp-value body holding a transaction control.

use bytes::{Bytes, BytesMut};

use crate::codec::{Decoder, FieldReader, FieldWriter, Value};
use crate::error::DecodeError;

use super::performative::{descriptor_code, expect_described};

/// Section descriptor codes.
pub mod section {
    pub const HEADER: u64 = 0x70;
    pub const DELIVERY_ANNOTATIONS: u64 = 0x71;
    pub const MESSAGE_ANNOTATIONS: u64 = 0x72;
    pub const PROPERTIES: u64 = 0x73;
    pub const APPLICATION_PROPERTIES: u64 = 0x74;
    pub const DATA: u64 = 0x75;
    pub const AMQP_SEQUENCE: u64 = 0x76;
    pub const AMQP_VALUE: u64 = 0x77;
    pub const FOOTER: u64 = 0x78;
}

/// The parts of a message payload the broker looks at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageSections {
    pub durable: bool,
    pub priority: Option<u8>,
    pub application_properties: Vec<(Value, Value)>,
    /// Concatenated data sections.
    pub data: Vec<Bytes>,
    pub amqp_value: Option<Value>,
}

impl MessageSections {
    /// Parse every section of `payload`.
    pub fn parse(payload: &Bytes) -> Result<Self, DecodeError> {
        let mut sections = Self::default();
        let mut decoder = Decoder::new(payload);

        while decoder.remaining() > 0 {
            let value = decoder.read_value()?;
            let code = descriptor_code(&value).ok_or_else(|| {
                DecodeError::Malformed("message section is not described by code".to_string())
            })?;
            let (_, body) = expect_described(value, "section")?;

            match code {
                section::HEADER => {
                    let mut f = FieldReader::new("header", body)?;
                    sections.durable = f.boolean(0, "durable")?.unwrap_or(false);
                    sections.priority = f.ubyte(1, "priority")?;
                }
                section::APPLICATION_PROPERTIES => match body {
                    Value::Map(pairs) => sections.application_properties = pairs,
                    _ => {
                        return Err(DecodeError::InvalidField {
                            composite: "message",
                            field: "application-properties",
                        })
                    }
                },
                section::DATA => match body {
                    Value::Binary(bytes) => sections.data.push(bytes),
                    _ => {
                        return Err(DecodeError::InvalidField {
                            composite: "message",
                            field: "data",
                        })
                    }
                },
                section::AMQP_VALUE => sections.amqp_value = Some(body),
                section::DELIVERY_ANNOTATIONS
                | section::MESSAGE_ANNOTATIONS
                | section::PROPERTIES
                | section::AMQP_SEQUENCE
                | section::FOOTER => {}
                other => {
                    return Err(DecodeError::UnknownDescriptor(format!("0x{other:02x}")))
                }
            }
        }

        Ok(sections)
    }

    /// Look up a string-keyed application property.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.application_properties
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

/// Builds message payloads section by section.
///
/// # Example
///
/// ```
/// use amqp_broker_core::protocol::{MessageBuilder, MessageSections};
///
/// let payload = MessageBuilder::new()
///     .durable(true)
///     .property("index", 3i32)
///     .data("hello")
///     .build();
///
/// let sections = MessageSections::parse(&payload).unwrap();
/// assert!(sections.durable);
/// assert_eq!(&sections.data[0][..], b"hello");
/// ```
#[derive(Debug, Default)]
pub struct MessageBuilder {
    durable: Option<bool>,
    properties: Vec<(Value, Value)>,
    body: Vec<Value>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.push((Value::from(key), value.into()));
        self
    }

    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.body
            .push(Value::described(section::DATA, Value::Binary(data.into())));
        self
    }

    pub fn value(mut self, value: Value) -> Self {
        self.body.push(Value::described(section::AMQP_VALUE, value));
        self
    }

    pub fn build(self) -> Bytes {
        let mut buf = BytesMut::new();
        if let Some(durable) = self.durable {
            FieldWriter::new()
                .push_opt(durable.then_some(true))
                .into_described(section::HEADER)
                .encode(&mut buf);
        }
        if !self.properties.is_empty() {
            Value::described(section::APPLICATION_PROPERTIES, Value::Map(self.properties))
                .encode(&mut buf);
        }
        for body in &self.body {
            body.encode(&mut buf);
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::performative::TxnControl;

    #[test]
    fn test_non_durable_by_default() {
        let payload = MessageBuilder::new().data("x").build();
        let sections = MessageSections::parse(&payload).unwrap();
        assert!(!sections.durable);
        assert_eq!(sections.data.len(), 1);
    }

    #[test]
    fn test_application_properties_preserved() {
        let payload = MessageBuilder::new()
            .property("index", 7i32)
            .property("colour", "red")
            .build();
        let sections = MessageSections::parse(&payload).unwrap();
        assert_eq!(sections.property("index"), Some(&Value::Int(7)));
        assert_eq!(sections.property("colour").and_then(Value::as_str), Some("red"));
        assert!(sections.property("missing").is_none());
    }

    #[test]
    fn test_amqp_value_body() {
        let control = TxnControl::Declare { global_id: None };
        let payload = MessageBuilder::new().value(control.to_value()).build();
        let sections = MessageSections::parse(&payload).unwrap();
        assert_eq!(sections.amqp_value, Some(control.to_value()));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let payload = Value::described(0x99, Value::Null).to_bytes();
        let err = MessageSections::parse(&payload).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownDescriptor(_)));
    }

    #[test]
    fn test_empty_payload() {
        let sections = MessageSections::parse(&Bytes::new()).unwrap();
        assert_eq!(sections, MessageSections::default());
    }
}
