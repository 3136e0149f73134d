//! Codec module - primitive encodings used by the protocol layer.
//!
//! - [`ShortString`] - 1-octet length prefixed string of the 0-8/0-10 framing
//! - [`Value`] - AMQP 1.0 typed values with described-type support
//! - [`FieldReader`] / [`FieldWriter`] - list-shaped composite fields
//!
//! # Example
//!
//! ```
//! use amqp_broker_core::codec::{decode_value, Value};
//!
//! let encoded = Value::described(0x24, Value::List(vec![])).to_bytes();
//! let (decoded, _) = decode_value(&encoded).unwrap();
//! assert_eq!(decoded.as_described().unwrap().value, Value::List(vec![]));
//! ```

mod composite;
mod short_string;
mod types;

pub use composite::{FieldReader, FieldWriter};
pub use short_string::{ShortString, MAX_LENGTH as SHORT_STRING_MAX_LENGTH};
pub use types::{decode_value, format, Decoder, Described, Descriptor, Symbol, Value};
