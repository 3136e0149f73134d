//! Described-type registry for dispatching decoded values by descriptor.
//!
//! The registry maps descriptor codes (and their symbolic names) to
//! decode functions. Anything not registered fails with
//! `DecodeError::UnknownPerformative`.
//!
//! # Example
//!
//! ```
//! use amqp_broker_core::protocol::{DescribedTypeRegistry, Performative};
//!
//! let registry = DescribedTypeRegistry::transport();
//! assert_eq!(registry.get_name(0x14), Some("transfer"));
//! assert_eq!(registry.get_code("amqp:flow:list"), Some(0x13));
//! ```

use std::collections::HashMap;

use bytes::Bytes;

use super::performative::{descriptor, Performative, TxnControl};
use crate::codec::{Decoder, Descriptor, FieldReader, Value};
use crate::error::DecodeError;

/// Decode function for one described type.
pub type DecodeFn<T> = fn(&mut FieldReader) -> Result<T, DecodeError>;

/// Entry for a registered described type.
struct TypeEntry<T> {
    /// Short name, used as the composite name in decode errors.
    name: &'static str,
    decode: DecodeFn<T>,
}

/// Registry mapping descriptors to decode functions.
pub struct DescribedTypeRegistry<T> {
    /// Entries by numeric descriptor.
    by_code: HashMap<u64, TypeEntry<T>>,
    /// Symbolic descriptor to numeric code.
    by_symbol: HashMap<&'static str, u64>,
}

impl<T> DescribedTypeRegistry<T> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            by_code: HashMap::new(),
            by_symbol: HashMap::new(),
        }
    }

    /// Register a described type under its numeric and symbolic
    /// descriptors. A later registration for the same code replaces the
    /// earlier one.
    pub fn register(
        &mut self,
        code: u64,
        symbol: &'static str,
        name: &'static str,
        decode: DecodeFn<T>,
    ) {
        self.by_code.insert(code, TypeEntry { name, decode });
        self.by_symbol.insert(symbol, code);
    }

    pub fn get_name(&self, code: u64) -> Option<&'static str> {
        self.by_code.get(&code).map(|entry| entry.name)
    }

    /// Numeric code for a symbolic descriptor.
    pub fn get_code(&self, symbol: &str) -> Option<u64> {
        self.by_symbol.get(symbol).copied()
    }

    pub fn contains(&self, code: u64) -> bool {
        self.by_code.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// Dispatch a decoded value to the registered decode function.
    pub fn dispatch(&self, value: Value) -> Result<T, DecodeError> {
        let Value::Described(described) = value else {
            return Err(DecodeError::Malformed(
                "expected a described type".to_string(),
            ));
        };

        let code = match &described.descriptor {
            Descriptor::Code(code) => *code,
            Descriptor::Symbol(symbol) => self
                .get_code(symbol.as_str())
                .ok_or_else(|| DecodeError::UnknownPerformative(symbol.to_string()))?,
        };

        let entry = self
            .by_code
            .get(&code)
            .ok_or_else(|| DecodeError::UnknownPerformative(format!("0x{code:08x}")))?;

        let mut fields = FieldReader::new(entry.name, described.value)?;
        (entry.decode)(&mut fields)
    }

    /// Decode one described value from the start of `buf`.
    ///
    /// Returns the typed value and the number of bytes consumed.
    pub fn decode(&self, buf: &Bytes) -> Result<(T, usize), DecodeError> {
        let mut decoder = Decoder::new(buf);
        let value = decoder.read_value()?;
        let typed = self.dispatch(value)?;
        Ok((typed, decoder.position()))
    }
}

impl<T> Default for DescribedTypeRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl DescribedTypeRegistry<Performative> {
    /// Registry of the nine transport performatives.
    pub fn transport() -> Self {
        let mut registry = Self::new();
        registry.register(descriptor::OPEN, "amqp:open:list", "open", Performative::decode_open);
        registry.register(descriptor::BEGIN, "amqp:begin:list", "begin", Performative::decode_begin);
        registry.register(
            descriptor::ATTACH,
            "amqp:attach:list",
            "attach",
            Performative::decode_attach,
        );
        registry.register(descriptor::FLOW, "amqp:flow:list", "flow", Performative::decode_flow);
        registry.register(
            descriptor::TRANSFER,
            "amqp:transfer:list",
            "transfer",
            Performative::decode_transfer,
        );
        registry.register(
            descriptor::DISPOSITION,
            "amqp:disposition:list",
            "disposition",
            Performative::decode_disposition,
        );
        registry.register(
            descriptor::DETACH,
            "amqp:detach:list",
            "detach",
            Performative::decode_detach,
        );
        registry.register(descriptor::END, "amqp:end:list", "end", Performative::decode_end);
        registry.register(descriptor::CLOSE, "amqp:close:list", "close", Performative::decode_close);
        registry
    }
}

impl DescribedTypeRegistry<TxnControl> {
    /// Registry of the coordinator control messages.
    pub fn transaction_layer() -> Self {
        let mut registry = Self::new();
        registry.register(
            descriptor::DECLARE,
            "amqp:declare:list",
            "declare",
            TxnControl::decode_declare,
        );
        registry.register(
            descriptor::DISCHARGE,
            "amqp:discharge:list",
            "discharge",
            TxnControl::decode_discharge,
        );
        registry
    }
}
