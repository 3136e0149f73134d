//! Helpers for composite types encoded as described lists.
//!
//! Fields are positional. Trailing null fields are omitted on encode and
//! fields past the end of the list read as null on decode.

use bytes::Bytes;

use super::types::{Symbol, Value};
use crate::error::DecodeError;

/// Positional reader over the fields of one composite.
pub struct FieldReader {
    composite: &'static str,
    fields: Vec<Value>,
}

impl FieldReader {
    /// Accepts a list (or null, meaning no fields).
    pub fn new(composite: &'static str, value: Value) -> Result<Self, DecodeError> {
        let fields = match value {
            Value::List(fields) => fields,
            Value::Null => Vec::new(),
            _ => {
                return Err(DecodeError::Malformed(format!(
                    "{composite} body is not a list"
                )))
            }
        };
        Ok(Self { composite, fields })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Move a field out, leaving null behind.
    pub fn take(&mut self, index: usize) -> Value {
        self.fields
            .get_mut(index)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Convert a field with `f`; null yields `None`, a conversion failure
    /// is an invalid field.
    pub fn optional<T>(
        &mut self,
        index: usize,
        field: &'static str,
        f: impl FnOnce(Value) -> Option<T>,
    ) -> Result<Option<T>, DecodeError> {
        let value = self.take(index);
        if value.is_null() {
            return Ok(None);
        }
        f(value).map(Some).ok_or(DecodeError::InvalidField {
            composite: self.composite,
            field,
        })
    }

    pub fn required<T>(
        &mut self,
        index: usize,
        field: &'static str,
        f: impl FnOnce(Value) -> Option<T>,
    ) -> Result<T, DecodeError> {
        self.optional(index, field, f)?
            .ok_or(DecodeError::MissingField {
                composite: self.composite,
                field,
            })
    }

    pub fn uint(&mut self, index: usize, field: &'static str) -> Result<Option<u32>, DecodeError> {
        self.optional(index, field, |v| v.as_uint())
    }

    pub fn ulong(&mut self, index: usize, field: &'static str) -> Result<Option<u64>, DecodeError> {
        self.optional(index, field, |v| v.as_ulong())
    }

    pub fn ushort(&mut self, index: usize, field: &'static str) -> Result<Option<u16>, DecodeError> {
        self.optional(index, field, |v| v.as_ushort())
    }

    pub fn ubyte(&mut self, index: usize, field: &'static str) -> Result<Option<u8>, DecodeError> {
        self.optional(index, field, |v| v.as_ubyte())
    }

    pub fn boolean(&mut self, index: usize, field: &'static str) -> Result<Option<bool>, DecodeError> {
        self.optional(index, field, |v| v.as_bool())
    }

    pub fn binary(&mut self, index: usize, field: &'static str) -> Result<Option<Bytes>, DecodeError> {
        self.optional(index, field, |v| match v {
            Value::Binary(b) => Some(b),
            _ => None,
        })
    }

    pub fn string(&mut self, index: usize, field: &'static str) -> Result<Option<String>, DecodeError> {
        self.optional(index, field, |v| match v {
            Value::String(s) => Some(s),
            // Addresses are sometimes sent as symbols.
            Value::Symbol(s) => Some(s.as_str().to_string()),
            _ => None,
        })
    }

    pub fn symbol(&mut self, index: usize, field: &'static str) -> Result<Option<Symbol>, DecodeError> {
        self.optional(index, field, |v| match v {
            Value::Symbol(s) => Some(s),
            _ => None,
        })
    }

    /// A symbol or array of symbols.
    pub fn symbols(
        &mut self,
        index: usize,
        field: &'static str,
    ) -> Result<Option<Vec<Symbol>>, DecodeError> {
        self.optional(index, field, |v| v.to_symbols())
    }
}

/// Positional builder for a composite's fields.
#[derive(Debug, Default)]
pub struct FieldWriter {
    fields: Vec<Value>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, value: impl Into<Value>) -> Self {
        self.fields.push(value.into());
        self
    }

    pub fn push_opt<T: Into<Value>>(mut self, value: Option<T>) -> Self {
        self.fields.push(value.map(Into::into).unwrap_or_default());
        self
    }

    /// Finish as a described list, dropping trailing nulls.
    pub fn into_described(mut self, code: u64) -> Value {
        while matches!(self.fields.last(), Some(Value::Null)) {
            self.fields.pop();
        }
        Value::described(code, Value::List(self.fields))
    }
}
