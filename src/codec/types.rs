//! AMQP 1.0 primitive type system (the subset the broker core needs).
//!
//! Values are encoded with the most compact constructor available.
//! Decoding accepts every width of the supported types.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

/// Format codes (constructors).
pub mod format {
    pub const DESCRIBED: u8 = 0x00;
    pub const NULL: u8 = 0x40;
    pub const BOOLEAN_TRUE: u8 = 0x41;
    pub const BOOLEAN_FALSE: u8 = 0x42;
    pub const UINT_0: u8 = 0x43;
    pub const ULONG_0: u8 = 0x44;
    pub const LIST_0: u8 = 0x45;
    pub const UBYTE: u8 = 0x50;
    pub const BYTE: u8 = 0x51;
    pub const SMALL_UINT: u8 = 0x52;
    pub const SMALL_ULONG: u8 = 0x53;
    pub const SMALL_INT: u8 = 0x54;
    pub const SMALL_LONG: u8 = 0x55;
    pub const BOOLEAN: u8 = 0x56;
    pub const USHORT: u8 = 0x60;
    pub const SHORT: u8 = 0x61;
    pub const UINT: u8 = 0x70;
    pub const INT: u8 = 0x71;
    pub const ULONG: u8 = 0x80;
    pub const LONG: u8 = 0x81;
    pub const TIMESTAMP: u8 = 0x83;
    pub const UUID: u8 = 0x98;
    pub const VBIN8: u8 = 0xa0;
    pub const STR8: u8 = 0xa1;
    pub const SYM8: u8 = 0xa3;
    pub const VBIN32: u8 = 0xb0;
    pub const STR32: u8 = 0xb1;
    pub const SYM32: u8 = 0xb3;
    pub const LIST8: u8 = 0xc0;
    pub const MAP8: u8 = 0xc1;
    pub const LIST32: u8 = 0xd0;
    pub const MAP32: u8 = 0xd1;
    pub const ARRAY8: u8 = 0xe0;
    pub const ARRAY32: u8 = 0xf0;
}

/// An AMQP symbol: an ASCII name such as `amqp:accepted:list`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Descriptor of a described type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Descriptor {
    Code(u64),
    Symbol(Symbol),
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Code(code) => write!(f, "0x{code:08x}"),
            Descriptor::Symbol(symbol) => write!(f, "{symbol}"),
        }
    }
}

/// A descriptor plus the value it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct Described {
    pub descriptor: Descriptor,
    pub value: Value,
}

/// A decoded AMQP value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Ubyte(u8),
    Ushort(u16),
    Uint(u32),
    Ulong(u64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    /// Milliseconds since the unix epoch.
    Timestamp(i64),
    Uuid([u8; 16]),
    Binary(Bytes),
    String(String),
    Symbol(Symbol),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Array(Vec<Value>),
    Described(Box<Described>),
}

impl Value {
    /// Build a described value with a numeric descriptor.
    pub fn described(code: u64, value: Value) -> Self {
        Value::Described(Box::new(Described {
            descriptor: Descriptor::Code(code),
            value,
        }))
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any unsigned value that fits in a u8.
    pub fn as_ubyte(&self) -> Option<u8> {
        self.as_ulong().and_then(|v| u8::try_from(v).ok())
    }

    pub fn as_ushort(&self) -> Option<u16> {
        self.as_ulong().and_then(|v| u16::try_from(v).ok())
    }

    pub fn as_uint(&self) -> Option<u32> {
        self.as_ulong().and_then(|v| u32::try_from(v).ok())
    }

    /// Any unsigned integer, widened.
    pub fn as_ulong(&self) -> Option<u64> {
        match self {
            Value::Ubyte(v) => Some(*v as u64),
            Value::Ushort(v) => Some(*v as u64),
            Value::Uint(v) => Some(*v as u64),
            Value::Ulong(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(*v as i64),
            Value::Short(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) | Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_described(&self) -> Option<&Described> {
        match self {
            Value::Described(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Symbols from either a single symbol or an array of symbols.
    pub fn to_symbols(&self) -> Option<Vec<Symbol>> {
        match self {
            Value::Symbol(s) => Some(vec![s.clone()]),
            Value::Array(items) | Value::List(items) => items
                .iter()
                .map(|v| v.as_symbol().cloned())
                .collect::<Option<Vec<_>>>(),
            _ => None,
        }
    }

    /// Append the encoded value to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Value::Null => buf.put_u8(format::NULL),
            Value::Bool(true) => buf.put_u8(format::BOOLEAN_TRUE),
            Value::Bool(false) => buf.put_u8(format::BOOLEAN_FALSE),
            Value::Ubyte(v) => {
                buf.put_u8(format::UBYTE);
                buf.put_u8(*v);
            }
            Value::Ushort(v) => {
                buf.put_u8(format::USHORT);
                buf.put_u16(*v);
            }
            Value::Uint(0) => buf.put_u8(format::UINT_0),
            Value::Uint(v) if *v <= u8::MAX as u32 => {
                buf.put_u8(format::SMALL_UINT);
                buf.put_u8(*v as u8);
            }
            Value::Uint(v) => {
                buf.put_u8(format::UINT);
                buf.put_u32(*v);
            }
            Value::Ulong(0) => buf.put_u8(format::ULONG_0),
            Value::Ulong(v) if *v <= u8::MAX as u64 => {
                buf.put_u8(format::SMALL_ULONG);
                buf.put_u8(*v as u8);
            }
            Value::Ulong(v) => {
                buf.put_u8(format::ULONG);
                buf.put_u64(*v);
            }
            Value::Byte(v) => {
                buf.put_u8(format::BYTE);
                buf.put_i8(*v);
            }
            Value::Short(v) => {
                buf.put_u8(format::SHORT);
                buf.put_i16(*v);
            }
            Value::Int(v) => match i8::try_from(*v) {
                Ok(small) => {
                    buf.put_u8(format::SMALL_INT);
                    buf.put_i8(small);
                }
                Err(_) => {
                    buf.put_u8(format::INT);
                    buf.put_i32(*v);
                }
            },
            Value::Long(v) => match i8::try_from(*v) {
                Ok(small) => {
                    buf.put_u8(format::SMALL_LONG);
                    buf.put_i8(small);
                }
                Err(_) => {
                    buf.put_u8(format::LONG);
                    buf.put_i64(*v);
                }
            },
            Value::Timestamp(v) => {
                buf.put_u8(format::TIMESTAMP);
                buf.put_i64(*v);
            }
            Value::Uuid(v) => {
                buf.put_u8(format::UUID);
                buf.put_slice(v);
            }
            Value::Binary(b) => encode_variable(buf, format::VBIN8, format::VBIN32, b),
            Value::String(s) => encode_variable(buf, format::STR8, format::STR32, s.as_bytes()),
            Value::Symbol(s) => {
                encode_variable(buf, format::SYM8, format::SYM32, s.as_str().as_bytes())
            }
            Value::List(items) if items.is_empty() => buf.put_u8(format::LIST_0),
            Value::List(items) => {
                let mut body = BytesMut::new();
                for item in items {
                    item.encode(&mut body);
                }
                encode_compound(buf, format::LIST8, format::LIST32, items.len(), &body);
            }
            Value::Map(pairs) => {
                let mut body = BytesMut::new();
                for (key, value) in pairs {
                    key.encode(&mut body);
                    value.encode(&mut body);
                }
                encode_compound(buf, format::MAP8, format::MAP32, pairs.len() * 2, &body);
            }
            Value::Array(items) => encode_array(buf, items),
            Value::Described(described) => {
                buf.put_u8(format::DESCRIBED);
                match &described.descriptor {
                    Descriptor::Code(code) => Value::Ulong(*code).encode(buf),
                    Descriptor::Symbol(symbol) => Value::Symbol(symbol.clone()).encode(buf),
                }
                described.value.encode(buf);
            }
        }
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    u8 => Ubyte,
    u16 => Ushort,
    u32 => Uint,
    u64 => Ulong,
    i32 => Int,
    i64 => Long,
    Bytes => Binary,
    String => String,
    Symbol => Symbol,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

fn encode_variable(buf: &mut BytesMut, small: u8, large: u8, data: &[u8]) {
    if data.len() <= u8::MAX as usize {
        buf.put_u8(small);
        buf.put_u8(data.len() as u8);
    } else {
        buf.put_u8(large);
        buf.put_u32(data.len() as u32);
    }
    buf.put_slice(data);
}

fn encode_compound(buf: &mut BytesMut, small: u8, large: u8, count: usize, body: &[u8]) {
    if body.len() < u8::MAX as usize && count <= u8::MAX as usize {
        buf.put_u8(small);
        buf.put_u8((body.len() + 1) as u8);
        buf.put_u8(count as u8);
    } else {
        buf.put_u8(large);
        buf.put_u32((body.len() + 4) as u32);
        buf.put_u32(count as u32);
    }
    buf.put_slice(body);
}

/// Fixed element constructor used for array members of a given kind.
fn array_constructor(value: &Value) -> Option<u8> {
    Some(match value {
        Value::Bool(_) => format::BOOLEAN,
        Value::Ubyte(_) => format::UBYTE,
        Value::Ushort(_) => format::USHORT,
        Value::Uint(_) => format::UINT,
        Value::Ulong(_) => format::ULONG,
        Value::Byte(_) => format::BYTE,
        Value::Short(_) => format::SHORT,
        Value::Int(_) => format::INT,
        Value::Long(_) => format::LONG,
        Value::Timestamp(_) => format::TIMESTAMP,
        Value::Uuid(_) => format::UUID,
        Value::Binary(_) => format::VBIN32,
        Value::String(_) => format::STR32,
        Value::Symbol(_) => format::SYM32,
        _ => return None,
    })
}

fn encode_array_element(buf: &mut BytesMut, value: &Value) {
    match value {
        Value::Bool(b) => buf.put_u8(u8::from(*b)),
        Value::Ubyte(v) => buf.put_u8(*v),
        Value::Ushort(v) => buf.put_u16(*v),
        Value::Uint(v) => buf.put_u32(*v),
        Value::Ulong(v) => buf.put_u64(*v),
        Value::Byte(v) => buf.put_i8(*v),
        Value::Short(v) => buf.put_i16(*v),
        Value::Int(v) => buf.put_i32(*v),
        Value::Long(v) | Value::Timestamp(v) => buf.put_i64(*v),
        Value::Uuid(v) => buf.put_slice(v),
        Value::Binary(b) => {
            buf.put_u32(b.len() as u32);
            buf.put_slice(b);
        }
        Value::String(s) => {
            buf.put_u32(s.len() as u32);
            buf.put_slice(s.as_bytes());
        }
        Value::Symbol(s) => {
            buf.put_u32(s.as_str().len() as u32);
            buf.put_slice(s.as_str().as_bytes());
        }
        _ => {}
    }
}

fn encode_array(buf: &mut BytesMut, items: &[Value]) {
    let Some(first) = items.first() else {
        // Empty array of nulls: size 2 covers count and constructor.
        buf.put_slice(&[format::ARRAY8, 2, 0, format::NULL]);
        return;
    };

    let constructor = match array_constructor(first) {
        Some(code)
            if items
                .iter()
                .all(|v| array_constructor(v) == Some(code)) =>
        {
            code
        }
        // Heterogeneous or compound members go out as a list.
        _ => return Value::List(items.to_vec()).encode(buf),
    };

    let mut body = BytesMut::new();
    body.put_u8(constructor);
    for item in items {
        encode_array_element(&mut body, item);
    }
    encode_compound(buf, format::ARRAY8, format::ARRAY32, items.len(), &body);
}

/// Streaming decoder over a shared byte buffer.
///
/// Binary values are returned as zero-copy slices of the input.
pub struct Decoder<'a> {
    buf: &'a Bytes,
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Unread remainder of the buffer.
    pub fn rest(&self) -> Bytes {
        self.buf.slice(self.pos..)
    }

    fn need(&self, n: usize) -> Result<(), DecodeError> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(DecodeError::InsufficientData {
                needed: n - remaining,
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<Bytes, DecodeError> {
        self.need(n)?;
        let slice = self.buf.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(self.take(2)?.get_u16())
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(self.take(4)?.get_u32())
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(self.take(8)?.get_u64())
    }

    /// Read one complete value.
    pub fn read_value(&mut self) -> Result<Value, DecodeError> {
        let constructor = self.u8()?;
        if constructor == format::DESCRIBED {
            let descriptor = self.read_descriptor()?;
            let value = self.read_value()?;
            return Ok(Value::Described(Box::new(Described { descriptor, value })));
        }
        self.read_body(constructor)
    }

    fn read_descriptor(&mut self) -> Result<Descriptor, DecodeError> {
        match self.read_value()? {
            Value::Symbol(symbol) => Ok(Descriptor::Symbol(symbol)),
            other => other
                .as_ulong()
                .map(Descriptor::Code)
                .ok_or_else(|| DecodeError::Malformed("descriptor is not ulong or symbol".into())),
        }
    }

    fn read_utf8(&mut self, len: usize) -> Result<String, DecodeError> {
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| DecodeError::Malformed("invalid UTF-8 in string".into()))
    }

    fn read_body(&mut self, constructor: u8) -> Result<Value, DecodeError> {
        use format::*;

        Ok(match constructor {
            NULL => Value::Null,
            BOOLEAN_TRUE => Value::Bool(true),
            BOOLEAN_FALSE => Value::Bool(false),
            BOOLEAN => Value::Bool(self.u8()? != 0),
            UINT_0 => Value::Uint(0),
            ULONG_0 => Value::Ulong(0),
            LIST_0 => Value::List(Vec::new()),
            UBYTE => Value::Ubyte(self.u8()?),
            BYTE => Value::Byte(self.u8()? as i8),
            SMALL_UINT => Value::Uint(self.u8()? as u32),
            SMALL_ULONG => Value::Ulong(self.u8()? as u64),
            SMALL_INT => Value::Int(self.u8()? as i8 as i32),
            SMALL_LONG => Value::Long(self.u8()? as i8 as i64),
            USHORT => Value::Ushort(self.u16()?),
            SHORT => Value::Short(self.u16()? as i16),
            UINT => Value::Uint(self.u32()?),
            INT => Value::Int(self.u32()? as i32),
            ULONG => Value::Ulong(self.u64()?),
            LONG => Value::Long(self.u64()? as i64),
            TIMESTAMP => Value::Timestamp(self.u64()? as i64),
            UUID => {
                let raw = self.take(16)?;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&raw);
                Value::Uuid(uuid)
            }
            VBIN8 => {
                let len = self.u8()? as usize;
                Value::Binary(self.take(len)?)
            }
            VBIN32 => {
                let len = self.u32()? as usize;
                Value::Binary(self.take(len)?)
            }
            STR8 => {
                let len = self.u8()? as usize;
                Value::String(self.read_utf8(len)?)
            }
            STR32 => {
                let len = self.u32()? as usize;
                Value::String(self.read_utf8(len)?)
            }
            SYM8 => {
                let len = self.u8()? as usize;
                Value::Symbol(Symbol(self.read_utf8(len)?))
            }
            SYM32 => {
                let len = self.u32()? as usize;
                Value::Symbol(Symbol(self.read_utf8(len)?))
            }
            LIST8 | LIST32 | MAP8 | MAP32 => {
                let wide = matches!(constructor, LIST32 | MAP32);
                let (size, count) = self.compound_header(wide)?;
                let end = self.pos + size;
                let mut items = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                self.expect_end(end)?;
                if matches!(constructor, LIST8 | LIST32) {
                    Value::List(items)
                } else {
                    if items.len() % 2 != 0 {
                        return Err(DecodeError::Malformed("map with odd element count".into()));
                    }
                    let mut pairs = Vec::with_capacity(items.len() / 2);
                    let mut iter = items.into_iter();
                    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                        pairs.push((key, value));
                    }
                    Value::Map(pairs)
                }
            }
            ARRAY8 | ARRAY32 => {
                let (size, count) = self.compound_header(constructor == ARRAY32)?;
                let end = self.pos + size;
                let mut element = self.u8()?;
                let descriptor = if element == DESCRIBED {
                    let descriptor = self.read_descriptor()?;
                    element = self.u8()?;
                    Some(descriptor)
                } else {
                    None
                };
                let mut items = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    let value = self.read_body(element)?;
                    items.push(match &descriptor {
                        Some(descriptor) => Value::Described(Box::new(Described {
                            descriptor: descriptor.clone(),
                            value,
                        })),
                        None => value,
                    });
                }
                self.expect_end(end)?;
                Value::Array(items)
            }
            other => return Err(DecodeError::InvalidFormatCode(other)),
        })
    }

    /// Returns (size after the size field minus the count field, count).
    fn compound_header(&mut self, wide: bool) -> Result<(usize, usize), DecodeError> {
        let (size, count_width) = if wide {
            (self.u32()? as usize, 4)
        } else {
            (self.u8()? as usize, 1)
        };
        if size < count_width {
            return Err(DecodeError::Malformed("compound size smaller than count".into()));
        }
        self.need(size)?;
        let count = if wide {
            self.u32()? as usize
        } else {
            self.u8()? as usize
        };
        Ok((size - count_width, count))
    }

    fn expect_end(&self, end: usize) -> Result<(), DecodeError> {
        if self.pos != end {
            return Err(DecodeError::Malformed(format!(
                "compound contents end at {} but declared size ends at {}",
                self.pos, end
            )));
        }
        Ok(())
    }
}

/// Decode a single value from the start of `buf`.
pub fn decode_value(buf: &Bytes) -> Result<(Value, usize), DecodeError> {
    let mut decoder = Decoder::new(buf);
    let value = decoder.read_value()?;
    Ok((value, decoder.position()))
}
