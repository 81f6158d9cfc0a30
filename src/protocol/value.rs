//! Typed field values carried in a message body.

use bytes::Bytes;

/// Wire type tags.
pub mod tag {
    pub const INT: u8 = 1;
    pub const INT64: u8 = 2;
    pub const POINTER: u8 = 3;
    pub const DOUBLE: u8 = 4;
    pub const STRING: u8 = 5;
    pub const ARRAY: u8 = 6;
}

/// Declared type of a field, used for getter diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int,
    Int64,
    Pointer,
    Double,
    String,
    Array,
}

impl ValueType {
    /// Wire tag for this type.
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            ValueType::Int => tag::INT,
            ValueType::Int64 => tag::INT64,
            ValueType::Pointer => tag::POINTER,
            ValueType::Double => tag::DOUBLE,
            ValueType::String => tag::STRING,
            ValueType::Array => tag::ARRAY,
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(t: u8) -> Option<Self> {
        match t {
            tag::INT => Some(ValueType::Int),
            tag::INT64 => Some(ValueType::Int64),
            tag::POINTER => Some(ValueType::Pointer),
            tag::DOUBLE => Some(ValueType::Double),
            tag::STRING => Some(ValueType::String),
            tag::ARRAY => Some(ValueType::Array),
            _ => None,
        }
    }
}

/// A single typed field value.
///
/// Pointer-sized values always travel as 8 bytes; use
/// [`Value::pointer_as_usize`] to narrow them on the receiving side.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Int64(i64),
    Pointer(u64),
    Double(f64),
    String(String),
    Array(Bytes),
}

impl Value {
    /// The declared type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int(_) => ValueType::Int,
            Value::Int64(_) => ValueType::Int64,
            Value::Pointer(_) => ValueType::Pointer,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Array,
        }
    }

    /// Re-widen a pointer value to the local pointer width.
    ///
    /// Returns `None` for non-pointer values or values that do not fit.
    pub fn pointer_as_usize(&self) -> Option<usize> {
        match self {
            Value::Pointer(p) => usize::try_from(*p).ok(),
            _ => None,
        }
    }

    /// Encoded size of the value part (without tag).
    pub(crate) fn encoded_len(&self) -> usize {
        match self {
            Value::Int(_) => 4,
            Value::Int64(_) | Value::Pointer(_) | Value::Double(_) => 8,
            Value::String(s) => 4 + s.len(),
            Value::Array(a) => 4 + a.len(),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Array(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Array(Bytes::from(v))
    }
}
