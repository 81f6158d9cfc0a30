//! Typed key/value messages and their body encoding.
//!
//! Body layout:
//! ```text
//! u16 field_count
//! repeat field_count:
//!     u8 name_len, name (UTF-8), u8 type_tag, value
//! u8 has_raw
//! [u32 raw_len, raw bytes]   (when has_raw == 1)
//! ```
//!
//! # Example
//!
//! ```
//! use playerwire::protocol::{api, ErrorCode, Message};
//!
//! let reply = Message::reply(api::CREATE, ErrorCode::None).with("handle", 0xABCD_i64);
//! assert_eq!(reply.return_code(), ErrorCode::None);
//! assert_eq!(reply.get_i64("handle").unwrap(), 0xABCD);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::ids::{api, field, ErrorCode, EventType};
use super::value::{Value, ValueType};
use super::wire_format::{Header, MessageKind, HEADER_SIZE};
use crate::error::{PlayerWireError, Result};

/// A frame could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl From<DecodeError> for PlayerWireError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Malformed(msg) => PlayerWireError::Malformed(msg),
        }
    }
}

/// A typed getter was used against a field it does not match.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("field `{0}` is missing")]
    Missing(String),
    #[error("field `{name}` has type {found:?}, expected {expected:?}")]
    WrongType {
        name: String,
        expected: ValueType,
        found: ValueType,
    },
}

/// One call, return, or event.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub api_id: u32,
    pub kind: MessageKind,
    /// Per-api sequence number (0 = untagged).
    pub seq: u32,
    fields: Vec<(String, Value)>,
    raw: Option<Bytes>,
}

macro_rules! typed_getter {
    ($get:ident, $or:ident, $variant:ident, $ty:ty) => {
        /// Typed getter; see [`FieldError`].
        pub fn $get(&self, name: &str) -> std::result::Result<$ty, FieldError> {
            match self.get(name) {
                Some(Value::$variant(v)) => Ok(v.clone()),
                Some(other) => Err(FieldError::WrongType {
                    name: name.to_string(),
                    expected: ValueType::$variant,
                    found: other.value_type(),
                }),
                None => Err(FieldError::Missing(name.to_string())),
            }
        }

        /// Like the strict getter, but logs and falls back to `default`.
        pub fn $or(&self, name: &str, default: $ty) -> $ty {
            match self.$get(name) {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(api_id = self.api_id, "{}", err);
                    default
                }
            }
        }
    };
}

impl Message {
    /// Create a message of the given kind with no fields.
    pub fn new(api_id: u32, kind: MessageKind) -> Self {
        Self {
            api_id,
            kind,
            seq: 0,
            fields: Vec::new(),
            raw: None,
        }
    }

    /// A call to `api_id`.
    pub fn call(api_id: u32) -> Self {
        Self::new(api_id, MessageKind::Call)
    }

    /// A return for `api_id`; `return_code` is always the first field.
    pub fn reply(api_id: u32, code: ErrorCode) -> Self {
        Self::new(api_id, MessageKind::Return).with(field::RETURN_CODE, code.as_i32())
    }

    /// An event; the event type is always the first field.
    pub fn event(event: EventType) -> Self {
        Self::new(api::EVENT, MessageKind::Event).with(field::EVENT, event.as_i32())
    }

    /// Set the sequence number.
    pub fn with_seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    /// Add or replace a field.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Attach the raw payload.
    pub fn with_raw(mut self, raw: impl Into<Bytes>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    /// Add or replace a field in place. Names stay unique.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Fields in wire order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[inline]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn raw(&self) -> Option<&Bytes> {
        self.raw.as_ref()
    }

    pub fn take_raw(&mut self) -> Option<Bytes> {
        self.raw.take()
    }

    typed_getter!(get_i32, i32_or, Int, i32);
    typed_getter!(get_i64, i64_or, Int64, i64);
    typed_getter!(get_pointer, pointer_or, Pointer, u64);
    typed_getter!(get_f64, f64_or, Double, f64);
    typed_getter!(get_string, string_or, String, String);
    typed_getter!(get_array, array_or, Array, Bytes);

    /// Borrowing string getter.
    pub fn get_str(&self, name: &str) -> std::result::Result<&str, FieldError> {
        match self.get(name) {
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(other) => Err(FieldError::WrongType {
                name: name.to_string(),
                expected: ValueType::String,
                found: other.value_type(),
            }),
            None => Err(FieldError::Missing(name.to_string())),
        }
    }

    /// The leading `return_code` of a return. A missing or mistyped code
    /// reads as `Unknown`.
    pub fn return_code(&self) -> ErrorCode {
        match self.get_i32(field::RETURN_CODE) {
            Ok(code) => ErrorCode::from_i32(code),
            Err(err) => {
                tracing::warn!(api_id = self.api_id, "{}", err);
                ErrorCode::Unknown
            }
        }
    }

    /// Convert a non-zero return code into an error.
    pub fn into_result(self) -> Result<Message> {
        match self.return_code() {
            ErrorCode::None => Ok(self),
            code => Err(PlayerWireError::Remote(code)),
        }
    }

    /// The event type of an event message.
    pub fn event_type(&self) -> Option<EventType> {
        self.get_i32(field::EVENT)
            .ok()
            .and_then(|v| EventType::try_from(v).ok())
    }

    /// Encode the body (without header).
    pub fn encode_body(&self) -> Result<BytesMut> {
        let count = u16::try_from(self.fields.len())
            .map_err(|_| PlayerWireError::Protocol("too many fields".to_string()))?;

        let mut len = 2 + 1;
        for (name, value) in &self.fields {
            len += 1 + name.len() + 1 + value.encoded_len();
        }
        if let Some(raw) = &self.raw {
            len += 4 + raw.len();
        }

        let mut buf = BytesMut::with_capacity(len);
        buf.put_u16(count);
        for (name, value) in &self.fields {
            let name_len = u8::try_from(name.len()).map_err(|_| {
                PlayerWireError::Protocol(format!("field name `{}` too long", name))
            })?;
            buf.put_u8(name_len);
            buf.put_slice(name.as_bytes());
            buf.put_u8(value.value_type().tag());
            match value {
                Value::Int(v) => buf.put_i32(*v),
                Value::Int64(v) => buf.put_i64(*v),
                Value::Pointer(v) => buf.put_u64(*v),
                Value::Double(v) => buf.put_u64(v.to_bits()),
                Value::String(s) => {
                    buf.put_u32(len_u32(s.len())?);
                    buf.put_slice(s.as_bytes());
                }
                Value::Array(a) => {
                    buf.put_u32(len_u32(a.len())?);
                    buf.put_slice(a);
                }
            }
        }
        match &self.raw {
            Some(raw) => {
                buf.put_u8(1);
                buf.put_u32(len_u32(raw.len())?);
                buf.put_slice(raw);
            }
            None => buf.put_u8(0),
        }
        Ok(buf)
    }

    /// Encode a complete frame: header followed by body.
    pub fn encode(&self) -> Result<Bytes> {
        let body = self.encode_body()?;
        let header = Header::new(
            self.api_id,
            self.kind.to_flags(),
            self.seq,
            len_u32(body.len())?,
        );
        let mut frame = BytesMut::with_capacity(HEADER_SIZE + body.len());
        frame.put_slice(&header.encode());
        frame.put_slice(&body);
        Ok(frame.freeze())
    }

    /// Decode a body given its already-parsed header.
    pub fn decode_body(header: &Header, body: &[u8]) -> std::result::Result<Self, DecodeError> {
        let kind = header
            .kind()
            .ok_or_else(|| malformed(format!("unknown kind flags {:#04x}", header.flags)))?;
        let mut r = Reader { buf: body, pos: 0 };

        let count = r.u16()?;
        let mut fields: Vec<(String, Value)> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name_len = r.u8()? as usize;
            let name = r.utf8(name_len)?;
            if fields.iter().any(|(n, _)| *n == name) {
                return Err(malformed(format!("duplicate field `{}`", name)));
            }
            let tag = r.u8()?;
            let ty = ValueType::from_tag(tag)
                .ok_or_else(|| malformed(format!("unknown type tag {}", tag)))?;
            let value = match ty {
                ValueType::Int => Value::Int(r.u32()? as i32),
                ValueType::Int64 => Value::Int64(r.u64()? as i64),
                ValueType::Pointer => Value::Pointer(r.u64()?),
                ValueType::Double => Value::Double(f64::from_bits(r.u64()?)),
                ValueType::String => {
                    let len = r.u32()? as usize;
                    Value::String(r.utf8(len)?)
                }
                ValueType::Array => {
                    let len = r.u32()? as usize;
                    Value::Array(Bytes::copy_from_slice(r.take(len)?))
                }
            };
            fields.push((name, value));
        }

        let raw = match r.u8()? {
            0 => None,
            1 => {
                let len = r.u32()? as usize;
                Some(Bytes::copy_from_slice(r.take(len)?))
            }
            other => return Err(malformed(format!("invalid raw marker {}", other))),
        };

        if r.pos != body.len() {
            return Err(malformed(format!(
                "{} trailing bytes in body",
                body.len() - r.pos
            )));
        }

        Ok(Self {
            api_id: header.api_id,
            kind,
            seq: header.sequence,
            fields,
            raw,
        })
    }
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| PlayerWireError::Protocol(format!("length {} too large", len)))
}

fn malformed(msg: String) -> DecodeError {
    DecodeError::Malformed(msg)
}

/// Bounds-checked cursor over a body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| malformed("body overrun".to_string()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> std::result::Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> std::result::Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> std::result::Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> std::result::Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    fn utf8(&mut self, n: usize) -> std::result::Result<String, DecodeError> {
        let b = self.take(n)?;
        std::str::from_utf8(b)
            .map(str::to_string)
            .map_err(|_| malformed("invalid UTF-8".to_string()))
    }
}
