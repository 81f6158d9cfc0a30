//! MsgPack codec using `rmp-serde`.
//!
//! Always uses `to_vec_named`: structs are serialized as maps keyed by
//! field name, so a descriptor that gains a field stays readable by an
//! older peer.
//!
//! # Example
//!
//! ```
//! use playerwire::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Plane {
//!     stride: u32,
//!     size: u64,
//! }
//!
//! let plane = Plane { stride: 1920, size: 1920 * 1080 };
//! let encoded = MsgPackCodec::encode(&plane).unwrap();
//! let decoded: Plane = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, plane);
//! ```

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::{Message, Value};

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode a value as an `Array` field value.
    pub fn encode_value<T: serde::Serialize>(value: &T) -> Result<Value> {
        Ok(Value::Array(Bytes::from(Self::encode(value)?)))
    }

    /// Decode the `Array` field `name` of `msg`.
    pub fn decode_field<T: serde::de::DeserializeOwned>(msg: &Message, name: &str) -> Result<T> {
        let bytes = msg.get_array(name)?;
        Self::decode(&bytes)
    }
}
