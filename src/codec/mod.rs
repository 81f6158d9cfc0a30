//! Codec module - structured payloads carried in array fields.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//! - [`media`] - descriptor structs for pushed packets and exported frames
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects.
//! Scalar arguments travel as typed message fields; anything with nested
//! structure is serialized once and carried as a single `Array` field.
//!
//! # Example
//!
//! ```
//! use playerwire::codec::{media::PushMediaInfo, MsgPackCodec};
//! use playerwire::protocol::{api, Message};
//!
//! let info = PushMediaInfo { size: 4, pts: 1000, ..Default::default() };
//! let msg = Message::call(api::PUSH_MEDIA_STREAM)
//!     .with("info", MsgPackCodec::encode_value(&info).unwrap());
//!
//! let back: PushMediaInfo = MsgPackCodec::decode_field(&msg, "info").unwrap();
//! assert_eq!(back, info);
//! ```

pub mod media;
mod msgpack;

pub use msgpack::MsgPackCodec;
