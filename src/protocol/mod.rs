//! Protocol module - wire format, framing, and typed messages.
//!
//! This module implements the binary protocol for the control channel:
//! - 13-byte header encoding/decoding
//! - Typed key/value message bodies
//! - Frame buffer for accumulating partial reads
//! - API ids, event types, and error codes

mod ids;
mod frame;
mod frame_buffer;
mod message;
mod value;
mod wire_format;

pub use ids::{api, field, ErrorCode, EventType, PlayerState};
pub use frame::{decode, Decoded, Frame};
pub use frame_buffer::FrameBuffer;
pub use message::{DecodeError, FieldError, Message};
pub use value::{Value, ValueType};
pub use wire_format::{
    kind, Header, MessageKind, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE, RESERVED_API_ID,
};
