//! Frame struct and the stateless frame decoder.
//!
//! A [`Frame`] is a validated header plus its undecoded body. The reader
//! side turns it into a [`Message`] only when it needs the fields.
//!
//! # Example
//!
//! ```
//! use playerwire::protocol::{decode, api, Decoded, Message, DEFAULT_MAX_BODY_SIZE};
//!
//! let bytes = Message::call(api::START).with("handle", 1i64).encode().unwrap();
//!
//! match decode(&bytes[..5], DEFAULT_MAX_BODY_SIZE).unwrap() {
//!     Decoded::Incomplete { needed } => assert!(needed > 0),
//!     Decoded::Complete { .. } => unreachable!(),
//! }
//!
//! match decode(&bytes, DEFAULT_MAX_BODY_SIZE).unwrap() {
//!     Decoded::Complete { message, consumed } => {
//!         assert_eq!(message.api_id, api::START);
//!         assert_eq!(consumed, bytes.len());
//!     }
//!     Decoded::Incomplete { .. } => unreachable!(),
//! }
//! ```

use bytes::Bytes;

use super::message::{DecodeError, Message};
use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame from header and body.
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Get the API id.
    #[inline]
    pub fn api_id(&self) -> u32 {
        self.header.api_id
    }

    /// Get the sequence number.
    #[inline]
    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Decode the body into a typed message.
    pub fn to_message(&self) -> Result<Message, DecodeError> {
        Message::decode_body(&self.header, &self.body)
    }
}

/// Result of feeding bytes to [`decode`].
#[derive(Debug)]
pub enum Decoded {
    /// A whole frame was parsed from the front of the buffer.
    Complete { message: Message, consumed: usize },
    /// At least `needed` more bytes are required.
    Incomplete { needed: usize },
}

/// Decode one frame from the front of `buf`.
///
/// Distinguishes "need more bytes" from a malformed frame; the caller
/// retries on the former and must drop the stream on the latter.
pub fn decode(buf: &[u8], max_body_size: u32) -> Result<Decoded, DecodeError> {
    let Some(header) = Header::decode(buf) else {
        return Ok(Decoded::Incomplete {
            needed: HEADER_SIZE - buf.len(),
        });
    };
    header
        .validate(max_body_size)
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let total = HEADER_SIZE + header.body_length as usize;
    if buf.len() < total {
        return Ok(Decoded::Incomplete {
            needed: total - buf.len(),
        });
    }

    let message = Message::decode_body(&header, &buf[HEADER_SIZE..total])?;
    Ok(Decoded::Complete {
        message,
        consumed: total,
    })
}
