//! Frame header encoding and decoding.
//!
//! Implements the 13-byte header format:
//! ```text
//! ┌──────────┬───────┬──────────┬──────────┐
//! │ API ID   │ Kind  │ Sequence │ Length   │
//! │ 4 bytes  │ 1 byte│ 4 bytes  │ 4 bytes  │
//! │ uint32 BE│       │ uint32 BE│ uint32 BE│
//! └──────────┴───────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{PlayerWireError, Result};

/// Header size in bytes (fixed, exactly 13).
pub const HEADER_SIZE: usize = 13;

/// Default maximum body size (64 MB).
pub const DEFAULT_MAX_BODY_SIZE: u32 = 64 * 1024 * 1024;

/// Reserved API id (never use).
pub const RESERVED_API_ID: u32 = 0;

/// Kind flag constants.
pub mod kind {
    /// A call from the client to the server.
    pub const CALL: u8 = 0x00;
    /// A return for a previously issued call.
    pub const RETURN: u8 = 0x01;
    /// An out-of-band event pushed by the server.
    pub const EVENT: u8 = 0x02;

    /// Reserved bits mask (bits 2-7).
    pub const RESERVED_MASK: u8 = 0b1111_1100;
}

/// Kind of a message on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Request expecting a return (or fire-and-forget).
    Call,
    /// Return for a call.
    Return,
    /// Asynchronous engine event.
    Event,
}

impl MessageKind {
    /// Wire value of this kind.
    #[inline]
    pub fn to_flags(self) -> u8 {
        match self {
            MessageKind::Call => kind::CALL,
            MessageKind::Return => kind::RETURN,
            MessageKind::Event => kind::EVENT,
        }
    }

    /// Parse from the wire flags byte.
    #[inline]
    pub fn from_flags(flags: u8) -> Option<Self> {
        match flags {
            kind::CALL => Some(MessageKind::Call),
            kind::RETURN => Some(MessageKind::Return),
            kind::EVENT => Some(MessageKind::Event),
            _ => None,
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Operation, return-for-operation, or event selector.
    pub api_id: u32,
    /// Kind flags (see `kind` module).
    pub flags: u8,
    /// Per-api call sequence number (0 = untagged).
    pub sequence: u32,
    /// Body length in bytes.
    pub body_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(api_id: u32, flags: u8, sequence: u32, body_length: u32) -> Self {
        Self {
            api_id,
            flags,
            sequence,
            body_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use playerwire::protocol::{Header, kind};
    ///
    /// let header = Header::new(1, kind::RETURN, 42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 13);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (13 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.api_id.to_be_bytes());
        buf[4] = self.flags;
        buf[5..9].copy_from_slice(&self.sequence.to_be_bytes());
        buf[9..13].copy_from_slice(&self.body_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use playerwire::protocol::Header;
    ///
    /// let bytes = [0, 0, 0, 1, 0x01, 0, 0, 0, 42, 0, 0, 0, 100];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.api_id, 1);
    /// assert_eq!(header.sequence, 42);
    /// assert_eq!(header.body_length, 100);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            api_id: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            flags: buf[4],
            sequence: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
            body_length: u32::from_be_bytes([buf[9], buf[10], buf[11], buf[12]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - API id is not 0 (reserved)
    /// - Body length doesn't exceed max
    /// - Reserved flag bits are 0
    pub fn validate(&self, max_body_size: u32) -> Result<()> {
        if self.api_id == RESERVED_API_ID {
            return Err(PlayerWireError::Malformed(
                "API id 0 is reserved".to_string(),
            ));
        }

        if self.body_length > max_body_size {
            return Err(PlayerWireError::Malformed(format!(
                "Body size {} exceeds maximum {}",
                self.body_length, max_body_size
            )));
        }

        if self.flags & kind::RESERVED_MASK != 0 {
            return Err(PlayerWireError::Malformed(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Kind of this frame.
    #[inline]
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_flags(self.flags)
    }

    /// Check if this is a return.
    #[inline]
    pub fn is_return(&self) -> bool {
        self.flags == kind::RETURN
    }

    /// Check if this is an event.
    #[inline]
    pub fn is_event(&self) -> bool {
        self.flags == kind::EVENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(1, kind::RETURN, 42, 100);
        let encoded = original.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header::new(0x01020304, 0x02, 0x05060708, 0x090A0B0C);
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(bytes[4], 0x02);
        assert_eq!(&bytes[5..9], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&bytes[9..13], &[0x09, 0x0A, 0x0B, 0x0C]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; HEADER_SIZE - 1];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_api_id_zero_rejected() {
        let header = Header::new(0, kind::CALL, 1, 0);
        let result = header.validate(DEFAULT_MAX_BODY_SIZE);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("API id 0 is reserved"));
    }

    #[test]
    fn test_validate_body_too_large() {
        let header = Header::new(1, kind::CALL, 1, 1_000_000);
        let result = header.validate(100);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_validate_reserved_bits_must_be_zero() {
        let header = Header::new(1, 0b1000_0000, 1, 0);
        let result = header.validate(DEFAULT_MAX_BODY_SIZE);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Reserved flag bits"));
    }

    #[test]
    fn test_kind_accessors() {
        assert_eq!(Header::new(1, kind::CALL, 0, 0).kind(), Some(MessageKind::Call));
        assert!(Header::new(1, kind::RETURN, 0, 0).is_return());
        assert!(Header::new(1000, kind::EVENT, 0, 0).is_event());
        assert_eq!(Header::new(1, 0x03, 0, 0).kind(), None);
    }
}
