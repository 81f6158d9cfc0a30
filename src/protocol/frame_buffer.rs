//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 13 bytes
//! - `WaitingForBody`: Header parsed, need N more body bytes
//!
//! Capacity grows geometrically so a high-rate event stream triggers a
//! bounded number of reallocations.
//!
//! # Example
//!
//! ```
//! use playerwire::protocol::{api, FrameBuffer, Message};
//!
//! let bytes = Message::call(api::START).encode().unwrap();
//! let mut buffer = FrameBuffer::new();
//!
//! let frames = buffer.push(&bytes[..4]).unwrap();
//! assert!(frames.is_empty());
//!
//! let frames = buffer.push(&bytes[4..]).unwrap();
//! assert_eq!(frames[0].api_id(), api::START);
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{Header, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

/// Initial receive capacity.
const INITIAL_CAPACITY: usize = 16 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 13 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for body bytes.
    WaitingForBody { header: Header, remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed body size.
    max_body_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY_SIZE)
    }

    /// Create a new frame buffer with custom max body size.
    pub fn with_max_body(max_body_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            state: State::WaitingForHeader,
            max_body_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if a header fails validation. The stream is
    /// unusable afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.extend(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Append data without extracting frames, growing capacity geometrically.
    pub fn extend(&mut self, data: &[u8]) {
        let free = self.buffer.capacity() - self.buffer.len();
        if free < data.len() {
            let grow = data.len().max(self.buffer.capacity());
            self.buffer.reserve(grow);
        }
        self.buffer.extend_from_slice(data);
    }

    /// Extract a single frame if one is complete.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &self.state {
            State::WaitingForHeader => {
                let Some(header) = Header::decode(&self.buffer) else {
                    return Ok(None);
                };
                header.validate(self.max_body_size)?;

                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.body_length == 0 {
                    return Ok(Some(Frame::new(header, Bytes::new())));
                }

                self.state = State::WaitingForBody {
                    header,
                    remaining: header.body_length,
                };
                self.next_frame()
            }

            State::WaitingForBody { header, remaining } => {
                let remaining = *remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let body = self.buffer.split_to(remaining).freeze();
                let header = *header;
                self.state = State::WaitingForHeader;

                Ok(Some(Frame::new(header, body)))
            }
        }
    }

    /// Consume the buffer, returning bytes not yet claimed by a frame.
    ///
    /// Only meaningful between frames; used when a socket switches from
    /// framed to raw mode after its first frame.
    pub fn into_remaining(self) -> BytesMut {
        self.buffer
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Current capacity of the receive buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
