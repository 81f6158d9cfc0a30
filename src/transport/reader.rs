//! Buffered readers for the control and data channels.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{PlayerWireError, Result};
use crate::protocol::{Frame, FrameBuffer, DEFAULT_MAX_BODY_SIZE};

/// Size of a single socket read.
const READ_CHUNK: usize = 64 * 1024;

/// Reads whole frames from a byte stream.
pub struct FrameReader<R> {
    reader: R,
    buffer: FrameBuffer,
    scratch: Box<[u8]>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_body(reader, DEFAULT_MAX_BODY_SIZE)
    }

    pub fn with_max_body(reader: R, max_body_size: u32) -> Self {
        Self {
            reader,
            buffer: FrameBuffer::with_max_body(max_body_size),
            scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames. An end of
    /// stream in the middle of a frame is `ConnectionLost`; a header that
    /// fails validation is `Malformed`.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return Ok(Some(frame));
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                tracing::error!(
                    buffered = self.buffer.len(),
                    "stream closed mid-frame"
                );
                return Err(PlayerWireError::ConnectionLost);
            }
            self.buffer.extend(&self.scratch[..n]);
        }
    }

    /// Stop framing: hand back the stream plus bytes already buffered
    /// past the last frame.
    pub fn into_raw(self) -> RawReader<R> {
        RawReader {
            reader: self.reader,
            prefix: self.buffer.into_remaining(),
        }
    }
}

/// Exact-length reads from an unframed stream.
pub struct RawReader<R> {
    reader: R,
    prefix: BytesMut,
}

impl<R: AsyncRead + Unpin> RawReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            prefix: BytesMut::new(),
        }
    }

    /// Read exactly `len` bytes.
    pub async fn read_exact(&mut self, len: usize) -> Result<Bytes> {
        if self.prefix.len() >= len {
            return Ok(self.prefix.split_to(len).freeze());
        }

        let mut out = BytesMut::with_capacity(len);
        out.extend_from_slice(&self.prefix.split());
        let start = out.len();
        out.resize(len, 0);
        self.reader
            .read_exact(&mut out[start..])
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => PlayerWireError::ConnectionLost,
                _ => PlayerWireError::Io(e),
            })?;
        Ok(out.freeze())
    }
}
