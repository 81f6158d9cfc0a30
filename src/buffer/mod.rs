//! Cross-process buffer exchange.
//!
//! Large payloads (decoded planes, captured images, pushed packets) are
//! copied into shared-memory regions and referenced on the wire by an
//! opaque [`BufferKey`]. The exporting side keeps the authoritative table
//! in the process-global [`BufferManager`]; each connection tracks what it
//! exported in a [`ConnectionBuffers`] so teardown can free leftovers.
//!
//! # Example
//!
//! ```
//! use playerwire::buffer::BufferManager;
//!
//! let manager = BufferManager::acquire();
//! let key = manager.export(b"frame bytes").unwrap();
//!
//! let view = manager.import(key).unwrap();
//! assert_eq!(&view[..], b"frame bytes");
//!
//! assert!(manager.release(key));
//! assert!(!manager.release(key));
//! ```

mod manager;
mod shm;
mod tracker;

use std::fmt;

use thiserror::Error;

pub use manager::BufferManager;
pub use shm::ImportedBuffer;
pub use tracker::{ConnectionBuffers, PacketToken};

/// Opaque handle of an exported buffer.
///
/// Only ever compared and sent over the wire; it is never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferKey(u64);

impl BufferKey {
    /// Wrap a key received from the wire.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Buffer exchange failures. Local to the operation; the connection stays up.
#[derive(Debug, Error)]
pub enum BufferError {
    /// The backing region could not be created.
    #[error("shared memory allocation failed: {0}")]
    AllocationFailed(String),

    /// The region could not be mapped.
    #[error("shared memory mapping failed: {0}")]
    MapFailed(String),

    /// No region exists for this key.
    #[error("buffer {0} not found")]
    NotFound(BufferKey),
}
