//! Unix domain socket listener and stream.
//!
//! # Example
//!
//! ```ignore
//! use playerwire::transport::{generate_socket_path, SocketListener, SocketStream};
//!
//! let path = generate_socket_path();
//! let listener = SocketListener::bind(&path)?;
//! let client = SocketStream::connect(&path).await?;
//! let server_side = listener.accept().await?;
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

use crate::error::Result;

/// Generate a unique socket path for this process.
///
/// Format: `/tmp/playerwire-{pid}-{random}.sock`
pub fn generate_socket_path() -> String {
    let pid = std::process::id();
    format!("/tmp/playerwire-{}-{:x}.sock", pid, rand_u64())
}

/// Simple random u64 from system time, process ID, and a call counter.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);

    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid ^ n.rotate_left(48)
}

/// Unix Domain Socket listener. Removes its socket file on drop.
pub struct SocketListener {
    listener: UnixListener,
    path: String,
}

impl SocketListener {
    /// Bind to a Unix socket path.
    ///
    /// Removes any stale socket file at the path before binding.
    pub fn bind(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        tracing::info!(path, "listening");

        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<SocketStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(SocketStream { stream })
    }

    /// Get the socket path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Connected Unix Domain Socket.
pub struct SocketStream {
    stream: UnixStream,
}

impl SocketStream {
    /// Connect to a listening socket.
    pub async fn connect(path: &str) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream })
    }

    /// Split into owned read and write halves.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }

    /// Get a reference to the underlying stream.
    pub fn inner(&self) -> &UnixStream {
        &self.stream
    }
}
