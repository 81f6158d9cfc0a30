//! # playerwire
//!
//! IPC substrate for driving a media player engine that runs in another
//! process.
//!
//! A [`PlayerClient`] issues synchronous calls over a Unix socket and
//! receives asynchronous engine events on a dedicated dispatch thread. A
//! [`Server`] accepts clients and runs one engine per connection through a
//! fixed dispatch table. Large payloads cross the boundary as shared-memory
//! buffers referenced by opaque keys.
//!
//! ## Architecture
//!
//! - **Control channel** (Unix socket): framed calls, returns and events
//! - **Data channel** (second socket, optional): raw bytes for bulk feeding
//! - **Shared memory**: decoded frames, audio buffers and captures
//!
//! ## Example
//!
//! ```ignore
//! use playerwire::{ClientConfig, PlayerClient};
//!
//! #[tokio::main]
//! async fn main() -> playerwire::Result<()> {
//!     let client = PlayerClient::connect(ClientConfig::new("/tmp/player.sock")).await?;
//!     client.create().await?;
//!     client.prepare().await?;
//!     client.start().await?;
//!     client.destroy().await
//! }
//! ```

pub mod buffer;
pub mod client;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod writer;

pub use client::{ClientConfig, Event, PlayerClient};
pub use error::{PlayerWireError, Result};
pub use server::{MediaEngine, Server, ServerConfig};
