//! Transport module - Unix domain sockets for the control and data channels.
//!
//! - [`SocketListener`] / [`SocketStream`]: bind, accept, connect
//! - [`FrameReader`]: buffered framed reads over any `AsyncRead`
//! - [`RawReader`]: exact-length reads for the unframed data channel

mod reader;
mod socket;

pub use reader::{FrameReader, RawReader};
pub use socket::{generate_socket_path, SocketListener, SocketStream};
