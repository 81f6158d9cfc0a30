//! Client configuration.

use std::time::Duration;

use crate::protocol::DEFAULT_MAX_BODY_SIZE;
use crate::writer::WriterConfig;

/// Default deadline for one synchronous call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(35);

/// Settings for [`PlayerClient::connect`](super::PlayerClient::connect).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path of the server's listening socket.
    pub socket_path: String,
    pub call_timeout: Duration,
    /// Open the raw data channel after `create`.
    pub open_data_channel: bool,
    pub max_body_size: u32,
    pub writer: WriterConfig,
}

impl ClientConfig {
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }

    /// Set the per-call timeout.
    ///
    /// Default: 35 seconds
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Whether `create` also attaches the data channel.
    ///
    /// Default: true
    pub fn open_data_channel(mut self, open: bool) -> Self {
        self.open_data_channel = open;
        self
    }

    /// Largest frame body accepted from the server.
    ///
    /// Default: 64 MiB
    pub fn max_body_size(mut self, size: u32) -> Self {
        self.max_body_size = size;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.writer.max_pending_frames = limit;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer.backpressure_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: String::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            open_data_channel: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            writer: WriterConfig::default(),
        }
    }
}
