//! Server configuration.

use std::time::Duration;

use crate::protocol::DEFAULT_MAX_BODY_SIZE;
use crate::writer::WriterConfig;

/// How long a raw-route push waits for the data channel to attach.
pub const DEFAULT_DATA_CHANNEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for [`Server::bind`](super::Server::bind).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: String,
    /// Engines allowed at once; further `CREATE`s get `ResourceLimit`.
    /// `None` means unlimited.
    pub max_modules: Option<usize>,
    pub data_channel_timeout: Duration,
    pub max_body_size: u32,
    pub writer: WriterConfig,
}

impl ServerConfig {
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }

    /// Limit the number of live engines.
    ///
    /// Default: unlimited
    pub fn max_modules(mut self, limit: usize) -> Self {
        self.max_modules = Some(limit);
        self
    }

    /// Default: 5 seconds
    pub fn data_channel_timeout(mut self, timeout: Duration) -> Self {
        self.data_channel_timeout = timeout;
        self
    }

    /// Default: 64 MiB
    pub fn max_body_size(mut self, size: u32) -> Self {
        self.max_body_size = size;
        self
    }

    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.writer.max_pending_frames = limit;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: String::new(),
            max_modules: None,
            data_channel_timeout: DEFAULT_DATA_CHANNEL_TIMEOUT,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            writer: WriterConfig::default(),
        }
    }
}
