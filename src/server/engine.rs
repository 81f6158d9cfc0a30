//! Contract of the media engine driven by the server.
//!
//! The engine itself lives outside this crate. The server only needs to
//! call it from dispatch handlers and to receive its asynchronous
//! notifications through one message callback.

use bytes::Bytes;

use crate::codec::media::{PushMediaInfo, VideoFrameInfo};
use crate::protocol::{ErrorCode, EventType, PlayerState, Value};

/// Engine operations report failures as wire error codes.
pub type EngineResult<T> = std::result::Result<T, ErrorCode>;

/// Notification raised by the engine, possibly from its own threads.
#[derive(Debug, Clone)]
pub enum EngineMessage {
    /// An event with plain payload fields.
    Notify {
        event: EventType,
        fields: Vec<(String, Value)>,
    },
    /// A decoded video frame; each plane is exported to shared memory.
    /// Plane keys in `info` are filled in by the server.
    VideoFrame {
        info: VideoFrameInfo,
        planes: Vec<Bytes>,
    },
    /// A decoded audio buffer.
    AudioFrame(Bytes),
    /// Result of `capture_video`.
    Captured { width: u32, height: u32, data: Bytes },
}

impl EngineMessage {
    /// Shorthand for a field-less notification.
    pub fn notify(event: EventType) -> Self {
        EngineMessage::Notify {
            event,
            fields: Vec::new(),
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            EngineMessage::Notify { event, .. } => *event,
            EngineMessage::VideoFrame { .. } => EventType::MediaPacketVideoFrame,
            EngineMessage::AudioFrame(_) => EventType::AudioFrame,
            EngineMessage::Captured { .. } => EventType::Capture,
        }
    }
}

/// Callback the engine invokes for every [`EngineMessage`].
pub type MessageCallback = Box<dyn Fn(EngineMessage) + Send + Sync>;

/// One engine instance.
///
/// Every method is blocking. Implementations must leave their state
/// unchanged when they return an error.
pub trait MediaEngine: Send {
    /// Opaque handle reported to the client.
    fn handle(&self) -> u64;

    fn prepare(&mut self) -> EngineResult<()>;

    /// Begin preparing; completion is reported as a `Prepare` notification.
    fn prepare_async(&mut self) -> EngineResult<()>;

    fn unprepare(&mut self) -> EngineResult<()>;
    fn start(&mut self) -> EngineResult<()>;
    fn stop(&mut self) -> EngineResult<()>;
    fn pause(&mut self) -> EngineResult<()>;

    fn set_attribute(&mut self, name: &str, value: &Value) -> EngineResult<()>;
    fn get_attribute(&self, name: &str) -> EngineResult<Value>;

    fn state(&self) -> PlayerState;

    /// Feed one compressed packet.
    fn push_media_stream(&mut self, info: &PushMediaInfo, data: &[u8]) -> EngineResult<()>;

    /// Request a capture; the image is reported as [`EngineMessage::Captured`].
    fn capture_video(&mut self) -> EngineResult<()>;

    /// Install the notification callback. Called once, right after creation.
    fn set_message_callback(&mut self, callback: MessageCallback);

    /// Release the engine. Only called once it is stopped and unprepared.
    fn destroy(&mut self) -> EngineResult<()>;
}

/// Creates engine instances for new connections.
pub trait EngineFactory: Send + Sync + 'static {
    fn create(&self) -> EngineResult<Box<dyn MediaEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> EngineResult<Box<dyn MediaEngine>> + Send + Sync + 'static,
{
    fn create(&self) -> EngineResult<Box<dyn MediaEngine>> {
        self()
    }
}
