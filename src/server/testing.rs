//! Engine stub and module builder for the server unit tests.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::runtime::Handle;

use super::config::ServerConfig;
use super::engine::{EngineResult, MediaEngine, MessageCallback};
use super::module::{Module, ServerContext};
use super::sink::EventSink;
use crate::buffer::{BufferManager, ConnectionBuffers};
use crate::codec::media::PushMediaInfo;
use crate::protocol::{ErrorCode, PlayerState, Value};
use crate::writer::spawn_writer_task_default;

pub(crate) type CallLog = Arc<Mutex<Vec<String>>>;

/// Records every call; `fail_stop` makes `stop` report an engine failure.
pub(crate) struct StubEngine {
    pub state: PlayerState,
    pub log: CallLog,
    pub fail_stop: bool,
}

impl StubEngine {
    pub fn new(state: PlayerState, log: &CallLog) -> Self {
        Self {
            state,
            log: Arc::clone(log),
            fail_stop: false,
        }
    }

    fn record(&self, what: impl Into<String>) {
        self.log.lock().push(what.into());
    }
}

impl MediaEngine for StubEngine {
    fn handle(&self) -> u64 {
        0x51ab
    }

    fn prepare(&mut self) -> EngineResult<()> {
        self.record("prepare");
        self.state = PlayerState::Ready;
        Ok(())
    }

    fn prepare_async(&mut self) -> EngineResult<()> {
        self.prepare()
    }

    fn unprepare(&mut self) -> EngineResult<()> {
        self.record("unprepare");
        self.state = PlayerState::Idle;
        Ok(())
    }

    fn start(&mut self) -> EngineResult<()> {
        if !self.state.is_prepared() {
            return Err(ErrorCode::InvalidState);
        }
        self.record("start");
        self.state = PlayerState::Playing;
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.record("stop");
        if self.fail_stop {
            return Err(ErrorCode::EngineFailure);
        }
        self.state = PlayerState::Ready;
        Ok(())
    }

    fn pause(&mut self) -> EngineResult<()> {
        self.record("pause");
        self.state = PlayerState::Paused;
        Ok(())
    }

    fn set_attribute(&mut self, name: &str, _value: &Value) -> EngineResult<()> {
        self.record(format!("set:{}", name));
        Ok(())
    }

    fn get_attribute(&self, _name: &str) -> EngineResult<Value> {
        Err(ErrorCode::NotSupported)
    }

    fn state(&self) -> PlayerState {
        self.state
    }

    fn push_media_stream(&mut self, info: &PushMediaInfo, data: &[u8]) -> EngineResult<()> {
        self.record(format!("push:{}:{}", info.pts, data.len()));
        Ok(())
    }

    fn capture_video(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn set_message_callback(&mut self, _callback: MessageCallback) {}

    fn destroy(&mut self) -> EngineResult<()> {
        self.record("destroy");
        Ok(())
    }
}

/// A module with no engine, limited to `max_modules`, plus the peer end of
/// its control socket.
pub(crate) fn empty_module(max_modules: Option<usize>) -> (Module, DuplexStream) {
    let log = CallLog::default();
    let factory = move || -> EngineResult<Box<dyn MediaEngine>> {
        Ok(Box::new(StubEngine::new(PlayerState::Idle, &log)))
    };
    let config = ServerConfig {
        max_modules,
        ..ServerConfig::default()
    };
    let ctx = Arc::new(ServerContext::new(config, Box::new(factory)));

    let (tx, rx) = tokio::io::duplex(64 * 1024);
    let (writer, _task) = spawn_writer_task_default(tx);
    let buffers = Arc::new(ConnectionBuffers::new(BufferManager::acquire()));
    let sink = Arc::new(EventSink::new(writer, Arc::clone(&buffers)));
    (Module::new(ctx, sink, buffers, Handle::current()), rx)
}

/// A module already holding `engine`.
pub(crate) fn module_with(engine: StubEngine) -> (Module, DuplexStream) {
    let (mut module, rx) = empty_module(Some(1));
    assert!(module.admit());
    module.install(Box::new(engine));
    (module, rx)
}
