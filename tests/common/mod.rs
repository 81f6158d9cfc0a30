//! Shared harness for the integration tests: an in-process engine that
//! records what it is asked to do, and helpers to run a server next to a
//! client.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use playerwire::codec::media::PushMediaInfo;
use playerwire::protocol::{ErrorCode, EventType, PlayerState, Value};
use playerwire::server::{
    EngineFactory, EngineMessage, EngineResult, MediaEngine, MessageCallback, ServerStats,
};
use playerwire::transport::generate_socket_path;
use playerwire::{ClientConfig, PlayerClient, Server, ServerConfig};

pub const ENGINE_HANDLE: u64 = 0xABCD;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Everything the tests want to observe about the engines a factory built.
#[derive(Clone, Default)]
pub struct EngineProbe {
    log: Arc<Mutex<Vec<String>>>,
    pushes: Arc<Mutex<Vec<(u64, Vec<u8>)>>>,
    callback: Arc<Mutex<Option<MessageCallback>>>,
}

impl EngineProbe {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// `(pts, bytes)` of every pushed packet, in arrival order.
    pub fn pushes(&self) -> Vec<(u64, Vec<u8>)> {
        self.pushes.lock().clone()
    }

    /// Raise a notification as if the engine produced it on its own thread.
    pub fn emit(&self, msg: EngineMessage) {
        if let Some(callback) = self.callback.lock().as_ref() {
            callback(msg);
        }
    }

    fn record(&self, what: impl Into<String>) {
        self.log.lock().push(what.into());
    }
}

pub struct FakeEngine {
    state: PlayerState,
    volume: Value,
    probe: EngineProbe,
}

impl MediaEngine for FakeEngine {
    fn handle(&self) -> u64 {
        ENGINE_HANDLE
    }

    fn prepare(&mut self) -> EngineResult<()> {
        if self.state != PlayerState::Idle {
            return Err(ErrorCode::InvalidState);
        }
        self.probe.record("prepare");
        self.state = PlayerState::Ready;
        Ok(())
    }

    fn prepare_async(&mut self) -> EngineResult<()> {
        self.prepare()?;
        self.probe.emit(EngineMessage::notify(EventType::Prepare));
        Ok(())
    }

    fn unprepare(&mut self) -> EngineResult<()> {
        self.probe.record("unprepare");
        self.state = PlayerState::Idle;
        Ok(())
    }

    fn start(&mut self) -> EngineResult<()> {
        if !self.state.is_prepared() {
            return Err(ErrorCode::InvalidState);
        }
        self.probe.record("start");
        self.state = PlayerState::Playing;
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.probe.record("stop");
        self.state = PlayerState::Ready;
        Ok(())
    }

    fn pause(&mut self) -> EngineResult<()> {
        if self.state != PlayerState::Playing {
            return Err(ErrorCode::InvalidState);
        }
        self.probe.record("pause");
        self.state = PlayerState::Paused;
        Ok(())
    }

    fn set_attribute(&mut self, name: &str, value: &Value) -> EngineResult<()> {
        match name {
            "volume" => {
                self.volume = value.clone();
                Ok(())
            }
            _ => Err(ErrorCode::InvalidParameter),
        }
    }

    fn get_attribute(&self, name: &str) -> EngineResult<Value> {
        match name {
            "volume" => Ok(self.volume.clone()),
            _ => Err(ErrorCode::InvalidParameter),
        }
    }

    fn state(&self) -> PlayerState {
        self.state
    }

    fn push_media_stream(&mut self, info: &PushMediaInfo, data: &[u8]) -> EngineResult<()> {
        self.probe.pushes.lock().push((info.pts, data.to_vec()));
        Ok(())
    }

    fn capture_video(&mut self) -> EngineResult<()> {
        if !self.state.is_prepared() {
            return Err(ErrorCode::InvalidState);
        }
        self.probe.emit(EngineMessage::Captured {
            width: 4,
            height: 2,
            data: Bytes::from_static(b"RGBARGBARGBARGBARGBARGBARGBARGBA"),
        });
        Ok(())
    }

    fn set_message_callback(&mut self, callback: MessageCallback) {
        *self.probe.callback.lock() = Some(callback);
    }

    fn destroy(&mut self) -> EngineResult<()> {
        self.probe.record("destroy");
        self.probe.callback.lock().take();
        Ok(())
    }
}

/// Builds [`FakeEngine`]s that all report into one probe.
pub struct FakeFactory {
    probe: EngineProbe,
}

impl EngineFactory for FakeFactory {
    fn create(&self) -> EngineResult<Box<dyn MediaEngine>> {
        self.probe.record("create");
        Ok(Box::new(FakeEngine {
            state: PlayerState::Idle,
            volume: Value::Int(50),
            probe: self.probe.clone(),
        }))
    }
}

/// A server running on its own task.
pub struct TestServer {
    pub path: String,
    pub probe: EngineProbe,
    pub stats: ServerStats,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|config| config).await
    }

    pub async fn start_with(configure: impl FnOnce(ServerConfig) -> ServerConfig) -> Self {
        init_tracing();
        let path = generate_socket_path();
        let probe = EngineProbe::default();
        let server = Server::bind(
            configure(ServerConfig::new(&path)),
            FakeFactory {
                probe: probe.clone(),
            },
        )
        .unwrap();
        let stats = server.stats();
        tokio::spawn(server.run());
        Self { path, probe, stats }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.path).call_timeout(Duration::from_secs(5))
    }

    pub async fn connect(&self) -> PlayerClient {
        PlayerClient::connect(self.client_config()).await.unwrap()
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
