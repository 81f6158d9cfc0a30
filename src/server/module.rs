//! Per-connection server state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::unix::OwnedReadHalf;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

use super::config::ServerConfig;
use super::engine::{EngineFactory, EngineResult, MediaEngine};
use super::sink::EventSink;
use crate::buffer::ConnectionBuffers;
use crate::error::{PlayerWireError, Result};
use crate::protocol::ErrorCode;
use crate::transport::RawReader;

/// Unframed reader of an attached data channel.
pub(crate) type DataReader = RawReader<OwnedReadHalf>;

/// Data-channel sockets waiting to be claimed by their module.
pub(crate) struct Attachments {
    pending: Mutex<HashMap<i64, oneshot::Sender<DataReader>>>,
    next_token: AtomicI64,
}

impl Attachments {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_token: AtomicI64::new(1),
        }
    }

    /// Reserve a token for a module's data channel.
    pub fn expect(&self) -> (i64, oneshot::Receiver<DataReader>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(token, tx);
        (token, rx)
    }

    /// Hand an incoming data socket to the module that owns `token`.
    pub fn attach(&self, token: i64, reader: DataReader) -> Result<()> {
        let tx = self
            .pending
            .lock()
            .remove(&token)
            .ok_or_else(|| PlayerWireError::Protocol(format!("unknown data channel token {}", token)))?;
        if tx.send(reader).is_err() {
            tracing::debug!(token, "module gone before its data channel attached");
        }
        Ok(())
    }

    pub fn forget(&self, token: i64) {
        self.pending.lock().remove(&token);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// State shared by every connection of one server.
pub(crate) struct ServerContext {
    pub config: ServerConfig,
    pub factory: Box<dyn EngineFactory>,
    pub attachments: Attachments,
    pub admission: Arc<Semaphore>,
}

impl ServerContext {
    pub fn new(config: ServerConfig, factory: Box<dyn EngineFactory>) -> Self {
        let permits = config.max_modules.unwrap_or(Semaphore::MAX_PERMITS);
        Self {
            config,
            factory,
            attachments: Attachments::new(),
            admission: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Number of modules currently holding an engine slot.
    pub fn active_modules(&self) -> usize {
        let capacity = self.config.max_modules.unwrap_or(Semaphore::MAX_PERMITS);
        capacity - self.admission.available_permits()
    }
}

enum DataChannel {
    None,
    Waiting(i64, oneshot::Receiver<DataReader>),
    Ready(DataReader),
}

/// One client connection: at most one engine plus its resources.
pub(crate) struct Module {
    pub(super) ctx: Arc<ServerContext>,
    pub(super) engine: Option<Box<dyn MediaEngine>>,
    permit: Option<OwnedSemaphorePermit>,
    pub(super) sink: Arc<EventSink>,
    pub(super) buffers: Arc<ConnectionBuffers>,
    data: DataChannel,
    runtime: Handle,
}

impl Module {
    pub fn new(
        ctx: Arc<ServerContext>,
        sink: Arc<EventSink>,
        buffers: Arc<ConnectionBuffers>,
        runtime: Handle,
    ) -> Self {
        Self {
            ctx,
            engine: None,
            permit: None,
            sink,
            buffers,
            data: DataChannel::None,
            runtime,
        }
    }

    /// Claim an engine slot for a pending `CREATE`. `false` means the server
    /// is at its module limit.
    pub fn admit(&mut self) -> bool {
        if self.permit.is_some() || self.engine.is_some() {
            return true;
        }
        match Arc::clone(&self.ctx.admission).try_acquire_owned() {
            Ok(permit) => {
                self.permit = Some(permit);
                true
            }
            Err(_) => false,
        }
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn engine(&self) -> EngineResult<&dyn MediaEngine> {
        self.engine.as_deref().ok_or(ErrorCode::InvalidOperation)
    }

    pub fn engine_mut(&mut self) -> EngineResult<&mut (dyn MediaEngine + 'static)> {
        self.engine.as_deref_mut().ok_or(ErrorCode::InvalidOperation)
    }

    /// Install a freshly created engine and reserve its data-channel token.
    pub fn install(&mut self, mut engine: Box<dyn MediaEngine>) -> i64 {
        engine.set_message_callback(self.sink.callback());
        self.engine = Some(engine);

        let (token, rx) = self.ctx.attachments.expect();
        self.data = DataChannel::Waiting(token, rx);
        token
    }

    /// Give up the engine slot and the data channel. The engine itself must
    /// already be taken.
    pub fn release_slot(&mut self) {
        self.permit = None;
        if let DataChannel::Waiting(token, _) = &self.data {
            self.ctx.attachments.forget(*token);
        }
        self.data = DataChannel::None;
    }

    /// Read `len` bytes from the data channel, waiting for it to attach.
    pub fn read_data(&mut self, len: usize) -> EngineResult<Bytes> {
        if let DataChannel::Waiting(..) = self.data {
            let DataChannel::Waiting(token, rx) = std::mem::replace(&mut self.data, DataChannel::None)
            else {
                return Err(ErrorCode::InvalidOperation);
            };
            let timeout = self.ctx.config.data_channel_timeout;
            match self.runtime.block_on(tokio::time::timeout(timeout, rx)) {
                Ok(Ok(reader)) => self.data = DataChannel::Ready(reader),
                _ => {
                    tracing::warn!(token, ?timeout, "data channel never attached");
                    self.ctx.attachments.forget(token);
                    return Err(ErrorCode::InvalidOperation);
                }
            }
        }

        let DataChannel::Ready(reader) = &mut self.data else {
            return Err(ErrorCode::InvalidOperation);
        };
        // A short or failed read leaves the stream misaligned; it is never
        // used again.
        let timeout = self.ctx.config.data_channel_timeout;
        match self
            .runtime
            .block_on(tokio::time::timeout(timeout, reader.read_exact(len)))
        {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => {
                tracing::error!(len, "data channel read failed: {}", e);
                self.data = DataChannel::None;
                Err(ErrorCode::InvalidOperation)
            }
            Err(_) => {
                tracing::error!(len, ?timeout, "data channel read timed out, dropping it");
                self.data = DataChannel::None;
                Err(ErrorCode::InvalidOperation)
            }
        }
    }
}
