//! Server side: accepts client connections and drives one engine per
//! connection through the dispatch table.
//!
//! Each accepted socket is served by its own task:
//! 1. Read the first frame
//! 2. `DATA_CHANNEL_ATTACH` → hand the socket to the module that owns the token
//! 3. Anything else → serve it as a control connection
//! 4. On disconnect, run the shutdown sequence and free leftover buffers
//!
//! # Example
//!
//! ```ignore
//! use playerwire::server::{Server, ServerConfig};
//!
//! let server = Server::bind(ServerConfig::new(path), || Ok(Box::new(MyEngine::new()) as _))?;
//! server.run().await?;
//! ```

mod config;
mod dispatch;
mod engine;
mod module;
mod shutdown;
mod sink;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Handle;

use crate::buffer::{BufferManager, ConnectionBuffers};
use crate::error::{PlayerWireError, Result};
use crate::protocol::{api, field, Message, MessageKind};
use crate::transport::{FrameReader, SocketListener, SocketStream};
use crate::writer::spawn_writer_task;

pub use config::{ServerConfig, DEFAULT_DATA_CHANNEL_TIMEOUT};
pub use engine::{EngineFactory, EngineMessage, EngineResult, MediaEngine, MessageCallback};
pub use sink::EventSink;

use dispatch::DispatchTable;
use module::{Module, ServerContext};

/// Listening server.
pub struct Server {
    listener: SocketListener,
    ctx: Arc<ServerContext>,
    table: Arc<DispatchTable>,
}

impl Server {
    /// Bind the listening socket. Must be called inside a tokio runtime.
    pub fn bind(config: ServerConfig, factory: impl EngineFactory) -> Result<Self> {
        let listener = SocketListener::bind(&config.socket_path)?;
        Ok(Self {
            listener,
            ctx: Arc::new(ServerContext::new(config, Box::new(factory))),
            table: Arc::new(DispatchTable::new()),
        })
    }

    pub fn path(&self) -> &str {
        self.listener.path()
    }

    /// Engines currently alive across all connections.
    pub fn active_modules(&self) -> usize {
        self.ctx.active_modules()
    }

    /// A handle for observing the server after `run` takes it.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            ctx: Arc::clone(&self.ctx),
        }
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<()> {
        loop {
            let stream = self.listener.accept().await?;
            tracing::debug!("accepted connection");

            let ctx = Arc::clone(&self.ctx);
            let table = Arc::clone(&self.table);
            tokio::spawn(async move {
                if let Err(e) = serve_socket(stream, ctx, table).await {
                    tracing::error!("connection ended with error: {}", e);
                }
            });
        }
    }
}

/// Read-only view of a running server.
#[derive(Clone)]
pub struct ServerStats {
    ctx: Arc<ServerContext>,
}

impl ServerStats {
    pub fn active_modules(&self) -> usize {
        self.ctx.active_modules()
    }

    /// Data channels announced by `CREATE` but not yet attached.
    pub fn pending_attachments(&self) -> usize {
        self.ctx.attachments.len()
    }
}

async fn serve_socket(
    stream: SocketStream,
    ctx: Arc<ServerContext>,
    table: Arc<DispatchTable>,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::with_max_body(read_half, ctx.config.max_body_size);

    let first = match reader.next_frame().await? {
        Some(frame) => frame.to_message()?,
        None => return Ok(()),
    };

    if first.api_id == api::DATA_CHANNEL_ATTACH {
        let token = first.get_i64(field::TOKEN)?;
        tracing::debug!(token, "data channel connected");
        return ctx.attachments.attach(token, reader.into_raw());
    }

    serve_control(reader, write_half, first, ctx, table).await
}

async fn serve_control(
    mut reader: FrameReader<OwnedReadHalf>,
    write_half: OwnedWriteHalf,
    first: Message,
    ctx: Arc<ServerContext>,
    table: Arc<DispatchTable>,
) -> Result<()> {
    tracing::info!("client connected");

    let (writer, writer_task) = spawn_writer_task(write_half, ctx.config.writer.clone());
    let buffers = Arc::new(ConnectionBuffers::new(BufferManager::acquire()));
    let sink = Arc::new(EventSink::new(writer.clone(), Arc::clone(&buffers)));
    let module = Arc::new(Mutex::new(Module::new(
        Arc::clone(&ctx),
        sink,
        buffers,
        Handle::current(),
    )));

    let mut next = Some(first);
    let result = loop {
        let call = match next.take() {
            Some(msg) => msg,
            None => match reader.next_frame().await {
                Ok(Some(frame)) => match frame.to_message() {
                    Ok(msg) => msg,
                    Err(e) => break Err(e.into()),
                },
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            },
        };

        if call.kind != MessageKind::Call {
            break Err(PlayerWireError::Protocol(format!(
                "client sent a non-call frame for {}",
                api::name(call.api_id)
            )));
        }

        // Handlers block on the engine; run them off the reactor, one at a
        // time, in arrival order.
        let module_ref = Arc::clone(&module);
        let table_ref = Arc::clone(&table);
        let dispatched =
            tokio::task::spawn_blocking(move || table_ref.dispatch(&mut module_ref.lock(), &call))
                .await;

        let reply = match dispatched {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => break Err(e),
            Err(e) => break Err(PlayerWireError::Protocol(format!("handler panicked: {}", e))),
        };
        if let Some(reply) = reply {
            if let Err(e) = writer.send_message(&reply).await {
                break Err(e);
            }
        }
    };

    match &result {
        Ok(()) => tracing::info!("client disconnected"),
        Err(e) => tracing::error!("closing connection: {}", e),
    }

    let module_ref = Arc::clone(&module);
    if let Err(e) =
        tokio::task::spawn_blocking(move || shutdown::close_module(&mut module_ref.lock())).await
    {
        tracing::error!("teardown panicked: {}", e);
    }

    writer.close();
    if let Ok(Err(e)) = writer_task.await {
        tracing::debug!("writer ended with error: {}", e);
    }
    result
}
