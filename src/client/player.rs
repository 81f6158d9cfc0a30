//! Client-side proxy for a remote player engine.
//!
//! One [`PlayerClient`] owns one connection:
//! 1. Connect the control socket
//! 2. Spawn the writer task and the reader task
//! 3. Start the event dispatch thread
//! 4. On `create`, attach the data channel with the returned token
//!
//! The reader task routes returns to the [`Correlator`] and events to the
//! [`EventQueue`]. Losing the socket wakes every blocked caller with
//! `ConnectionLost` and stops event delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::config::ClientConfig;
use super::correlator::Correlator;
use super::event_queue::EventQueue;
use super::events::{self, Event};
use crate::buffer::{BufferManager, ConnectionBuffers};
use crate::codec::media::{MediaPacket, PushRoute};
use crate::codec::MsgPackCodec;
use crate::error::{PlayerWireError, Result};
use crate::protocol::{api, field, EventType, FieldError, Message, MessageKind, PlayerState, Value};
use crate::transport::{FrameReader, SocketStream};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

struct Inner {
    config: ClientConfig,
    writer: WriterHandle,
    data_writer: Mutex<Option<WriterHandle>>,
    correlator: Arc<Correlator>,
    events: Arc<EventQueue>,
    buffers: ConnectionBuffers,
    handle: Mutex<Option<u64>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Keeps raw-route pushes in the same order on both sockets.
    push_lock: tokio::sync::Mutex<()>,
    runtime: Handle,
    closed: AtomicBool,
}

/// Proxy for one remote engine instance.
///
/// Cheap to clone; all clones share the connection. The connection is torn
/// down by [`close`](Self::close), by `destroy`, or when the last clone is
/// dropped.
#[derive(Clone)]
pub struct PlayerClient {
    inner: Arc<Inner>,
}

impl PlayerClient {
    /// Connect to a server and start the reader and event threads.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let stream = SocketStream::connect(&config.socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        let (writer, _writer_task) = spawn_writer_task(write_half, config.writer.clone());
        let correlator = Correlator::new();
        let events = Arc::new(EventQueue::new());
        events.start()?;
        let manager = BufferManager::acquire();

        let reader = tokio::spawn(read_loop(
            FrameReader::with_max_body(read_half, config.max_body_size),
            Arc::clone(&correlator),
            Arc::clone(&events),
            Arc::clone(&manager),
            writer.clone(),
        ));

        tracing::info!(path = %config.socket_path, "connected");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                writer,
                data_writer: Mutex::new(None),
                correlator,
                events,
                buffers: ConnectionBuffers::new(manager),
                handle: Mutex::new(None),
                reader: Mutex::new(Some(reader)),
                push_lock: tokio::sync::Mutex::new(()),
                runtime: Handle::current(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Issue a call and wait for its return with the configured timeout.
    ///
    /// A non-zero `return_code` becomes [`PlayerWireError::Remote`].
    pub async fn call(&self, msg: Message) -> Result<Message> {
        self.call_with_timeout(msg, self.inner.config.call_timeout)
            .await
    }

    /// Issue a call with an explicit deadline.
    pub async fn call_with_timeout(&self, msg: Message, timeout: Duration) -> Result<Message> {
        let pending = self.inner.correlator.register(msg.api_id)?;
        let msg = msg.with_seq(pending.seq());
        tracing::debug!(api = api::name(msg.api_id), seq = msg.seq, "call");

        self.inner.writer.send_message(&msg).await?;
        pending.wait(timeout).await?.into_result()
    }

    /// Synchronous [`call`](Self::call) for threads outside the runtime,
    /// such as event callbacks.
    pub fn call_blocking(&self, msg: Message) -> Result<Message> {
        if Handle::try_current().is_ok() {
            return Err(PlayerWireError::BlockingInRuntime);
        }
        self.inner.runtime.block_on(self.call(msg))
    }

    /// Send a call that has no return.
    pub async fn notify(&self, msg: Message) -> Result<()> {
        tracing::debug!(api = api::name(msg.api_id), "notify");
        self.inner.writer.send_message(&msg).await
    }

    /// Create the remote engine. Returns its handle.
    ///
    /// Attaches the data channel afterwards when the config asks for it.
    pub async fn create(&self) -> Result<u64> {
        let reply = self.call(Message::call(api::CREATE)).await?;
        let handle = reply.get_pointer(field::HANDLE)?;
        *self.inner.handle.lock() = Some(handle);

        if self.inner.config.open_data_channel {
            let token = reply.get_i64(field::DATA_TOKEN)?;
            self.attach_data_channel(token).await?;
        }

        tracing::info!(handle = format_args!("{:#x}", handle), "engine created");
        Ok(handle)
    }

    async fn attach_data_channel(&self, token: i64) -> Result<()> {
        let stream = SocketStream::connect(&self.inner.config.socket_path).await?;
        let (_read_half, write_half) = stream.into_split();
        let (data_writer, _task) = spawn_writer_task(write_half, self.inner.config.writer.clone());

        data_writer
            .send_message(&Message::call(api::DATA_CHANNEL_ATTACH).with(field::TOKEN, token))
            .await?;
        *self.inner.data_writer.lock() = Some(data_writer);
        tracing::debug!(token, "data channel attached");
        Ok(())
    }

    /// Destroy the remote engine and close the connection.
    pub async fn destroy(&self) -> Result<()> {
        let result = self.call(Message::call(api::DESTROY)).await;
        self.inner.handle.lock().take();
        self.close();
        result.map(|_| ())
    }

    pub async fn prepare(&self) -> Result<()> {
        self.simple(api::PREPARE).await
    }

    /// Start an asynchronous prepare. `on_prepared` runs once on the event
    /// thread when the engine reports completion.
    pub async fn prepare_async<F>(&self, on_prepared: F) -> Result<()>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.inner.events.register(EventType::Prepare, on_prepared);
        let result = self.simple(api::PREPARE_ASYNC).await;
        if result.is_err() {
            self.inner.events.unregister(EventType::Prepare);
        }
        result
    }

    pub async fn unprepare(&self) -> Result<()> {
        self.simple(api::UNPREPARE).await
    }

    pub async fn start(&self) -> Result<()> {
        self.simple(api::START).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.simple(api::STOP).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.simple(api::PAUSE).await
    }

    async fn simple(&self, api_id: u32) -> Result<()> {
        self.call(Message::call(api_id)).await.map(|_| ())
    }

    pub async fn set_attribute(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let msg = Message::call(api::SET_ATTRIBUTE)
            .with(field::NAME, name)
            .with(field::VALUE, value);
        self.call(msg).await.map(|_| ())
    }

    pub async fn get_attribute(&self, name: &str) -> Result<Value> {
        let reply = self
            .call(Message::call(api::GET_ATTRIBUTE).with(field::NAME, name))
            .await?;
        reply
            .get(field::VALUE)
            .cloned()
            .ok_or_else(|| FieldError::Missing(field::VALUE.to_string()).into())
    }

    pub async fn get_state(&self) -> Result<PlayerState> {
        let reply = self.call(Message::call(api::GET_STATE)).await?;
        let raw = reply.get_i32(field::STATE)?;
        PlayerState::from_i32(raw)
            .ok_or_else(|| PlayerWireError::Protocol(format!("unknown player state {}", raw)))
    }

    /// Install a callback for `kind` and ask the server to forward it.
    pub async fn set_callback<F>(&self, kind: EventType, callback: F) -> Result<()>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.inner.events.register(kind, callback);
        self.notify(set_callback_message(kind, true)).await
    }

    /// Remove the callback for `kind` and stop forwarding on the server.
    pub async fn unset_callback(&self, kind: EventType) -> Result<()> {
        self.inner.events.unregister(kind);
        self.notify(set_callback_message(kind, false)).await
    }

    /// Request one captured video frame, delivered to `on_captured` with
    /// the image bytes in [`Event::data`].
    pub async fn capture_video<F>(&self, on_captured: F) -> Result<()>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.inner.events.register(EventType::Capture, on_captured);
        let result = self.simple(api::CAPTURE_VIDEO).await;
        if result.is_err() {
            self.inner.events.unregister(EventType::Capture);
        }
        result
    }

    /// Feed one compressed packet to the engine over `route`.
    ///
    /// `info.size` must equal the data length: the server reads exactly that
    /// many bytes, and on the raw route a mismatch would misalign the data
    /// channel.
    pub async fn push_media_stream(&self, packet: MediaPacket, route: PushRoute) -> Result<()> {
        if packet.info.size != packet.data.len() as u64 {
            return Err(PlayerWireError::InvalidArgument(format!(
                "packet size {} does not match its {} data bytes",
                packet.info.size,
                packet.data.len()
            )));
        }
        let msg = Message::call(api::PUSH_MEDIA_STREAM)
            .with(field::ROUTE, route.as_i32())
            .with(field::INFO, MsgPackCodec::encode_value(&packet.info)?);

        match route {
            PushRoute::Shm => {
                let key = self.inner.buffers.export(&packet.data)?;
                let result = self
                    .call(msg.with(field::KEY, Value::Pointer(key.as_raw())))
                    .await;
                self.inner.buffers.release(key);
                result.map(|_| ())
            }
            PushRoute::Msg => self.call(msg.with_raw(packet.data)).await.map(|_| ()),
            PushRoute::Raw => {
                let data_writer = self
                    .inner
                    .data_writer
                    .lock()
                    .clone()
                    .ok_or(PlayerWireError::NoDataChannel)?;

                let _order = self.inner.push_lock.lock().await;
                data_writer.send(OutboundFrame::raw(packet.data)).await?;
                self.call(msg).await.map(|_| ())
            }
        }
    }

    /// Engine handle returned by `create`, if any.
    pub fn handle(&self) -> Option<u64> {
        *self.inner.handle.lock()
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire) && self.inner.correlator.is_running()
    }

    pub fn has_data_channel(&self) -> bool {
        self.inner.data_writer.lock().is_some()
    }

    /// Buffers exported by this client and not yet released.
    pub fn outstanding_buffers(&self) -> usize {
        self.inner.buffers.outstanding()
    }

    /// Tear the connection down: wake pending callers, flush and close the
    /// sockets, join the event thread, stop the reader, free buffers.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Inner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let woken = self.correlator.close();
        self.writer.close();
        if let Some(data_writer) = self.data_writer.lock().take() {
            data_writer.close();
        }
        self.events.shutdown();
        let events = Arc::clone(&self.events);
        match Handle::try_current() {
            // Joining waits out a running callback; keep it off the workers.
            Ok(runtime) => {
                runtime.spawn_blocking(move || events.stop());
            }
            Err(_) => events.stop(),
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        let freed = self.buffers.force_free_all();
        tracing::info!(woken, freed, "client closed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

fn set_callback_message(kind: EventType, set: bool) -> Message {
    Message::call(api::SET_CALLBACK)
        .with(field::EVENT, kind.as_i32())
        .with(field::SET, i32::from(set))
}

async fn read_loop<R>(
    mut reader: FrameReader<R>,
    correlator: Arc<Correlator>,
    events: Arc<EventQueue>,
    manager: Arc<BufferManager>,
    writer: WriterHandle,
) where
    R: AsyncRead + Unpin,
{
    let failure = loop {
        let frame = match reader.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break None,
            Err(e) => break Some(e),
        };
        let msg = match frame.to_message() {
            Ok(msg) => msg,
            Err(e) => break Some(e.into()),
        };

        match msg.kind {
            MessageKind::Return => {
                tracing::debug!(api = api::name(msg.api_id), seq = msg.seq, "return");
                correlator.complete(msg);
            }
            MessageKind::Event => route_event(msg, &events, &manager, &writer),
            MessageKind::Call => {
                break Some(PlayerWireError::Protocol(format!(
                    "server sent a call to {}",
                    api::name(msg.api_id)
                )))
            }
        }
    };

    match failure {
        None => tracing::info!("server closed the connection"),
        Some(e) => tracing::error!("connection failed: {}", e),
    }
    let woken = correlator.close();
    events.shutdown();
    tracing::debug!(woken, "reader stopped");
}

fn route_event(msg: Message, events: &EventQueue, manager: &BufferManager, writer: &WriterHandle) {
    let Some(kind) = msg.event_type() else {
        tracing::warn!("event with unknown type dropped");
        return;
    };

    if !events.is_registered(kind) {
        tracing::debug!(?kind, "no callback registered; event dropped");
        events::release_unwanted(&msg, kind, writer);
        return;
    }

    let event = events::resolve(kind, msg, manager, writer);
    if let Err(event) = events.enqueue(event) {
        // Dropping releases any mapped frame.
        tracing::debug!(kind = ?event.kind(), "event queue closed; event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use crate::transport::{generate_socket_path, SocketListener};
    use crate::writer::spawn_writer_task_default;
    use std::sync::mpsc;

    /// Accept one connection and answer every call with `reply(call)`.
    fn scripted_server<F>(listener: SocketListener, reply: F) -> JoinHandle<()>
    where
        F: Fn(&Message) -> Vec<Message> + Send + 'static,
    {
        tokio::spawn(async move {
            let stream = listener.accept().await.unwrap();
            let (r, w) = stream.into_split();
            let mut reader = FrameReader::new(r);
            let (writer, _task) = spawn_writer_task_default(w);
            while let Ok(Some(frame)) = reader.next_frame().await {
                let call = frame.to_message().unwrap();
                for out in reply(&call) {
                    writer.send_message(&out).await.unwrap();
                }
            }
        })
    }

    async fn client_for(listener: &SocketListener) -> PlayerClient {
        let config = ClientConfig::new(listener.path())
            .open_data_channel(false)
            .call_timeout(Duration::from_millis(500));
        PlayerClient::connect(config).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_create_reads_handle() {
        let listener = SocketListener::bind(&generate_socket_path()).unwrap();
        let client = client_for(&listener).await;
        let _server = scripted_server(listener, |call| {
            vec![Message::reply(call.api_id, ErrorCode::None)
                .with(field::HANDLE, Value::Pointer(0xABCD))
                .with(field::DATA_TOKEN, 1i64)
                .with_seq(call.seq)]
        });

        assert_eq!(client.create().await.unwrap(), 0xABCD);
        assert_eq!(client.handle(), Some(0xABCD));
        client.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remote_error_code() {
        let listener = SocketListener::bind(&generate_socket_path()).unwrap();
        let client = client_for(&listener).await;
        let _server = scripted_server(listener, |call| {
            vec![Message::reply(call.api_id, ErrorCode::InvalidState).with_seq(call.seq)]
        });

        let err = client.start().await.unwrap_err();
        assert!(matches!(err, PlayerWireError::Remote(ErrorCode::InvalidState)));
        assert!(client.is_connected());
        client.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_does_not_block_other_api() {
        let listener = SocketListener::bind(&generate_socket_path()).unwrap();
        let client = client_for(&listener).await;
        let _server = scripted_server(listener, |call| {
            if call.api_id == api::PREPARE {
                Vec::new()
            } else {
                vec![Message::reply(call.api_id, ErrorCode::None)
                    .with(field::STATE, PlayerState::Idle.as_i32())
                    .with_seq(call.seq)]
            }
        });

        let err = client.prepare().await.unwrap_err();
        assert!(matches!(err, PlayerWireError::TimedOut));
        assert_eq!(client.get_state().await.unwrap(), PlayerState::Idle);
        client.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_server_close_fails_pending_and_future_calls() {
        let listener = SocketListener::bind(&generate_socket_path()).unwrap();
        let client = client_for(&listener).await;
        let server = tokio::spawn(async move {
            let stream = listener.accept().await.unwrap();
            let (r, _w) = stream.into_split();
            let mut reader = FrameReader::new(r);
            reader.next_frame().await.unwrap();
        });

        let err = client.pause().await.unwrap_err();
        assert!(matches!(err, PlayerWireError::ConnectionLost));
        server.await.unwrap();

        let err = client.stop().await.unwrap_err();
        assert!(matches!(err, PlayerWireError::ConnectionLost));
        assert!(!client.is_connected());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_event_reaches_callback() {
        let listener = SocketListener::bind(&generate_socket_path()).unwrap();
        let client = client_for(&listener).await;
        let _server = scripted_server(listener, |call| {
            if call.api_id == api::SET_CALLBACK {
                vec![Message::event(EventType::Buffering).with(field::PERCENT, 40)]
            } else {
                Vec::new()
            }
        });

        let (tx, rx) = mpsc::channel();
        client
            .set_callback(EventType::Buffering, move |e: Event| {
                tx.send(e.message().get_i32(field::PERCENT).unwrap()).unwrap();
            })
            .await
            .unwrap();

        let percent = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(percent, 40);
        client.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_does_not_wait_for_running_callback() {
        let listener = SocketListener::bind(&generate_socket_path()).unwrap();
        let client = client_for(&listener).await;
        let _server = scripted_server(listener, |call| {
            if call.api_id == api::SET_CALLBACK {
                vec![Message::event(EventType::Buffering).with(field::PERCENT, 10)]
            } else {
                Vec::new()
            }
        });

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        client
            .set_callback(EventType::Buffering, move |_e: Event| {
                entered_tx.send(()).unwrap();
                let _ = release_rx.lock().unwrap().recv();
            })
            .await
            .unwrap();
        tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();

        let started = std::time::Instant::now();
        client.close();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!client.is_connected());

        release_tx.send(()).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_raw_push_without_data_channel() {
        let listener = SocketListener::bind(&generate_socket_path()).unwrap();
        let client = client_for(&listener).await;

        let packet = MediaPacket::new(Default::default(), vec![0u8; 16]);
        let err = client
            .push_media_stream(packet, PushRoute::Raw)
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerWireError::NoDataChannel));
        client.close();
    }

    #[tokio::test]
    async fn test_call_blocking_inside_runtime_is_rejected() {
        let listener = SocketListener::bind(&generate_socket_path()).unwrap();
        let client = client_for(&listener).await;

        let err = client
            .call_blocking(Message::call(api::GET_STATE))
            .unwrap_err();
        assert!(matches!(err, PlayerWireError::BlockingInRuntime));
        client.close();
    }
}
