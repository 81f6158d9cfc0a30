//! Turns engine notifications into event frames for one connection.

use std::sync::Arc;

use parking_lot::Mutex;

use super::engine::{EngineMessage, MessageCallback};
use crate::buffer::ConnectionBuffers;
use crate::codec::media::PlaneInfo;
use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::protocol::{field, EventType, Message, Value};
use crate::writer::WriterHandle;

struct State {
    enabled: [bool; EventType::COUNT],
    closed: bool,
}

/// Per-connection event emitter.
///
/// Events are forwarded only for kinds the client asked for. Buffers are
/// exported only when the event will actually be sent.
pub struct EventSink {
    writer: WriterHandle,
    buffers: Arc<ConnectionBuffers>,
    state: Mutex<State>,
}

impl EventSink {
    pub fn new(writer: WriterHandle, buffers: Arc<ConnectionBuffers>) -> Self {
        Self {
            writer,
            buffers,
            state: Mutex::new(State {
                enabled: [false; EventType::COUNT],
                closed: false,
            }),
        }
    }

    pub fn set_enabled(&self, kind: EventType, on: bool) {
        self.state.lock().enabled[kind.index()] = on;
    }

    pub fn is_enabled(&self, kind: EventType) -> bool {
        let state = self.state.lock();
        !state.closed && state.enabled[kind.index()]
    }

    /// Drop every later notification.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// A callback suitable for [`MediaEngine::set_message_callback`](super::MediaEngine::set_message_callback).
    pub fn callback(self: &Arc<Self>) -> MessageCallback {
        let sink = Arc::clone(self);
        Box::new(move |msg| sink.emit(msg))
    }

    /// Forward one engine notification.
    pub fn emit(&self, msg: EngineMessage) {
        let kind = msg.event_type();
        {
            let mut state = self.state.lock();
            if state.closed || !state.enabled[kind.index()] {
                tracing::trace!(?kind, "event not forwarded");
                return;
            }
            if kind.is_one_shot() {
                state.enabled[kind.index()] = false;
            }
        }

        if let Err(e) = self.send(kind, msg) {
            tracing::warn!(?kind, "event not delivered: {}", e);
        }
    }

    fn send(&self, kind: EventType, msg: EngineMessage) -> Result<()> {
        match msg {
            EngineMessage::Notify { event, fields } => {
                let mut out = Message::event(event);
                for (name, value) in fields {
                    out.set(&name, value);
                }
                self.writer.send_message_now(&out)
            }
            EngineMessage::VideoFrame { mut info, planes } => {
                let slices: Vec<&[u8]> = planes.iter().map(|p| &p[..]).collect();
                let (token, keys) = self.buffers.export_packet(&slices)?;

                info.planes.resize_with(planes.len(), PlaneInfo::default);
                for ((plane, key), data) in info.planes.iter_mut().zip(&keys).zip(&planes) {
                    plane.key = key.as_raw();
                    plane.size = data.len() as u64;
                }

                let out = MsgPackCodec::encode_value(&info).map(|info| {
                    Message::event(kind)
                        .with(field::PACKET, Value::Pointer(token.as_raw()))
                        .with(field::INFO, info)
                });
                let sent = out.and_then(|out| self.writer.send_message_now(&out));
                if sent.is_err() {
                    self.buffers.finalize(token);
                }
                sent
            }
            EngineMessage::AudioFrame(data) => self.send_buffer(Message::event(kind), &data),
            EngineMessage::Captured {
                width,
                height,
                data,
            } => {
                let out = Message::event(kind)
                    .with(field::WIDTH, width as i32)
                    .with(field::HEIGHT, height as i32);
                self.send_buffer(out, &data)
            }
        }
    }

    fn send_buffer(&self, out: Message, data: &[u8]) -> Result<()> {
        let key = self.buffers.export(data)?;
        let out = out
            .with(field::KEY, Value::Pointer(key.as_raw()))
            .with(field::SIZE, data.len() as i64);
        let sent = self.writer.send_message_now(&out);
        if sent.is_err() {
            self.buffers.release(key);
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferKey, BufferManager, PacketToken};
    use crate::codec::media::VideoFrameInfo;
    use crate::protocol::{Decoded, DEFAULT_MAX_BODY_SIZE};
    use crate::writer::spawn_writer_task_default;
    use bytes::Bytes;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    async fn read_message(rx: &mut DuplexStream) -> Message {
        let mut buf = vec![0u8; 4096];
        let mut len = 0;
        loop {
            let n = rx.read(&mut buf[len..]).await.unwrap();
            assert!(n > 0, "stream closed");
            len += n;
            if let Decoded::Complete { message, .. } =
                crate::protocol::decode(&buf[..len], DEFAULT_MAX_BODY_SIZE).unwrap()
            {
                return message;
            }
        }
    }

    fn sink() -> (Arc<EventSink>, Arc<ConnectionBuffers>, DuplexStream) {
        let (tx, rx) = duplex(64 * 1024);
        let (writer, _task) = spawn_writer_task_default(tx);
        let buffers = Arc::new(ConnectionBuffers::new(BufferManager::acquire()));
        (
            Arc::new(EventSink::new(writer, Arc::clone(&buffers))),
            buffers,
            rx,
        )
    }

    #[tokio::test]
    async fn test_disabled_kind_is_not_exported() {
        let (sink, buffers, _rx) = sink();
        sink.emit(EngineMessage::AudioFrame(Bytes::from_static(b"pcm")));
        assert_eq!(buffers.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_notify_fields_forwarded() {
        let (sink, _buffers, mut rx) = sink();
        sink.set_enabled(EventType::Buffering, true);
        sink.emit(EngineMessage::Notify {
            event: EventType::Buffering,
            fields: vec![(field::PERCENT.to_string(), Value::Int(75))],
        });

        let msg = read_message(&mut rx).await;
        assert_eq!(msg.event_type(), Some(EventType::Buffering));
        assert_eq!(msg.get_i32(field::PERCENT).unwrap(), 75);
    }

    #[tokio::test]
    async fn test_one_shot_disables_after_send() {
        let (sink, _buffers, mut rx) = sink();
        sink.set_enabled(EventType::Prepare, true);
        sink.emit(EngineMessage::notify(EventType::Prepare));
        assert!(!sink.is_enabled(EventType::Prepare));

        let msg = read_message(&mut rx).await;
        assert_eq!(msg.event_type(), Some(EventType::Prepare));
    }

    #[tokio::test]
    async fn test_video_frame_exports_planes() {
        let (sink, buffers, mut rx) = sink();
        sink.set_enabled(EventType::MediaPacketVideoFrame, true);
        sink.emit(EngineMessage::VideoFrame {
            info: VideoFrameInfo {
                width: 8,
                height: 2,
                mimetype: 1,
                planes: Vec::new(),
            },
            planes: vec![Bytes::from(vec![1u8; 16]), Bytes::from(vec![2u8; 8])],
        });
        assert_eq!(buffers.outstanding(), 2);

        let msg = read_message(&mut rx).await;
        let token = PacketToken::from_raw(msg.get_pointer(field::PACKET).unwrap());
        let info: VideoFrameInfo = MsgPackCodec::decode_field(&msg, field::INFO).unwrap();
        assert_eq!(info.planes.len(), 2);
        assert_eq!(info.planes[1].size, 8);
        let view = buffers
            .manager()
            .import(BufferKey::from_raw(info.planes[0].key))
            .unwrap();
        assert_eq!(&view[..], &[1u8; 16][..]);

        assert!(buffers.finalize(token));
        assert_eq!(buffers.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_closed_sink_drops_events() {
        let (sink, buffers, _rx) = sink();
        sink.set_enabled(EventType::Capture, true);
        sink.close();
        sink.emit(EngineMessage::Captured {
            width: 1,
            height: 1,
            data: Bytes::from_static(b"px"),
        });
        assert_eq!(buffers.outstanding(), 0);
    }
}
