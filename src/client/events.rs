//! Event entries and buffer-carrying event resolution.

use std::fmt;

use bytes::Bytes;

use crate::buffer::{BufferKey, BufferManager, ImportedBuffer};
use crate::codec::media::VideoFrameInfo;
use crate::codec::MsgPackCodec;
use crate::protocol::{api, field, EventType, Message, Value};
use crate::writer::WriterHandle;

/// One entry of the event dispatch queue.
pub struct Event {
    kind: EventType,
    message: Message,
    frame: Option<DecodedFrame>,
    data: Option<Bytes>,
}

impl Event {
    pub fn new(kind: EventType, message: Message) -> Self {
        Self {
            kind,
            message,
            frame: None,
            data: None,
        }
    }

    #[inline]
    pub fn kind(&self) -> EventType {
        self.kind
    }

    /// The decoded event body.
    #[inline]
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Decoded video frame for `MediaPacketVideoFrame` events.
    pub fn frame(&self) -> Option<&DecodedFrame> {
        self.frame.as_ref()
    }

    /// Take ownership of the frame. The finalize message is sent when the
    /// returned value is dropped.
    pub fn take_frame(&mut self) -> Option<DecodedFrame> {
        self.frame.take()
    }

    /// Copied buffer contents for capture and audio-frame events.
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("fields", &self.message.field_count())
            .field("frame", &self.frame.is_some())
            .field("data", &self.data.as_ref().map(Bytes::len))
            .finish()
    }
}

/// A decoded video frame whose planes live in the server's shared memory.
///
/// Dropping it sends `MEDIA_PACKET_FINALIZE` so the server can free the
/// planes. The send is fire-and-forget; if the connection is already gone
/// the server has force-freed them anyway.
pub struct DecodedFrame {
    info: VideoFrameInfo,
    planes: Vec<ImportedBuffer>,
    packet: u64,
    writer: WriterHandle,
}

impl DecodedFrame {
    #[inline]
    pub fn info(&self) -> &VideoFrameInfo {
        &self.info
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.info.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.info.height
    }

    /// Mapped bytes of each plane, in order.
    pub fn planes(&self) -> &[ImportedBuffer] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        self.planes.get(index).map(ImportedBuffer::as_slice)
    }
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("width", &self.info.width)
            .field("height", &self.info.height)
            .field("planes", &self.planes.len())
            .field("packet", &self.packet)
            .finish()
    }
}

impl Drop for DecodedFrame {
    fn drop(&mut self) {
        send_finalize(&self.writer, self.packet);
    }
}

fn send_finalize(writer: &WriterHandle, packet: u64) {
    let msg = Message::call(api::MEDIA_PACKET_FINALIZE).with(field::PACKET, Value::Pointer(packet));
    if let Err(e) = writer.send_message_now(&msg) {
        tracing::debug!(packet, "finalize not sent: {}", e);
    }
}

fn send_return_buffer(writer: &WriterHandle, key: u64) {
    let msg = Message::call(api::RETURN_BUFFER).with(field::KEY, Value::Pointer(key));
    if let Err(e) = writer.send_message_now(&msg) {
        tracing::debug!(key, "return-buffer not sent: {}", e);
    }
}

/// Hand back every buffer an event references without looking at them.
///
/// Used when no callback is registered for the event.
pub(crate) fn release_unwanted(message: &Message, kind: EventType, writer: &WriterHandle) {
    match kind {
        EventType::MediaPacketVideoFrame => {
            if let Ok(packet) = message.get_pointer(field::PACKET) {
                send_finalize(writer, packet);
            }
        }
        EventType::AudioFrame | EventType::Capture => {
            if let Ok(key) = message.get_pointer(field::KEY) {
                send_return_buffer(writer, key);
            }
        }
        _ => {}
    }
}

/// Turn an incoming event message into a queue entry.
///
/// Video frames are mapped plane by plane and wrapped in a [`DecodedFrame`].
/// Capture and audio buffers are copied out and returned at once. A buffer
/// that cannot be mapped is released and the event is delivered without it.
pub(crate) fn resolve(
    kind: EventType,
    message: Message,
    manager: &BufferManager,
    writer: &WriterHandle,
) -> Event {
    let mut event = Event::new(kind, message);
    match kind {
        EventType::MediaPacketVideoFrame => {
            event.frame = resolve_frame(&event.message, manager, writer);
        }
        EventType::AudioFrame | EventType::Capture => {
            event.data = resolve_copy(&event.message, manager, writer);
        }
        _ => {}
    }
    event
}

fn resolve_frame(
    message: &Message,
    manager: &BufferManager,
    writer: &WriterHandle,
) -> Option<DecodedFrame> {
    let packet = match message.get_pointer(field::PACKET) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("video frame event without packet: {}", e);
            return None;
        }
    };

    let info: VideoFrameInfo = match MsgPackCodec::decode_field(message, field::INFO) {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(packet, "bad video frame descriptor: {}", e);
            send_finalize(writer, packet);
            return None;
        }
    };

    let mut planes = Vec::with_capacity(info.planes.len());
    for plane in &info.planes {
        match manager.import(BufferKey::from_raw(plane.key)) {
            Ok(view) => planes.push(view),
            Err(e) => {
                tracing::warn!(packet, key = plane.key, "cannot map plane: {}", e);
                send_finalize(writer, packet);
                return None;
            }
        }
    }

    Some(DecodedFrame {
        info,
        planes,
        packet,
        writer: writer.clone(),
    })
}

fn resolve_copy(message: &Message, manager: &BufferManager, writer: &WriterHandle) -> Option<Bytes> {
    let key = match message.get_pointer(field::KEY) {
        Ok(k) => k,
        Err(e) => {
            tracing::warn!("buffer event without key: {}", e);
            return None;
        }
    };

    let data = match manager.import(BufferKey::from_raw(key)) {
        Ok(view) => Some(Bytes::copy_from_slice(&view)),
        Err(e) => {
            tracing::warn!(key, "cannot map buffer: {}", e);
            None
        }
    };
    send_return_buffer(writer, key);
    data
}
