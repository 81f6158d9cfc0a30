//! Dispatch table mapping api ids to handlers.
//!
//! The table is built once and never mutated. Each handler validates its
//! arguments, then calls the engine, and returns either a reply or nothing
//! (for fire-and-forget commands). An engine or argument failure becomes the
//! reply's `return_code`; only an unknown api id is an error, and that one
//! is fatal to the connection.
//!
//! # Example
//!
//! ```ignore
//! let table = DispatchTable::new();
//! let reply = table.dispatch(&mut module, &call)?;
//! ```

use std::collections::HashMap;
use std::fmt;

use super::engine::{EngineResult, MediaEngine};
use super::module::Module;
use super::shutdown;
use crate::buffer::{BufferKey, BufferError, PacketToken};
use crate::codec::media::{PushMediaInfo, PushRoute};
use crate::codec::MsgPackCodec;
use crate::error::{PlayerWireError, Result};
use crate::protocol::{api, field, ErrorCode, EventType, Message, PlayerState, Value};

/// What a handler produced.
#[derive(Debug)]
pub(crate) enum Outcome {
    Reply(Message),
    NoReply,
}

type Handler = fn(&mut Module, &Message) -> EngineResult<Outcome>;

struct Entry {
    handler: Handler,
    /// Whether the caller waits for a return.
    replies: bool,
}

/// Immutable api id → handler table.
pub(crate) struct DispatchTable {
    entries: HashMap<u32, Entry>,
}

impl DispatchTable {
    pub fn new() -> Self {
        let mut table = Self {
            entries: HashMap::new(),
        };
        table.insert(api::CREATE, create, true);
        table.insert(api::DESTROY, destroy, true);
        table.insert(api::PREPARE_ASYNC, prepare_async, true);
        table.insert(api::PREPARE, |m, c| simple(m, c, |e| e.prepare()), true);
        table.insert(api::UNPREPARE, |m, c| simple(m, c, |e| e.unprepare()), true);
        table.insert(api::START, |m, c| simple(m, c, |e| e.start()), true);
        table.insert(api::STOP, |m, c| simple(m, c, |e| e.stop()), true);
        table.insert(api::PAUSE, |m, c| simple(m, c, |e| e.pause()), true);
        table.insert(api::SET_ATTRIBUTE, set_attribute, true);
        table.insert(api::GET_ATTRIBUTE, get_attribute, true);
        table.insert(api::GET_STATE, get_state, true);
        table.insert(api::SET_CALLBACK, set_callback, false);
        table.insert(api::PUSH_MEDIA_STREAM, push_media_stream, true);
        table.insert(api::CAPTURE_VIDEO, capture_video, true);
        table.insert(api::MEDIA_PACKET_FINALIZE, media_packet_finalize, false);
        table.insert(api::RETURN_BUFFER, return_buffer, false);
        table.insert(api::RESOURCE_LIMIT, resource_limit, true);
        table
    }

    fn insert(&mut self, api_id: u32, handler: Handler, replies: bool) {
        self.entries.insert(api_id, Entry { handler, replies });
    }

    #[cfg(test)]
    pub fn contains(&self, api_id: u32) -> bool {
        self.entries.contains_key(&api_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Run the handler for `call` and build the reply to send, if any.
    ///
    /// A `CREATE` the server cannot admit is routed to the `RESOURCE_LIMIT`
    /// pseudo-command, so no engine is ever instantiated for it.
    pub fn dispatch(&self, module: &mut Module, call: &Message) -> Result<Option<Message>> {
        let route = if call.api_id == api::CREATE && !module.admit() {
            tracing::warn!("module limit reached; rejecting create");
            api::RESOURCE_LIMIT
        } else {
            call.api_id
        };

        let entry = self.entries.get(&route).ok_or_else(|| {
            tracing::error!(api_id = route, "no handler for api id");
            PlayerWireError::UnknownApi(route)
        })?;

        tracing::debug!(api = api::name(call.api_id), seq = call.seq, "dispatch");
        let outcome = (entry.handler)(module, call);
        if !entry.replies {
            if let Err(code) = outcome {
                tracing::warn!(api = api::name(call.api_id), ?code, "command failed");
            }
            return Ok(None);
        }

        let reply = match outcome {
            Ok(Outcome::Reply(reply)) => reply,
            Ok(Outcome::NoReply) => return Ok(None),
            Err(code) => Message::reply(call.api_id, code),
        };
        Ok(Some(reply.with_seq(call.seq)))
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("DispatchTable").field("api_ids", &ids).finish()
    }
}

fn ok(call: &Message) -> Message {
    Message::reply(call.api_id, ErrorCode::None)
}

fn invalid(err: impl fmt::Display) -> ErrorCode {
    tracing::warn!("invalid argument: {}", err);
    ErrorCode::InvalidParameter
}

fn simple(
    module: &mut Module,
    call: &Message,
    op: impl FnOnce(&mut (dyn MediaEngine + 'static)) -> EngineResult<()>,
) -> EngineResult<Outcome> {
    op(module.engine_mut()?)?;
    Ok(Outcome::Reply(ok(call)))
}

fn create(module: &mut Module, call: &Message) -> EngineResult<Outcome> {
    if module.has_engine() {
        return Err(ErrorCode::InvalidOperation);
    }

    let engine = match module.ctx.factory.create() {
        Ok(engine) => engine,
        Err(code) => {
            module.release_slot();
            return Err(code);
        }
    };
    let handle = engine.handle();
    let token = module.install(engine);
    tracing::info!(handle = format_args!("{:#x}", handle), "engine created");

    Ok(Outcome::Reply(
        ok(call)
            .with(field::HANDLE, Value::Pointer(handle))
            .with(field::DATA_TOKEN, token),
    ))
}

fn destroy(module: &mut Module, call: &Message) -> EngineResult<Outcome> {
    if !module.has_engine() {
        return Err(ErrorCode::InvalidOperation);
    }
    shutdown::destroy_engine(module)?;
    Ok(Outcome::Reply(ok(call)))
}

fn prepare_async(module: &mut Module, call: &Message) -> EngineResult<Outcome> {
    let sink = module.sink.clone();
    let engine = module.engine_mut()?;
    sink.set_enabled(EventType::Prepare, true);
    if let Err(code) = engine.prepare_async() {
        sink.set_enabled(EventType::Prepare, false);
        return Err(code);
    }
    Ok(Outcome::Reply(ok(call)))
}

fn set_attribute(module: &mut Module, call: &Message) -> EngineResult<Outcome> {
    let name = call.get_str(field::NAME).map_err(invalid)?;
    let value = call
        .get(field::VALUE)
        .ok_or_else(|| invalid("missing value"))?;
    module.engine_mut()?.set_attribute(name, value)?;
    Ok(Outcome::Reply(ok(call)))
}

fn get_attribute(module: &mut Module, call: &Message) -> EngineResult<Outcome> {
    let name = call.get_str(field::NAME).map_err(invalid)?;
    let value = module.engine()?.get_attribute(name)?;
    Ok(Outcome::Reply(ok(call).with(field::VALUE, value)))
}

fn get_state(module: &mut Module, call: &Message) -> EngineResult<Outcome> {
    let state = module
        .engine()
        .map(|e| e.state())
        .unwrap_or(PlayerState::None);
    Ok(Outcome::Reply(ok(call).with(field::STATE, state.as_i32())))
}

fn set_callback(module: &mut Module, call: &Message) -> EngineResult<Outcome> {
    let raw = call.get_i32(field::EVENT).map_err(invalid)?;
    let kind = EventType::try_from(raw).map_err(|v| invalid(format!("event type {}", v)))?;
    let set = call.get_i32(field::SET).map_err(invalid)? != 0;
    module.sink.set_enabled(kind, set);
    tracing::debug!(?kind, set, "event forwarding changed");
    Ok(Outcome::NoReply)
}

fn push_media_stream(module: &mut Module, call: &Message) -> EngineResult<Outcome> {
    let route = call.get_i32(field::ROUTE).map_err(invalid)?;
    let route = PushRoute::from_i32(route).ok_or_else(|| invalid(format!("route {}", route)))?;
    let info: PushMediaInfo = MsgPackCodec::decode_field(call, field::INFO).map_err(invalid)?;
    module.engine()?;

    match route {
        PushRoute::Shm => {
            let key = BufferKey::from_raw(call.get_pointer(field::KEY).map_err(invalid)?);
            let view = module
                .buffers
                .manager()
                .import(key)
                .map_err(|e| match e {
                    BufferError::NotFound(_) => invalid(e),
                    _ => {
                        tracing::warn!("cannot map pushed packet: {}", e);
                        ErrorCode::OutOfMemory
                    }
                })?;
            module.engine_mut()?.push_media_stream(&info, &view)?;
        }
        PushRoute::Msg => {
            let data = call.raw().ok_or_else(|| invalid("missing raw payload"))?;
            if data.len() as u64 != info.size {
                return Err(invalid(format!(
                    "payload is {} bytes, descriptor says {}",
                    data.len(),
                    info.size
                )));
            }
            module.engine_mut()?.push_media_stream(&info, data)?;
        }
        PushRoute::Raw => {
            let len = usize::try_from(info.size).map_err(invalid)?;
            let data = module.read_data(len)?;
            module.engine_mut()?.push_media_stream(&info, &data)?;
        }
    }
    Ok(Outcome::Reply(ok(call)))
}

fn capture_video(module: &mut Module, call: &Message) -> EngineResult<Outcome> {
    let sink = module.sink.clone();
    let engine = module.engine_mut()?;
    sink.set_enabled(EventType::Capture, true);
    if let Err(code) = engine.capture_video() {
        sink.set_enabled(EventType::Capture, false);
        return Err(code);
    }
    Ok(Outcome::Reply(ok(call)))
}

fn media_packet_finalize(module: &mut Module, call: &Message) -> EngineResult<Outcome> {
    let token = PacketToken::from_raw(call.get_pointer(field::PACKET).map_err(invalid)?);
    if !module.buffers.finalize(token) {
        tracing::debug!(%token, "finalize for unknown packet ignored");
    }
    Ok(Outcome::NoReply)
}

fn return_buffer(module: &mut Module, call: &Message) -> EngineResult<Outcome> {
    let key = BufferKey::from_raw(call.get_pointer(field::KEY).map_err(invalid)?);
    if !module.buffers.release(key) {
        tracing::debug!(%key, "return of unknown buffer ignored");
    }
    Ok(Outcome::NoReply)
}

fn resource_limit(_module: &mut Module, _call: &Message) -> EngineResult<Outcome> {
    Err(ErrorCode::ResourceLimit)
}
