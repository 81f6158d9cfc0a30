//! API identifiers, event types, and engine error codes.

/// API id constants.
///
/// Calls and their returns share the same id. Events all travel under
/// [`api::EVENT`] and carry their type in the leading `event` field.
pub mod api {
    pub const CREATE: u32 = 1;
    pub const DESTROY: u32 = 2;
    pub const PREPARE_ASYNC: u32 = 3;
    pub const PREPARE: u32 = 4;
    pub const UNPREPARE: u32 = 5;
    pub const START: u32 = 6;
    pub const STOP: u32 = 7;
    pub const PAUSE: u32 = 8;
    pub const SET_ATTRIBUTE: u32 = 9;
    pub const GET_ATTRIBUTE: u32 = 10;
    pub const GET_STATE: u32 = 11;
    pub const SET_CALLBACK: u32 = 12;
    pub const PUSH_MEDIA_STREAM: u32 = 13;
    pub const CAPTURE_VIDEO: u32 = 14;
    pub const MEDIA_PACKET_FINALIZE: u32 = 15;
    pub const RETURN_BUFFER: u32 = 16;

    /// Carrier id for every server-pushed event.
    pub const EVENT: u32 = 1000;
    /// First frame on a data-channel socket.
    pub const DATA_CHANNEL_ATTACH: u32 = 1001;
    /// Server-side pseudo-command rejecting a create request.
    pub const RESOURCE_LIMIT: u32 = 1002;

    /// Human-readable name for logging.
    pub fn name(api_id: u32) -> &'static str {
        match api_id {
            CREATE => "create",
            DESTROY => "destroy",
            PREPARE_ASYNC => "prepare_async",
            PREPARE => "prepare",
            UNPREPARE => "unprepare",
            START => "start",
            STOP => "stop",
            PAUSE => "pause",
            SET_ATTRIBUTE => "set_attribute",
            GET_ATTRIBUTE => "get_attribute",
            GET_STATE => "get_state",
            SET_CALLBACK => "set_callback",
            PUSH_MEDIA_STREAM => "push_media_stream",
            CAPTURE_VIDEO => "capture_video",
            MEDIA_PACKET_FINALIZE => "media_packet_finalize",
            RETURN_BUFFER => "return_buffer",
            EVENT => "event",
            DATA_CHANNEL_ATTACH => "data_channel_attach",
            RESOURCE_LIMIT => "resource_limit",
            _ => "unknown",
        }
    }
}

/// Well-known field names.
pub mod field {
    pub const RETURN_CODE: &str = "return_code";
    pub const EVENT: &str = "event";
    pub const HANDLE: &str = "handle";
    pub const DATA_TOKEN: &str = "data_token";
    pub const TOKEN: &str = "token";
    pub const NAME: &str = "name";
    pub const VALUE: &str = "value";
    pub const STATE: &str = "state";
    pub const SET: &str = "set";
    pub const KEY: &str = "key";
    pub const PACKET: &str = "packet";
    pub const INFO: &str = "info";
    pub const ROUTE: &str = "route";
    pub const SIZE: &str = "size";
    pub const CODE: &str = "code";
    pub const PERCENT: &str = "percent";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
}

/// Event types pushed from the engine to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum EventType {
    Prepare = 0,
    Complete,
    Interrupt,
    Error,
    Buffering,
    Subtitle,
    Capture,
    Seek,
    MediaPacketVideoFrame,
    AudioFrame,
    VideoFrameRenderError,
    Pd,
    SupportedAudioEffect,
    SupportedAudioEffectPreset,
    MissedPlugin,
    MediaStreamVideoBufferStatus,
    MediaStreamAudioBufferStatus,
    MediaStreamVideoSeek,
    MediaStreamAudioSeek,
    AudioStreamChanged,
    VideoStreamChanged,
}

impl EventType {
    /// Number of event types (size of a callback slot table).
    pub const COUNT: usize = 21;

    /// All event types in wire order.
    pub const ALL: [EventType; Self::COUNT] = [
        EventType::Prepare,
        EventType::Complete,
        EventType::Interrupt,
        EventType::Error,
        EventType::Buffering,
        EventType::Subtitle,
        EventType::Capture,
        EventType::Seek,
        EventType::MediaPacketVideoFrame,
        EventType::AudioFrame,
        EventType::VideoFrameRenderError,
        EventType::Pd,
        EventType::SupportedAudioEffect,
        EventType::SupportedAudioEffectPreset,
        EventType::MissedPlugin,
        EventType::MediaStreamVideoBufferStatus,
        EventType::MediaStreamAudioBufferStatus,
        EventType::MediaStreamVideoSeek,
        EventType::MediaStreamAudioSeek,
        EventType::AudioStreamChanged,
        EventType::VideoStreamChanged,
    ];

    /// Slot index of this event type.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Wire value.
    #[inline]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// One-shot events clear their callback slot on first delivery.
    #[inline]
    pub fn is_one_shot(self) -> bool {
        matches!(self, EventType::Prepare | EventType::Seek | EventType::Capture)
    }
}

impl TryFrom<i32> for EventType {
    type Error = i32;

    fn try_from(value: i32) -> std::result::Result<Self, i32> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(value)
    }
}

/// Stable error-code taxonomy carried in `return_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    None = 0,
    InvalidParameter = 1,
    InvalidOperation = 2,
    InvalidState = 3,
    OutOfMemory = 4,
    NotSupported = 5,
    ResourceLimit = 6,
    EngineFailure = 7,
    Unknown = 8,
}

impl ErrorCode {
    /// Wire value.
    #[inline]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parse a wire value; unrecognised values map to `Unknown`.
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => ErrorCode::None,
            1 => ErrorCode::InvalidParameter,
            2 => ErrorCode::InvalidOperation,
            3 => ErrorCode::InvalidState,
            4 => ErrorCode::OutOfMemory,
            5 => ErrorCode::NotSupported,
            6 => ErrorCode::ResourceLimit,
            7 => ErrorCode::EngineFailure,
            _ => ErrorCode::Unknown,
        }
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == ErrorCode::None
    }
}

/// Playback state as reported by `GET_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PlayerState {
    /// No engine handle.
    None = 0,
    Idle = 1,
    Ready = 2,
    Playing = 3,
    Paused = 4,
}

impl PlayerState {
    #[inline]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(PlayerState::None),
            1 => Some(PlayerState::Idle),
            2 => Some(PlayerState::Ready),
            3 => Some(PlayerState::Playing),
            4 => Some(PlayerState::Paused),
            _ => None,
        }
    }

    /// Playing or paused.
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, PlayerState::Playing | PlayerState::Paused)
    }

    /// Prepared or further along.
    #[inline]
    pub fn is_prepared(self) -> bool {
        matches!(
            self,
            PlayerState::Ready | PlayerState::Playing | PlayerState::Paused
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_indices_match_wire_values() {
        for (i, ev) in EventType::ALL.iter().enumerate() {
            assert_eq!(ev.index(), i);
            assert_eq!(EventType::try_from(i as i32), Ok(*ev));
        }
        assert_eq!(EventType::try_from(-1), Err(-1));
        assert_eq!(EventType::try_from(EventType::COUNT as i32), Err(21));
    }

    #[test]
    fn test_one_shot_events() {
        let one_shot: Vec<_> = EventType::ALL
            .iter()
            .filter(|e| e.is_one_shot())
            .copied()
            .collect();
        assert_eq!(
            one_shot,
            vec![EventType::Prepare, EventType::Capture, EventType::Seek]
        );
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(ErrorCode::from_i32(0), ErrorCode::None);
        assert_eq!(ErrorCode::from_i32(6), ErrorCode::ResourceLimit);
        assert_eq!(ErrorCode::from_i32(-42), ErrorCode::Unknown);
        assert!(ErrorCode::None.is_ok());
        assert!(!ErrorCode::InvalidState.is_ok());
        assert_eq!(ErrorCode::EngineFailure.as_i32(), 7);
    }

    #[test]
    fn test_player_state_predicates() {
        assert!(PlayerState::Paused.is_active());
        assert!(!PlayerState::Ready.is_active());
        assert!(PlayerState::Ready.is_prepared());
        assert!(!PlayerState::Idle.is_prepared());
        assert_eq!(PlayerState::from_i32(3), Some(PlayerState::Playing));
        assert_eq!(PlayerState::from_i32(9), None);
    }

    #[test]
    fn test_api_names() {
        assert_eq!(api::name(api::CREATE), "create");
        assert_eq!(api::name(api::EVENT), "event");
        assert_eq!(api::name(9999), "unknown");
    }
}
