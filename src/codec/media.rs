//! Descriptor structs for media payloads.
//!
//! These travel MsgPack-encoded inside an `info` array field. The bulk
//! bytes they describe travel separately: in shared memory, in the raw
//! payload of the same frame, or on the data channel.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// How the bytes of a pushed packet reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PushRoute {
    /// Exported into shared memory; the call carries the buffer key.
    Shm = 0,
    /// Inline as the message's raw payload.
    Msg = 1,
    /// Written to the data channel right after the call is sent.
    Raw = 2,
}

impl PushRoute {
    #[inline]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(PushRoute::Shm),
            1 => Some(PushRoute::Msg),
            2 => Some(PushRoute::Raw),
            _ => None,
        }
    }
}

/// Metadata of one compressed packet pushed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PushMediaInfo {
    pub size: u64,
    pub pts: u64,
    pub width: i32,
    pub height: i32,
    pub mimetype: i32,
    pub flags: i32,
}

/// A compressed packet to feed into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    pub info: PushMediaInfo,
    pub data: Bytes,
}

impl MediaPacket {
    /// Build a packet; `info.size` is taken from `data`.
    pub fn new(mut info: PushMediaInfo, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        info.size = data.len() as u64;
        Self { info, data }
    }
}

/// One plane of a decoded video frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlaneInfo {
    /// Buffer key of the exported plane.
    pub key: u64,
    pub stride: u32,
    pub size: u64,
}

/// Layout of a decoded video frame exported plane by plane.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoFrameInfo {
    pub width: u32,
    pub height: u32,
    pub mimetype: i32,
    pub planes: Vec<PlaneInfo>,
}
