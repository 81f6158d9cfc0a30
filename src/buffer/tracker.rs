//! Per-connection bookkeeping of exported buffers.
//!
//! Every key a connection exports is recorded here until it is released,
//! finalized, or force-freed at teardown. The table has its own lock,
//! separate from the call correlator.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{BufferError, BufferKey, BufferManager};

/// Identity of an exported multi-plane packet, echoed back on finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketToken(u64);

impl PacketToken {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PacketToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkt#{}", self.0)
    }
}

#[derive(Default)]
struct Tracked {
    keys: HashSet<BufferKey>,
    packets: HashMap<PacketToken, Vec<BufferKey>>,
    next_token: u64,
}

/// Buffers exported on behalf of one connection.
pub struct ConnectionBuffers {
    manager: Arc<BufferManager>,
    tracked: Mutex<Tracked>,
}

impl ConnectionBuffers {
    pub fn new(manager: Arc<BufferManager>) -> Self {
        Self {
            manager,
            tracked: Mutex::new(Tracked::default()),
        }
    }

    #[inline]
    pub fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    /// Export a single buffer and track it.
    pub fn export(&self, data: &[u8]) -> Result<BufferKey, BufferError> {
        let key = self.manager.export(data)?;
        self.tracked.lock().keys.insert(key);
        Ok(key)
    }

    /// Export every plane of a packet under one token.
    ///
    /// On failure, planes already exported are released again.
    pub fn export_packet(
        &self,
        planes: &[&[u8]],
    ) -> Result<(PacketToken, Vec<BufferKey>), BufferError> {
        let mut keys = Vec::with_capacity(planes.len());
        for plane in planes {
            match self.manager.export(plane) {
                Ok(key) => keys.push(key),
                Err(e) => {
                    for key in keys {
                        self.manager.release(key);
                    }
                    return Err(e);
                }
            }
        }

        let mut tracked = self.tracked.lock();
        tracked.next_token += 1;
        let token = PacketToken(tracked.next_token);
        tracked.packets.insert(token, keys.clone());
        Ok((token, keys))
    }

    /// Release one tracked key. Idempotent: `false` if it was already gone.
    pub fn release(&self, key: BufferKey) -> bool {
        let was_tracked = self.tracked.lock().keys.remove(&key);
        if !was_tracked {
            return false;
        }
        self.manager.release(key)
    }

    /// Free every plane of a packet. Idempotent: `false` for an unknown token.
    pub fn finalize(&self, token: PacketToken) -> bool {
        let keys = self.tracked.lock().packets.remove(&token);
        match keys {
            Some(keys) => {
                for key in keys {
                    self.manager.release(key);
                }
                true
            }
            None => false,
        }
    }

    /// Whether a packet token is still outstanding.
    pub fn has_packet(&self, token: PacketToken) -> bool {
        self.tracked.lock().packets.contains_key(&token)
    }

    /// Number of keys still outstanding (single buffers plus packet planes).
    pub fn outstanding(&self) -> usize {
        let tracked = self.tracked.lock();
        tracked.keys.len() + tracked.packets.values().map(Vec::len).sum::<usize>()
    }

    /// Free everything this connection still holds. Returns the number of
    /// keys freed.
    pub fn force_free_all(&self) -> usize {
        let (keys, packets) = {
            let mut tracked = self.tracked.lock();
            (
                std::mem::take(&mut tracked.keys),
                std::mem::take(&mut tracked.packets),
            )
        };

        let mut freed = 0;
        for key in keys.into_iter().chain(packets.into_values().flatten()) {
            if self.manager.release(key) {
                freed += 1;
            }
        }
        if freed > 0 {
            tracing::info!(freed, "force-freed outstanding buffers");
        }
        freed
    }
}

impl Drop for ConnectionBuffers {
    fn drop(&mut self) {
        self.force_free_all();
    }
}
