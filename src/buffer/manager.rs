//! Process-global buffer manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::shm::{ImportedBuffer, SharedRegion};
use super::{BufferError, BufferKey};

static GLOBAL: Mutex<Option<Weak<BufferManager>>> = Mutex::new(None);

/// Owner of every region this process exported.
///
/// One instance is shared by all connections in the process: created by
/// the first [`BufferManager::acquire`], dropped (freeing every remaining
/// region) with the last `Arc`.
#[derive(Debug)]
pub struct BufferManager {
    regions: Mutex<HashMap<BufferKey, SharedRegion>>,
    next_id: AtomicU32,
    pid: u32,
}

impl BufferManager {
    fn new() -> Self {
        Self {
            regions: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            pid: std::process::id(),
        }
    }

    /// Get the process-wide manager, creating it if no connection holds one.
    pub fn acquire() -> Arc<Self> {
        let mut global = GLOBAL.lock();
        if let Some(manager) = global.as_ref().and_then(Weak::upgrade) {
            return manager;
        }
        let manager = Arc::new(Self::new());
        *global = Some(Arc::downgrade(&manager));
        tracing::debug!("buffer manager initialized");
        manager
    }

    /// Copy `data` into a new region and return its key.
    ///
    /// The caller may reuse `data` as soon as this returns.
    pub fn export(&self, data: &[u8]) -> Result<BufferKey, BufferError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = BufferKey::from_raw(u64::from(self.pid) << 32 | u64::from(id));

        let region = SharedRegion::create(key, data)?;
        self.regions.lock().insert(key, region);
        tracing::trace!(%key, size = data.len(), "exported buffer");
        Ok(key)
    }

    /// Map the region for `key` read-only.
    pub fn import(&self, key: BufferKey) -> Result<ImportedBuffer, BufferError> {
        ImportedBuffer::open(key)
    }

    /// Free the region for `key`. Returns `false` if it was already gone.
    pub fn release(&self, key: BufferKey) -> bool {
        let region = self.regions.lock().remove(&key);
        match region {
            Some(_) => {
                tracing::trace!(%key, "released buffer");
                true
            }
            None => false,
        }
    }

    /// Whether `key` is currently exported by this process.
    pub fn contains(&self, key: BufferKey) -> bool {
        self.regions.lock().contains_key(&key)
    }

    /// Size of an exported region.
    pub fn size_of(&self, key: BufferKey) -> Option<usize> {
        self.regions.lock().get(&key).map(SharedRegion::len)
    }

    /// Number of live exported regions.
    pub fn len(&self) -> usize {
        self.regions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        let remaining = self.regions.get_mut().len();
        if remaining > 0 {
            tracing::debug!(remaining, "buffer manager freeing remaining regions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_import_release() {
        let manager = BufferManager::acquire();
        let data: Vec<u8> = (0..=255).collect();

        let key = manager.export(&data).unwrap();
        assert!(manager.contains(key));
        assert_eq!(manager.size_of(key), Some(256));

        let view = manager.import(key).unwrap();
        assert_eq!(&view[..], &data[..]);

        assert!(manager.release(key));
        assert!(!manager.contains(key));
        assert!(!manager.release(key));
        assert!(matches!(
            manager.import(key),
            Err(BufferError::NotFound(_))
        ));
    }

    #[test]
    fn test_acquire_shares_instance() {
        let a = BufferManager::acquire();
        let b = BufferManager::acquire();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_keys_are_unique() {
        let manager = BufferManager::acquire();
        let a = manager.export(b"a").unwrap();
        let b = manager.export(b"b").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_raw() >> 32, u64::from(std::process::id()));
        manager.release(a);
        manager.release(b);
    }
}
