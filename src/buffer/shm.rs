//! File-backed shared memory regions.
//!
//! A region is a file under `/dev/shm` (or the temp directory when that
//! does not exist) named after its key, so any process that learns the
//! key can map it without descriptor passing.

use std::fs::{self, OpenOptions};
use std::io;
use std::ops::Deref;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::ptr::{self, NonNull};

use super::{BufferError, BufferKey};

/// Directory holding region files.
fn shm_dir() -> PathBuf {
    let dev_shm = PathBuf::from("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm
    } else {
        std::env::temp_dir()
    }
}

/// Path of the region file for `key`.
pub(crate) fn region_path(key: BufferKey) -> PathBuf {
    shm_dir().join(format!("playerwire-{}", key))
}

/// An `mmap`ed range, unmapped on drop.
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is plain memory owned by this struct.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    fn new(fd: i32, len: usize, prot: libc::c_int) -> io::Result<Self> {
        let ptr = unsafe { libc::mmap(ptr::null_mut(), len, prot, libc::MAP_SHARED, fd, 0) };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(ptr as *mut u8)
            .map(|ptr| Self { ptr, len })
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// Exporter-side region. The file is removed on drop.
#[derive(Debug)]
pub(crate) struct SharedRegion {
    path: PathBuf,
    len: usize,
}

impl SharedRegion {
    /// Create the region for `key` and copy `data` into it.
    pub(crate) fn create(key: BufferKey, data: &[u8]) -> Result<Self, BufferError> {
        let path = region_path(key);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| {
                BufferError::AllocationFailed(format!("{}: {}", path.display(), e))
            })?;
        let region = Self {
            path,
            len: data.len(),
        };

        file.set_len(data.len() as u64)
            .map_err(|e| BufferError::AllocationFailed(e.to_string()))?;

        if !data.is_empty() {
            let map = Mapping::new(
                file.as_raw_fd(),
                data.len(),
                libc::PROT_READ | libc::PROT_WRITE,
            )
            .map_err(|e| BufferError::MapFailed(e.to_string()))?;
            unsafe {
                ptr::copy_nonoverlapping(data.as_ptr(), map.ptr.as_ptr(), data.len());
            }
        }

        Ok(region)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "failed to remove region: {}", e);
        }
    }
}

/// Read-only view of an imported region.
pub struct ImportedBuffer {
    key: BufferKey,
    map: Option<Mapping>,
}

impl ImportedBuffer {
    /// Map the region for `key` read-only.
    pub(crate) fn open(key: BufferKey) -> Result<Self, BufferError> {
        let path = region_path(key);
        let file = OpenOptions::new().read(true).open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BufferError::NotFound(key)
            } else {
                BufferError::MapFailed(format!("{}: {}", path.display(), e))
            }
        })?;
        let len = file
            .metadata()
            .map_err(|e| BufferError::MapFailed(e.to_string()))?
            .len() as usize;

        let map = if len == 0 {
            None
        } else {
            Some(
                Mapping::new(file.as_raw_fd(), len, libc::PROT_READ)
                    .map_err(|e| BufferError::MapFailed(e.to_string()))?,
            )
        };
        Ok(Self { key, map })
    }

    #[inline]
    pub fn key(&self) -> BufferKey {
        self.key
    }

    /// Declared size of the region.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.as_ref().map_or(0, |m| m.len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.map {
            Some(m) => unsafe { std::slice::from_raw_parts(m.ptr.as_ptr(), m.len) },
            None => &[],
        }
    }
}

impl Deref for ImportedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for ImportedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportedBuffer")
            .field("key", &self.key)
            .field("len", &self.len())
            .finish()
    }
}
