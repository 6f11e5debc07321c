//! Path-keyed cache contract.
//!
//! A [`CacheAdapter`] sits between the drive and file content. When one is
//! installed it is authoritative for reads, writes and sizes of every file it
//! holds; the drive only tells it about lifecycle events (open, close, delete,
//! rename, resize) in the order the tree sees them.
//!
//! Calls are synchronous and may block. The drive invokes them while holding
//! its tree lock, so an adapter must never call back into the drive.

mod memory;

pub use memory::BlockCache;

use strum::{Display, EnumString};
use thiserror::Error;

use super::node::SharedBuffer;

/// Cache-layer error type.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O against a path the cache has no open entry for.
    #[error("not open in cache: {0}")]
    NotOpen(String),

    /// Writing back to, or filling from, the backing store failed.
    #[error("backing store: {0}")]
    Backing(String),

    /// Growing a block or a write-back buffer failed.
    #[error("cache allocation of {requested} bytes failed")]
    Allocation { requested: u64 },
}

pub type CacheResult<T> = Result<T, CacheError>;

/// What to do with dirty data when an entry is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum FlushPolicy {
    /// Leave dirty data in the cache.
    None,
    /// Write dirty data back before returning.
    Immediate,
}

/// Whether a closed entry stays resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PurgePolicy {
    /// Keep the entry so later size queries still see it.
    None,
    /// Drop the entry after close.
    Immediate,
}

/// Backing handle handed to the cache on open.
#[derive(Debug, Clone)]
pub enum ContextToken {
    /// The file's own byte buffer. Misses fill from it and write-back lands in it.
    Buffer(SharedBuffer),
    /// No backing store; the cache alone holds the data.
    Detached,
}

impl ContextToken {
    pub fn buffer(&self) -> Option<&SharedBuffer> {
        match self {
            Self::Buffer(buf) => Some(buf),
            Self::Detached => None,
        }
    }
}

/// Lifecycle and I/O hooks of an external path-keyed cache.
///
/// Paths are the drive's canonical form: absolute, rendered with the
/// configured separator, with the original case of every component.
pub trait CacheAdapter: Send + Sync {
    /// First open of `path` for I/O. `known_size` is the store's logical size.
    fn open(&self, path: &str, known_size: u64, token: ContextToken) -> CacheResult<()>;

    /// Read up to `length` bytes at `position`, clamped to the cached size.
    fn read(&self, path: &str, position: u64, length: usize) -> CacheResult<Vec<u8>>;

    /// Write `data` at `position`. Returns the byte count accepted.
    fn write(&self, path: &str, position: u64, data: &[u8]) -> CacheResult<usize>;

    /// Final close of `path`.
    fn close(&self, path: &str, flush: FlushPolicy, purge: PurgePolicy) -> CacheResult<()>;

    /// Authoritative size of `path`, if the cache holds it.
    fn file_size(&self, path: &str) -> Option<u64>;

    fn file_exists(&self, path: &str) -> bool {
        self.file_size(path).is_some()
    }

    /// Resize a cached file. A path the cache does not hold is a no-op.
    fn set_size(&self, path: &str, size: u64) -> CacheResult<()>;

    /// Forget `path` without writing anything back.
    fn delete(&self, path: &str) -> CacheResult<()>;

    /// Move the entry for `old` to `new`.
    fn change_key(&self, old: &str, new: &str) -> CacheResult<()>;
}
