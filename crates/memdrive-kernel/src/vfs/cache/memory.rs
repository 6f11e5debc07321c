//! Block-granular write-back cache.
//!
//! Entries are keyed by canonical path. Each entry keeps the blocks that have
//! been touched, filled on demand from the [`ContextToken`] buffer. Writes mark
//! blocks dirty; dirty blocks and the cached size are written back on
//! [`BlockCache::flush`] or a close with [`FlushPolicy::Immediate`].

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{CacheAdapter, CacheError, CacheResult, ContextToken, FlushPolicy, PurgePolicy};
use crate::vfs::error::VfsError;

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

struct Block {
    data: Vec<u8>,
    dirty: bool,
}

/// One cached file.
struct CacheEntry {
    token: ContextToken,
    /// Authoritative logical size; may run ahead of the backing buffer.
    size: u64,
    /// Backing bytes at or past this offset are stale after a truncation.
    backing_valid: u64,
    blocks: BTreeMap<u64, Block>,
    open_count: u32,
}

impl CacheEntry {
    fn has_dirty(&self) -> bool {
        self.blocks.values().any(|b| b.dirty)
    }
}

/// Path-keyed write-back cache holding fixed-size blocks.
pub struct BlockCache {
    block_size: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl BlockCache {
    /// Create a cache with the given block size. Zero is bumped to 1.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns true if `path` has blocks not yet written back.
    pub fn is_dirty(&self, path: &str) -> bool {
        self.entries
            .lock()
            .get(path)
            .is_some_and(CacheEntry::has_dirty)
    }

    /// Write back dirty blocks and the cached size of `path`.
    pub fn flush(&self, path: &str) -> CacheResult<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(path)
            .ok_or_else(|| CacheError::NotOpen(path.to_string()))?;
        self.write_back(path, entry)
    }

    fn write_back(&self, path: &str, entry: &mut CacheEntry) -> CacheResult<()> {
        let Some(buffer) = entry.token.buffer() else {
            // Nothing to write to; the cache is the only copy.
            for block in entry.blocks.values_mut() {
                block.dirty = false;
            }
            return Ok(());
        };

        let mut buf = buffer.lock();
        let valid = entry.backing_valid.min(buf.size());
        buf.set_size(valid).map_err(backing_error)?;
        let mut written = 0usize;
        for (&index, block) in entry.blocks.iter_mut().filter(|(_, b)| b.dirty) {
            let start = index * self.block_size as u64;
            if start < entry.size {
                let len = (entry.size - start).min(self.block_size as u64) as usize;
                buf.write(start, &block.data[..len]).map_err(backing_error)?;
            }
            block.dirty = false;
            written += 1;
        }
        buf.set_size(entry.size).map_err(backing_error)?;
        entry.backing_valid = entry.size;
        debug!(path, blocks = written, size = entry.size, "cache write-back");
        Ok(())
    }

    /// Fetch block `index`, filling it from the backing buffer on a miss.
    fn block<'a>(
        block_size: usize,
        entry: &'a mut CacheEntry,
        index: u64,
    ) -> CacheResult<&'a mut Block> {
        if !entry.blocks.contains_key(&index) {
            let mut data = Vec::new();
            data.try_reserve_exact(block_size)
                .map_err(|_| CacheError::Allocation {
                    requested: block_size as u64,
                })?;
            data.resize(block_size, 0);
            let start = index * block_size as u64;
            let valid = entry.size.min(entry.backing_valid);
            if start < valid {
                if let Some(buffer) = entry.token.buffer() {
                    let limit = (valid - start).min(block_size as u64) as usize;
                    buffer.lock().read(start, &mut data[..limit]);
                }
            }
            entry.blocks.insert(index, Block { data, dirty: false });
        }
        entry
            .blocks
            .get_mut(&index)
            .ok_or_else(|| CacheError::Backing(format!("block {index} vanished")))
    }

    fn open_entry<'a>(
        entries: &'a mut HashMap<String, CacheEntry>,
        path: &str,
    ) -> CacheResult<&'a mut CacheEntry> {
        match entries.get_mut(path) {
            Some(entry) if entry.open_count > 0 => Ok(entry),
            _ => Err(CacheError::NotOpen(path.to_string())),
        }
    }
}

fn backing_error(e: VfsError) -> CacheError {
    match e {
        VfsError::AllocationFailure { requested } => CacheError::Allocation { requested },
        other => CacheError::Backing(other.to_string()),
    }
}

impl CacheAdapter for BlockCache {
    fn open(&self, path: &str, known_size: u64, token: ContextToken) -> CacheResult<()> {
        let mut entries = self.entries.lock();
        match entries.get_mut(path) {
            Some(entry) => {
                entry.token = token;
                entry.open_count += 1;
            }
            None => {
                entries.insert(
                    path.to_string(),
                    CacheEntry {
                        token,
                        size: known_size,
                        backing_valid: known_size,
                        blocks: BTreeMap::new(),
                        open_count: 1,
                    },
                );
            }
        }
        debug!(path, known_size, "cache open");
        Ok(())
    }

    fn read(&self, path: &str, position: u64, length: usize) -> CacheResult<Vec<u8>> {
        let mut entries = self.entries.lock();
        let entry = Self::open_entry(&mut entries, path)?;
        if position >= entry.size {
            return Ok(Vec::new());
        }
        let end = entry.size.min(position.saturating_add(length as u64));
        let bs = self.block_size as u64;
        let mut out = Vec::with_capacity((end - position) as usize);
        let mut pos = position;
        while pos < end {
            let index = pos / bs;
            let offset = (pos % bs) as usize;
            let take = (end - pos).min(bs - offset as u64) as usize;
            let block = Self::block(self.block_size, entry, index)?;
            out.extend_from_slice(&block.data[offset..offset + take]);
            pos += take as u64;
        }
        Ok(out)
    }

    fn write(&self, path: &str, position: u64, data: &[u8]) -> CacheResult<usize> {
        let mut entries = self.entries.lock();
        let entry = Self::open_entry(&mut entries, path)?;
        let end = position
            .checked_add(data.len() as u64)
            .ok_or(CacheError::Allocation { requested: u64::MAX })?;
        let bs = self.block_size as u64;
        let mut pos = position;
        let mut consumed = 0usize;
        while pos < end {
            let index = pos / bs;
            let offset = (pos % bs) as usize;
            let take = (end - pos).min(bs - offset as u64) as usize;
            let block = Self::block(self.block_size, entry, index)?;
            block.data[offset..offset + take].copy_from_slice(&data[consumed..consumed + take]);
            block.dirty = true;
            consumed += take;
            pos += take as u64;
        }
        entry.size = entry.size.max(end);
        Ok(data.len())
    }

    fn close(&self, path: &str, flush: FlushPolicy, purge: PurgePolicy) -> CacheResult<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(path)
            .ok_or_else(|| CacheError::NotOpen(path.to_string()))?;
        entry.open_count = entry.open_count.saturating_sub(1);
        if flush == FlushPolicy::Immediate {
            self.write_back(path, entry)?;
        }
        if purge == PurgePolicy::Immediate && entry.open_count == 0 {
            if entry.has_dirty() {
                warn!(path, "purging cache entry with dirty blocks");
            }
            entries.remove(path);
        }
        debug!(path, %flush, %purge, "cache close");
        Ok(())
    }

    fn file_size(&self, path: &str) -> Option<u64> {
        self.entries.lock().get(path).map(|e| e.size)
    }

    fn set_size(&self, path: &str, size: u64) -> CacheResult<()> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(path) else {
            return Ok(());
        };
        if size < entry.size {
            let bs = self.block_size as u64;
            entry.blocks.retain(|&index, _| index * bs < size);
            let tail = (size % bs) as usize;
            if tail != 0 {
                if let Some(block) = entry.blocks.get_mut(&(size / bs)) {
                    block.data[tail..].fill(0);
                    block.dirty = true;
                }
            }
            entry.backing_valid = entry.backing_valid.min(size);
        }
        entry.size = size;
        Ok(())
    }

    fn delete(&self, path: &str) -> CacheResult<()> {
        if let Some(entry) = self.entries.lock().remove(path) {
            if entry.has_dirty() {
                debug!(path, "dropping dirty cache entry on delete");
            }
        }
        Ok(())
    }

    fn change_key(&self, old: &str, new: &str) -> CacheResult<()> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.remove(old) {
            if entries.insert(new.to_string(), entry).is_some() {
                warn!(old, new, "change_key replaced an existing cache entry");
            }
            debug!(old, new, "cache rekey");
        }
        Ok(())
    }
}
