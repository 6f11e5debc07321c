//! The drive: one node tree plus an optional cache, driven by path-based
//! requests from an external dispatcher.
//!
//! # Locking
//!
//! A single `RwLock` guards the tree and the open-file table. File bytes sit
//! behind per-file mutexes. Locks are always taken tree, then cache, then
//! buffer; the drive never holds a buffer lock across a cache call.
//!
//! # Cache coupling
//!
//! With a [`CacheAdapter`] installed, every read, write and resize of a file
//! goes through the cache, keyed by the file's canonical path. The first open
//! of a file opens it in the cache and the last close flushes it. I/O on a
//! file nobody has open wraps itself in a transient open and close.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::DriveConfig;

use super::cache::{BlockCache, CacheAdapter, CacheResult, ContextToken, FlushPolicy, PurgePolicy};
use super::enumerate::DirectoryEnumerator;
use super::error::{VfsError, VfsResult};
use super::node::{FileBuffer, NodeId, ReparsePoint, SharedBuffer, VNode};
use super::path::PathResolver;
use super::store::NodeStore;
use super::types::{
    CreateOptions, DirEntry, FileTime, FileTimes, NodeInfo, NodeKind, SetAttr, StatFs,
};

/// Typed handle returned by [`MemoryDrive::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle {
    id: u64,
    node: NodeId,
    kind: NodeKind,
}

impl FileHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }
}

#[derive(Debug, Default)]
struct OpenNode {
    count: u32,
}

#[derive(Debug)]
struct DriveState {
    store: NodeStore,
    /// Per-node open reference counts.
    open: HashMap<NodeId, OpenNode>,
    /// Outstanding handles by id.
    handles: HashMap<u64, FileHandle>,
    next_handle: u64,
}

/// In-memory drive.
pub struct MemoryDrive {
    config: DriveConfig,
    state: RwLock<DriveState>,
    cache: Option<Arc<dyn CacheAdapter>>,
}

impl fmt::Debug for MemoryDrive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDrive")
            .field("config", &self.config)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl Default for MemoryDrive {
    fn default() -> Self {
        Self::new(DriveConfig::default())
    }
}

impl MemoryDrive {
    /// Create an empty drive with no cache.
    pub fn new(config: DriveConfig) -> Self {
        let mut store = NodeStore::new(config.case_sensitive);
        if let Some(root) = store.get_mut(NodeId::ROOT) {
            root.set_mode(config.default_dir_mode);
            root.set_times(FileTimes::all(FileTime::now()));
        }
        Self {
            config,
            state: RwLock::new(DriveState {
                store,
                open: HashMap::new(),
                handles: HashMap::new(),
                next_handle: 1,
            }),
            cache: None,
        }
    }

    /// Create an empty drive backed by `cache`.
    pub fn with_cache(config: DriveConfig, cache: Arc<dyn CacheAdapter>) -> Self {
        let mut drive = Self::new(config);
        drive.cache = Some(cache);
        drive
    }

    /// Create a drive, installing a [`BlockCache`] when the config asks for one.
    pub fn from_config(config: DriveConfig) -> Self {
        match config.cache.clone() {
            Some(cache) => Self::with_cache(config, Arc::new(BlockCache::new(cache.block_size))),
            None => Self::new(config),
        }
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheAdapter>> {
        self.cache.as_ref()
    }

    fn separator(&self) -> char {
        self.config.separator.as_char()
    }

    /// Canonical path of `path`, as used for cache keys.
    pub fn canonical_path(&self, path: &str) -> VfsResult<String> {
        let st = self.state.read();
        let id = PathResolver::resolve(&st.store, path)?;
        st.store.path_of(id, self.separator())
    }

    pub fn exists(&self, path: &str) -> bool {
        PathResolver::resolve(&self.state.read().store, path).is_ok()
    }

    // ------------------------------------------------------------------
    // Create / open / close
    // ------------------------------------------------------------------

    /// Create a file or directory at `path`.
    pub fn create(&self, path: &str, kind: NodeKind, opts: &CreateOptions) -> VfsResult<NodeId> {
        let mut st = self.state.write();
        let (parent, name) = PathResolver::resolve_parent(&st.store, path)?;
        if st.store.find_child_by_name(parent, &name).is_some() {
            return Err(VfsError::already_exists(path));
        }

        let (mut node, default_mode) = match kind {
            NodeKind::File => (
                VNode::file(name, FileBuffer::with_allocation(opts.initial_allocation)?),
                self.config.default_file_mode,
            ),
            NodeKind::Directory => (VNode::directory(name), self.config.default_dir_mode),
        };
        node.set_attributes(opts.attributes);
        node.set_mode(opts.mode.unwrap_or(default_mode));
        node.set_owner(opts.uid, opts.gid);
        node.set_times(FileTimes::all(FileTime::now()));

        let id = st.store.insert(node);
        if let Err(e) = st.store.add_child(parent, id) {
            st.store.destroy(id)?;
            return Err(e);
        }
        debug!(path, %kind, node = %id, "create");
        Ok(id)
    }

    pub fn create_file(&self, path: &str, opts: &CreateOptions) -> VfsResult<NodeId> {
        self.create(path, NodeKind::File, opts)
    }

    pub fn mkdir(&self, path: &str, opts: &CreateOptions) -> VfsResult<NodeId> {
        self.create(path, NodeKind::Directory, opts)
    }

    /// Open `path`. The first open of a file opens it in the cache.
    pub fn open(&self, path: &str) -> VfsResult<FileHandle> {
        let mut st = self.state.write();
        let id = PathResolver::resolve(&st.store, path)?;
        let node = st.store.node(id)?;
        let kind = node.kind();
        let first = !st.open.contains_key(&id);

        if let (Some(cache), Some(buffer), true) = (&self.cache, node.buffer().cloned(), first) {
            let key = st.store.path_of(id, self.separator())?;
            let size = buffer.lock().size();
            cache.open(&key, size, ContextToken::Buffer(buffer))?;
        }

        st.open.entry(id).or_default().count += 1;
        let handle = FileHandle {
            id: st.next_handle,
            node: id,
            kind,
        };
        st.next_handle += 1;
        st.handles.insert(handle.id, handle);
        debug!(path, handle = handle.id, node = %id, "open");
        Ok(handle)
    }

    /// Release a handle. The final close of a cached file flushes it.
    pub fn close(&self, handle: FileHandle) -> VfsResult<()> {
        let mut st = self.state.write();
        if st.handles.remove(&handle.id).is_none() {
            return Err(VfsError::StaleHandle(handle.id));
        }
        let Some(open) = st.open.get_mut(&handle.node) else {
            warn!(handle = handle.id, node = %handle.node, "closing a handle whose node was deleted");
            return Ok(());
        };
        open.count = open.count.saturating_sub(1);
        if open.count > 0 {
            return Ok(());
        }
        st.open.remove(&handle.node);

        if let (Some(cache), NodeKind::File) = (&self.cache, handle.kind) {
            let key = st.store.path_of(handle.node, self.separator())?;
            cache.close(&key, FlushPolicy::Immediate, PurgePolicy::None)?;
            debug!(path = %key, "final close");
        }
        Ok(())
    }

    /// Number of outstanding handles.
    pub fn open_handles(&self) -> usize {
        self.state.read().handles.len()
    }

    fn check_handle(st: &DriveState, handle: &FileHandle) -> VfsResult<NodeId> {
        if !st.handles.contains_key(&handle.id) {
            return Err(VfsError::StaleHandle(handle.id));
        }
        st.store.node(handle.node)?;
        Ok(handle.node)
    }

    // ------------------------------------------------------------------
    // I/O
    // ------------------------------------------------------------------

    /// Read up to `length` bytes at `position`.
    pub fn read(&self, path: &str, position: u64, length: usize) -> VfsResult<Vec<u8>> {
        let st = self.state.read();
        let id = PathResolver::resolve(&st.store, path)?;
        self.read_node(&st, id, position, length)
    }

    pub fn read_handle(&self, handle: &FileHandle, position: u64, length: usize) -> VfsResult<Vec<u8>> {
        let st = self.state.read();
        let id = Self::check_handle(&st, handle)?;
        self.read_node(&st, id, position, length)
    }

    /// Write `data` at `position`. Returns the byte count written.
    pub fn write(&self, path: &str, position: u64, data: &[u8]) -> VfsResult<usize> {
        let mut st = self.state.write();
        let id = PathResolver::resolve(&st.store, path)?;
        self.write_node(&mut st, id, position, data)
    }

    pub fn write_handle(&self, handle: &FileHandle, position: u64, data: &[u8]) -> VfsResult<usize> {
        let mut st = self.state.write();
        let id = Self::check_handle(&st, handle)?;
        self.write_node(&mut st, id, position, data)
    }

    fn file_buffer(st: &DriveState, id: NodeId) -> VfsResult<SharedBuffer> {
        let node = st.store.node(id)?;
        node.buffer()
            .cloned()
            .ok_or_else(|| VfsError::not_a_file(node.name().to_string()))
    }

    fn read_node(&self, st: &DriveState, id: NodeId, position: u64, length: usize) -> VfsResult<Vec<u8>> {
        let buffer = Self::file_buffer(st, id)?;
        match &self.cache {
            Some(cache) => self.through_cache(st, cache.as_ref(), id, &buffer, |c, key| {
                c.read(key, position, length)
            }),
            None => Ok(buffer.lock().read_vec(position, length)),
        }
    }

    fn write_node(&self, st: &mut DriveState, id: NodeId, position: u64, data: &[u8]) -> VfsResult<usize> {
        let buffer = Self::file_buffer(st, id)?;
        if position.checked_add(data.len() as u64).is_none() {
            return Err(VfsError::invalid_argument(format!(
                "write at {position} overflows"
            )));
        }
        let written = match &self.cache {
            Some(cache) => self.through_cache(st, cache.as_ref(), id, &buffer, |c, key| {
                c.write(key, position, data)
            })?,
            None => buffer.lock().write(position, data)?,
        };
        Self::touch_write(st, id);
        Ok(written)
    }

    /// Run `op` against the cache entry for `id`, opening it for the
    /// duration when no handle has the file open.
    fn through_cache<T>(
        &self,
        st: &DriveState,
        cache: &dyn CacheAdapter,
        id: NodeId,
        buffer: &SharedBuffer,
        op: impl FnOnce(&dyn CacheAdapter, &str) -> CacheResult<T>,
    ) -> VfsResult<T> {
        let key = st.store.path_of(id, self.separator())?;
        let transient = !st.open.contains_key(&id);
        if transient {
            let size = buffer.lock().size();
            cache.open(&key, size, ContextToken::Buffer(buffer.clone()))?;
        }
        let result = op(cache, &key);
        if transient {
            cache.close(&key, FlushPolicy::Immediate, PurgePolicy::None)?;
        }
        Ok(result?)
    }

    fn touch_write(st: &mut DriveState, id: NodeId) {
        if let Some(node) = st.store.get_mut(id) {
            let mut times = node.times();
            times.last_write = FileTime::now();
            node.set_times(times);
        }
    }

    /// Logical size, preferring the cache's figure when it holds the file.
    fn effective_size(&self, st: &DriveState, id: NodeId) -> VfsResult<u64> {
        let node = st.store.node(id)?;
        if let (Some(cache), true) = (&self.cache, node.is_file()) {
            let key = st.store.path_of(id, self.separator())?;
            if let Some(size) = cache.file_size(&key) {
                return Ok(size);
            }
        }
        Ok(node.size())
    }

    fn info_of(&self, st: &DriveState, id: NodeId) -> VfsResult<NodeInfo> {
        let mut info = st.store.node(id)?.info();
        info.size = self.effective_size(st, id)?;
        Ok(info)
    }

    // ------------------------------------------------------------------
    // Size and attributes
    // ------------------------------------------------------------------

    /// Set the logical size of a file.
    pub fn set_size(&self, path: &str, size: u64) -> VfsResult<()> {
        let mut st = self.state.write();
        let id = PathResolver::resolve(&st.store, path)?;
        self.set_size_node(&mut st, id, size)?;
        debug!(path, size, "set_size");
        Ok(())
    }

    fn set_size_node(&self, st: &mut DriveState, id: NodeId, size: u64) -> VfsResult<()> {
        let buffer = Self::file_buffer(st, id)?;
        match &self.cache {
            Some(cache) => {
                self.through_cache(st, cache.as_ref(), id, &buffer, |c, key| c.set_size(key, size))?
            }
            None => buffer.lock().set_size(size)?,
        }
        Self::touch_write(st, id);
        Ok(())
    }

    /// Reallocate a file's backing buffer to exactly `capacity` bytes.
    /// The logical size is left to the caller.
    pub fn set_allocation_size(&self, path: &str, capacity: u64) -> VfsResult<()> {
        let st = self.state.read();
        let id = PathResolver::resolve(&st.store, path)?;
        Self::file_buffer(&st, id)?
            .lock()
            .set_allocation_size(capacity)?;
        debug!(path, capacity, "set_allocation_size");
        Ok(())
    }

    /// Reserve space up to `offset + length`; unless `keep_size`, the logical
    /// size grows with it.
    pub fn allocate(&self, path: &str, offset: u64, length: u64, keep_size: bool) -> VfsResult<()> {
        let mut st = self.state.write();
        let id = PathResolver::resolve(&st.store, path)?;
        let end = offset
            .checked_add(length)
            .ok_or_else(|| VfsError::invalid_argument(format!("allocate {offset}+{length} overflows")))?;
        let buffer = Self::file_buffer(&st, id)?;
        let size = self.effective_size(&st, id)?;
        if end >= size {
            {
                let mut buf = buffer.lock();
                if end > buf.allocation_size() {
                    buf.set_allocation_size(end)?;
                }
            }
            if !keep_size && end > size {
                self.set_size_node(&mut st, id, end)?;
            }
        }
        debug!(path, offset, length, keep_size, "allocate");
        Ok(())
    }

    /// Apply a partial metadata update.
    pub fn set_attributes(&self, path: &str, set: &SetAttr) -> VfsResult<()> {
        let mut st = self.state.write();
        let id = PathResolver::resolve(&st.store, path)?;
        st.store.node_mut(id)?.apply(set);
        Ok(())
    }

    pub fn get_info(&self, path: &str) -> VfsResult<NodeInfo> {
        let st = self.state.read();
        let id = PathResolver::resolve(&st.store, path)?;
        self.info_of(&st, id)
    }

    // ------------------------------------------------------------------
    // Reparse points
    // ------------------------------------------------------------------

    /// Attach reparse data. Replacing existing data requires the same tag.
    pub fn set_reparse_point(&self, path: &str, tag: u32, data: Vec<u8>) -> VfsResult<()> {
        let mut st = self.state.write();
        let id = PathResolver::resolve(&st.store, path)?;
        let node = st.store.node_mut(id)?;
        if let Some(existing) = node.reparse_point() {
            if existing.tag != tag {
                return Err(VfsError::ReparseTagMismatch {
                    path: path.to_string(),
                    existing: existing.tag,
                    requested: tag,
                });
            }
        }
        node.set_reparse_point(ReparsePoint { tag, data });
        Ok(())
    }

    pub fn get_reparse_point(&self, path: &str) -> VfsResult<ReparsePoint> {
        let st = self.state.read();
        let id = PathResolver::resolve(&st.store, path)?;
        st.store
            .node(id)?
            .reparse_point()
            .cloned()
            .ok_or_else(|| VfsError::not_a_reparse_point(path))
    }

    pub fn delete_reparse_point(&self, path: &str) -> VfsResult<()> {
        let mut st = self.state.write();
        let id = PathResolver::resolve(&st.store, path)?;
        st.store
            .node_mut(id)?
            .clear_reparse_point()
            .map(|_| ())
            .ok_or_else(|| VfsError::not_a_reparse_point(path))
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Returns true if `path` may be deleted: anything but the root and
    /// non-empty directories that are not reparse points.
    pub fn can_delete(&self, path: &str) -> VfsResult<bool> {
        let st = self.state.read();
        let id = PathResolver::resolve(&st.store, path)?;
        if id.is_root() {
            return Ok(false);
        }
        let node = st.store.node(id)?;
        Ok(!(node.is_dir() && !node.is_reparse_point() && !st.store.is_directory_empty(id)?))
    }

    pub fn is_directory_empty(&self, path: &str) -> VfsResult<bool> {
        let st = self.state.read();
        let id = PathResolver::resolve(&st.store, path)?;
        st.store.is_directory_empty(id)
    }

    /// Remove a file or an empty directory.
    pub fn delete(&self, path: &str) -> VfsResult<()> {
        let mut st = self.state.write();
        let id = PathResolver::resolve(&st.store, path)?;
        if id.is_root() {
            return Err(VfsError::invalid_argument("cannot delete the root"));
        }
        if st.store.node(id)?.is_dir() && !st.store.is_directory_empty(id)? {
            return Err(VfsError::directory_not_empty(path));
        }
        self.remove_subtree(&mut st, id)?;
        debug!(path, "delete");
        Ok(())
    }

    /// Remove an empty directory.
    pub fn rmdir(&self, path: &str) -> VfsResult<()> {
        {
            let st = self.state.read();
            let id = PathResolver::resolve(&st.store, path)?;
            if !st.store.node(id)?.is_dir() {
                return Err(VfsError::not_a_directory(path));
            }
        }
        self.delete(path)
    }

    /// Remove `path` and everything below it. On the root this empties the
    /// drive and keeps the root itself.
    pub fn remove_all(&self, path: &str) -> VfsResult<()> {
        let mut st = self.state.write();
        let id = PathResolver::resolve(&st.store, path)?;
        if id.is_root() {
            let children: Vec<NodeId> = st
                .store
                .node(id)?
                .children()
                .map(|c| c.ids().to_vec())
                .unwrap_or_default();
            for child in children {
                self.remove_subtree(&mut st, child)?;
            }
        } else {
            self.remove_subtree(&mut st, id)?;
        }
        debug!(path, "remove_all");
        Ok(())
    }

    fn remove_subtree(&self, st: &mut DriveState, id: NodeId) -> VfsResult<()> {
        let mut ids = st.store.descendants(id);
        ids.push(id);

        let mut stale_keys = Vec::new();
        if self.cache.is_some() {
            for &node in &ids {
                if st.store.node(node)?.is_file() {
                    stale_keys.push(st.store.path_of(node, self.separator())?);
                }
            }
        }
        for node in &ids {
            if st.open.remove(node).is_some() {
                warn!(node = %node, "removing a node with open handles");
            }
        }

        st.store.destroy(id)?;

        if let Some(cache) = &self.cache {
            for key in &stale_keys {
                cache.delete(key)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rename
    // ------------------------------------------------------------------

    /// Move `old_path` to `new_path`.
    ///
    /// An existing target is replaced only when `replace` is set, and never
    /// if it is a non-empty directory. The tree change happens under one
    /// write lock; cache entries are re-keyed after it succeeds.
    pub fn rename(&self, old_path: &str, new_path: &str, replace: bool) -> VfsResult<()> {
        let mut st = self.state.write();
        let src = PathResolver::resolve(&st.store, old_path)?;
        if src.is_root() {
            return Err(VfsError::invalid_argument("cannot rename the root"));
        }
        let (parent, name) = PathResolver::resolve_parent(&st.store, new_path)?;
        if src == parent || st.store.is_ancestor(src, parent) {
            return Err(VfsError::invalid_argument(format!(
                "cannot move {old_path} into itself"
            )));
        }

        // Files under src, with their keys before the move.
        let mut moved = Vec::new();
        if self.cache.is_some() {
            let mut ids = st.store.descendants(src);
            ids.push(src);
            for id in ids {
                if st.store.node(id)?.is_file() {
                    moved.push((id, st.store.path_of(id, self.separator())?));
                }
            }
        }

        match st.store.find_child_by_name(parent, &name) {
            Some(existing) if existing == src => {}
            Some(existing) => {
                if !replace {
                    return Err(VfsError::already_exists(new_path));
                }
                if st.store.node(existing)?.is_dir() && !st.store.is_directory_empty(existing)? {
                    return Err(VfsError::directory_not_empty(new_path));
                }
                self.remove_subtree(&mut st, existing)?;
            }
            None => {}
        }

        st.store.move_node(src, parent, &name)?;
        debug!(from = old_path, to = new_path, replace, "rename");

        if let Some(cache) = &self.cache {
            for (id, old_key) in moved {
                let new_key = st.store.path_of(id, self.separator())?;
                if new_key == old_key {
                    continue;
                }
                if cache.file_exists(&new_key) {
                    cache.delete(&new_key)?;
                }
                cache.change_key(&old_key, &new_key)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Enumeration and volume info
    // ------------------------------------------------------------------

    /// Produce the next entry of `dir_path` for an enumeration session.
    ///
    /// `Ok(None)` means no (more) entries. Only fresh or restarted calls
    /// resolve `dir_path`; later calls continue on the directory node the
    /// session started on, so the listing survives a rename of that
    /// directory. A fresh session on a path that does not exist yet lists
    /// its parent; a path naming a file is `NotADirectory`.
    pub fn enumerate(
        &self,
        session: &mut DirectoryEnumerator,
        dir_path: &str,
        mask: Option<&str>,
        restart: bool,
    ) -> VfsResult<Option<DirEntry>> {
        let st = self.state.read();
        let continuing = match session.cursor() {
            Some(cursor) if !restart => Some(cursor.dir),
            _ => None,
        };
        let dir = match continuing {
            Some(dir) => match st.store.get(dir) {
                Some(node) if node.is_dir() => dir,
                _ => return Err(VfsError::not_found(dir_path)),
            },
            None => match PathResolver::resolve(&st.store, dir_path) {
                Ok(id) => {
                    if !st.store.node(id)?.is_dir() {
                        return Err(VfsError::not_a_directory(dir_path));
                    }
                    id
                }
                Err(VfsError::NotFound(_)) => {
                    PathResolver::resolve_as_directory(&st.store, dir_path)?
                }
                Err(e) => return Err(e),
            },
        };
        match session.next_child(&st.store, dir, mask, restart) {
            Some(child) => Ok(Some(self.info_of(&st, child)?.into())),
            None => Ok(None),
        }
    }

    /// End an enumeration session.
    pub fn close_enumeration(&self, session: &mut DirectoryEnumerator) {
        session.close();
    }

    /// All entries of `dir_path` matching `mask`, in enumeration order.
    pub fn read_dir(&self, dir_path: &str, mask: Option<&str>) -> VfsResult<Vec<DirEntry>> {
        let mut session = DirectoryEnumerator::new();
        let mut entries = Vec::new();
        let mut restart = true;
        while let Some(entry) = self.enumerate(&mut session, dir_path, mask, restart)? {
            entries.push(entry);
            restart = false;
        }
        self.close_enumeration(&mut session);
        Ok(entries)
    }

    /// Volume statistics. Used space is every file's allocation rounded up
    /// to the sector size.
    pub fn stat_fs(&self) -> StatFs {
        let st = self.state.read();
        let sector = u64::from(self.config.sector_size.max(1));
        let total = self.config.total_space;
        let used = st.store.folder_size(st.store.root(), sector);
        let free = total.saturating_sub(used);
        StatFs {
            sector_size: self.config.sector_size,
            total_space: total,
            free_space: free,
            total_sectors: total / sector,
            free_sectors: free.saturating_add(sector / 2) / sector,
        }
    }
}
