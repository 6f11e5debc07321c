//! VNode: one file or directory in the tree.
//!
//! Nodes never point at each other directly. The [`NodeStore`](super::store::NodeStore)
//! owns every node by id; `parent` and the child list are ids into that arena.
//! File content lives in a [`SharedBuffer`] so a cache adapter can reach it
//! through a [`ContextToken`](super::cache::ContextToken) without holding the
//! tree lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::error::{VfsError, VfsResult};
use super::types::{FileAttributes, FileTimes, NodeInfo, NodeKind, SetAttr};

/// Arena handle for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    /// The root directory is always the first node allocated.
    pub const ROOT: NodeId = NodeId(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resizable byte storage for a file.
///
/// `data.len()` is the allocation size; `size` is the logical length.
/// Bytes past `size` are never returned by `read`.
#[derive(Debug, Default, Clone)]
pub struct FileBuffer {
    data: Vec<u8>,
    size: u64,
}

impl FileBuffer {
    /// Create an empty buffer with no allocation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with `capacity` bytes allocated.
    pub fn with_allocation(capacity: u64) -> VfsResult<Self> {
        let mut buf = Self::new();
        buf.set_allocation_size(capacity)?;
        Ok(buf)
    }

    /// Logical length.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Backing capacity.
    pub fn allocation_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Bytes that can be served: logical size, clamped to what is allocated.
    fn readable(&self) -> u64 {
        self.size.min(self.allocation_size())
    }

    /// Copy bytes starting at `position` into `buf`. Returns the count copied.
    ///
    /// Reading at or past the end returns 0.
    pub fn read(&self, position: u64, buf: &mut [u8]) -> usize {
        let readable = self.readable();
        if position >= readable {
            return 0;
        }
        // position < readable <= data.len(), so both fit in usize.
        let start = position as usize;
        let count = buf.len().min((readable - position) as usize);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        count
    }

    /// Read up to `length` bytes at `position` into a new vector.
    pub fn read_vec(&self, position: u64, length: usize) -> Vec<u8> {
        let readable = self.readable();
        if position >= readable {
            return Vec::new();
        }
        let available = (readable - position) as usize;
        let mut out = vec![0u8; length.min(available)];
        let count = self.read(position, &mut out);
        out.truncate(count);
        out
    }

    /// Write `data` at `position`, growing size and allocation as needed.
    ///
    /// Any gap between the previous end and `position` reads back as zeros.
    pub fn write(&mut self, position: u64, data: &[u8]) -> VfsResult<usize> {
        let end = position.checked_add(data.len() as u64).ok_or_else(|| {
            VfsError::invalid_argument(format!("write at {position} overflows"))
        })?;
        let visible = self.readable();
        if end > self.allocation_size() {
            self.grow_to(end)?;
        }
        if position > visible {
            self.data[visible as usize..position as usize].fill(0);
        }
        let start = position as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        self.size = self.size.max(end);
        Ok(data.len())
    }

    /// Set the logical length.
    ///
    /// Shrinking keeps the allocation for reuse. Growing past the allocation
    /// grows it to match; the newly exposed range reads as zeros.
    pub fn set_size(&mut self, size: u64) -> VfsResult<()> {
        if size > self.size {
            let visible = self.readable();
            if size > self.allocation_size() {
                self.grow_to(size)?;
            }
            self.data[visible as usize..size as usize].fill(0);
        }
        self.size = size;
        Ok(())
    }

    /// Reallocate the backing buffer to exactly `capacity` bytes.
    ///
    /// Does not touch the logical size; shrinking below it is the caller's
    /// business and reads clamp to the allocation in the meantime.
    pub fn set_allocation_size(&mut self, capacity: u64) -> VfsResult<()> {
        if capacity > self.allocation_size() {
            self.grow_to(capacity)
        } else {
            self.data.truncate(capacity as usize);
            self.data.shrink_to_fit();
            Ok(())
        }
    }

    fn grow_to(&mut self, capacity: u64) -> VfsResult<()> {
        let failure = VfsError::AllocationFailure {
            requested: capacity,
        };
        let target = usize::try_from(capacity).map_err(|_| failure)?;
        let extra = target.saturating_sub(self.data.len());
        self.data
            .try_reserve_exact(extra)
            .map_err(|_| VfsError::AllocationFailure {
                requested: capacity,
            })?;
        self.data.resize(target, 0);
        Ok(())
    }
}

/// A file buffer shared between the tree and the cache adapter.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<FileBuffer>>);

impl SharedBuffer {
    pub fn new(buffer: FileBuffer) -> Self {
        Self(Arc::new(Mutex::new(buffer)))
    }

    pub fn lock(&self) -> MutexGuard<'_, FileBuffer> {
        self.0.lock()
    }

    /// Returns true if both handles refer to the same buffer.
    pub fn ptr_eq(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_lock() {
            Some(buf) => f
                .debug_struct("SharedBuffer")
                .field("size", &buf.size())
                .field("allocation_size", &buf.allocation_size())
                .finish(),
            None => f.write_str("SharedBuffer(<locked>)"),
        }
    }
}

/// Opaque reparse data with its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReparsePoint {
    pub tag: u32,
    pub data: Vec<u8>,
}

/// Ordered child list of a directory with a name index.
///
/// `order` is insertion order and drives enumeration; `index` is keyed by the
/// store's folded name so lookups honor its case policy.
#[derive(Debug, Default, Clone)]
pub struct Children {
    pub(crate) order: Vec<NodeId>,
    pub(crate) index: HashMap<String, NodeId>,
}

impl Children {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Child ids in insertion order.
    pub fn ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.order.get(index).copied()
    }
}

/// Content of a node: the discriminant between files and directories.
#[derive(Debug)]
pub enum NodeContent {
    File(SharedBuffer),
    Directory(Children),
}

/// One file or directory.
#[derive(Debug)]
pub struct VNode {
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    attributes: FileAttributes,
    times: FileTimes,
    mode: u32,
    uid: u32,
    gid: u32,
    reparse: Option<ReparsePoint>,
    pub(crate) content: NodeContent,
}

impl VNode {
    /// A new, detached file node.
    pub fn file(name: impl Into<String>, buffer: FileBuffer) -> Self {
        Self::with_content(name, NodeContent::File(SharedBuffer::new(buffer)))
    }

    /// A new, detached, empty directory node.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::with_content(name, NodeContent::Directory(Children::default()))
    }

    fn with_content(name: impl Into<String>, content: NodeContent) -> Self {
        let mut node = Self {
            name: name.into(),
            parent: None,
            attributes: FileAttributes::empty(),
            times: FileTimes::default(),
            mode: 0,
            uid: 0,
            gid: 0,
            reparse: None,
            content,
        };
        node.attributes = node.normalize_attributes(FileAttributes::empty());
        node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> NodeKind {
        match self.content {
            NodeContent::File(_) => NodeKind::File,
            NodeContent::Directory(_) => NodeKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind().is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.kind().is_file()
    }

    pub fn attributes(&self) -> FileAttributes {
        self.attributes
    }

    pub fn times(&self) -> FileTimes {
        self.times
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// File content, `None` for directories.
    pub fn buffer(&self) -> Option<&SharedBuffer> {
        match &self.content {
            NodeContent::File(buf) => Some(buf),
            NodeContent::Directory(_) => None,
        }
    }

    /// Child list, `None` for files.
    pub fn children(&self) -> Option<&Children> {
        match &self.content {
            NodeContent::Directory(children) => Some(children),
            NodeContent::File(_) => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Children> {
        match &mut self.content {
            NodeContent::Directory(children) => Some(children),
            NodeContent::File(_) => None,
        }
    }

    /// Logical size; 0 for directories.
    pub fn size(&self) -> u64 {
        self.buffer().map_or(0, |b| b.lock().size())
    }

    /// Allocation size; 0 for directories.
    pub fn allocation_size(&self) -> u64 {
        self.buffer().map_or(0, |b| b.lock().allocation_size())
    }

    pub fn reparse_point(&self) -> Option<&ReparsePoint> {
        self.reparse.as_ref()
    }

    pub fn is_reparse_point(&self) -> bool {
        self.reparse.is_some()
    }

    /// Attach reparse data, keeping the reparse attribute bit in step.
    pub fn set_reparse_point(&mut self, point: ReparsePoint) {
        self.reparse = Some(point);
        self.attributes = self.normalize_attributes(self.attributes);
    }

    /// Drop reparse data and the reparse attribute bit.
    pub fn clear_reparse_point(&mut self) -> Option<ReparsePoint> {
        let old = self.reparse.take();
        self.attributes = self.normalize_attributes(self.attributes);
        old
    }

    pub fn set_times(&mut self, times: FileTimes) {
        self.times = times;
    }

    pub fn set_mode(&mut self, mode: u32) {
        self.mode = mode;
    }

    pub fn set_owner(&mut self, uid: u32, gid: u32) {
        self.uid = uid;
        self.gid = gid;
    }

    /// Replace the attribute bits. The directory and reparse bits follow the
    /// node's kind and reparse state regardless of what is passed.
    pub fn set_attributes(&mut self, attributes: FileAttributes) {
        self.attributes = self.normalize_attributes(attributes);
    }

    /// Apply a partial attribute update.
    pub fn apply(&mut self, set: &SetAttr) {
        if let Some(attributes) = set.attributes {
            self.set_attributes(attributes);
        }
        if let Some(t) = set.creation_time {
            self.times.creation = t;
        }
        if let Some(t) = set.last_access_time {
            self.times.last_access = t;
        }
        if let Some(t) = set.last_write_time {
            self.times.last_write = t;
        }
        if let Some(mode) = set.mode {
            self.mode = mode;
        }
        if let Some(uid) = set.uid {
            self.uid = uid;
        }
        if let Some(gid) = set.gid {
            self.gid = gid;
        }
    }

    /// Snapshot of this node's metadata using its own recorded size.
    pub fn info(&self) -> NodeInfo {
        let (size, allocation_size) = match self.buffer() {
            Some(buf) => {
                let buf = buf.lock();
                (buf.size(), buf.allocation_size())
            }
            None => (0, 0),
        };
        NodeInfo {
            name: self.name.clone(),
            kind: self.kind(),
            size,
            allocation_size,
            attributes: self.attributes,
            times: self.times,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            reparse_tag: self
                .attributes
                .contains(FileAttributes::REPARSE_POINT)
                .then(|| self.reparse.as_ref().map(|r| r.tag))
                .flatten(),
        }
    }

    fn normalize_attributes(&self, raw: FileAttributes) -> FileAttributes {
        let mut attrs =
            raw.difference(FileAttributes::DIRECTORY | FileAttributes::REPARSE_POINT);
        attrs.set(FileAttributes::DIRECTORY, self.is_dir());
        attrs.set(FileAttributes::REPARSE_POINT, self.reparse.is_some());
        if attrs.difference(FileAttributes::NORMAL).is_empty() {
            FileAttributes::NORMAL
        } else {
            attrs.difference(FileAttributes::NORMAL)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::types::FileTime;

    #[test]
    fn test_write_then_read() {
        let mut buf = FileBuffer::new();
        assert_eq!(buf.write(0, b"Hello, world!").unwrap(), 13);
        assert_eq!(buf.size(), 13);
        assert!(buf.allocation_size() >= 13);
        assert_eq!(buf.read_vec(0, 100), b"Hello, world!");
        assert_eq!(buf.read_vec(7, 5), b"world");
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let mut buf = FileBuffer::new();
        buf.write(0, b"abc").unwrap();
        assert!(buf.read_vec(3, 10).is_empty());
        assert!(buf.read_vec(1000, 10).is_empty());
        let mut out = [0u8; 4];
        assert_eq!(buf.read(5, &mut out), 0);
    }

    #[test]
    fn test_read_does_not_expose_allocation_tail() {
        let mut buf = FileBuffer::with_allocation(64).unwrap();
        buf.write(0, b"xy").unwrap();
        assert_eq!(buf.allocation_size(), 64);
        assert_eq!(buf.read_vec(0, 64), b"xy");
    }

    #[test]
    fn test_write_gap_reads_zero() {
        let mut buf = FileBuffer::new();
        buf.write(0, b"abcdef").unwrap();
        buf.set_size(2).unwrap();
        buf.write(4, b"Z").unwrap();
        assert_eq!(buf.read_vec(0, 10), b"ab\0\0Z");
    }

    #[test]
    fn test_set_size_keeps_allocation() {
        let mut buf = FileBuffer::new();
        buf.write(0, &[7u8; 100]).unwrap();
        buf.set_size(10).unwrap();
        assert_eq!(buf.size(), 10);
        assert_eq!(buf.allocation_size(), 100);

        buf.set_size(20).unwrap();
        assert_eq!(buf.read_vec(0, 20)[10..], [0u8; 10]);
    }

    #[test]
    fn test_set_size_grows_allocation() {
        let mut buf = FileBuffer::new();
        buf.set_size(32).unwrap();
        assert_eq!(buf.allocation_size(), 32);
        assert_eq!(buf.read_vec(0, 64), vec![0u8; 32]);
    }

    #[test]
    fn test_allocation_shrink_is_caller_controlled() {
        let mut buf = FileBuffer::new();
        buf.write(0, b"0123456789").unwrap();
        buf.set_allocation_size(4).unwrap();
        assert_eq!(buf.size(), 10);
        assert_eq!(buf.allocation_size(), 4);
        assert_eq!(buf.read_vec(0, 10), b"0123");
    }

    #[test]
    fn test_write_overflow_is_invalid() {
        let mut buf = FileBuffer::new();
        let err = buf.write(u64::MAX, b"ab").unwrap_err();
        assert!(matches!(err, VfsError::InvalidArgument(_)));
    }

    #[test]
    fn test_huge_allocation_fails_cleanly() {
        let mut buf = FileBuffer::new();
        let err = buf.set_allocation_size(u64::MAX).unwrap_err();
        assert!(matches!(err, VfsError::AllocationFailure { .. }));
        assert_eq!(buf.allocation_size(), 0);
    }

    #[test]
    fn test_directory_attribute_follows_kind() {
        let mut dir = VNode::directory("d");
        assert!(dir.attributes().contains(FileAttributes::DIRECTORY));
        dir.set_attributes(FileAttributes::HIDDEN);
        assert!(dir.attributes().contains(FileAttributes::DIRECTORY));
        assert!(dir.attributes().contains(FileAttributes::HIDDEN));

        let mut file = VNode::file("f", FileBuffer::new());
        assert_eq!(file.attributes(), FileAttributes::NORMAL);
        file.set_attributes(FileAttributes::DIRECTORY | FileAttributes::ARCHIVE);
        assert_eq!(file.attributes(), FileAttributes::ARCHIVE);
    }

    #[test]
    fn test_reparse_bit_tracks_data() {
        let mut file = VNode::file("link", FileBuffer::new());
        file.set_attributes(FileAttributes::REPARSE_POINT);
        assert!(!file.attributes().contains(FileAttributes::REPARSE_POINT));
        assert_eq!(file.info().reparse_tag, None);

        file.set_reparse_point(ReparsePoint {
            tag: 0xA000_000C,
            data: vec![1, 2, 3],
        });
        assert!(file.attributes().contains(FileAttributes::REPARSE_POINT));
        assert_eq!(file.info().reparse_tag, Some(0xA000_000C));

        file.clear_reparse_point();
        assert_eq!(file.attributes(), FileAttributes::NORMAL);
        assert_eq!(file.info().reparse_tag, None);
    }

    #[test]
    fn test_apply_partial() {
        let mut node = VNode::file("f", FileBuffer::new());
        node.set_times(FileTimes::all(FileTime(5)));
        node.apply(&SetAttr::new().with_last_write_time(FileTime(9)).with_mode(0o600));
        let times = node.times();
        assert_eq!(times.creation, FileTime(5));
        assert_eq!(times.last_access, FileTime(5));
        assert_eq!(times.last_write, FileTime(9));
        assert_eq!(node.mode(), 0o600);
    }
}
