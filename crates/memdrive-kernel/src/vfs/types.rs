//! Core VFS types.
//!
//! Timestamps are opaque 64-bit ticks (100ns intervals since 1601-01-01,
//! the unit the driver callbacks use). Attribute bits follow the Windows
//! file attribute layout; POSIX mode and owner ids ride alongside for the
//! FUSE-flavored dispatchers.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use strum::{Display, EnumString};

/// Ticks between 1601-01-01 and 1970-01-01.
const UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;

/// A timestamp in 100ns ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTime(pub u64);

impl FileTime {
    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Raw tick count.
    pub fn ticks(self) -> u64 {
        self.0
    }

    /// Convert back to a `SystemTime`. Times before 1970 clamp to the Unix epoch.
    pub fn to_system_time(self) -> SystemTime {
        let since_unix = self.0.saturating_sub(UNIX_EPOCH_TICKS);
        UNIX_EPOCH + Duration::from_nanos(since_unix.saturating_mul(100))
    }
}

impl From<SystemTime> for FileTime {
    fn from(t: SystemTime) -> Self {
        let since_unix = t.duration_since(UNIX_EPOCH).unwrap_or_default();
        let ticks = u64::try_from(since_unix.as_nanos() / 100).unwrap_or(u64::MAX);
        Self(ticks.saturating_add(UNIX_EPOCH_TICKS))
    }
}

/// Node kind. Derived from the node's content, mirrored in the directory attribute bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl NodeKind {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, NodeKind::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }
}

bitflags! {
    /// File attribute bits, in the Windows layout.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct FileAttributes: u32 {
        const READONLY = 0x0000_0001;
        const HIDDEN = 0x0000_0002;
        const SYSTEM = 0x0000_0004;
        const DIRECTORY = 0x0000_0010;
        const ARCHIVE = 0x0000_0020;
        const NORMAL = 0x0000_0080;
        const REPARSE_POINT = 0x0000_0400;
    }
}

impl Default for FileAttributes {
    fn default() -> Self {
        Self::empty()
    }
}

/// The three node timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTimes {
    pub creation: FileTime,
    pub last_access: FileTime,
    pub last_write: FileTime,
}

impl FileTimes {
    /// All three stamps set to `t`.
    pub fn all(t: FileTime) -> Self {
        Self {
            creation: t,
            last_access: t,
            last_write: t,
        }
    }
}

/// Metadata returned by `get_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Entry name (empty for root).
    pub name: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Logical size. Overridden by the cache when it holds the file.
    pub size: u64,
    /// Backing-buffer capacity.
    pub allocation_size: u64,
    /// Attribute bits.
    pub attributes: FileAttributes,
    /// Timestamps.
    pub times: FileTimes,
    /// POSIX mode bits.
    pub mode: u32,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Reparse tag, present only when the reparse attribute bit is set.
    pub reparse_tag: Option<u32>,
}

impl NodeInfo {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Entry produced by directory enumeration.
///
/// Carries the attributes a driver copies out per listed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: NodeKind,
    /// Logical size, cache-overridden for files the cache holds.
    pub size: u64,
    /// Allocation size.
    pub allocation_size: u64,
    /// Attribute bits.
    pub attributes: FileAttributes,
    /// Timestamps.
    pub times: FileTimes,
    /// Reparse tag, present only when the reparse attribute bit is set.
    pub reparse_tag: Option<u32>,
}

impl From<NodeInfo> for DirEntry {
    fn from(info: NodeInfo) -> Self {
        Self {
            name: info.name,
            kind: info.kind,
            size: info.size,
            allocation_size: info.allocation_size,
            attributes: info.attributes,
            times: info.times,
            reparse_tag: info.reparse_tag,
        }
    }
}

/// Options for creating a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// POSIX mode; falls back to the drive's configured default.
    pub mode: Option<u32>,
    /// Attribute bits; the directory bit is forced to match the kind.
    pub attributes: FileAttributes,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Initial backing-buffer capacity for files.
    pub initial_allocation: u64,
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mode.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set attribute bits.
    pub fn with_attributes(mut self, attributes: FileAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set the owner ids.
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Pre-allocate the backing buffer.
    pub fn with_initial_allocation(mut self, bytes: u64) -> Self {
        self.initial_allocation = bytes;
        self
    }
}

/// Attributes to set (for `set_attributes`). `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAttr {
    /// New attribute bits (directory and reparse bits are preserved from the node).
    pub attributes: Option<FileAttributes>,
    /// New creation time.
    pub creation_time: Option<FileTime>,
    /// New access time.
    pub last_access_time: Option<FileTime>,
    /// New modification time.
    pub last_write_time: Option<FileTime>,
    /// New permissions.
    pub mode: Option<u32>,
    /// New user ID.
    pub uid: Option<u32>,
    /// New group ID.
    pub gid: Option<u32>,
}

impl SetAttr {
    /// Create a new empty SetAttr.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set attribute bits.
    pub fn with_attributes(mut self, attributes: FileAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Set the modification time.
    pub fn with_last_write_time(mut self, t: FileTime) -> Self {
        self.last_write_time = Some(t);
        self
    }

    /// Set the access time.
    pub fn with_last_access_time(mut self, t: FileTime) -> Self {
        self.last_access_time = Some(t);
        self
    }

    /// Set the creation time.
    pub fn with_creation_time(mut self, t: FileTime) -> Self {
        self.creation_time = Some(t);
        self
    }

    /// Set permissions.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the owner ids.
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }
}

/// Filesystem statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatFs {
    /// Sector (block) size.
    pub sector_size: u32,
    /// Reported volume size in bytes.
    pub total_space: u64,
    /// Bytes not consumed by sector-rounded allocations.
    pub free_space: u64,
    /// Total sectors.
    pub total_sectors: u64,
    /// Free sectors, rounded to the nearest sector.
    pub free_sectors: u64,
}
