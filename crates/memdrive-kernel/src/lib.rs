//! # memdrive-kernel
//!
//! An in-memory file tree that a virtualization driver (or any other
//! dispatcher) can serve filesystem requests from.
//!
//! The drive owns `/`. Requests arrive as paths plus arguments and return a
//! typed result:
//! - files are positional byte buffers with separate logical and allocated sizes
//! - renames are atomic moves within the tree
//! - directory listings are restartable cursors with exact-name and wildcard modes
//! - an optional path-keyed cache can take over file I/O
//!
//! ```
//! use memdrive_kernel::{CreateOptions, DriveConfig, MemoryDrive};
//!
//! let drive = MemoryDrive::new(DriveConfig::default());
//! drive.mkdir("/docs", &CreateOptions::new()).unwrap();
//! drive.create_file("/docs/readme.txt", &CreateOptions::new()).unwrap();
//! drive.write("/docs/readme.txt", 0, b"Hello, world!").unwrap();
//! assert_eq!(drive.get_info("/docs/readme.txt").unwrap().size, 13);
//! ```

pub mod config;
pub mod vfs;

pub use config::{CacheConfig, ConfigError, DriveConfig, Separator};
pub use vfs::{
    BlockCache, CacheAdapter, CacheError, ContextToken, CreateOptions, DirEntry,
    DirectoryEnumerator, FileAttributes, FileHandle, FileTime, FileTimes, FlushPolicy, MemoryDrive,
    NodeId, NodeInfo, NodeKind, NodeStore, PathResolver, PurgePolicy, SetAttr, StatFs, VfsError,
    VfsResult,
};
