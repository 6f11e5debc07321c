//! In-memory virtual file tree.
//!
//! Key components:
//!
//! - [`NodeStore`] - Arena owning every [`VNode`], with name-indexed and
//!   positional child lookup
//! - [`PathResolver`] - Maps absolute paths to node ids
//! - [`DirectoryEnumerator`] - Restartable listing cursor
//! - [`CacheAdapter`] - Contract for a path-keyed read/write cache, with
//!   [`BlockCache`] as the in-process implementation
//! - [`MemoryDrive`] - Path-based facade a dispatcher calls into
//!
//! ## Design Decisions
//!
//! - **Arena, not pointers**: parent and child links are [`NodeId`]s into the
//!   store, so a rename moves ids around and never reallocates a node.
//! - **Insertion order**: each directory keeps its children in creation
//!   order next to a name index; listings follow that order.
//! - **Live enumeration**: a cursor is (directory, index) and observes
//!   changes made between calls.
//! - **Case policy is configuration**: sibling names compare per
//!   [`DriveConfig::case_sensitive`](crate::DriveConfig).

pub mod cache;
mod drive;
mod enumerate;
mod error;
mod node;
mod path;
mod store;
mod types;

pub use cache::{
    BlockCache, CacheAdapter, CacheError, CacheResult, ContextToken, FlushPolicy, PurgePolicy,
};
pub use drive::{FileHandle, MemoryDrive};
pub use enumerate::{
    DirectoryEnumerator, EnumerationCursor, EnumerationState, is_exact_mask, mask_matches,
};
pub use error::{VfsError, VfsResult};
pub use node::{Children, FileBuffer, NodeContent, NodeId, ReparsePoint, SharedBuffer, VNode};
pub use path::{PathResolver, SEPARATORS};
pub use store::NodeStore;
pub use types::{
    CreateOptions, DirEntry, FileAttributes, FileTime, FileTimes, NodeInfo, NodeKind, SetAttr,
    StatFs,
};
