//! VFS error types.

use std::io;
use thiserror::Error;

use super::cache::CacheError;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// A path component is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Name collision on create, mkdir or a non-replacing rename.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Growing a backing buffer failed.
    #[error("allocation of {requested} bytes failed")]
    AllocationFailure { requested: u64 },

    /// Malformed path, empty name, separator inside a name, or an offset overflow.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The node carries no reparse data.
    #[error("not a reparse point: {0}")]
    NotAReparsePoint(String),

    /// Existing reparse data has a different tag than the one being set.
    #[error("reparse tag mismatch on {path}: existing {existing:#x}, requested {requested:#x}")]
    ReparseTagMismatch {
        path: String,
        existing: u32,
        requested: u32,
    },

    /// A handle was closed twice or never issued by this drive.
    #[error("stale handle: {0}")]
    StaleHandle(u64),

    /// Error reported by the cache adapter.
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create a NotAFile error.
    pub fn not_a_file(path: impl Into<String>) -> Self {
        Self::NotAFile(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a NotAReparsePoint error.
    pub fn not_a_reparse_point(path: impl Into<String>) -> Self {
        Self::NotAReparsePoint(path.into())
    }

    /// Returns true for lookup failures (missing component or a file in the middle of a path).
    pub fn is_lookup_failure(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NotADirectory(_))
    }
}

/// Convert VfsError to std::io::Error for dispatchers that speak OS error codes.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::NotAFile(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            VfsError::AllocationFailure { requested } => io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("allocation of {requested} bytes failed"),
            ),
            VfsError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::NotAReparsePoint(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            e @ VfsError::ReparseTagMismatch { .. } => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            VfsError::StaleHandle(id) => {
                io::Error::new(io::ErrorKind::InvalidInput, format!("stale handle {id}"))
            }
            VfsError::Cache(e) => io::Error::other(e),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
