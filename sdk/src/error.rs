//! Error types for the unifs SDK.

use thiserror::Error;

/// The main error type for the unifs SDK.
///
/// Single-path operations surface these kinds directly. Bulk operations
/// apply an [`OnError`](crate::fs::OnError) policy instead of failing on
/// the first path.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Path absent
    #[error("path not found: {0}")]
    NotFound(String),

    /// Would overwrite without permission
    #[error("path already exists: {0}")]
    AlreadyExists(String),

    /// Backend rejected credentials or access
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Backend does not support write
    #[error("filesystem is read-only: {0}")]
    ReadOnly(String),

    /// Needed directory absent and auto-creation disabled
    #[error("parent directory missing: {0}")]
    ParentMissing(String),

    /// Canonicalization failed
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Inverted range, or negative offsets with unknown size
    #[error("invalid byte range: {0}")]
    InvalidRange(String),

    /// Registry lookup failed
    #[error("unknown protocol: {0}")]
    ProtocolUnknown(String),

    /// Directory removal on a non-empty directory
    #[error("directory not empty: {0}")]
    NotEmpty(String),

    /// Expected a directory
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Operation the backend does not implement
    #[error("operation not supported by this filesystem: {0}")]
    Unsupported(&'static str),

    /// Commit failed; carries the paths that were already finalized
    #[error("transaction aborted after committing {} path(s)", committed.len())]
    TransactionAborted {
        committed: Vec<String>,
        #[source]
        source: Box<VfsError>,
    },

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Operation exceeded its deadline
    #[error("operation timed out")]
    Timeout,

    /// Use of a file handle after close
    #[error("file is closed")]
    Closed,

    /// IO error from the host
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (storage options, cache manifests)
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Adapter-specific failure wrapping the underlying diagnostic
    #[error("backend error: {0}")]
    Backend(String),
}

impl VfsError {
    /// True if the error means "the path is simply not there".
    ///
    /// Bulk `exists`/`ls` treat this as a normal outcome rather than a
    /// batch-aborting failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            VfsError::NotFound(_) => true,
            VfsError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Conversion for bulk `on_error = return` maps.
    ///
    /// `std::io::Error` is not `Clone`, so bulk results carry this
    /// stringified form instead of the original.
    pub fn to_returned(&self) -> VfsError {
        match self {
            VfsError::NotFound(p) => VfsError::NotFound(p.clone()),
            VfsError::AlreadyExists(p) => VfsError::AlreadyExists(p.clone()),
            VfsError::PermissionDenied(p) => VfsError::PermissionDenied(p.clone()),
            other => VfsError::Backend(other.to_string()),
        }
    }
}

/// Result type alias using the SDK error type.
pub type Result<T> = std::result::Result<T, VfsError>;

/// Map a host IO error to the taxonomy, attaching the path.
pub(crate) fn io_error_at(e: std::io::Error, path: &str) -> VfsError {
    match e.kind() {
        std::io::ErrorKind::NotFound => VfsError::NotFound(path.to_string()),
        std::io::ErrorKind::PermissionDenied => VfsError::PermissionDenied(path.to_string()),
        std::io::ErrorKind::AlreadyExists => VfsError::AlreadyExists(path.to_string()),
        _ => VfsError::Io(e),
    }
}
