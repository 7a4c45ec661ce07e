use std::io;
use std::time::Duration;

/// Errors produced by archive parsing and extraction.
///
/// Variants split into two families: fatal errors that abort a run
/// ([`InvalidArchive`](ExtractError::InvalidArchive),
/// [`MemoryLimit`](ExtractError::MemoryLimit), an overall-run
/// [`StreamTimeout`](ExtractError::StreamTimeout)) and per-entry errors
/// that are downgraded to warnings while the run continues.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("corrupt entry '{name}': {reason}")]
    CorruptEntry { name: String, reason: String },

    #[error("unsupported compression method {method} for entry '{name}'")]
    UnsupportedCompression { name: String, method: u16 },

    #[error("path security violation for entry '{name}': {reason}")]
    PathSecurity { name: String, reason: String },

    #[error("entry '{name}' exceeds size limit: {size} > {limit} bytes")]
    SizeLimit { name: String, size: u64, limit: u64 },

    #[error("memory limit exceeded: {current} of {limit} bytes outstanding")]
    MemoryLimit { current: u64, limit: u64 },

    #[error("stream I/O timeout after {waited:?} (budget {budget:?}) for '{scope}'")]
    StreamTimeout {
        scope: String,
        waited: Duration,
        budget: Duration,
    },

    #[error("extraction cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ExtractError {
    /// Whether this error aborts the whole run, as opposed to being
    /// recorded as a warning for a single entry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExtractError::InvalidArchive(_)
                | ExtractError::MemoryLimit { .. }
                | ExtractError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
