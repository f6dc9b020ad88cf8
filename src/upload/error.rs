use super::schema::{EntryId, EntryStatus};
use std::time::Duration;
use thiserror::Error;

/// Per-entry failures. None of these are fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// The entry is gone, usually because a removal raced this call.
    #[error("no entry with id {0}")]
    NotFound(EntryId),

    #[error("no entry at index {0}")]
    NoEntryAtIndex(usize),

    #[error("a file named {name:?} is already queued")]
    DuplicateRejected { name: String },

    #[error("transfer of entry {id} failed: {reason}")]
    TransferFailed { id: EntryId, reason: String },

    #[error("entry {id} is {status}, only failed entries can be retried")]
    NotRetryable { id: EntryId, status: EntryStatus },

    #[error("upload session must be mounted inside a Tokio runtime")]
    NoRuntime,
}

/// Errors reported by a transfer collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("{0}")]
    Failed(String),

    #[error("no progress for {0:?}")]
    Stalled(Duration),

    #[error("transfer ended at {0}% without completing")]
    Incomplete(u8),
}

pub type Result<T, E = UploadError> = std::result::Result<T, E>;
