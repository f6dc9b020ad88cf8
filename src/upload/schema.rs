use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Synthetic identity assigned to an entry at ingestion time.
///
/// Two files with the same name get distinct ids, so every store and
/// driver operation is keyed by this value and never by the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A file offered by a drop or picker gesture (not the bytes themselves).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandle {
    pub name: String,
    pub size_bytes: u64,
    /// Set when the handle was resolved from the local filesystem.
    pub path: Option<PathBuf>,
}

impl FileHandle {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Queued,
    Transferring,
    Complete,
    Cancelled,
    Failed,
}

impl EntryStatus {
    /// Whether no driver will touch an entry in this status again
    /// (short of an explicit retry).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Transferring => "transferring",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One queued file and its transfer state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: EntryId,
    pub name: String,
    pub size_bytes: u64,
    pub progress: u8,
    pub status: EntryStatus,
    pub error: Option<String>,
    pub added_at: DateTime<Utc>,
    pub path: Option<PathBuf>,
}

impl FileEntry {
    pub(crate) fn queued(file: &FileHandle) -> Self {
        Self {
            id: EntryId::new(),
            name: file.name.clone(),
            size_bytes: file.size_bytes,
            progress: 0,
            status: EntryStatus::Queued,
            error: None,
            added_at: Utc::now(),
            path: file.path.clone(),
        }
    }

    /// The handle this entry was created from, for handing to a transfer.
    pub fn handle(&self) -> FileHandle {
        FileHandle {
            name: self.name.clone(),
            size_bytes: self.size_bytes,
            path: self.path.clone(),
        }
    }
}

/// Store contents as seen by subscribers after a mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Increases by one per store mutation.
    pub revision: u64,
    pub entries: Vec<FileEntry>,
}

/// Entry counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub queued: usize,
    pub transferring: usize,
    pub complete: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl StoreSummary {
    pub fn total(&self) -> usize {
        self.queued + self.transferring + self.complete + self.cancelled + self.failed
    }

    /// True once no entry is waiting for or running a driver.
    pub fn is_settled(&self) -> bool {
        self.queued == 0 && self.transferring == 0
    }
}

/// Drop-target highlight state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DragState {
    pub is_active: bool,
}

/// Outcome of one ingestion call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: Vec<EntryId>,
    /// Names refused by the duplicate policy.
    pub rejected: Vec<String>,
}

impl IngestReport {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }
}
