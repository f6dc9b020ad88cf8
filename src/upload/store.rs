use super::error::{Result, UploadError};
use super::schema::{EntryId, EntryStatus, FileEntry, FileHandle, StoreSnapshot, StoreSummary};
use parking_lot::{Mutex, MutexGuard};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

/// What to do when a file with an already-queued name is added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Same-named files become separate rows.
    #[default]
    AllowDuplicates,
    /// Refuse a batch that repeats a queued name.
    RejectByName,
}

#[derive(Default)]
struct StoreInner {
    entries: Vec<FileEntry>,
    revision: u64,
}

impl StoreInner {
    fn position(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn entry_mut(&mut self, id: EntryId) -> Result<&mut FileEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(UploadError::NotFound(id))
    }
}

/// Ordered, in-memory collection of queued files.
///
/// Every mutation goes through one mutex and bumps the snapshot revision;
/// subscribers get the new snapshot through a watch channel.
#[derive(Clone)]
pub struct EntryStore {
    inner: Arc<Mutex<StoreInner>>,
    snapshots: Arc<watch::Sender<StoreSnapshot>>,
    policy: DuplicatePolicy,
}

impl EntryStore {
    pub fn new(policy: DuplicatePolicy) -> Self {
        let (tx, _rx) = watch::channel(StoreSnapshot::default());
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            snapshots: Arc::new(tx),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Append one Queued entry per file and return the assigned ids.
    ///
    /// Under [`DuplicatePolicy::RejectByName`] the whole batch is refused
    /// if any name is already queued or repeats inside the batch.
    pub fn add_entries(&self, files: &[FileHandle]) -> Result<Vec<EntryId>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.lock();

        if self.policy == DuplicatePolicy::RejectByName {
            Self::check_names(&inner, files)?;
        }

        let ids = files
            .iter()
            .map(|file| {
                let entry = FileEntry::queued(file);
                let id = entry.id;
                inner.entries.push(entry);
                id
            })
            .collect();
        self.publish(inner);
        Ok(ids)
    }

    /// Record progress for an entry.
    ///
    /// Returns the entry's status afterwards, or `None` if the entry no
    /// longer exists. Values are clamped to 100 and never lower the
    /// current progress; reaching 100 completes the entry. Entries that
    /// already reached a terminal status are left untouched.
    pub fn update_progress(&self, id: EntryId, percent: u32) -> Option<EntryStatus> {
        let mut inner = self.inner.lock();
        let entry = inner.entry_mut(id).ok()?;
        if entry.status.is_terminal() {
            return Some(entry.status);
        }

        let percent = percent.min(100) as u8;
        if percent <= entry.progress && entry.status == EntryStatus::Transferring {
            return Some(entry.status);
        }
        entry.progress = entry.progress.max(percent);
        entry.status = if entry.progress == 100 {
            EntryStatus::Complete
        } else {
            EntryStatus::Transferring
        };
        let status = entry.status;
        self.publish(inner);
        Some(status)
    }

    pub fn mark_transferring(&self, id: EntryId) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner.entry_mut(id)?;
        if entry.status != EntryStatus::Queued {
            return Ok(());
        }
        entry.status = EntryStatus::Transferring;
        self.publish(inner);
        Ok(())
    }

    /// Move an unfinished entry to Failed. Complete entries stay complete.
    pub fn mark_failed(&self, id: EntryId, reason: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner.entry_mut(id)?;
        if entry.status.is_terminal() {
            return Ok(());
        }
        entry.status = EntryStatus::Failed;
        entry.error = Some(reason.into());
        self.publish(inner);
        Ok(())
    }

    /// Put a failed entry back to Queued at 0%.
    pub fn reset_for_retry(&self, id: EntryId) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner.entry_mut(id)?;
        if entry.status != EntryStatus::Failed {
            return Err(UploadError::NotRetryable {
                id,
                status: entry.status,
            });
        }
        entry.status = EntryStatus::Queued;
        entry.progress = 0;
        entry.error = None;
        self.publish(inner);
        Ok(())
    }

    pub fn remove_entry(&self, id: EntryId) -> Result<FileEntry> {
        let mut inner = self.inner.lock();
        let idx = inner.position(id).ok_or(UploadError::NotFound(id))?;
        let removed = inner.entries.remove(idx);
        self.publish(inner);
        Ok(removed)
    }

    pub fn remove_at(&self, index: usize) -> Result<FileEntry> {
        let mut inner = self.inner.lock();
        if index >= inner.entries.len() {
            return Err(UploadError::NoEntryAtIndex(index));
        }
        let removed = inner.entries.remove(index);
        self.publish(inner);
        Ok(removed)
    }

    /// Remove every entry, returning the ids that were dropped.
    pub fn clear_all(&self) -> Vec<EntryId> {
        let mut inner = self.inner.lock();
        if inner.entries.is_empty() {
            return Vec::new();
        }
        let ids = inner.entries.drain(..).map(|e| e.id).collect();
        self.publish(inner);
        ids
    }

    pub fn list(&self) -> Vec<FileEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn get(&self, id: EntryId) -> Option<FileEntry> {
        let inner = self.inner.lock();
        inner.position(id).map(|idx| inner.entries[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn summary(&self) -> StoreSummary {
        let inner = self.inner.lock();
        let mut summary = StoreSummary::default();
        for entry in &inner.entries {
            match entry.status {
                EntryStatus::Queued => summary.queued += 1,
                EntryStatus::Transferring => summary.transferring += 1,
                EntryStatus::Complete => summary.complete += 1,
                EntryStatus::Cancelled => summary.cancelled += 1,
                EntryStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshots.subscribe()
    }

    // Helper: refuse names already queued or repeated within the batch.
    fn check_names(inner: &StoreInner, files: &[FileHandle]) -> Result<()> {
        let mut seen: HashSet<&str> = inner.entries.iter().map(|e| e.name.as_str()).collect();
        for file in files {
            if !seen.insert(file.name.as_str()) {
                return Err(UploadError::DuplicateRejected {
                    name: file.name.clone(),
                });
            }
        }
        Ok(())
    }

    // Bump the revision under the lock, send after releasing it so a
    // subscriber holding a borrow never blocks a store writer. Stale
    // sends lose against newer revisions.
    fn publish(&self, mut inner: MutexGuard<'_, StoreInner>) {
        inner.revision += 1;
        let snapshot = StoreSnapshot {
            revision: inner.revision,
            entries: inner.entries.clone(),
        };
        drop(inner);
        self.snapshots.send_if_modified(|current| {
            if snapshot.revision > current.revision {
                *current = snapshot;
                true
            } else {
                false
            }
        });
    }
}

impl Default for EntryStore {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}
