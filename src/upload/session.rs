use super::drag::{DragTracker, DropTargetEvent};
use super::driver::DriverArena;
use super::error::{Result, UploadError};
use super::ingest::Ingestor;
use super::schema::{
    DragState, EntryId, EntryStatus, FileEntry, FileHandle, IngestReport, StoreSnapshot,
    StoreSummary,
};
use super::store::EntryStore;
use super::transfer::{SimulatedTransfer, Transfer};
use crate::config::UploadConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;

/// One mounted upload widget: the entry store, the drivers advancing its
/// entries, and the drop target's drag state.
///
/// All presentation intents go through this type. Dropping it stops every
/// driver; [`UploadSession::unmount`] additionally waits for them.
pub struct UploadSession {
    store: EntryStore,
    arena: DriverArena,
    ingestor: Ingestor,
    drag: Mutex<DragTracker>,
    drag_tx: watch::Sender<DragState>,
}

impl UploadSession {
    /// Mount with the simulated transfer configured by `config`.
    pub fn mount(config: &UploadConfig) -> Result<Self> {
        let schedule = config.schedule();
        let transfer = match config.seed {
            Some(seed) => SimulatedTransfer::with_seed(schedule, seed),
            None => SimulatedTransfer::new(schedule),
        };
        Self::mount_with(config, Arc::new(transfer))
    }

    /// Mount with a caller-supplied transfer collaborator.
    ///
    /// Must be called from inside a Tokio runtime; drivers are spawned on it.
    pub fn mount_with(config: &UploadConfig, transfer: Arc<dyn Transfer>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| UploadError::NoRuntime)?;
        let store = EntryStore::new(config.duplicate_policy);
        let arena = DriverArena::new();
        let ingestor = Ingestor::new(
            store.clone(),
            arena.clone(),
            transfer,
            runtime,
            config.auto_start,
            config.stall_timeout(),
        );
        let (drag_tx, _) = watch::channel(DragState::default());

        tracing::info!(
            auto_start = config.auto_start,
            policy = ?config.duplicate_policy,
            "upload session mounted"
        );
        Ok(Self {
            store,
            arena,
            ingestor,
            drag: Mutex::new(DragTracker::new()),
            drag_tx,
        })
    }

    /// Files chosen through the picker.
    pub fn ingest(&self, files: Vec<FileHandle>) -> IngestReport {
        if files.is_empty() {
            return IngestReport::default();
        }
        self.ingestor.ingest(files)
    }

    /// Remove an entry at any status and stop its driver.
    ///
    /// `NotFound` means another removal got there first; callers can
    /// ignore it.
    pub fn remove(&self, id: EntryId) -> Result<FileEntry> {
        let removed = self.store.remove_entry(id);
        self.arena.cancel(id);
        match &removed {
            Ok(entry) => tracing::debug!(entry = %id, file = %entry.name, "entry removed"),
            Err(_) => tracing::debug!(entry = %id, "entry already gone"),
        }
        removed
    }

    /// Remove by list position, as the presentation layer renders rows.
    pub fn remove_at(&self, index: usize) -> Result<FileEntry> {
        let removed = self.store.remove_at(index)?;
        self.arena.cancel(removed.id);
        tracing::debug!(entry = %removed.id, file = %removed.name, "entry removed");
        Ok(removed)
    }

    /// Drop every entry and stop every driver. Returns how many entries went.
    pub fn clear_all(&self) -> usize {
        let cleared = self.store.clear_all();
        let stopped = self.arena.cancel_all().len();
        if !cleared.is_empty() {
            tracing::info!(entries = cleared.len(), drivers = stopped, "session cleared");
        }
        cleared.len()
    }

    /// Start transfers for every entry still waiting. Returns how many started.
    pub fn submit(&self) -> usize {
        let started = self.ingestor.start_queued();
        tracing::info!(started, "submitted queued entries");
        started
    }

    /// Restart a failed entry from 0% without touching any other entry.
    pub fn retry(&self, id: EntryId) -> Result<()> {
        self.store.reset_for_retry(id)?;
        // The failed driver may still hold its slot for a moment.
        self.arena.cancel(id);
        self.ingestor.start(id);
        tracing::info!(entry = %id, "retrying transfer");
        Ok(())
    }

    pub fn drag_enter(&self, event: &mut impl DropTargetEvent) {
        self.with_drag(|tracker| tracker.on_drag_enter(event));
    }

    pub fn drag_over(&self, event: &mut impl DropTargetEvent) {
        self.with_drag(|tracker| {
            tracker.on_drag_over(event);
        });
    }

    pub fn drag_leave(&self, event: &mut impl DropTargetEvent) {
        self.with_drag(|tracker| tracker.on_drag_leave(event));
    }

    /// End the drag and ingest whatever was dropped.
    pub fn drop_files(&self, event: &mut impl DropTargetEvent) -> IngestReport {
        match self.with_drag(|tracker| tracker.on_drop(event)) {
            Some(files) => self.ingest(files),
            None => IngestReport::default(),
        }
    }

    pub fn entries(&self) -> Vec<FileEntry> {
        self.store.list()
    }

    pub fn get(&self, id: EntryId) -> Option<FileEntry> {
        self.store.get(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn summary(&self) -> StoreSummary {
        self.store.summary()
    }

    /// Failed entries as errors the presentation layer can show.
    pub fn failures(&self) -> Vec<UploadError> {
        self.store
            .list()
            .into_iter()
            .filter(|e| e.status == EntryStatus::Failed)
            .map(|e| UploadError::TransferFailed {
                id: e.id,
                reason: e.error.unwrap_or_default(),
            })
            .collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.store.subscribe()
    }

    pub fn drag_state(&self) -> watch::Receiver<DragState> {
        self.drag_tx.subscribe()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.lock().is_active()
    }

    pub fn active_drivers(&self) -> usize {
        self.arena.len()
    }

    /// Tear down: clear the store, stop all drivers and wait for them.
    pub async fn unmount(self) {
        self.store.clear_all();
        for task in self.arena.cancel_all() {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "driver task did not shut down cleanly");
            }
        }
        tracing::info!("upload session unmounted");
    }

    // Run a tracker handler and publish the flag if it changed.
    fn with_drag<T>(&self, f: impl FnOnce(&mut DragTracker) -> T) -> T {
        let (out, state) = {
            let mut tracker = self.drag.lock();
            let out = f(&mut tracker);
            (out, tracker.state())
        };
        self.drag_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        out
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        self.arena.cancel_all();
    }
}
