use super::driver::{DriverArena, TransferDriver};
use super::error::UploadError;
use super::schema::{EntryId, EntryStatus, FileHandle, IngestReport};
use super::store::EntryStore;
use super::transfer::Transfer;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Human-readable size: largest unit with a mantissa of at least 1,
/// base 1024, at most two decimals. Sizes past 1023 GB stay in GB.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut unit = 0;
    while unit + 1 < SIZE_UNITS.len() && bytes >= 1u64 << (10 * (unit + 1)) {
        unit += 1;
    }
    let value = bytes as f64 / (1u64 << (10 * unit)) as f64;
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, SIZE_UNITS[unit])
}

/// Turns gestures' file lists into store entries and starts their drivers.
#[derive(Clone)]
pub struct Ingestor {
    store: EntryStore,
    arena: DriverArena,
    transfer: Arc<dyn Transfer>,
    runtime: Handle,
    auto_start: bool,
    stall_timeout: Duration,
}

impl Ingestor {
    pub fn new(
        store: EntryStore,
        arena: DriverArena,
        transfer: Arc<dyn Transfer>,
        runtime: Handle,
        auto_start: bool,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            store,
            arena,
            transfer,
            runtime,
            auto_start,
            stall_timeout,
        }
    }

    /// Register each file and, with auto-start on, spawn its driver.
    ///
    /// Returns immediately; drivers run in the background.
    pub fn ingest(&self, files: Vec<FileHandle>) -> IngestReport {
        let mut report = IngestReport::default();
        for file in files {
            match self.store.add_entries(std::slice::from_ref(&file)) {
                Ok(ids) => report.accepted.extend(ids),
                Err(UploadError::DuplicateRejected { name }) => {
                    tracing::warn!(file = %name, "duplicate file name rejected");
                    report.rejected.push(name);
                }
                Err(err) => {
                    tracing::warn!(file = %file.name, error = %err, "could not queue file");
                    report.rejected.push(file.name);
                }
            }
        }

        if self.auto_start {
            for &id in &report.accepted {
                self.start(id);
            }
        }
        if !report.is_empty() {
            tracing::info!(
                accepted = report.accepted.len(),
                rejected = report.rejected.len(),
                "files ingested"
            );
        }
        report
    }

    /// Spawn a driver for `id`. False if the entry is gone or already driven.
    pub fn start(&self, id: EntryId) -> bool {
        let Some(entry) = self.store.get(id) else {
            return false;
        };
        let driver = TransferDriver::new(
            id,
            entry.handle(),
            self.store.clone(),
            Arc::clone(&self.transfer),
            self.stall_timeout,
        );
        self.arena.spawn(&self.runtime, driver)
    }

    /// Start every queued entry that has no live driver.
    pub fn start_queued(&self) -> usize {
        self.store
            .list()
            .into_iter()
            .filter(|e| e.status == EntryStatus::Queued && !self.arena.is_running(e.id))
            .filter(|e| self.start(e.id))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::store::DuplicatePolicy;
    use crate::upload::transfer::{SimulatedTransfer, StepSchedule};

    fn ingestor(store: &EntryStore, arena: &DriverArena, auto_start: bool) -> Ingestor {
        Ingestor::new(
            store.clone(),
            arena.clone(),
            Arc::new(SimulatedTransfer::with_seed(StepSchedule::default(), 11)),
            Handle::current(),
            auto_start,
            Duration::from_secs(30),
        )
    }

    #[test]
    fn format_size_examples() {
        assert_eq!(format_size(0), "0 Bytes");
        assert_eq!(format_size(1), "1 Bytes");
        assert_eq!(format_size(1023), "1023 Bytes");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1_048_576), "1 MB");
        assert_eq!(format_size(1_234_567), "1.18 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3 GB");
        assert_eq!(format_size(2048 * 1024 * 1024 * 1024), "2048 GB");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_ingest_is_a_noop() {
        let store = EntryStore::default();
        let arena = DriverArena::new();
        let report = ingestor(&store, &arena, true).ingest(Vec::new());

        assert!(report.is_empty());
        assert!(store.is_empty());
        assert_eq!(store.snapshot().revision, 0);
        assert!(arena.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ingest_queues_and_starts_one_driver_per_file() {
        let store = EntryStore::default();
        let arena = DriverArena::new();
        let files = vec![FileHandle::new("empty.txt", 0), FileHandle::new("b.pdf", 9000)];
        let report = ingestor(&store, &arena, true).ingest(files);

        assert_eq!(report.accepted.len(), 2);
        assert_eq!(arena.len(), 2);
        assert_eq!(format_size(store.get(report.accepted[0]).unwrap().size_bytes), "0 Bytes");

        tokio::time::sleep(StepSchedule::default().worst_case_duration() + Duration::from_millis(1)).await;
        assert_eq!(store.summary().complete, 2);
        assert!(arena.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_are_reported_not_fatal() {
        let store = EntryStore::new(DuplicatePolicy::RejectByName);
        let arena = DriverArena::new();
        let files = vec![
            FileHandle::new("a.pdf", 1),
            FileHandle::new("a.pdf", 2),
            FileHandle::new("b.pdf", 3),
        ];
        let report = ingestor(&store, &arena, true).ingest(files);

        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.rejected, ["a.pdf"]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_start_leaves_entries_queued() {
        let store = EntryStore::default();
        let arena = DriverArena::new();
        let ingestor = ingestor(&store, &arena, false);
        ingestor.ingest(vec![FileHandle::new("a", 1), FileHandle::new("b", 2)]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.summary().queued, 2);
        assert!(arena.is_empty());

        assert_eq!(ingestor.start_queued(), 2);
        assert_eq!(ingestor.start_queued(), 0);
    }
}
