use super::error::TransferError;
use super::schema::{EntryId, EntryStatus, FileHandle};
use super::store::EntryStore;
use super::transfer::{Transfer, TransferEvent};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Running,
    Done,
    Cancelled,
    Failed,
}

impl DriverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

enum Step {
    Continue,
    Finish(DriverState),
    Fail(TransferError),
}

/// Advances one entry's progress from its transfer's events until the
/// transfer completes, fails, stalls, or the entry goes away.
pub struct TransferDriver {
    id: EntryId,
    file: FileHandle,
    store: EntryStore,
    transfer: Arc<dyn Transfer>,
    cancel: CancellationToken,
    stall_timeout: Duration,
    state: DriverState,
}

impl TransferDriver {
    pub fn new(
        id: EntryId,
        file: FileHandle,
        store: EntryStore,
        transfer: Arc<dyn Transfer>,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            id,
            file,
            store,
            transfer,
            cancel: CancellationToken::new(),
            stall_timeout,
            state: DriverState::Idle,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the transfer to a terminal state.
    pub async fn run(mut self) -> DriverState {
        // Cancelled before first poll: leave the entry as it is.
        if self.cancel.is_cancelled() {
            return self.finish(DriverState::Cancelled);
        }
        self.state = DriverState::Running;
        if self.store.mark_transferring(self.id).is_err() {
            return self.finish(DriverState::Cancelled);
        }
        tracing::debug!(entry = %self.id, file = %self.file.name, "transfer started");

        // Dropping the stream on any return path stops the transfer's timers.
        let mut events = self.transfer.start(&self.file, self.cancel.child_token());
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                next = tokio::time::timeout(self.stall_timeout, events.next()) => Some(next),
            };
            let Some(next) = next else {
                return self.finish(DriverState::Cancelled);
            };

            let step = match next {
                Err(_) => Step::Fail(TransferError::Stalled(self.stall_timeout)),
                Ok(Some(TransferEvent::Progress(p))) => self.apply(u32::from(p)),
                Ok(Some(TransferEvent::Finished)) => match self.apply(100) {
                    Step::Continue => Step::Finish(DriverState::Done),
                    other => other,
                },
                Ok(Some(TransferEvent::Failed(reason))) => Step::Fail(TransferError::Failed(reason)),
                Ok(None) => self.stream_ended(),
            };

            match step {
                Step::Continue => continue,
                Step::Finish(state) => return self.finish(state),
                Step::Fail(err) => return self.fail(err),
            }
        }
    }

    fn apply(&self, percent: u32) -> Step {
        match self.store.update_progress(self.id, percent) {
            None => Step::Finish(DriverState::Cancelled),
            Some(EntryStatus::Complete) => Step::Finish(DriverState::Done),
            Some(_) => Step::Continue,
        }
    }

    fn stream_ended(&self) -> Step {
        match self.store.get(self.id) {
            None => Step::Finish(DriverState::Cancelled),
            Some(entry) if entry.status == EntryStatus::Complete => Step::Finish(DriverState::Done),
            Some(entry) => Step::Fail(TransferError::Incomplete(entry.progress)),
        }
    }

    fn fail(self, err: TransferError) -> DriverState {
        match self.store.mark_failed(self.id, err.to_string()) {
            Ok(()) => {
                tracing::warn!(entry = %self.id, file = %self.file.name, error = %err, "transfer failed");
                self.finish(DriverState::Failed)
            }
            Err(_) => self.finish(DriverState::Cancelled),
        }
    }

    fn finish(mut self, state: DriverState) -> DriverState {
        self.state = state;
        tracing::debug!(entry = %self.id, ?state, "driver finished");
        state
    }
}

struct DriverHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<DriverState>,
}

#[derive(Default)]
struct ArenaInner {
    drivers: HashMap<EntryId, DriverHandle>,
    next_generation: u64,
}

/// Live drivers keyed by entry id. At most one per entry.
#[derive(Clone, Default)]
pub struct DriverArena {
    inner: Arc<Mutex<ArenaInner>>,
}

impl DriverArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `driver` unless its entry already has a live one.
    ///
    /// The task drops its own arena slot when it finishes.
    pub fn spawn(&self, runtime: &Handle, driver: TransferDriver) -> bool {
        let id = driver.id();
        let mut inner = self.inner.lock();
        if inner
            .drivers
            .get(&id)
            .is_some_and(|handle| !handle.task.is_finished())
        {
            return false;
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        let cancel = driver.cancel_token();
        let arena = self.clone();
        let task = runtime.spawn(async move {
            let state = driver.run().await;
            arena.release(id, generation);
            state
        });
        inner.drivers.insert(
            id,
            DriverHandle {
                generation,
                cancel,
                task,
            },
        );
        true
    }

    /// Stop the driver for `id`, if any. Returns its task for awaiting.
    pub fn cancel(&self, id: EntryId) -> Option<JoinHandle<DriverState>> {
        let handle = self.inner.lock().drivers.remove(&id)?;
        handle.cancel.cancel();
        Some(handle.task)
    }

    /// Stop every driver and empty the arena.
    pub fn cancel_all(&self) -> Vec<JoinHandle<DriverState>> {
        let drained: Vec<_> = self.inner.lock().drivers.drain().collect();
        drained
            .into_iter()
            .map(|(_, handle)| {
                handle.cancel.cancel();
                handle.task
            })
            .collect()
    }

    pub fn is_running(&self, id: EntryId) -> bool {
        self.inner
            .lock()
            .drivers
            .get(&id)
            .is_some_and(|handle| !handle.task.is_finished())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, id: EntryId, generation: u64) {
        let mut inner = self.inner.lock();
        if inner
            .drivers
            .get(&id)
            .is_some_and(|handle| handle.generation == generation)
        {
            inner.drivers.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::transfer::{SimulatedTransfer, StepSchedule, TransferStream};
    use futures_util::stream;

    /// Replays fixed events, one per 100ms.
    struct ScriptedTransfer(Vec<TransferEvent>);

    impl Transfer for ScriptedTransfer {
        fn start(&self, _file: &FileHandle, _cancel: CancellationToken) -> TransferStream {
            stream::iter(self.0.clone())
                .then(|ev| async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    ev
                })
                .boxed()
        }
    }

    /// Never yields anything.
    struct HangingTransfer;

    impl Transfer for HangingTransfer {
        fn start(&self, _file: &FileHandle, _cancel: CancellationToken) -> TransferStream {
            stream::pending().boxed()
        }
    }

    fn setup(transfer: impl Transfer + 'static) -> (EntryStore, TransferDriver) {
        let store = EntryStore::default();
        let file = FileHandle::new("a.pdf", 2048);
        let id = store.add_entries(std::slice::from_ref(&file)).unwrap()[0];
        let driver = TransferDriver::new(
            id,
            file,
            store.clone(),
            Arc::new(transfer),
            Duration::from_secs(5),
        );
        (store, driver)
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_transfer_runs_to_done() {
        let (store, driver) = setup(SimulatedTransfer::with_seed(StepSchedule::default(), 3));
        let id = driver.id();
        assert_eq!(driver.state(), DriverState::Idle);

        assert_eq!(driver.run().await, DriverState::Done);
        let entry = store.get(id).unwrap();
        assert_eq!((entry.progress, entry.status), (100, EntryStatus::Complete));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_event_completes_entry() {
        let (store, driver) = setup(ScriptedTransfer(vec![
            TransferEvent::Progress(20),
            TransferEvent::Finished,
        ]));
        let id = driver.id();
        assert_eq!(driver.run().await, DriverState::Done);
        assert_eq!(store.get(id).unwrap().status, EntryStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_event_marks_entry_failed() {
        let (store, driver) = setup(ScriptedTransfer(vec![
            TransferEvent::Progress(20),
            TransferEvent::Failed("server returned 503".into()),
        ]));
        let id = driver.id();
        assert_eq!(driver.run().await, DriverState::Failed);

        let entry = store.get(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.progress, 20);
        assert_eq!(entry.error.as_deref(), Some("server returned 503"));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_ending_early_is_a_failure() {
        let (store, driver) = setup(ScriptedTransfer(vec![TransferEvent::Progress(40)]));
        let id = driver.id();
        assert_eq!(driver.run().await, DriverState::Failed);
        assert_eq!(
            store.get(id).unwrap().error.as_deref(),
            Some("transfer ended at 40% without completing")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_transfer_fails_after_timeout() {
        let (store, driver) = setup(HangingTransfer);
        let id = driver.id();
        let started = tokio::time::Instant::now();

        assert_eq!(driver.run().await, DriverState::Failed);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(store.get(id).unwrap().status, EntryStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_entry_cancels_driver() {
        let (store, driver) = setup(SimulatedTransfer::with_seed(StepSchedule::default(), 9));
        let id = driver.id();
        store.remove_entry(id).unwrap();
        assert_eq!(driver.run().await, DriverState::Cancelled);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn driver_cancelled_before_start_leaves_entry_queued() {
        let (store, driver) = setup(SimulatedTransfer::with_seed(StepSchedule::default(), 9));
        let id = driver.id();
        let revision = store.snapshot().revision;
        driver.cancel_token().cancel();

        assert_eq!(driver.run().await, DriverState::Cancelled);
        assert_eq!(store.get(id).unwrap().status, EntryStatus::Queued);
        assert_eq!(store.snapshot().revision, revision);
    }

    #[tokio::test(start_paused = true)]
    async fn arena_cancel_stops_driver_and_frees_slot() {
        let (store, driver) = setup(SimulatedTransfer::with_seed(StepSchedule::default(), 5));
        let id = driver.id();
        let arena = DriverArena::new();

        assert!(arena.spawn(&Handle::current(), driver));
        assert!(arena.is_running(id));
        tokio::time::sleep(Duration::from_millis(650)).await;
        let progress = store.get(id).unwrap().progress;
        assert!(progress > 0);

        let task = arena.cancel(id).unwrap();
        assert_eq!(task.await.unwrap(), DriverState::Cancelled);
        assert!(arena.is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.get(id).unwrap().progress, progress);
    }

    #[tokio::test(start_paused = true)]
    async fn arena_refuses_second_live_driver() {
        let (store, driver) = setup(SimulatedTransfer::with_seed(StepSchedule::default(), 5));
        let id = driver.id();
        let arena = DriverArena::new();
        let runtime = Handle::current();
        let twin = TransferDriver::new(
            id,
            FileHandle::new("a.pdf", 2048),
            store.clone(),
            Arc::new(HangingTransfer),
            Duration::from_secs(5),
        );

        assert!(arena.spawn(&runtime, driver));
        assert!(!arena.spawn(&runtime, twin));
        assert_eq!(arena.len(), 1);

        tokio::time::sleep(StepSchedule::default().worst_case_duration() + Duration::from_millis(1)).await;
        assert_eq!(store.get(id).unwrap().status, EntryStatus::Complete);
        assert!(arena.is_empty());
    }
}
