use super::schema::FileHandle;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Progress reported by a transfer collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Overall percent transferred so far.
    Progress(u8),
    /// All bytes delivered.
    Finished,
    Failed(String),
}

pub type TransferStream = BoxStream<'static, TransferEvent>;

/// Moves the bytes of one file somewhere.
///
/// `start` must not block; the returned stream yields progress as the
/// transfer advances and ends after the terminal event. Implementations
/// stop producing events once `cancel` fires.
pub trait Transfer: Send + Sync {
    fn start(&self, file: &FileHandle, cancel: CancellationToken) -> TransferStream;
}

/// Timing of simulated progress steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSchedule {
    pub interval: Duration,
    pub min_step: u8,
    pub max_step: u8,
}

impl Default for StepSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(300),
            min_step: 5,
            max_step: 14,
        }
    }
}

impl StepSchedule {
    /// Upper bound on the time a simulated transfer needs to reach 100%.
    pub fn worst_case_duration(&self) -> Duration {
        let steps = 100u32.div_ceil(u32::from(self.min_step.max(1)));
        self.interval * steps
    }

    /// Clamp into something the simulator can run: a non-zero interval and
    /// `1 <= min_step <= max_step <= 100`.
    pub fn normalized(self) -> Self {
        let max_step = self.max_step.clamp(1, 100);
        Self {
            interval: self.interval.max(Duration::from_millis(1)),
            min_step: self.min_step.clamp(1, max_step),
            max_step,
        }
    }
}

/// Local stand-in for a real upload: random percent steps on a timer.
///
/// Each started transfer draws its own generator from the parent one, so
/// a seeded instance produces the same step sequence per start order.
pub struct SimulatedTransfer {
    schedule: StepSchedule,
    rng: Mutex<StdRng>,
}

impl SimulatedTransfer {
    pub fn new(schedule: StepSchedule) -> Self {
        Self::from_rng(schedule, StdRng::from_os_rng())
    }

    pub fn with_seed(schedule: StepSchedule, seed: u64) -> Self {
        Self::from_rng(schedule, StdRng::seed_from_u64(seed))
    }

    /// `schedule` is [normalized](StepSchedule::normalized) first.
    pub fn from_rng(schedule: StepSchedule, rng: StdRng) -> Self {
        let normalized = schedule.normalized();
        if normalized != schedule {
            tracing::warn!(?schedule, ?normalized, "step schedule out of range, clamped");
        }
        Self {
            schedule: normalized,
            rng: Mutex::new(rng),
        }
    }

    pub fn schedule(&self) -> StepSchedule {
        self.schedule
    }
}

struct SimState {
    progress: u8,
    rng: StdRng,
    ticker: tokio::time::Interval,
    cancel: CancellationToken,
}

impl Transfer for SimulatedTransfer {
    fn start(&self, _file: &FileHandle, cancel: CancellationToken) -> TransferStream {
        let rng = StdRng::from_rng(&mut *self.rng.lock());
        let StepSchedule {
            interval,
            min_step,
            max_step,
        } = self.schedule;

        // First step lands one interval after start, not immediately.
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let state = SimState {
            progress: 0,
            rng,
            ticker,
            cancel,
        };
        stream::unfold(state, move |mut st| async move {
            if st.progress >= 100 {
                return None;
            }
            let ticked = tokio::select! {
                biased;
                _ = st.cancel.cancelled() => false,
                _ = st.ticker.tick() => true,
            };
            if !ticked {
                return None;
            }
            let step = st.rng.random_range(min_step..=max_step);
            st.progress = st.progress.saturating_add(step).min(100);
            Some((TransferEvent::Progress(st.progress), st))
        })
        .boxed()
    }
}
