use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::state::{format_hms, whole_minutes, TimerPhase, TimerSnapshot, TimerState};
use super::ticker::TickHandle;
use super::{TimeRecorder, TimerError};
use crate::clock::Clock;
use crate::ids::TaskId;
use crate::store::DurableStore;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Stopwatch for one task.
///
/// Every transition is persisted before it takes effect in memory, so a
/// timer left running keeps counting across crashes and restarts: the next
/// [`WorkTimer::restore`] folds the gap in and resumes. While running, a
/// one-second tick publishes a fresh [`TimerSnapshot`] to subscribers.
///
/// Two processes driving the same task share its keys; the last write wins.
pub struct WorkTimer {
    task_id: TaskId,
    state: TimerState,
    store: Arc<dyn DurableStore>,
    recorder: Arc<dyn TimeRecorder>,
    clock: Arc<dyn Clock>,
    ticker: Option<TickHandle>,
    snapshots: Arc<watch::Sender<TimerSnapshot>>,
}

impl WorkTimer {
    /// Load the timer for `task_id`, resuming it if it was left running.
    pub fn restore(
        task_id: TaskId,
        store: Arc<dyn DurableStore>,
        recorder: Arc<dyn TimeRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TimerError> {
        let state = TimerState::load(store.as_ref(), &task_id)?;
        let (snapshots, _) = watch::channel(state.snapshot(clock.now_millis()));

        let mut timer = Self {
            task_id,
            state,
            store,
            recorder,
            clock,
            ticker: None,
            snapshots: Arc::new(snapshots),
        };

        if timer.state.is_running() {
            info!(
                task_id = %timer.task_id,
                elapsed = %timer.display(),
                "Resuming timer left running"
            );
            timer.start_ticking();
        }
        Ok(timer)
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn phase(&self) -> TimerPhase {
        self.state.phase()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.state.elapsed_seconds(self.clock.now_millis())
    }

    /// Elapsed time as HH:MM:SS.
    pub fn display(&self) -> String {
        format_hms(self.elapsed_seconds())
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.state.snapshot(self.clock.now_millis())
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn start(&mut self) -> Result<(), TimerError> {
        if self.state.is_running() {
            debug!(task_id = %self.task_id, "Timer already running");
            return Ok(());
        }

        let next = self.state.started(self.clock.now_millis());
        next.save(self.store.as_ref(), &self.task_id)?;
        self.state = next;
        self.start_ticking();
        self.publish();

        info!(task_id = %self.task_id, accumulated = self.state.accumulated_seconds, "Timer started");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), TimerError> {
        if !self.state.is_running() {
            debug!(task_id = %self.task_id, "Timer already paused");
            return Ok(());
        }

        let next = self.state.paused(self.clock.now_millis());
        next.save(self.store.as_ref(), &self.task_id)?;
        self.state = next;
        self.stop_ticking();
        self.publish();

        info!(task_id = %self.task_id, accumulated = self.state.accumulated_seconds, "Timer paused");
        Ok(())
    }

    /// Report the total in whole minutes, then reset and clear the stored keys.
    ///
    /// If reporting fails nothing is changed, so finishing can be retried.
    /// Returns the minutes recorded.
    pub async fn finish(&mut self) -> Result<u64, TimerError> {
        let total_seconds = self.elapsed_seconds();
        let minutes = whole_minutes(total_seconds);

        if let Err(source) = self.recorder.record_time(&self.task_id, minutes).await {
            warn!(task_id = %self.task_id, error = %source, "Failed to record time, timer kept");
            return Err(TimerError::Submit {
                task_id: self.task_id.clone(),
                source,
            });
        }

        self.reset()?;
        info!(task_id = %self.task_id, total_seconds, minutes, "Timer finished");
        Ok(minutes)
    }

    /// Reset without reporting anything.
    pub fn discard(&mut self) -> Result<(), TimerError> {
        self.reset()?;
        info!(task_id = %self.task_id, "Timer discarded");
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TimerError> {
        self.stop_ticking();
        self.state = TimerState::default();
        self.publish();
        TimerState::clear(self.store.as_ref(), &self.task_id)?;
        Ok(())
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    fn start_ticking(&mut self) {
        let state = self.state;
        let clock = self.clock.clone();
        let snapshots = self.snapshots.clone();
        self.ticker = TickHandle::spawn(TICK_PERIOD, move || {
            snapshots.send_replace(state.snapshot(clock.now_millis()));
        });
    }

    fn stop_ticking(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }
}
