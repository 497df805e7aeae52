use std::fmt;

use super::TimerError;
use crate::ids::TaskId;
use crate::store::{DurableStore, StoreError};

/// Store key holding the epoch millis of the current run. Present only while running.
pub fn start_key(task_id: &TaskId) -> String {
    format!("timer_start_{}", task_id)
}

/// Store key holding the seconds accumulated by earlier runs.
pub fn seconds_key(task_id: &TaskId) -> String {
    format!("timer_seconds_{}", task_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Running,
}

/// Persisted state of one task's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerState {
    pub accumulated_seconds: u64,
    pub run_start_epoch_millis: Option<i64>,
}

impl TimerState {
    pub fn phase(&self) -> TimerPhase {
        match self.run_start_epoch_millis {
            Some(_) => TimerPhase::Running,
            None => TimerPhase::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_start_epoch_millis.is_some()
    }

    /// Total seconds at `now_millis`. A run that starts in the future
    /// (clock moved backwards) counts as zero. Saturates instead of
    /// overflowing on out-of-range stored values.
    pub fn elapsed_seconds(&self, now_millis: i64) -> u64 {
        let running = self
            .run_start_epoch_millis
            .map(|start| now_millis.saturating_sub(start).max(0) as u64 / 1000)
            .unwrap_or(0);
        self.accumulated_seconds.saturating_add(running)
    }

    pub fn started(self, now_millis: i64) -> Self {
        Self {
            run_start_epoch_millis: Some(now_millis),
            ..self
        }
    }

    /// Fold the current run into the accumulated total.
    pub fn paused(self, now_millis: i64) -> Self {
        Self {
            accumulated_seconds: self.elapsed_seconds(now_millis),
            run_start_epoch_millis: None,
        }
    }

    pub fn snapshot(&self, now_millis: i64) -> TimerSnapshot {
        TimerSnapshot {
            phase: self.phase(),
            elapsed_seconds: self.elapsed_seconds(now_millis),
        }
    }

    pub fn load(store: &dyn DurableStore, task_id: &TaskId) -> Result<Self, TimerError> {
        let accumulated_seconds = read_number::<u64>(store, &seconds_key(task_id))?.unwrap_or(0);
        let run_start_epoch_millis = read_number::<i64>(store, &start_key(task_id))?;
        Ok(Self {
            accumulated_seconds,
            run_start_epoch_millis,
        })
    }

    /// Write both keys, seconds first: a crash in between can count a run
    /// twice but never drops one.
    pub fn save(&self, store: &dyn DurableStore, task_id: &TaskId) -> Result<(), StoreError> {
        store.set(&seconds_key(task_id), &self.accumulated_seconds.to_string())?;
        match self.run_start_epoch_millis {
            Some(start) => store.set(&start_key(task_id), &start.to_string()),
            None => store.delete(&start_key(task_id)),
        }
    }

    pub fn clear(store: &dyn DurableStore, task_id: &TaskId) -> Result<(), StoreError> {
        store.delete(&start_key(task_id))?;
        store.delete(&seconds_key(task_id))
    }
}

fn read_number<N: std::str::FromStr>(
    store: &dyn DurableStore,
    key: &str,
) -> Result<Option<N>, TimerError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    let parsed = raw.trim().parse::<N>();
    parsed.map(Some).map_err(|_| TimerError::CorruptState {
        key: key.to_string(),
        value: raw,
    })
}

/// What a display needs to render the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub phase: TimerPhase,
    pub elapsed_seconds: u64,
}

impl fmt::Display for TimerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_hms(self.elapsed_seconds))
    }
}

/// Format seconds as HH:MM:SS. Hours are not wrapped at 24.
pub fn format_hms(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Minutes reported to the backend; always truncated.
pub fn whole_minutes(total_seconds: u64) -> u64 {
    total_seconds / 60
}
