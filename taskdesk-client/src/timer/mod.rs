//! Per-task work timer that keeps counting across restarts.

mod state;
mod ticker;
mod work_timer;

pub use state::{format_hms, seconds_key, start_key, whole_minutes, TimerPhase, TimerSnapshot, TimerState};
pub use ticker::TickHandle;
pub use work_timer::{WorkTimer, TICK_PERIOD};

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ClientError;
use crate::ids::TaskId;
use crate::store::StoreError;

/// Where finished timers report their total.
#[async_trait]
pub trait TimeRecorder: Send + Sync {
    async fn record_time(&self, task_id: &TaskId, minutes: u64) -> Result<(), ClientError>;
}

#[derive(Error, Debug)]
pub enum TimerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to record time for task {task_id}: {source}")]
    Submit {
        task_id: TaskId,
        #[source]
        source: ClientError,
    },

    #[error("Stored value for {key} is not a valid number: {value:?}")]
    CorruptState { key: String, value: String },
}
