use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

/// A recurring task on the current tokio runtime. Dropping the handle cancels it.
#[derive(Debug)]
pub struct TickHandle {
    task: JoinHandle<()>,
}

impl TickHandle {
    /// Call `on_tick` every `period`, first after one full period.
    ///
    /// Returns `None` outside a tokio runtime; the caller then simply gets no ticks.
    pub fn spawn<F>(period: Duration, mut on_tick: F) -> Option<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime available, timer will not tick");
            return None;
        };

        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                on_tick();
            }
        });
        Some(Self { task })
    }

    pub fn cancel(self) {}
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
