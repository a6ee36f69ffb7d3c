use std::time::Duration;

use tokio::task::JoinHandle;

/// A spawned timer that is aborted when dropped.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `f` once after `delay`.
    pub fn after<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        });
        Self { handle }
    }

    /// Abort the timer. A callback that has not run yet never will.
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Synchronized pre-race countdown.
///
/// Calls `on_tick(ticks)` immediately, then once per `period` with the
/// remaining count down to 1, then `on_go()` one period after the last tick.
/// Cancelling (or dropping) suppresses every callback that has not run yet.
#[derive(Debug)]
pub struct Countdown {
    task: ScheduledTask,
}

impl Countdown {
    pub fn start<T, G>(ticks: u32, period: Duration, mut on_tick: T, on_go: G) -> Self
    where
        T: FnMut(u32) + Send + 'static,
        G: FnOnce() + Send + 'static,
    {
        // interval() panics on a zero period
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            for remaining in (1..=ticks).rev() {
                interval.tick().await;
                on_tick(remaining);
            }
            interval.tick().await;
            on_go();
        });
        Self {
            task: ScheduledTask { handle },
        }
    }

    pub fn cancel(self) {
        self.task.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
