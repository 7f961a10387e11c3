//! Fixed-period tick loop with drift correction.
//!
//! The wait after each cycle is the remainder of the period measured from the
//! cycle's start, so slow cycles shorten the following sleep instead of
//! shifting every later tick. An overrun waits zero and is not made up.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Cycles run to completion.
    pub ticks: u64,
    /// Cycles that took at least a full period.
    pub overruns: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    period: Duration,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run `cycle` once per period until `shutdown` becomes true or its
    /// sender is dropped.
    ///
    /// `cycle` receives the zero-based tick index. A cycle in flight when
    /// shutdown is signalled always completes; shutdown only interrupts the
    /// sleep between cycles.
    pub async fn run<F, Fut>(
        &self,
        mut cycle: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> SchedulerStats
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut stats = SchedulerStats::default();

        loop {
            if shutdown_requested(&shutdown) {
                break;
            }

            let started = Instant::now();
            cycle(stats.ticks).await;
            stats.ticks += 1;

            let finished = Instant::now();
            let wait = next_wait(started, finished, self.period);
            if wait.is_zero() {
                stats.overruns += 1;
                debug!(
                    "Tick {} overran the {:?} period by {:?}",
                    stats.ticks - 1,
                    self.period,
                    (finished - started).saturating_sub(self.period)
                );
            }

            let sleep = tokio::time::sleep(wait);
            tokio::pin!(sleep);
            let interrupted = loop {
                tokio::select! {
                    _ = &mut sleep => break false,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break true;
                        }
                    }
                }
            };
            if interrupted {
                break;
            }
        }

        info!(
            "Scheduler stopped after {} ticks ({} overruns)",
            stats.ticks, stats.overruns
        );
        stats
    }
}

/// Time to wait after a cycle that ran from `started` to `finished`. Never
/// negative: an overrun yields zero.
pub fn next_wait(started: Instant, finished: Instant, period: Duration) -> Duration {
    (started + period).saturating_duration_since(finished)
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
