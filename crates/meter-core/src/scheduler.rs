//! Fixed-cadence cycle scheduler
//!
//! Enforces a minimum wall-clock interval between cycles. The next deadline
//! is anchored to the moment the caller is released, not to the previous
//! deadline: an overrunning cycle starts the next one immediately and never
//! triggers a catch-up burst, at the cost of stretching the effective period.

use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

/// Effective per-cycle interval for a source
///
/// `max(global, source)`: a source may raise the floor, never lower it.
pub fn effective_interval(global: Duration, source: Duration) -> Duration {
    global.max(source)
}

/// Drift-free minimum-interval scheduler
#[derive(Debug, Clone)]
pub struct CycleScheduler {
    min_interval: Duration,
    next_deadline: Option<Instant>,
}

impl CycleScheduler {
    /// Create a scheduler whose first cycle is already due
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_deadline: None,
        }
    }

    /// Create a scheduler running at `max(global, source)`
    pub fn for_source(global: Duration, source: Duration) -> Self {
        Self::new(effective_interval(global, source))
    }

    /// The interval enforced between cycles
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// When the next cycle becomes due (`None` before the first cycle)
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_deadline
    }

    /// Wait until the next cycle is due, then schedule the one after it
    ///
    /// Always returns `true` ("proceed"). Never blocks on the first call.
    pub async fn wait_and_advance(&mut self) -> bool {
        if let Some(deadline) = self.next_deadline
            && deadline > Instant::now()
        {
            trace!("Waiting {:?} for next cycle", deadline - Instant::now());
            sleep_until(deadline).await;
        }

        self.next_deadline = Some(Instant::now() + self.min_interval);
        true
    }
}
