//! Recurring Schedule
//!
//! Fixed-period trigger for background jobs. With wall-clock alignment an
//! hourly period fires at the top of every hour; without it the first tick
//! comes one period after creation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Deadline used when `now + period` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A recurring trigger.
#[derive(Debug)]
pub struct RecurringSchedule {
    period: Duration,
    align_to_wall_clock: bool,
    next_deadline: Instant,
    fired: bool,
}

impl RecurringSchedule {
    /// Create a schedule. A zero period is raised to one millisecond.
    #[must_use]
    pub fn new(period: Duration, align_to_wall_clock: bool) -> Self {
        let period = period.max(Duration::from_millis(1));
        Self {
            period,
            align_to_wall_clock,
            next_deadline: deadline_after(Instant::now(), period),
            fired: false,
        }
    }

    /// Configured period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Whether ticks land on wall-clock multiples of the period.
    #[must_use]
    pub const fn is_aligned(&self) -> bool {
        self.align_to_wall_clock
    }

    /// Wait for the next tick.
    pub async fn tick(&mut self) {
        if self.align_to_wall_clock {
            tokio::time::sleep(self.aligned_delay(Utc::now())).await;
            self.fired = true;
            return;
        }

        tokio::time::sleep_until(self.next_deadline).await;
        let now = Instant::now();
        self.next_deadline = deadline_after(self.next_deadline, self.period);
        if self.next_deadline <= now {
            // Fell behind by more than a period; skip missed ticks.
            self.next_deadline = deadline_after(now, self.period);
        }
        self.fired = true;
    }

    /// The first wait always targets the upcoming boundary; later waits skip
    /// one that is too close to be distinct from the boundary just fired.
    fn aligned_delay(&self, now: DateTime<Utc>) -> Duration {
        if self.fired {
            next_boundary_delay(now, self.period)
        } else {
            until_boundary(now, self.period)
        }
    }
}

fn deadline_after(from: Instant, period: Duration) -> Instant {
    from.checked_add(period)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

fn until_boundary(now: DateTime<Utc>, period: Duration) -> Duration {
    let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX).max(1);
    let elapsed = now.timestamp_millis().rem_euclid(period_ms);
    Duration::from_millis(u64::try_from(period_ms - elapsed).unwrap_or(0))
}

/// Time from `now` until the next wall-clock multiple of `period` since the
/// Unix epoch.
///
/// A boundary closer than a tenth of the period is skipped, so a wake-up
/// that lands a hair early does not fire twice for the same boundary.
#[must_use]
pub fn next_boundary_delay(now: DateTime<Utc>, period: Duration) -> Duration {
    let delay = until_boundary(now, period);
    if delay < period / 10 {
        delay.saturating_add(period)
    } else {
        delay
    }
}
