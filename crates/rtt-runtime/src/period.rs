//! Absolute-deadline period tracking.
//!
//! The next deadline is only ever derived from the previous one by adding
//! exactly one period. It is never recomputed from the actual wake-up
//! time, so late wake-ups do not accumulate into drift and the long-run
//! average period stays exact.

use crate::clock::{Clock, SleepError};
use rtt_common::error::{RttError, RttResult};
use rtt_common::time::Timestamp;
use tracing::debug;

/// Period and next absolute deadline of the measured task.
#[derive(Debug, Clone)]
pub struct PeriodTracker {
    /// Fixed period in nanoseconds, > 0.
    period_ns: i64,
    /// Absolute monotonic time of the next scheduled wake-up.
    next_deadline: Timestamp,
    /// Requested console samples per second (0 = never sample).
    report_divisor: u32,
    /// Number of `advance` calls since initialization.
    advances: u64,
}

impl PeriodTracker {
    /// Start tracking from the current monotonic time.
    ///
    /// The first deadline is "now", so the first cycle measures against
    /// the instant the task started.
    ///
    /// # Errors
    ///
    /// Returns [`RttError::InvalidPeriod`] for a non-positive period and
    /// [`RttError::Clock`] if the clock cannot be read.
    pub fn initialize<C: Clock>(
        clock: &C,
        period_ns: i64,
        report_divisor: u32,
    ) -> RttResult<Self> {
        if period_ns <= 0 {
            return Err(RttError::InvalidPeriod {
                period_ns: i128::from(period_ns),
            });
        }

        let next_deadline = clock.now()?;
        debug!(period_ns, report_divisor, %next_deadline, "Period tracker initialized");

        Ok(Self {
            period_ns,
            next_deadline,
            report_divisor,
            advances: 0,
        })
    }

    /// Move the deadline forward by exactly one period.
    #[inline]
    pub fn advance(&mut self) {
        self.next_deadline.add_nanos(self.period_ns);
        self.advances += 1;
    }

    /// Sleep until the current deadline using an absolute wait.
    ///
    /// Time already spent in this cycle is absorbed automatically since
    /// the target is absolute. Early returns are reported, not retried.
    ///
    /// # Errors
    ///
    /// Returns the clock's [`SleepError`] if the sleep ended early.
    #[inline]
    pub fn sleep_until_next<C: Clock>(&self, clock: &C) -> Result<(), SleepError> {
        clock.sleep_until(&self.next_deadline)
    }

    /// Signed lateness of `now` relative to the current deadline.
    #[inline]
    #[must_use]
    pub fn lateness(&self, now: &Timestamp) -> i64 {
        now.nanos_since(&self.next_deadline)
    }

    /// Configured period in nanoseconds.
    #[must_use]
    pub fn period_ns(&self) -> i64 {
        self.period_ns
    }

    /// Next scheduled wake-up.
    #[must_use]
    pub fn next_deadline(&self) -> Timestamp {
        self.next_deadline
    }

    /// Requested console samples per second.
    #[must_use]
    pub fn report_divisor(&self) -> u32 {
        self.report_divisor
    }

    /// Number of deadlines advanced so far.
    #[must_use]
    pub fn advances(&self) -> u64 {
        self.advances
    }
}
