//! Time sources for the periodic task.
//!
//! [`Clock`] is the seam between the cycle logic and the OS: reading the
//! monotonic clock and sleeping until an absolute deadline. Two
//! implementations are provided:
//!
//! - [`MonotonicClock`]: `CLOCK_MONOTONIC` with `clock_nanosleep(TIMER_ABSTIME)`
//! - [`ManualClock`]: simulated time for deterministic testing

use rtt_common::error::{RttError, RttResult};
use rtt_common::time::Timestamp;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Reasons an absolute sleep returned before its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SleepError {
    /// A signal handler ran while the thread was asleep.
    #[error("sleep interrupted by signal")]
    Interrupted,

    /// The sleep call itself failed.
    #[error("absolute sleep failed: {0}")]
    Failed(String),
}

/// Monotonic time source with absolute sleep.
pub trait Clock {
    /// Read the current monotonic time.
    ///
    /// # Errors
    ///
    /// Returns [`RttError::Clock`] if the clock cannot be read.
    fn now(&self) -> RttResult<Timestamp>;

    /// Block the calling thread until `deadline` has been reached.
    ///
    /// Returns immediately if the deadline is already in the past.
    ///
    /// # Errors
    ///
    /// Returns a [`SleepError`] if the sleep ended early.
    fn sleep_until(&self, deadline: &Timestamp) -> Result<(), SleepError>;
}

/// The system `CLOCK_MONOTONIC`, immune to wall-clock adjustments.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    /// Probe the monotonic clock and return a handle to it.
    ///
    /// # Errors
    ///
    /// Returns [`RttError::Clock`] if `CLOCK_MONOTONIC` is unavailable.
    /// There is no periodic task without it.
    pub fn new() -> RttResult<Self> {
        let clock = Self;
        clock.now()?;
        Ok(clock)
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> RttResult<Timestamp> {
        use nix::time::{clock_gettime, ClockId};

        let ts = clock_gettime(ClockId::CLOCK_MONOTONIC)
            .map_err(|e| RttError::Clock(format!("clock_gettime(CLOCK_MONOTONIC) failed: {e}")))?;

        #[allow(clippy::useless_conversion)]
        let now = Timestamp::new(i64::from(ts.tv_sec()), i64::from(ts.tv_nsec()));
        Ok(now)
    }

    #[cfg(target_os = "linux")]
    fn sleep_until(&self, deadline: &Timestamp) -> Result<(), SleepError> {
        use nix::errno::Errno;
        use nix::sys::time::TimeSpec;
        use nix::time::{clock_nanosleep, ClockId, ClockNanosleepFlags};

        #[allow(clippy::cast_possible_truncation)]
        let request = TimeSpec::new(
            deadline.secs() as libc::time_t,
            deadline.subsec_nanos() as libc::c_long,
        );

        match clock_nanosleep(
            ClockId::CLOCK_MONOTONIC,
            ClockNanosleepFlags::TIMER_ABSTIME,
            &request,
        ) {
            Ok(_) => Ok(()),
            Err(Errno::EINTR) => Err(SleepError::Interrupted),
            Err(e) => Err(SleepError::Failed(e.to_string())),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn sleep_until(&self, deadline: &Timestamp) -> Result<(), SleepError> {
        // No absolute sleep here: derive a relative one from the current time.
        let now = self.now().map_err(|e| SleepError::Failed(e.to_string()))?;
        let remaining = deadline.nanos_since(&now);
        if remaining > 0 {
            std::thread::sleep(std::time::Duration::from_nanos(remaining.unsigned_abs()));
        }
        Ok(())
    }
}

/// Simulated monotonic clock.
///
/// Time only moves when the test says so: [`ManualClock::advance`] models
/// work inside a cycle, and [`Clock::sleep_until`] jumps straight to the
/// deadline plus any wake-up delay queued with
/// [`ManualClock::delay_next_wakeup`]. Clones share the same time, so a
/// test can keep a handle while the executor owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<ManualClockState>,
}

#[derive(Debug, Default)]
struct ManualClockState {
    /// Current time in nanoseconds.
    now_ns: AtomicI64,
    /// Lateness applied to the next wake-up only.
    pending_delay_ns: AtomicI64,
    /// Make the next sleep fail with `Interrupted`.
    interrupt_next: AtomicBool,
    /// Make the next sleep fail with `Failed`.
    fail_next_sleep: AtomicBool,
    /// Make the next clock read fail.
    fail_next_read: AtomicBool,
    /// Number of sleep calls seen.
    sleeps: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start`.
    #[must_use]
    pub fn starting_at(start: Timestamp) -> Self {
        let clock = Self::default();
        clock.set(start);
        clock
    }

    /// Jump to an absolute time.
    pub fn set(&self, ts: Timestamp) {
        self.state.now_ns.store(clamp_nanos(ts.as_nanos()), Ordering::SeqCst);
    }

    /// Let `ns` nanoseconds pass.
    pub fn advance(&self, ns: i64) {
        self.state.now_ns.fetch_add(ns, Ordering::SeqCst);
    }

    /// Wake up `ns` nanoseconds after the next requested deadline.
    pub fn delay_next_wakeup(&self, ns: i64) {
        self.state.pending_delay_ns.store(ns, Ordering::SeqCst);
    }

    /// Make the next sleep return [`SleepError::Interrupted`] without
    /// moving time.
    pub fn interrupt_next_sleep(&self) {
        self.state.interrupt_next.store(true, Ordering::SeqCst);
    }

    /// Make the next sleep return [`SleepError::Failed`] without moving
    /// time.
    pub fn fail_next_sleep(&self) {
        self.state.fail_next_sleep.store(true, Ordering::SeqCst);
    }

    /// Make the next [`Clock::now`] return [`RttError::Clock`].
    pub fn fail_next_read(&self) {
        self.state.fail_next_read.store(true, Ordering::SeqCst);
    }

    /// Number of `sleep_until` calls so far.
    #[must_use]
    pub fn sleep_count(&self) -> u64 {
        self.state.sleeps.load(Ordering::SeqCst)
    }

    /// Current simulated time.
    #[must_use]
    pub fn current(&self) -> Timestamp {
        Timestamp::from_nanos(self.state.now_ns.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> RttResult<Timestamp> {
        if self.state.fail_next_read.swap(false, Ordering::SeqCst) {
            return Err(RttError::Clock("simulated read failure".into()));
        }
        Ok(self.current())
    }

    fn sleep_until(&self, deadline: &Timestamp) -> Result<(), SleepError> {
        self.state.sleeps.fetch_add(1, Ordering::SeqCst);

        if self.state.interrupt_next.swap(false, Ordering::SeqCst) {
            return Err(SleepError::Interrupted);
        }
        if self.state.fail_next_sleep.swap(false, Ordering::SeqCst) {
            return Err(SleepError::Failed("simulated sleep failure".into()));
        }

        let target = clamp_nanos(deadline.as_nanos());
        let now = self.state.now_ns.load(Ordering::SeqCst);
        let delay = self.state.pending_delay_ns.swap(0, Ordering::SeqCst);
        self.state
            .now_ns
            .store(now.max(target).saturating_add(delay), Ordering::SeqCst);
        Ok(())
    }
}

fn clamp_nanos(ns: i128) -> i64 {
    i64::try_from(ns).unwrap_or(if ns < 0 { i64::MIN } else { i64::MAX })
}
