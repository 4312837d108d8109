//! Monotonic timestamps split into seconds and sub-second nanoseconds.
//!
//! Mirrors the kernel's `timespec` layout so a deadline can be handed to
//! `clock_nanosleep(TIMER_ABSTIME)` without any conversion loss. The
//! sub-second component is kept in `[0, NANOS_PER_SEC)` after every
//! operation.

use std::fmt;

/// Nanoseconds in one second.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Absolute point on the monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    secs: i64,
    nanos: i64,
}

impl Timestamp {
    /// Create a timestamp, carrying any out-of-range nanoseconds into seconds.
    #[must_use]
    pub fn new(secs: i64, nanos: i64) -> Self {
        let mut ts = Self { secs, nanos: 0 };
        ts.add_nanos(nanos);
        ts
    }

    /// Create a timestamp from a total nanosecond count.
    #[must_use]
    pub fn from_nanos(total: i64) -> Self {
        Self {
            secs: total.div_euclid(NANOS_PER_SEC),
            nanos: total.rem_euclid(NANOS_PER_SEC),
        }
    }

    /// Whole seconds.
    #[must_use]
    pub fn secs(&self) -> i64 {
        self.secs
    }

    /// Sub-second nanoseconds, always in `[0, NANOS_PER_SEC)`.
    #[must_use]
    pub fn subsec_nanos(&self) -> i64 {
        self.nanos
    }

    /// Total nanoseconds represented by this timestamp.
    #[must_use]
    pub fn as_nanos(&self) -> i128 {
        i128::from(self.secs) * i128::from(NANOS_PER_SEC) + i128::from(self.nanos)
    }

    /// Add a signed nanosecond offset in place.
    ///
    /// Whole seconds are moved into the seconds field up front, so the
    /// sub-second sum can exceed the range by at most one second and the
    /// carry loop below runs at most once. The result is exact: no
    /// rounding, no dependence on the current time.
    pub fn add_nanos(&mut self, delta: i64) {
        self.secs = self.secs.saturating_add(delta / NANOS_PER_SEC);
        self.nanos += delta % NANOS_PER_SEC;

        while self.nanos >= NANOS_PER_SEC {
            self.secs = self.secs.saturating_add(1);
            self.nanos -= NANOS_PER_SEC;
        }
        while self.nanos < 0 {
            self.secs = self.secs.saturating_sub(1);
            self.nanos += NANOS_PER_SEC;
        }
    }

    /// Return a copy advanced by `delta` nanoseconds.
    #[must_use]
    pub fn plus_nanos(self, delta: i64) -> Self {
        let mut ts = self;
        ts.add_nanos(delta);
        ts
    }

    /// Signed nanoseconds from `earlier` to `self`.
    ///
    /// Negative when `self` precedes `earlier`. Saturates at the `i64`
    /// range, which is roughly 292 years either way.
    #[must_use]
    pub fn nanos_since(&self, earlier: &Timestamp) -> i64 {
        let diff = self.as_nanos() - earlier.as_nanos();
        i64::try_from(diff).unwrap_or(if diff < 0 { i64::MIN } else { i64::MAX })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}
