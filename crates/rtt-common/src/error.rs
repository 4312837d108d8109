use thiserror::Error;

/// Tester error types covering configuration, clock access, and real-time setup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RttError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The monotonic clock could not be read or slept on.
    #[error("clock error: {0}")]
    Clock(String),

    /// Period is zero, negative, or does not fit the nanosecond range.
    #[error("invalid period: {period_ns}ns (must be > 0)")]
    InvalidPeriod {
        /// Rejected period in nanoseconds.
        period_ns: i128,
    },

    /// Real-time scheduling or memory locking failed.
    #[error("real-time setup failed: {0}")]
    Realtime(String),

    /// The measurement worker could not be spawned or joined.
    #[error("worker thread error: {0}")]
    Worker(String),
}

/// Convenience type alias for tester operations.
pub type RttResult<T> = Result<T, RttError>;
