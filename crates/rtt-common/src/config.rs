//! Configuration structures for the RT tester.
//!
//! Supports TOML deserialization with defaults that match the classic
//! 1 ms / 5 Hz measurement setup, so an empty file is a valid config.

use crate::error::{RttError, RttResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level tester configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TesterConfig {
    /// Wake-up period of the measured task.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Console refresh rate in samples per second (0 = overruns only).
    pub report_rate: u32,

    /// Stop after this many cycles (0 = run until signalled).
    pub max_cycles: u64,

    /// Stop after roughly this much wall time; converted to a cycle budget.
    #[serde(with = "humantime_serde::option", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,

    /// Real-time configuration.
    pub realtime: RealtimeConfig,

    /// Console report configuration.
    pub report: ReportConfig,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(1),
            report_rate: 5,
            max_cycles: 0,
            duration: None,
            realtime: RealtimeConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

/// Real-time scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Request real-time scheduling for the worker (requires privileges).
    pub enabled: bool,

    /// Scheduler policy: "fifo", "rr" (round-robin) or "other".
    pub policy: SchedPolicy,

    /// Scheduler priority (1-99 for RT policies).
    pub priority: u8,

    /// CPU affinity for the worker thread.
    #[serde(skip_serializing_if = "CpuAffinity::is_none")]
    pub cpu_affinity: CpuAffinity,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,

    /// Pre-fault stack size in bytes.
    pub prefault_stack_size: usize,

    /// Worker thread stack size in bytes (platform default when unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,

    /// Fail immediately at startup if RT requirements cannot be met.
    pub fail_fast: bool,

    /// Re-issue an absolute sleep that a signal cut short.
    pub retry_interrupted_sleep: bool,
}

impl RealtimeConfig {
    /// Largest pre-fault the worker stack can take: half of `stack_size`,
    /// unbounded when the platform default stack is used.
    #[must_use]
    pub fn max_prefault(&self) -> usize {
        self.stack_size.map_or(usize::MAX, |size| size / 2)
    }

    /// Pre-fault size actually applied to the worker stack.
    #[must_use]
    pub fn effective_prefault(&self) -> usize {
        self.prefault_stack_size.min(self.max_prefault())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: SchedPolicy::Fifo,
            priority: 80,
            cpu_affinity: CpuAffinity::None,
            lock_memory: true,
            prefault_stack_size: 512 * 1024,
            stack_size: None,
            fail_fast: false,
            retry_interrupted_sleep: false,
        }
    }
}

/// Console report configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Highlight overrun lines with ANSI color.
    pub color: bool,

    /// Prefix each line with the local time of day.
    pub timestamps: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            color: true,
            timestamps: true,
        }
    }
}

/// Scheduler policy for the measurement thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: First-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: Round-robin real-time.
    Rr,
    /// SCHED_OTHER: Normal time-sharing (non-RT).
    Other,
}

impl SchedPolicy {
    /// Whether this is a fixed-priority real-time class.
    #[must_use]
    pub fn is_realtime(self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo => write!(f, "SCHED_FIFO"),
            Self::Rr => write!(f, "SCHED_RR"),
            Self::Other => write!(f, "SCHED_OTHER"),
        }
    }
}

impl std::str::FromStr for SchedPolicy {
    type Err = RttError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" | "sched_fifo" => Ok(Self::Fifo),
            "rr" | "sched_rr" => Ok(Self::Rr),
            "other" | "sched_other" => Ok(Self::Other),
            _ => Err(RttError::Config(format!(
                "unknown scheduler policy '{s}' (expected fifo, rr or other)"
            ))),
        }
    }
}

/// CPU affinity specification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CpuAffinity {
    /// No affinity set (OS chooses).
    #[default]
    None,
    /// Pin to a single CPU core.
    Single(usize),
    /// Pin to a set of CPU cores.
    Set(Vec<usize>),
}

impl CpuAffinity {
    /// Whether no pinning was requested.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None) || matches!(self, Self::Set(cpus) if cpus.is_empty())
    }
}

impl Serialize for CpuAffinity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            CpuAffinity::None => serializer.serialize_none(),
            CpuAffinity::Single(cpu) => serializer.serialize_u64(*cpu as u64),
            CpuAffinity::Set(cpus) => cpus.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CpuAffinity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct CpuAffinityVisitor;

        impl<'de> Visitor<'de> for CpuAffinityVisitor {
            type Value = CpuAffinity;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("null, an integer, or an array of integers")
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                usize::try_from(value)
                    .map(CpuAffinity::Single)
                    .map_err(|_| de::Error::custom("CPU index out of range"))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                usize::try_from(value)
                    .map(CpuAffinity::Single)
                    .map_err(|_| de::Error::custom("CPU index cannot be negative"))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut cpus = Vec::new();
                while let Some(cpu) = seq.next_element::<usize>()? {
                    cpus.push(cpu);
                }
                Ok(CpuAffinity::Set(cpus))
            }
        }

        deserializer.deserialize_any(CpuAffinityVisitor)
    }
}

impl TesterConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Period as signed nanoseconds, the unit the period tracker works in.
    ///
    /// # Errors
    ///
    /// Returns [`RttError::InvalidPeriod`] for a zero period or one that
    /// does not fit in `i64` nanoseconds.
    pub fn period_ns(&self) -> RttResult<i64> {
        period_to_nanos(self.period)
    }

    /// Number of cycles to run, combining `max_cycles` and `duration`.
    ///
    /// Returns 0 for an unbounded run. When both limits are set the
    /// smaller one wins.
    #[must_use]
    pub fn cycle_budget(&self) -> u64 {
        let from_duration = match (self.duration, self.period.as_nanos()) {
            (Some(d), p) if p > 0 => {
                u64::try_from(d.as_nanos() / p).unwrap_or(u64::MAX).max(1)
            }
            _ => 0,
        };

        match (self.max_cycles, from_duration) {
            (0, d) => d,
            (m, 0) => m,
            (m, d) => m.min(d),
        }
    }

    /// Check value ranges that TOML or the command line cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> RttResult<()> {
        self.period_ns()?;

        if self.realtime.policy.is_realtime() && !(1..=99).contains(&self.realtime.priority) {
            return Err(RttError::Config(format!(
                "priority {} out of range 1-99 for {}",
                self.realtime.priority, self.realtime.policy
            )));
        }

        if let Some(stack_size) = self.realtime.stack_size {
            if stack_size == 0 {
                return Err(RttError::Config("stack_size must be non-zero".into()));
            }
            if self.realtime.enabled
                && self.realtime.prefault_stack_size > self.realtime.max_prefault()
            {
                return Err(RttError::Config(format!(
                    "prefault_stack_size {} must be at most half of stack_size {stack_size}",
                    self.realtime.prefault_stack_size
                )));
            }
        }

        Ok(())
    }
}

/// Convert a period to signed nanoseconds, rejecting zero and overflow.
///
/// # Errors
///
/// Returns [`RttError::InvalidPeriod`] when the period is unusable.
pub fn period_to_nanos(period: Duration) -> RttResult<i64> {
    let ns = period.as_nanos();
    match i64::try_from(ns) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(RttError::InvalidPeriod {
            period_ns: i128::try_from(ns).unwrap_or(i128::MAX),
        }),
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = Option::<String>::deserialize(deserializer)?;
            s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
