//! Common utilities for integration tests.
//!
//! Provides helpers for:
//! - Checking real-time prerequisites (PREEMPT_RT, privileges)
//! - Building executors on a simulated clock
//! - Task payloads that consume simulated time

use rtt_common::config::ReportConfig;
use rtt_common::time::Timestamp;
use rtt_runtime::clock::ManualClock;
use rtt_runtime::executor::{CycleTask, CyclicExecutor};
use std::fs;

/// 1 ms, the default period.
pub const PERIOD_NS: i64 = 1_000_000;

/// Check if the system has PREEMPT_RT kernel.
pub fn has_preempt_rt() -> bool {
    if let Ok(version) = fs::read_to_string("/proc/version") {
        version.contains("PREEMPT_RT") || version.contains("PREEMPT RT")
    } else {
        false
    }
}

/// Check if running as root (required for RT priority).
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Check all prerequisites for RT acceptance tests.
pub fn check_rt_prerequisites() -> Result<(), String> {
    if !is_root() {
        return Err("RT acceptance tests require root privileges".into());
    }

    if !has_preempt_rt() {
        eprintln!("Warning: PREEMPT_RT kernel not detected. Results may not meet targets.");
    }

    Ok(())
}

/// Report settings with no color and no wall-clock prefix, so output is
/// deterministic.
pub fn plain_report() -> ReportConfig {
    ReportConfig {
        color: false,
        timestamps: false,
    }
}

/// Task that consumes a fixed slice of simulated time per cycle.
#[derive(Debug)]
pub struct BusyTask {
    pub clock: ManualClock,
    pub work_ns: i64,
    pub executed: u64,
}

impl BusyTask {
    pub fn new(clock: &ManualClock, work_ns: i64) -> Self {
        Self {
            clock: clock.clone(),
            work_ns,
            executed: 0,
        }
    }
}

impl CycleTask for BusyTask {
    fn execute(&mut self, _cycle: u64) {
        self.clock.advance(self.work_ns);
        self.executed += 1;
    }
}

/// Executor on a simulated clock that captures its output.
pub fn simulated_executor<T: CycleTask>(
    clock: &ManualClock,
    task: T,
    report_divisor: u32,
) -> CyclicExecutor<ManualClock, T, Vec<u8>> {
    CyclicExecutor::new(
        clock.clone(),
        task,
        Vec::new(),
        PERIOD_NS,
        report_divisor,
        &plain_report(),
    )
    .expect("executor setup failed")
}

/// A start time just short of a second boundary, so nanosecond
/// normalization is exercised from the first cycle.
pub fn awkward_start() -> Timestamp {
    Timestamp::new(3, 999_999_999)
}
