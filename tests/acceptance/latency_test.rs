//! Latency acceptance tests on real hardware.
//!
//! # Requirements
//!
//! - Root privileges
//! - PREEMPT_RT kernel (highly recommended)
//!
//! # Acceptance Criteria
//!
//! - Worst wake-up delay below one period with SCHED_FIFO
//! - Zero overruns over the run

use super::common::{check_rt_prerequisites, plain_report, PERIOD_NS};
use rtt_common::config::{RealtimeConfig, SchedPolicy};
use rtt_runtime::clock::MonotonicClock;
use rtt_runtime::executor::{CyclicExecutor, NullTask, RunSummary};
use rtt_runtime::realtime::{current_scheduling, init_realtime, lock_process_memory};
use std::sync::atomic::AtomicBool;

fn run_rt(cycles: u64, realtime: RealtimeConfig) -> RunSummary {
    std::thread::spawn(move || {
        init_realtime(&realtime).expect("RT setup failed");
        let clock = MonotonicClock::new().expect("monotonic clock");
        let mut exec =
            CyclicExecutor::new(clock, NullTask, Vec::new(), PERIOD_NS, 0, &plain_report())
                .expect("executor setup failed");
        let stop = AtomicBool::new(false);
        exec.run(&stop, cycles).expect("run failed")
    })
    .join()
    .expect("worker panicked")
}

fn print_summary(label: &str, summary: &RunSummary) {
    println!("Results ({label}):");
    println!("  Cycles: {}", summary.cycles);
    println!("  Overruns: {}", summary.overruns);
    println!(
        "  Worst delay: {} µs",
        summary.worst_delay_ns.unwrap_or(0) / 1_000
    );
}

/// 10 seconds at 1 ms under SCHED_FIFO 80.
#[test]
#[ignore = "Requires root"]
fn test_latency_fifo() {
    if let Err(e) = check_rt_prerequisites() {
        eprintln!("Skipping test: {e}");
        return;
    }

    lock_process_memory().expect("mlockall failed");

    let summary = run_rt(10_000, RealtimeConfig::default());
    print_summary("SCHED_FIFO", &summary);

    assert_eq!(summary.cycles, 10_000);
    assert_eq!(summary.overruns, 0, "deadline overruns under SCHED_FIFO");
}

/// The worker reports the class it actually got.
#[test]
#[ignore = "Requires root"]
fn test_scheduling_applied() {
    if let Err(e) = check_rt_prerequisites() {
        eprintln!("Skipping test: {e}");
        return;
    }

    let realtime = RealtimeConfig {
        policy: SchedPolicy::Rr,
        priority: 42,
        fail_fast: true,
        ..Default::default()
    };

    let info = std::thread::spawn(move || {
        init_realtime(&realtime).expect("RT setup failed");
        current_scheduling()
    })
    .join()
    .expect("worker panicked");

    assert_eq!(info.policy, Some(SchedPolicy::Rr));
    assert_eq!(info.priority, 42);
}

/// Without RT the loop still runs; delays are just larger.
#[test]
fn test_latency_without_rt() {
    let realtime = RealtimeConfig {
        enabled: false,
        ..Default::default()
    };
    let summary = run_rt(100, realtime);
    print_summary("SCHED_OTHER", &summary);
    assert_eq!(summary.cycles, 100);
}
