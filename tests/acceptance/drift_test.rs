//! Long-run deadline and overrun behavior.
//!
//! # Acceptance Criteria
//!
//! - After N cycles the deadline is exactly start + N periods
//! - Work time inside a cycle never shifts later deadlines
//! - A late wake-up is reported once per missed period, never merged

use super::common::{awkward_start, plain_report, simulated_executor, BusyTask, PERIOD_NS};
use rtt_common::time::Timestamp;
use rtt_runtime::clock::{Clock, ManualClock, MonotonicClock};
use rtt_runtime::executor::{CyclicExecutor, NullTask};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 5000 cycles with a busy payload land exactly on start + 5000 periods.
#[test]
fn test_no_drift_over_5000_cycles() {
    let clock = ManualClock::starting_at(awkward_start());
    let task = BusyTask::new(&clock, 300_000);
    let mut exec = simulated_executor(&clock, task, 5);
    let start = exec.tracker().next_deadline();

    let stop = AtomicBool::new(false);
    let summary = exec.run(&stop, 5_000).expect("run failed");

    assert_eq!(summary.cycles, 5_000);
    assert_eq!(summary.overruns, 0);
    assert_eq!(summary.worst_delay_ns, Some(0));
    assert_eq!(exec.task().executed, 5_000);
    assert_eq!(
        exec.tracker().next_deadline(),
        start.plus_nanos(5_000 * PERIOD_NS)
    );
    assert_eq!(exec.tracker().next_deadline(), Timestamp::new(8, 999_999_999));
}

/// A 1.5 ms late wake-up is one overrun and the schedule does not move.
#[test]
fn test_single_late_wakeup() {
    let clock = ManualClock::starting_at(Timestamp::new(10, 0));
    let mut exec = simulated_executor(&clock, NullTask, 0);
    let start = exec.tracker().next_deadline();

    exec.step().expect("step failed");
    exec.step().expect("step failed");
    clock.delay_next_wakeup(1_500_000);
    exec.step().expect("step failed");

    let late = exec.step().expect("step failed");
    assert_eq!(late.cycle, 3);
    assert_eq!(late.sample.delay_ns, 1_500_000);
    assert!(late.classification.overrun);
    assert_eq!(late.deadline, start.plus_nanos(3 * PERIOD_NS));

    let caught_up = exec.step().expect("step failed");
    assert_eq!(caught_up.sample.delay_ns, 500_000);
    assert!(!caught_up.classification.overrun);

    let on_time = exec.step().expect("step failed");
    assert_eq!(on_time.sample.delay_ns, 0);
    assert_eq!(exec.summary().overruns, 1);

    // Overruns are reported even when periodic sampling is off.
    let out = String::from_utf8(exec.reporter().writer().clone()).expect("utf8");
    assert_eq!(out.matches("OVERRUN").count(), 1);
    assert!(out.contains("delay: 1.5000ms"));
}

/// A delay of exactly one period is on the boundary and not an overrun.
#[test]
fn test_delay_equal_to_period_is_not_overrun() {
    let clock = ManualClock::starting_at(Timestamp::new(0, 0));
    let mut exec = simulated_executor(&clock, NullTask, 0);

    exec.step().expect("step failed");
    clock.delay_next_wakeup(PERIOD_NS);
    exec.step().expect("step failed");

    let boundary = exec.step().expect("step failed");
    assert_eq!(boundary.sample.delay_ns, PERIOD_NS);
    assert!(!boundary.classification.overrun);
}

/// Sampling at 5 Hz with a 1 ms period prints every 200th cycle.
#[test]
fn test_sampling_cadence() {
    let clock = ManualClock::starting_at(Timestamp::new(0, 0));
    let mut exec = simulated_executor(&clock, NullTask, 5);

    let sampled: Vec<u64> = (0..1_000)
        .map(|_| exec.step().expect("step failed"))
        .filter(|o| o.classification.sampled)
        .map(|o| o.cycle)
        .collect();

    assert_eq!(sampled, vec![0, 200, 400, 600, 800]);
    assert_eq!(exec.reporter().rate(), 200);
}

/// Short run against the real clock: the loop sleeps, reports and stops.
#[test]
fn test_monotonic_clock_short_run() {
    let clock = MonotonicClock::new().expect("monotonic clock");
    let mut exec = CyclicExecutor::new(clock, NullTask, Vec::new(), PERIOD_NS, 0, &plain_report())
        .expect("executor setup failed");
    let start = exec.tracker().next_deadline();

    let stop = AtomicBool::new(false);
    let began = Instant::now();
    let summary = exec.run(&stop, 50).expect("run failed");
    let elapsed = began.elapsed();

    assert_eq!(summary.cycles, 50);
    assert_eq!(exec.tracker().next_deadline(), start.plus_nanos(50 * PERIOD_NS));
    // 49 absolute sleeps of one period each.
    assert!(elapsed >= Duration::from_millis(48), "elapsed {elapsed:?}");

    let now = clock.now().expect("clock read");
    assert!(now >= start.plus_nanos(49 * PERIOD_NS));
}

/// A shutdown request from another thread ends an unbounded run.
#[test]
fn test_shutdown_from_other_thread() {
    let clock = MonotonicClock::new().expect("monotonic clock");
    let mut exec = CyclicExecutor::new(clock, NullTask, Vec::new(), PERIOD_NS, 0, &plain_report())
        .expect("executor setup failed");

    let stop = Arc::new(AtomicBool::new(false));
    let stopper = {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            stop.store(true, Ordering::Relaxed);
        })
    };

    let summary = exec.run(&stop, 0).expect("run failed");
    stopper.join().expect("stopper thread panicked");

    assert!(summary.cycles >= 1);
    assert_eq!(summary.cycles, exec.tracker().advances());
}
