//! Cyclic executor for the measured periodic task.
//!
//! Each cycle:
//! 1. Read the clock at wake-up
//! 2. Compute lateness against the deadline that was just slept on
//! 3. Run the bounded task payload
//! 4. Read the clock again for the work time
//! 5. Classify and report (the only I/O in the cycle)
//! 6. Advance the deadline by one period and sleep until it (`TIMER_ABSTIME`)
//!
//! Steps 1-4 touch nothing but the clock and the task, so console speed
//! cannot leak into the measurement. Missed deadlines are never
//! coalesced: every cycle advances exactly one period, so a run of
//! overruns leaves the schedule behind wall-clock time until it catches up.

use crate::clock::{Clock, SleepError};
use crate::period::PeriodTracker;
use crate::reporter::{Classification, LatencyReporter, SampleResult};
use rtt_common::config::ReportConfig;
use rtt_common::error::RttResult;
use rtt_common::time::Timestamp;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace};

/// Bounded unit of work executed once per cycle.
pub trait CycleTask {
    /// Run the payload for cycle number `cycle` (0-based).
    fn execute(&mut self, cycle: u64);
}

/// Task with no payload; the cycle measures wake-up latency only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTask;

impl CycleTask for NullTask {
    #[inline]
    fn execute(&mut self, _cycle: u64) {}
}

/// Result of a single cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Cycle number (0-based).
    pub cycle: u64,
    /// Deadline the cycle's wake-up was measured against.
    pub deadline: Timestamp,
    /// Delay and work time.
    pub sample: SampleResult,
    /// Overrun / sampled decision.
    pub classification: Classification,
}

/// Tally of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Cycles executed.
    pub cycles: u64,
    /// Cycles whose delay exceeded one period.
    pub overruns: u64,
    /// Cycles printed on the live status line.
    pub sampled: u64,
    /// Sleeps cut short by a signal.
    pub interrupted_sleeps: u64,
    /// Sleeps that failed outright.
    pub failed_sleeps: u64,
    /// Largest wake-up delay seen.
    pub worst_delay_ns: Option<i64>,
}

/// Drives the measure / report / re-arm loop.
pub struct CyclicExecutor<C: Clock, T: CycleTask, W: Write> {
    clock: C,
    task: T,
    tracker: PeriodTracker,
    reporter: LatencyReporter<W>,
    summary: RunSummary,
    retry_interrupted: bool,
}

impl<C: Clock, T: CycleTask, W: Write> CyclicExecutor<C, T, W> {
    /// Create an executor whose first deadline is the current time.
    ///
    /// # Errors
    ///
    /// Fails if the period is invalid or the clock cannot be read.
    pub fn new(
        clock: C,
        task: T,
        out: W,
        period_ns: i64,
        report_divisor: u32,
        report: &ReportConfig,
    ) -> RttResult<Self> {
        let tracker = PeriodTracker::initialize(&clock, period_ns, report_divisor)?;
        let reporter = LatencyReporter::new(out, period_ns, report_divisor, report);

        Ok(Self {
            clock,
            task,
            tracker,
            reporter,
            summary: RunSummary::default(),
            retry_interrupted: false,
        })
    }

    /// Re-issue absolute sleeps that a signal interrupted.
    ///
    /// Off by default: an interrupted sleep falls through to the next
    /// cycle, which then reports the early (negative) or inflated delay.
    #[must_use]
    pub fn with_retry_interrupted(mut self, retry: bool) -> Self {
        self.retry_interrupted = retry;
        self
    }

    /// Measure and report one cycle without re-arming.
    ///
    /// # Errors
    ///
    /// Returns an error only if the clock cannot be read.
    pub fn run_cycle(&mut self) -> RttResult<CycleOutcome> {
        let deadline = self.tracker.next_deadline();
        let cycle = self.summary.cycles;

        let start = self.clock.now()?;
        let delay_ns = start.nanos_since(&deadline);
        self.task.execute(cycle);
        let end = self.clock.now()?;

        let sample = SampleResult {
            delay_ns,
            work_ns: end.nanos_since(&start),
        };

        let classification = self.reporter.classify(&sample);
        self.reporter.report(&sample, classification);
        self.record(&sample, classification);

        if classification.overrun {
            debug!(cycle, delay_ns, work_ns = sample.work_ns, "Period overrun");
        }

        Ok(CycleOutcome {
            cycle,
            deadline,
            sample,
            classification,
        })
    }

    /// Run one full cycle: measure, report, advance, sleep.
    ///
    /// # Errors
    ///
    /// Returns an error only if the clock cannot be read.
    pub fn step(&mut self) -> RttResult<CycleOutcome> {
        let outcome = self.run_cycle()?;
        self.tracker.advance();
        self.sleep_until_next();
        Ok(outcome)
    }

    /// Run until `shutdown` is set or `max_cycles` cycles have run
    /// (0 = no limit).
    ///
    /// The flag is checked once per cycle after the deadline has been
    /// advanced and before the sleep, so stopping never shortens the
    /// measured part of a cycle.
    ///
    /// Sleep failures never end the loop: they are counted in the
    /// summary and the next cycle runs. A failed clock read is the one
    /// exception. Without a wake-up timestamp there is no delay to
    /// report, so the loop stops and the error is returned instead of
    /// being swallowed like every other in-loop failure.
    ///
    /// # Errors
    ///
    /// Returns [`rtt_common::error::RttError::Clock`] if the clock cannot
    /// be read mid-run.
    pub fn run(&mut self, shutdown: &AtomicBool, max_cycles: u64) -> RttResult<RunSummary> {
        info!(
            period_ns = self.tracker.period_ns(),
            report_rate = self.tracker.report_divisor(),
            sample_every = self.reporter.rate(),
            max_cycles,
            "Entering cyclic loop"
        );

        loop {
            self.run_cycle()?;
            self.tracker.advance();

            if shutdown.load(Ordering::Relaxed) {
                debug!("Shutdown requested");
                break;
            }
            if max_cycles > 0 && self.summary.cycles >= max_cycles {
                debug!(cycles = self.summary.cycles, "Cycle budget reached");
                break;
            }

            self.sleep_until_next();
        }

        self.reporter.finish();

        info!(
            cycles = self.summary.cycles,
            overruns = self.summary.overruns,
            interrupted_sleeps = self.summary.interrupted_sleeps,
            worst_delay_ns = self.summary.worst_delay_ns.unwrap_or(0),
            "Cyclic loop exited"
        );

        Ok(self.summary)
    }

    fn sleep_until_next(&mut self) {
        loop {
            match self.tracker.sleep_until_next(&self.clock) {
                Ok(()) => return,
                Err(SleepError::Interrupted) => {
                    self.summary.interrupted_sleeps += 1;
                    trace!(deadline = %self.tracker.next_deadline(), "Sleep interrupted");
                    if !self.retry_interrupted {
                        return;
                    }
                }
                Err(e) => {
                    self.summary.failed_sleeps += 1;
                    debug!(error = %e, "Absolute sleep failed");
                    return;
                }
            }
        }
    }

    fn record(&mut self, sample: &SampleResult, classification: Classification) {
        self.summary.cycles += 1;
        if classification.overrun {
            self.summary.overruns += 1;
        }
        if classification.sampled {
            self.summary.sampled += 1;
        }
        self.summary.worst_delay_ns = Some(
            self.summary
                .worst_delay_ns
                .map_or(sample.delay_ns, |worst| worst.max(sample.delay_ns)),
        );
    }

    /// Period tracker state.
    pub fn tracker(&self) -> &PeriodTracker {
        &self.tracker
    }

    /// Running tally.
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Console reporter.
    pub fn reporter(&self) -> &LatencyReporter<W> {
        &self.reporter
    }

    /// The task payload.
    pub fn task(&self) -> &T {
        &self.task
    }
}
