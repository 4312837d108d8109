//! Per-cycle latency classification and the live console report.
//!
//! Routine samples overwrite a single status line; overruns are printed
//! on their own line (in red when color is enabled) so they stay in the
//! scrollback. Output is best effort: write errors never reach the cycle.

use rtt_common::config::ReportConfig;
use rtt_common::time::NANOS_PER_SEC;
use std::io::Write;

/// Erase the current terminal line and return the cursor to column 0.
pub const CLEAR_LINE: &str = "\x1b[2K\r";
/// ANSI red foreground.
pub const RED: &str = "\x1b[31m";
/// ANSI attribute reset.
pub const RESET: &str = "\x1b[0m";

/// Measurements taken during one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleResult {
    /// Wake-up time minus scheduled deadline; may be negative.
    pub delay_ns: i64,
    /// Time spent on the cycle's work.
    pub work_ns: i64,
}

/// Reporting decision for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    /// The wake-up was more than one full period late.
    pub overrun: bool,
    /// This cycle is picked for the live status line.
    pub sampled: bool,
}

/// Cycles between sampled reports: one second of periods split into
/// `report_divisor` slices.
///
/// Returns 0 ("never sample") when the divisor is 0, the period is not
/// positive, the product overflows, or the period times the divisor
/// exceeds one second.
#[must_use]
pub fn sample_rate(period_ns: i64, report_divisor: u32) -> u64 {
    if report_divisor == 0 || period_ns <= 0 {
        return 0;
    }

    period_ns
        .checked_mul(i64::from(report_divisor))
        .and_then(|slice| u64::try_from(NANOS_PER_SEC / slice).ok())
        .unwrap_or(0)
}

/// Classify a sample.
///
/// The overrun boundary is exclusive: a delay of exactly one period is
/// still on time. A `rate` of 0 never samples.
#[inline]
#[must_use]
pub fn classify(sample: &SampleResult, period_ns: i64, rate: u64, cycle: u64) -> Classification {
    Classification {
        overrun: sample.delay_ns > period_ns,
        sampled: rate != 0 && cycle % rate == 0,
    }
}

/// Console reporter owning the cycle counter used for sampling.
#[derive(Debug)]
pub struct LatencyReporter<W: Write> {
    out: W,
    period_ns: i64,
    rate: u64,
    cycle: u64,
    color: bool,
    timestamps: bool,
    /// A routine line is on screen without a trailing newline.
    line_open: bool,
}

impl<W: Write> LatencyReporter<W> {
    /// Create a reporter, deriving the sample rate once.
    pub fn new(out: W, period_ns: i64, report_divisor: u32, config: &ReportConfig) -> Self {
        Self {
            out,
            period_ns,
            rate: sample_rate(period_ns, report_divisor),
            cycle: 0,
            color: config.color,
            timestamps: config.timestamps,
            line_open: false,
        }
    }

    /// Classify the next cycle's sample and bump the cycle counter.
    #[inline]
    pub fn classify(&mut self, sample: &SampleResult) -> Classification {
        let result = classify(sample, self.period_ns, self.rate, self.cycle);
        self.cycle = self.cycle.wrapping_add(1);
        result
    }

    /// Print the sample if the classification calls for it.
    pub fn report(&mut self, sample: &SampleResult, classification: Classification) {
        let _ = if classification.overrun {
            self.write_overrun(sample)
        } else if classification.sampled {
            self.write_status(sample)
        } else {
            Ok(())
        };
    }

    /// Terminate an open status line so later output starts on a fresh one.
    pub fn finish(&mut self) {
        if self.line_open {
            let _ = writeln!(self.out);
            let _ = self.out.flush();
            self.line_open = false;
        }
    }

    /// Cycles between sampled reports (0 = never).
    #[must_use]
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Cycles classified so far.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Borrow the underlying writer.
    pub fn writer(&self) -> &W {
        &self.out
    }

    fn write_overrun(&mut self, sample: &SampleResult) -> std::io::Result<()> {
        write!(self.out, "{CLEAR_LINE}")?;
        self.write_stamp()?;
        let (delay_ms, task_ms) = as_millis(sample);
        if self.color {
            writeln!(
                self.out,
                "{RED}delay: {delay_ms:.4}ms task: {task_ms:.4}ms{RESET}"
            )?;
        } else {
            writeln!(self.out, "OVERRUN delay: {delay_ms:.4}ms task: {task_ms:.4}ms")?;
        }
        self.line_open = false;
        self.out.flush()
    }

    fn write_status(&mut self, sample: &SampleResult) -> std::io::Result<()> {
        write!(self.out, "{CLEAR_LINE}")?;
        self.write_stamp()?;
        let (delay_ms, task_ms) = as_millis(sample);
        write!(self.out, "delay: {delay_ms:.4}ms task: {task_ms:.4}ms")?;
        self.line_open = true;
        self.out.flush()
    }

    fn write_stamp(&mut self) -> std::io::Result<()> {
        if self.timestamps {
            write!(self.out, "[{}] ", chrono::Local::now().format("%H:%M:%S"))?;
        }
        Ok(())
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_millis(sample: &SampleResult) -> (f64, f64) {
    (
        sample.delay_ns as f64 / 1_000_000.0,
        sample.work_ns as f64 / 1_000_000.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> ReportConfig {
        ReportConfig {
            color: false,
            timestamps: false,
        }
    }

    fn output(reporter: &LatencyReporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.writer().clone()).unwrap()
    }

    #[test]
    fn test_sample_rate_default_setup() {
        // 1 ms period, 5 Hz refresh -> every 200th cycle.
        assert_eq!(sample_rate(1_000_000, 5), 200);
    }

    #[test]
    fn test_sample_rate_zero_cases() {
        assert_eq!(sample_rate(1_000_000, 0), 0);
        assert_eq!(sample_rate(0, 5), 0);
        // 300 ms * 5 Hz exceeds one second.
        assert_eq!(sample_rate(300_000_000, 5), 0);
        assert_eq!(sample_rate(i64::MAX, 2), 0);
    }

    #[test]
    fn test_zero_divisor_never_samples() {
        let sample = SampleResult::default();
        for cycle in 0..1_000 {
            assert!(!classify(&sample, 1_000_000, 0, cycle).sampled);
        }
    }

    #[test]
    fn test_overrun_boundary_exclusive() {
        let period = 1_000_000;
        let at = SampleResult {
            delay_ns: period,
            work_ns: 0,
        };
        let over = SampleResult {
            delay_ns: period + 1,
            work_ns: 0,
        };
        assert!(!classify(&at, period, 200, 1).overrun);
        assert!(classify(&over, period, 200, 1).overrun);
    }

    #[test]
    fn test_negative_delay_is_on_time() {
        let early = SampleResult {
            delay_ns: -5_000,
            work_ns: 0,
        };
        assert!(!classify(&early, 1_000_000, 200, 1).overrun);
    }

    #[test]
    fn test_reporter_samples_every_rate_cycles() {
        let mut reporter = LatencyReporter::new(Vec::new(), 1_000_000, 5, &plain());
        let sampled: Vec<u64> = (0..1_000_u64)
            .filter(|_| reporter.classify(&SampleResult::default()).sampled)
            .collect();
        assert_eq!(sampled.len(), 5);
        assert_eq!(reporter.cycles(), 1_000);
        assert_eq!(reporter.rate(), 200);
    }

    #[test]
    fn test_status_line_overwrites() {
        let mut reporter = LatencyReporter::new(Vec::new(), 1_000_000, 5, &plain());
        let sample = SampleResult {
            delay_ns: 12_345,
            work_ns: 1_500,
        };
        let class = Classification {
            overrun: false,
            sampled: true,
        };
        reporter.report(&sample, class);
        reporter.report(&sample, class);

        let out = output(&reporter);
        assert_eq!(
            out,
            "\x1b[2K\rdelay: 0.0123ms task: 0.0015ms\x1b[2K\rdelay: 0.0123ms task: 0.0015ms"
        );
        assert!(!out.contains('\n'));
    }

    #[test]
    fn test_overrun_gets_own_line() {
        let config = ReportConfig {
            color: true,
            timestamps: false,
        };
        let mut reporter = LatencyReporter::new(Vec::new(), 1_000_000, 5, &config);
        let sample = SampleResult {
            delay_ns: 1_500_000,
            work_ns: 2_000,
        };
        reporter.report(
            &sample,
            Classification {
                overrun: true,
                sampled: false,
            },
        );
        assert_eq!(
            output(&reporter),
            "\x1b[2K\r\x1b[31mdelay: 1.5000ms task: 0.0020ms\x1b[0m\n"
        );
    }

    #[test]
    fn test_overrun_without_color() {
        let mut reporter = LatencyReporter::new(Vec::new(), 1_000_000, 5, &plain());
        let sample = SampleResult {
            delay_ns: 2_000_000,
            work_ns: 0,
        };
        let class = reporter.classify(&sample);
        reporter.report(&sample, class);
        assert_eq!(
            output(&reporter),
            "\x1b[2K\rOVERRUN delay: 2.0000ms task: 0.0000ms\n"
        );
    }

    #[test]
    fn test_unsampled_prints_nothing() {
        let mut reporter = LatencyReporter::new(Vec::new(), 1_000_000, 0, &plain());
        let sample = SampleResult::default();
        let class = reporter.classify(&sample);
        reporter.report(&sample, class);
        reporter.finish();
        assert!(output(&reporter).is_empty());
    }

    #[test]
    fn test_finish_closes_open_line() {
        let mut reporter = LatencyReporter::new(Vec::new(), 1_000_000, 5, &plain());
        let sample = SampleResult::default();
        let class = reporter.classify(&sample);
        assert!(class.sampled);
        reporter.report(&sample, class);
        reporter.finish();
        reporter.finish();
        assert!(output(&reporter).ends_with("ms\n"));
        assert_eq!(output(&reporter).matches('\n').count(), 1);
    }

    #[test]
    fn test_timestamp_prefix() {
        let config = ReportConfig {
            color: false,
            timestamps: true,
        };
        let mut reporter = LatencyReporter::new(Vec::new(), 1_000_000, 5, &config);
        let sample = SampleResult::default();
        let class = reporter.classify(&sample);
        reporter.report(&sample, class);

        let out = output(&reporter);
        let line = out.strip_prefix(CLEAR_LINE).unwrap();
        // "[HH:MM:SS] delay: ..."
        assert_eq!(&line[0..1], "[");
        assert_eq!(&line[9..11], "] ");
        assert!(line[11..].starts_with("delay: "));
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_write_errors_swallowed() {
        let mut reporter = LatencyReporter::new(FailingWriter, 1_000_000, 5, &plain());
        let sample = SampleResult {
            delay_ns: 5_000_000,
            work_ns: 0,
        };
        let class = reporter.classify(&sample);
        reporter.report(&sample, class);
        reporter.finish();
        assert_eq!(reporter.cycles(), 1);
    }
}
