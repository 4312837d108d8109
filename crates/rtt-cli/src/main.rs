//! RT tester entry point.
//!
//! Locks memory, spawns the measurement worker under a real-time
//! scheduling class, and waits for it to finish or be signalled.

mod banner;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use rtt_common::config::{CpuAffinity, SchedPolicy, TesterConfig};
use rtt_common::error::RttError;
use rtt_runtime::clock::MonotonicClock;
use rtt_runtime::executor::{CyclicExecutor, NullTask, RunSummary};
use rtt_runtime::realtime::{current_scheduling, init_realtime, lock_process_memory};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{info, warn};

use crate::banner::{write_banner, BannerInfo};
use crate::signals::{block_shutdown_signals, SignalHandler};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "rt-tester",
    about = "Measures wake-up latency of a periodic real-time task",
    version,
    long_about = None
)]
struct Args {
    /// Task period in milliseconds (fractions allowed, e.g. 0.5).
    #[arg(long, short = 'p', value_name = "MS", value_parser = parse_period_ms)]
    period: Option<Duration>,

    /// Console refresh rate in samples per second (0 = overruns only).
    #[arg(long, short = 'r', value_name = "HZ")]
    rate: Option<u32>,

    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Real-time priority of the worker (1-99).
    #[arg(long)]
    priority: Option<u8>,

    /// Scheduler policy: fifo, rr or other.
    #[arg(long)]
    policy: Option<SchedPolicy>,

    /// Pin the worker to this CPU.
    #[arg(long, value_name = "CPU")]
    cpu: Option<usize>,

    /// Skip locking memory.
    #[arg(long)]
    no_mlock: bool,

    /// Skip all real-time setup (normal scheduling, no memory lock).
    #[arg(long)]
    no_rt: bool,

    /// Stop after this many cycles.
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Stop after this long (e.g. "30s", "5m").
    #[arg(long, value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Print overruns without ANSI color.
    #[arg(long)]
    no_color: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting RT tester");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    info!(
        period = %humantime::format_duration(config.period),
        report_rate = config.report_rate,
        policy = %config.realtime.policy,
        priority = config.realtime.priority,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::install().context("Failed to set up signal handlers")?;

    if config.realtime.enabled && config.realtime.lock_memory {
        lock_process_memory().context("Failed to lock memory")?;
    }

    let summary = run_worker(config, signal_handler.shutdown_flag())?;

    if signal_handler.shutdown_requested() {
        if let Some(signal) = signal_handler.last_signal() {
            info!(%signal, "Stopped by signal");
        }
    }

    info!(
        cycles = summary.cycles,
        overruns = summary.overruns,
        sampled = summary.sampled,
        interrupted_sleeps = summary.interrupted_sleeps,
        failed_sleeps = summary.failed_sleeps,
        worst_delay_us = summary.worst_delay_ns.map_or(0, |ns| ns / 1_000),
        signals = signal_handler.signal_count(),
        "RT tester finished"
    );

    Ok(())
}

/// Initialize logging with the specified log level.
///
/// Logs go to stderr so the live report on stdout stays intact.
fn init_logging(level: &str) {
    let filter = format!(
        "rt_tester={level},rtt_cli={level},rtt_runtime={level},rtt_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RTT_CONFIG_PATH` environment variable
/// 3. `/etc/rt-tester/config.toml` (system path)
/// 4. `config/rt-tester.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<TesterConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return TesterConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var("RTT_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from RTT_CONFIG_PATH");
            return TesterConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from RTT_CONFIG_PATH={env_path}")
            });
        }
        warn!(
            path = %env_path,
            "RTT_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for candidate in ["/etc/rt-tester/config.toml", "config/rt-tester.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!(?path, "Loading config file");
            return TesterConfig::from_file(&path)
                .with_context(|| format!("Failed to load config from {candidate}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(TesterConfig::default())
}

/// Command-line options win over the config file.
fn apply_overrides(config: &mut TesterConfig, args: &Args) {
    if let Some(period) = args.period {
        config.period = period;
    }
    if let Some(rate) = args.rate {
        config.report_rate = rate;
    }
    if let Some(priority) = args.priority {
        config.realtime.priority = priority;
    }
    if let Some(policy) = args.policy {
        config.realtime.policy = policy;
    }
    if let Some(cpu) = args.cpu {
        config.realtime.cpu_affinity = CpuAffinity::Single(cpu);
    }
    if args.no_mlock {
        config.realtime.lock_memory = false;
    }
    if args.no_rt {
        config.realtime.enabled = false;
    }
    if let Some(max_cycles) = args.max_cycles {
        config.max_cycles = max_cycles;
    }
    if let Some(duration) = args.duration {
        config.duration = Some(duration);
    }
    if args.no_color {
        config.report.color = false;
    }
}

/// Parse a period given in (possibly fractional) milliseconds.
fn parse_period_ms(s: &str) -> Result<Duration, String> {
    let ms: f64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid period '{s}': {e}"))?;

    if !ms.is_finite() || ms <= 0.0 {
        return Err(format!("period must be a positive number of milliseconds, got '{s}'"));
    }

    let ns = (ms * 1_000_000.0).round();
    #[allow(clippy::cast_precision_loss)]
    if ns < 1.0 || ns > i64::MAX as f64 {
        return Err(format!("period '{s}' ms is out of range"));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let ns = ns as u64;
    Ok(Duration::from_nanos(ns))
}

/// Spawn the measurement worker and wait for it.
fn run_worker(config: TesterConfig, shutdown: &'static AtomicBool) -> Result<RunSummary> {
    let mut builder = std::thread::Builder::new().name("rtt-worker".into());
    if let Some(stack_size) = config.realtime.stack_size {
        builder = builder.stack_size(stack_size);
    }

    let handle = builder
        .spawn(move || worker_main(&config, shutdown))
        .map_err(|e| RttError::Worker(format!("spawn failed: {e}")))?;

    handle
        .join()
        .map_err(|_| RttError::Worker("measurement thread panicked".into()))?
}

/// Body of the worker thread: RT setup, banner, cyclic loop.
fn worker_main(config: &TesterConfig, shutdown: &AtomicBool) -> Result<RunSummary> {
    if let Err(e) = block_shutdown_signals() {
        warn!(error = %e, "Could not block signals in worker; sleeps may be interrupted");
    }

    init_realtime(&config.realtime).context("Real-time setup failed")?;

    let period_ns = config.period_ns()?;
    let clock = MonotonicClock::new().context("Monotonic clock unavailable")?;

    let mut stdout = std::io::stdout().lock();
    let banner = BannerInfo {
        scheduling: current_scheduling(),
        period_ns,
        report_rate: config.report_rate,
    };
    if let Err(e) = write_banner(&mut stdout, &banner) {
        warn!(error = %e, "Failed to print banner");
    }

    let mut executor = CyclicExecutor::new(
        clock,
        NullTask,
        stdout,
        period_ns,
        config.report_rate,
        &config.report,
    )?
    .with_retry_interrupted(config.realtime.retry_interrupted_sleep);

    executor
        .run(shutdown, config.cycle_budget())
        .context("Cyclic loop failed")
}
