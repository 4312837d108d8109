//! Startup banner.

use rtt_runtime::realtime::SchedulingInfo;
use std::io::Write;

const LOGO: &str = r"
  ____ _____   _            _
 |  _ \_   _| | |_ ___  ___| |_ ___ _ __
 | |_) || |   | __/ _ \/ __| __/ _ \ '__|
 |  _ < | |   | ||  __/\__ \ ||  __/ |
 |_| \_\|_|    \__\___||___/\__\___|_|";

/// Values shown in the banner.
#[derive(Debug, Clone, Copy)]
pub struct BannerInfo {
    /// Scheduling class of the worker as the kernel reports it.
    pub scheduling: SchedulingInfo,
    /// Period in nanoseconds.
    pub period_ns: i64,
    /// Console refresh rate in Hz.
    pub report_rate: u32,
}

/// Write the banner.
///
/// # Errors
///
/// Returns any error from the writer.
pub fn write_banner<W: Write>(out: &mut W, info: &BannerInfo) -> std::io::Result<()> {
    #[allow(clippy::cast_precision_loss)]
    let period_ms = info.period_ns as f64 / 1_000_000.0;

    writeln!(out, "{LOGO}    ver: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(out)?;
    writeln!(out, " scheduler policy: {}", info.scheduling.policy_name())?;
    writeln!(out, " priority: {}", info.scheduling.priority)?;
    writeln!(out)?;
    writeln!(out, " period: {period_ms:.4} ms")?;
    writeln!(out, " console refresh rate: {} Hz", info.report_rate)?;
    writeln!(out)?;
    out.flush()
}
