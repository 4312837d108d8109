//! Real-time scheduling and memory locking utilities.
//!
//! Provides platform-specific setup for the measurement worker:
//! - Memory locking (mlockall) so page faults cannot add jitter
//! - Stack pre-faulting to ensure stack pages are resident
//! - Real-time scheduling (SCHED_FIFO/SCHED_RR) for the worker thread
//! - CPU affinity to isolate the worker from system housekeeping
//!
//! None of this is required for correct measurement; without it the
//! reported latencies are simply worse.

#![allow(unused_imports)] // Platform-specific code may not use all imports

use rtt_common::config::{CpuAffinity, RealtimeConfig, SchedPolicy};
use rtt_common::error::{RttError, RttResult};
use tracing::{debug, error, info, warn};

/// Result of worker real-time initialization.
#[derive(Debug, Clone, Default)]
pub struct RealtimeStatus {
    /// Stack bytes pre-faulted.
    pub stack_prefaulted: usize,
    /// Applied scheduler policy.
    pub scheduler_policy: Option<SchedPolicy>,
    /// Applied scheduler priority.
    pub scheduler_priority: Option<u8>,
    /// CPUs the thread is pinned to.
    pub cpu_affinity: Option<Vec<usize>>,
}

/// Scheduling class the calling thread actually runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingInfo {
    /// Recognized policy, `None` for anything else (batch, idle, deadline).
    pub policy: Option<SchedPolicy>,
    /// Static priority (0 for time-sharing policies).
    pub priority: i32,
}

impl SchedulingInfo {
    /// Policy name as shown to the operator.
    #[must_use]
    pub fn policy_name(&self) -> String {
        self.policy
            .map_or_else(|| "Unknown...".to_string(), |p| p.to_string())
    }
}

/// Lock all current and future memory pages of the process.
///
/// Must run before the worker starts so its stack is covered too.
/// Returns `Ok(false)` when the process lacks the privilege.
///
/// # Errors
///
/// Returns an error for failures other than missing privileges.
#[cfg(target_os = "linux")]
pub fn lock_process_memory() -> RttResult<bool> {
    use nix::sys::mman::{mlockall, MlockAllFlags};

    debug!("Locking memory pages with mlockall");

    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => {
            info!("Memory locked successfully");
            Ok(true)
        }
        Err(e) => {
            // EPERM/ENOMEM are common without CAP_IPC_LOCK or a large RLIMIT_MEMLOCK
            if e == nix::errno::Errno::EPERM || e == nix::errno::Errno::ENOMEM {
                warn!(
                    error = %e,
                    "mlockall failed - running without CAP_IPC_LOCK capability. \
                     Page faults may show up as latency."
                );
                Ok(false)
            } else {
                Err(RttError::Realtime(format!("mlockall failed: {e}")))
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn lock_process_memory() -> RttResult<bool> {
    warn!("mlockall not available on this platform");
    Ok(false)
}

/// Apply the real-time configuration to the calling thread.
///
/// Call from inside the worker: scheduling policy and affinity are set
/// per thread.
///
/// Missing privileges only warn. Any other scheduler or affinity failure
/// is fatal when `fail_fast` is set and a warning otherwise.
///
/// # Errors
///
/// Returns an error if `fail_fast` validation fails or, with `fail_fast`,
/// if a setting is rejected.
pub fn init_realtime(config: &RealtimeConfig) -> RttResult<RealtimeStatus> {
    if !config.enabled {
        info!("Real-time scheduling disabled in configuration");
        return Ok(RealtimeStatus::default());
    }

    if config.fail_fast {
        info!("Validating real-time capabilities (fail_fast=true)");
        validate_rt_capabilities(config)?;
    }

    let stack_prefaulted = prefault_stack(config.effective_prefault());

    let (scheduler_policy, scheduler_priority) = degrade(
        set_scheduler(config.policy, config.priority),
        config.fail_fast,
        (None, None),
    )?;

    let cpu_affinity = degrade(set_cpu_affinity(&config.cpu_affinity), config.fail_fast, None)?;

    let status = RealtimeStatus {
        stack_prefaulted,
        scheduler_policy,
        scheduler_priority,
        cpu_affinity,
    };

    info!(?status, "Worker real-time setup complete");
    Ok(status)
}

/// Keep a setup error when `fail_fast`, otherwise log it and carry on
/// with `fallback`.
fn degrade<T>(result: RttResult<T>, fail_fast: bool, fallback: T) -> RttResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if fail_fast => Err(e),
        Err(e) => {
            warn!(error = %e, "Real-time setting not applied, continuing");
            Ok(fallback)
        }
    }
}

/// Pre-fault stack pages to avoid page faults during execution.
fn prefault_stack(size: usize) -> usize {
    if size == 0 {
        return 0;
    }

    debug!(size, "Pre-faulting stack pages");
    let total_faulted = prefault_stack_recursive(size, 0);
    debug!(total_faulted, "Stack pre-fault complete");
    total_faulted
}

/// Touch one stack frame per call until `remaining` is used up.
#[inline(never)]
fn prefault_stack_recursive(remaining: usize, depth: usize) -> usize {
    const FRAME_SIZE: usize = 4096;
    const MAX_DEPTH: usize = 256;

    if remaining < FRAME_SIZE || depth >= MAX_DEPTH {
        return 0;
    }

    let mut buffer = [0u8; FRAME_SIZE];
    buffer[0] = 0xBB;
    buffer[FRAME_SIZE - 1] = 0xCC;
    std::hint::black_box(&mut buffer);

    FRAME_SIZE + prefault_stack_recursive(remaining - FRAME_SIZE, depth + 1)
}

/// Set real-time scheduler policy and priority for the calling thread.
#[cfg(target_os = "linux")]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> RttResult<(Option<SchedPolicy>, Option<u8>)> {
    let linux_policy = match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
        SchedPolicy::Other => {
            debug!("Using SCHED_OTHER (non-RT) scheduling");
            return Ok((Some(SchedPolicy::Other), None));
        }
    };

    let clamped_priority = priority.clamp(1, 99);
    if clamped_priority != priority {
        warn!(
            original = priority,
            clamped = clamped_priority,
            "Scheduler priority clamped to valid range"
        );
    }

    debug!(
        ?policy,
        priority = clamped_priority,
        "Setting real-time scheduler"
    );

    let param = libc::sched_param {
        sched_priority: i32::from(clamped_priority),
    };

    // SAFETY: pid 0 targets the calling thread; param is a valid, initialized struct.
    let result = unsafe { libc::sched_setscheduler(0, linux_policy, &param) };

    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            warn!(
                "sched_setscheduler failed with EPERM - running without RT privileges. \
                 Consider running with CAP_SYS_NICE capability or as root."
            );
            return Ok((None, None));
        }
        return Err(RttError::Realtime(format!(
            "sched_setscheduler failed: {err}"
        )));
    }

    info!(
        %policy,
        priority = clamped_priority,
        "Real-time scheduler configured"
    );
    Ok((Some(policy), Some(clamped_priority)))
}

#[cfg(not(target_os = "linux"))]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> RttResult<(Option<SchedPolicy>, Option<u8>)> {
    warn!(
        ?policy,
        priority, "Real-time scheduling not available on this platform"
    );
    Ok((None, None))
}

/// Set CPU affinity for the calling thread.
#[cfg(target_os = "linux")]
fn set_cpu_affinity(affinity: &CpuAffinity) -> RttResult<Option<Vec<usize>>> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let cpus = match affinity {
        CpuAffinity::None => {
            debug!("No CPU affinity configured");
            return Ok(None);
        }
        CpuAffinity::Single(cpu) => vec![*cpu],
        CpuAffinity::Set(cpus) => cpus.clone(),
    };

    if cpus.is_empty() {
        return Ok(None);
    }

    debug!(?cpus, "Setting CPU affinity");

    let mut cpu_set = CpuSet::new();
    for &cpu in &cpus {
        cpu_set
            .set(cpu)
            .map_err(|e| RttError::Config(format!("Invalid CPU index {cpu}: {e}")))?;
    }

    match sched_setaffinity(Pid::from_raw(0), &cpu_set) {
        Ok(()) => {
            info!(?cpus, "CPU affinity set");
            Ok(Some(cpus))
        }
        Err(e) => {
            if e == nix::errno::Errno::EINVAL {
                warn!(?cpus, "Invalid CPU set - some CPUs may not exist");
                Ok(None)
            } else {
                Err(RttError::Realtime(format!("sched_setaffinity failed: {e}")))
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn set_cpu_affinity(affinity: &CpuAffinity) -> RttResult<Option<Vec<usize>>> {
    if !affinity.is_none() {
        warn!("CPU affinity not available on this platform");
    }
    Ok(None)
}

/// Report the calling thread's scheduling policy and priority.
#[cfg(target_os = "linux")]
#[must_use]
pub fn current_scheduling() -> SchedulingInfo {
    // SAFETY: pid 0 queries the calling thread; no pointers involved.
    let raw_policy = unsafe { libc::sched_getscheduler(0) };

    let mut param = libc::sched_param { sched_priority: 0 };
    // SAFETY: param is a valid, writable sched_param.
    let priority = if unsafe { libc::sched_getparam(0, &mut param) } == 0 {
        param.sched_priority
    } else {
        0
    };

    let policy = match raw_policy {
        libc::SCHED_FIFO => Some(SchedPolicy::Fifo),
        libc::SCHED_RR => Some(SchedPolicy::Rr),
        libc::SCHED_OTHER => Some(SchedPolicy::Other),
        _ => None,
    };

    SchedulingInfo { policy, priority }
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn current_scheduling() -> SchedulingInfo {
    SchedulingInfo {
        policy: Some(SchedPolicy::Other),
        priority: 0,
    }
}

/// Check if the current process has real-time capabilities.
#[cfg(target_os = "linux")]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    use std::fs;

    let mut caps = RtCapabilities {
        // SAFETY: geteuid has no preconditions.
        is_root: unsafe { libc::geteuid() } == 0,
        ..Default::default()
    };

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rlim is a valid, writable rlimit.
    if unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut rlim) } == 0 {
        caps.rtprio_limit = Some(rlim.rlim_cur);
    }

    // SAFETY: as above.
    if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut rlim) } == 0 {
        caps.memlock_limit = Some(rlim.rlim_cur);
    }

    if let Ok(version) = fs::read_to_string("/proc/version") {
        caps.preempt_rt = version.contains("PREEMPT_RT") || version.contains("PREEMPT RT");
    }

    caps
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    RtCapabilities::default()
}

/// Information about real-time capabilities of the system.
#[derive(Debug, Clone, Default)]
pub struct RtCapabilities {
    /// Whether running as root.
    pub is_root: bool,
    /// RLIMIT_RTPRIO value (max RT priority allowed).
    pub rtprio_limit: Option<u64>,
    /// RLIMIT_MEMLOCK value (max lockable memory).
    pub memlock_limit: Option<u64>,
    /// Whether running on a PREEMPT_RT kernel.
    pub preempt_rt: bool,
}

impl RtCapabilities {
    /// Check if RT scheduling is likely to succeed.
    #[must_use]
    pub fn can_use_rt_scheduling(&self) -> bool {
        self.is_root || self.rtprio_limit.is_some_and(|l| l > 0)
    }

    /// Check if memory locking is likely to succeed.
    #[must_use]
    pub fn can_lock_memory(&self) -> bool {
        if self.is_root {
            return true;
        }

        #[cfg(target_family = "unix")]
        {
            self.memlock_limit.is_some_and(|l| l == libc::RLIM_INFINITY)
        }

        #[cfg(not(target_family = "unix"))]
        {
            false
        }
    }
}

/// Validate that real-time capabilities are available.
///
/// # Errors
///
/// Returns an error describing which RT requirements are not met:
/// - CAP_SYS_NICE / RLIMIT_RTPRIO not available
/// - CAP_IPC_LOCK / RLIMIT_MEMLOCK not available
pub fn validate_rt_capabilities(config: &RealtimeConfig) -> RttResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let caps = check_rt_capabilities();
    let mut issues = Vec::new();

    if !caps.preempt_rt {
        warn!(
            "PREEMPT_RT kernel not detected. Expect higher worst-case latency \
             than on a kernel with PREEMPT_RT patches."
        );
    }

    if config.policy.is_realtime() && !caps.can_use_rt_scheduling() {
        issues.push(format!(
            "Cannot use RT scheduling ({}): RLIMIT_RTPRIO={:?}, is_root={}. \
             Grant CAP_SYS_NICE capability or set RLIMIT_RTPRIO > 0.",
            config.policy, caps.rtprio_limit, caps.is_root
        ));
    }

    if config.lock_memory && !caps.can_lock_memory() {
        issues.push(format!(
            "Cannot lock memory: RLIMIT_MEMLOCK={:?}, is_root={}. \
             Grant CAP_IPC_LOCK capability or set RLIMIT_MEMLOCK to unlimited.",
            caps.memlock_limit, caps.is_root
        ));
    }

    if issues.is_empty() {
        info!("Real-time capabilities validated successfully");
        Ok(())
    } else {
        let message = format!(
            "Real-time requirements not met (fail_fast=true):\n  - {}",
            issues.join("\n  - ")
        );
        error!("{}", message);
        Err(RttError::Realtime(message))
    }
}
