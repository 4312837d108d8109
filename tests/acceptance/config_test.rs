//! Configuration files on disk.

use rtt_common::config::{CpuAffinity, SchedPolicy, TesterConfig};
use std::io::Write;
use std::time::Duration;

#[test]
fn test_load_config_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"
period = "500us"
report_rate = 10
duration = "2s"

[realtime]
policy = "rr"
priority = 60
cpu_affinity = [2, 3]
lock_memory = false

[report]
color = false
"#
    )
    .expect("write config");

    let config = TesterConfig::from_file(file.path()).expect("load config");
    config.validate().expect("valid config");

    assert_eq!(config.period, Duration::from_micros(500));
    assert_eq!(config.period_ns().expect("period"), 500_000);
    assert_eq!(config.report_rate, 10);
    assert_eq!(config.cycle_budget(), 4_000);
    assert_eq!(config.realtime.policy, SchedPolicy::Rr);
    assert_eq!(config.realtime.priority, 60);
    assert_eq!(config.realtime.cpu_affinity, CpuAffinity::Set(vec![2, 3]));
    assert!(!config.realtime.lock_memory);
    assert!(!config.report.color);
    assert!(config.report.timestamps);
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");
    assert!(TesterConfig::from_file(&path).is_err());
}

#[test]
fn test_saved_config_reloads() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("rt-tester.toml");

    let mut config = TesterConfig::default();
    config.period = Duration::from_micros(250);
    config.max_cycles = 100;
    config.realtime.cpu_affinity = CpuAffinity::Single(1);
    std::fs::write(&path, config.to_toml().expect("serialize")).expect("write");

    let loaded = TesterConfig::from_file(&path).expect("reload");
    assert_eq!(loaded.period, Duration::from_micros(250));
    assert_eq!(loaded.max_cycles, 100);
    assert_eq!(loaded.realtime.cpu_affinity, CpuAffinity::Single(1));
}

#[test]
fn test_invalid_priority_rejected() {
    let config = TesterConfig::from_toml("[realtime]\npriority = 0\n").expect("parse");
    assert!(config.validate().is_err());
}
