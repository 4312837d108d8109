//! Integration tests for RT tester acceptance testing.

mod common;
mod config_test;
mod drift_test;
mod latency_test;
