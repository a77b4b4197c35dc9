#![doc = include_str!("../README.md")]

pub mod monitor;
pub mod probe;

pub use monitor::HealthMonitor;
pub use probe::{HealthPayload, HealthProbe, HttpHealthProbe, PluginMetrics, ProbeReport, ServerMetrics};
