//! Validated runtime configuration built from the file.

use super::file::LogFormat;
use hookpost_core::config::DispatchPolicy;
use hookpost_sdk::signature::Signer;
use std::time::Duration;

/// Cadence of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub interval: Duration,
    pub batch_size: usize,
    pub jitter: Duration,
}

/// Everything a (re)load produces.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub schedule: ScheduleSettings,
    pub signer: Signer,
    pub policy: DispatchPolicy,
    /// Only read at startup; the subscriber cannot be swapped on reload.
    pub log_format: LogFormat,
}
