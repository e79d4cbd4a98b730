//! Frequency scanner: sweeps a list of frequency targets for active
//! signals, dwells while a signal is present and applies per-target
//! tuning profiles.

pub mod cli;
pub mod config;
pub mod context;
pub mod device;
pub mod fallback;
pub mod logging;
pub mod ports;
pub mod worker;

pub use config::ScannerConfig;
pub use worker::{Scanner, ScannerPorts};

use thiserror::Error;

/// Errors at the scanner boundary. The scan loop itself never aborts the
/// process; these surface from `start` or end the worker cleanly.
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    #[error("scanner is already running")]
    AlreadyRunning,
    #[error("radio source is not running")]
    SourceNotRunning,
    #[error("scan list is empty")]
    EmptyScanList,
    #[error("every frequency in the scan list is blacklisted")]
    AllBlacklisted,
    #[error("no spectrum available: dedicated PSD disabled and no host spectrum bound")]
    NoSpectrum,
    #[error("failed to spawn scan worker: {0}")]
    WorkerSpawn(String),
}
