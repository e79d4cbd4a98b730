// Metrea LLC Intellectual Property
// Originally developed by Raw Socket Labs LLC

//! Port traits for the scanner's external collaborators.
//!
//! The tuner, VFO and frequency manager live outside this crate; the
//! scanner is polymorphic over these interfaces so the worker can be
//! exercised against mocks.

use dsp::IqSample;
use shared::ScanEntry;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PortError {
    #[error("command not supported: {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Failed(String),
}

/// Handler bound to the tuner's IQ stream. Called from the tuner's own
/// thread with each block of baseband samples.
pub type IqHandler = Arc<dyn Fn(&[IqSample]) + Send + Sync>;

/// The radio source delivering IQ samples.
pub trait TunerPort: Send + Sync {
    fn set_center_frequency(&self, hz: f64) -> Result<(), PortError>;
    fn set_gain_db(&self, gain: f32) -> Result<(), PortError>;
    fn is_started(&self) -> bool;
    fn sample_rate(&self) -> f64;
    fn center_frequency(&self) -> f64;
    /// Bind a handler to the outbound IQ stream, replacing any previous
    /// one.
    fn bind_iq(&self, handler: IqHandler);
    fn unbind_iq(&self);
}

/// The virtual receiver the scanner drives.
pub trait VfoPort: Send + Sync {
    fn name(&self) -> &str;
    fn retune(&self, hz: f64) -> Result<(), PortError>;
    fn set_mode(&self, mode: i32) -> Result<(), PortError>;
    fn set_bandwidth(&self, hz: f32) -> Result<(), PortError>;
    fn set_squelch_enabled(&self, enabled: bool) -> Result<(), PortError>;
    fn set_squelch_level(&self, db: f32) -> Result<(), PortError>;
    fn squelch_enabled(&self) -> Result<bool, PortError>;
    fn squelch_level(&self) -> Result<f32, PortError>;
    fn bandwidth(&self) -> f64;
}

/// The external store supplying the ordered scan list.
pub trait FrequencyManagerPort: Send + Sync {
    fn scan_list(&self) -> Vec<ScanEntry>;
    /// Human-readable bookmark name for a frequency; empty when unknown.
    fn bookmark_name(&self, hz: f64) -> String;
}

/// Frequency extent of a host spectrum snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SpectrumView {
    pub center_hz: f64,
    pub bandwidth_hz: f64,
}

impl SpectrumView {
    pub fn start_hz(&self) -> f64 {
        self.center_hz - self.bandwidth_hz / 2.0
    }

    pub fn end_hz(&self) -> f64 {
        self.center_hz + self.bandwidth_hz / 2.0
    }
}

/// Host-side spectrum used when the dedicated PSD engine is disabled or
/// unavailable. Implementations copy under their own lock and release it
/// before returning.
pub trait SpectrumSource: Send + Sync {
    fn copy_latest(&self, out: &mut Vec<f32>) -> Option<SpectrumView>;
}
