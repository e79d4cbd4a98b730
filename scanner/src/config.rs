// Metrea LLC Intellectual Property
// Originally developed by Raw Socket Labs LLC

//! Scanner configuration, persisted as JSON.
//!
//! Keys and defaults match the module's historical on-disk format, so an
//! existing `scanner_config.json` keeps working. Loading clamps every
//! value into its supported range; unknown keys are ignored and missing
//! keys take their defaults.

use serde::{Deserialize, Serialize};
use shared::FrequencyRange;
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerConfig {
    /// Legacy single range, used when no frequency ranges are configured.
    pub start_freq: f64,
    pub stop_freq: f64,
    /// Band-scanning step size in Hz.
    pub interval: f64,
    /// Fallback detection threshold in dBFS.
    pub level: f32,
    /// Detection window as a percentage of the VFO bandwidth.
    pub passband_ratio: f64,
    /// Settle time after a retune, in milliseconds.
    pub tuning_time: u64,
    /// Dwell time after signal loss, in milliseconds.
    pub linger_time: u64,
    pub scan_rate_hz: u32,
    pub unlock_high_speed: bool,
    pub tuning_time_auto: bool,
    pub blacklisted_freqs: Vec<f64>,
    pub blacklist_tolerance: f64,
    pub squelch_delta: f32,
    pub squelch_delta_auto: bool,
    pub scan_up: bool,
    #[serde(rename = "useDedicatedFFT")]
    pub use_dedicated_fft: bool,
    #[serde(rename = "scannerFFTSize")]
    pub scanner_fft_size: usize,
    pub scanner_overlap: f32,
    pub scanner_window_type: u32,
    pub scanner_avg_time_ms: f32,
    pub scanner_guard_hz: f64,
    pub scanner_ref_hz: f64,
    pub scanner_min_width_hz: f64,
    pub scanner_threshold_db: f32,
    pub frequency_ranges: Vec<FrequencyRange>,
    pub current_range_index: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            start_freq: 88_000_000.0,
            stop_freq: 108_000_000.0,
            interval: 100_000.0,
            level: -50.0,
            passband_ratio: 100.0,
            tuning_time: 250,
            linger_time: 1000,
            scan_rate_hz: 25,
            unlock_high_speed: false,
            tuning_time_auto: false,
            blacklisted_freqs: Vec::new(),
            blacklist_tolerance: 1000.0,
            squelch_delta: 2.5,
            squelch_delta_auto: false,
            scan_up: true,
            use_dedicated_fft: true,
            scanner_fft_size: 524_288,
            scanner_overlap: 0.5,
            // Blackman-Harris 7
            scanner_window_type: 2,
            scanner_avg_time_ms: 200.0,
            scanner_guard_hz: 2000.0,
            scanner_ref_hz: 15_000.0,
            scanner_min_width_hz: 8000.0,
            scanner_threshold_db: 8.0,
            frequency_ranges: Vec::new(),
            current_range_index: 0,
        }
    }
}

impl ScannerConfig {
    /// Load from `path`, falling back to defaults when the file does not
    /// exist. Values are clamped into their supported ranges.
    pub fn load(path: &Path) -> io::Result<Self> {
        let mut cfg: Self = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(e),
        };
        cfg.normalize();
        Ok(cfg)
    }

    /// Persist to `path` atomically (write-then-rename).
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)
    }

    /// Clamp every parameter into its supported range. Guardrails match
    /// the historical ones: the interval slider only offered 5-200 kHz and
    /// the blacklist tolerance 100 Hz - 100 kHz.
    pub fn normalize(&mut self) {
        self.interval = self.interval.clamp(5000.0, 200_000.0);
        self.passband_ratio = self.passband_ratio.clamp(5.0, 100.0);
        self.tuning_time = self.tuning_time.clamp(10, 10_000);
        self.linger_time = self.linger_time.clamp(50, 10_000);
        self.scan_rate_hz = self.scan_rate_hz.clamp(crate::worker::MIN_SCAN_RATE, crate::worker::MAX_SCAN_RATE);
        self.blacklist_tolerance = self.blacklist_tolerance.clamp(100.0, 100_000.0);
        self.squelch_delta = self.squelch_delta.clamp(0.0, 20.0);
        self.scanner_overlap = self.scanner_overlap.clamp(0.0, 0.99);
        self.scanner_avg_time_ms = self.scanner_avg_time_ms.clamp(10.0, 1000.0);
        self.scanner_guard_hz = self.scanner_guard_hz.max(100.0);
        self.scanner_ref_hz = self.scanner_ref_hz.max(1000.0);
        self.scanner_min_width_hz = self.scanner_min_width_hz.max(500.0);
        self.scanner_threshold_db = self.scanner_threshold_db.clamp(1.0, 20.0);
        self.frequency_ranges.retain(|r| r.is_valid());
        if self.current_range_index >= self.frequency_ranges.len() {
            self.current_range_index = 0;
        }
    }
}
