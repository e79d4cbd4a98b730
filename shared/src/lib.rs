use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Demodulator settings bundle applied to a VFO when a scan target is
/// selected. Owned by the frequency manager; the scanner only ever holds
/// shared references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningProfile {
    pub name: String,
    /// Demodulator mode code, opaque to the scanner.
    pub demod_mode: i32,
    pub bandwidth: f32,
    pub squelch_enabled: bool,
    pub squelch_level: f32,
    pub deemphasis_mode: i32,
    pub agc_enabled: bool,
    /// RF gain in dB. Values <= 0 mean "leave the tuner alone".
    pub rf_gain: f32,
    pub center_offset: f64,
    pub auto_apply: bool,
}

impl Default for TuningProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            demod_mode: 0,
            bandwidth: 12500.0,
            squelch_enabled: false,
            squelch_level: -50.0,
            deemphasis_mode: 0,
            agc_enabled: true,
            rf_gain: 0.0,
            center_offset: 0.0,
            auto_apply: true,
        }
    }
}

/// One target in the scan list handed out by the frequency manager.
///
/// The profile reference stays valid for one refresh epoch of the scan
/// list; callers must drop cached references when the list is re-pulled.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub frequency: f64,
    pub profile: Option<Arc<TuningProfile>>,
    /// true for a point frequency (narrow detection window), false for a
    /// band-derived sample (full VFO bandwidth detection).
    pub single: bool,
}

impl ScanEntry {
    pub fn single(frequency: f64, profile: Option<Arc<TuningProfile>>) -> Self {
        Self { frequency, profile, single: true }
    }

    pub fn from_band(frequency: f64, profile: Option<Arc<TuningProfile>>) -> Self {
        Self { frequency, profile, single: false }
    }
}

/// A legacy scanning range stepped by the configured interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyRange {
    pub name: String,
    pub start_freq: f64,
    pub stop_freq: f64,
    pub enabled: bool,
    /// Tuner gain to apply while scanning this range (dB).
    pub gain: f32,
}

impl FrequencyRange {
    pub fn new(name: impl Into<String>, start_freq: f64, stop_freq: f64) -> Self {
        Self {
            name: name.into(),
            start_freq,
            stop_freq,
            enabled: true,
            gain: 20.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start_freq < self.stop_freq
    }

    pub fn contains(&self, freq: f64) -> bool {
        freq >= self.start_freq && freq <= self.stop_freq
    }
}

impl Default for FrequencyRange {
    fn default() -> Self {
        Self::new("New Range", 88_000_000.0, 108_000_000.0)
    }
}

/// Scanner state as surfaced to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScannerStatus {
    #[default]
    Idle,
    Tuning,
    Sweeping,
    Dwell,
}

/// Point-in-time report of what the scanner is doing.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub status: ScannerStatus,
    pub frequency: f64,
    pub signal_db: f32,
    pub noise_floor_db: f32,
    /// Frequency-manager bookmark name for the current frequency, if any.
    pub bookmark: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_validity() {
        let r = FrequencyRange::new("FM Broadcast", 88e6, 108e6);
        assert!(r.is_valid());
        assert!(r.contains(100.1e6));
        assert!(!r.contains(108.1e6));

        let inverted = FrequencyRange::new("bad", 108e6, 88e6);
        assert!(!inverted.is_valid());
    }

    #[test]
    fn entry_constructors() {
        let e = ScanEntry::single(145_190_000.0, None);
        assert!(e.single);
        let e = ScanEntry::from_band(446_006_250.0, None);
        assert!(!e.single);
    }
}
