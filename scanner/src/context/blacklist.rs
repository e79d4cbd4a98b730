// Metrea LLC Intellectual Property
// Originally developed by Raw Socket Labs LLC

//! Frequency skip list with tolerance matching.

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Blacklist {
    freqs: Vec<f64>,
    tolerance_hz: f64,
}

impl Blacklist {
    pub fn new(freqs: Vec<f64>, tolerance_hz: f64) -> Self {
        Self { freqs, tolerance_hz }
    }

    pub fn contains(&self, freq: f64) -> bool {
        self.freqs.iter().any(|&b| (freq - b).abs() <= self.tolerance_hz)
    }

    /// Add a frequency unless it already matches an entry within
    /// tolerance. Returns whether the list changed.
    pub fn add(&mut self, freq: f64) -> bool {
        if self.contains(freq) {
            warn!(freq, "frequency already blacklisted within tolerance");
            return false;
        }
        info!(freq, "blacklisting frequency");
        self.freqs.push(freq);
        true
    }

    /// Remove every entry matching `freq` within tolerance. Returns the
    /// number removed.
    pub fn remove(&mut self, freq: f64) -> usize {
        let before = self.freqs.len();
        let tol = self.tolerance_hz;
        self.freqs.retain(|&b| (freq - b).abs() > tol);
        before - self.freqs.len()
    }

    pub fn clear(&mut self) {
        self.freqs.clear();
    }

    pub fn set_tolerance_hz(&mut self, tolerance_hz: f64) {
        self.tolerance_hz = tolerance_hz.clamp(100.0, 100_000.0);
    }

    pub fn tolerance_hz(&self) -> f64 {
        self.tolerance_hz
    }

    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }
}
