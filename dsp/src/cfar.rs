// Metrea LLC Intellectual Property
// Originally developed by Raw Socket Labs LLC

//! Constant-false-alarm-rate peak measurement over a PSD snapshot.
//!
//! The detector estimates a local noise floor from guarded reference
//! regions on both sides of the region of interest and reports whether the
//! peak clears `noise + threshold`. The median noise estimate keeps a
//! single strong emitter in the reference band from masking its neighbors.

use tracing::trace;

/// Default noise floor when no reference bins are usable.
const DEFAULT_NOISE_DB: f32 = -80.0;
/// Absolute level a peak must clear regardless of the local noise floor.
const MIN_PEAK_DB: f32 = -90.0;

#[derive(Debug, Clone)]
pub struct CfarParams {
    /// Guard band skipped on each side of the ROI (Hz).
    pub guard_hz: f64,
    /// Reference band used for the noise estimate on each side (Hz).
    pub ref_hz: f64,
    /// Detection threshold above the noise floor (dB).
    pub threshold_db: f32,
}

impl Default for CfarParams {
    fn default() -> Self {
        Self {
            guard_hz: 2000.0,
            ref_hz: 15000.0,
            threshold_db: 8.0,
        }
    }
}

/// One CFAR measurement at a target frequency.
#[derive(Debug, Clone, Copy)]
pub struct CfarMeasurement {
    /// Strongest level inside the region of interest (dBFS).
    pub peak_db: f32,
    /// Median of the reference bins (dBFS).
    pub noise_floor_db: f32,
    /// Bin index of the peak in the snapshot.
    pub peak_bin: usize,
    /// Peak frequency after parabolic sub-bin refinement, absolute Hz.
    /// None when the peak sits on a snapshot boundary.
    pub refined_hz: Option<f64>,
    pub detected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CfarDetector {
    params: CfarParams,
}

impl CfarDetector {
    pub fn new(params: CfarParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CfarParams {
        &self.params
    }

    pub fn set_params(&mut self, params: CfarParams) {
        self.params = params;
    }

    /// Map an absolute RF frequency to a DC-centered bin index, clamped to
    /// the snapshot.
    pub fn bin_of(freq_hz: f64, center_hz: f64, bin_width_hz: f64, width: usize) -> usize {
        let k = (freq_hz - center_hz) / bin_width_hz + width as f64 / 2.0;
        (k.round().max(0.0) as usize).min(width.saturating_sub(1))
    }

    /// Measure the strongest emission in `roi_width_hz` around `target_hz`
    /// against the locally estimated noise floor.
    ///
    /// `psd` is a DC-centered snapshot whose bin `len/2` corresponds to
    /// `center_hz`.
    pub fn measure(
        &self,
        psd: &[f32],
        bin_width_hz: f64,
        center_hz: f64,
        target_hz: f64,
        roi_width_hz: f64,
    ) -> CfarMeasurement {
        let width = psd.len();
        if width == 0 || bin_width_hz <= 0.0 {
            return CfarMeasurement {
                peak_db: f32::NEG_INFINITY,
                noise_floor_db: DEFAULT_NOISE_DB,
                peak_bin: 0,
                refined_hz: None,
                detected: false,
            };
        }

        let center_bin = Self::bin_of(target_hz, center_hz, bin_width_hz, width);
        let half_width = (roi_width_hz / bin_width_hz).round().max(1.0) as usize / 2;
        let guard = (self.params.guard_hz / bin_width_hz).round() as usize;
        let reference = (self.params.ref_hz / bin_width_hz).round() as usize;

        let roi_lo = center_bin.saturating_sub(half_width);
        let roi_hi = (center_bin + half_width).min(width - 1);

        // Peak inside the region of interest.
        let mut peak_db = f32::NEG_INFINITY;
        let mut peak_bin = center_bin;
        for (i, &v) in psd[roi_lo..=roi_hi].iter().enumerate() {
            if v.is_finite() && v > peak_db {
                peak_db = v;
                peak_bin = roi_lo + i;
            }
        }
        if !peak_db.is_finite() {
            peak_db = -100.0;
        }

        // Reference regions outside the guard band, clipped to the snapshot.
        let mut reference_bins: Vec<f32> = Vec::with_capacity(2 * reference);
        let low_end = roi_lo.saturating_sub(guard);
        let low_start = roi_lo.saturating_sub(guard + reference);
        if low_start < low_end {
            reference_bins.extend(psd[low_start..low_end].iter().copied().filter(|v| v.is_finite()));
        }
        let high_start = (roi_hi + guard + 1).min(width);
        let high_end = (roi_hi + guard + reference).min(width.saturating_sub(1)) + 1;
        if high_start < high_end {
            reference_bins
                .extend(psd[high_start..high_end].iter().copied().filter(|v| v.is_finite()));
        }

        // Both reference regions clipped away: fall back to everything
        // outside the ROI.
        if reference_bins.is_empty() {
            reference_bins.extend(
                psd.iter()
                    .enumerate()
                    .filter(|(i, v)| (*i < roi_lo || *i > roi_hi) && v.is_finite())
                    .map(|(_, v)| *v),
            );
        }

        let noise_floor_db = median(&mut reference_bins).unwrap_or(DEFAULT_NOISE_DB);

        let detected = peak_db >= noise_floor_db + self.params.threshold_db && peak_db > MIN_PEAK_DB;

        let refined_hz = if peak_bin > 0 && peak_bin < width - 1 {
            let refined_bin = refine_bin(psd, peak_bin);
            Some(center_hz + (refined_bin - width as f64 / 2.0) * bin_width_hz)
        } else {
            None
        };

        trace!(
            target_hz,
            peak_db,
            noise_floor_db,
            threshold_db = noise_floor_db + self.params.threshold_db,
            detected,
            "CFAR measurement"
        );

        CfarMeasurement {
            peak_db,
            noise_floor_db,
            peak_bin,
            refined_hz,
            detected,
        }
    }
}

/// Parabolic sub-bin interpolation around `bin`, returning a fractional
/// bin index clamped to +/- half a bin. Callers must ensure the bin has
/// both neighbors.
pub fn refine_bin(psd: &[f32], bin: usize) -> f64 {
    let l = psd[bin - 1] as f64;
    let c = psd[bin] as f64;
    let r = psd[bin + 1] as f64;

    let num = 0.5 * (l - r);
    let mut den = l - 2.0 * c + r;
    if den.abs() < 1e-6 {
        den = 1e-6;
    }
    bin as f64 + (num / den).clamp(-0.5, 0.5)
}

fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
