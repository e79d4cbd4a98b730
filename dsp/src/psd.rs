// Metrea LLC Intellectual Property
// Originally developed by Raw Socket Labs LLC

//! Averaged power-spectral-density engine.
//!
//! Consumes IQ samples at the tuner rate, runs windowed overlap-hop FFTs,
//! converts per-bin power to dBFS normalized by the window power, smooths
//! across frames with an exponential moving average and publishes the
//! result through a triple-buffered snapshot that readers copy without
//! stalling the producer.
//!
//! Buffer roles rotate `+1 mod 3` on every published frame. The index
//! initialization establishes `process == read + 1 (mod 3)`, so the EMA
//! step can pull its history from the read slot (the last published
//! average) while the rotation hands the freshly averaged slot to readers.

use crate::ring::IqRing;
use crate::window::{Window, WindowKind};
use crate::{valid_fft_size, DspError, IqSample};
use rustfft::{Fft, FftPlanner};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Spectrum floor used to prefill buffers and to clamp log conversion.
const FLOOR_DB: f32 = -200.0;
/// Linear power floor before dB conversion.
const POWER_EPS: f32 = 1e-20;
/// Ring capacity in FFT lengths.
const RING_FACTOR: usize = 4;

#[derive(Debug, Clone)]
pub struct PsdParams {
    pub fft_size: usize,
    pub sample_rate: f64,
    pub window: WindowKind,
    /// Fraction of each frame shared with the next, in [0, 0.99].
    pub overlap: f32,
    /// EMA time constant in milliseconds.
    pub avg_time_ms: f32,
}

impl PsdParams {
    pub fn new(fft_size: usize, sample_rate: f64) -> Self {
        Self {
            fft_size,
            sample_rate,
            window: WindowKind::BlackmanHarris7,
            overlap: 0.5,
            avg_time_ms: 200.0,
        }
    }
}

struct PsdCore {
    params: PsdParams,
    hop: usize,
    alpha: f32,
    window: Window,
    fft: Arc<dyn Fft<f32>>,
    fft_scratch: Vec<IqSample>,
    ring: IqRing,
    frame: Vec<IqSample>,
    first_frame: bool,
    frames_published: u64,
}

impl PsdCore {
    fn build(params: PsdParams) -> Result<Self, DspError> {
        if !valid_fft_size(params.fft_size) {
            return Err(DspError::InvalidFftSize(params.fft_size));
        }
        if params.sample_rate <= 0.0 {
            return Err(DspError::InvalidSampleRate(params.sample_rate));
        }
        if !(0.0..1.0).contains(&params.overlap) {
            return Err(DspError::InvalidOverlap(params.overlap));
        }
        let params = PsdParams {
            overlap: params.overlap.clamp(0.0, 0.99),
            ..params
        };

        let n = params.fft_size;
        let window = Window::new(params.window, n);
        let fft = FftPlanner::new().plan_fft_forward(n);
        let fft_scratch = vec![IqSample::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        let hop = hop_size(n, params.overlap);
        let alpha = ema_alpha(params.sample_rate, hop, params.avg_time_ms);

        debug!(
            fft_size = n,
            sample_rate = params.sample_rate,
            hop,
            alpha,
            bin_width_hz = params.sample_rate / n as f64,
            "PSD engine initialized"
        );

        Ok(Self {
            hop,
            alpha,
            window,
            fft,
            fft_scratch,
            ring: IqRing::new(n * RING_FACTOR),
            frame: vec![IqSample::new(0.0, 0.0); n],
            first_frame: true,
            frames_published: 0,
            params,
        })
    }

    fn recompute_alpha(&mut self) {
        self.hop = hop_size(self.params.fft_size, self.params.overlap);
        self.alpha = ema_alpha(self.params.sample_rate, self.hop, self.params.avg_time_ms);
    }
}

fn hop_size(n: usize, overlap: f32) -> usize {
    ((n as f64 * (1.0 - overlap as f64)).round() as usize).max(1)
}

fn ema_alpha(sample_rate: f64, hop: usize, avg_time_ms: f32) -> f32 {
    let tau_s = avg_time_ms as f64 / 1000.0;
    if tau_s <= 0.0 {
        return 1.0;
    }
    let hop_rate = sample_rate / hop as f64;
    (1.0 - (-1.0 / (hop_rate * tau_s)).exp()) as f32
}

fn lin_to_db(power: f32) -> f32 {
    10.0 * power.max(POWER_EPS).log10()
}

pub struct PsdEngine {
    core: Mutex<PsdCore>,
    bufs: [Mutex<Vec<f32>>; 3],
    write_idx: AtomicUsize,
    process_idx: AtomicUsize,
    read_idx: AtomicUsize,
    fed_samples: AtomicU64,
}

impl PsdEngine {
    pub fn new(params: PsdParams) -> Result<Self, DspError> {
        let core = PsdCore::build(params)?;
        let n = core.params.fft_size;
        Ok(Self {
            core: Mutex::new(core),
            bufs: [
                Mutex::new(vec![FLOOR_DB; n]),
                Mutex::new(vec![FLOOR_DB; n]),
                Mutex::new(vec![FLOOR_DB; n]),
            ],
            // process == read + 1 (mod 3); see module docs.
            write_idx: AtomicUsize::new(1),
            process_idx: AtomicUsize::new(0),
            read_idx: AtomicUsize::new(2),
            fed_samples: AtomicU64::new(0),
        })
    }

    /// Feed tuner samples. Runs any number of overlap-hop FFT frames that
    /// became available and publishes each one. Returns true when at least
    /// one new spectrum was published.
    pub fn feed(&self, samples: &[IqSample]) -> bool {
        let mut core = match self.core.lock() {
            Ok(core) => core,
            Err(_) => return false,
        };
        core.ring.write(samples);

        let total = self.fed_samples.fetch_add(samples.len() as u64, Ordering::Relaxed);
        if total >> 22 != (total + samples.len() as u64) >> 22 {
            debug!(
                total = total + samples.len() as u64,
                dropped = core.ring.dropped(),
                "PSD sample intake"
            );
        }

        let n = core.params.fft_size;
        let mut published = false;
        loop {
            let core = &mut *core;
            if !core.ring.try_read_frame(&mut core.frame) {
                break;
            }
            core.ring.advance(core.hop);

            for (x, w) in core.frame.iter_mut().zip(core.window.coeffs()) {
                *x *= *w;
            }
            let (fft, scratch, frame) = (&core.fft, &mut core.fft_scratch, &mut core.frame);
            fft.process_with_scratch(frame, scratch);

            self.publish(core, n);
            published = true;
        }
        published
    }

    /// Convert the FFT output in `core.frame` to DC-centered dBFS, fold in
    /// the EMA and rotate the buffers.
    fn publish(&self, core: &mut PsdCore, n: usize) {
        let w = self.write_idx.load(Ordering::Acquire);
        let p = self.process_idx.load(Ordering::Acquire);
        let r = self.read_idx.load(Ordering::Acquire);

        let psd_scale = core.window.psd_scale();
        {
            let mut wb = self.bufs[w].lock().unwrap();
            wb.resize(n, FLOOR_DB);
            for (k, x) in core.frame.iter().enumerate() {
                let bin = (k + n / 2) % n;
                wb[bin] = lin_to_db(x.norm_sqr() * psd_scale);
            }

            let mut pb = self.bufs[p].lock().unwrap();
            pb.resize(n, FLOOR_DB);
            if core.first_frame {
                pb.copy_from_slice(&wb);
                core.first_frame = false;
            } else {
                let rb = self.bufs[r].lock().unwrap();
                let alpha = core.alpha;
                if rb.len() == n {
                    for i in 0..n {
                        pb[i] = alpha * wb[i] + (1.0 - alpha) * rb[i];
                    }
                } else {
                    pb.copy_from_slice(&wb);
                }
            }
        }

        self.write_idx.store((w + 1) % 3, Ordering::Release);
        self.process_idx.store((p + 1) % 3, Ordering::Release);
        self.read_idx.store((r + 1) % 3, Ordering::Release);

        core.frames_published += 1;
        if core.frames_published % 64 == 0 {
            debug!(frames = core.frames_published, "PSD frames published");
        }
    }

    /// Copy the latest published spectrum into `out`. Returns the spectrum
    /// width (the FFT size at publication time).
    pub fn copy_latest(&self, out: &mut Vec<f32>) -> usize {
        let r = self.read_idx.load(Ordering::Acquire);
        let buf = self.bufs[r].lock().unwrap();
        out.clear();
        out.extend_from_slice(&buf);
        out.len()
    }

    /// Current buffer roles `(write, process, read)`. The three are a
    /// permutation of {0, 1, 2} at any observable instant.
    pub fn buffer_indices(&self) -> (usize, usize, usize) {
        (
            self.write_idx.load(Ordering::Acquire),
            self.process_idx.load(Ordering::Acquire),
            self.read_idx.load(Ordering::Acquire),
        )
    }

    pub fn fft_size(&self) -> usize {
        self.core.lock().unwrap().params.fft_size
    }

    pub fn sample_rate(&self) -> f64 {
        self.core.lock().unwrap().params.sample_rate
    }

    pub fn overlap(&self) -> f32 {
        self.core.lock().unwrap().params.overlap
    }

    pub fn avg_time_ms(&self) -> f32 {
        self.core.lock().unwrap().params.avg_time_ms
    }

    pub fn window_kind(&self) -> WindowKind {
        self.core.lock().unwrap().params.window
    }

    pub fn hop(&self) -> usize {
        self.core.lock().unwrap().hop
    }

    pub fn bin_width_hz(&self) -> f64 {
        let core = self.core.lock().unwrap();
        core.params.sample_rate / core.params.fft_size as f64
    }

    /// Samples lost to ring overflow since construction.
    pub fn dropped_samples(&self) -> u64 {
        self.core.lock().unwrap().ring.dropped()
    }

    /// Change the FFT size. Invalid sizes are logged and ignored, keeping
    /// the last-known-good configuration. Valid changes fully re-init.
    pub fn set_fft_size(&self, fft_size: usize) {
        if !valid_fft_size(fft_size) {
            warn!(fft_size, "ignoring invalid FFT size; keeping current");
            return;
        }
        let mut core = self.core.lock().unwrap();
        if core.params.fft_size == fft_size {
            return;
        }
        let params = PsdParams { fft_size, ..core.params.clone() };
        match PsdCore::build(params) {
            Ok(rebuilt) => {
                *core = rebuilt;
                self.reset_buffers(fft_size);
            }
            Err(e) => warn!(error = %e, "FFT size change rejected"),
        }
    }

    /// Change the sample rate; triggers a full re-init.
    pub fn set_sample_rate(&self, sample_rate: f64) {
        if sample_rate <= 0.0 {
            warn!(sample_rate, "ignoring invalid sample rate; keeping current");
            return;
        }
        let mut core = self.core.lock().unwrap();
        if core.params.sample_rate == sample_rate {
            return;
        }
        let params = PsdParams { sample_rate, ..core.params.clone() };
        match PsdCore::build(params) {
            Ok(rebuilt) => {
                let n = rebuilt.params.fft_size;
                *core = rebuilt;
                self.reset_buffers(n);
            }
            Err(e) => warn!(error = %e, "sample rate change rejected"),
        }
    }

    pub fn set_window(&self, kind: WindowKind) {
        let mut core = self.core.lock().unwrap();
        if core.params.window == kind {
            return;
        }
        core.params.window = kind;
        core.window = Window::new(kind, core.params.fft_size);
    }

    /// Change the overlap fraction, clamped to [0, 0.99].
    pub fn set_overlap(&self, overlap: f32) {
        let overlap = if overlap.is_finite() { overlap.clamp(0.0, 0.99) } else { 0.0 };
        let mut core = self.core.lock().unwrap();
        core.params.overlap = overlap;
        core.recompute_alpha();
    }

    pub fn set_avg_time_ms(&self, avg_time_ms: f32) {
        if !(avg_time_ms > 0.0) {
            warn!(avg_time_ms, "ignoring invalid averaging time; keeping current");
            return;
        }
        let mut core = self.core.lock().unwrap();
        core.params.avg_time_ms = avg_time_ms;
        core.recompute_alpha();
    }

    /// Drop buffered samples and restart averaging.
    pub fn reset(&self) {
        let mut core = self.core.lock().unwrap();
        core.ring.clear();
        core.first_frame = true;
        let n = core.params.fft_size;
        self.reset_buffers(n);
    }

    fn reset_buffers(&self, n: usize) {
        for buf in &self.bufs {
            let mut b = buf.lock().unwrap();
            b.clear();
            b.resize(n, FLOOR_DB);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::f64::consts::TAU;

    fn tone(n: usize, sample_rate: f64, freq: f64, amp: f32) -> Vec<IqSample> {
        (0..n)
            .map(|i| {
                let phase = TAU * freq * i as f64 / sample_rate;
                IqSample::new(
                    amp * phase.cos() as f32,
                    amp * phase.sin() as f32,
                )
            })
            .collect()
    }

    // Deterministic low-level noise so reference bins are finite.
    fn add_noise(samples: &mut [IqSample], amp: f32) {
        let mut state = 0x2545f491u32;
        for s in samples.iter_mut() {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let a = ((state >> 16) as f32 / 32768.0 - 1.0) * amp;
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let b = ((state >> 16) as f32 / 32768.0 - 1.0) * amp;
            *s += IqSample::new(a, b);
        }
    }

    #[test]
    fn init_invariants() {
        for &n in &[1024usize, 65536, 1 << 20] {
            let psd = PsdEngine::new(PsdParams::new(n, 2_400_000.0)).unwrap();
            assert_eq!(psd.fft_size(), n);
            assert!(psd.bin_width_hz() > 0.0);
        }
    }

    #[test]
    fn rejects_bad_params() {
        assert!(PsdEngine::new(PsdParams::new(1000, 2.4e6)).is_err());
        assert!(PsdEngine::new(PsdParams::new(512, 2.4e6)).is_err());
        assert!(PsdEngine::new(PsdParams::new(1 << 21, 2.4e6)).is_err());
        assert!(PsdEngine::new(PsdParams::new(4096, 0.0)).is_err());
        assert!(PsdEngine::new(PsdParams::new(4096, -1.0)).is_err());
    }

    #[test]
    fn hop_follows_overlap() {
        let psd = PsdEngine::new(PsdParams {
            overlap: 0.0,
            ..PsdParams::new(4096, 1e6)
        })
        .unwrap();
        assert_eq!(psd.hop(), 4096);

        psd.set_overlap(0.5);
        assert_eq!(psd.hop(), 2048);

        // Overlap approaching 1 is clamped to 0.99.
        psd.set_overlap(0.9999);
        assert!((psd.overlap() - 0.99).abs() < 1e-6);
        assert!(psd.hop() >= 1);
    }

    #[test]
    fn fft_size_round_trip_and_clamp() {
        let psd = PsdEngine::new(PsdParams::new(4096, 1e6)).unwrap();
        psd.set_fft_size(8192);
        assert_eq!(psd.fft_size(), 8192);

        // Invalid sizes keep the last-known-good value.
        psd.set_fft_size(3000);
        assert_eq!(psd.fft_size(), 8192);
        psd.set_fft_size(1 << 21);
        assert_eq!(psd.fft_size(), 8192);
    }

    #[test]
    fn indices_stay_a_permutation_and_rotate() {
        let psd = PsdEngine::new(PsdParams {
            overlap: 0.0,
            window: WindowKind::Hann,
            ..PsdParams::new(1024, 48_000.0)
        })
        .unwrap();

        let samples = tone(1024, 48_000.0, 1000.0, 1.0);
        let mut seen_read = HashSet::new();
        for _ in 0..6 {
            assert!(psd.feed(&samples));
            let (w, p, r) = psd.buffer_indices();
            let set: HashSet<usize> = [w, p, r].into_iter().collect();
            assert_eq!(set.len(), 3, "indices must be pairwise distinct");
            seen_read.insert(r);
        }
        assert_eq!(seen_read.len(), 3, "read index must visit every buffer");
    }

    #[test]
    fn sinusoid_is_detected_within_one_bin() {
        // Seeded scenario: Fs = 2.4 MHz, N = 65536, Hann, overlap 0.5.
        let n = 65536usize;
        let fs = 2_400_000.0;
        let psd = PsdEngine::new(PsdParams {
            window: WindowKind::Hann,
            overlap: 0.5,
            ..PsdParams::new(n, fs)
        })
        .unwrap();

        // 100 ms of a 10 kHz tone just above the noise.
        let mut samples = tone((fs * 0.1) as usize, fs, 10_000.0, 1.0);
        add_noise(&mut samples, 0.001);
        assert!(psd.feed(&samples));

        let mut spectrum = Vec::new();
        let width = psd.copy_latest(&mut spectrum);
        assert_eq!(width, n);

        let bin_width = fs / n as f64;
        let expected = n / 2 + (10_000.0 / bin_width).round() as usize;
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert!(
            peak.abs_diff(expected) <= 1,
            "peak at bin {peak}, expected {expected}"
        );

        // Peak must clear the far-side reference floor by >= 30 dB.
        let mut far: Vec<f32> = spectrum[..n / 4].to_vec();
        far.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = far[far.len() / 2];
        assert!(
            spectrum[peak] >= median + 30.0,
            "peak {} dB vs reference median {} dB",
            spectrum[peak],
            median
        );
    }

    #[test]
    fn ema_smooths_across_frames() {
        let n = 1024usize;
        let fs = 102_400.0;
        let psd = PsdEngine::new(PsdParams {
            window: WindowKind::Hann,
            overlap: 0.0,
            // Long time constant so one frame barely moves the average.
            avg_time_ms: 500.0,
            ..PsdParams::new(n, fs)
        })
        .unwrap();

        let loud = tone(n, fs, 5000.0, 1.0);
        assert!(psd.feed(&loud));

        let mut first = Vec::new();
        psd.copy_latest(&mut first);
        let peak_bin = first
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        let loud_db = first[peak_bin];

        // One silent frame: the EMA must decay, not collapse to the floor.
        let silence = vec![IqSample::new(1e-6, 0.0); n];
        assert!(psd.feed(&silence));
        let mut second = Vec::new();
        psd.copy_latest(&mut second);
        assert!(second[peak_bin] < loud_db);
        assert!(
            second[peak_bin] > loud_db - 10.0,
            "EMA history lost: {} dB after one silent frame (was {} dB)",
            second[peak_bin],
            loud_db
        );
    }

    #[test]
    fn reset_restarts_averaging() {
        let n = 1024usize;
        let psd = PsdEngine::new(PsdParams {
            overlap: 0.0,
            ..PsdParams::new(n, 102_400.0)
        })
        .unwrap();
        psd.feed(&tone(n, 102_400.0, 5000.0, 1.0));
        psd.reset();
        let mut out = Vec::new();
        psd.copy_latest(&mut out);
        assert!(out.iter().all(|&v| v == FLOOR_DB));
    }
}
