//! Spectral engine for the scanner: analysis windows, the IQ ring buffer,
//! the averaged power-spectral-density engine and the CFAR peak detector.

pub mod cfar;
pub mod psd;
pub mod ring;
pub mod window;

use thiserror::Error;

/// Baseband complex sample as delivered by the tuner.
pub type IqSample = num_complex::Complex<f32>;

/// Smallest FFT size the PSD engine accepts.
pub const MIN_FFT_SIZE: usize = 1 << 10;
/// Largest FFT size the PSD engine accepts.
pub const MAX_FFT_SIZE: usize = 1 << 20;

#[derive(Debug, Clone, Error)]
pub enum DspError {
    #[error("invalid FFT size {0}: must be a power of two in [{MIN_FFT_SIZE}, {MAX_FFT_SIZE}]")]
    InvalidFftSize(usize),
    #[error("invalid sample rate {0}: must be positive")]
    InvalidSampleRate(f64),
    #[error("invalid overlap {0}: must be in [0, 1)")]
    InvalidOverlap(f32),
}

/// Check an FFT size against the engine's supported range.
pub fn valid_fft_size(n: usize) -> bool {
    n.is_power_of_two() && (MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&n)
}
