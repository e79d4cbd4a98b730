//! Analysis window functions and their power normalization.
//!
//! The PSD engine normalizes per-bin power by the RMS window power
//! `U = (Σ w[i]²) / N`, giving `psd_scale = 1 / (N·U)` so that window
//! choice does not shift the reported noise floor.

use std::f64::consts::PI;

/// Supported analysis windows.
///
/// Blackman-Harris 7 trades main-lobe width for the best dynamic range and
/// is the default for scanning; Rectangular has the narrowest main lobe but
/// poor sidelobe suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Rectangular,
    Blackman,
    BlackmanHarris7,
    Hamming,
    Hann,
}

/// 7-term Blackman-Harris coefficients against successive multiples of
/// `2π·i/(N−1)`.
const BH7: [f64; 7] = [
    0.27105140069342,
    -0.43329793923448,
    0.21812299954311,
    -0.06592544638803,
    0.01081174209837,
    -0.00077658482522,
    0.00001388721735,
];

impl WindowKind {
    /// Window value at sample `i` of an `n`-point window.
    pub fn coefficient(self, i: usize, n: usize) -> f32 {
        if n < 2 {
            return 1.0;
        }
        let ratio = i as f64 / (n - 1) as f64;
        let v = match self {
            WindowKind::Rectangular => 1.0,
            WindowKind::Blackman => {
                0.42 - 0.5 * (2.0 * PI * ratio).cos() + 0.08 * (4.0 * PI * ratio).cos()
            }
            WindowKind::BlackmanHarris7 => BH7
                .iter()
                .enumerate()
                .map(|(k, c)| c * (2.0 * PI * k as f64 * ratio).cos())
                .sum(),
            WindowKind::Hamming => 0.54 - 0.46 * (2.0 * PI * ratio).cos(),
            WindowKind::Hann => 0.5 * (1.0 - (2.0 * PI * ratio).cos()),
        };
        v as f32
    }

    /// Configuration index as persisted by the scanner.
    pub fn index(self) -> u32 {
        match self {
            WindowKind::Rectangular => 0,
            WindowKind::Blackman => 1,
            WindowKind::BlackmanHarris7 => 2,
            WindowKind::Hamming => 3,
            WindowKind::Hann => 4,
        }
    }

    /// Inverse of [`WindowKind::index`]; unknown indices fall back to
    /// Blackman-Harris 7.
    pub fn from_index(idx: u32) -> Self {
        match idx {
            0 => WindowKind::Rectangular,
            1 => WindowKind::Blackman,
            3 => WindowKind::Hamming,
            4 => WindowKind::Hann,
            _ => WindowKind::BlackmanHarris7,
        }
    }
}

/// A precomputed window with its power normalization factors.
#[derive(Debug, Clone)]
pub struct Window {
    kind: WindowKind,
    coeffs: Vec<f32>,
    power: f32,
    psd_scale: f32,
}

impl Window {
    pub fn new(kind: WindowKind, n: usize) -> Self {
        let coeffs: Vec<f32> = (0..n).map(|i| kind.coefficient(i, n)).collect();
        let sum_sq: f64 = coeffs.iter().map(|&w| w as f64 * w as f64).sum();
        let power = (sum_sq / n as f64) as f32;
        let psd_scale = (1.0 / sum_sq) as f32;
        Self { kind, coeffs, power, psd_scale }
    }

    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn coeffs(&self) -> &[f32] {
        &self.coeffs
    }

    /// RMS window power `U = Σw²/N`.
    pub fn power(&self) -> f32 {
        self.power
    }

    /// Per-bin power normalization `1/(N·U)`.
    pub fn psd_scale(&self) -> f32 {
        self.psd_scale
    }
}
