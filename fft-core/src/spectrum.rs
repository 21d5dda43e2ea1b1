//! # Spectrum Helpers
//!
//! Small read-only views over a transformed [`SampleBuffer`]: magnitudes,
//! the strongest bin and its frequency. Consumers such as a tuner build on
//! these; the engine itself never calls them.

use crate::buffer::SampleBuffer;

/// Magnitude `|X_k|` of the first half of the spectrum.
///
/// For real input the upper half mirrors the lower one, so only bins up to
/// (but excluding) Nyquist are returned.
pub fn magnitudes(spectrum: &SampleBuffer) -> Vec<f32> {
    spectrum
        .real
        .iter()
        .zip(spectrum.imag.iter())
        .take(spectrum.len() / 2)
        .map(|(re, im)| re.hypot(*im))
        .collect()
}

/// Index of the strongest bin, ignoring DC. `None` when there is no bin
/// besides DC or every magnitude is zero.
pub fn peak_bin(magnitudes: &[f32]) -> Option<usize> {
    magnitudes
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, m)| **m > 0.0)
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(bin, _)| bin)
}

/// Centre frequency in Hz of `bin` for an `n`-point transform.
pub fn bin_frequency(bin: usize, n: usize, sample_rate: f32) -> f32 {
    bin as f32 * sample_rate / n as f32
}

/// Sub-bin position of a peak by parabolic interpolation over the log
/// magnitudes of its neighbours. Falls back to the bin itself at the edges
/// or when the neighbourhood is flat.
pub fn interpolate_peak(magnitudes: &[f32], bin: usize) -> f32 {
    if bin == 0 || bin + 1 >= magnitudes.len() {
        return bin as f32;
    }
    let y1 = magnitudes[bin - 1].ln();
    let y2 = magnitudes[bin].ln();
    let y3 = magnitudes[bin + 1].ln();
    if !(y1.is_finite() && y2.is_finite() && y3.is_finite()) {
        return bin as f32;
    }

    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-6 {
        return bin as f32;
    }
    bin as f32 + (y3 - y1) / (2.0 * denominator)
}
