//! Precomputed analysis window tables (C2).
//!
//! A window is built once per configuration and reused for the lifetime of
//! the [`crate::odf::OnsetDetectionFunction`] it belongs to.

use std::f64::consts::PI;

use crate::config::WindowKind;

/// Tukey window taper fraction used by the reference implementation.
const TUKEY_ALPHA: f64 = 0.5;

/// Build a length-`size` window table for `kind`.
pub fn build_window(kind: WindowKind, size: usize) -> Vec<f64> {
    match kind {
        WindowKind::Rectangular => vec![1.0; size],
        WindowKind::Hanning => (0..size).map(|i| hanning(i, size)).collect(),
        WindowKind::Hamming => (0..size).map(|i| hamming(i, size)).collect(),
        WindowKind::Blackman => (0..size).map(|i| blackman(i, size)).collect(),
        WindowKind::Tukey => tukey(size, TUKEY_ALPHA),
    }
}

fn hanning(i: usize, size: usize) -> f64 {
    if size <= 1 {
        return 1.0;
    }
    0.5 * (1.0 - (2.0 * PI * i as f64 / (size - 1) as f64).cos())
}

fn hamming(i: usize, size: usize) -> f64 {
    if size <= 1 {
        return 1.0;
    }
    0.54 - 0.46 * (2.0 * PI * i as f64 / (size - 1) as f64).cos()
}

fn blackman(i: usize, size: usize) -> f64 {
    if size <= 1 {
        return 1.0;
    }
    let n = (size - 1) as f64;
    0.42 - 0.5 * (2.0 * PI * i as f64 / n).cos() + 0.08 * (4.0 * PI * i as f64 / n).cos()
}

fn tukey(size: usize, alpha: f64) -> Vec<f64> {
    if size <= 1 {
        return vec![1.0; size];
    }
    let n = (size - 1) as f64;
    let taper = (alpha * n / 2.0).floor() as usize;
    (0..size)
        .map(|i| {
            if i < taper {
                0.5 * (1.0 + (PI * (i as f64 / (alpha * n / 2.0) - 1.0)).cos())
            } else if i >= size - taper {
                let j = (size - 1 - i) as f64;
                0.5 * (1.0 + (PI * (j / (alpha * n / 2.0) - 1.0)).cos())
            } else {
                1.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangular_is_all_ones() {
        let w = build_window(WindowKind::Rectangular, 16);
        assert!(w.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn hanning_is_zero_at_edges_and_peaks_at_centre() {
        let w = build_window(WindowKind::Hanning, 17);
        assert!(w[0].abs() < 1e-9);
        assert!(w[16].abs() < 1e-9);
        let centre = w[8];
        assert!(w.iter().all(|&v| v <= centre + 1e-9));
    }

    #[test]
    fn all_windows_are_symmetric() {
        for kind in [
            WindowKind::Rectangular,
            WindowKind::Hanning,
            WindowKind::Hamming,
            WindowKind::Blackman,
            WindowKind::Tukey,
        ] {
            let w = build_window(kind, 32);
            for i in 0..w.len() {
                assert!(
                    (w[i] - w[w.len() - 1 - i]).abs() < 1e-9,
                    "{:?} not symmetric at {i}",
                    kind
                );
            }
        }
    }
}
