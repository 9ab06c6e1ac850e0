//! Tempo estimator: adaptive-threshold + balanced autocorrelation +
//! Rayleigh-weighted comb filter bank + a one-step Viterbi-style update over
//! a 41-point BPM lattice.
//!
//! The overall shape — autocorrelation via FFT, a nested-harmonic comb
//! filter bank, and a hidden-Markov-style forward step — follows the
//! classic tempo-tracking pipeline, fixed here to a 41-state/128-lag/
//! 512-sample lattice.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::ring_buffer::RingBuffer;
use crate::util::round_half_up;

const NUM_LAGS: usize = 128;
const NUM_TEMPO_STATES: usize = 41;
const ACF_LEN: usize = 512;
const ACF_FFT_LEN: usize = 1024;
const RAYLEIGH_PARAMETER: f64 = 43.0;
const TEMPO_TRANSITION_SIGMA: f64 = NUM_TEMPO_STATES as f64 / 8.0;
const BPM_MIN: f64 = 80.0;
const BPM_MAX: f64 = 160.0;
const BPM_STEP: f64 = 2.0;

/// Result of a single tempo re-estimation, produced only on hops where a
/// beat fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoUpdate {
    pub beat_period: f64,
    pub estimated_tempo: f64,
}

pub struct TempoEstimator {
    weighting_vector: [f64; NUM_LAGS],
    transition_matrix: Vec<[f64; NUM_TEMPO_STATES]>,

    prev_delta: [f64; NUM_TEMPO_STATES],
    prev_delta_fixed: [f64; NUM_TEMPO_STATES],
    delta: [f64; NUM_TEMPO_STATES],
    tempo_observation_vector: [f64; NUM_TEMPO_STATES],
    comb_filter_bank_output: [f64; NUM_LAGS],

    resampled_onset_df: Vec<f64>,
    acf: Vec<f64>,

    forward_fft: Arc<dyn Fft<f64>>,
    inverse_fft: Arc<dyn Fft<f64>>,
    fft_buffer: Vec<Complex<f64>>,

    tempo_fixed: bool,
}

impl TempoEstimator {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let forward_fft = planner.plan_fft_forward(ACF_FFT_LEN);
        let inverse_fft = planner.plan_fft_inverse(ACF_FFT_LEN);

        let mut weighting_vector = [0.0; NUM_LAGS];
        for (i, w) in weighting_vector.iter_mut().enumerate() {
            *w = rayleigh(i as f64 + 1.0, RAYLEIGH_PARAMETER);
        }

        let mut transition_matrix = vec![[0.0; NUM_TEMPO_STATES]; NUM_TEMPO_STATES];
        for (i, row) in transition_matrix.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = gaussian(j as f64 + 1.0, i as f64 + 1.0, TEMPO_TRANSITION_SIGMA);
            }
        }

        let mut prev_delta = [0.0; NUM_TEMPO_STATES];
        prev_delta[Self::bpm_index(120.0)] = 1.0;

        Self {
            weighting_vector,
            transition_matrix,
            prev_delta,
            prev_delta_fixed: [0.0; NUM_TEMPO_STATES],
            delta: [0.0; NUM_TEMPO_STATES],
            tempo_observation_vector: [0.0; NUM_TEMPO_STATES],
            comb_filter_bank_output: [0.0; NUM_LAGS],
            resampled_onset_df: vec![0.0; ACF_LEN],
            acf: vec![0.0; ACF_LEN],
            forward_fft,
            inverse_fft,
            fft_buffer: vec![Complex::new(0.0, 0.0); ACF_FFT_LEN],
            tempo_fixed: false,
        }
    }

    /// Fold `bpm` into `[80, 160)` by repeated halving/doubling.
    pub fn fold_bpm(bpm: f64) -> f64 {
        let mut b = bpm;
        while b >= BPM_MAX {
            b /= 2.0;
        }
        while b < BPM_MIN {
            b *= 2.0;
        }
        b
    }

    /// Lattice index `0..40` that `bpm` folds into.
    fn bpm_index(bpm: f64) -> usize {
        let folded = Self::fold_bpm(bpm);
        (round_half_up((folded - BPM_MIN) / BPM_STEP) as usize).min(NUM_TEMPO_STATES - 1)
    }

    /// `setTempo`: collapse the running distribution onto a single folded
    /// BPM and report the folded value so the caller can derive a new beat
    /// period from it.
    pub fn set_tempo_distribution(&mut self, bpm: f64) -> f64 {
        let idx = Self::bpm_index(bpm);
        self.prev_delta = [0.0; NUM_TEMPO_STATES];
        self.prev_delta[idx] = 1.0;
        Self::fold_bpm(bpm)
    }

    /// `fixTempo`: store a fixed unit-mass distribution that future beats
    /// will fall back onto, and start fixing.
    pub fn set_fixed_distribution(&mut self, bpm: f64) {
        let idx = Self::bpm_index(bpm);
        self.prev_delta_fixed = [0.0; NUM_TEMPO_STATES];
        self.prev_delta_fixed[idx] = 1.0;
        self.tempo_fixed = true;
    }

    /// `doNotFixTempo`.
    pub fn clear_fixed(&mut self) {
        self.tempo_fixed = false;
    }

    /// Run the full tempo re-estimation pipeline (C9 resample through the
    /// Viterbi-style transition step) and return the new beat period /
    /// tempo, or `None` if the winning lattice state folds to a
    /// non-positive beat period (degenerate numeric state, left for the
    /// caller to ignore per the clamp-and-keep-previous-value policy).
    pub fn update(&mut self, onset_df: &RingBuffer, hop_size: usize) -> Option<TempoUpdate> {
        let cap = onset_df.capacity();
        let mut source = Vec::with_capacity(cap);
        for i in 0..cap {
            source.push(onset_df.get(i));
        }
        let ratio = ACF_LEN as f64 / cap.max(1) as f64;
        self.resampled_onset_df = crate::resample::resample(&source, ACF_LEN, ratio);

        adaptive_threshold(&mut self.resampled_onset_df, 8, 7);
        self.balanced_acf();
        self.comb_filter_bank();
        adaptive_threshold(&mut self.comb_filter_bank_output, 8, 7);
        self.tempo_observation();
        self.transition_step();

        let argmax = self
            .delta
            .iter()
            .enumerate()
            .fold((0usize, f64::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc })
            .0;

        let bpm = 2.0 * argmax as f64 + BPM_MIN;
        let beat_period = round_half_up(60.0 * 44100.0 / (bpm * hop_size as f64));

        self.prev_delta = self.delta;

        if beat_period > 0.0 {
            let estimated_tempo = 60.0 / ((hop_size as f64 / 44100.0) * beat_period);
            Some(TempoUpdate {
                beat_period,
                estimated_tempo,
            })
        } else {
            None
        }
    }

    fn balanced_acf(&mut self) {
        for (i, c) in self.fft_buffer.iter_mut().enumerate() {
            *c = Complex::new(self.resampled_onset_df.get(i).copied().unwrap_or(0.0), 0.0);
        }
        self.forward_fft.process(&mut self.fft_buffer);
        for c in self.fft_buffer.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        self.inverse_fft.process(&mut self.fft_buffer);
        for i in 0..ACF_LEN {
            let r = self.fft_buffer[i].re;
            self.acf[i] = r / (ACF_LEN - i) as f64 / ACF_FFT_LEN as f64;
        }
    }

    /// Rayleigh-weighted four-harmonic comb, lags `2..=127`.
    fn comb_filter_bank(&mut self) {
        self.comb_filter_bank_output = [0.0; NUM_LAGS];
        for i in 2..=127usize {
            let mut total = 0.0;
            for a in 1..=4i64 {
                for b in (1 - a)..=(a - 1) {
                    let idx = (a * i as i64 + b - 1) as usize;
                    total += self.acf[idx] * self.weighting_vector[i - 1] / (2 * a - 1) as f64;
                }
            }
            self.comb_filter_bank_output[i - 1] = total;
        }
    }

    fn tempo_observation(&mut self) {
        const K: f64 = 60.0 * 44100.0 / ACF_LEN as f64;
        for i in 0..NUM_TEMPO_STATES {
            let i_f = i as f64;
            let idx1 = (round_half_up(K / (2.0 * i_f + 80.0)) as isize - 1).clamp(0, NUM_LAGS as isize - 1) as usize;
            let idx2 = (round_half_up(K / (4.0 * i_f + 160.0)) as isize - 1).clamp(0, NUM_LAGS as isize - 1) as usize;
            self.tempo_observation_vector[i] =
                self.comb_filter_bank_output[idx1] + self.comb_filter_bank_output[idx2];
        }
    }

    fn transition_step(&mut self) {
        if self.tempo_fixed {
            self.prev_delta = self.prev_delta_fixed;
        }

        let mut sum = 0.0;
        for j in 0..NUM_TEMPO_STATES {
            let mut best = f64::MIN;
            for i in 0..NUM_TEMPO_STATES {
                let v = self.prev_delta[i] * self.transition_matrix[i][j];
                if v > best {
                    best = v;
                }
            }
            self.delta[j] = best * self.tempo_observation_vector[j];
            sum += self.delta[j];
        }
        if sum > 0.0 {
            for v in self.delta.iter_mut() {
                *v /= sum;
            }
        }
    }
}

impl Default for TempoEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn rayleigh(x: f64, sigma: f64) -> f64 {
    (x / (sigma * sigma)) * (-(x * x) / (2.0 * sigma * sigma)).exp()
}

fn gaussian(x: f64, mean: f64, sigma: f64) -> f64 {
    (-0.5 * ((x - mean) / sigma).powi(2)).exp()
}

/// Subtract a local moving average over `[i - before, i + after]` (clamped
/// to the slice bounds) and floor negatives to zero.
fn adaptive_threshold(values: &mut [f64], before: usize, after: usize) {
    let n = values.len();
    let original = values.to_vec();
    for i in 0..n {
        let lo = i.saturating_sub(before);
        let hi = (i + after).min(n - 1);
        let mean: f64 = original[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64;
        values[i] = (values[i] - mean).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_bpm_maps_into_range() {
        assert_eq!(TempoEstimator::fold_bpm(120.0), 120.0);
        assert!((TempoEstimator::fold_bpm(60.0) - 120.0).abs() < 1e-9);
        assert!((TempoEstimator::fold_bpm(240.0) - 120.0).abs() < 1e-9);
        assert!((TempoEstimator::fold_bpm(50.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn bpm_index_round_trips_grid_points() {
        assert_eq!(TempoEstimator::bpm_index(80.0), 0);
        assert_eq!(TempoEstimator::bpm_index(158.0), 39);
    }

    #[test]
    fn set_tempo_distribution_is_unit_mass() {
        let mut est = TempoEstimator::new();
        est.set_tempo_distribution(100.0);
        let sum: f64 = est.prev_delta.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(est.prev_delta[TempoEstimator::bpm_index(100.0)], 1.0);
    }

    #[test]
    fn adaptive_threshold_never_negative() {
        let mut v = vec![-5.0, 10.0, -2.0, 3.0, 100.0, -100.0];
        adaptive_threshold(&mut v, 8, 7);
        assert!(v.iter().all(|&x| x >= 0.0));
    }

    #[test]
    fn update_produces_finite_values_on_silence() {
        let mut est = TempoEstimator::new();
        let rb = RingBuffer::new(512);
        if let Some(result) = est.update(&rb, 512) {
            assert!(result.beat_period.is_finite());
            assert!(result.estimated_tempo.is_finite());
        }
    }

    #[test]
    fn update_on_periodic_input_is_finite_and_positive_when_present() {
        let mut est = TempoEstimator::new();
        let mut rb = RingBuffer::new(512);
        for i in 0..512 {
            rb.push(if i % 43 == 0 { 1000.0 } else { 0.0 });
        }
        let result = est.update(&rb, 512);
        if let Some(r) = result {
            assert!(r.beat_period > 0.0);
            assert!(r.estimated_tempo > 0.0);
        }
    }
}
