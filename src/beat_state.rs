//! Beat tracking state machine: cumulative-score update (C6), beat
//! prediction (C7), and the control-plane mutators (C10), all operating on
//! the two onset-detection ring buffers (C5) and the tempo lattice (C8).
//!
//! Follows an Ellis-style one-pass dynamic program over cumulative score,
//! adapted to run causally: the score update, prediction, and emission all
//! happen per hop rather than as an offline whole-track pass.

use log::{debug, trace};

use crate::error::ControlError;
use crate::ring_buffer::RingBuffer;
use crate::tempo::TempoEstimator;
use crate::util::round_half_up;

const TIGHTNESS: f64 = 5.0;
const ALPHA: f64 = 0.9;
const INITIAL_TEMPO_BPM: f64 = 120.0;
const INITIAL_TIME_TO_NEXT_PREDICTION: i64 = 10;

/// Outcome of processing one onset-detection sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatStepResult {
    pub beat: bool,
    pub tempo_bpm: f64,
}

pub struct BeatTrackerState {
    hop_size: usize,

    onset_df: RingBuffer,
    cumulative_score: RingBuffer,

    beat_period: f64,
    estimated_tempo: f64,
    time_to_next_prediction: i64,
    time_to_next_beat: i64,
    beat_due_in_frame: bool,

    tempo: TempoEstimator,
}

impl BeatTrackerState {
    /// `hop_size` and `odf_buffer_size` are assumed already validated by the
    /// caller (see [`crate::error::ConfigError`]).
    pub fn new(hop_size: usize, odf_buffer_size: usize) -> Self {
        let beat_period = round_half_up(60.0 * 44100.0 / (INITIAL_TEMPO_BPM * hop_size as f64));
        Self {
            hop_size,
            onset_df: RingBuffer::new(odf_buffer_size),
            cumulative_score: RingBuffer::new(odf_buffer_size),
            beat_period,
            estimated_tempo: INITIAL_TEMPO_BPM,
            time_to_next_prediction: INITIAL_TIME_TO_NEXT_PREDICTION,
            time_to_next_beat: -1,
            beat_due_in_frame: false,
            tempo: TempoEstimator::new(),
        }
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn beat_due_in_frame(&self) -> bool {
        self.beat_due_in_frame
    }

    pub fn estimated_tempo(&self) -> f64 {
        self.estimated_tempo
    }

    pub fn latest_cumulative_score_value(&self) -> f64 {
        self.cumulative_score.get(self.cumulative_score.capacity() - 1)
    }

    /// The per-hop beat tracking step: rectify, advance the countdown
    /// timers, update the cumulative score, and predict or emit a beat
    /// when the corresponding timer reaches zero.
    pub fn process_odf_sample(&mut self, sample: f64) -> BeatStepResult {
        let s = sample.abs() + 1e-4;

        self.time_to_next_prediction -= 1;
        self.time_to_next_beat -= 1;
        self.beat_due_in_frame = false;

        self.onset_df.push(s);
        self.cumulative_score_update(s);
        trace!(
            "hop: odf={s:.4} time_to_next_prediction={} time_to_next_beat={}",
            self.time_to_next_prediction, self.time_to_next_beat
        );

        if self.time_to_next_prediction == 0 {
            self.predict();
        }

        if self.time_to_next_beat == 0 {
            self.beat_due_in_frame = true;
            if let Some(update) = self.tempo.update(&self.onset_df, self.hop_size) {
                self.beat_period = update.beat_period;
                self.estimated_tempo = update.estimated_tempo;
                debug!(
                    "beat fired: beat_period={:.2} hops, estimated_tempo={:.2} bpm",
                    self.beat_period, self.estimated_tempo
                );
            }
        }

        BeatStepResult {
            beat: self.beat_due_in_frame,
            tempo_bpm: self.estimated_tempo,
        }
    }

    /// C6: one-step cumulative-score update with a log-Gaussian transition
    /// window centred one beat period in the past.
    fn cumulative_score_update(&mut self, s: f64) {
        let n = self.cumulative_score.capacity() as i64;
        let max_weighted = transition_max(
            |i| self.cumulative_score.get(i as usize),
            n,
            self.beat_period,
            TIGHTNESS,
        );
        let new_value = (1.0 - ALPHA) * s + ALPHA * max_weighted;
        self.cumulative_score.push(new_value);
    }

    /// C7: extrapolate the cumulative score one beat period into the
    /// future and pick the next beat index.
    fn predict(&mut self) {
        let b = self.beat_period;
        let n = self.cumulative_score.capacity();
        let w = (round_half_up(b) as usize).max(1);

        let mut future = vec![0.0; n + w];
        for (i, slot) in future.iter_mut().enumerate().take(n) {
            *slot = self.cumulative_score.get(i);
        }

        for idx in n..n + w {
            let extrapolated = transition_max(
                |i| {
                    let i = i as usize;
                    if i < future.len() {
                        future[i]
                    } else {
                        0.0
                    }
                },
                idx as i64,
                b,
                TIGHTNESS,
            );
            future[idx] = extrapolated;
        }

        let mut best_n = 0usize;
        let mut best_score = f64::MIN;
        for offset in 0..w {
            let w2 = (-0.5 * (((offset as f64 + 1.0) - b / 2.0) / (b / 2.0)).powi(2)).exp();
            let score = future[n + offset] * w2;
            if score > best_score {
                best_score = score;
                best_n = offset;
            }
        }

        self.time_to_next_beat = best_n as i64;
        self.time_to_next_prediction = best_n as i64 + round_half_up(b / 2.0) as i64;
    }

    /// `setTempo`.
    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), ControlError> {
        if bpm <= 0.0 {
            log::warn!("rejecting set_tempo: {bpm} bpm is not positive");
            return Err(ControlError::NonPositiveBpm(bpm));
        }
        let folded_bpm = self.tempo.set_tempo_distribution(bpm);
        let new_beat_period = round_half_up(60.0 * 44100.0 / (folded_bpm * self.hop_size as f64));
        self.beat_period = new_beat_period;
        self.resync_rings(new_beat_period);
        self.time_to_next_beat = 0;
        self.time_to_next_prediction = round_half_up(new_beat_period / 2.0) as i64;
        Ok(())
    }

    /// `fixTempo`.
    pub fn fix_tempo(&mut self, bpm: f64) -> Result<(), ControlError> {
        if bpm <= 0.0 {
            log::warn!("rejecting fix_tempo: {bpm} bpm is not positive");
            return Err(ControlError::NonPositiveBpm(bpm));
        }
        self.tempo.set_fixed_distribution(bpm);
        Ok(())
    }

    /// `doNotFixTempo`.
    pub fn do_not_fix_tempo(&mut self) {
        self.tempo.clear_fixed();
    }

    /// Forcibly resynchronise both ring buffers to a beat-period-aligned
    /// pattern (150 at the beat positions, 10 elsewhere), running backward
    /// from the newest slot. This biases subsequent cumulative-score
    /// updates on purpose, so the tracker locks onto the commanded tempo
    /// immediately instead of drifting back toward its previous estimate.
    fn resync_rings(&mut self, beat_period: f64) {
        self.onset_df.fill(10.0);
        self.cumulative_score.fill(10.0);

        let cap = self.onset_df.capacity();
        let period = (round_half_up(beat_period) as usize).max(1);

        let mut pos = cap as isize - 1;
        while pos >= 0 {
            self.onset_df.set(pos as usize, 150.0);
            self.cumulative_score.set(pos as usize, 150.0);
            pos -= period as isize;
        }
    }
}

/// Shared log-Gaussian transition maximisation used by both the
/// cumulative-score update and the predictor's forward extrapolation:
/// `max_{i in [position-round(2B), position-round(B/2)]} history(i) * W1(i-position)`.
fn transition_max(history: impl Fn(i64) -> f64, position: i64, beat_period: f64, tightness: f64) -> f64 {
    let start = position - round_half_up(2.0 * beat_period) as i64;
    let end = position - round_half_up(beat_period / 2.0) as i64;
    let start = start.max(0);
    let end = end.max(start);

    let mut max_weighted = f64::MIN;
    for i in start..=end {
        let v = (i - position) as f64;
        let w1 = (-0.5 * (tightness * (-v / beat_period).ln()).powi(2)).exp();
        let weighted = history(i) * w1;
        if weighted > max_weighted {
            max_weighted = weighted;
        }
    }
    if max_weighted == f64::MIN {
        0.0
    } else {
        max_weighted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn odf_buffer_size(hop_size: usize) -> usize {
        (512 * 512) / hop_size
    }

    #[test]
    fn construction_derives_120_bpm_beat_period() {
        let state = BeatTrackerState::new(512, odf_buffer_size(512));
        assert!((state.estimated_tempo() - 120.0).abs() < 1e-9);
        assert!(state.beat_period > 0.0);
    }

    #[test]
    fn set_tempo_rejects_non_positive_bpm() {
        let mut state = BeatTrackerState::new(512, odf_buffer_size(512));
        assert!(state.set_tempo(0.0).is_err());
        assert!(state.set_tempo(-10.0).is_err());
    }

    #[test]
    fn set_tempo_resyncs_and_schedules_next_beat() {
        let mut state = BeatTrackerState::new(512, odf_buffer_size(512));
        state.set_tempo(100.0).unwrap();
        assert_eq!(state.time_to_next_beat, 0);
        assert!(state.time_to_next_prediction > 0);
    }

    #[test]
    fn zero_stream_eventually_produces_beats() {
        let mut state = BeatTrackerState::new(512, odf_buffer_size(512));
        let mut beats = 0;
        let mut max_gap = 0i64;
        let mut since_last = 0i64;
        for _ in 0..20_000 {
            let result = state.process_odf_sample(0.0);
            since_last += 1;
            if result.beat {
                beats += 1;
                max_gap = max_gap.max(since_last);
                since_last = 0;
            }
        }
        assert!(beats >= 200, "expected >=200 beats, got {beats}");
        assert!(max_gap < 100, "max inter-beat gap was {max_gap}");
    }

    #[test]
    fn periodic_input_locks_to_its_period() {
        let mut state = BeatTrackerState::new(512, odf_buffer_size(512));
        let mut gaps = Vec::new();
        let mut since_last = 0i64;
        for i in 0..20_000 {
            let sample = if i % 43 == 0 { 1000.0 } else { 0.0 };
            let result = state.process_odf_sample(sample);
            since_last += 1;
            if result.beat {
                gaps.push(since_last);
                since_last = 0;
            }
        }
        let total = gaps.len();
        let matching = gaps.iter().filter(|&&g| g == 43).count();
        assert!(total > 0);
        assert!(
            (matching as f64) / (total as f64) >= 0.90,
            "{matching}/{total} gaps equal to 43"
        );
    }
}
