//! Real-time causal beat tracking and tempo estimation engine.
//!
//! [`Engine`] ingests monaural audio (or a pre-computed onset-detection
//! stream) one hop at a time and reports, per hop, whether a beat just
//! fired and the current tempo estimate in beats per minute.

mod beat_state;
mod config;
mod error;
mod odf;
mod resample;
mod ring_buffer;
mod tempo;
mod util;
mod window;

pub use config::{EngineConfig, OdfKind, WindowKind, TEMPO_SAMPLE_RATE};
pub use error::{ConfigError, ControlError};
pub use resample::resample;

use beat_state::BeatTrackerState;
use odf::OnsetDetectionFunction;
use util::round_half_up;

/// Outcome of processing one hop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResult {
    pub beat: bool,
    pub tempo_bpm: f64,
}

/// The slowest representable tempo, in BPM, on the 41-point tempo lattice.
const SLOWEST_LATTICE_BPM: f64 = 80.0;

fn odf_buffer_size(hop_size: usize) -> usize {
    (512 * 512) / hop_size
}

fn max_beat_period(hop_size: usize) -> f64 {
    round_half_up(60.0 * TEMPO_SAMPLE_RATE / (SLOWEST_LATTICE_BPM * hop_size as f64))
}

fn validate_sizes(hop_size: usize, frame_size: usize) -> Result<usize, ConfigError> {
    if hop_size == 0 {
        log::warn!("rejecting configuration: hop size must be greater than zero");
        return Err(ConfigError::InvalidHopSize);
    }
    if frame_size < hop_size {
        log::warn!("rejecting configuration: frame size {frame_size} smaller than hop size {hop_size}");
        return Err(ConfigError::FrameSmallerThanHop { frame_size, hop_size });
    }
    let buffer_size = odf_buffer_size(hop_size);
    let max_period = max_beat_period(hop_size);
    if (buffer_size as f64) < 2.0 * max_period {
        log::warn!(
            "rejecting configuration: odf buffer of {buffer_size} samples too small for max beat period {max_period}"
        );
        return Err(ConfigError::BufferTooSmallForMaxBeatPeriod {
            odf_buffer_size: buffer_size,
            max_beat_period: max_period as usize,
        });
    }
    log::debug!("resolved configuration: hop_size={hop_size} frame_size={frame_size} odf_buffer_size={buffer_size}");
    Ok(buffer_size)
}

/// The coupled onset-detection-function / beat-tracking engine.
pub struct Engine {
    config: EngineConfig,
    odf: OnsetDetectionFunction,
    state: BeatTrackerState,
}

impl Engine {
    /// Construct an engine with an explicit configuration.
    pub fn new(
        hop_size: usize,
        frame_size: usize,
        odf_kind: OdfKind,
        window_kind: WindowKind,
    ) -> Result<Self, ConfigError> {
        let buffer_size = validate_sizes(hop_size, frame_size)?;
        let config = EngineConfig {
            hop_size,
            frame_size,
            sample_rate: TEMPO_SAMPLE_RATE,
            odf_kind,
            window_kind,
        };
        Ok(Self {
            odf: OnsetDetectionFunction::new(hop_size, frame_size, odf_kind, window_kind),
            state: BeatTrackerState::new(hop_size, buffer_size),
            config,
        })
    }

    /// `hopSize = 512`, `frameSize = 1024`, `ComplexSpectralDifferenceHWR`, `Hanning`.
    pub fn new_default() -> Self {
        let defaults = EngineConfig::default();
        Self::new(defaults.hop_size, defaults.frame_size, defaults.odf_kind, defaults.window_kind)
            .expect("default configuration is always valid")
    }

    /// Defaults for `odfKind`/`windowKind`, frame size pinned to twice the
    /// given hop size, as the reference configuration does.
    pub fn new_with_hop(hop_size: usize) -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();
        Self::new(hop_size, hop_size * 2, defaults.odf_kind, defaults.window_kind)
    }

    pub fn new_with_hop_and_frame(hop_size: usize, frame_size: usize) -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();
        Self::new(hop_size, frame_size, defaults.odf_kind, defaults.window_kind)
    }

    /// `updateHopAndFrameSize`: reinitialise the ODF engine and both ring
    /// buffers. Not safe to call concurrently with `process_*`.
    pub fn update_hop_and_frame_size(&mut self, hop_size: usize, frame_size: usize) -> Result<(), ConfigError> {
        let buffer_size = validate_sizes(hop_size, frame_size)?;
        self.odf = OnsetDetectionFunction::new(hop_size, frame_size, self.config.odf_kind, self.config.window_kind);
        self.state = BeatTrackerState::new(hop_size, buffer_size);
        self.config.hop_size = hop_size;
        self.config.frame_size = frame_size;
        Ok(())
    }

    /// Run the windowed framer, ODF calculator, and beat tracking step for
    /// one hop's worth of new audio. `frame` must contain exactly
    /// `hop_size()` samples; a shorter slice is zero-padded, a longer one
    /// truncated.
    pub fn process_audio_frame(&mut self, frame: &[f64]) -> StepResult {
        let sample = self.odf.calculate_sample(frame);
        self.process_odf_sample(sample)
    }

    /// Run only the beat tracking step on a pre-computed onset-detection
    /// sample, bypassing the framer and ODF calculator.
    pub fn process_odf_sample(&mut self, sample: f64) -> StepResult {
        let result = self.state.process_odf_sample(sample);
        StepResult {
            beat: result.beat,
            tempo_bpm: result.tempo_bpm,
        }
    }

    /// `setTempo`: collapse the tempo lattice onto `bpm` (folded into
    /// `[80, 160)`) and forcibly resynchronise the running state.
    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), ControlError> {
        self.state.set_tempo(bpm)
    }

    /// `fixTempo`: future beats fall back to `bpm`'s folded distribution
    /// instead of the last observed one.
    pub fn fix_tempo(&mut self, bpm: f64) -> Result<(), ControlError> {
        self.state.fix_tempo(bpm)
    }

    /// `doNotFixTempo`.
    pub fn do_not_fix_tempo(&mut self) {
        self.state.do_not_fix_tempo();
    }

    pub fn hop_size(&self) -> usize {
        self.config.hop_size
    }

    pub fn frame_size(&self) -> usize {
        self.config.frame_size
    }

    pub fn beat_due_in_current_frame(&self) -> bool {
        self.state.beat_due_in_frame()
    }

    pub fn current_tempo_estimate(&self) -> f64 {
        self.state.estimated_tempo()
    }

    pub fn latest_cumulative_score_value(&self) -> f64 {
        self.state.latest_cumulative_score_value()
    }

    /// `beatTimeInSeconds(frameIndex, hopSize, sampleRate) = hopSize * frameIndex / sampleRate`.
    pub fn beat_time_in_seconds(frame_index: u64, hop_size: usize, sample_rate: f64) -> f64 {
        (hop_size as f64) * (frame_index as f64) / sample_rate
    }
}
