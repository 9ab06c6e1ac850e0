//! Error types for engine construction, reconfiguration, and the control plane.
//!
//! Neither type appears on the per-hop hot path: `process_audio_frame` and
//! `process_odf_sample` always return a plain [`crate::StepResult`].

use thiserror::Error;

/// Errors raised at construction or [`crate::Engine::update_hop_and_frame_size`].
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ConfigError {
    /// `hopSize` was zero.
    #[error("hop size must be greater than zero")]
    InvalidHopSize,

    /// `frameSize` was smaller than `hopSize`.
    #[error("frame size ({frame_size}) must be at least as large as hop size ({hop_size})")]
    FrameSmallerThanHop { frame_size: usize, hop_size: usize },

    /// `odfBufferSize` cannot hold two periods of the slowest representable tempo.
    #[error(
        "onset detection function buffer of {odf_buffer_size} samples is too small for the \
         maximum representable beat period of {max_beat_period} samples"
    )]
    BufferTooSmallForMaxBeatPeriod {
        odf_buffer_size: usize,
        max_beat_period: usize,
    },
}

/// Errors raised by the control-plane commands (`setTempo`/`fixTempo`).
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ControlError {
    /// The requested tempo was not a positive number of beats per minute.
    #[error("tempo must be a positive number of beats per minute, got {0}")]
    NonPositiveBpm(f64),
}
