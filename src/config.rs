//! Engine configuration surface.
//!
//! `EngineConfig` and the two kind enums are plain serialisable values so a
//! host can log or round-trip the configuration it used to build an engine.
//! The engine itself never reads or writes files, environment variables, or
//! a CLI; construction is always driven by values the host already has.

use serde::{Deserialize, Serialize};

/// Sample rate the tempo lattice math is defined against.
///
/// The reference behaviour hard-codes 44100 Hz in the beat-period and BPM
/// formulas regardless of the configured [`EngineConfig::sample_rate`]; that
/// field exists for host-facing introspection and for
/// [`crate::Engine::beat_time_in_seconds`], not for the tempo lattice itself.
pub const TEMPO_SAMPLE_RATE: f64 = 44100.0;

/// The ten selectable onset detection functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OdfKind {
    EnergyEnvelope,
    EnergyDifference,
    SpectralDifference,
    SpectralDifferenceHWR,
    PhaseDeviation,
    ComplexSpectralDifference,
    ComplexSpectralDifferenceHWR,
    HighFrequencyContent,
    HighFrequencySpectralDifference,
    HighFrequencySpectralDifferenceHWR,
}

/// Whether a detection function needs the magnitude spectrum, the phase
/// spectrum, or both, to dispatch once per hop without redundant work.
impl OdfKind {
    pub(crate) fn needs_spectrum(self) -> bool {
        !matches!(self, OdfKind::EnergyEnvelope | OdfKind::EnergyDifference)
    }
}

/// The five selectable analysis windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowKind {
    Rectangular,
    Hanning,
    Hamming,
    Blackman,
    Tukey,
}

/// Immutable (except via `update_hop_and_frame_size`) engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub hop_size: usize,
    pub frame_size: usize,
    pub sample_rate: f64,
    pub odf_kind: OdfKind,
    pub window_kind: WindowKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hop_size: 512,
            frame_size: 1024,
            sample_rate: TEMPO_SAMPLE_RATE,
            odf_kind: OdfKind::ComplexSpectralDifferenceHWR,
            window_kind: WindowKind::Hanning,
        }
    }
}
