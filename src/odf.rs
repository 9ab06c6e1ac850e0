//! Windowed framer (C1), window table (C2), and onset detection function
//! calculator (C4).
//!
//! `OnsetDetectionFunction::calculate_sample` is the only entry point: given
//! one hop's worth of new audio, it maintains the internal frame buffer,
//! runs the forward FFT when the selected kind needs a spectrum, and returns
//! a single scalar ODF sample. No allocation happens after construction.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::config::{OdfKind, WindowKind};
use crate::window::build_window;

/// Wraps `x` into `(-pi, pi]`.
fn wrap(x: f64) -> f64 {
    let mut v = x;
    while v <= -PI {
        v += 2.0 * PI;
    }
    while v > PI {
        v -= 2.0 * PI;
    }
    v
}

pub struct OnsetDetectionFunction {
    frame_size: usize,
    hop_size: usize,
    kind: OdfKind,

    window: Vec<f64>,
    /// Raw time-domain frame, oldest sample first, updated every hop.
    frame: Vec<f64>,
    /// Half-rotated, windowed copy handed to the FFT.
    rotated: Vec<f64>,

    fft: Arc<dyn Fft<f64>>,
    fft_buffer: Vec<Complex<f64>>,

    magnitude: Vec<f64>,
    phase: Vec<f64>,
    /// `magnitude`/`prev_mag_spec` with the upper half mirrored from the
    /// lower half, used only by the `SpectralDifference` family. Preserves
    /// the reference implementation's quirk of leaving bin 0 untouched by
    /// the mirroring rather than "fixing" it.
    mirrored_magnitude: Vec<f64>,

    prev_mag_spec: Vec<f64>,
    prev_mirrored_mag: Vec<f64>,
    prev_phase: Vec<f64>,
    prev_phase2: Vec<f64>,
    prev_energy_sum: f64,
}

impl OnsetDetectionFunction {
    pub fn new(hop_size: usize, frame_size: usize, kind: OdfKind, window_kind: WindowKind) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(frame_size);

        Self {
            frame_size,
            hop_size,
            kind,
            window: build_window(window_kind, frame_size),
            frame: vec![0.0; frame_size],
            rotated: vec![0.0; frame_size],
            fft,
            fft_buffer: vec![Complex::new(0.0, 0.0); frame_size],
            magnitude: vec![0.0; frame_size],
            phase: vec![0.0; frame_size],
            mirrored_magnitude: vec![0.0; frame_size],
            prev_mag_spec: vec![0.0; frame_size],
            prev_mirrored_mag: vec![0.0; frame_size],
            prev_phase: vec![0.0; frame_size],
            prev_phase2: vec![0.0; frame_size],
            prev_energy_sum: 0.0,
        }
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Shift the frame buffer left by `hop_size` and write `new_samples`
    /// into the tail. `new_samples` shorter than `hop_size` is zero-padded;
    /// longer is truncated — the caller owns validation.
    fn shift_frame(&mut self, new_samples: &[f64]) {
        let h = self.hop_size;
        let n = self.frame_size;
        self.frame.copy_within(h.., 0);
        let take = new_samples.len().min(h);
        self.frame[n - h..n - h + take].copy_from_slice(&new_samples[..take]);
        for v in &mut self.frame[n - h + take..n] {
            *v = 0.0;
        }
    }

    /// Half-rotate (FFT-shift) and window the current frame into `rotated`.
    fn rotate_and_window(&mut self) {
        let n = self.frame_size;
        let half = n / 2;
        for i in 0..half {
            self.rotated[i] = self.frame[half + i] * self.window[i];
        }
        for i in half..n {
            self.rotated[i] = self.frame[i - half] * self.window[i];
        }
    }

    fn compute_spectrum(&mut self) {
        for (c, &s) in self.fft_buffer.iter_mut().zip(self.rotated.iter()) {
            *c = Complex::new(s, 0.0);
        }
        self.fft.process(&mut self.fft_buffer);
        for (i, c) in self.fft_buffer.iter().enumerate() {
            self.magnitude[i] = c.norm();
            self.phase[i] = c.arg();
        }
    }

    /// Mirror the lower half of `mag` onto its upper half, leaving index 0
    /// untouched, matching the reference implementation's behaviour.
    fn mirror_into(mag: &[f64], out: &mut [f64]) {
        out.copy_from_slice(mag);
        let half = mag.len() / 2;
        for k in 1..half {
            out[mag.len() - k] = mag[k];
        }
    }

    /// C4: produce the scalar ODF sample for one hop of new audio.
    pub fn calculate_sample(&mut self, new_samples: &[f64]) -> f64 {
        self.shift_frame(new_samples);
        self.rotate_and_window();

        if self.kind.needs_spectrum() {
            self.compute_spectrum();
        }

        let value = match self.kind {
            OdfKind::EnergyEnvelope => self.frame.iter().map(|v| v * v).sum(),
            OdfKind::EnergyDifference => {
                let energy: f64 = self.frame.iter().map(|v| v * v).sum();
                (energy - self.prev_energy_sum).max(0.0)
            }
            OdfKind::SpectralDifference => {
                Self::mirror_into(&self.magnitude, &mut self.mirrored_magnitude);
                self.mirrored_magnitude
                    .iter()
                    .zip(self.prev_mirrored_mag.iter())
                    .map(|(m, p)| (m - p).abs())
                    .sum()
            }
            OdfKind::SpectralDifferenceHWR => {
                Self::mirror_into(&self.magnitude, &mut self.mirrored_magnitude);
                self.mirrored_magnitude
                    .iter()
                    .zip(self.prev_mirrored_mag.iter())
                    .map(|(m, p)| (m - p).max(0.0))
                    .sum()
            }
            OdfKind::PhaseDeviation => self
                .phase
                .iter()
                .zip(self.prev_phase.iter())
                .zip(self.prev_phase2.iter())
                .zip(self.magnitude.iter())
                .map(|(((phi, p1), p2), mag)| {
                    if *mag > 0.1 {
                        wrap(phi - 2.0 * p1 + p2).abs()
                    } else {
                        0.0
                    }
                })
                .sum(),
            OdfKind::ComplexSpectralDifference => self.complex_domain_sum(false),
            OdfKind::ComplexSpectralDifferenceHWR => self.complex_domain_sum(true),
            OdfKind::HighFrequencyContent => self
                .magnitude
                .iter()
                .enumerate()
                .map(|(k, m)| m * (k as f64 + 1.0))
                .sum(),
            OdfKind::HighFrequencySpectralDifference => self
                .magnitude
                .iter()
                .zip(self.prev_mag_spec.iter())
                .enumerate()
                .map(|(k, (m, p))| (m - p).abs() * (k as f64 + 1.0))
                .sum(),
            OdfKind::HighFrequencySpectralDifferenceHWR => self
                .magnitude
                .iter()
                .zip(self.prev_mag_spec.iter())
                .enumerate()
                .map(|(k, (m, p))| ((m - p) * (k as f64 + 1.0)).max(0.0))
                .sum(),
        };

        self.update_previous_state();
        value
    }

    fn complex_domain_sum(&self, half_wave_rectify: bool) -> f64 {
        let mut total = 0.0;
        for k in 0..self.frame_size {
            let mag = self.magnitude[k];
            let prev_mag = self.prev_mag_spec[k];
            if half_wave_rectify && mag - prev_mag <= 0.0 {
                continue;
            }
            let delta_phi = wrap(self.phase[k] - 2.0 * self.prev_phase[k] + self.prev_phase2[k]);
            let term = mag * mag + prev_mag * prev_mag - 2.0 * mag * prev_mag * delta_phi.cos();
            total += term.max(0.0).sqrt();
        }
        total
    }

    /// Update `prev*` state exactly once per call, in the kind-appropriate
    /// manner.
    fn update_previous_state(&mut self) {
        match self.kind {
            OdfKind::EnergyEnvelope | OdfKind::EnergyDifference => {
                self.prev_energy_sum = self.frame.iter().map(|v| v * v).sum();
            }
            OdfKind::SpectralDifference | OdfKind::SpectralDifferenceHWR => {
                self.prev_mirrored_mag.copy_from_slice(&self.mirrored_magnitude);
                self.prev_mag_spec.copy_from_slice(&self.magnitude);
            }
            OdfKind::PhaseDeviation => {
                self.prev_phase2.copy_from_slice(&self.prev_phase);
                self.prev_phase.copy_from_slice(&self.phase);
            }
            OdfKind::ComplexSpectralDifference | OdfKind::ComplexSpectralDifferenceHWR => {
                self.prev_mag_spec.copy_from_slice(&self.magnitude);
                self.prev_phase2.copy_from_slice(&self.prev_phase);
                self.prev_phase.copy_from_slice(&self.phase);
            }
            OdfKind::HighFrequencyContent
            | OdfKind::HighFrequencySpectralDifference
            | OdfKind::HighFrequencySpectralDifferenceHWR => {
                self.prev_mag_spec.copy_from_slice(&self.magnitude);
            }
        }
    }
}
