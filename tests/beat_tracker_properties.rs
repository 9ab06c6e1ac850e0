//! End-to-end invariant and scenario tests for the beat tracking engine.
//!
//! Uses a small deterministic xorshift PRNG instead of the `rand` crate so
//! these checks never flake between runs.

use std::sync::Once;

use beat_tracker::{ConfigError, Engine, OdfKind, WindowKind};

const HOP_SIZE: usize = 512;

static LOG_INIT: Once = Once::new();

/// Initialises `env_logger` once per test binary. Run with `RUST_LOG=debug
/// cargo test -- --nocapture` to see the engine's diagnostic output while a
/// test runs.
fn init_logging() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Deterministic xorshift64* generator, seeded explicitly per test.
struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: seed | 1,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Uniform `f64` in `[lo, hi)`.
    fn next_f64(&mut self, lo: f64, hi: f64) -> f64 {
        let fraction = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        lo + fraction * (hi - lo)
    }
}

struct RunStats {
    beats: usize,
    max_gap: i64,
    gaps: Vec<i64>,
}

fn run_odf_stream(engine: &mut Engine, samples: impl Iterator<Item = f64>) -> RunStats {
    let mut beats = 0;
    let mut max_gap = 0i64;
    let mut since_last = 0i64;
    let mut gaps = Vec::new();
    for s in samples {
        since_last += 1;
        let result = engine.process_odf_sample(s);
        if result.beat {
            beats += 1;
            max_gap = max_gap.max(since_last);
            gaps.push(since_last);
            since_last = 0;
        }
    }
    RunStats { beats, max_gap, gaps }
}

#[test]
fn silent_input_still_produces_regular_beats() {
    init_logging();
    let mut engine = Engine::new_default();
    let stats = run_odf_stream(&mut engine, std::iter::repeat(0.0).take(20_000));
    assert!(stats.beats >= 200, "expected >=200 beats, got {}", stats.beats);
    assert!(stats.max_gap < 100, "max gap was {}", stats.max_gap);
}

#[test]
fn uniform_random_input_still_produces_regular_beats() {
    init_logging();
    let mut engine = Engine::new_default();
    let mut rng = Xorshift64::new(0x5EED_5EED_5EED_5EED);
    let samples: Vec<f64> = (0..20_000).map(|_| rng.next_f64(0.0, 1000.0)).collect();
    let stats = run_odf_stream(&mut engine, samples.into_iter());
    assert!(stats.beats >= 200, "expected >=200 beats, got {}", stats.beats);
    assert!(stats.max_gap < 100, "max gap was {}", stats.max_gap);
}

#[test]
fn negated_input_produces_the_same_beats_as_its_rectified_positive() {
    init_logging();
    let mut positive_engine = Engine::new_default();
    let mut negative_engine = Engine::new_default();
    let mut rng = Xorshift64::new(0x5EED_5EED_5EED_5EED);
    let magnitudes: Vec<f64> = (0..20_000).map(|_| rng.next_f64(0.0, 1000.0)).collect();

    let positive_stats = run_odf_stream(&mut positive_engine, magnitudes.iter().copied());
    let negative_stats = run_odf_stream(&mut negative_engine, magnitudes.iter().map(|m| -m));

    assert_eq!(positive_stats.beats, negative_stats.beats);
    assert!(negative_stats.beats >= 200);
    assert!(negative_stats.max_gap < 100);
}

#[test]
fn periodic_delta_input_locks_its_beat_interval_to_the_delta_period() {
    init_logging();
    let mut engine = Engine::new_default();
    let samples = (0..20_000usize).map(|i| if i % 43 == 0 { 1000.0 } else { 0.0 });
    let stats = run_odf_stream(&mut engine, samples);

    let matching = stats.gaps.iter().filter(|&&g| g == 43).count();
    assert!(!stats.gaps.is_empty());
    let ratio = matching as f64 / stats.gaps.len() as f64;
    assert!(ratio >= 0.99, "only {:.2}% of gaps were exactly 43", ratio * 100.0);
}

#[test]
fn constructors_report_the_hop_size_they_were_given() {
    init_logging();
    let default_engine = Engine::new_default();
    assert_eq!(default_engine.hop_size(), 512);

    let hop_1024 = Engine::new_with_hop(1024).unwrap();
    assert_eq!(hop_1024.hop_size(), 1024);

    let hop_256 = Engine::new_with_hop_and_frame(256, 512).unwrap();
    assert_eq!(hop_256.hop_size(), 256);
}

#[test]
fn set_tempo_command_converges_near_the_commanded_bpm() {
    init_logging();
    let mut engine = Engine::new_default();
    let warm_up = (0..20_000usize).map(|i| if i % 43 == 0 { 1000.0 } else { 0.0 });
    for s in warm_up {
        engine.process_odf_sample(s);
    }

    engine.set_tempo(100.0).unwrap();

    let mut hops_until_beat = 0usize;
    let mut last_tempo = engine.current_tempo_estimate();
    for i in 0..2000usize {
        let s = if i % 43 == 0 { 1000.0 } else { 0.0 };
        let result = engine.process_odf_sample(s);
        hops_until_beat += 1;
        if result.beat {
            last_tempo = result.tempo_bpm;
            break;
        }
    }
    assert!(hops_until_beat <= 200, "beat did not fire promptly after set_tempo");
    assert!(
        (last_tempo - 100.0).abs() <= 5.0,
        "expected tempo near 100 bpm, got {last_tempo}"
    );
}

#[test]
fn identical_streams_produce_identical_output() {
    init_logging();
    let mut engine_a = Engine::new_default();
    let mut engine_b = Engine::new_default();
    let mut rng = Xorshift64::new(42);
    let samples: Vec<f64> = (0..5000).map(|_| rng.next_f64(0.0, 500.0)).collect();

    for &s in &samples {
        let a = engine_a.process_odf_sample(s);
        let b = engine_b.process_odf_sample(s);
        assert_eq!(a, b);
    }
}

#[test]
fn inter_beat_gaps_never_exceed_one_hundred_hops() {
    init_logging();
    let mut engine = Engine::new_default();
    let mut rng = Xorshift64::new(7);
    let samples: Vec<f64> = (0..20_000).map(|_| rng.next_f64(0.0, 800.0)).collect();
    let stats = run_odf_stream(&mut engine, samples.into_iter());
    assert!(stats.max_gap < 100);
}

#[test]
fn beat_count_keeps_pace_with_stream_length() {
    init_logging();
    let mut engine = Engine::new_default();
    let n = 20_000;
    let stats = run_odf_stream(&mut engine, std::iter::repeat(0.0).take(n));
    assert!(stats.beats as f64 >= n as f64 / 100.0);
}

#[test]
fn beat_due_in_frame_never_fires_on_two_consecutive_hops() {
    init_logging();
    let mut engine = Engine::new_default();
    let mut rng = Xorshift64::new(123);
    let mut previous_beat = false;
    for _ in 0..20_000 {
        let s = rng.next_f64(0.0, 700.0);
        let result = engine.process_odf_sample(s);
        assert!(
            !(previous_beat && result.beat),
            "beat fired on two consecutive hops"
        );
        previous_beat = result.beat;
    }
}

#[test]
fn constant_input_settles_into_a_stable_inter_beat_interval() {
    init_logging();
    let mut engine = Engine::new_default();
    let mut since_last = 0i64;
    let mut gaps = Vec::new();
    for _ in 0..400 {
        since_last += 1;
        let result = engine.process_odf_sample(50.0);
        if result.beat {
            gaps.push(since_last);
            since_last = 0;
        }
    }
    if gaps.len() >= 2 {
        let tail = &gaps[gaps.len() - 2..];
        assert!((tail[0] - tail[1]).abs() <= 1, "gaps did not converge: {:?}", tail);
    }
}

#[test]
fn fixed_tempo_holds_within_tolerance_despite_noisy_input() {
    init_logging();
    let mut engine = Engine::new_default();
    engine.fix_tempo(140.0).unwrap();

    let mut rng = Xorshift64::new(99);
    for i in 0..20_000 {
        let s = if i % 43 == 0 { 1000.0 } else { rng.next_f64(0.0, 50.0) };
        let result = engine.process_odf_sample(s);
        if result.beat {
            assert!(
                (result.tempo_bpm - 140.0).abs() <= 2.0,
                "tempo drifted to {} while fixed at 140",
                result.tempo_bpm
            );
        }
    }
}

#[test]
fn construction_rejects_frame_smaller_than_hop() {
    init_logging();
    let err = Engine::new(512, 256, OdfKind::EnergyEnvelope, WindowKind::Hanning).unwrap_err();
    assert_eq!(
        err,
        ConfigError::FrameSmallerThanHop {
            frame_size: 256,
            hop_size: 512
        }
    );
}

#[test]
fn odf_kinds_all_construct_and_run() {
    init_logging();
    for kind in [
        OdfKind::EnergyEnvelope,
        OdfKind::EnergyDifference,
        OdfKind::SpectralDifference,
        OdfKind::SpectralDifferenceHWR,
        OdfKind::PhaseDeviation,
        OdfKind::ComplexSpectralDifference,
        OdfKind::ComplexSpectralDifferenceHWR,
        OdfKind::HighFrequencyContent,
        OdfKind::HighFrequencySpectralDifference,
        OdfKind::HighFrequencySpectralDifferenceHWR,
    ] {
        let mut engine = Engine::new(HOP_SIZE, HOP_SIZE * 2, kind, WindowKind::Hanning).unwrap();
        let frame = vec![0.1; HOP_SIZE];
        for _ in 0..10 {
            let result = engine.process_audio_frame(&frame);
            assert!(result.tempo_bpm.is_finite());
        }
    }
}
