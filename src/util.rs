//! Small numeric helpers shared by the cumulative-score, predictor, and
//! tempo-lattice math.

/// `round(x) = floor(x + 0.5)`, the non-banker's rounding convention assumed
/// throughout the tempo math. Only ever called with nonnegative `x` in this
/// crate.
pub fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}
