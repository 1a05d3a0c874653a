//! Thompson Sampling primitives
//!
//! Core principles:
//! - Each arm keeps Beta(alpha, beta) parameters
//! - During selection, one sample is drawn from every arm's Beta distribution
//!   and the arm with the highest sample wins
//!
//! All randomness flows through [`RandomSource`] so callers can inject a
//! seeded generator and get reproducible selections.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::types::{BetaParams, EPSILON};

// ==================== Constants ====================

/// Maximum iterations for Gamma sampling to prevent infinite loops
const MAX_GAMMA_ITERATIONS: usize = 1000;

/// Maximum recursion depth for Gamma sampling
const MAX_GAMMA_RECURSION: usize = 10;

// ==================== Random Source ====================

/// Source of uniform random numbers in [0, 1).
///
/// Every `rand` generator implements this, so a seeded `ChaCha8Rng` works
/// out of the box; tests may also supply a scripted sequence.
pub trait RandomSource {
    fn next_f64(&mut self) -> f64;
}

impl<R: RngCore + ?Sized> RandomSource for R {
    fn next_f64(&mut self) -> f64 {
        self.gen::<f64>()
    }
}

/// Reproducible generator for tests and replays
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Generator seeded from OS entropy
pub fn entropy_rng() -> ChaCha8Rng {
    ChaCha8Rng::from_entropy()
}

// ==================== Sampling ====================

/// Sample from a Beta distribution using the Gamma method
///
/// Uses the property: Beta(alpha, beta) = Gamma(alpha) / (Gamma(alpha) + Gamma(beta)).
/// The result is always finite and in [0, 1].
pub fn sample_beta<R: RandomSource + ?Sized>(rng: &mut R, params: BetaParams) -> f64 {
    let a = params.alpha.max(EPSILON);
    let b = params.beta.max(EPSILON);

    let x = sample_gamma(rng, a, 1.0, 0);
    let y = sample_gamma(rng, b, 1.0, 0);

    let sum = x + y;
    if sum > 0.0 && sum.is_finite() {
        (x / sum).clamp(0.0, 1.0)
    } else {
        params.expected_value()
    }
}

/// Sample from a Gamma distribution using the Marsaglia-Tsang method
///
/// Reference: Marsaglia, G., & Tsang, W. W. (2000).
/// "A simple method for generating gamma variables."
fn sample_gamma<R: RandomSource + ?Sized>(rng: &mut R, shape: f64, scale: f64, depth: usize) -> f64 {
    if shape <= 0.0 {
        return 0.0;
    }

    if depth >= MAX_GAMMA_RECURSION {
        return shape * scale;
    }

    // shape < 1: boost to shape + 1 and rescale
    if shape < 1.0 {
        let u = rng.next_f64().max(EPSILON);
        return sample_gamma(rng, 1.0 + shape, scale, depth + 1) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    for _ in 0..MAX_GAMMA_ITERATIONS {
        let x = sample_normal(rng);
        let v_term = 1.0 + c * x;

        if v_term <= 0.0 {
            continue;
        }

        let v = v_term.powi(3);
        let u = rng.next_f64();
        let x2 = x * x;

        if u < 1.0 - 0.0331 * x2 * x2 {
            return d * v * scale;
        }

        if u.max(EPSILON).ln() < 0.5 * x2 + d * (1.0 - v + v.ln()) {
            return d * v * scale;
        }
    }

    // Exceeded iteration limit, return expected value
    shape * scale
}

/// Standard normal via Box-Muller
fn sample_normal<R: RandomSource + ?Sized>(rng: &mut R) -> f64 {
    let u1 = rng.next_f64().max(EPSILON);
    let u2 = rng.next_f64();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
