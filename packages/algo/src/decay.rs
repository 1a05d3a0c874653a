//! Forgetting Curve
//!
//! Regresses an arm's learned Beta parameters toward its prior as time
//! since the last attempt grows, so a topic mastered months ago looks
//! uncertain again and gets re-tested.
//!
//! ```text
//! days  = whole days since last attempt (>= 0)
//! decay = exp(-days / half_life_days), clamped to (0, 1]
//! alpha_eff = alpha * decay + prior.alpha * (1 - decay)
//! beta_eff  = beta  * decay + prior.beta  * (1 - decay)
//! ```
//!
//! Decay is computed at read time only and never written back.

use rayon::prelude::*;

use crate::types::{ArmStats, BetaParams, MS_PER_DAY};

/// Whole days between `last_attempted_ms` and `now_ms`.
///
/// A clock running behind the last attempt yields 0, never a negative span.
pub fn elapsed_days(last_attempted_ms: i64, now_ms: i64) -> i64 {
    now_ms.saturating_sub(last_attempted_ms).max(0) / MS_PER_DAY
}

/// Decay factor for `days` elapsed, clamped to (0, 1].
pub fn decay_factor(days: i64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 || !half_life_days.is_finite() {
        return 1.0;
    }
    let days = days.max(0) as f64;
    (-days / half_life_days).exp().clamp(f64::MIN_POSITIVE, 1.0)
}

/// Effective (decayed) parameters of an arm at `now_ms`.
///
/// An arm that was never attempted is returned unchanged.
pub fn effective_params(
    stats: &ArmStats,
    now_ms: i64,
    prior: BetaParams,
    half_life_days: f64,
) -> BetaParams {
    let Some(last_attempted) = stats.last_attempted_at else {
        return stats.params();
    };

    let decay = decay_factor(elapsed_days(last_attempted, now_ms), half_life_days);
    if decay >= 1.0 {
        return stats.params();
    }

    BetaParams {
        alpha: stats.alpha * decay + prior.alpha * (1.0 - decay),
        beta: stats.beta * decay + prior.beta * (1.0 - decay),
    }
}

/// Effective parameters for many independent arms in parallel.
///
/// Output order matches input order.
pub fn effective_params_batch(
    arms: &[(ArmStats, BetaParams)],
    now_ms: i64,
    half_life_days: f64,
) -> Vec<BetaParams> {
    arms.par_iter()
        .map(|(stats, prior)| effective_params(stats, now_ms, *prior, half_life_days))
        .collect()
}
