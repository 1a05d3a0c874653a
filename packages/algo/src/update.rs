//! Performance Updater
//!
//! Applies one answered question to an arm's statistics. Two modes share a
//! single contract so both paths go through the same invariant checks:
//!
//! - [`ArmUpdate::Outcome`] derives the new statistics from an answer
//!   (live answering).
//! - [`ArmUpdate::FullState`] replaces the statistics wholesale (sync apply).
//!
//! The response-time adjustment is asymmetric: speed is rewarded only on a
//! correct answer and slowness penalized only on a wrong one. A fast-wrong
//! or slow-right answer gets exactly the base +1.

use crate::config::BanditConfig;
use crate::error::{BanditError, BanditResult};
use crate::sanitize::{clamp_probability, validate_arm_stats};
use crate::types::{ArmStats, Outcome, INITIAL_CONFIDENCE};

/// The two ways an arm may change
#[derive(Debug, Clone, PartialEq)]
pub enum ArmUpdate {
    Outcome(Outcome),
    FullState(ArmStats),
}

/// Apply an update to `current`, returning the new statistics.
///
/// Nothing is returned unless the result satisfies every arm invariant;
/// callers can write the returned value without further checks.
pub fn apply_update(
    current: &ArmStats,
    update: ArmUpdate,
    now_ms: i64,
    config: &BanditConfig,
) -> BanditResult<ArmStats> {
    let next = match update {
        ArmUpdate::Outcome(outcome) => {
            validate_arm_stats(current)?;
            derive_from_outcome(current, &outcome, now_ms, config)?
        }
        ArmUpdate::FullState(incoming) => incoming,
    };

    validate_arm_stats(&next)?;
    Ok(next)
}

/// Live-answer mode of [`apply_update`].
pub fn apply_outcome(
    current: &ArmStats,
    outcome: &Outcome,
    now_ms: i64,
    config: &BanditConfig,
) -> BanditResult<ArmStats> {
    apply_update(current, ArmUpdate::Outcome(*outcome), now_ms, config)
}

/// Sync mode of [`apply_update`]: full replacement, never a field merge.
pub fn apply_full_state(current: &ArmStats, incoming: ArmStats) -> BanditResult<ArmStats> {
    apply_update(current, ArmUpdate::FullState(incoming), 0, &BanditConfig::default())
}

fn derive_from_outcome(
    current: &ArmStats,
    outcome: &Outcome,
    now_ms: i64,
    config: &BanditConfig,
) -> BanditResult<ArmStats> {
    if outcome.response_time_ms < 0 || outcome.expected_time_ms < 0 {
        return Err(BanditError::InvalidState(format!(
            "response times must be non-negative, got response={} expected={}",
            outcome.response_time_ms, outcome.expected_time_ms
        )));
    }

    let mut next = current.clone();
    next.attempts += 1;

    if outcome.is_correct {
        next.successes += 1;
        next.alpha += 1.0;
        if outcome.response_time_ms < outcome.expected_time_ms {
            next.alpha += config.time_bonus * config.learning_rate;
        }
    } else {
        next.failures += 1;
        next.beta += 1.0;
        if outcome.response_time_ms > outcome.expected_time_ms {
            next.beta += config.extra_penalty;
        }
    }

    next.total_response_time_ms = next
        .total_response_time_ms
        .checked_add(outcome.response_time_ms)
        .ok_or_else(|| BanditError::InvalidState("total_response_time_ms overflow".to_string()))?;

    let observed = if outcome.is_correct { 1.0 } else { 0.0 };
    let weight = config.confidence_smoothing;
    let previous = clamp_probability(current.user_confidence, INITIAL_CONFIDENCE);
    next.user_confidence =
        clamp_probability((1.0 - weight) * previous + weight * observed, INITIAL_CONFIDENCE);

    next.last_attempted_at = Some(now_ms);
    Ok(next)
}
