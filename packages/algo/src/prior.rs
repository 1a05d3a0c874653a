//! Informed priors
//!
//! A new arm starting at Beta(1, 1) forces pure exploration during the first
//! session. Seeding it from the difficulty tier gives the selector a sensible
//! expectation of success before any answer is observed.

use crate::types::{BetaParams, Difficulty};

/// Beginner tier, expected success 0.70
pub const BEGINNER_PRIOR: BetaParams = BetaParams::new(7.0, 3.0);

/// Intermediate tier, expected success 0.50
pub const INTERMEDIATE_PRIOR: BetaParams = BetaParams::new(5.0, 5.0);

/// Advanced tier, expected success 0.30
pub const ADVANCED_PRIOR: BetaParams = BetaParams::new(3.0, 7.0);

/// Uninformative prior used for topic arms
pub const UNINFORMED_PRIOR: BetaParams = BetaParams::new(1.0, 1.0);

pub fn initial_prior(difficulty: Difficulty) -> BetaParams {
    match difficulty {
        Difficulty::Beginner => BEGINNER_PRIOR,
        Difficulty::Intermediate => INTERMEDIATE_PRIOR,
        Difficulty::Advanced => ADVANCED_PRIOR,
    }
}

/// Prior from a free-form difficulty label; unknown or missing labels
/// fall back to the intermediate tier.
pub fn initial_prior_for_label(label: Option<&str>) -> BetaParams {
    initial_prior(label.map(Difficulty::parse_or_default).unwrap_or_default())
}

/// Topic arms use the tier prior when one applies, otherwise Beta(1, 1).
pub fn topic_prior(difficulty: Option<Difficulty>) -> BetaParams {
    difficulty.map(initial_prior).unwrap_or(UNINFORMED_PRIOR)
}
