//! Difficulty classification from global performance
//!
//! Questions without an authored tier get one from how the whole learner
//! population performs on them: success rate dominates, with smaller terms
//! for how many learners reach the question and how long they take.

use serde::{Deserialize, Serialize};

use crate::types::Difficulty;

/// Z-score for a 95% interval
pub const Z_95: f64 = 1.96;

/// Below this many attempts a question is not classified
pub const DEFAULT_MIN_SAMPLE_SIZE: i64 = 10;

/// Default expected answer time when the knowledge type has none
pub const DEFAULT_EXPECTED_SECS: f64 = 30.0;

const SUCCESS_WEIGHT: f64 = 0.6;
const REACH_WEIGHT: f64 = 0.25;
const TIME_WEIGHT: f64 = 0.15;

/// Aggregated performance of one question across all learners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub total_attempts: i64,
    pub total_correct: i64,
    pub unique_users: i64,
    pub active_users: i64,
    pub avg_response_secs: f64,
    pub expected_secs: f64,
}

/// Classification result with the numbers behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyEstimate {
    pub success_rate: f64,
    pub reach_rate: f64,
    pub score: f64,
    pub difficulty: Difficulty,
    pub confidence_interval: (f64, f64),
}

/// Expected answer time in seconds for a knowledge type
pub fn expected_secs_for(knowledge_type: &str) -> f64 {
    match knowledge_type {
        "terminology" => 15.0,
        "dosage" => 30.0,
        "side_effect" => 25.0,
        "pharmacodynamics" => 45.0,
        "pharmacokinetics" => 40.0,
        _ => DEFAULT_EXPECTED_SECS,
    }
}

/// Wilson score interval for a success proportion, clamped to [0, 1].
pub fn wilson_interval(successes: i64, total: i64, z: f64) -> (f64, f64) {
    if total <= 0 {
        return (0.0, 0.0);
    }

    let n = total as f64;
    let p = successes.clamp(0, total) as f64 / n;
    let z2 = z * z;

    let denominator = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denominator;
    let margin = z * ((p * (1.0 - p) + z2 / (4.0 * n)) / n).sqrt() / denominator;

    ((center - margin).max(0.0), (center + margin).min(1.0))
}

/// Composite difficulty score in [0, 1], 1 = hardest.
pub fn composite_difficulty(
    success_rate: f64,
    reach_rate: f64,
    avg_response_secs: f64,
    expected_secs: f64,
) -> f64 {
    let success_difficulty = 1.0 - success_rate;
    let reach_penalty = ((0.5 - reach_rate) * 2.0).max(0.0);
    let expected = if expected_secs > 0.0 { expected_secs } else { DEFAULT_EXPECTED_SECS };
    let time_factor = (avg_response_secs / expected).min(1.0);

    let score = success_difficulty * SUCCESS_WEIGHT
        + reach_penalty * REACH_WEIGHT
        + (time_factor - 0.5) * TIME_WEIGHT;

    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

/// Classify a question, or `None` when there is too little data.
pub fn classify(sample: &PerformanceSample, min_sample_size: i64) -> Option<DifficultyEstimate> {
    if sample.total_attempts <= 0 || sample.total_attempts < min_sample_size {
        return None;
    }

    let success_rate = sample.total_correct.clamp(0, sample.total_attempts) as f64
        / sample.total_attempts as f64;
    let reach_rate = sample.unique_users.max(0) as f64 / sample.active_users.max(1) as f64;
    let score = composite_difficulty(
        success_rate,
        reach_rate,
        sample.avg_response_secs,
        sample.expected_secs,
    );

    Some(DifficultyEstimate {
        success_rate,
        reach_rate,
        score,
        difficulty: Difficulty::from_score(score),
        confidence_interval: wilson_interval(sample.total_correct, sample.total_attempts, Z_95),
    })
}
