//! Common Types and Constants
//!
//! Shared data structures used across all algorithm modules.

use serde::{Deserialize, Serialize};

// ==================== Constants ====================

/// Numerical stability epsilon
pub const EPSILON: f64 = 1e-10;

/// Milliseconds in one day
pub const MS_PER_DAY: i64 = 86_400_000;

/// Starting value of the running confidence estimate
pub const INITIAL_CONFIDENCE: f64 = 0.5;

// ==================== Difficulty ====================

/// Difficulty tier of a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    /// Strict parse, `None` for unknown labels
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Some(Difficulty::Beginner),
            "intermediate" => Some(Difficulty::Intermediate),
            "advanced" => Some(Difficulty::Advanced),
            _ => None,
        }
    }

    /// Lenient parse: unknown labels fall back to intermediate
    pub fn parse_or_default(s: &str) -> Self {
        Self::from_label(s).unwrap_or_default()
    }

    /// Map a composite difficulty score in [0, 1] onto a tier
    pub fn from_score(score: f64) -> Self {
        if score <= 0.3 {
            Difficulty::Beginner
        } else if score <= 0.7 {
            Difficulty::Intermediate
        } else {
            Difficulty::Advanced
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== Beta Parameters ====================

/// Beta distribution parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaParams {
    /// Pseudo-count of successes (alpha > 0)
    pub alpha: f64,
    /// Pseudo-count of failures (beta > 0)
    pub beta: f64,
}

impl BetaParams {
    pub const fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// Mean of the Beta distribution
    pub fn expected_value(&self) -> f64 {
        let sum = self.alpha + self.beta;
        if sum > 0.0 {
            self.alpha / sum
        } else {
            0.5
        }
    }

    pub fn total(&self) -> f64 {
        self.alpha + self.beta
    }

    pub fn is_valid(&self) -> bool {
        crate::sanitize::is_positive_finite(self.alpha) && crate::sanitize::is_positive_finite(self.beta)
    }
}

impl Default for BetaParams {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

// ==================== Arm Statistics ====================

/// Learned statistics of one bandit arm (question or topic)
///
/// Timestamps are epoch milliseconds so the statistics stay independent
/// of any clock or calendar library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    pub attempts: i64,
    pub successes: i64,
    pub failures: i64,
    /// Sum of all response times, for averaging
    pub total_response_time_ms: i64,
    /// Running estimate in [0, 1]
    pub user_confidence: f64,
    pub alpha: f64,
    pub beta: f64,
    /// `None` until the first answer
    pub last_attempted_at: Option<i64>,
}

impl ArmStats {
    /// Fresh statistics seeded from a prior
    pub fn from_prior(prior: BetaParams) -> Self {
        Self {
            attempts: 0,
            successes: 0,
            failures: 0,
            total_response_time_ms: 0,
            user_confidence: INITIAL_CONFIDENCE,
            alpha: prior.alpha,
            beta: prior.beta,
            last_attempted_at: None,
        }
    }

    pub fn params(&self) -> BetaParams {
        BetaParams::new(self.alpha, self.beta)
    }

    pub fn success_rate(&self) -> f64 {
        if self.attempts > 0 {
            self.successes as f64 / self.attempts as f64
        } else {
            0.0
        }
    }

    pub fn avg_response_time_ms(&self) -> Option<f64> {
        if self.attempts > 0 {
            Some(self.total_response_time_ms as f64 / self.attempts as f64)
        } else {
            None
        }
    }
}

// ==================== Outcome ====================

/// One answered question as reported by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub is_correct: bool,
    pub response_time_ms: i64,
    /// Expected answer time for the question; drives the time adjustment
    pub expected_time_ms: i64,
}

impl Outcome {
    pub fn new(is_correct: bool, response_time_ms: i64, expected_time_ms: i64) -> Self {
        Self {
            is_correct,
            response_time_ms,
            expected_time_ms,
        }
    }
}
