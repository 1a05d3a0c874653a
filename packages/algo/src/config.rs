use serde::{Deserialize, Serialize};

use crate::error::{BanditError, BanditResult};

pub const DEFAULT_HALF_LIFE_DAYS: f64 = 30.0;
pub const DEFAULT_TIME_BONUS: f64 = 0.5;
pub const DEFAULT_LEARNING_RATE: f64 = 0.6;
pub const DEFAULT_EXTRA_PENALTY: f64 = 0.3;
pub const DEFAULT_CONFIDENCE_SMOOTHING: f64 = 0.2;

/// Tunables for the performance updater and the forgetting curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    /// Time constant of the forgetting curve in days
    pub half_life_days: f64,
    /// Bonus added to alpha for a correct answer faster than expected
    pub time_bonus: f64,
    /// Weight applied to the time bonus, in (0, 1]
    pub learning_rate: f64,
    /// Penalty added to beta for a wrong answer slower than expected
    pub extra_penalty: f64,
    /// Weight of the newest outcome in the confidence blend, in (0, 1]
    pub confidence_smoothing: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
            time_bonus: DEFAULT_TIME_BONUS,
            learning_rate: DEFAULT_LEARNING_RATE,
            extra_penalty: DEFAULT_EXTRA_PENALTY,
            confidence_smoothing: DEFAULT_CONFIDENCE_SMOOTHING,
        }
    }
}

impl BanditConfig {
    pub fn validate(&self) -> BanditResult<()> {
        if !(self.half_life_days.is_finite() && self.half_life_days > 0.0) {
            return Err(BanditError::InvalidConfig(format!(
                "half_life_days must be positive, got {}",
                self.half_life_days
            )));
        }
        if !(self.time_bonus.is_finite() && self.time_bonus >= 0.0) {
            return Err(BanditError::InvalidConfig(format!(
                "time_bonus must be non-negative, got {}",
                self.time_bonus
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(BanditError::InvalidConfig(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if !(self.extra_penalty.is_finite() && self.extra_penalty >= 0.0) {
            return Err(BanditError::InvalidConfig(format!(
                "extra_penalty must be non-negative, got {}",
                self.extra_penalty
            )));
        }
        if !(self.confidence_smoothing > 0.0 && self.confidence_smoothing <= 1.0) {
            return Err(BanditError::InvalidConfig(format!(
                "confidence_smoothing must be in (0, 1], got {}",
                self.confidence_smoothing
            )));
        }
        Ok(())
    }
}
