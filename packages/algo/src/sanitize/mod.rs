use crate::error::{BanditError, BanditResult};
use crate::types::ArmStats;

/// 检查数值是否为有限正数
pub fn is_positive_finite(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

/// 将概率值限制在 [0, 1]，无效值回退到给定默认值
pub fn clamp_probability(x: f64, fallback: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

/// 校验臂统计量是否满足全部不变量
///
/// - alpha, beta 为有限正数
/// - 计数非负且 attempts = successes + failures
/// - user_confidence 位于 [0, 1]
/// - total_response_time_ms 非负
pub fn validate_arm_stats(stats: &ArmStats) -> BanditResult<()> {
    if !is_positive_finite(stats.alpha) || !is_positive_finite(stats.beta) {
        return Err(BanditError::InvalidState(format!(
            "alpha and beta must be positive and finite, got alpha={} beta={}",
            stats.alpha, stats.beta
        )));
    }

    if stats.attempts < 0 || stats.successes < 0 || stats.failures < 0 {
        return Err(BanditError::InvalidState(format!(
            "counters must be non-negative, got attempts={} successes={} failures={}",
            stats.attempts, stats.successes, stats.failures
        )));
    }

    if stats.successes.checked_add(stats.failures) != Some(stats.attempts) {
        return Err(BanditError::InvalidState(format!(
            "attempts ({}) must equal successes ({}) + failures ({})",
            stats.attempts, stats.successes, stats.failures
        )));
    }

    if !(0.0..=1.0).contains(&stats.user_confidence) {
        return Err(BanditError::InvalidState(format!(
            "user_confidence must be in [0, 1], got {}",
            stats.user_confidence
        )));
    }

    if stats.total_response_time_ms < 0 {
        return Err(BanditError::InvalidState(format!(
            "total_response_time_ms must be non-negative, got {}",
            stats.total_response_time_ms
        )));
    }

    Ok(())
}
