use std::path::PathBuf;
use std::time::Duration;

use quizmab_algo::BanditConfig;

use crate::error::{EngineError, EngineResult};

pub const DEFAULT_DB_PATH: &str = "./quizmab.db";
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOG_DIR: &str = "./logs";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `quizmab_engine=debug`
    pub level: String,
    pub file_enabled: bool,
    pub dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false,
            dir: PathBuf::from(DEFAULT_LOG_DIR),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: String,
    /// Empty disables sync
    pub api_base_url: String,
    pub sync_timeout: Duration,
    pub bandit: BanditConfig,
    pub rng_seed: Option<u64>,
    pub logging: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            api_base_url: String::new(),
            sync_timeout: Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECS),
            bandit: BanditConfig::default(),
            rng_seed: None,
            logging: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read configuration from the process environment.
    ///
    /// Unparseable values fall back to defaults; the bandit section must
    /// still pass validation.
    pub fn from_env() -> EngineResult<Self> {
        let defaults = BanditConfig::default();

        let db_path =
            std::env::var("QUIZMAB_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        let api_base_url = std::env::var("QUIZMAB_API_BASE_URL")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .unwrap_or_default();

        let sync_timeout = std::env::var("QUIZMAB_SYNC_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECS));

        let bandit = BanditConfig {
            half_life_days: env_f64("QUIZMAB_HALF_LIFE_DAYS").unwrap_or(defaults.half_life_days),
            time_bonus: env_f64("QUIZMAB_TIME_BONUS").unwrap_or(defaults.time_bonus),
            learning_rate: env_f64("QUIZMAB_LEARNING_RATE").unwrap_or(defaults.learning_rate),
            extra_penalty: env_f64("QUIZMAB_EXTRA_PENALTY").unwrap_or(defaults.extra_penalty),
            confidence_smoothing: defaults.confidence_smoothing,
        };
        bandit
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let rng_seed = std::env::var("QUIZMAB_RNG_SEED")
            .ok()
            .and_then(|value| value.parse::<u64>().ok());

        let logging = LogConfig {
            level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            file_enabled: std::env::var("QUIZMAB_FILE_LOGS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            dir: std::env::var("QUIZMAB_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR)),
        };

        Ok(Self {
            db_path,
            api_base_url,
            sync_timeout,
            bandit,
            rng_seed,
            logging,
        })
    }

    pub fn sync_enabled(&self) -> bool {
        !self.api_base_url.is_empty()
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}
