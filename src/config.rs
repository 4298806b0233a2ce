//! Service configuration.
//!
//! One flat struct covering client endpoints, store URLs and the guard's
//! timing budget, loadable from the environment. Components never read env
//! vars themselves; everything is resolved here and passed down as
//! explicit configuration.

use std::time::Duration;

use thiserror::Error;

use crate::guard::GuardConfig;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    // Inference settings
    /// Base URL of the OpenAI-compatible inference API.
    pub api_base: String,
    /// Bearer token for the inference API.
    pub api_key: Option<String>,
    /// Model used for all inference calls.
    pub model: String,

    // Judge settings
    /// Base URL of the Judge0-compatible judging API.
    pub judge_url: Option<String>,
    /// Auth token for the judging API.
    pub judge_key: Option<String>,

    // Store settings
    /// Redis URL for the ephemeral session store; in-memory when absent.
    pub redis_url: Option<String>,
    /// Database URL for the durable archive; archiving disabled when absent.
    pub database_url: Option<String>,
    /// TTL for live session state.
    pub session_ttl: Duration,

    // Guard settings
    /// Finalize guard timing budget.
    pub guard: GuardConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:4000".to_string(),
            api_key: None,
            model: String::new(),
            judge_url: None,
            judge_key: None,
            redis_url: None,
            database_url: None,
            session_ttl: Duration::from_secs(2 * 3600),
            guard: GuardConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from the environment.
    ///
    /// Required: `CONVGRADE_API_BASE`. Everything else falls back to the
    /// defaults above. Guard ceilings come from
    /// `CONVGRADE_WAIT_CEILING_SECS` and `CONVGRADE_RECOMPUTE_CEILING_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base = std::env::var("CONVGRADE_API_BASE")
            .map_err(|_| ConfigError::MissingEnvVar("CONVGRADE_API_BASE".to_string()))?;

        let mut guard = GuardConfig::default();
        if let Some(secs) = read_secs("CONVGRADE_WAIT_CEILING_SECS")? {
            guard = guard.with_wait_ceiling(secs);
        }
        if let Some(secs) = read_secs("CONVGRADE_RECOMPUTE_CEILING_SECS")? {
            guard = guard.with_recompute_ceiling(secs);
        }

        let session_ttl = read_secs("CONVGRADE_SESSION_TTL_SECS")?
            .unwrap_or(Duration::from_secs(2 * 3600));

        Ok(Self {
            api_base,
            api_key: std::env::var("CONVGRADE_API_KEY").ok(),
            model: std::env::var("CONVGRADE_MODEL").unwrap_or_default(),
            judge_url: std::env::var("CONVGRADE_JUDGE_URL").ok(),
            judge_key: std::env::var("CONVGRADE_JUDGE_KEY").ok(),
            redis_url: std::env::var("CONVGRADE_REDIS_URL").ok(),
            database_url: std::env::var("CONVGRADE_DATABASE_URL").ok(),
            session_ttl,
            guard,
        })
    }

    /// Sets the inference endpoint.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Sets the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the guard budget.
    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }

    /// Validates cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "CONVGRADE_API_BASE".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.guard.wait_ceiling.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "CONVGRADE_WAIT_CEILING_SECS".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn read_secs(key: &str) -> Result<Option<Duration>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{}' is not a number of seconds", raw),
            })?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}
