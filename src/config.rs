//! Library-wide settings: the default random seed and the batch
//! normalization epsilon.
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Seed used for noise injection when the caller does not pick one.
pub const DEFAULT_SEED: u64 = 1;

pub const DEFAULT_BATCH_NORM_EPSILON: f64 = 1e-6;

const SEED_VAR: &str = "ANNOGRAPH_DEFAULT_SEED";
const EPSILON_VAR: &str = "ANNOGRAPH_BATCH_NORM_EPSILON";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid value '{value}' for {var}")]
    Env { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_seed: u64,
    pub batch_norm_epsilon: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self { default_seed: DEFAULT_SEED, batch_norm_epsilon: DEFAULT_BATCH_NORM_EPSILON }
    }
}

impl Config {
    /// Parses a JSON object. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Defaults overridden by `ANNOGRAPH_DEFAULT_SEED` and
    /// `ANNOGRAPH_BATCH_NORM_EPSILON` when they are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(SEED_VAR) {
            config.default_seed = value.trim().parse().map_err(|_| ConfigError::Env { var: SEED_VAR, value })?;
        }
        if let Some(value) = lookup(EPSILON_VAR) {
            config.batch_norm_epsilon =
                value.trim().parse().map_err(|_| ConfigError::Env { var: EPSILON_VAR, value })?;
        }
        Ok(config)
    }
}
