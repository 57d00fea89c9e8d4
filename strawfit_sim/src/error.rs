//! Error types for the simulation harness.

use strawfit_core::ConfigError;
use strawfit_env::EnvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Detector error: {0}")]
    Env(#[from] EnvError),

    #[error("Fit configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
