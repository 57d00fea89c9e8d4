//! Error types for the track fit.
//!
//! Two families are kept apart. [`ConfigError`] is fatal and surfaces when a
//! fitter is constructed; it can never be fixed by retrying. [`FitError`] is
//! carried inside a fit result's status, or absorbed by deactivating a single
//! hit when the failure is local.

use strawfit_env::{EnvError, StrawId};
use thiserror::Error;

/// Errors raised while validating a fit configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The hit-error schedule has no stages
    #[error("Hit error schedule is empty")]
    EmptySchedule,

    /// A per-stage array does not match the hit-error schedule
    #[error("Schedule length mismatch: {name} has {actual} entries, expected {expected}")]
    ScheduleMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An ambiguity strategy code outside 0..=3
    #[error("Unknown ambiguity strategy code {0}")]
    UnknownStrategy(i32),

    /// A numeric parameter outside its allowed range
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// The configuration text could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// The configuration file could not be read
    #[error("I/O error: {0}")]
    Io(String),
}

impl ConfigError {
    /// Creates an invalid parameter error.
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Errors raised during a fit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// The track definition references fewer hits than required
    #[error("Insufficient hits: {found} < {required}")]
    InsufficientHits { found: usize, required: usize },

    /// The closest approach between trajectory and wire could not be found
    #[error("POCA failure on straw {straw}: {reason}")]
    PocaFailure { straw: StrawId, reason: String },

    /// The numerical fit did not converge or produced an unusable result
    #[error("Fit divergence: {0}")]
    FitDivergence(String),

    /// An operation needed a valid successful fit and there was none
    #[error("No valid fit")]
    NoValidFit,

    /// A hit refers to a straw missing from the geometry
    #[error("Unknown straw: {0}")]
    UnknownStraw(StrawId),

    /// A hit index points outside the hit collection
    #[error("Hit index {index} out of range (collection has {len} hits)")]
    InvalidHitIndex { index: usize, len: usize },
}

impl FitError {
    /// Creates a POCA failure error.
    pub fn poca(straw: StrawId, reason: impl Into<String>) -> Self {
        Self::PocaFailure {
            straw,
            reason: reason.into(),
        }
    }

    /// Creates a fit divergence error.
    pub fn divergence(reason: impl Into<String>) -> Self {
        Self::FitDivergence(reason.into())
    }
}

impl From<EnvError> for FitError {
    fn from(e: EnvError) -> Self {
        match e {
            EnvError::UnknownStraw(id) => Self::UnknownStraw(id),
            other => Self::FitDivergence(other.to_string()),
        }
    }
}
