//! Error types for the strawfit detector environment.

use thiserror::Error;

use crate::types::StrawId;

/// Errors raised while building or querying the detector environment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    /// No straw with this id exists in the geometry
    #[error("Unknown straw: {0}")]
    UnknownStraw(StrawId),

    /// Geometry parameters are inconsistent
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Calibration parameters are unusable
    #[error("Invalid conditions: {0}")]
    InvalidConditions(String),
}

impl EnvError {
    /// Creates an invalid geometry error.
    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    /// Creates an invalid conditions error.
    pub fn conditions(msg: impl Into<String>) -> Self {
        Self::InvalidConditions(msg.into())
    }
}
