//! Calibration conditions with a linear drift relation.

use serde::{Deserialize, Serialize};

use crate::context::TrackerConditions;
use crate::error::EnvError;
use crate::types::{StrawId, D2T, T2D};

/// Same calibration for every channel: constant drift and signal velocities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearDrift {
    /// Drift velocity (mm/ns)
    pub drift_velocity: f64,

    /// Signal propagation velocity along the wire (mm/ns)
    pub signal_velocity: f64,

    /// Drift radius resolution (mm)
    pub radius_error: f64,
}

impl LinearDrift {
    /// Creates a checked linear drift model.
    pub fn new(drift_velocity: f64, signal_velocity: f64, radius_error: f64) -> Result<Self, EnvError> {
        if drift_velocity <= 0.0 || signal_velocity <= 0.0 {
            return Err(EnvError::conditions("velocities must be positive"));
        }
        if radius_error <= 0.0 {
            return Err(EnvError::conditions("radius error must be positive"));
        }
        Ok(Self {
            drift_velocity,
            signal_velocity,
            radius_error,
        })
    }
}

impl Default for LinearDrift {
    fn default() -> Self {
        Self {
            drift_velocity: 0.0625, // 62.5 µm/ns
            signal_velocity: 210.0, // ~0.7 c
            radius_error: 0.1,
        }
    }
}

impl TrackerConditions for LinearDrift {
    fn signal_velocity(&self, _straw: StrawId) -> f64 {
        self.signal_velocity
    }

    fn distance_to_time(&self, _straw: StrawId, distance: f64) -> D2T {
        D2T {
            tdrift: distance / self.drift_velocity,
            vdrift: self.drift_velocity,
        }
    }

    fn time_to_distance(&self, _straw: StrawId, tdrift: f64) -> T2D {
        T2D {
            rdrift: tdrift * self.drift_velocity,
            vdrift: self.drift_velocity,
        }
    }

    fn drift_radius_error(&self, _straw: StrawId, _rdrift: f64) -> f64 {
        self.radius_error
    }
}
