//! The assembled detector: tracker geometry, field map and conditions.

use std::sync::Arc;

use nalgebra::Vector3;

use crate::conditions::LinearDrift;
use crate::context::{FieldProvider, TrackerConditions, TrackerGeometry};
use crate::error::EnvError;
use crate::field::UniformField;
use crate::planar_tracker::{PlanarTracker, PlanarTrackerConfig};
use crate::types::{Straw, StrawId, StrawMaterial, D2T, T2D};

/// Detector environment backed by in-memory geometry and constant calibrations.
///
/// This is the "real" implementation used by the simulation harness and the
/// tests. It is built once and shared read-only between fits.
#[derive(Debug, Clone)]
pub struct StrawDetector {
    /// Tracker geometry
    pub tracker: PlanarTracker,

    /// Field map
    pub field: UniformField,

    /// Drift and signal calibration
    pub conditions: LinearDrift,
}

impl StrawDetector {
    /// Creates a detector from its parts.
    pub fn new(tracker: PlanarTracker, field: UniformField, conditions: LinearDrift) -> Self {
        Self {
            tracker,
            field,
            conditions,
        }
    }

    /// Default tracker in a 1 T solenoid.
    pub fn nominal() -> Result<Self, EnvError> {
        let tracker = PlanarTracker::new(&PlanarTrackerConfig::default())?;
        Ok(Self::new(tracker, UniformField::default(), LinearDrift::default()))
    }

    /// Creates an Arc-wrapped detector for sharing across fits.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl TrackerGeometry for StrawDetector {
    fn straw(&self, id: StrawId) -> Option<&Straw> {
        self.tracker.straw(id)
    }

    fn straw_count(&self) -> usize {
        self.tracker.straw_count()
    }

    fn material(&self) -> &StrawMaterial {
        self.tracker.material()
    }
}

impl FieldProvider for StrawDetector {
    fn field_at(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.field.field_at(point)
    }
}

impl TrackerConditions for StrawDetector {
    fn signal_velocity(&self, straw: StrawId) -> f64 {
        self.conditions.signal_velocity(straw)
    }

    fn distance_to_time(&self, straw: StrawId, distance: f64) -> D2T {
        self.conditions.distance_to_time(straw, distance)
    }

    fn time_to_distance(&self, straw: StrawId, tdrift: f64) -> T2D {
        self.conditions.time_to_distance(straw, tdrift)
    }

    fn drift_radius_error(&self, straw: StrawId, rdrift: f64) -> f64 {
        self.conditions.drift_radius_error(straw, rdrift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DetectorContext;

    fn assert_context<D: DetectorContext>(det: &D) -> usize {
        det.straw_count()
    }

    #[test]
    fn test_nominal_detector() {
        let det = StrawDetector::nominal().unwrap();
        assert!(assert_context(&det) > 0);
        assert_eq!(det.bz_at(&Vector3::zeros()), 1.0);
        assert!(det.straw_or_err(StrawId(0)).is_ok());
        assert!(det.straw_or_err(StrawId(u32::MAX)).is_err());
    }
}
