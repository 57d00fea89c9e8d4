//! Collaborator traits consumed by the track fit.

use nalgebra::Vector3;

use crate::error::EnvError;
use crate::types::{Straw, StrawId, StrawMaterial, D2T, T2D};

/// Read-only access to the straw tracker geometry.
///
/// # Implementations
///
/// - **Production**: `PlanarTracker` - planes of double-layer straw panels
/// - **Tests**: any hand-built straw list via `PlanarTracker::from_straws`
pub trait TrackerGeometry {
    /// Looks up a straw by id.
    fn straw(&self, id: StrawId) -> Option<&Straw>;

    /// Number of straws in the tracker.
    fn straw_count(&self) -> usize;

    /// Material description of the straws.
    fn material(&self) -> &StrawMaterial;

    /// Looks up a straw, turning a miss into an error.
    fn straw_or_err(&self, id: StrawId) -> Result<&Straw, EnvError> {
        self.straw(id).ok_or(EnvError::UnknownStraw(id))
    }
}

/// Magnetic field map.
pub trait FieldProvider {
    /// Field vector (Tesla) at a point (mm).
    fn field_at(&self, point: &Vector3<f64>) -> Vector3<f64>;

    /// Longitudinal field at a point, used for helix momentum conversion.
    fn bz_at(&self, point: &Vector3<f64>) -> f64 {
        self.field_at(point).z
    }
}

/// Per-channel calibration: signal propagation and drift relations.
pub trait TrackerConditions {
    /// Signal propagation velocity along the wire (mm/ns).
    fn signal_velocity(&self, straw: StrawId) -> f64;

    /// Converts a distance of closest approach into a drift time.
    fn distance_to_time(&self, straw: StrawId, distance: f64) -> D2T;

    /// Converts a drift time into a drift radius.
    fn time_to_distance(&self, straw: StrawId, tdrift: f64) -> T2D;

    /// Intrinsic drift radius resolution (mm) at a given radius.
    fn drift_radius_error(&self, straw: StrawId, rdrift: f64) -> f64;
}

/// The detector environment handed to the fit.
///
/// Constructed once, shared read-only (typically behind an `Arc`) between
/// all fits. Any type implementing the three collaborator traits qualifies.
pub trait DetectorContext: TrackerGeometry + FieldProvider + TrackerConditions + Send + Sync {}

impl<T> DetectorContext for T where T: TrackerGeometry + FieldProvider + TrackerConditions + Send + Sync {}
