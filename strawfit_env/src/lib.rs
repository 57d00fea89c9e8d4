//! strawfit Detector Environment Abstraction Layer
//!
//! This crate provides the collaborators the track fit consumes but does not
//! own: straw geometry, the magnetic field and per-channel calibrations.
//!
//! # Core Concept: Explicit Injection
//!
//! The fit never reaches for a global geometry or field singleton. A
//! [`DetectorContext`] is built once at start-up and handed to every fit
//! behind a shared, read-only reference:
//!
//! - Geometry (`straw()`, `material()`)
//! - Field (`field_at()`)
//! - Conditions (`signal_velocity()`, `distance_to_time()`, `time_to_distance()`)
//!
//! # Example
//!
//! ```ignore
//! use strawfit_env::{DetectorContext, StrawDetector};
//!
//! let detector = StrawDetector::nominal()?.shared();
//! let bz = detector.bz_at(&nalgebra::Vector3::zeros());
//! ```

mod conditions;
mod context;
mod detector;
mod error;
mod field;
mod planar_tracker;
mod types;

pub use conditions::LinearDrift;
pub use context::{DetectorContext, FieldProvider, TrackerConditions, TrackerGeometry};
pub use detector::StrawDetector;
pub use error::EnvError;
pub use field::UniformField;
pub use planar_tracker::{PlanarTracker, PlanarTrackerConfig, StrawLayer};
pub use types::{PanelId, Straw, StrawHit, StrawId, StrawMaterial, D2T, T2D};
