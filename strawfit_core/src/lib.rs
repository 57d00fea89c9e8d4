//! strawfit Core - Iterative Helical Track Fit for Straw Trackers
//!
//! Fits a charged-particle helix to drift-tube hits through an annealing
//! schedule of shrinking hit errors. Each stage iterates until stable:
//! 1. **Ambiguity**: assign the side of the wire each track passed on
//! 2. **Fit**: least-squares helix fit with the seed as a prior
//! 3. **Timing**: refine the track t0 and propagate it to every hit
//! 4. **Weeding**: drop the worst outlier and refit
//!
//! The detector geometry, field and calibrations come in through the
//! `strawfit_env` traits; [`KalFit`] holds them read-only and operates on a
//! caller-owned [`FitResult`].

pub mod ambiguity;
pub mod config;
pub mod error;
pub mod fit_result;
pub mod fitter;
pub mod helix;
pub mod hit;
pub mod kalrep;
pub mod material;
pub mod metrics;
pub mod particle;
pub mod poca;
pub mod t0;
pub mod track_def;
pub mod validation;
mod weeding;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use ambiguity::AmbigResolver;
pub use config::{AmbigParams, AmbigStrategy, CaloT0Mode, KalFitConfig, KalRepConfig};
pub use error::{ConfigError, FitError};
pub use fit_result::{FitResult, FitStatus};
pub use fitter::KalFit;
pub use helix::Helix;
pub use hit::{TrackHit, Usability};
pub use kalrep::{HistoryEntry, KalRep};
pub use material::{MaterialElement, MaterialIntersection};
pub use metrics::{FitSummary, PullStats};
pub use particle::{FitDirection, Particle};
pub use track_def::{CaloCluster, HitIndex, T0Estimate, TrackDefinition};
pub use validation::{ValidationReport, ValidationSession};
