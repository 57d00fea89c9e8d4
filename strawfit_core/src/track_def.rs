//! Input of a fit attempt: seed trajectory, hypothesis and hit selection.

use std::sync::Arc;

use nalgebra::Matrix5;
use serde::{Deserialize, Serialize};
use strawfit_env::StrawHit;

use crate::helix::Helix;
use crate::particle::{FitDirection, Particle};

/// A time estimate with its uncertainty (ns).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct T0Estimate {
    pub t0: f64,
    pub err: f64,
}

impl T0Estimate {
    pub fn new(t0: f64, err: f64) -> Self {
        Self { t0, err }
    }
}

/// Reference to one hit of the external collection, with its input ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HitIndex {
    /// Position in the hit collection
    pub index: usize,

    /// Initial left/right ambiguity (-1, 0 or +1)
    pub ambig: i32,
}

impl HitIndex {
    pub fn new(index: usize, ambig: i32) -> Self {
        Self {
            index,
            ambig: ambig.signum(),
        }
    }
}

impl From<usize> for HitIndex {
    fn from(index: usize) -> Self {
        Self::new(index, 0)
    }
}

/// Calorimeter cluster used as a timing hint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaloCluster {
    /// Cluster time (ns)
    pub time: f64,

    /// Cluster z relative to the tracker centre (mm)
    pub z: f64,
}

/// Everything a fit attempt starts from. Never modified by the fit.
#[derive(Debug, Clone)]
pub struct TrackDefinition {
    /// Seed trajectory
    pub helix: Helix,

    /// Seed covariance, inflated before use as a prior
    pub covariance: Matrix5<f64>,

    pub particle: Particle,

    pub direction: FitDirection,

    /// Selected hits, in input order
    pub hit_indices: Vec<HitIndex>,

    /// Shared, read-only hit collection
    pub hits: Arc<[StrawHit]>,

    /// t0 used when no estimate is computed
    pub t0: T0Estimate,
}

impl TrackDefinition {
    /// Creates a definition with the nominal seed covariance.
    pub fn new(helix: Helix, particle: Particle, hits: Arc<[StrawHit]>, hit_indices: Vec<HitIndex>) -> Self {
        Self {
            helix,
            covariance: nominal_covariance(),
            particle,
            direction: FitDirection::Downstream,
            hit_indices,
            hits,
            t0: T0Estimate::default(),
        }
    }

    pub fn with_t0(mut self, t0: T0Estimate) -> Self {
        self.t0 = t0;
        self
    }

    pub fn with_covariance(mut self, covariance: Matrix5<f64>) -> Self {
        self.covariance = covariance;
        self
    }

    pub fn with_direction(mut self, direction: FitDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Number of referenced hits.
    pub fn n_hits(&self) -> usize {
        self.hit_indices.len()
    }

    /// Looks up a referenced hit in the collection.
    pub fn strawhit(&self, index: usize) -> Option<&StrawHit> {
        self.hits.get(index)
    }
}

/// Diagonal seed covariance with typical pattern-recognition resolutions.
pub fn nominal_covariance() -> Matrix5<f64> {
    Matrix5::from_diagonal(&nalgebra::Vector5::new(1.0, 1.0e-4, 1.0e-8, 1.0, 1.0e-4))
}
