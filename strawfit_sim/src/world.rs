//! SimWorld - The simulation harness container.

use std::ops::Range;
use std::sync::Arc;

use strawfit_core::{FitResult, KalFit, KalFitConfig, Particle};
use strawfit_env::{LinearDrift, PlanarTracker, PlanarTrackerConfig, StrawDetector, UniformField};

use crate::error::SimError;
use crate::oracle::{GeneratedTrack, Oracle};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Solenoid field (Tesla); 0 gives straight tracks
    pub bz: f64,

    /// Generated particle species
    pub particle: Particle,

    /// Generated momentum (MeV/c)
    pub momentum: f64,

    /// Drift radius noise standard deviation (mm)
    pub drift_noise_std: f64,

    /// Probability that a hit is an outlier
    pub outlier_fraction: f64,

    /// Range of the generated polar angle cosine
    pub cos_theta: Range<f64>,

    /// Tracker layout
    pub tracker: PlanarTrackerConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            bz: 1.0,
            particle: Particle::Electron,
            momentum: 104.97, // conversion electron endpoint
            drift_noise_std: 0.1,
            outlier_fraction: 0.0,
            cos_theta: 0.5..0.7,
            tracker: PlanarTrackerConfig::default(),
        }
    }
}

/// The SimWorld - detector, fitter and truth generator for one run.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Ground truth oracle
    pub oracle: Oracle,

    /// Shared detector environment
    detector: Arc<StrawDetector>,

    /// The fit under test
    fitter: KalFit<StrawDetector>,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig, fit_config: KalFitConfig) -> Result<Self, SimError> {
        // Separate physics stream from the master seed
        let physics_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let tracker = PlanarTracker::new(&config.tracker)?;
        let detector = StrawDetector::new(tracker, UniformField::along_z(config.bz), LinearDrift::default()).shared();

        let mut oracle = Oracle::new(physics_seed);
        oracle.set_drift_noise(config.drift_noise_std);
        oracle.set_outlier_fraction(config.outlier_fraction);
        oracle.set_cos_theta(config.cos_theta.clone());
        oracle.set_calo_time_offset(fit_config.calo_time_offset);

        let fitter = KalFit::new(fit_config, Arc::clone(&detector))?;

        Ok(Self {
            config,
            oracle,
            detector,
            fitter,
        })
    }

    pub fn detector(&self) -> &Arc<StrawDetector> {
        &self.detector
    }

    pub fn fitter(&self) -> &KalFit<StrawDetector> {
        &self.fitter
    }

    /// Draws the next track from the oracle.
    pub fn generate_track(&mut self) -> GeneratedTrack {
        self.oracle
            .generate_track(&self.detector, self.config.particle, self.config.momentum)
    }

    /// Fits a generated track from its seed, optionally with its cluster.
    pub fn fit(&self, track: &GeneratedTrack, use_cluster: bool) -> FitResult {
        let cluster = use_cluster.then_some(&track.cluster);
        self.fitter.make_track(track.definition(), cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_creation() {
        let world = SimWorld::new(SimConfig::default(), KalFitConfig::default()).unwrap();
        assert_eq!(world.config.seed, 42);
        assert!(world.detector().tracker.layers().len() > 0);
    }

    #[test]
    fn test_world_rejects_bad_config() {
        let fit_config = KalFitConfig {
            ambig_strategy: vec![7],
            ..Default::default()
        };
        assert!(matches!(
            SimWorld::new(SimConfig::default(), fit_config),
            Err(SimError::Config(_))
        ));
    }

    #[test]
    fn test_world_rejects_bad_geometry() {
        let config = SimConfig {
            tracker: PlanarTrackerConfig {
                n_planes: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            SimWorld::new(config, KalFitConfig::default()),
            Err(SimError::Env(_))
        ));
    }

    #[test]
    fn test_world_applies_polar_range() {
        let config = SimConfig {
            bz: 0.0,
            cos_theta: 0.99..0.999,
            ..Default::default()
        };
        let mut world = SimWorld::new(config, KalFitConfig::default()).unwrap();
        let track = world.generate_track();

        // cos(theta) >= 0.99 means tan(dip) >= 7
        assert!(track.helix.tan_dip > 6.9);
        assert!(track.hits.len() >= 30, "only {} hits", track.hits.len());
    }

    #[test]
    fn test_world_is_deterministic() {
        let mut a = SimWorld::new(SimConfig::default(), KalFitConfig::default()).unwrap();
        let mut b = SimWorld::new(SimConfig::default(), KalFitConfig::default()).unwrap();
        assert_eq!(a.generate_track().hits, b.generate_track().hits);
    }
}
