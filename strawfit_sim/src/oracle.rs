//! Ground truth oracle for simulation.
//!
//! The Oracle owns the true trajectories of the simulated particles:
//! - Kinematics (vertex, direction, t0) drawn from a seeded RNG
//! - Straw hits generated by walking the true helix through every layer
//! - Smeared measurements, outliers and a crude seed for the fit

use std::collections::BTreeSet;
use std::f64::consts::PI;
use std::ops::Range;

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use strawfit_core::particle::C_LIGHT;
use strawfit_core::poca::helix_wire_poca;
use strawfit_core::{CaloCluster, Helix, HitIndex, Particle, T0Estimate, TrackDefinition};
use strawfit_env::{FieldProvider, StrawDetector, StrawHit, TrackerConditions};

/// Extra time added to an outlier hit (ns).
const OUTLIER_DELAY: Range<f64> = 15.0..40.0;

/// Resolution of the upstream t0 guess carried by the definition (ns).
const SEED_T0_ERROR: f64 = 5.0;

/// A ground truth track and the measurements it left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTrack {
    /// Unique track ID
    pub id: u32,

    pub particle: Particle,

    /// True trajectory
    pub helix: Helix,

    /// Smeared trajectory handed to the fit as its seed
    pub seed: Helix,

    /// True momentum (MeV/c), infinite in a zero field
    pub momentum: f64,

    /// True time at z = 0 (ns)
    pub t0: f64,

    /// Upstream t0 guess (ns)
    pub seed_t0: f64,

    /// Generated hits, in layer order
    pub hits: Vec<StrawHit>,

    /// Indices of hits whose time was corrupted
    pub outliers: BTreeSet<usize>,

    /// Calorimeter cluster at the downstream end
    pub cluster: CaloCluster,
}

impl GeneratedTrack {
    /// Definition referencing every generated hit.
    pub fn definition(&self) -> TrackDefinition {
        self.definition_with((0..self.hits.len()).map(HitIndex::from).collect())
    }

    /// Definition referencing a subset of the generated hits.
    pub fn definition_with(&self, hit_indices: Vec<HitIndex>) -> TrackDefinition {
        TrackDefinition::new(self.seed, self.particle, self.hits.clone().into(), hit_indices)
            .with_t0(T0Estimate::new(self.seed_t0, SEED_T0_ERROR))
    }
}

/// The Oracle - generates tracks and their straw hits.
pub struct Oracle {
    /// Master seed
    physics_seed: u64,

    /// RNG for kinematics and noise
    physics_rng: ChaCha8Rng,

    /// Next track ID
    next_id: u32,

    /// Drift radius noise standard deviation (mm)
    drift_noise_std: f64,

    /// Probability that a hit is an outlier
    outlier_fraction: f64,

    /// Range of the polar angle cosine
    cos_theta: Range<f64>,

    /// Transverse vertex spread (mm)
    vertex_spread: f64,

    /// Vertex z (mm)
    vertex_z: f64,

    /// Range of the true t0 (ns)
    t0_range: Range<f64>,

    /// Calorimeter front face z (mm)
    calo_z: f64,

    /// Calorimeter time offset relative to the tracker (ns)
    calo_time_offset: f64,

    /// Calorimeter time resolution (ns)
    calo_time_noise: f64,
}

impl Oracle {
    /// Creates a new Oracle with the given physics seed.
    pub fn new(physics_seed: u64) -> Self {
        Self {
            physics_seed,
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            next_id: 0,
            drift_noise_std: 0.1,
            outlier_fraction: 0.0,
            cos_theta: 0.5..0.7,
            vertex_spread: 20.0,
            vertex_z: -2000.0,
            t0_range: 500.0..1200.0,
            calo_z: 1800.0,
            calo_time_offset: 1.4,
            calo_time_noise: 0.3,
        }
    }

    pub fn physics_seed(&self) -> u64 {
        self.physics_seed
    }

    /// Sets the drift radius noise (mm).
    pub fn set_drift_noise(&mut self, std_dev: f64) {
        self.drift_noise_std = std_dev.max(0.0);
    }

    /// Sets the outlier probability, clamped to [0, 1].
    pub fn set_outlier_fraction(&mut self, fraction: f64) {
        self.outlier_fraction = fraction.clamp(0.0, 1.0);
    }

    /// Sets the polar angle cosine range.
    pub fn set_cos_theta(&mut self, range: Range<f64>) {
        self.cos_theta = range;
    }

    /// Sets the calorimeter time offset (ns).
    pub fn set_calo_time_offset(&mut self, offset: f64) {
        self.calo_time_offset = offset;
    }

    /// Generates one track of `particle` with momentum magnitude `momentum`.
    pub fn generate_track(&mut self, detector: &StrawDetector, particle: Particle, momentum: f64) -> GeneratedTrack {
        let id = self.next_id;
        self.next_id += 1;

        let cos_theta = self.uniform(self.cos_theta.clone());
        let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
        let phi = self.uniform(-PI..PI);
        let direction = Vector3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta);
        let vertex = Vector3::new(
            self.gaussian(self.vertex_spread),
            self.gaussian(self.vertex_spread),
            self.vertex_z,
        );

        let bz = detector.bz_at(&vertex);
        let helix = Helix::from_point_momentum(&vertex, &(direction * momentum), particle.charge(), bz);
        let true_momentum = helix.momentum_mag(bz);
        let velocity = particle.beta(momentum) * C_LIGHT;
        let t0 = self.uniform(self.t0_range.clone());
        let flt0 = helix.z_flight(0.0).unwrap_or(0.0);

        let (hits, outliers) = self.generate_hits(detector, &helix, t0, flt0, velocity);

        let calo_flt = helix.z_flight(self.calo_z).unwrap_or(flt0);
        let cluster = CaloCluster {
            time: t0 + (calo_flt - flt0) / velocity - self.calo_time_offset + self.gaussian(self.calo_time_noise),
            z: self.calo_z,
        };

        let seed = self.smear(&helix);
        let seed_t0 = t0 + self.gaussian(SEED_T0_ERROR);

        GeneratedTrack {
            id,
            particle,
            helix,
            seed,
            momentum: true_momentum,
            t0,
            seed_t0,
            hits,
            outliers,
            cluster,
        }
    }

    /// Walks the helix through every layer and records the straw it
    /// crosses there, if the crossing lies inside the gas volume.
    fn generate_hits(
        &mut self,
        detector: &StrawDetector,
        helix: &Helix,
        t0: f64,
        flt0: f64,
        velocity: f64,
    ) -> (Vec<StrawHit>, BTreeSet<usize>) {
        let mut hits = Vec::new();
        let mut outliers = BTreeSet::new();

        for (layer, info) in detector.tracker.layers().iter().enumerate() {
            let Some(flt) = helix.z_flight(info.z) else {
                break;
            };
            let Some(straw) = detector.tracker.nearest_straw(layer, &helix.position(flt)) else {
                continue;
            };
            let Ok(poca) = helix_wire_poca(helix, straw, flt, straw.half_length) else {
                continue;
            };
            if poca.doca.abs() >= straw.radius || poca.hit_len.abs() > straw.half_length {
                continue;
            }

            let rdrift = (poca.doca.abs() + self.gaussian(self.drift_noise_std)).max(0.0);
            let conditions = &detector.conditions;
            let tdrift = conditions.distance_to_time(straw.id, rdrift).tdrift;
            let tsignal = straw.signal_path(poca.hit_len) / conditions.signal_velocity(straw.id);
            let mut time = t0 + (poca.flt - flt0) / velocity + tdrift + tsignal;

            if self.outlier_fraction > 0.0 && self.physics_rng.gen_bool(self.outlier_fraction) {
                time += self.uniform(OUTLIER_DELAY);
                outliers.insert(hits.len());
            }
            hits.push(StrawHit::new(straw.id, time));
        }
        (hits, outliers)
    }

    /// Smears the true helix into a pattern-recognition quality seed.
    fn smear(&mut self, helix: &Helix) -> Helix {
        Helix::new(
            helix.d0 + self.gaussian(1.0),
            helix.phi0 + self.gaussian(0.005),
            helix.omega * (1.0 + self.gaussian(0.01)),
            helix.z0 + self.gaussian(2.0),
            helix.tan_dip + self.gaussian(0.005),
        )
    }

    fn gaussian(&mut self, std_dev: f64) -> f64 {
        match Normal::new(0.0, std_dev) {
            Ok(normal) if std_dev > 0.0 => normal.sample(&mut self.physics_rng),
            _ => 0.0,
        }
    }

    fn uniform(&mut self, range: Range<f64>) -> f64 {
        if range.start < range.end {
            self.physics_rng.gen_range(range)
        } else {
            range.start
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use strawfit_env::{LinearDrift, PlanarTracker, PlanarTrackerConfig, TrackerGeometry, UniformField};

    fn detector() -> StrawDetector {
        StrawDetector::nominal().unwrap()
    }

    #[test]
    fn test_oracle_generates_hits() {
        let detector = detector();
        let mut oracle = Oracle::new(42);
        let track = oracle.generate_track(&detector, Particle::Electron, 105.0);

        assert_eq!(track.id, 0);
        assert!(track.hits.len() >= 20, "only {} hits", track.hits.len());
        assert!(track.outliers.is_empty());
        assert_relative_eq!(track.momentum, 105.0, max_relative = 1e-9);

        for hit in &track.hits {
            let straw = detector.straw(hit.straw).unwrap();
            let tmin = track.t0 - 20.0;
            assert!(hit.time > tmin, "hit on {} at {}", straw.id, hit.time);
        }
    }

    #[test]
    fn test_oracle_ids_increment() {
        let detector = detector();
        let mut oracle = Oracle::new(1);
        let a = oracle.generate_track(&detector, Particle::Electron, 105.0);
        let b = oracle.generate_track(&detector, Particle::Electron, 105.0);
        assert_eq!(a.id + 1, b.id);
    }

    #[test]
    fn test_oracle_deterministic() {
        let detector = detector();
        let mut oracle1 = Oracle::new(12345);
        let mut oracle2 = Oracle::new(12345);
        oracle1.set_outlier_fraction(0.2);
        oracle2.set_outlier_fraction(0.2);

        let a = oracle1.generate_track(&detector, Particle::Electron, 105.0);
        let b = oracle2.generate_track(&detector, Particle::Electron, 105.0);

        assert_eq!(a.hits, b.hits);
        assert_eq!(a.outliers, b.outliers);
        assert_eq!(a.seed, b.seed);
        assert_eq!(a.cluster, b.cluster);
    }

    #[test]
    fn test_oracle_seeds_differ() {
        let detector = detector();
        let a = Oracle::new(1).generate_track(&detector, Particle::Electron, 105.0);
        let b = Oracle::new(2).generate_track(&detector, Particle::Electron, 105.0);
        assert_ne!(a.helix, b.helix);
    }

    #[test]
    fn test_noiseless_hits_match_truth() {
        let detector = detector();
        let mut oracle = Oracle::new(7);
        oracle.set_drift_noise(0.0);
        let track = oracle.generate_track(&detector, Particle::Electron, 105.0);
        let flt0 = track.helix.z_flight(0.0).unwrap();
        let velocity = Particle::Electron.beta(105.0) * C_LIGHT;

        for hit in &track.hits {
            let straw = detector.straw(hit.straw).unwrap();
            let layer = detector
                .tracker
                .layers()
                .iter()
                .position(|l| (l.z - straw.mid_point.z).abs() < 1e-6)
                .unwrap();
            let flt = track.helix.z_flight(detector.tracker.layers()[layer].z).unwrap();
            let poca = helix_wire_poca(&track.helix, straw, flt, straw.half_length).unwrap();
            let expected = track.t0
                + (poca.flt - flt0) / velocity
                + poca.doca.abs() / detector.conditions.drift_velocity
                + straw.signal_path(poca.hit_len) / detector.conditions.signal_velocity;
            assert_relative_eq!(hit.time, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_outlier_fraction_one() {
        let detector = detector();
        let mut oracle = Oracle::new(3);
        oracle.set_outlier_fraction(2.0);
        let track = oracle.generate_track(&detector, Particle::Electron, 105.0);
        assert_eq!(track.outliers.len(), track.hits.len());
    }

    #[test]
    fn test_zero_field_is_straight() {
        let tracker = PlanarTracker::new(&PlanarTrackerConfig::default()).unwrap();
        let detector = StrawDetector::new(tracker, UniformField::zero(), LinearDrift::default());
        let mut oracle = Oracle::new(9);
        // Steeper tracks leave the tracker after a few planes without a field
        oracle.set_cos_theta(0.99..0.999);
        let track = oracle.generate_track(&detector, Particle::Electron, 105.0);

        assert_eq!(track.helix.omega, 0.0);
        assert_eq!(track.seed.omega, 0.0);
        assert!(track.momentum.is_infinite());
        assert!(track.hits.len() >= 30, "only {} hits", track.hits.len());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_outliers_index_generated_hits(seed in any::<u64>(), fraction in 0.0f64..0.5) {
            let detector = detector();
            let mut oracle = Oracle::new(seed);
            oracle.set_outlier_fraction(fraction);
            let track = oracle.generate_track(&detector, Particle::Electron, 105.0);

            prop_assert!(track.hits.len() >= 15);
            prop_assert!(track.outliers.iter().all(|&i| i < track.hits.len()));
            prop_assert!(track.hits.iter().all(|h| h.time.is_finite()));
        }
    }

    #[test]
    fn test_definition_references_all_hits() {
        let detector = detector();
        let track = Oracle::new(5).generate_track(&detector, Particle::Electron, 105.0);
        let definition = track.definition();
        assert_eq!(definition.n_hits(), track.hits.len());
        assert_eq!(definition.helix, track.seed);
        assert_eq!(definition.t0.err, SEED_T0_ERROR);
    }
}
