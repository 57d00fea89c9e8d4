//! Shared fixtures for unit tests.
//!
//! The straight-line setup places one straw on every seed point of a
//! field-free track, with wires rotated around the transverse track
//! direction. Hit times are exact for zero drift, so every hit sits on the
//! seed with ambiguity 0.

use std::sync::Arc;

use nalgebra::Vector3;
use strawfit_env::{
    LinearDrift, PanelId, PlanarTracker, Straw, StrawDetector, StrawHit, StrawId, StrawMaterial, TrackerConditions,
    UniformField,
};

use crate::config::KalFitConfig;
use crate::fit_result::FitResult;
use crate::fitter::KalFit;
use crate::helix::Helix;
use crate::hit::TrackHit;
use crate::particle::{Particle, C_LIGHT};
use crate::track_def::{HitIndex, T0Estimate, TrackDefinition};

pub(crate) const STRAW_HALF_LENGTH: f64 = 500.0;
pub(crate) const STRAW_RADIUS: f64 = 2.5;

pub(crate) struct StraightLineSetup {
    pub detector: Arc<StrawDetector>,
    pub definition: TrackDefinition,
    pub hits: Vec<TrackHit>,
    pub config: KalFitConfig,
}

pub(crate) fn seed_helix() -> Helix {
    Helix::new(5.0, 0.3, 0.0, -20.0, 1.2)
}

/// Single-stage configuration with t0 updates, weeding and material off.
pub(crate) fn plain_config() -> KalFitConfig {
    KalFitConfig {
        hit_errors: vec![0.0],
        ambig_strategy: vec![0],
        t0_tolerance: vec![1.0],
        init_t0: false,
        update_t0: false,
        weed_hits: false,
        material_correction: false,
        ..Default::default()
    }
}

/// Straws crossed by the seed at `n` evenly spaced z positions.
pub(crate) fn seed_straws(seed: &Helix, n: usize) -> Vec<Straw> {
    let step = if n > 1 { 800.0 / (n - 1) as f64 } else { 0.0 };
    (0..n)
        .map(|k| {
            let z = -400.0 + k as f64 * step;
            let flt = seed.z_flight(z).expect("seed is not transverse");
            let beta = ((k % 5) as f64 - 2.0) * 25.0_f64.to_radians();
            let psi = seed.phi0 + beta;
            Straw {
                id: StrawId(k as u32),
                panel: PanelId((k / 2) as u32),
                layer: (k % 2) as u32,
                mid_point: seed.position(flt),
                direction: Vector3::new(psi.cos(), psi.sin(), 0.0),
                half_length: STRAW_HALF_LENGTH,
                radius: STRAW_RADIUS,
            }
        })
        .collect()
}

/// Hit times for a track crossing the seed straws at `t0` (time at z = 0).
pub(crate) fn exact_strawhits(seed: &Helix, straws: &[Straw], t0: f64, conditions: &LinearDrift) -> Vec<StrawHit> {
    let flt0 = seed.z_flight(0.0).unwrap_or(0.0);
    straws
        .iter()
        .map(|straw| {
            let flt = seed.z_flight(straw.mid_point.z).unwrap_or(flt0);
            let time = t0 + (flt - flt0) / C_LIGHT + straw.half_length / conditions.signal_velocity(straw.id);
            StrawHit::new(straw.id, time)
        })
        .collect()
}

pub(crate) fn straight_line_setup(n: usize) -> StraightLineSetup {
    let seed = seed_helix();
    let straws = seed_straws(&seed, n);
    let conditions = LinearDrift::default();
    let strawhits: Arc<[StrawHit]> = exact_strawhits(&seed, &straws, 0.0, &conditions).into();

    let tracker = PlanarTracker::from_straws(straws, StrawMaterial::default()).unwrap();
    let detector = Arc::new(StrawDetector::new(tracker, UniformField::zero(), conditions));

    let indices: Vec<HitIndex> = (0..n).map(HitIndex::from).collect();
    let definition =
        TrackDefinition::new(seed, Particle::Electron, strawhits, indices).with_t0(T0Estimate::new(0.0, 1.0));
    let config = plain_config();

    let fitter = KalFit::new(config.clone(), detector.clone()).unwrap();
    let mut result = FitResult::new(definition.clone());
    fitter.make_hits(&mut result, definition.t0);

    StraightLineSetup {
        detector,
        definition,
        hits: result.hits,
        config,
    }
}

/// A result holding the setup hits, with closest approaches to the seed and no trajectory.
pub(crate) fn built_result(setup: &StraightLineSetup) -> FitResult {
    let mut result = FitResult::new(setup.definition.clone());
    result.hits = setup.hits.clone();
    result
}

pub(crate) fn setup_fitter(setup: &StraightLineSetup, config: KalFitConfig) -> KalFit<StrawDetector> {
    KalFit::new(config, setup.detector.clone()).unwrap()
}
