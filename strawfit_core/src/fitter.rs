//! The "KALFIT" Orchestrator - Annealed Iterative Track Fit
//!
//! Drives one track from its definition to a fitted result:
//!
//! 1. Estimate the initial t0 (from a calorimeter cluster or the hit times)
//! 2. Build the hit arena and the material crossings from the seed
//! 3. Run the annealing schedule: per stage, resolve ambiguities, fit,
//!    update t0 and weed outliers until nothing changes
//!
//! The detector environment is shared read-only; every call works on a
//! caller-owned [`FitResult`], so one fitter serves any number of tracks.

use std::sync::Arc;

use strawfit_env::DetectorContext;
use tracing::{debug, info, warn};

use crate::ambiguity::{sign_of, AmbigResolver};
use crate::config::{CaloT0Mode, KalFitConfig};
use crate::error::{ConfigError, FitError};
use crate::fit_result::{FitResult, FitStatus};
use crate::hit::{TrackHit, Usability};
use crate::kalrep::KalRep;
use crate::material::straw_intersections;
use crate::particle::C_LIGHT;
use crate::track_def::{CaloCluster, HitIndex, T0Estimate, TrackDefinition};

/// Iterative track fitter bound to a detector environment.
pub struct KalFit<D: DetectorContext> {
    config: KalFitConfig,
    resolvers: Vec<AmbigResolver>,
    detector: Arc<D>,
}

impl<D: DetectorContext> KalFit<D> {
    /// Creates a fitter, validating the configuration and building one
    /// ambiguity resolver per stage.
    pub fn new(config: KalFitConfig, detector: Arc<D>) -> Result<Self, ConfigError> {
        config.validate()?;
        let resolvers = config
            .strategies()?
            .into_iter()
            .map(|s| AmbigResolver::new(s, &config.ambig))
            .collect::<Vec<_>>();

        info!(
            "KalFit configured: {} stages [{}]",
            resolvers.len(),
            resolvers
                .iter()
                .map(|r| r.strategy().name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            config,
            resolvers,
            detector,
        })
    }

    pub fn config(&self) -> &KalFitConfig {
        &self.config
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Resolver of annealing stage `stage`.
    pub fn resolver(&self, stage: usize) -> Option<&AmbigResolver> {
        self.resolvers.get(stage)
    }

    /// Whether a definition references enough hits to be fitted.
    pub fn fitable(&self, definition: &TrackDefinition) -> bool {
        definition.n_hits() >= self.config.min_straws
    }

    /// Longitudinal field at the seed reference point.
    fn seed_bz(&self, definition: &TrackDefinition) -> f64 {
        self.detector.bz_at(&definition.helix.reference_point())
    }

    /// Seed velocity (mm/ns).
    pub(crate) fn seed_velocity(&self, definition: &TrackDefinition) -> f64 {
        let p = definition.helix.momentum_mag(self.seed_bz(definition));
        definition.particle.beta(p) * C_LIGHT
    }

    // ========================================================================
    // TRACK CONSTRUCTION
    // ========================================================================

    /// Builds and fits a track.
    ///
    /// A definition with too few hits, or whose trajectory cannot be
    /// created, yields a failed result. The optional cluster provides the
    /// initial t0 and, with [`CaloT0Mode::UseCluster`], the t0 updates.
    pub fn make_track(&self, definition: TrackDefinition, cluster: Option<&CaloCluster>) -> FitResult {
        let mut result = FitResult::new(definition);

        if !self.fitable(&result.definition) {
            let err = FitError::InsufficientHits {
                found: result.definition.n_hits(),
                required: self.config.min_straws,
            };
            debug!("Track not fitted: {}", err);
            result.status = FitStatus::Failed(err);
            return result;
        }

        let t0 = if self.config.init_t0 {
            match cluster {
                Some(c) => self.init_calo_t0(c, &result.definition),
                None => self.init_t0(&result.definition),
            }
        } else {
            result.definition.t0
        };
        debug!("Initial t0 {:.3} ± {:.3} ns", t0.t0, t0.err);

        self.make_hits(&mut result, t0);
        if self.config.material_correction {
            self.make_materials(&mut result);
        }

        let bz = self.seed_bz(&result.definition);
        let mut krep = match KalRep::new(
            &result.definition,
            &result.hits,
            result.intersections.clone(),
            bz,
            &self.config.kalrep,
        ) {
            Ok(k) => k,
            Err(e) => {
                warn!("Cannot create trajectory: {}", e);
                result.status = FitStatus::Failed(e);
                if self.config.remove_failed {
                    result.remove_failed();
                }
                return result;
            }
        };
        let flt0 = result.definition.helix.z_flight(0.0).unwrap_or(0.0);
        krep.set_t0(t0, flt0);
        result.krep = Some(krep);

        if cluster.is_some() {
            self.update_hit_times(&mut result);
        }

        let calo_hint = cluster.filter(|_| self.config.calo_t0_mode == CaloT0Mode::UseCluster);
        self.fit_track(&mut result, calo_hint);

        if self.config.remove_failed {
            result.remove_failed();
        }
        if self.config.debug_level > 0 {
            debug!("Fit result ({})\n{}", result.status, result.hit_table());
        }
        result
    }

    /// Builds the hit arena from the definition, ordered by flight length.
    ///
    /// Each hit gets its time reference propagated from `t0` along the seed,
    /// its closest approach to the seed and its drift. Indices outside the
    /// hit collection and unknown straws are skipped; hits whose closest
    /// approach cannot be found start inactive.
    pub fn make_hits(&self, result: &mut FitResult, t0: T0Estimate) {
        let definition = &result.definition;
        let seed = definition.helix;
        let flt0 = seed.z_flight(0.0).unwrap_or(0.0);
        let velocity = self.seed_velocity(definition);

        let mut hits = Vec::with_capacity(definition.n_hits());
        for hi in &definition.hit_indices {
            let Some(strawhit) = definition.strawhit(hi.index) else {
                warn!(
                    "Skipping hit: {}",
                    FitError::InvalidHitIndex {
                        index: hi.index,
                        len: definition.hits.len()
                    }
                );
                continue;
            };
            let Some(straw) = self.detector.straw(strawhit.straw) else {
                warn!("Skipping hit {}: {}", hi.index, FitError::UnknownStraw(strawhit.straw));
                continue;
            };

            let flt = seed.z_flight(straw.mid_point.z).unwrap_or(flt0);
            let hit_t0 = T0Estimate::new(t0.t0 + (flt - flt0) / velocity, t0.err);
            let mut hit = TrackHit::new(
                hi.index,
                strawhit,
                straw,
                hit_t0,
                flt,
                self.config.hit_errors[0],
                self.config.max_drift_pull,
                self.detector.signal_velocity(straw.id),
            );
            hit.set_ambig(hi.ambig);
            if let Err(e) = hit.update_poca(&seed, self.config.kalrep.divergence_flt) {
                warn!("Hit {} starts inactive: {}", hi.index, e);
                hit.active = false;
            }
            hit.update_drift(&*self.detector);
            hits.push(hit);
        }

        let direction = definition.direction;
        hits.sort_by(|a, b| direction.compare(a.flt, b.flt).then(a.index.cmp(&b.index)));
        debug!("Built {} of {} hits", hits.len(), definition.n_hits());
        result.hits = hits;
    }

    /// Appends the wall and gas crossings of every hit straw on the seed.
    pub fn make_materials(&self, result: &mut FitResult) {
        let seed = result.definition.helix;
        let material = self.detector.material();
        let before = result.intersections.len();
        for hit in &result.hits {
            let Some(poca) = hit.poca() else {
                continue;
            };
            let dir = seed.direction(poca.flt);
            result
                .intersections
                .extend(straw_intersections(&hit.straw, material, poca, &dir));
        }
        debug!("Found {} material crossings", result.intersections.len() - before);
    }

    // ========================================================================
    // ANNEALING
    // ========================================================================

    /// Runs every annealing stage in order, stopping at the first failure.
    pub fn fit_track(&self, result: &mut FitResult, cluster: Option<&CaloCluster>) {
        result.stage_iterations.clear();
        for stage in 0..self.config.n_stages() {
            self.fit_iteration(result, stage, cluster);
            if !result.status.is_success() {
                debug!("Stage {} failed: {}", stage, result.status);
                break;
            }
        }
        result.add_history("KalFitHack");
    }

    /// One annealing stage: iterate ambiguity, fit, t0 and weeding until
    /// nothing changes or the iteration cap is reached.
    ///
    /// With a cluster, t0 updates come from the cluster instead of the hits.
    pub fn fit_iteration(&self, result: &mut FitResult, stage: usize, cluster: Option<&CaloCluster>) {
        let (Some(resolver), Some(&hit_error), Some(&t0_tolerance)) = (
            self.resolvers.get(stage),
            self.config.hit_errors.get(stage),
            self.config.t0_tolerance.get(stage),
        ) else {
            warn!("No annealing stage {}", stage);
            result.status = FitStatus::Failed(FitError::NoValidFit);
            return;
        };
        let Some(krep) = result.krep.as_ref() else {
            result.status = FitStatus::Failed(FitError::NoValidFit);
            return;
        };
        let mut old_t0 = krep.t0().t0;

        for hit in result.hits.iter_mut() {
            hit.ext_err = hit_error;
        }

        result.nt0iter = 0;
        result.status = FitStatus::Success;
        let mut niter = 0;
        let mut changed = true;
        while result.status.is_success() && changed && niter < self.config.max_iterations {
            changed = false;
            resolver.resolve(result);
            if let Some(krep) = result.krep.as_mut() {
                krep.reset_fit();
            }
            if !result.fit(&*self.detector) {
                break;
            }

            if self.config.update_t0 {
                match cluster {
                    Some(c) => {
                        self.update_calo_t0(result, c);
                    }
                    None => {
                        self.update_t0(result);
                    }
                }
                if let Some(krep) = result.krep.as_ref() {
                    let new_t0 = krep.t0().t0;
                    changed |= (new_t0 - old_t0).abs() > t0_tolerance;
                    old_t0 = new_t0;
                }
            }

            if self.config.weed_hits {
                changed |= self.weed_hits(result);
            }
            niter += 1;
        }

        result.stage_iterations.push(niter);
        result.ninter = result.krep.as_ref().map_or(0, |k| k.intersections().len());
        debug!(
            "Stage {} ({}): {} iterations, {} active, status {}",
            stage,
            resolver.strategy().name(),
            niter,
            result.n_active(),
            result.status
        );
        if self.config.debug_level > 1 {
            debug!("After stage {}\n{}", stage, result.hit_table());
        }
    }

    // ========================================================================
    // HIT ADDITION
    // ========================================================================

    /// Adds hits to a successful fit and refits with the last stage.
    ///
    /// Each new hit takes its time reference from the nearest existing hit
    /// in flight length, propagated with the fitted momentum. Its ambiguity
    /// follows the sign of its closest approach. Hits with a pull above
    /// `max_chi` or an unphysical drift radius are added inactive. The
    /// material they cross is appended to the trajectory.
    ///
    /// Returns the number of hits appended to the arena.
    pub fn add_hits(&self, result: &mut FitResult, indices: &[HitIndex], max_chi: f64) -> Result<usize, FitError> {
        let Some(krep) = result.krep.as_ref().filter(|_| result.is_success()) else {
            return Err(FitError::NoValidFit);
        };
        let helix = *krep.helix();
        let flt0 = krep.flt0();
        let track_t0 = krep.t0();
        let particle = krep.particle();
        let last_stage = self.config.n_stages() - 1;
        let hit_error = self.config.hit_errors[last_stage];
        let material = self.detector.material();

        let mut added = 0;
        for hi in indices {
            let Some(strawhit) = result.definition.strawhit(hi.index).cloned() else {
                warn!(
                    "Not adding hit: {}",
                    FitError::InvalidHitIndex {
                        index: hi.index,
                        len: result.definition.hits.len()
                    }
                );
                continue;
            };
            let Some(straw) = self.detector.straw(strawhit.straw) else {
                warn!("Not adding hit {}: {}", hi.index, FitError::UnknownStraw(strawhit.straw));
                continue;
            };

            let hflt = helix.z_flight(straw.mid_point.z).unwrap_or(flt0);
            let (ref_t0, ref_flt) = bounding_reference(&result.hits, hflt).unwrap_or((track_t0, flt0));
            let momentum = result.krep.as_ref().map_or(f64::INFINITY, |k| k.momentum_mag(ref_flt));
            let velocity = particle.beta(momentum) * C_LIGHT;
            let hit_t0 = T0Estimate::new(ref_t0.t0 + (hflt - ref_flt) / velocity, ref_t0.err);

            let mut hit = TrackHit::new(
                hi.index,
                &strawhit,
                straw,
                hit_t0,
                hflt,
                hit_error,
                self.config.max_drift_pull,
                self.detector.signal_velocity(straw.id),
            );
            hit.usability = Usability::Added;
            match hit.update_poca(&helix, self.config.kalrep.divergence_flt) {
                Ok(()) => {
                    let doca = hit.poca().map_or(0.0, |p| p.doca);
                    hit.set_ambig(sign_of(doca));
                }
                Err(e) => {
                    warn!("Added hit {} has no closest approach: {}", hi.index, e);
                    hit.active = false;
                }
            }
            hit.update_drift(&*self.detector);

            if let Some(poca) = hit.poca() {
                let crossings = straw_intersections(&hit.straw, material, poca, &helix.direction(poca.flt));
                if let Some(krep) = result.krep.as_mut() {
                    for crossing in &crossings {
                        krep.add_intersection(*crossing);
                    }
                }
                result.intersections.extend(crossings);
            }

            let compatible = hit
                .raw_residual()
                .is_some_and(|r| r.pull().abs() <= max_chi && hit.physical_drift(max_chi));
            if !compatible {
                debug!("Added hit {} starts inactive", hi.index);
                hit.active = false;
            }

            if let Some(krep) = result.krep.as_mut() {
                krep.add_hit();
            }
            result.hits.push(hit);
            added += 1;
        }

        self.fit_iteration(result, last_stage, None);
        result.add_history("AddHits");
        debug!("Added {} hits, {} active", added, result.n_active());
        Ok(added)
    }
}

/// Time reference and flight length of the hit bounding `flt`: the first
/// hit at or beyond it, else the last hit.
fn bounding_reference(hits: &[TrackHit], flt: f64) -> Option<(T0Estimate, f64)> {
    let mut order: Vec<&TrackHit> = hits.iter().collect();
    order.sort_by(|a, b| a.flt.total_cmp(&b.flt).then(a.index.cmp(&b.index)));
    order
        .iter()
        .find(|h| h.flt >= flt)
        .or_else(|| order.last())
        .map(|h| (h.hit_t0, h.flt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;
    use crate::test_support::{exact_strawhits, plain_config, seed_helix, seed_straws, setup_fitter, straight_line_setup};
    use approx::assert_relative_eq;
    use strawfit_env::{LinearDrift, PlanarTracker, StrawDetector, StrawMaterial, UniformField};

    fn fit(setup_hits: usize, config: KalFitConfig) -> (FitResult, KalFit<StrawDetector>) {
        let setup = straight_line_setup(setup_hits);
        let fitter = setup_fitter(&setup, config);
        let result = fitter.make_track(setup.definition.clone(), None);
        (result, fitter)
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let setup = straight_line_setup(20);
        let config = KalFitConfig {
            ambig_strategy: vec![7],
            ..plain_config()
        };
        assert!(matches!(
            KalFit::new(config, setup.detector.clone()),
            Err(ConfigError::UnknownStrategy(7))
        ));
    }

    #[test]
    fn test_straight_line_fit() {
        let (result, _) = fit(20, plain_config());

        assert!(result.is_success());
        assert_eq!(result.n_active(), 20);
        // Nothing changes after the first fit: one iteration per stage
        assert_eq!(result.stage_iterations, vec![1]);
        let krep = result.krep.as_ref().unwrap();
        assert!(krep.chisq() < 1e-6);
        assert_eq!(result.history().last().unwrap().label, "KalFitHack");
    }

    #[test]
    fn test_one_iteration_per_stage_without_changes() {
        let config = KalFitConfig {
            hit_errors: vec![1.0, 0.5, 0.0],
            ambig_strategy: vec![0, 0, 0],
            t0_tolerance: vec![1.0, 1.0, 1.0],
            ..plain_config()
        };
        let (result, _) = fit(20, config);
        assert!(result.is_success());
        assert_eq!(result.stage_iterations, vec![1, 1, 1]);
    }

    #[test]
    fn test_failed_stage_stops_schedule() {
        let mut config = KalFitConfig {
            hit_errors: vec![1.0, 0.5, 0.0],
            ambig_strategy: vec![0, 0, 0],
            t0_tolerance: vec![1.0, 1.0, 1.0],
            remove_failed: false,
            ..plain_config()
        };
        // 20 hits can never reach this many degrees of freedom
        config.kalrep.min_ndof = 1000;
        let (result, _) = fit(20, config);

        assert!(matches!(result.status, FitStatus::Failed(FitError::FitDivergence(_))));
        // The failing first stage is recorded, later stages never run
        assert_eq!(result.stage_iterations, vec![0]);
        let history = result.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].label, "KalFitHack");
        assert!(!history[0].success);
    }

    #[test]
    fn test_too_few_hits() {
        let (result, _) = fit(12, plain_config());

        assert!(matches!(
            result.status,
            FitStatus::Failed(FitError::InsufficientHits { found: 12, required: 15 })
        ));
        assert!(result.krep.is_none());
        assert!(result.hits.is_empty());
    }

    #[test]
    fn test_remove_failed_drops_state() {
        let setup = straight_line_setup(20);
        let config = KalFitConfig {
            min_straws: 10,
            ..plain_config()
        };
        let fitter = setup_fitter(&setup, config);
        // Only 12 selected hits: 7 degrees of freedom, below the minimum of 10
        let mut definition = setup.definition.clone();
        definition.hit_indices.truncate(12);
        let result = fitter.make_track(definition, None);

        assert!(matches!(result.status, FitStatus::Failed(FitError::FitDivergence(_))));
        assert!(result.krep.is_none());
        assert!(result.hits.is_empty());
    }

    #[test]
    fn test_keep_failed_when_configured() {
        let setup = straight_line_setup(20);
        let config = KalFitConfig {
            min_straws: 10,
            remove_failed: false,
            ..plain_config()
        };
        let fitter = setup_fitter(&setup, config);
        let mut definition = setup.definition.clone();
        definition.hit_indices.truncate(12);
        let result = fitter.make_track(definition, None);

        assert!(!result.is_success());
        assert!(result.krep.is_some());
        assert_eq!(result.hits.len(), 12);
        let last = result.history().last().unwrap();
        assert_eq!(last.label, "KalFitHack");
        assert!(!last.success);
    }

    #[test]
    fn test_invalid_indices_are_skipped() {
        let setup = straight_line_setup(20);
        let fitter = setup_fitter(&setup, plain_config());
        let mut definition = setup.definition.clone();
        definition.hit_indices.push(HitIndex::from(999));
        let result = fitter.make_track(definition, None);

        assert!(result.is_success());
        assert_eq!(result.hits.len(), 20);
    }

    #[test]
    fn test_hits_sorted_by_flight() {
        let setup = straight_line_setup(20);
        let fitter = setup_fitter(&setup, plain_config());
        let mut definition = setup.definition.clone();
        definition.hit_indices.reverse();
        let mut result = FitResult::new(definition.clone());
        fitter.make_hits(&mut result, definition.t0);

        for pair in result.hits.windows(2) {
            assert!(pair[0].flt <= pair[1].flt);
        }
    }

    #[test]
    fn test_hit_without_closest_approach_starts_inactive() {
        let seed = seed_helix();
        let mut straws = seed_straws(&seed, 20);
        // A wire along the track has no closest approach
        let flt = seed.z_flight(straws[6].mid_point.z).unwrap();
        straws[6].direction = seed.direction(flt).normalize();
        let conditions = LinearDrift::default();
        let strawhits = exact_strawhits(&seed, &straws, 0.0, &conditions);
        let tracker = PlanarTracker::from_straws(straws, StrawMaterial::default()).unwrap();
        let detector = Arc::new(StrawDetector::new(tracker, UniformField::zero(), conditions));

        let indices: Vec<HitIndex> = (0..20).map(HitIndex::from).collect();
        let definition = TrackDefinition::new(seed, Particle::Electron, strawhits.into(), indices)
            .with_t0(T0Estimate::new(0.0, 1.0));
        let fitter = KalFit::new(plain_config(), detector).unwrap();
        let mut result = FitResult::new(definition.clone());
        fitter.make_hits(&mut result, definition.t0);

        assert_eq!(result.hits.len(), 20);
        let hit = result.hits.iter().find(|h| h.index == 6).unwrap();
        assert!(!hit.active);
        assert!(hit.poca().is_none());
        assert_eq!(result.n_active(), 19);
    }

    #[test]
    fn test_materials_follow_hits() {
        let setup = straight_line_setup(20);
        let fitter = setup_fitter(&setup, plain_config());
        let mut result = FitResult::new(setup.definition.clone());
        fitter.make_hits(&mut result, setup.definition.t0);
        fitter.make_materials(&mut result);

        // The seed passes through every wire: wall and gas for each straw
        assert_eq!(result.intersections.len(), 40);
    }

    #[test]
    fn test_add_hits_requires_fit() {
        let setup = straight_line_setup(20);
        let fitter = setup_fitter(&setup, plain_config());
        let mut result = FitResult::new(setup.definition.clone());
        assert_eq!(
            fitter.add_hits(&mut result, &[HitIndex::from(0)], 5.0),
            Err(FitError::NoValidFit)
        );
    }

    #[test]
    fn test_add_hits_restores_dropped_hit() {
        let setup = straight_line_setup(20);
        let fitter = setup_fitter(&setup, plain_config());
        let mut definition = setup.definition.clone();
        let dropped = definition.hit_indices.remove(9);
        let mut result = fitter.make_track(definition, None);
        assert!(result.is_success());
        assert_eq!(result.n_active(), 19);

        let added = fitter.add_hits(&mut result, &[dropped], 5.0).unwrap();
        assert_eq!(added, 1);
        assert!(result.is_success());
        assert_eq!(result.n_active(), 20);

        let hit = result.hits.last().unwrap();
        assert_eq!(hit.index, 9);
        assert_eq!(hit.usability, Usability::Added);
        // Propagated from the neighbouring hit: matches the exact reference
        assert_relative_eq!(hit.hit_t0.t0, setup.hits[9].hit_t0.t0, epsilon = 1e-6);
        assert_eq!(result.history().last().unwrap().label, "AddHits");
        assert_eq!(result.krep.as_ref().unwrap().n_hits(), 20);
    }

    #[test]
    fn test_add_hits_rejects_incompatible() {
        let mut setup = straight_line_setup(20);
        // A hit far off in time cannot be on the track
        let mut strawhits: Vec<_> = setup.definition.hits.iter().cloned().collect();
        strawhits[9].time += 500.0;
        setup.definition.hits = strawhits.into();
        let fitter = setup_fitter(&setup, plain_config());
        let mut definition = setup.definition.clone();
        let dropped = definition.hit_indices.remove(9);
        let mut result = fitter.make_track(definition, None);

        fitter.add_hits(&mut result, &[dropped], 5.0).unwrap();
        let hit = result.hits.last().unwrap();
        assert!(!hit.active);
        assert_eq!(result.n_active(), 19);
    }

    #[test]
    fn test_bounding_reference() {
        let setup = straight_line_setup(20);
        let hits = &setup.hits;
        let (t0, flt) = bounding_reference(hits, hits[4].flt - 1.0).unwrap();
        assert_eq!(flt, hits[4].flt);
        assert_eq!(t0, hits[4].hit_t0);

        let beyond = hits[19].flt + 100.0;
        let (_, flt) = bounding_reference(hits, beyond).unwrap();
        assert_eq!(flt, hits[19].flt);
        assert!(bounding_reference(&[], 0.0).is_none());
    }
}
