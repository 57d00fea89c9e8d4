//! The "KALREP" Engine - Numerical Trajectory Representation
//!
//! Holds the fitted helix, its covariance and the fit history. A fit is the
//! batch equivalent of a Kalman filter and smoother without process noise:
//! a Gauss-Newton least-squares fit of the five helix parameters to the
//! signed hit residuals, with the seed as a weak Gaussian prior.
//!
//! The representation does not own the hits. The fit result passes its hit
//! arena in on every call, so hit activity and ambiguity stay under the
//! control of the fit orchestrator.

use nalgebra::{Matrix5, Vector3, Vector5};
use strawfit_env::TrackerConditions;
use tracing::{debug, trace, warn};

use crate::config::KalRepConfig;
use crate::error::FitError;
use crate::fit_result::FitStatus;
use crate::helix::Helix;
use crate::hit::{Residual, TrackHit};
use crate::material::MaterialIntersection;
use crate::metrics::chisq_consistency;
use crate::particle::Particle;
use crate::track_def::{T0Estimate, TrackDefinition};

/// Number of fitted helix parameters.
pub const N_PARAMS: usize = 5;

/// One labelled record of a completed fit.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub label: String,
    pub success: bool,
    pub reason: Option<String>,
    pub chisq: f64,
    pub ndof: i64,
    pub n_active: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FitState {
    Unfitted,
    Converged,
    Failed,
}

/// Fitted trajectory with covariance and history.
#[derive(Debug, Clone)]
pub struct KalRep {
    config: KalRepConfig,
    particle: Particle,
    bz: f64,

    // === Prior ===
    seed: Vector5<f64>,
    prior_weight: Matrix5<f64>,

    // === State ===
    reference: Helix,
    covariance: Matrix5<f64>,
    t0: T0Estimate,
    flt0: f64,
    intersections: Vec<MaterialIntersection>,
    n_hits: usize,

    /// Signed measurement and variance each arena hit entered the last fit with
    fit_measurements: Vec<Option<(f64, f64)>>,

    // === Fit summary ===
    state: FitState,
    last_error: Option<FitError>,
    chisq: f64,
    ndof: i64,
    n_active: usize,
    history: Vec<HistoryEntry>,
}

impl KalRep {
    /// Creates a representation from the definition's seed, the full hit
    /// list (active or not) and the material intersections.
    ///
    /// The seed covariance is inflated by `seed_smear` and used as a prior.
    pub fn new(
        definition: &TrackDefinition,
        hits: &[TrackHit],
        intersections: Vec<MaterialIntersection>,
        bz: f64,
        config: &KalRepConfig,
    ) -> Result<Self, FitError> {
        let prior_cov = definition.covariance * config.seed_smear;
        let prior_weight = prior_cov
            .try_inverse()
            .ok_or_else(|| FitError::divergence("singular seed covariance"))?;

        Ok(Self {
            config: config.clone(),
            particle: definition.particle,
            bz,
            seed: definition.helix.params(),
            prior_weight,
            reference: definition.helix,
            covariance: prior_cov,
            t0: definition.t0,
            flt0: 0.0,
            intersections,
            n_hits: hits.len(),
            fit_measurements: Vec::new(),
            state: FitState::Unfitted,
            last_error: None,
            chisq: 0.0,
            ndof: 0,
            n_active: 0,
            history: Vec::new(),
        })
    }

    // ========================================================================
    // FIT
    // ========================================================================

    /// Invalidates the current fit. The reference trajectory is kept so the
    /// next fit starts from it.
    pub fn reset_fit(&mut self) {
        self.state = FitState::Unfitted;
        self.last_error = None;
    }

    /// Fits the active hits.
    ///
    /// Hits whose closest approach cannot be found are deactivated and the
    /// fit carries on without them. After convergence every hit, active or
    /// not, has its closest approach and drift refreshed against the final
    /// trajectory.
    pub fn fit<C: TrackerConditions + ?Sized>(
        &mut self,
        hits: &mut [TrackHit],
        conditions: &C,
    ) -> Result<(), FitError> {
        self.state = FitState::Unfitted;
        match self.iterate(hits, conditions) {
            Ok(()) => {
                self.state = FitState::Converged;
                self.last_error = None;
                debug!(
                    "Fit converged: chisq={:.2} ndof={} nactive={} p={:.2}",
                    self.chisq,
                    self.ndof,
                    self.n_active,
                    self.momentum_mag(self.flt0)
                );
                Ok(())
            }
            Err(e) => {
                debug!("Fit failed: {}", e);
                self.state = FitState::Failed;
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn iterate<C: TrackerConditions + ?Sized>(
        &mut self,
        hits: &mut [TrackHit],
        conditions: &C,
    ) -> Result<(), FitError> {
        let mut params = self.reference.params();
        let mut converged = false;

        for iteration in 0..self.config.max_fit_iterations {
            let helix = Helix::from_params(&params);
            self.refresh_hits(hits, &helix, conditions, true);
            self.check_ndof(hits)?;

            let (normal, rhs) = self.normal_equations(hits, &helix, &params);
            let chol = normal
                .cholesky()
                .ok_or_else(|| FitError::divergence("singular normal matrix"))?;
            let delta = chol.solve(&rhs);

            let max_change = hits
                .iter()
                .filter(|h| h.active)
                .filter_map(|h| h.poca())
                .map(|p| doca_gradient(&helix, p.flt, &p.normal).dot(&delta).abs())
                .fold(0.0, f64::max);

            params += delta;
            if params.iter().any(|v| !v.is_finite()) {
                return Err(FitError::divergence("non-finite helix parameters"));
            }

            trace!("Fit iteration {}: max residual change {:.4}", iteration, max_change);
            if max_change < self.config.iteration_tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            return Err(FitError::divergence(format!(
                "no convergence after {} iterations",
                self.config.max_fit_iterations
            )));
        }

        self.reference = Helix::from_params(&params);
        let helix = self.reference;
        self.refresh_hits(hits, &helix, conditions, false);
        self.check_ndof(hits)?;

        let (normal, _) = self.normal_equations(hits, &helix, &params);
        self.covariance = normal
            .try_inverse()
            .ok_or_else(|| FitError::divergence("singular normal matrix"))?;

        self.chisq = hits
            .iter()
            .filter(|h| h.active)
            .filter_map(|h| h.raw_residual())
            .map(|r| (r.value / r.error).powi(2))
            .sum();
        self.fit_measurements = hits
            .iter()
            .map(|h| {
                (h.active && h.poca().is_some())
                    .then(|| (h.ambig as f64 * h.drift().radius, h.hit_rms().powi(2)))
            })
            .collect();

        let p = self.reference.momentum_mag(self.bz);
        if p < self.config.min_momentum {
            return Err(FitError::divergence(format!(
                "momentum {:.2} below minimum {:.2}",
                p, self.config.min_momentum
            )));
        }
        Ok(())
    }

    /// Refreshes closest approach and drift. With `active_only`, inactive
    /// hits are skipped; a POCA failure always deactivates an active hit.
    fn refresh_hits<C: TrackerConditions + ?Sized>(
        &self,
        hits: &mut [TrackHit],
        helix: &Helix,
        conditions: &C,
        active_only: bool,
    ) {
        for hit in hits.iter_mut() {
            if active_only && !hit.active {
                continue;
            }
            if let Err(e) = hit.update_poca(helix, self.config.divergence_flt) {
                if hit.active {
                    warn!("Deactivating hit {}: {}", hit.index, e);
                    hit.active = false;
                }
                continue;
            }
            hit.update_drift(conditions);
        }
    }

    fn check_ndof(&mut self, hits: &[TrackHit]) -> Result<(), FitError> {
        self.n_active = hits.iter().filter(|h| h.active && h.poca().is_some()).count();
        self.ndof = self.n_active as i64 - N_PARAMS as i64;
        if self.ndof < self.config.min_ndof as i64 {
            return Err(FitError::divergence(format!(
                "ndof {} below minimum {}",
                self.ndof, self.config.min_ndof
            )));
        }
        Ok(())
    }

    /// Normal matrix and right-hand side for a step from `params`.
    fn normal_equations(
        &self,
        hits: &[TrackHit],
        helix: &Helix,
        params: &Vector5<f64>,
    ) -> (Matrix5<f64>, Vector5<f64>) {
        let mut normal = self.prior_weight;
        let mut rhs = self.prior_weight * (self.seed - params);

        for hit in hits.iter().filter(|h| h.active) {
            let (Some(poca), Some(r)) = (hit.poca(), hit.residual()) else {
                continue;
            };
            let weight = 1.0 / hit.hit_rms().powi(2);
            let j = doca_gradient(helix, poca.flt, &poca.normal);
            normal += j * j.transpose() * weight;
            rhs -= j * (r * weight);
        }
        (normal, rhs)
    }

    // ========================================================================
    // RESIDUALS
    // ========================================================================

    /// Residual of `hit` against the fitted trajectory.
    ///
    /// With `exclude` an active hit's own measurement is removed from the
    /// fit (the unbiased residual). Returns `None` without a valid fit, when
    /// the hit has no closest approach, or when its leverage makes the
    /// excluded variance non-positive.
    pub fn resid(&self, hit: &TrackHit, exclude: bool) -> Option<Residual> {
        if !self.fit_valid() {
            return None;
        }
        let poca = hit.poca()?;
        let r = hit.residual()?;
        let sigma2 = hit.hit_rms().powi(2);

        let j = doca_gradient(&self.reference, poca.flt, &poca.normal);
        let leverage = (j.transpose() * self.covariance * j)[(0, 0)];

        if !hit.active {
            return Some(Residual {
                value: r,
                error: (sigma2 + leverage).sqrt(),
            });
        }

        let reduced = sigma2 - leverage;
        if reduced <= 0.0 {
            return None;
        }
        if exclude {
            Some(Residual {
                value: r * sigma2 / reduced,
                error: (sigma2 * sigma2 / reduced).sqrt(),
            })
        } else {
            Some(Residual {
                value: r,
                error: reduced.sqrt(),
            })
        }
    }

    /// Signed trajectory DOCA at arena position `pos` with that hit's own
    /// measurement removed from the fit.
    ///
    /// The measurement removed is the one the hit carried when the fit ran,
    /// so the estimate does not move when only the ambiguity changes. Hits
    /// that did not take part in the fit return their plain DOCA.
    pub fn excluded_doca(&self, pos: usize, hit: &TrackHit) -> Option<f64> {
        if !self.fit_valid() {
            return None;
        }
        let poca = hit.poca()?;
        let Some(&Some((measurement, sigma2))) = self.fit_measurements.get(pos) else {
            return Some(poca.doca);
        };

        let j = doca_gradient(&self.reference, poca.flt, &poca.normal);
        let leverage = (j.transpose() * self.covariance * j)[(0, 0)];
        let reduced = sigma2 - leverage;
        if reduced <= 0.0 {
            return None;
        }
        Some(poca.doca - leverage / reduced * (measurement - poca.doca))
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Whether the last fit converged.
    pub fn fit_valid(&self) -> bool {
        self.state == FitState::Converged
    }

    /// Status of the last fit.
    pub fn status(&self) -> FitStatus {
        match self.state {
            FitState::Unfitted => FitStatus::Unfitted,
            FitState::Converged => FitStatus::Success,
            FitState::Failed => FitStatus::Failed(
                self.last_error
                    .clone()
                    .unwrap_or_else(|| FitError::divergence("unknown")),
            ),
        }
    }

    pub fn helix(&self) -> &Helix {
        &self.reference
    }

    pub fn covariance(&self) -> &Matrix5<f64> {
        &self.covariance
    }

    pub fn particle(&self) -> Particle {
        self.particle
    }

    pub fn bz(&self) -> f64 {
        self.bz
    }

    pub fn position(&self, flt: f64) -> Vector3<f64> {
        self.reference.position(flt)
    }

    pub fn direction(&self, flt: f64) -> Vector3<f64> {
        self.reference.direction(flt)
    }

    /// Momentum magnitude at `flt`, including the energy lost (or regained,
    /// upstream) in the material crossed since `flt0`.
    pub fn momentum_mag(&self, flt: f64) -> f64 {
        let p0 = self.reference.momentum_mag(self.bz);
        if !p0.is_finite() {
            return p0;
        }

        let (lo, hi, sign) = if flt >= self.flt0 {
            (self.flt0, flt, -1.0)
        } else {
            (flt, self.flt0, 1.0)
        };
        let de: f64 = self
            .intersections
            .iter()
            .filter(|i| i.flt > lo && i.flt <= hi)
            .map(|i| i.energy_loss)
            .sum();
        if de == 0.0 {
            return p0;
        }

        let mass = self.particle.mass();
        let energy = self.particle.energy(p0) + sign * de;
        (energy * energy - mass * mass).max(0.0).sqrt()
    }

    /// Momentum vector at `flt`.
    pub fn momentum(&self, flt: f64) -> Vector3<f64> {
        self.direction(flt) * self.momentum_mag(flt)
    }

    pub fn t0(&self) -> T0Estimate {
        self.t0
    }

    pub fn flt0(&self) -> f64 {
        self.flt0
    }

    /// Anchors the track time `t0` at flight length `flt0`.
    pub fn set_t0(&mut self, t0: T0Estimate, flt0: f64) {
        self.t0 = t0;
        self.flt0 = flt0;
    }

    pub fn chisq(&self) -> f64 {
        self.chisq
    }

    pub fn ndof(&self) -> i64 {
        self.ndof
    }

    pub fn n_active(&self) -> usize {
        self.n_active
    }

    /// Number of hits handed to the representation.
    pub fn n_hits(&self) -> usize {
        self.n_hits
    }

    /// χ² probability of the last fit.
    pub fn consistency(&self) -> f64 {
        chisq_consistency(self.chisq, self.ndof)
    }

    pub fn intersections(&self) -> &[MaterialIntersection] {
        &self.intersections
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    // ========================================================================
    // MUTATION
    // ========================================================================

    /// Registers one more hit appended to the arena.
    pub fn add_hit(&mut self) {
        self.n_hits += 1;
    }

    pub fn add_intersection(&mut self, intersection: MaterialIntersection) {
        self.intersections.push(intersection);
    }

    /// Records a labelled history entry for the current fit state.
    pub fn add_history(&mut self, label: &str, status: &FitStatus) {
        let reason = match status {
            FitStatus::Failed(e) => Some(e.to_string()),
            _ => None,
        };
        self.history.push(HistoryEntry {
            label: label.to_string(),
            success: status.is_success(),
            reason,
            chisq: self.chisq,
            ndof: self.ndof,
            n_active: self.n_active,
        });
    }
}

/// Gradient of the hit DOCA with respect to the helix parameters, taken at
/// fixed flight length along the DOCA sign vector.
fn doca_gradient(helix: &Helix, flt: f64, normal: &Vector3<f64>) -> Vector5<f64> {
    helix.position_derivatives(flt).transpose() * normal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{straight_line_setup, StraightLineSetup};
    use approx::assert_relative_eq;

    fn fit_setup(setup: &mut StraightLineSetup) -> KalRep {
        let mut krep = KalRep::new(
            &setup.definition,
            &setup.hits,
            Vec::new(),
            0.0,
            &setup.config.kalrep,
        )
        .unwrap();
        krep.fit(&mut setup.hits, &setup.detector.conditions).unwrap();
        krep
    }

    #[test]
    fn test_fit_on_exact_hits_reproduces_seed() {
        let mut setup = straight_line_setup(20);
        let krep = fit_setup(&mut setup);

        assert!(krep.fit_valid());
        assert_eq!(krep.n_active(), 20);
        assert_eq!(krep.ndof(), 15);
        assert!(krep.chisq() < 1e-6);

        let seed = setup.definition.helix.params();
        for i in 0..N_PARAMS {
            assert_relative_eq!(krep.helix().params()[i], seed[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_fit_recovers_shifted_seed() {
        let mut setup = straight_line_setup(20);
        let truth = setup.definition.helix;
        // Start 0.3 mm off in d0 and z0
        let mut krep = KalRep::new(&setup.definition, &setup.hits, Vec::new(), 0.0, &setup.config.kalrep).unwrap();
        krep.reference = Helix { d0: truth.d0 + 0.3, z0: truth.z0 - 0.3, ..truth };
        krep.fit(&mut setup.hits, &setup.detector.conditions).unwrap();

        assert_relative_eq!(krep.helix().d0, truth.d0, epsilon = 1e-3);
        assert_relative_eq!(krep.helix().z0, truth.z0, epsilon = 1e-3);
    }

    #[test]
    fn test_too_few_active_hits_fails() {
        let mut setup = straight_line_setup(20);
        for hit in setup.hits.iter_mut().take(8) {
            hit.active = false;
        }
        let mut krep = KalRep::new(&setup.definition, &setup.hits, Vec::new(), 0.0, &setup.config.kalrep).unwrap();
        let err = krep.fit(&mut setup.hits, &setup.detector.conditions).unwrap_err();

        assert!(matches!(err, FitError::FitDivergence(_)));
        assert!(!krep.fit_valid());
        assert!(matches!(krep.status(), FitStatus::Failed(_)));
    }

    #[test]
    fn test_unbiased_residual_is_larger() {
        let mut setup = straight_line_setup(20);
        // Displace one hit by 0.5 mm in time-equivalent drift
        setup.hits[7].set_ambig(1);
        setup.hits[7].time += 0.5 / setup.detector.conditions.drift_velocity;
        let krep = fit_setup(&mut setup);

        let hit = &setup.hits[7];
        let biased = krep.resid(hit, false).unwrap();
        let unbiased = krep.resid(hit, true).unwrap();

        assert!(unbiased.value.abs() > biased.value.abs());
        assert!(unbiased.error > biased.error);
    }

    #[test]
    fn test_no_residual_without_fit() {
        let setup = straight_line_setup(20);
        let krep = KalRep::new(&setup.definition, &setup.hits, Vec::new(), 0.0, &setup.config.kalrep).unwrap();
        assert!(krep.resid(&setup.hits[0], true).is_none());
    }

    #[test]
    fn test_momentum_with_energy_loss() {
        let mut setup = straight_line_setup(20);
        let mut krep = fit_setup(&mut setup);
        // Infinite momentum in zero field stays infinite
        assert!(krep.momentum_mag(100.0).is_infinite());

        krep.bz = 1.0;
        krep.reference.omega = 0.003;
        let p0 = krep.momentum_mag(0.0);
        krep.add_intersection(MaterialIntersection {
            straw: strawfit_env::StrawId(0),
            element: crate::material::MaterialElement::Wall,
            flt: 50.0,
            path_len: 1.0,
            energy_loss: 1.0,
        });

        assert!(krep.momentum_mag(100.0) < p0);
        assert_relative_eq!(krep.momentum_mag(0.0), p0, epsilon = 1e-12);
        assert_relative_eq!(krep.momentum_mag(-100.0), p0, epsilon = 1e-12);
    }

    #[test]
    fn test_history_records_status() {
        let mut setup = straight_line_setup(20);
        let mut krep = fit_setup(&mut setup);
        let status = krep.status();
        krep.add_history("KalFitHack", &status);

        let entry = &krep.history()[0];
        assert_eq!(entry.label, "KalFitHack");
        assert!(entry.success);
        assert_eq!(entry.n_active, 20);
    }
}
