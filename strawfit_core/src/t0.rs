//! Track t0 estimation and per-hit time propagation.
//!
//! The track t0 is the time the particle crosses z = 0. Initial estimates
//! come from a calorimeter cluster or from the median of the hit times
//! corrected back to z = 0. Inside the fit loop the t0 is refined from the
//! drift times implied by the unbiased trajectory DOCAs, with an iterative
//! window rejecting outliers.

use strawfit_env::DetectorContext;
use tracing::{debug, trace, warn};

use crate::fit_result::FitResult;
use crate::fitter::KalFit;
use crate::particle::C_LIGHT;
use crate::track_def::{CaloCluster, T0Estimate, TrackDefinition};

/// Error assigned to a t0 that could not be estimated properly (ns).
pub const DEGENERATE_T0_ERROR: f64 = 1.0e3;

/// Error of a calorimeter-derived t0 (ns).
pub const CALO_T0_ERROR: f64 = 1.0;

impl<D: DetectorContext> KalFit<D> {
    /// Estimates t0 from the hit times alone.
    ///
    /// Every hit time is corrected for the flight from z = 0, the signal
    /// propagation from the straw centre and the drift time of half a straw
    /// radius; the median of the corrected times is the estimate and its
    /// error is the spread of a uniform distribution over their range.
    pub fn init_t0(&self, definition: &TrackDefinition) -> T0Estimate {
        let seed = definition.helix;
        let flt0 = seed.z_flight(0.0).unwrap_or(0.0);
        let velocity = self.seed_velocity(definition);

        let mut times = Vec::with_capacity(definition.n_hits());
        for hi in &definition.hit_indices {
            let Some(strawhit) = definition.strawhit(hi.index) else {
                continue;
            };
            let Some(straw) = self.detector().straw(strawhit.straw) else {
                continue;
            };
            let flight = seed.z_flight(straw.mid_point.z).unwrap_or(flt0) - flt0;
            let signal = straw.half_length / self.detector().signal_velocity(straw.id);
            let drift = self.detector().distance_to_time(straw.id, 0.5 * straw.radius).tdrift;
            times.push(strawhit.time - flight / velocity - signal - drift);
        }

        let Some(t0) = median(&mut times) else {
            warn!("No usable hit times, keeping t0 {:.3}", definition.t0.t0);
            return definition.t0;
        };
        let (lo, hi) = times
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| (lo.min(t), hi.max(t)));
        let err = (hi - lo) / (12.0 * times.len() as f64).sqrt();
        trace!("Hit t0 {:.3} ± {:.3} from {} hits", t0, err, times.len());
        T0Estimate::new(t0, err)
    }

    /// Estimates t0 from a calorimeter cluster, propagating the cluster time
    /// back along the seed to z = 0.
    ///
    /// A seed without longitudinal motion cannot be propagated; the cluster
    /// time is returned with [`DEGENERATE_T0_ERROR`].
    pub fn init_calo_t0(&self, cluster: &CaloCluster, definition: &TrackDefinition) -> T0Estimate {
        let sin_dip = definition.helix.sin_dip();
        let velocity = self.seed_velocity(definition);
        self.calo_t0(cluster, sin_dip, velocity)
    }

    fn calo_t0(&self, cluster: &CaloCluster, sin_dip: f64, velocity: f64) -> T0Estimate {
        if sin_dip.abs() < 1.0e-9 || !velocity.is_finite() || velocity <= 0.0 {
            debug!("Degenerate cluster t0: sin(dip) {:.3e}, v {:.3}", sin_dip, velocity);
            return T0Estimate::new(cluster.time, DEGENERATE_T0_ERROR);
        }
        let path = cluster.z / sin_dip;
        T0Estimate::new(
            cluster.time + self.config().calo_time_offset - path / velocity,
            CALO_T0_ERROR,
        )
    }

    /// Re-derives the track t0 from the cluster with the fitted trajectory
    /// and refreshes the hit times. Returns `false` without a valid fit or
    /// when the fitted track has no longitudinal motion.
    pub fn update_calo_t0(&self, result: &mut FitResult, cluster: &CaloCluster) -> bool {
        let Some(krep) = result.krep.as_mut().filter(|k| k.fit_valid()) else {
            return false;
        };
        let helix = *krep.helix();
        let Some(flt0) = helix.z_flight(0.0) else {
            return false;
        };
        let velocity = krep.particle().beta(krep.momentum_mag(flt0)) * C_LIGHT;
        let t0 = self.calo_t0(cluster, helix.sin_dip(), velocity);
        if t0.err >= DEGENERATE_T0_ERROR {
            return false;
        }
        krep.set_t0(t0, flt0);
        self.update_hit_times(result);
        true
    }

    /// Refines the track t0 from the active hits of a fitted result.
    ///
    /// Each hit whose unbiased DOCA lies inside the straw contributes the
    /// difference between its measured and expected drift times. An
    /// iterative window of `t0_window` errors around the weighted mean
    /// rejects outliers. The update is applied, and the hit times refreshed,
    /// only when the window settles within `t0_max_iterations` rounds.
    ///
    /// Returns whether the t0 was updated.
    pub fn update_t0(&self, result: &mut FitResult) -> bool {
        let config = self.config();
        let Some(krep) = result.krep.as_ref().filter(|k| k.fit_valid()) else {
            return false;
        };
        let Some(flt0) = krep.helix().z_flight(0.0) else {
            return false;
        };

        let mut offsets = Vec::new();
        let mut errors = Vec::new();
        for hit in result.hits.iter().filter(|h| h.active) {
            let Some(resid) = krep.resid(hit, true) else {
                continue;
            };
            let ambig = hit.ambig as f64;
            let signed = resid.value + ambig * hit.drift().radius;
            let doca = if hit.ambig == 0 { signed.abs() } else { signed * ambig };
            if doca <= config.min_t0_doca || doca >= hit.straw.radius - config.min_t0_doca {
                continue;
            }
            let d2t = self.detector().distance_to_time(hit.straw.id, doca);
            offsets.push(hit.time - d2t.tdrift - hit.signal_time() - hit.hit_t0.t0);
            errors.push(resid.error / d2t.vdrift);
        }
        if offsets.len() < 2 {
            trace!("Only {} hits usable for t0", offsets.len());
            return false;
        }

        let mut offset = median(&mut offsets.clone()).unwrap_or(0.0);
        let mut offset_err = krep.t0().err;
        let mut used = vec![true; offsets.len()];
        let mut changed = true;
        let mut niter = 0;
        while changed && niter < config.t0_max_iterations {
            niter += 1;
            changed = false;

            let (mut sum_w, mut sum_wt, mut sum_wtt, mut nused) = (0.0, 0.0, 0.0, 0usize);
            for (i, (&t, &err)) in offsets.iter().zip(&errors).enumerate() {
                let keep = (t - offset).abs() < config.t0_window * err;
                changed |= keep != used[i];
                used[i] = keep;
                if keep {
                    let w = 1.0 / (err * err);
                    sum_w += w;
                    sum_wt += w * t;
                    sum_wtt += w * t * t;
                    nused += 1;
                }
            }
            if nused < 2 {
                break;
            }
            offset = sum_wt / sum_w;
            let variance = (sum_wtt / sum_w - offset * offset).max(0.0);
            offset_err = (variance / nused as f64).sqrt();
        }
        result.nt0iter = niter;

        if changed {
            debug!("t0 update did not settle after {} rounds", niter);
            return false;
        }

        let old = krep.t0();
        let t0 = T0Estimate::new(old.t0 + offset, offset_err * config.t0_error_factor);
        trace!("t0 {:.3} -> {:.3} ± {:.3} after {} rounds", old.t0, t0.t0, t0.err, niter);
        if let Some(krep) = result.krep.as_mut() {
            krep.set_t0(t0, flt0);
        }
        self.update_hit_times(result);
        true
    }

    /// Propagates the track t0 to every hit.
    ///
    /// Hits are visited outwards from the t0 reference in both directions,
    /// accumulating flight time with the local momentum, so the energy lost
    /// in material slows the particle down along the way. The result does
    /// not depend on the arena order.
    pub fn update_hit_times(&self, result: &mut FitResult) {
        let Some(krep) = result.krep.as_ref() else {
            return;
        };
        let flt0 = krep.flt0();
        let t0 = krep.t0();
        let particle = krep.particle();

        let mut order: Vec<usize> = (0..result.hits.len()).collect();
        order.sort_by(|&a, &b| {
            let (ha, hb) = (&result.hits[a], &result.hits[b]);
            ha.flt.total_cmp(&hb.flt).then(ha.index.cmp(&hb.index))
        });
        let split = order.partition_point(|&i| result.hits[i].flt < flt0);

        let mut updates = Vec::with_capacity(order.len());
        for range in [
            order[split..].iter().collect::<Vec<_>>(),
            order[..split].iter().rev().collect::<Vec<_>>(),
        ] {
            let (mut time, mut flt) = (t0.t0, flt0);
            for &pos in range {
                let hit_flt = result.hits[pos].flt;
                let velocity = particle.beta(krep.momentum_mag(hit_flt)) * C_LIGHT;
                time += (hit_flt - flt) / velocity;
                flt = hit_flt;
                updates.push((pos, T0Estimate::new(time, t0.err)));
            }
        }

        for (pos, hit_t0) in updates {
            result.hits[pos].update_hit_t0(hit_t0, self.detector());
        }
        if self.config().debug_level > 1 {
            debug!("Hit times updated\n{}", result.hit_table());
        }
    }
}

/// Median of `values`, reordering them; `None` when empty.
pub(crate) fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    Some(if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    })
}
