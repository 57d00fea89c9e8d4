//! Outlier removal and recovery.
//!
//! Weeding deactivates the active hit with the largest unbiased pull above
//! `max_hit_chi` and refits, one hit at a time. Unweeding does the reverse
//! for inactive hits compatible with the trajectory. Both passes are
//! bounded and each records a history entry per refit.

use strawfit_env::DetectorContext;
use tracing::debug;

use crate::fit_result::FitResult;
use crate::fitter::KalFit;
use crate::hit::Usability;

impl<D: DetectorContext> KalFit<D> {
    /// Removes outliers from a fitted result, at most `max_weed` of them.
    ///
    /// Returns whether any hit was removed. `nweediter` counts the hits
    /// removed by this pass.
    pub fn weed_hits(&self, result: &mut FitResult) -> bool {
        let max_chi = self.config().max_hit_chi;
        result.nweediter = 0;

        let mut removed = false;
        while result.nweediter < self.config().max_weed {
            let Some(krep) = result.krep.as_ref().filter(|k| k.fit_valid()) else {
                break;
            };

            let mut worst: Option<(usize, f64)> = None;
            for (pos, hit) in result.hits.iter().enumerate().filter(|(_, h)| h.active) {
                let Some(resid) = krep.resid(hit, true) else {
                    continue;
                };
                let chi = resid.pull().abs();
                if chi > max_chi && worst.map_or(true, |(_, w)| chi > w) {
                    worst = Some((pos, chi));
                }
            }
            let Some((pos, chi)) = worst else {
                break;
            };

            let hit = &mut result.hits[pos];
            debug!("Weeding hit {} on {} with chi {:.2}", hit.index, hit.straw.id, chi);
            hit.active = false;
            hit.usability = Usability::Weeded;

            result.fit(self.detector());
            result.add_history("HitWeed");
            result.nweediter += 1;
            removed = true;
            if !result.status.is_success() {
                break;
            }
        }
        removed
    }

    /// Restores inactive hits whose pull against the fitted trajectory is
    /// below `max_chi` and whose drift radius is physical, best first, at
    /// most `max_weed` of them.
    ///
    /// Returns whether any hit was restored. `nunweediter` counts the hits
    /// restored by this pass.
    pub fn unweed_hits(&self, result: &mut FitResult, max_chi: f64) -> bool {
        result.nunweediter = 0;

        let mut restored = false;
        while result.nunweediter < self.config().max_weed {
            let Some(krep) = result.krep.as_ref().filter(|k| k.fit_valid()) else {
                break;
            };

            let mut best: Option<(usize, f64)> = None;
            for (pos, hit) in result.hits.iter().enumerate().filter(|(_, h)| !h.active) {
                let Some(resid) = krep.resid(hit, false) else {
                    continue;
                };
                let chi = resid.pull().abs();
                if chi < max_chi && hit.physical_drift(max_chi) && best.map_or(true, |(_, b)| chi < b) {
                    best = Some((pos, chi));
                }
            }
            let Some((pos, chi)) = best else {
                break;
            };

            let hit = &mut result.hits[pos];
            debug!("Restoring hit {} on {} with chi {:.2}", hit.index, hit.straw.id, chi);
            hit.active = true;
            hit.usability = Usability::Reactivated;

            result.fit(self.detector());
            result.add_history("HitUnWeed");
            result.nunweediter += 1;
            restored = true;
            if !result.status.is_success() {
                break;
            }
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KalFitConfig;
    use crate::test_support::{built_result, plain_config, setup_fitter, straight_line_setup, StraightLineSetup};
    use proptest::prelude::*;
    use strawfit_env::StrawDetector;

    /// Fits the setup, then turns hit `pos` into a 1 mm outlier and refits.
    fn fitted_with_outlier(setup: &StraightLineSetup, fitter: &KalFit<StrawDetector>, pos: usize) -> FitResult {
        let mut result = fitter.make_track(setup.definition.clone(), None);
        let hit = &mut result.hits[pos];
        hit.set_ambig(1);
        hit.time += 1.0 / setup.detector.conditions.drift_velocity;
        assert!(result.fit(&*setup.detector));
        result
    }

    #[test]
    fn test_weed_removes_outlier() {
        let setup = straight_line_setup(20);
        let fitter = setup_fitter(&setup, plain_config());
        let mut result = fitted_with_outlier(&setup, &fitter, 7);

        assert!(fitter.weed_hits(&mut result));
        assert_eq!(result.nweediter, 1);
        assert!(result.is_success());
        assert!(!result.hits[7].active);
        assert_eq!(result.hits[7].usability, Usability::Weeded);
        assert_eq!(result.n_active(), 19);
        assert_eq!(result.history().last().unwrap().label, "HitWeed");
    }

    #[test]
    fn test_weed_clean_fit_is_noop() {
        let setup = straight_line_setup(20);
        let fitter = setup_fitter(&setup, plain_config());
        let mut result = fitter.make_track(setup.definition.clone(), None);
        let history = result.history().len();

        assert!(!fitter.weed_hits(&mut result));
        assert_eq!(result.nweediter, 0);
        assert_eq!(result.history().len(), history);
    }

    #[test]
    fn test_weed_respects_cap() {
        let setup = straight_line_setup(20);
        let config = KalFitConfig {
            max_weed: 0,
            ..plain_config()
        };
        let fitter = setup_fitter(&setup, config);
        let mut result = fitted_with_outlier(&setup, &fitter, 7);

        assert!(!fitter.weed_hits(&mut result));
        assert!(result.hits[7].active);
    }

    #[test]
    fn test_weed_without_fit() {
        let setup = straight_line_setup(20);
        let fitter = setup_fitter(&setup, plain_config());
        let mut result = built_result(&setup);
        assert!(!fitter.weed_hits(&mut result));
        assert!(!fitter.unweed_hits(&mut result, 5.0));
    }

    #[test]
    fn test_unweed_restores_good_hit() {
        let setup = straight_line_setup(20);
        let fitter = setup_fitter(&setup, plain_config());
        let mut result = fitted_with_outlier(&setup, &fitter, 7);
        fitter.weed_hits(&mut result);

        // Repair the measurement; the refit refreshes its drift
        let hit = &mut result.hits[7];
        hit.time -= 1.0 / setup.detector.conditions.drift_velocity;
        hit.set_ambig(0);
        assert!(result.fit(&*setup.detector));

        assert!(fitter.unweed_hits(&mut result, 5.0));
        assert_eq!(result.nunweediter, 1);
        assert!(result.hits[7].active);
        assert_eq!(result.hits[7].usability, Usability::Reactivated);
        assert_eq!(result.n_active(), 20);
        assert_eq!(result.history().last().unwrap().label, "HitUnWeed");
    }

    #[test]
    fn test_unweed_keeps_outlier_out() {
        let setup = straight_line_setup(20);
        let fitter = setup_fitter(&setup, plain_config());
        let mut result = fitted_with_outlier(&setup, &fitter, 7);
        fitter.weed_hits(&mut result);

        assert!(!fitter.unweed_hits(&mut result, 5.0));
        assert!(!result.hits[7].active);
    }

    #[test]
    fn test_unweed_respects_cap() {
        let setup = straight_line_setup(20);
        let config = KalFitConfig {
            max_weed: 1,
            ..plain_config()
        };
        let fitter = setup_fitter(&setup, config);
        let mut result = fitter.make_track(setup.definition.clone(), None);
        for pos in [5, 12] {
            let hit = &mut result.hits[pos];
            hit.active = false;
            hit.usability = Usability::Weeded;
        }
        assert!(result.fit(&*setup.detector));

        // Both hits are compatible, only one may come back per pass
        assert!(fitter.unweed_hits(&mut result, 5.0));
        assert_eq!(result.nunweediter, 1);
        assert_eq!(result.n_active(), 19);

        assert!(fitter.unweed_hits(&mut result, 5.0));
        assert_eq!(result.n_active(), 20);
    }

    #[test]
    fn test_add_then_weed_round_trip() {
        let mut setup = straight_line_setup(20);
        let mut strawhits: Vec<_> = setup.definition.hits.iter().cloned().collect();
        strawhits[9].time += 1.0 / setup.detector.conditions.drift_velocity;
        setup.definition.hits = strawhits.into();

        let fitter = setup_fitter(&setup, plain_config());
        let mut definition = setup.definition.clone();
        let dropped = definition.hit_indices.remove(9);
        let mut result = fitter.make_track(definition, None);
        let active = result.active_indices();
        let intersections = result.intersections.len();

        fitter.add_hits(&mut result, &[dropped], 100.0).unwrap();
        // The wire sits on the trajectory: pin the hit to one side so the
        // late time shows up as a 1 mm residual
        let added = result.hits.last_mut().unwrap();
        assert!(added.active);
        added.set_ambig(1);
        assert!(result.fit(&*setup.detector));

        assert!(fitter.weed_hits(&mut result));
        assert_eq!(result.nweediter, 1);
        let added = result.hits.last().unwrap();
        assert!(!added.active);
        assert_eq!(added.usability, Usability::Weeded);

        assert_eq!(result.active_indices(), active);
        assert!(result.intersections.len() >= intersections);
    }

    proptest! {
        #[test]
        fn prop_weeding_is_bounded(
            outliers in proptest::collection::btree_set(0usize..20, 0..8),
            max_weed in 0u32..5,
        ) {
            let setup = straight_line_setup(20);
            let config = KalFitConfig { max_weed, ..plain_config() };
            let fitter = setup_fitter(&setup, config);
            let mut result = fitter.make_track(setup.definition.clone(), None);
            for &pos in &outliers {
                let hit = &mut result.hits[pos];
                hit.set_ambig(1);
                hit.time += 1.0 / setup.detector.conditions.drift_velocity;
            }
            result.fit(&*setup.detector);

            let removed = fitter.weed_hits(&mut result);
            prop_assert!(result.nweediter <= max_weed);
            prop_assert_eq!(removed, result.nweediter > 0);
            prop_assert!(result.n_active() + result.nweediter as usize >= 20);
        }
    }
}
