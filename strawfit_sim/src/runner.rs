//! Scenario runner - executes fit validation scenarios.

use strawfit_core::{CaloT0Mode, FitError, FitResult, HitIndex, KalFitConfig, ValidationReport, ValidationSession};
use tracing::{debug, info, warn};

use crate::error::SimError;
use crate::exporter::{SimExport, TrackExport};
use crate::oracle::GeneratedTrack;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

/// Hits of the too-few-hits definitions.
const SHORT_TRACK_HITS: usize = 10;

/// Every n-th hit is withheld in the add-hits scenario.
const WITHHELD_STRIDE: usize = 4;

/// Polar angles of field-free tracks: forward enough to stay inside the
/// tracker over its full length.
const STRAIGHT_COS_THETA: std::ops::Range<f64> = 0.99..0.999;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Tracks generated
    pub tracks: usize,

    /// Tracks fitted successfully
    pub fitted: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Truth comparison
    pub report: Option<ValidationReport>,

    /// Per-track records
    pub exports: Vec<TrackExport>,
}

impl ScenarioResult {
    /// Packages the result for JSON export.
    pub fn to_export(&self) -> SimExport {
        let mut export = SimExport::new(self.scenario.name(), self.seed);
        for track in &self.exports {
            export.add_track(track.clone());
        }
        if let Some(report) = &self.report {
            export.finalize(self.passed, report.clone());
        }
        export
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioMetrics {
    pub efficiency: f64,

    /// Mean fitted minus true momentum (MeV/c)
    pub momentum_bias: f64,

    /// RMS momentum residual (MeV/c)
    pub momentum_rms: f64,

    /// RMS t0 residual (ns)
    pub t0_rms: f64,

    pub mean_chisq_per_ndof: f64,

    /// Weeded hits that were true outliers
    pub weed_purity: f64,

    /// Hits removed by weeding
    pub weeded: usize,

    /// Hits active after an add-hits pass that were not before
    pub hits_added: usize,

    /// Fits rejected for too few hits
    pub insufficient_hits: usize,

    /// Fit loop iterations summed over stages and tracks
    pub iterations: u64,
}

/// Runs validation scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Tracks per scenario
    tracks: usize,

    /// Fit configuration under test
    fit_config: KalFitConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, tracks: usize) -> Self {
        Self {
            seed,
            tracks,
            fit_config: KalFitConfig::default(),
        }
    }

    /// Sets the fit configuration.
    pub fn with_fit_config(mut self, config: KalFitConfig) -> Self {
        self.fit_config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let outcome = match scenario {
            ScenarioId::StraightLine => self.run_straight_line(),
            ScenarioId::Conversion => self.run_conversion(),
            ScenarioId::Outliers => self.run_outliers(),
            ScenarioId::CaloSeed => self.run_calo_seed(),
            ScenarioId::AddHits => self.run_add_hits(),
            ScenarioId::TooFewHits => self.run_too_few_hits(),
        };

        match outcome {
            Ok((run, failure_reason)) => {
                let passed = failure_reason.is_none();
                if passed {
                    info!("✓ {} complete: {}/{} tracks fitted", scenario, run.fitted, self.tracks);
                } else {
                    warn!("✗ {} failed: {}", scenario, failure_reason.as_deref().unwrap_or(""));
                }
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed,
                    tracks: self.tracks,
                    fitted: run.fitted,
                    failure_reason,
                    metrics: run.metrics,
                    report: Some(run.report),
                    exports: run.exports,
                }
            }
            Err(e) => {
                warn!("✗ {} could not run: {}", scenario, e);
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    tracks: self.tracks,
                    fitted: 0,
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                    report: None,
                    exports: Vec::new(),
                }
            }
        }
    }

    /// FIT-001: StraightLine - zero-field fit quality.
    fn run_straight_line(&self) -> Result<(Run, Option<String>), SimError> {
        let sim = SimConfig {
            seed: self.seed,
            bz: 0.0,
            cos_theta: STRAIGHT_COS_THETA,
            ..Default::default()
        };
        let run = self.simulate(sim, self.fit_config.clone(), |world, track, _| world.fit(track, false))?;

        let max_chisq = 3.0;
        let failure = check_efficiency(&run, 0.9).or_else(|| {
            (run.metrics.mean_chisq_per_ndof > max_chisq).then(|| {
                format!(
                    "mean chi2/ndof {:.2} exceeds {:.1}",
                    run.metrics.mean_chisq_per_ndof, max_chisq
                )
            })
        });
        Ok((run, failure))
    }

    /// FIT-002: Conversion - momentum resolution in the nominal field.
    fn run_conversion(&self) -> Result<(Run, Option<String>), SimError> {
        let sim = SimConfig {
            seed: self.seed,
            ..Default::default()
        };
        let run = self.simulate(sim, self.fit_config.clone(), |world, track, _| world.fit(track, false))?;

        let max_rms = 1.0;
        let failure = check_efficiency(&run, 0.9).or_else(|| {
            (run.metrics.momentum_rms > max_rms)
                .then(|| format!("momentum RMS {:.3} MeV/c exceeds {:.1}", run.metrics.momentum_rms, max_rms))
        });
        Ok((run, failure))
    }

    /// FIT-003: Outliers - weeding removes corrupted hits.
    fn run_outliers(&self) -> Result<(Run, Option<String>), SimError> {
        let sim = SimConfig {
            seed: self.seed,
            outlier_fraction: 0.1,
            ..Default::default()
        };
        let run = self.simulate(sim, self.fit_config.clone(), |world, track, _| world.fit(track, false))?;

        let min_purity = 0.7;
        let failure = check_efficiency(&run, 0.8).or_else(|| {
            (run.metrics.weed_purity < min_purity)
                .then(|| format!("weed purity {:.2} below {:.2}", run.metrics.weed_purity, min_purity))
        });
        Ok((run, failure))
    }

    /// FIT-004: CaloSeed - t0 from the calorimeter cluster.
    fn run_calo_seed(&self) -> Result<(Run, Option<String>), SimError> {
        let sim = SimConfig {
            seed: self.seed,
            ..Default::default()
        };
        let fit_config = KalFitConfig {
            calo_t0_mode: CaloT0Mode::UseCluster,
            ..self.fit_config.clone()
        };
        let run = self.simulate(sim, fit_config, |world, track, _| world.fit(track, true))?;

        let max_t0_rms = 1.0;
        let failure = check_efficiency(&run, 0.9).or_else(|| {
            (run.metrics.t0_rms > max_t0_rms)
                .then(|| format!("t0 RMS {:.3} ns exceeds {:.1}", run.metrics.t0_rms, max_t0_rms))
        });
        Ok((run, failure))
    }

    /// FIT-005: AddHits - withheld hits are recovered after the fit.
    fn run_add_hits(&self) -> Result<(Run, Option<String>), SimError> {
        let sim = SimConfig {
            seed: self.seed,
            ..Default::default()
        };
        let max_chi = self.fit_config.max_hit_chi;
        let run = self.simulate(sim, self.fit_config.clone(), |world, track, metrics| {
            let (kept, withheld): (Vec<HitIndex>, Vec<HitIndex>) = (0..track.hits.len())
                .map(HitIndex::from)
                .partition(|hi| hi.index % WITHHELD_STRIDE != 0);
            let mut result = world.fitter().make_track(track.definition_with(kept), None);

            let before = result.n_active();
            match world.fitter().add_hits(&mut result, &withheld, max_chi) {
                Ok(n) => {
                    debug!("Track {}: appended {} hits", track.id, n);
                    metrics.hits_added += result.n_active().saturating_sub(before);
                }
                Err(e) => debug!("Track {}: hits not added: {}", track.id, e),
            }
            result
        })?;

        let failure = check_efficiency(&run, 0.9)
            .or_else(|| (run.metrics.hits_added == 0).then(|| "no withheld hit was recovered".to_string()));
        Ok((run, failure))
    }

    /// FIT-006: TooFewHits - short definitions fail without a fit.
    fn run_too_few_hits(&self) -> Result<(Run, Option<String>), SimError> {
        let sim = SimConfig {
            seed: self.seed,
            ..Default::default()
        };
        let run = self.simulate(sim, self.fit_config.clone(), |world, track, metrics| {
            let short = (0..track.hits.len().min(SHORT_TRACK_HITS)).map(HitIndex::from).collect();
            let result = world.fitter().make_track(track.definition_with(short), None);
            if matches!(result.status.error(), Some(FitError::InsufficientHits { .. })) {
                metrics.insufficient_hits += 1;
            }
            result
        })?;

        let failure = (run.metrics.insufficient_hits != self.tracks).then(|| {
            format!(
                "{} of {} short tracks rejected for too few hits",
                run.metrics.insufficient_hits, self.tracks
            )
        });
        Ok((run, failure))
    }

    /// Generates and fits `tracks` tracks, comparing each with its truth.
    fn simulate<F>(&self, sim: SimConfig, fit_config: KalFitConfig, mut fit: F) -> Result<Run, SimError>
    where
        F: FnMut(&SimWorld, &GeneratedTrack, &mut ScenarioMetrics) -> FitResult,
    {
        let mut world = SimWorld::new(sim, fit_config)?;
        let mut session = ValidationSession::new();
        let mut metrics = ScenarioMetrics::default();
        let mut exports = Vec::with_capacity(self.tracks);

        for _ in 0..self.tracks {
            let track = world.generate_track();
            let result = fit(&world, &track, &mut metrics);
            debug!(
                "  track {} | hits={} outliers={} | {}",
                track.id,
                track.hits.len(),
                track.outliers.len(),
                result.status
            );

            metrics.iterations += result.stage_iterations.iter().map(|&n| u64::from(n)).sum::<u64>();
            session.record_truth(track.id, track.momentum, track.t0, track.outliers.iter().copied());
            session.record_fit(track.id, &result);
            exports.push(TrackExport::new(&track, &result));
        }

        let report = session.generate_report();
        let g = &report.global;
        metrics.efficiency = g.efficiency();
        metrics.momentum_bias = g.momentum_bias();
        metrics.momentum_rms = g.momentum_rms();
        metrics.t0_rms = g.t0_rms();
        metrics.mean_chisq_per_ndof = g.mean_chisq_per_ndof();
        metrics.weed_purity = g.weed_purity();
        metrics.weeded = g.weeded;

        Ok(Run {
            fitted: g.tracks_fitted,
            metrics,
            report,
            exports,
        })
    }
}

/// Output of one simulation loop.
struct Run {
    fitted: usize,
    metrics: ScenarioMetrics,
    report: ValidationReport,
    exports: Vec<TrackExport>,
}

fn check_efficiency(run: &Run, min_efficiency: f64) -> Option<String> {
    (run.metrics.efficiency < min_efficiency).then(|| {
        format!(
            "efficiency {:.1}% below {:.1}%",
            100.0 * run.metrics.efficiency,
            100.0 * min_efficiency
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_few_hits_scenario() {
        let runner = ScenarioRunner::new(42, 5);
        let result = runner.run(ScenarioId::TooFewHits);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.fitted, 0);
        assert_eq!(result.metrics.insufficient_hits, 5);
        assert_eq!(result.metrics.iterations, 0);
        assert!(result.exports.iter().all(|t| t.summary.is_none()));
    }

    #[test]
    fn test_straight_line_tracks_cross_tracker() {
        let runner = ScenarioRunner::new(42, 5);
        let result = runner.run(ScenarioId::StraightLine);

        assert_eq!(result.metrics.insufficient_hits, 0);
        assert!(result.fitted > 0);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_bad_fit_config_fails_scenario() {
        let config = KalFitConfig {
            hit_errors: vec![1.0, 0.5],
            ..Default::default()
        };
        let runner = ScenarioRunner::new(42, 2).with_fit_config(config);
        let result = runner.run(ScenarioId::Conversion);

        assert!(!result.passed);
        assert!(result.report.is_none());
        assert!(result.failure_reason.unwrap().contains("configuration"));
    }

    #[test]
    fn test_runs_are_deterministic() {
        let runner1 = ScenarioRunner::new(7, 3);
        let runner2 = ScenarioRunner::new(7, 3);

        let result1 = runner1.run(ScenarioId::Conversion);
        let result2 = runner2.run(ScenarioId::Conversion);

        let outline = |r: &ScenarioResult| {
            r.exports
                .iter()
                .map(|t| (t.status.clone(), t.n_hits, t.stage_iterations.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(result1.fitted, result2.fitted);
        assert_eq!(result1.metrics.iterations, result2.metrics.iterations);
        assert_eq!(outline(&result1), outline(&result2));
    }

    #[test]
    fn test_export_carries_every_track() {
        let runner = ScenarioRunner::new(42, 3);
        let result = runner.run(ScenarioId::TooFewHits);
        let export = result.to_export();

        assert_eq!(export.scenario, "too_few_hits");
        assert_eq!(export.tracks.len(), 3);
        assert!(export.passed);
        assert_eq!(export.report.unwrap().global.tracks_attempted, 3);
    }
}
