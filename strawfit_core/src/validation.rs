//! Validation Module - Ground Truth Comparison
//! ===========================================
//!
//! Compares fitted tracks against the generated truth:
//! - Fit efficiency (successful fits over attempted tracks)
//! - Momentum resolution (RMS of fitted minus true momentum)
//! - Mean χ²/ndof of successful fits
//! - Weeding purity (fraction of weeded hits that were true outliers)
//!
//! Usage:
//! ```ignore
//! use strawfit_core::validation::ValidationSession;
//!
//! let mut session = ValidationSession::new();
//! session.record_truth(track_id, true_momentum, t0, outlier_indices);
//! session.record_fit(track_id, &result);
//! let report = session.generate_report();
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::fit_result::FitResult;
use crate::hit::Usability;

// =============================================================================
// ENTRIES
// =============================================================================

/// Generated truth of one track.
#[derive(Debug, Clone, PartialEq)]
pub struct TruthEntry {
    pub track_id: u32,
    /// True momentum at z = 0 (MeV/c)
    pub momentum: f64,
    /// True t0 (ns)
    pub t0: f64,
    /// External indices of hits generated as outliers
    pub outliers: BTreeSet<usize>,
}

/// Per-track comparison of fit and truth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetrics {
    pub success: bool,
    /// Fitted minus true momentum (MeV/c)
    pub momentum_residual: f64,
    /// Fitted minus true t0 (ns)
    pub t0_residual: f64,
    pub chisq_per_ndof: f64,
    /// Hits weeded by the fit
    pub weeded: usize,
    /// Weeded hits that were true outliers
    pub weeded_outliers: usize,
    /// True outliers still active after the fit
    pub missed_outliers: usize,
}

// =============================================================================
// GLOBAL METRICS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub tracks_attempted: usize,
    pub tracks_fitted: usize,
    /// Fits recorded for tracks without truth
    pub unmatched_fits: usize,
    pub momentum_residual_sum: f64,
    pub momentum_residual_sq_sum: f64,
    pub t0_residual_sq_sum: f64,
    pub chisq_per_ndof_sum: f64,
    pub weeded: usize,
    pub weeded_outliers: usize,
    pub missed_outliers: usize,
}

impl GlobalMetrics {
    /// Successful fits over attempted tracks.
    pub fn efficiency(&self) -> f64 {
        if self.tracks_attempted > 0 {
            self.tracks_fitted as f64 / self.tracks_attempted as f64
        } else {
            0.0
        }
    }

    /// Mean momentum residual (MeV/c).
    pub fn momentum_bias(&self) -> f64 {
        if self.tracks_fitted > 0 {
            self.momentum_residual_sum / self.tracks_fitted as f64
        } else {
            0.0
        }
    }

    /// RMS momentum residual (MeV/c).
    pub fn momentum_rms(&self) -> f64 {
        if self.tracks_fitted > 0 {
            (self.momentum_residual_sq_sum / self.tracks_fitted as f64).sqrt()
        } else {
            0.0
        }
    }

    /// RMS t0 residual (ns).
    pub fn t0_rms(&self) -> f64 {
        if self.tracks_fitted > 0 {
            (self.t0_residual_sq_sum / self.tracks_fitted as f64).sqrt()
        } else {
            0.0
        }
    }

    pub fn mean_chisq_per_ndof(&self) -> f64 {
        if self.tracks_fitted > 0 {
            self.chisq_per_ndof_sum / self.tracks_fitted as f64
        } else {
            0.0
        }
    }

    /// Fraction of weeded hits that were true outliers (1 if none were weeded).
    pub fn weed_purity(&self) -> f64 {
        if self.weeded > 0 {
            self.weeded_outliers as f64 / self.weeded as f64
        } else {
            1.0
        }
    }
}

// =============================================================================
// VALIDATION SESSION
// =============================================================================

/// Collects truth and fit results and accumulates the comparison.
#[derive(Debug, Default)]
pub struct ValidationSession {
    truth: BTreeMap<u32, TruthEntry>,
    per_track: BTreeMap<u32, TrackMetrics>,
    global: GlobalMetrics,
}

impl ValidationSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the truth of a generated track.
    pub fn record_truth(&mut self, track_id: u32, momentum: f64, t0: f64, outliers: impl IntoIterator<Item = usize>) {
        self.truth.insert(
            track_id,
            TruthEntry {
                track_id,
                momentum,
                t0,
                outliers: outliers.into_iter().collect(),
            },
        );
        self.global.tracks_attempted += 1;
    }

    /// Compares a fit result with the recorded truth of its track.
    pub fn record_fit(&mut self, track_id: u32, result: &FitResult) {
        let Some(truth) = self.truth.get(&track_id) else {
            self.global.unmatched_fits += 1;
            return;
        };

        let mut metrics = TrackMetrics::default();
        for hit in &result.hits {
            let outlier = truth.outliers.contains(&hit.index);
            if hit.usability == Usability::Weeded && !hit.active {
                metrics.weeded += 1;
                if outlier {
                    metrics.weeded_outliers += 1;
                }
            } else if hit.active && outlier {
                metrics.missed_outliers += 1;
            }
        }

        if let (true, Some(summary)) = (result.is_success(), result.summary()) {
            metrics.success = true;
            // Unmeasurable momenta (zero field) do not contribute
            if summary.momentum.is_finite() && truth.momentum.is_finite() {
                metrics.momentum_residual = summary.momentum - truth.momentum;
            }
            metrics.t0_residual = summary.t0 - truth.t0;
            metrics.chisq_per_ndof = summary.chisq_per_ndof();

            self.global.tracks_fitted += 1;
            self.global.momentum_residual_sum += metrics.momentum_residual;
            self.global.momentum_residual_sq_sum += metrics.momentum_residual.powi(2);
            self.global.t0_residual_sq_sum += metrics.t0_residual.powi(2);
            self.global.chisq_per_ndof_sum += metrics.chisq_per_ndof;
        }
        self.global.weeded += metrics.weeded;
        self.global.weeded_outliers += metrics.weeded_outliers;
        self.global.missed_outliers += metrics.missed_outliers;

        self.per_track.insert(track_id, metrics);
    }

    pub fn generate_report(&self) -> ValidationReport {
        ValidationReport {
            global: self.global.clone(),
            per_track: self.per_track.clone(),
        }
    }
}

// =============================================================================
// VALIDATION REPORT
// =============================================================================

/// Final report of a validation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub global: GlobalMetrics,
    pub per_track: BTreeMap<u32, TrackMetrics>,
}

impl ValidationReport {
    /// Prints the report to the console.
    pub fn print(&self) {
        let g = &self.global;
        println!();
        println!("╔══════════════════════════════════════════════════════════════╗");
        println!("║               STRAWFIT VALIDATION REPORT                     ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Tracks attempted:      {:>10}                            ║", g.tracks_attempted);
        println!("║ Tracks fitted:         {:>10}                            ║", g.tracks_fitted);
        println!("║ Efficiency:            {:>10.1}%                           ║", 100.0 * g.efficiency());
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Momentum bias:         {:>10.3} MeV/c                      ║", g.momentum_bias());
        println!("║ Momentum RMS:          {:>10.3} MeV/c                      ║", g.momentum_rms());
        println!("║ t0 RMS:                {:>10.3} ns                         ║", g.t0_rms());
        println!("║ Mean chi2/ndof:        {:>10.3}                            ║", g.mean_chisq_per_ndof());
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Weeded hits:           {:>10}                            ║", g.weeded);
        println!("║ Weed purity:           {:>10.1}%                           ║", 100.0 * g.weed_purity());
        println!("║ Missed outliers:       {:>10}                            ║", g.missed_outliers);
        println!("╚══════════════════════════════════════════════════════════════╝");
    }

    /// Whether the report meets minimum efficiency and maximum momentum RMS.
    pub fn passes_criteria(&self, min_efficiency: f64, max_momentum_rms: f64) -> bool {
        self.global.efficiency() >= min_efficiency && self.global.momentum_rms() <= max_momentum_rms
    }
}

// =============================================================================
// TESTS
// =============================================================================
