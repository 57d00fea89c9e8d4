//! JSON exporter for offline analysis.
//!
//! Exports the truth and fit summary of every simulated track.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strawfit_core::metrics::hit_pulls;
use strawfit_core::{FitResult, FitSummary, PullStats, Usability, ValidationReport};

use crate::oracle::GeneratedTrack;

/// Truth and fit outcome of one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackExport {
    pub track_id: u32,

    /// True (d0, phi0, omega, z0, tan_dip)
    pub true_params: [f64; 5],

    /// True momentum (MeV/c), null in a zero field
    pub true_momentum: f64,

    /// True t0 (ns)
    pub true_t0: f64,

    /// Fit status as text
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<FitSummary>,

    /// Unbiased pull statistics of the active hits
    pub pulls: PullStats,

    pub n_hits: usize,
    pub n_outliers: usize,

    /// Hit indices weeded by the fit
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub weeded: Vec<usize>,

    /// Iterations per annealing stage
    pub stage_iterations: Vec<u32>,
}

impl TrackExport {
    pub fn new(track: &GeneratedTrack, result: &FitResult) -> Self {
        let p = track.helix.params();
        Self {
            track_id: track.id,
            true_params: [p[0], p[1], p[2], p[3], p[4]],
            true_momentum: track.momentum,
            true_t0: track.t0,
            status: result.status.to_string(),
            summary: result.summary(),
            pulls: hit_pulls(result),
            n_hits: result.hits.len(),
            n_outliers: track.outliers.len(),
            weeded: result
                .hits
                .iter()
                .filter(|h| !h.active && h.usability == Usability::Weeded)
                .map(|h| h.index)
                .collect(),
            stage_iterations: result.stage_iterations.clone(),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Per-track records
    pub tracks: Vec<TrackExport>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ValidationReport>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            tracks: Vec::new(),
            passed: false,
            report: None,
        }
    }

    /// Adds a track.
    pub fn add_track(&mut self, track: TrackExport) {
        self.tracks.push(track);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, report: ValidationReport) {
        self.passed = passed;
        self.report = Some(report);
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
