//! The mutable aggregate of one fit attempt.

use std::fmt::Write as _;

use strawfit_env::TrackerConditions;

use crate::error::FitError;
use crate::hit::TrackHit;
use crate::kalrep::{HistoryEntry, KalRep};
use crate::material::MaterialIntersection;
use crate::metrics::FitSummary;
use crate::track_def::TrackDefinition;

/// Outcome of the most recent fit operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FitStatus {
    /// No fit has run yet
    #[default]
    Unfitted,
    Success,
    Failed(FitError),
}

impl FitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn error(&self) -> Option<&FitError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for FitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unfitted => write!(f, "unfitted"),
            Self::Success => write!(f, "success"),
            Self::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Everything a fit attempt produces and mutates.
///
/// Hits live in an arena: their positions never change once inserted, and
/// removal from the fit is done by deactivation. Material intersections are
/// only ever appended.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// The definition this result was built from
    pub definition: TrackDefinition,

    /// Hit arena
    pub hits: Vec<TrackHit>,

    /// Material crossings found so far
    pub intersections: Vec<MaterialIntersection>,

    /// Numerical trajectory, absent before the fit or after `remove_failed`
    pub krep: Option<KalRep>,

    pub status: FitStatus,

    /// Rounds of the last t0 update
    pub nt0iter: u32,

    /// Hits weeded by the last weeding pass
    pub nweediter: u32,

    /// Hits restored by the last unweeding pass
    pub nunweediter: u32,

    /// Intersections known to the trajectory after the last stage
    pub ninter: usize,

    /// Inner iterations run by each stage reached, including a final stage
    /// cut short by a failed fit
    pub stage_iterations: Vec<u32>,
}

impl FitResult {
    pub fn new(definition: TrackDefinition) -> Self {
        Self {
            definition,
            hits: Vec::new(),
            intersections: Vec::new(),
            krep: None,
            status: FitStatus::Unfitted,
            nt0iter: 0,
            nweediter: 0,
            nunweediter: 0,
            ninter: 0,
            stage_iterations: Vec::new(),
        }
    }

    /// Runs the numerical fit on the current hit set and records its status.
    ///
    /// Returns `true` on success.
    pub fn fit<C: TrackerConditions + ?Sized>(&mut self, conditions: &C) -> bool {
        let Some(krep) = self.krep.as_mut() else {
            self.status = FitStatus::Failed(FitError::NoValidFit);
            return false;
        };
        self.status = match krep.fit(&mut self.hits, conditions) {
            Ok(()) => FitStatus::Success,
            Err(e) => FitStatus::Failed(e),
        };
        self.status.is_success()
    }

    /// Records a history entry carrying the current status.
    pub fn add_history(&mut self, label: &str) {
        if let Some(krep) = self.krep.as_mut() {
            krep.add_history(label, &self.status);
        }
    }

    /// Whether the result holds a valid, successful fit.
    pub fn is_success(&self) -> bool {
        self.status.is_success() && self.krep.as_ref().is_some_and(|k| k.fit_valid())
    }

    pub fn history(&self) -> &[HistoryEntry] {
        self.krep.as_ref().map(|k| k.history()).unwrap_or(&[])
    }

    pub fn active_hits(&self) -> impl Iterator<Item = &TrackHit> {
        self.hits.iter().filter(|h| h.active)
    }

    pub fn n_active(&self) -> usize {
        self.active_hits().count()
    }

    /// External indices of the active hits, sorted.
    pub fn active_indices(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self.active_hits().map(|h| h.index).collect();
        out.sort_unstable();
        out
    }

    /// Arena positions ordered by flight length along the fit direction;
    /// ties are broken by the external hit index.
    pub fn hits_by_flight(&self) -> Vec<usize> {
        let direction = self.definition.direction;
        let mut order: Vec<usize> = (0..self.hits.len()).collect();
        order.sort_by(|&a, &b| {
            let (ha, hb) = (&self.hits[a], &self.hits[b]);
            direction
                .compare(ha.flt, hb.flt)
                .then(ha.index.cmp(&hb.index))
        });
        order
    }

    /// Drops the trajectory and hits of a failed fit. The status is kept.
    pub fn remove_failed(&mut self) {
        if !self.status.is_success() {
            self.krep = None;
            self.hits.clear();
        }
    }

    /// Fit quality summary, if a trajectory exists.
    pub fn summary(&self) -> Option<FitSummary> {
        self.krep.as_ref().map(FitSummary::from_krep)
    }

    /// Per-hit table of the current state, for debug output.
    pub fn hit_table(&self) -> String {
        let mut out = String::new();
        if let Some(s) = self.summary() {
            let _ = writeln!(
                out,
                "  Q   momentum        pt      costh        T0  Nact       chi2 Ndof    FitCons"
            );
            let _ = writeln!(
                out,
                "{:3} {:10.3} {:9.3} {:10.3} {:9.3} {:5} {:10.3} {:4} {:10.3e}",
                s.charge, s.momentum, s.pt, s.cos_theta, s.t0, s.n_active, s.chisq, s.ndof, s.consistency
            );
        }
        let _ = writeln!(
            out,
            " ih U A        len     rms          x          y          z     HitT  Straw Panel Iamb       T0   Rdrift      resid"
        );
        for (i, hit) in self.hits.iter().enumerate() {
            let pos = self.krep.as_ref().map(|k| k.position(hit.flt));
            let (x, y, z) = pos.map(|p| (p.x, p.y, p.z)).unwrap_or((-9999.0, -9999.0, -9999.0));
            let resid = hit.residual().unwrap_or(f64::NAN);
            let _ = writeln!(
                out,
                "{:3} {:1} {:1} {:10.3} {:7.3} {:10.3} {:10.3} {:10.3} {:8.3} {:>6} {:>5} {:4} {:8.3} {:8.3} {:10.4}",
                i,
                hit.usability.code(),
                hit.active as u8,
                hit.flt,
                hit.hit_rms(),
                x,
                y,
                z,
                hit.time,
                hit.straw.id.to_string(),
                hit.straw.panel.to_string(),
                hit.ambig,
                hit.hit_t0.t0,
                hit.drift().radius,
                resid
            );
        }
        out
    }
}
