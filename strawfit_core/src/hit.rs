//! A straw measurement associated to a trajectory.
//!
//! The hit keeps its measured time, the per-hit time reference propagated
//! from the track t0, and a cached closest approach to the current
//! trajectory. Drift radius and residual are derived from those on demand.

use serde::{Deserialize, Serialize};
use strawfit_env::{Straw, StrawHit, TrackerConditions};

use crate::error::FitError;
use crate::helix::Helix;
use crate::poca::{helix_wire_poca, Poca};
use crate::track_def::T0Estimate;

/// Provenance of a hit's activity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Usability {
    /// Built from the track definition
    Initial = 1,
    /// Added to an existing fit
    Added = 3,
    /// Restored by unweeding
    Reactivated = 4,
    /// Removed by weeding, may be restored later
    Weeded = 5,
}

impl Usability {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Drift state derived from the hit time and its time reference.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Drift {
    /// Drift radius before clamping to the straw (mm)
    pub raw_radius: f64,

    /// Drift radius clamped to [0, straw radius] (mm)
    pub radius: f64,

    /// Drift radius error, including the out-of-range penalty (mm)
    pub radius_err: f64,

    /// Local drift velocity (mm/ns)
    pub vdrift: f64,
}

/// Residual of a hit and its error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Residual {
    pub value: f64,
    pub error: f64,
}

impl Residual {
    /// Residual in units of its error.
    pub fn pull(&self) -> f64 {
        self.value / self.error
    }
}

#[derive(Debug, Clone)]
pub struct TrackHit {
    /// Index in the external hit collection
    pub index: usize,

    pub straw: Straw,

    /// Measured time at the readout end (ns)
    pub time: f64,

    /// End-to-end time difference (ns)
    pub dt: f64,

    /// Time the particle passed the wire
    pub hit_t0: T0Estimate,

    /// Flight length along the trajectory
    pub flt: f64,

    /// Left/right ambiguity: -1, 0 (undetermined) or +1
    pub ambig: i32,

    pub active: bool,

    pub usability: Usability,

    /// Annealing error added in quadrature (mm)
    pub ext_err: f64,

    /// Signal propagation velocity along the wire (mm/ns)
    pub signal_velocity: f64,

    /// Inflates the drift error of out-of-range radii
    pub max_drift_pull: f64,

    poca: Option<Poca>,
    drift: Drift,
}

impl TrackHit {
    /// Creates a hit at flight length `flt` with time reference `hit_t0`.
    ///
    /// The hit starts active with ambiguity 0 and no closest approach; call
    /// [`update_poca`](Self::update_poca) and [`update_drift`](Self::update_drift)
    /// before using its residual.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        strawhit: &StrawHit,
        straw: &Straw,
        hit_t0: T0Estimate,
        flt: f64,
        ext_err: f64,
        max_drift_pull: f64,
        signal_velocity: f64,
    ) -> Self {
        Self {
            index,
            straw: straw.clone(),
            time: strawhit.time,
            dt: strawhit.dt,
            hit_t0,
            flt,
            ambig: 0,
            active: true,
            usability: Usability::Initial,
            ext_err,
            signal_velocity,
            max_drift_pull,
            poca: None,
            drift: Drift::default(),
        }
    }

    pub fn poca(&self) -> Option<&Poca> {
        self.poca.as_ref()
    }

    pub fn drift(&self) -> &Drift {
        &self.drift
    }

    pub fn set_ambig(&mut self, ambig: i32) {
        self.ambig = ambig.signum();
    }

    /// Recomputes the closest approach to `helix`, starting from the current
    /// flight length. On failure the cached approach is cleared.
    pub fn update_poca(&mut self, helix: &Helix, max_flt_move: f64) -> Result<(), FitError> {
        match helix_wire_poca(helix, &self.straw, self.flt, max_flt_move) {
            Ok(poca) => {
                self.flt = poca.flt;
                self.poca = Some(poca);
                Ok(())
            }
            Err(e) => {
                self.poca = None;
                Err(e)
            }
        }
    }

    /// Wire position used for the signal propagation delay.
    pub fn hit_len(&self) -> f64 {
        self.poca.map(|p| p.hit_len).unwrap_or(0.0)
    }

    /// Signal propagation time from the crossing point to the readout end (ns).
    pub fn signal_time(&self) -> f64 {
        self.straw.signal_path(self.hit_len()) / self.signal_velocity
    }

    /// Drift time implied by the measured time and the hit time reference (ns).
    pub fn drift_time(&self) -> f64 {
        self.time - self.hit_t0.t0 - self.signal_time()
    }

    /// Converts the drift time into a radius using the calibration.
    pub fn update_drift<C: TrackerConditions + ?Sized>(&mut self, conditions: &C) {
        let t2d = conditions.time_to_distance(self.straw.id, self.drift_time());
        let raw = t2d.rdrift;
        let radius = raw.clamp(0.0, self.straw.radius);
        let mut radius_err = conditions.drift_radius_error(self.straw.id, radius);

        let excess = (raw - radius).abs();
        if excess > 0.0 {
            radius_err += excess / self.max_drift_pull;
        }

        self.drift = Drift {
            raw_radius: raw,
            radius,
            radius_err,
            vdrift: t2d.vdrift,
        };
    }

    /// Sets a new time reference and refreshes the drift.
    pub fn update_hit_t0<C: TrackerConditions + ?Sized>(&mut self, hit_t0: T0Estimate, conditions: &C) {
        self.hit_t0 = hit_t0;
        self.update_drift(conditions);
    }

    /// Total measurement error (mm).
    pub fn hit_rms(&self) -> f64 {
        let mut var = self.drift.radius_err.powi(2) + self.ext_err.powi(2);
        if self.ambig == 0 {
            var += self.drift.radius.powi(2);
        }
        var.sqrt()
    }

    /// Residual against the cached closest approach: DOCA minus the signed
    /// drift radius. With ambiguity 0 the drift radius is folded into the error.
    pub fn residual(&self) -> Option<f64> {
        let poca = self.poca.as_ref()?;
        if self.ambig == 0 {
            Some(poca.doca)
        } else {
            Some(poca.doca - self.ambig as f64 * self.drift.radius)
        }
    }

    /// Residual and error against the cached closest approach.
    pub fn raw_residual(&self) -> Option<Residual> {
        Some(Residual {
            value: self.residual()?,
            error: self.hit_rms(),
        })
    }

    /// Whether the unclamped drift radius is compatible with the straw,
    /// allowing `max_chi` drift errors on either side.
    pub fn physical_drift(&self, max_chi: f64) -> bool {
        let margin = max_chi * self.drift.radius_err;
        self.drift.raw_radius > -margin && self.drift.raw_radius < self.straw.radius + margin
    }
}
