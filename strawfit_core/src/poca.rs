//! Point of closest approach between a helix and a straw wire.

use nalgebra::Vector3;
use strawfit_env::Straw;

use crate::error::FitError;
use crate::helix::Helix;

const MAX_NEWTON_STEPS: usize = 50;
const FLT_PRECISION: f64 = 1.0e-6;
const PARALLEL_EPSILON: f64 = 1.0e-9;
/// Largest flight length change per iteration (mm)
const MAX_FLT_STEP: f64 = 100.0;

/// Closest approach of a trajectory to a wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Poca {
    /// Flight length along the trajectory
    pub flt: f64,

    /// Signed coordinate along the wire, measured from the straw mid point
    pub hit_len: f64,

    /// Signed distance of closest approach (mm)
    pub doca: f64,

    /// Trajectory point at closest approach
    pub point: Vector3<f64>,

    /// Unit vector defining the sign of `doca`: wire direction × track direction
    pub normal: Vector3<f64>,
}

/// Finds the closest approach of `helix` to the wire of `straw`, starting
/// from the flight length `flt_guess`.
///
/// Newton steps on the squared distance are bounded by `MAX_FLT_STEP`.
/// Where the distance is not convex (near a maximum) the curvature term is
/// dropped, so every step still heads downhill.
///
/// Fails when the trajectory runs parallel to the wire, when the search
/// leaves the window `flt_guess ± max_flt_move`, or when it does not settle.
pub fn helix_wire_poca(helix: &Helix, straw: &Straw, flt_guess: f64, max_flt_move: f64) -> Result<Poca, FitError> {
    let w = straw.direction;
    let perp = |v: Vector3<f64>| v - w * v.dot(&w);

    let mut flt = flt_guess;
    let mut converged = false;
    for _ in 0..MAX_NEWTON_STEPS {
        let sep = perp(helix.position(flt) - straw.mid_point);
        let t = perp(helix.direction(flt));
        let dt = perp(helix.direction_derivative(flt));

        let f = sep.dot(&t);
        let tt = t.dot(&t);
        if tt < PARALLEL_EPSILON {
            return Err(FitError::poca(straw.id, "trajectory parallel to wire"));
        }
        let fp = tt + sep.dot(&dt);
        let curvature = if fp > PARALLEL_EPSILON { fp } else { tt };

        let step = (f / curvature).clamp(-MAX_FLT_STEP, MAX_FLT_STEP);
        flt -= step;
        if !flt.is_finite() || (flt - flt_guess).abs() > max_flt_move {
            return Err(FitError::poca(straw.id, format!("flight length diverged from {:.1}", flt_guess)));
        }
        if step.abs() < FLT_PRECISION {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(FitError::poca(straw.id, "no convergence"));
    }

    let point = helix.position(flt);
    let dir = helix.direction(flt);
    let hit_len = (point - straw.mid_point).dot(&w);
    let cross = w.cross(&dir);
    let norm = cross.norm();
    if norm < PARALLEL_EPSILON {
        return Err(FitError::poca(straw.id, "trajectory parallel to wire"));
    }
    let normal = cross / norm;
    let doca = (point - straw.wire_point(hit_len)).dot(&normal);

    Ok(Poca {
        flt,
        hit_len,
        doca,
        point,
        normal,
    })
}
