//! strawfit Metrics Module
//! =======================
//!
//! Fit quality figures reported for each track:
//! - **Consistency**: χ² probability of the fit
//! - **Pulls**: distribution of normalized residuals over active hits
//!
//! These drive the debug tables and the validation summaries.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::fit_result::FitResult;
use crate::kalrep::KalRep;

// =============================================================================
// CHI-SQUARED CONSISTENCY
// =============================================================================

const GAMMA_EPS: f64 = 1.0e-14;
const GAMMA_MAX_TERMS: usize = 500;

/// Probability of a χ² at least as large as `chisq` for `ndof` degrees of freedom.
///
/// # Formula
/// ```text
/// P(χ² ≥ chisq) = Q(ndof / 2, chisq / 2)
/// ```
///
/// where `Q` is the regularized upper incomplete gamma function. Returns 0
/// for a fit without degrees of freedom.
pub fn chisq_consistency(chisq: f64, ndof: i64) -> f64 {
    if ndof <= 0 || !chisq.is_finite() {
        return 0.0;
    }
    if chisq <= 0.0 {
        return 1.0;
    }
    gamma_q(ndof as f64 / 2.0, chisq / 2.0)
}

/// Regularized upper incomplete gamma function Q(a, x).
fn gamma_q(a: f64, x: f64) -> f64 {
    if x < a + 1.0 {
        1.0 - gamma_p_series(a, x)
    } else {
        gamma_q_fraction(a, x)
    }
}

/// Series representation of P(a, x), valid for x < a + 1.
fn gamma_p_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut term = 1.0 / a;
    let mut sum = term;
    for _ in 0..GAMMA_MAX_TERMS {
        ap += 1.0;
        term *= x / ap;
        sum += term;
        if term.abs() < sum.abs() * GAMMA_EPS {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

/// Continued fraction for Q(a, x) (modified Lentz), valid for x ≥ a + 1.
fn gamma_q_fraction(a: f64, x: f64) -> f64 {
    let tiny = f64::MIN_POSITIVE / GAMMA_EPS;
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / tiny;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..GAMMA_MAX_TERMS {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < tiny {
            d = tiny;
        }
        c = b + an / c;
        if c.abs() < tiny {
            c = tiny;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < GAMMA_EPS {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

/// ln Γ(x) for x > 0 (Lanczos approximation, g = 7).
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection formula
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut sum = COEFFS[0];
    for (i, c) in COEFFS.iter().enumerate().skip(1) {
        sum += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

// =============================================================================
// PULLS
// =============================================================================

/// Mean and spread of the unbiased residual pulls of the active hits.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PullStats {
    pub count: usize,
    pub mean: f64,
    pub rms: f64,
    pub max_abs: f64,
}

/// Computes pull statistics of a fitted result.
pub fn hit_pulls(result: &FitResult) -> PullStats {
    let Some(krep) = result.krep.as_ref() else {
        return PullStats::default();
    };
    let pulls: Vec<f64> = result
        .active_hits()
        .filter_map(|h| krep.resid(h, true))
        .map(|r| r.pull())
        .collect();
    if pulls.is_empty() {
        return PullStats::default();
    }

    let n = pulls.len() as f64;
    let mean = pulls.iter().sum::<f64>() / n;
    let rms = (pulls.iter().map(|p| p * p).sum::<f64>() / n).sqrt();
    let max_abs = pulls.iter().fold(0.0_f64, |m, p| m.max(p.abs()));
    PullStats {
        count: pulls.len(),
        mean,
        rms,
        max_abs,
    }
}

// =============================================================================
// FIT SUMMARY
// =============================================================================

/// Per-track summary of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    /// Charge sign from the curvature (0 if not measurable)
    pub charge: i32,
    /// Momentum at the t0 reference (MeV/c)
    pub momentum: f64,
    /// Transverse momentum (MeV/c)
    pub pt: f64,
    pub cos_theta: f64,
    /// Track t0 (ns)
    pub t0: f64,
    pub t0_err: f64,
    pub n_active: usize,
    pub chisq: f64,
    pub ndof: i64,
    /// χ² probability
    pub consistency: f64,
    /// Fitted (d0, phi0, omega, z0, tan_dip)
    pub params: [f64; 5],
}

impl FitSummary {
    pub fn from_krep(krep: &KalRep) -> Self {
        let flt0 = krep.flt0();
        let momentum = krep.momentum_mag(flt0);
        let dir = krep.direction(flt0);
        let helix = krep.helix();
        let p = helix.params();

        Self {
            charge: helix.charge_sign(krep.bz()) as i32,
            momentum,
            pt: momentum * dir.xy().norm(),
            cos_theta: dir.z,
            t0: krep.t0().t0,
            t0_err: krep.t0().err,
            n_active: krep.n_active(),
            chisq: krep.chisq(),
            ndof: krep.ndof(),
            consistency: krep.consistency(),
            params: [p[0], p[1], p[2], p[3], p[4]],
        }
    }

    /// χ² per degree of freedom.
    pub fn chisq_per_ndof(&self) -> f64 {
        if self.ndof > 0 {
            self.chisq / self.ndof as f64
        } else {
            f64::INFINITY
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
