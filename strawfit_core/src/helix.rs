//! Helical trajectory in a solenoidal field.
//!
//! Parameters follow the usual five-parameter convention:
//!
//! | index | name      | meaning                                           |
//! |-------|-----------|---------------------------------------------------|
//! | 0     | `d0`      | signed transverse distance of closest approach to the z axis (mm) |
//! | 1     | `phi0`    | azimuth of the direction at closest approach (rad) |
//! | 2     | `omega`   | signed curvature (1/mm), positive for counter-clockwise motion |
//! | 3     | `z0`      | z at closest approach (mm)                        |
//! | 4     | `tan_dip` | tangent of the dip angle                          |
//!
//! The trajectory is parameterised by the 3D flight length `s`, with `s = 0`
//! at the point of closest approach to the z axis.

use nalgebra::{Matrix3x5, Vector3, Vector5};
use serde::{Deserialize, Serialize};

/// Momentum-to-curvature conversion: pt (MeV/c) = `B_TO_PT` · |Bz| (T) · R (mm).
pub const B_TO_PT: f64 = 0.299792458;

/// Below this turning angle the trigonometric ratios use their series.
const SMALL_ANGLE: f64 = 1.0e-4;

/// Central-difference steps for the position derivatives.
const PARAM_STEPS: [f64; 5] = [1.0e-4, 1.0e-6, 1.0e-9, 1.0e-4, 1.0e-6];

/// A helix with parameters (d0, phi0, omega, z0, tan_dip).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Helix {
    pub d0: f64,
    pub phi0: f64,
    pub omega: f64,
    pub z0: f64,
    pub tan_dip: f64,
}

impl Helix {
    pub fn new(d0: f64, phi0: f64, omega: f64, z0: f64, tan_dip: f64) -> Self {
        Self {
            d0,
            phi0,
            omega,
            z0,
            tan_dip,
        }
    }

    /// Builds a helix from its parameter vector.
    pub fn from_params(p: &Vector5<f64>) -> Self {
        Self::new(p[0], p[1], p[2], p[3], p[4])
    }

    /// Parameter vector (d0, phi0, omega, z0, tan_dip).
    pub fn params(&self) -> Vector5<f64> {
        Vector5::new(self.d0, self.phi0, self.omega, self.z0, self.tan_dip)
    }

    /// Builds the helix passing through `point` with `momentum` there.
    ///
    /// `charge` is in units of e and `bz` in Tesla. A zero field or a
    /// vanishing transverse momentum gives a straight line.
    pub fn from_point_momentum(point: &Vector3<f64>, momentum: &Vector3<f64>, charge: f64, bz: f64) -> Self {
        let pt = momentum.xy().norm();
        let phi = momentum.y.atan2(momentum.x);
        let tan_dip = if pt > 0.0 { momentum.z / pt } else { 0.0 };
        let omega = if pt > 0.0 { -charge * B_TO_PT * bz / pt } else { 0.0 };

        if omega == 0.0 {
            let d0 = -point.x * phi.sin() + point.y * phi.cos();
            let l = point.x * phi.cos() + point.y * phi.sin();
            return Self::new(d0, phi, 0.0, point.z - l * tan_dip, tan_dip);
        }

        let xc = point.x - phi.sin() / omega;
        let yc = point.y + phi.cos() / omega;
        let rho = omega.signum() * (xc * xc + yc * yc).sqrt();
        let phi0 = (-xc / rho).atan2(yc / rho);
        let d0 = rho - 1.0 / omega;
        let turn = normalize_angle(phi - phi0);
        let l = turn / omega;

        Self::new(d0, phi0, omega, point.z - l * tan_dip, tan_dip)
    }

    pub fn cos_dip(&self) -> f64 {
        1.0 / (1.0 + self.tan_dip * self.tan_dip).sqrt()
    }

    pub fn sin_dip(&self) -> f64 {
        self.tan_dip * self.cos_dip()
    }

    /// Transverse radius of curvature (mm), infinite for a straight line.
    pub fn radius(&self) -> f64 {
        if self.omega == 0.0 {
            f64::INFINITY
        } else {
            1.0 / self.omega.abs()
        }
    }

    /// Point of closest approach to the z axis (`s = 0`).
    pub fn reference_point(&self) -> Vector3<f64> {
        Vector3::new(
            -self.d0 * self.phi0.sin(),
            self.d0 * self.phi0.cos(),
            self.z0,
        )
    }

    /// Position at flight length `s`.
    pub fn position(&self, s: f64) -> Vector3<f64> {
        let cos_dip = self.cos_dip();
        let l = s * cos_dip;
        let a = self.omega * l;
        let (sa, ca) = turning_ratios(a);
        let (sin0, cos0) = self.phi0.sin_cos();

        Vector3::new(
            l * (cos0 * sa - sin0 * ca) - self.d0 * sin0,
            l * (sin0 * sa + cos0 * ca) + self.d0 * cos0,
            self.z0 + s * self.sin_dip(),
        )
    }

    /// Azimuth of the direction at flight length `s`.
    pub fn phi(&self, s: f64) -> f64 {
        self.phi0 + self.omega * s * self.cos_dip()
    }

    /// Unit direction at flight length `s`.
    pub fn direction(&self, s: f64) -> Vector3<f64> {
        let cos_dip = self.cos_dip();
        let (sin_phi, cos_phi) = self.phi(s).sin_cos();
        Vector3::new(cos_phi * cos_dip, sin_phi * cos_dip, self.sin_dip())
    }

    /// Derivative of the unit direction with respect to `s`.
    pub fn direction_derivative(&self, s: f64) -> Vector3<f64> {
        let cos_dip = self.cos_dip();
        let k = self.omega * cos_dip * cos_dip;
        let (sin_phi, cos_phi) = self.phi(s).sin_cos();
        Vector3::new(-sin_phi * k, cos_phi * k, 0.0)
    }

    /// Flight length at which the helix reaches `z`; `None` for a transverse track.
    pub fn z_flight(&self, z: f64) -> Option<f64> {
        let sin_dip = self.sin_dip();
        if sin_dip.abs() < 1.0e-9 {
            None
        } else {
            Some((z - self.z0) / sin_dip)
        }
    }

    /// Transverse momentum (MeV/c) in field `bz`; infinite when not measurable.
    pub fn pt(&self, bz: f64) -> f64 {
        if self.omega == 0.0 || bz == 0.0 {
            f64::INFINITY
        } else {
            B_TO_PT * bz.abs() / self.omega.abs()
        }
    }

    /// Total momentum magnitude (MeV/c).
    pub fn momentum_mag(&self, bz: f64) -> f64 {
        self.pt(bz) / self.cos_dip()
    }

    /// Charge sign implied by the curvature in field `bz` (0 if undefined).
    pub fn charge_sign(&self, bz: f64) -> f64 {
        if self.omega == 0.0 || bz == 0.0 {
            0.0
        } else {
            -(self.omega * bz).signum()
        }
    }

    /// Derivatives of the position at fixed `s` with respect to the five parameters.
    pub fn position_derivatives(&self, s: f64) -> Matrix3x5<f64> {
        let p = self.params();
        let mut jac = Matrix3x5::zeros();
        for (i, step) in PARAM_STEPS.iter().enumerate() {
            let mut hi = p;
            let mut lo = p;
            hi[i] += step;
            lo[i] -= step;
            let d = (Self::from_params(&hi).position(s) - Self::from_params(&lo).position(s)) / (2.0 * step);
            jac.set_column(i, &d);
        }
        jac
    }
}

/// `(sin a / a, (1 - cos a) / a)`, with their limits for small `a`.
fn turning_ratios(a: f64) -> (f64, f64) {
    if a.abs() < SMALL_ANGLE {
        let a2 = a * a;
        (1.0 - a2 / 6.0, a * (0.5 - a2 / 24.0))
    } else {
        (a.sin() / a, (1.0 - a.cos()) / a)
    }
}

/// Wraps an angle into (-π, π].
pub fn normalize_angle(angle: f64) -> f64 {
    use std::f64::consts::PI;
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a <= -PI {
        a += 2.0 * PI;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_straight_line() {
        let h = Helix::new(3.0, 0.0, 0.0, 10.0, 1.0);
        let p = h.position(2.0_f64.sqrt());
        assert_relative_eq!(p, Vector3::new(1.0, 3.0, 11.0), epsilon = 1e-12);
        assert_eq!(h.pt(1.0), f64::INFINITY);
    }

    #[test]
    fn test_circle_closes() {
        let h = Helix::new(0.0, 0.3, 0.002, 0.0, 0.0);
        let circumference = 2.0 * std::f64::consts::PI / 0.002;
        let p = h.position(circumference);
        assert_abs_diff_eq!(p, h.reference_point(), epsilon = 1e-9);

        // Half a turn away the point is one diameter from the start
        let half = h.position(0.5 * circumference);
        assert_relative_eq!((half - h.reference_point()).norm(), 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_direction_is_tangent() {
        let h = Helix::new(5.0, 1.1, -0.0015, -200.0, 0.7);
        let s = 350.0;
        let eps = 1e-4;
        let numeric = (h.position(s + eps) - h.position(s - eps)) / (2.0 * eps);
        assert_relative_eq!(numeric, h.direction(s), epsilon = 1e-7);
        assert_relative_eq!(h.direction(s).norm(), 1.0, epsilon = 1e-12);

        let dnum = (h.direction(s + eps) - h.direction(s - eps)) / (2.0 * eps);
        assert_relative_eq!(dnum, h.direction_derivative(s), epsilon = 1e-9);
    }

    #[test]
    fn test_small_angle_continuity() {
        let h = Helix::new(1.0, 0.2, 1.0e-9, 0.0, 0.5);
        let line = Helix { omega: 0.0, ..h };
        assert_abs_diff_eq!(h.position(100.0), line.position(100.0), epsilon = 1e-5);
    }

    #[test]
    fn test_z_flight() {
        let h = Helix::new(0.0, 0.0, 0.001, -50.0, 0.75);
        let s = h.z_flight(100.0).unwrap();
        assert_relative_eq!(h.position(s).z, 100.0, epsilon = 1e-9);

        let flat = Helix::new(0.0, 0.0, 0.001, 0.0, 0.0);
        assert!(flat.z_flight(10.0).is_none());
    }

    #[test]
    fn test_from_point_momentum_round_trip() {
        let bz = 1.0;
        let point = Vector3::new(120.0, -40.0, -300.0);
        let momentum = Vector3::new(60.0, 70.0, 55.0);
        let h = Helix::from_point_momentum(&point, &momentum, -1.0, bz);

        let s = h.z_flight(point.z).unwrap();
        assert_relative_eq!(h.position(s), point, epsilon = 1e-6);
        assert_relative_eq!(h.direction(s), momentum.normalize(), epsilon = 1e-9);
        assert_relative_eq!(h.momentum_mag(bz), momentum.norm(), epsilon = 1e-9);
        assert_eq!(h.charge_sign(bz), -1.0);
    }

    #[test]
    fn test_from_point_momentum_straight() {
        let point = Vector3::new(10.0, 5.0, 0.0);
        let momentum = Vector3::new(0.0, 1.0, 1.0);
        let h = Helix::from_point_momentum(&point, &momentum, 1.0, 0.0);
        assert_eq!(h.omega, 0.0);
        let s = h.z_flight(0.0).unwrap();
        assert_relative_eq!(h.position(s), point, epsilon = 1e-9);
    }

    #[test]
    fn test_position_derivatives() {
        let h = Helix::new(2.0, 0.4, 0.001, 10.0, 0.6);
        let jac = h.position_derivatives(500.0);

        // d0 moves the point perpendicular to phi0 in the transverse plane
        assert_relative_eq!(jac[(0, 0)], -0.4_f64.sin(), epsilon = 1e-8);
        assert_relative_eq!(jac[(1, 0)], 0.4_f64.cos(), epsilon = 1e-8);
        // z0 shifts z only
        assert_relative_eq!(jac[(2, 3)], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(jac[(0, 3)], 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_normalize_angle() {
        use std::f64::consts::PI;
        assert_relative_eq!(normalize_angle(3.0 * PI), PI, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(-0.5), -0.5, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(2.0 * PI + 0.1), 0.1, epsilon = 1e-12);
    }
}
