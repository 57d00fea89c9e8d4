//! Particle hypotheses and fit direction.

use serde::{Deserialize, Serialize};

/// Speed of light (mm/ns).
pub const C_LIGHT: f64 = 299.792458;

/// Particle hypothesis used for propagation velocity and energy loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Particle {
    Electron,
    Positron,
    MuonMinus,
    MuonPlus,
    PionMinus,
    PionPlus,
    Proton,
}

impl Particle {
    /// Rest mass (MeV/c²).
    pub fn mass(&self) -> f64 {
        match self {
            Self::Electron | Self::Positron => 0.510_998_95,
            Self::MuonMinus | Self::MuonPlus => 105.658_375_5,
            Self::PionMinus | Self::PionPlus => 139.570_39,
            Self::Proton => 938.272_088_16,
        }
    }

    /// Charge in units of e.
    pub fn charge(&self) -> f64 {
        match self {
            Self::Electron | Self::MuonMinus | Self::PionMinus => -1.0,
            Self::Positron | Self::MuonPlus | Self::PionPlus | Self::Proton => 1.0,
        }
    }

    /// Total energy for momentum `p` (MeV).
    pub fn energy(&self, p: f64) -> f64 {
        (p * p + self.mass() * self.mass()).sqrt()
    }

    /// Velocity in units of c. An unmeasurable (infinite) momentum gives 1.
    pub fn beta(&self, p: f64) -> f64 {
        if !p.is_finite() {
            return 1.0;
        }
        let e = self.energy(p);
        if e > 0.0 {
            p.abs() / e
        } else {
            1.0
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Electron => "e-",
            Self::Positron => "e+",
            Self::MuonMinus => "mu-",
            Self::MuonPlus => "mu+",
            Self::PionMinus => "pi-",
            Self::PionPlus => "pi+",
            Self::Proton => "p",
        }
    }
}

impl std::fmt::Display for Particle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Direction along which hits are ordered by flight length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FitDirection {
    /// Increasing flight length
    #[default]
    Downstream,
    /// Decreasing flight length
    Upstream,
}

impl FitDirection {
    /// Orders two flight lengths according to the direction.
    pub fn compare(&self, a: f64, b: f64) -> std::cmp::Ordering {
        match self {
            Self::Downstream => a.total_cmp(&b),
            Self::Upstream => b.total_cmp(&a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_beta() {
        let e = Particle::Electron;
        assert_relative_eq!(e.beta(105.0), 1.0, epsilon = 1e-4);
        assert_eq!(e.beta(f64::INFINITY), 1.0);

        let mu = Particle::MuonMinus;
        // p = m gives beta = 1/sqrt(2)
        assert_relative_eq!(mu.beta(mu.mass()), 1.0 / 2.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_charge() {
        assert_eq!(Particle::Electron.charge(), -1.0);
        assert_eq!(Particle::Positron.charge(), 1.0);
    }

    #[test]
    fn test_fit_direction_ordering() {
        use std::cmp::Ordering;
        assert_eq!(FitDirection::Downstream.compare(1.0, 2.0), Ordering::Less);
        assert_eq!(FitDirection::Upstream.compare(1.0, 2.0), Ordering::Greater);
    }
}
