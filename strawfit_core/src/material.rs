//! Material crossings of a trajectory through straw walls and gas.

use serde::{Deserialize, Serialize};
use strawfit_env::{Straw, StrawId, StrawMaterial};

use crate::poca::Poca;

/// Part of a straw the trajectory crosses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialElement {
    Wall,
    Gas,
}

/// One recorded crossing of detector material.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialIntersection {
    pub straw: StrawId,

    pub element: MaterialElement,

    /// Flight length of the crossing (mm)
    pub flt: f64,

    /// Path length inside the material (mm)
    pub path_len: f64,

    /// Mean energy lost in the crossing (MeV)
    pub energy_loss: f64,
}

/// Computes the wall and gas crossings of a trajectory passing a straw at
/// closest approach `poca` with local direction `dir`.
///
/// Returns up to two intersections (wall, then gas); a trajectory missing the
/// straw entirely yields none.
pub fn straw_intersections(
    straw: &Straw,
    material: &StrawMaterial,
    poca: &Poca,
    dir: &nalgebra::Vector3<f64>,
) -> Vec<MaterialIntersection> {
    let sin_angle = straw.direction.cross(dir).norm();
    if sin_angle < 1.0e-6 {
        return Vec::new();
    }

    let d = poca.doca.abs();
    let inner = straw.radius;
    let outer = straw.radius + material.wall_thickness;
    let chord = |r: f64| if d < r { 2.0 * (r * r - d * d).sqrt() / sin_angle } else { 0.0 };

    let gas_path = chord(inner);
    let wall_path = chord(outer) - gas_path;

    let mut out = Vec::with_capacity(2);
    if wall_path > 0.0 {
        out.push(MaterialIntersection {
            straw: straw.id,
            element: MaterialElement::Wall,
            flt: poca.flt,
            path_len: wall_path,
            energy_loss: wall_path * material.wall_dedx,
        });
    }
    if gas_path > 0.0 {
        out.push(MaterialIntersection {
            straw: straw.id,
            element: MaterialElement::Gas,
            flt: poca.flt,
            path_len: gas_path,
            energy_loss: gas_path * material.gas_dedx,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use strawfit_env::PanelId;

    fn straw() -> Straw {
        Straw {
            id: StrawId(4),
            panel: PanelId(0),
            layer: 0,
            mid_point: Vector3::zeros(),
            direction: Vector3::x(),
            half_length: 500.0,
            radius: 2.5,
        }
    }

    fn poca(doca: f64) -> Poca {
        Poca {
            flt: 12.0,
            hit_len: 0.0,
            doca,
            point: Vector3::new(0.0, doca, 0.0),
            normal: Vector3::y(),
        }
    }

    #[test]
    fn test_central_crossing() {
        let material = StrawMaterial::default();
        let inter = straw_intersections(&straw(), &material, &poca(0.0), &Vector3::z());

        assert_eq!(inter.len(), 2);
        assert_eq!(inter[0].element, MaterialElement::Wall);
        assert_relative_eq!(inter[0].path_len, 2.0 * material.wall_thickness, epsilon = 1e-9);
        assert_relative_eq!(inter[1].path_len, 5.0, epsilon = 1e-9);
        assert_relative_eq!(inter[1].energy_loss, 5.0 * material.gas_dedx, epsilon = 1e-12);
    }

    #[test]
    fn test_wall_only_and_miss() {
        let material = StrawMaterial::default();
        let grazing = straw_intersections(&straw(), &material, &poca(2.51), &Vector3::z());
        assert_eq!(grazing.len(), 1);
        assert_eq!(grazing[0].element, MaterialElement::Wall);

        let miss = straw_intersections(&straw(), &material, &poca(3.0), &Vector3::z());
        assert!(miss.is_empty());
    }
}
