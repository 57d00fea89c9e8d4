//! Magnetic field maps.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::context::FieldProvider;

/// A field with the same value everywhere.
///
/// The nominal detector-solenoid value is 1 T along +z; a zero field makes
/// every trajectory a straight line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UniformField {
    /// Field vector (Tesla)
    pub field: Vector3<f64>,
}

impl UniformField {
    /// Solenoidal field of strength `bz` along z.
    pub fn along_z(bz: f64) -> Self {
        Self {
            field: Vector3::new(0.0, 0.0, bz),
        }
    }

    /// No field at all.
    pub fn zero() -> Self {
        Self {
            field: Vector3::zeros(),
        }
    }
}

impl Default for UniformField {
    fn default() -> Self {
        Self::along_z(1.0)
    }
}

impl FieldProvider for UniformField {
    fn field_at(&self, _point: &Vector3<f64>) -> Vector3<f64> {
        self.field
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_field() {
        let field = UniformField::along_z(1.5);
        let p = Vector3::new(100.0, -20.0, 3.0);
        assert_eq!(field.field_at(&p), Vector3::new(0.0, 0.0, 1.5));
        assert_eq!(field.bz_at(&p), 1.5);
        assert_eq!(UniformField::zero().bz_at(&p), 0.0);
    }
}
