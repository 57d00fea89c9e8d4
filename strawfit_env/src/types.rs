//! Common types for the strawfit detector environment.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Index of a straw in the tracker.
///
/// Straw ids are dense: a geometry with `n` straws uses ids `0..n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrawId(pub u32);

impl StrawId {
    /// Returns the id as a vector index.
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for StrawId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Identifier of a panel (a group of straws read out together).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PanelId(pub u32);

impl std::fmt::Display for PanelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// A single straw tube with its sense wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Straw {
    /// Straw id
    pub id: StrawId,

    /// Panel this straw belongs to
    pub panel: PanelId,

    /// Layer inside the panel (0 or 1 for a double-layer panel)
    pub layer: u32,

    /// Wire mid point [x, y, z] in mm
    pub mid_point: Vector3<f64>,

    /// Unit vector along the wire, pointing to the readout end
    pub direction: Vector3<f64>,

    /// Half of the active wire length (mm)
    pub half_length: f64,

    /// Inner straw radius (mm)
    pub radius: f64,
}

impl Straw {
    /// Point on the wire at signed coordinate `u` from the mid point.
    pub fn wire_point(&self, u: f64) -> Vector3<f64> {
        self.mid_point + self.direction * u
    }

    /// Distance the signal travels from wire coordinate `u` to the readout end.
    pub fn signal_path(&self, u: f64) -> f64 {
        self.half_length - u
    }
}

/// Raw straw measurement as delivered by hit reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrawHit {
    /// Straw that fired
    pub straw: StrawId,

    /// Measured time at the readout end (ns)
    pub time: f64,

    /// Time difference between the two straw ends (ns)
    pub dt: f64,

    /// Deposited energy (MeV)
    pub energy_dep: f64,
}

impl StrawHit {
    pub fn new(straw: StrawId, time: f64) -> Self {
        Self {
            straw,
            time,
            dt: 0.0,
            energy_dep: 0.0,
        }
    }
}

/// Material description shared by all straws.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrawMaterial {
    /// Straw wall thickness (mm)
    pub wall_thickness: f64,

    /// Mean energy loss in the wall (MeV/mm)
    pub wall_dedx: f64,

    /// Mean energy loss in the gas (MeV/mm)
    pub gas_dedx: f64,
}

impl Default for StrawMaterial {
    fn default() -> Self {
        Self {
            wall_thickness: 0.015,   // 15 µm mylar
            wall_dedx: 0.28,         // ~ minimum ionizing in mylar
            gas_dedx: 0.0003,        // Ar/CO2
        }
    }
}

/// Distance-to-time conversion result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct D2T {
    /// Drift time (ns)
    pub tdrift: f64,

    /// Local drift velocity (mm/ns)
    pub vdrift: f64,
}

/// Time-to-distance conversion result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct T2D {
    /// Drift radius (mm), may be negative or exceed the straw radius
    pub rdrift: f64,

    /// Local drift velocity (mm/ns)
    pub vdrift: f64,
}
