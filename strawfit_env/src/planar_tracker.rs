//! In-memory straw tracker made of rotated planar panels.
//!
//! Each plane holds one double-layer panel. The straws of a panel are
//! parallel; consecutive planes are rotated so that the wire directions give
//! stereo information. The second layer is staggered by half a pitch.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::TrackerGeometry;
use crate::error::EnvError;
use crate::types::{PanelId, Straw, StrawId, StrawMaterial};

/// Construction parameters for a [`PlanarTracker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanarTrackerConfig {
    /// Number of planes (one panel each)
    pub n_planes: usize,

    /// z of the first plane centre (mm)
    pub z_first: f64,

    /// Distance between consecutive planes (mm)
    pub plane_spacing: f64,

    /// z separation of the two layers inside a panel (mm)
    pub layer_spacing: f64,

    /// Straw pitch inside a layer (mm)
    pub straw_pitch: f64,

    /// Inner straw radius (mm)
    pub straw_radius: f64,

    /// Straws cover offsets in [-half_extent, half_extent]; also the wire half length (mm)
    pub half_extent: f64,

    /// Rotation of each plane with respect to the previous one (degrees)
    pub rotation_step_deg: f64,

    /// Straw material
    pub material: StrawMaterial,
}

impl Default for PlanarTrackerConfig {
    fn default() -> Self {
        Self {
            n_planes: 36,
            z_first: -1500.0,
            plane_spacing: 85.7,
            layer_spacing: 5.0,
            straw_pitch: 5.0,
            straw_radius: 2.5,
            half_extent: 700.0,
            rotation_step_deg: 30.0,
            material: StrawMaterial::default(),
        }
    }
}

/// One layer of parallel straws at fixed z.
#[derive(Debug, Clone, PartialEq)]
pub struct StrawLayer {
    /// Panel owning this layer
    pub panel: PanelId,

    /// Layer z (mm)
    pub z: f64,

    /// Unit wire direction
    pub direction: Vector3<f64>,

    /// In-plane unit vector perpendicular to the wires
    pub normal: Vector3<f64>,

    /// Offset of the first straw along `normal` (mm)
    pub first_offset: f64,

    /// Straw pitch (mm)
    pub pitch: f64,

    /// Id of the first straw of the layer
    pub first_straw: u32,

    /// Number of straws in the layer
    pub n_straws: u32,
}

/// A straw tracker held fully in memory.
#[derive(Debug, Clone)]
pub struct PlanarTracker {
    straws: Vec<Straw>,
    layers: Vec<StrawLayer>,
    material: StrawMaterial,
}

impl PlanarTracker {
    /// Builds the tracker described by `config`.
    pub fn new(config: &PlanarTrackerConfig) -> Result<Self, EnvError> {
        if config.n_planes == 0 {
            return Err(EnvError::geometry("at least one plane is required"));
        }
        if config.straw_pitch <= 0.0 || config.straw_radius <= 0.0 {
            return Err(EnvError::geometry("straw pitch and radius must be positive"));
        }
        if config.straw_radius > config.straw_pitch {
            return Err(EnvError::geometry(format!(
                "straw radius {} exceeds pitch {}",
                config.straw_radius, config.straw_pitch
            )));
        }
        if config.half_extent <= config.straw_pitch {
            return Err(EnvError::geometry("half extent must exceed the straw pitch"));
        }

        let n_per_layer = (2.0 * config.half_extent / config.straw_pitch).floor() as u32;
        let mut straws = Vec::with_capacity(config.n_planes * 2 * n_per_layer as usize);
        let mut layers = Vec::with_capacity(config.n_planes * 2);

        for plane in 0..config.n_planes {
            let angle = (plane as f64 * config.rotation_step_deg).to_radians();
            let direction = Vector3::new(angle.cos(), angle.sin(), 0.0);
            let normal = Vector3::new(-angle.sin(), angle.cos(), 0.0);
            let plane_z = config.z_first + plane as f64 * config.plane_spacing;
            let panel = PanelId(plane as u32);

            for layer in 0..2u32 {
                let z = plane_z + (layer as f64 - 0.5) * config.layer_spacing;
                let stagger = 0.5 * config.straw_pitch * layer as f64;
                let first_offset = -config.half_extent + 0.5 * config.straw_pitch + stagger;
                let first_straw = straws.len() as u32;

                for k in 0..n_per_layer {
                    let offset = first_offset + k as f64 * config.straw_pitch;
                    straws.push(Straw {
                        id: StrawId(first_straw + k),
                        panel,
                        layer,
                        mid_point: normal * offset + Vector3::new(0.0, 0.0, z),
                        direction,
                        half_length: config.half_extent,
                        radius: config.straw_radius,
                    });
                }

                layers.push(StrawLayer {
                    panel,
                    z,
                    direction,
                    normal,
                    first_offset,
                    pitch: config.straw_pitch,
                    first_straw,
                    n_straws: n_per_layer,
                });
            }
        }

        debug!(
            "Built planar tracker: {} planes, {} layers, {} straws",
            config.n_planes,
            layers.len(),
            straws.len()
        );

        Ok(Self {
            straws,
            layers,
            material: config.material,
        })
    }

    /// Wraps an explicit straw list (ids must equal their position).
    ///
    /// Such a tracker has no layer table, so [`nearest_straw`](Self::nearest_straw)
    /// always returns `None`.
    pub fn from_straws(straws: Vec<Straw>, material: StrawMaterial) -> Result<Self, EnvError> {
        for (i, straw) in straws.iter().enumerate() {
            if straw.id.as_index() != i {
                return Err(EnvError::geometry(format!(
                    "straw at position {} has id {}",
                    i, straw.id
                )));
            }
            if (straw.direction.norm() - 1.0).abs() > 1e-9 {
                return Err(EnvError::geometry(format!(
                    "straw {} direction is not a unit vector",
                    straw.id
                )));
            }
        }

        Ok(Self {
            straws,
            layers: Vec::new(),
            material,
        })
    }

    /// All straw layers, ordered by increasing z.
    pub fn layers(&self) -> &[StrawLayer] {
        &self.layers
    }

    /// All straws.
    pub fn straws(&self) -> &[Straw] {
        &self.straws
    }

    /// The straw of `layer` whose wire is closest to `point` in the layer plane.
    pub fn nearest_straw(&self, layer: usize, point: &Vector3<f64>) -> Option<&Straw> {
        let info = self.layers.get(layer)?;
        let offset = point.dot(&info.normal);
        let k = ((offset - info.first_offset) / info.pitch).round();
        if k < 0.0 || k >= info.n_straws as f64 {
            return None;
        }
        self.straws.get((info.first_straw + k as u32) as usize)
    }
}

impl TrackerGeometry for PlanarTracker {
    fn straw(&self, id: StrawId) -> Option<&Straw> {
        self.straws.get(id.as_index())
    }

    fn straw_count(&self) -> usize {
        self.straws.len()
    }

    fn material(&self) -> &StrawMaterial {
        &self.material
    }
}
