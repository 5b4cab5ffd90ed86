//! Readout-plane geometry.
//!
//! The detector reads out 2D projections of the 3D volume on up to three wire
//! planes ("views") per partition. A 3D point projects to
//! `(wire coordinate, drift coordinate)` where the wire coordinate is measured
//! perpendicular to the wires in the y–z plane and the drift coordinate is x.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Readout volume identifier (drift volume within a cryostat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Partition {
    pub tpc: u32,
    pub cryo: u32,
}

impl Partition {
    pub const fn new(tpc: u32, cryo: u32) -> Self {
        Self { tpc, cryo }
    }
}

/// Wire plane orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum View {
    /// First induction plane
    U,
    /// Second induction plane
    V,
    /// Collection plane
    Z,
}

impl View {
    pub const ALL: [View; 3] = [View::U, View::V, View::Z];
}

/// Projection of 3D points onto 2D readout planes.
pub trait ReadoutGeometry {
    /// Whether `partition` is read out by a plane of the given view.
    fn has_plane(&self, partition: Partition, view: View) -> bool;

    /// Projects a 3D point onto the 2D plane of `view` in `partition`.
    fn project(&self, point: &Vector3<f64>, view: View, partition: Partition) -> Vector2<f64>;
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for [`WirePlaneGeometry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadoutConfig {
    /// Wire angle of the U plane from the vertical, in degrees (default: 35.7)
    pub u_angle_deg: f64,

    /// Wire angle of the V plane from the vertical, in degrees (default: -35.7)
    pub v_angle_deg: f64,

    /// Wire angle of the collection plane, in degrees (default: 0.0)
    pub z_angle_deg: f64,

    /// Views absent in specific partitions (default: none, all views present)
    pub missing_planes: Vec<(Partition, View)>,
}

impl Default for ReadoutConfig {
    fn default() -> Self {
        Self {
            u_angle_deg: 35.7,
            v_angle_deg: -35.7,
            z_angle_deg: 0.0,
            missing_planes: Vec::new(),
        }
    }
}

// ============================================================================
// WIRE PLANE GEOMETRY
// ============================================================================

/// Uniform three-view wire readout shared by every partition.
#[derive(Debug, Clone)]
pub struct WirePlaneGeometry {
    /// (sin θ, cos θ) of the wire angle, per view
    orientation: HashMap<View, (f64, f64)>,

    /// Partition → views it lacks
    missing: HashMap<Partition, Vec<View>>,
}

impl WirePlaneGeometry {
    pub fn new(config: &ReadoutConfig) -> Self {
        let orientation = [
            (View::U, config.u_angle_deg),
            (View::V, config.v_angle_deg),
            (View::Z, config.z_angle_deg),
        ]
        .into_iter()
        .map(|(view, deg)| (view, deg.to_radians().sin_cos()))
        .collect();

        let mut missing: HashMap<Partition, Vec<View>> = HashMap::new();
        for (partition, view) in &config.missing_planes {
            missing.entry(*partition).or_default().push(*view);
        }

        Self { orientation, missing }
    }

    pub fn with_defaults() -> Self {
        Self::new(&ReadoutConfig::default())
    }
}

impl Default for WirePlaneGeometry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ReadoutGeometry for WirePlaneGeometry {
    fn has_plane(&self, partition: Partition, view: View) -> bool {
        !self
            .missing
            .get(&partition)
            .is_some_and(|views| views.contains(&view))
    }

    fn project(&self, point: &Vector3<f64>, view: View, _partition: Partition) -> Vector2<f64> {
        let (sin, cos) = self.orientation.get(&view).copied().unwrap_or((0.0, 1.0));
        Vector2::new(point.z * cos + point.y * sin, point.x)
    }
}
