//! Isosurface triangulation: marching cubes for volumes, marching squares for decals.
//!
//! Both passes classify each cell by the `active` flags of its corners, look the resulting mask
//! up in a case table, place crossing points on the flagged edges, and append triangles to a
//! [`MeshBuffers`]. Output is triangle soup in the grid's local frame.
use glam::{Affine3A, Vec3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod cubes;
pub mod squares;
pub mod tables;

/// How crossing points are placed along a cell edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Interpolation {
    /// Linear in intensity: the point where the field reaches the activation threshold.
    #[default]
    Ratio,
    /// Edge midpoint. Blockier, and independent of intensities.
    Midpoint,
}

impl Interpolation {
    /// Crossing point on the edge `v1 -> v2` with corner intensities `i1` and `i2`.
    pub fn edge_point(self, v1: Vec3, i1: f32, v2: Vec3, i2: f32) -> Vec3 {
        match self {
            Interpolation::Midpoint => v1.lerp(v2, 0.5),
            Interpolation::Ratio => {
                let span = i2 - i1;
                if span.abs() < f32::EPSILON {
                    return v1.lerp(v2, 0.5);
                }
                let t = ((crate::grid::ACTIVATION_THRESHOLD - i1) / span).clamp(0.0, 1.0);
                v1 + (v2 - v1) * t
            }
        }
    }
}

/// Per-tick mesh output. Rebuilt from scratch every tick.
#[derive(Debug, Clone, Default)]
pub struct MeshBuffers {
    positions: Vec<Vec3>,
    indices: Vec<u32>,
    to_local: Affine3A,
}

impl MeshBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the buffers and sets the world-to-local transform applied to appended points.
    pub fn begin(&mut self, world_to_local: Affine3A) {
        self.clear();
        self.to_local = world_to_local;
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.indices.clear();
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Positions as plain arrays, the layout most mesh APIs expect.
    pub fn position_arrays(&self) -> Vec<[f32; 3]> {
        self.positions.iter().map(|p| p.to_array()).collect()
    }

    pub fn add_triangle(&mut self, a: Vec3, b: Vec3, c: Vec3) {
        let base = self.positions.len() as u32;
        self.positions.extend([a, b, c].map(|p| self.to_local.transform_point3(p)));
        self.indices.extend([base, base + 1, base + 2]);
    }

    /// Emits `(a, b, c)` and `(a, c, d)`.
    pub fn add_quad(&mut self, a: Vec3, b: Vec3, c: Vec3, d: Vec3) {
        let base = self.positions.len() as u32;
        self.positions
            .extend([a, b, c, d].map(|p| self.to_local.transform_point3(p)));
        self.indices
            .extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_places_point_at_threshold() {
        let p = Interpolation::Ratio.edge_point(Vec3::ZERO, 0.5, Vec3::X * 2.0, 1.5);
        assert!((p - Vec3::X).length() < 1e-6);
    }

    #[test]
    fn ratio_stays_on_edge() {
        // Both above threshold would extrapolate backwards without the clamp.
        let p = Interpolation::Ratio.edge_point(Vec3::ZERO, 3.0, Vec3::X, 2.0);
        assert_eq!(p, Vec3::X);
        let q = Interpolation::Ratio.edge_point(Vec3::ZERO, 0.2, Vec3::X, 0.4);
        assert_eq!(q, Vec3::X);
    }

    #[test]
    fn ratio_falls_back_to_midpoint_on_flat_edge() {
        let p = Interpolation::Ratio.edge_point(Vec3::ZERO, 1.0, Vec3::X, 1.0);
        assert_eq!(p, Vec3::X * 0.5);
        assert_eq!(
            Interpolation::Midpoint.edge_point(Vec3::ZERO, 0.0, Vec3::Y, 9.0),
            Vec3::Y * 0.5
        );
    }

    #[test]
    fn quad_emits_two_triangles_in_local_frame() {
        let mut mesh = MeshBuffers::new();
        mesh.begin(Affine3A::from_translation(Vec3::new(-1.0, 0.0, 0.0)));
        mesh.add_quad(Vec3::X, Vec3::X + Vec3::Y, Vec3::ONE, Vec3::X + Vec3::Z);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.indices(), &[0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.positions()[0], Vec3::ZERO);

        mesh.begin(Affine3A::IDENTITY);
        assert!(mesh.is_empty());
    }
}
