//! Placement frames for grids: oriented squares for decals and boxes for volumes.
use glam::{Mat3, Quat, Vec3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Rotation whose local +Z points along `forward` and whose local +Y is as close to `up` as
/// possible. Falls back to world X as the up hint when `forward` is parallel to `up`.
pub fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let z = forward.normalize_or_zero();
    if z == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let mut x = up.cross(z);
    if x.length_squared() < 1e-8 {
        x = Vec3::X.cross(z);
        if x.length_squared() < 1e-8 {
            x = Vec3::Y.cross(z);
        }
    }
    let x = x.normalize();
    let y = z.cross(x);
    Quat::from_mat3(&Mat3::from_cols(x, y, z))
}

/// An oriented square patch subdivided into `resolution x resolution` cells.
///
/// The patch lies in the local XY plane of `orientation`; local +Z is the surface normal.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SquareFrame {
    /// World-space center of the patch.
    pub center: Vec3,
    /// Patch orientation; local +Z faces away from the supporting surface.
    pub orientation: Quat,
    /// Edge length in world units.
    pub extent: f32,
    /// Cells per side.
    pub resolution: u32,
}

impl SquareFrame {
    pub fn new(center: Vec3, orientation: Quat, extent: f32, resolution: u32) -> Self {
        Self {
            center,
            orientation,
            extent,
            resolution,
        }
    }

    /// Frame facing along `normal`, centered at `center`.
    pub fn facing(center: Vec3, normal: Vec3, extent: f32, resolution: u32) -> Self {
        Self::new(center, look_rotation(normal, Vec3::Y), extent, resolution)
    }

    #[inline]
    pub fn right(&self) -> Vec3 {
        self.orientation * Vec3::X
    }

    #[inline]
    pub fn up(&self) -> Vec3 {
        self.orientation * Vec3::Y
    }

    #[inline]
    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::Z
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.extent / self.resolution.max(1) as f32
    }

    /// World position of lattice point (0, 0).
    pub fn origin(&self) -> Vec3 {
        self.center - (self.right() + self.up()) * (self.extent * 0.5)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution == 0 {
            return Err(Error::InvalidConfig("resolution must be > 0".into()));
        }
        if !self.extent.is_finite() || self.extent <= 0.0 {
            return Err(Error::InvalidConfig("extent must be finite and > 0".into()));
        }
        if !self.center.is_finite() {
            return Err(Error::InvalidConfig("center must be finite".into()));
        }
        if !self.orientation.is_finite() || self.orientation.length_squared() < 1e-6 {
            return Err(Error::InvalidConfig(
                "orientation must be a finite, non-zero quaternion".into(),
            ));
        }
        Ok(())
    }
}

/// Axis-aligned box bounding a 3D volume.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundingBox {
    pub center: Vec3,
    pub size: Vec3,
}

impl BoundingBox {
    pub fn new(center: Vec3, size: Vec3) -> Self {
        Self { center, size }
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.size * 0.5
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.size * 0.5
    }

    pub fn contains(&self, point: Vec3) -> bool {
        let min = self.min();
        let max = self.max();
        point.cmpge(min).all() && point.cmple(max).all()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.center.is_finite() {
            return Err(Error::InvalidConfig("bounds center must be finite".into()));
        }
        if !self.size.is_finite() || self.size.min_element() <= 0.0 {
            return Err(Error::InvalidConfig(
                "bounds size must be finite and > 0 on every axis".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn look_rotation_maps_z_to_forward() {
        let forward = Vec3::new(1.0, 0.0, 1.0).normalize();
        let rot = look_rotation(forward, Vec3::Y);
        assert!(approx(rot * Vec3::Z, forward));
        assert!((rot * Vec3::Y).dot(Vec3::Y) > 0.0);
    }

    #[test]
    fn look_rotation_handles_parallel_up() {
        let rot = look_rotation(Vec3::Y, Vec3::Y);
        assert!(approx(rot * Vec3::Z, Vec3::Y));
        assert!(rot.is_normalized());
    }

    #[test]
    fn square_frame_origin_is_lower_left() {
        let frame = SquareFrame::new(Vec3::ZERO, Quat::IDENTITY, 2.0, 4);
        assert!(approx(frame.origin(), Vec3::new(-1.0, -1.0, 0.0)));
        assert_eq!(frame.cell_size(), 0.5);
    }

    #[test]
    fn square_frame_rejects_zero_resolution() {
        let frame = SquareFrame::new(Vec3::ZERO, Quat::IDENTITY, 1.0, 0);
        assert!(matches!(frame.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn bounding_box_contains_and_validates() {
        let bounds = BoundingBox::new(Vec3::ZERO, Vec3::splat(2.0));
        assert!(bounds.contains(Vec3::new(0.9, -0.9, 1.0)));
        assert!(!bounds.contains(Vec3::new(1.1, 0.0, 0.0)));
        assert!(bounds.validate().is_ok());
        let flat = BoundingBox::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0));
        assert!(flat.validate().is_err());
    }
}
