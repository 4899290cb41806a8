//! Plain-old-data layouts shared by the host mirrors and the compute kernels.
//!
//! Every struct here is `#[repr(C)]`, 16-byte aligned in size, and matches the WGSL structs in
//! `device/kernels.wgsl` field for field.
use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec3};

use super::DensitySource;
use crate::grid::Corner;

/// Device-side corner: position and accumulated intensity.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuCorner {
    pub position: [f32; 3],
    pub intensity: f32,
}

impl From<&Corner> for GpuCorner {
    fn from(corner: &Corner) -> Self {
        Self {
            position: corner.position.to_array(),
            intensity: corner.intensity,
        }
    }
}

impl GpuCorner {
    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }
}

/// Device-side particle: position, radius, and velocity for the physics kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuParticle {
    pub position: [f32; 3],
    pub radius: f32,
    pub velocity: [f32; 3],
    pub _pad: f32,
}

impl GpuParticle {
    pub fn new(position: Vec3, radius: f32, velocity: Vec3) -> Self {
        Self {
            position: position.to_array(),
            radius,
            velocity: velocity.to_array(),
            _pad: 0.0,
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    #[inline]
    pub fn velocity(&self) -> Vec3 {
        Vec3::from_array(self.velocity)
    }

    #[inline]
    pub fn source(&self) -> DensitySource {
        DensitySource::new(self.position(), self.radius)
    }
}

impl From<DensitySource> for GpuParticle {
    fn from(source: DensitySource) -> Self {
        Self::new(source.position, source.radius, Vec3::ZERO)
    }
}

/// Uniform block passed to every kernel dispatch.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    /// Cells per axis in `xyz`.
    pub dims: [u32; 4],
    /// `x` = corner count, `y` = particle count.
    pub counts: [u32; 4],
    /// Gravity direction in `xyz`, intensity in `w`.
    pub gravity: [f32; 4],
    /// Translation applied to every corner and particle before the kernel runs.
    pub movement: [f32; 4],
    /// `x` = dt, `y` = drag.
    pub step: [f32; 4],
}

impl KernelParams {
    pub fn new(dims: UVec3, corner_count: usize, particle_count: usize) -> Self {
        Self {
            dims: [dims.x, dims.y, dims.z, 0],
            counts: [corner_count as u32, particle_count as u32, 0, 0],
            ..Default::default()
        }
    }

    pub fn with_gravity(mut self, gravity: Vec3, intensity: f32) -> Self {
        self.gravity = [gravity.x, gravity.y, gravity.z, intensity];
        self
    }

    pub fn with_movement(mut self, movement: Vec3) -> Self {
        self.movement = [movement.x, movement.y, movement.z, 0.0];
        self
    }

    pub fn with_step(mut self, dt: f32, drag: f32) -> Self {
        self.step = [dt, drag, 0.0, 0.0];
        self
    }

    pub fn corner_count(&self) -> usize {
        self.counts[0] as usize
    }

    pub fn particle_count(&self) -> usize {
        self.counts[1] as usize
    }

    pub fn gravity(&self) -> (Vec3, f32) {
        let [x, y, z, w] = self.gravity;
        (Vec3::new(x, y, z), w)
    }

    pub fn movement(&self) -> Vec3 {
        let [x, y, z, _] = self.movement;
        Vec3::new(x, y, z)
    }

    pub fn dt(&self) -> f32 {
        self.step[0]
    }

    pub fn drag(&self) -> f32 {
        self.step[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_kernel_strides() {
        assert_eq!(std::mem::size_of::<GpuCorner>(), 16);
        assert_eq!(std::mem::size_of::<GpuParticle>(), 32);
        assert_eq!(std::mem::size_of::<KernelParams>(), 80);
    }

    #[test]
    fn params_builders_round_into_accessors() {
        let params = KernelParams::new(UVec3::new(4, 2, 1), 15, 3)
            .with_gravity(Vec3::NEG_Y, 0.5)
            .with_movement(Vec3::X)
            .with_step(0.02, 3.0);
        assert_eq!(params.corner_count(), 15);
        assert_eq!(params.particle_count(), 3);
        assert_eq!(params.gravity(), (Vec3::NEG_Y, 0.5));
        assert_eq!(params.movement(), Vec3::X);
        assert_eq!(params.dt(), 0.02);
        assert_eq!(params.drag(), 3.0);
    }

    #[test]
    fn corner_conversion_keeps_intensity() {
        let mut corner = Corner::new(Vec3::new(1.0, 2.0, 3.0));
        corner.set_intensity(0.25);
        let gpu = GpuCorner::from(&corner);
        assert_eq!(gpu.position(), corner.position);
        assert_eq!(gpu.intensity, 0.25);
    }
}
