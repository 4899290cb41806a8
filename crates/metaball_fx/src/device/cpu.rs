//! Host implementation of the density and physics kernels.
use glam::Vec3;

use super::buffer::HostBuffer;
use super::{DensityDevice, Kernel};
use crate::error::Result;
use crate::field::falloff;
use crate::field::layout::{GpuCorner, GpuParticle, KernelParams};
use crate::particle::integrate_motion;

/// Runs kernels synchronously on host buffers. Results stay in the buffers until read back, so
/// the offload protocol behaves exactly as with a real device.
#[derive(Debug, Default)]
pub struct CpuDevice {
    corners: HostBuffer<GpuCorner>,
    particles: HostBuffer<GpuParticle>,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn run_physics(&mut self, params: &KernelParams) {
        let (gravity, intensity) = params.gravity();
        let movement = params.movement();
        let count = params.particle_count().min(self.particles.len());
        for ball in &mut self.particles.as_mut_slice()[..count] {
            let (position, velocity) = integrate_motion(
                ball.position() + movement,
                ball.velocity(),
                gravity * intensity,
                params.drag(),
                params.dt(),
            );
            ball.position = position.to_array();
            ball.velocity = velocity.to_array();
        }
    }

    fn run_densities(&mut self, params: &KernelParams) {
        let movement = params.movement();
        let balls = &self.particles.as_slice()[..params.particle_count().min(self.particles.len())];
        let count = params.corner_count().min(self.corners.len());
        for corner in &mut self.corners.as_mut_slice()[..count] {
            let position: Vec3 = corner.position() + movement;
            corner.position = position.to_array();
            corner.intensity = balls
                .iter()
                .map(|b| falloff(position.distance(b.position()), b.radius))
                .sum();
        }
    }
}

impl DensityDevice for CpuDevice {
    fn label(&self) -> &str {
        "cpu"
    }

    fn write_corners(&mut self, corners: &[GpuCorner]) -> Result<()> {
        self.corners.upload(corners);
        Ok(())
    }

    fn write_particles(&mut self, particles: &[GpuParticle]) -> Result<()> {
        self.particles.upload(particles);
        Ok(())
    }

    fn dispatch(&mut self, kernels: &[Kernel], params: &KernelParams) -> Result<()> {
        for kernel in kernels {
            match kernel {
                Kernel::Physics => self.run_physics(params),
                Kernel::Densities => self.run_densities(params),
            }
        }
        Ok(())
    }

    fn read_corners(&mut self, out: &mut [GpuCorner]) -> Result<()> {
        self.corners.download(out)
    }

    fn read_particles(&mut self, out: &mut [GpuParticle]) -> Result<()> {
        self.particles.download(out)
    }

    fn release(&mut self) {
        self.corners.release();
        self.particles.release();
    }

    fn allocation_count(&self) -> u64 {
        self.corners.allocations() + self.particles.allocations()
    }
}
