//! Compute devices that evaluate densities and particle physics off the simulation thread.
//!
//! - [`DensityDevice`]: buffer upload, kernel dispatch, and readback on some backend
//! - [`cpu::CpuDevice`]: host implementation of the kernels, always available
//! - `wgpu::WgpuContext` / `wgpu::WgpuDevice`: WGSL compute implementation (feature `wgpu`)
//! - [`channel::OffloadChannel`]: one-tick-latency dispatch/readback protocol used by every grid
use std::sync::Arc;

use crate::error::Result;
use crate::field::layout::{GpuCorner, GpuParticle, KernelParams};

pub mod buffer;
pub mod channel;
pub mod cpu;
#[cfg(test)]
pub(crate) mod testing;
#[cfg(feature = "wgpu")]
pub mod wgpu;

/// Kernel entry points understood by every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Integrate particle velocities and positions.
    Physics,
    /// Recompute per-corner intensities from all particles.
    Densities,
}

impl Kernel {
    /// WGSL entry point name.
    pub fn entry_point(self) -> &'static str {
        match self {
            Kernel::Physics => "update_physics",
            Kernel::Densities => "get_densities",
        }
    }
}

/// A compute backend holding one grid's corner and particle buffers.
///
/// Buffers are sized to the exact element counts of the last write and reallocated only when
/// that count changes. Reads return the results of the most recent [`DensityDevice::dispatch`].
pub trait DensityDevice: Send + Sync {
    /// Human-readable backend name.
    fn label(&self) -> &str;

    fn write_corners(&mut self, corners: &[GpuCorner]) -> Result<()>;

    fn write_particles(&mut self, particles: &[GpuParticle]) -> Result<()>;

    /// Runs `kernels` in order with `params`.
    fn dispatch(&mut self, kernels: &[Kernel], params: &KernelParams) -> Result<()>;

    fn read_corners(&mut self, out: &mut [GpuCorner]) -> Result<()>;

    fn read_particles(&mut self, out: &mut [GpuParticle]) -> Result<()>;

    /// Frees every buffer. Pending results are dropped.
    fn release(&mut self);

    /// Number of buffer allocations performed so far.
    fn allocation_count(&self) -> u64 {
        0
    }
}

/// Creates one device per simulated grid.
pub type DeviceFactory = Arc<dyn Fn() -> Result<Box<dyn DensityDevice>> + Send + Sync>;

/// Factory producing [`cpu::CpuDevice`]s.
pub fn cpu_factory() -> DeviceFactory {
    Arc::new(|| Ok(Box::new(cpu::CpuDevice::new()) as Box<dyn DensityDevice>))
}
