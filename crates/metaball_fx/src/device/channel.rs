//! One-tick-latency dispatch/readback protocol between a grid and its compute device.
//!
//! Each simulation tick calls [`OffloadChannel::collect`] to pull in the results of the previous
//! dispatch, then [`OffloadChannel::submit`] to start the next one, then triangulates from the
//! CPU mirror. The device works on tick N while the CPU meshes tick N-1.
use glam::Vec3;
use tracing::trace;

use super::{DensityDevice, Kernel};
use crate::error::{Error, Result};
use crate::field::layout::{GpuCorner, GpuParticle, KernelParams};
use crate::grid::CornerArena;

/// Where the channel is in its dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    /// No dispatch outstanding; the CPU mirror is current.
    Idle,
    /// A dispatch was submitted and its results have not been read back yet.
    AwaitingReadback,
}

/// What the last [`OffloadChannel::collect`] brought back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readback {
    /// Nothing was in flight.
    Nothing,
    /// Corner intensities (and particles, when requested) were refreshed.
    Collected,
}

struct InFlight {
    particles: usize,
    physics: bool,
    movement: Vec3,
}

/// Drives one [`DensityDevice`] for one grid.
pub struct OffloadChannel {
    device: Box<dyn DensityDevice>,
    phase: ChannelPhase,
    in_flight: Option<InFlight>,
    generation: u64,
    uploaded_generation: Option<u64>,
    pending_movement: Vec3,
    corner_scratch: Vec<GpuCorner>,
    particle_scratch: Vec<GpuParticle>,
    dispatches: u64,
}

impl OffloadChannel {
    pub fn new(device: Box<dyn DensityDevice>) -> Self {
        Self {
            device,
            phase: ChannelPhase::Idle,
            in_flight: None,
            generation: 0,
            uploaded_generation: None,
            pending_movement: Vec3::ZERO,
            corner_scratch: Vec::new(),
            particle_scratch: Vec::new(),
            dispatches: 0,
        }
    }

    pub fn phase(&self) -> ChannelPhase {
        self.phase
    }

    pub fn device_label(&self) -> &str {
        self.device.label()
    }

    pub fn device(&self) -> &dyn DensityDevice {
        self.device.as_ref()
    }

    /// Total dispatches submitted over the channel's lifetime.
    pub fn dispatches(&self) -> u64 {
        self.dispatches
    }

    /// Translation not yet sent to the device.
    pub fn pending_movement(&self) -> Vec3 {
        self.pending_movement
    }

    /// Records that the owning grid moved by `delta` since the last dispatch.
    pub fn track_movement(&mut self, delta: Vec3) {
        self.pending_movement += delta;
    }

    /// Grid topology changed: frees device buffers and forgets any outstanding dispatch.
    pub fn invalidate(&mut self) {
        self.device.release();
        self.phase = ChannelPhase::Idle;
        self.in_flight = None;
        self.generation += 1;
        self.uploaded_generation = None;
        self.pending_movement = Vec3::ZERO;
    }

    /// A device call failed: moves `corners` by every translation the device never reported
    /// back, then invalidates. The next submit re-uploads the corrected mirror.
    pub fn recover(&mut self, corners: &mut CornerArena) {
        let unseen = self
            .in_flight
            .as_ref()
            .map_or(Vec3::ZERO, |flight| flight.movement);
        corners.translate(self.pending_movement + unseen);
        self.invalidate();
    }

    /// Drops an outstanding dispatch without reading it back.
    ///
    /// Device-side corner positions are discarded with it, so the next submit re-uploads the CPU
    /// mirror and re-sends the movement that dispatch carried.
    pub fn discard_in_flight(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            self.device.release();
            self.uploaded_generation = None;
            self.pending_movement += flight.movement;
        }
        self.phase = ChannelPhase::Idle;
    }

    /// Copies the previous dispatch's results into `corners` (and `particles`, if given and the
    /// dispatch ran physics).
    ///
    /// Particles appended since the dispatch keep their CPU values.
    pub fn collect(
        &mut self,
        corners: &mut CornerArena,
        particles: Option<&mut [GpuParticle]>,
    ) -> Result<Readback> {
        let Some(flight) = self.in_flight.take() else {
            return Ok(Readback::Nothing);
        };
        self.phase = ChannelPhase::Idle;

        self.corner_scratch
            .resize(corners.len(), GpuCorner::default());
        if let Err(err) = self.device.read_corners(&mut self.corner_scratch) {
            self.pending_movement += flight.movement;
            return Err(err);
        }
        for (corner, gpu) in corners.iter_mut().zip(&self.corner_scratch) {
            corner.position = gpu.position();
            corner.set_intensity(gpu.intensity);
        }

        if let Some(particles) = particles {
            if flight.physics {
                self.particle_scratch
                    .resize(flight.particles, GpuParticle::default());
                self.device.read_particles(&mut self.particle_scratch)?;
                let n = flight.particles.min(particles.len());
                particles[..n].copy_from_slice(&self.particle_scratch[..n]);
            }
        }

        trace!("Collected readback from {} device.", self.device.label());
        Ok(Readback::Collected)
    }

    /// Uploads this tick's state and dispatches `kernels`.
    ///
    /// Corners are uploaded only after a topology change; afterwards they live on the device and
    /// are moved there by the tracked movement delta.
    pub fn submit(
        &mut self,
        corners: &CornerArena,
        particles: &[GpuParticle],
        kernels: &[Kernel],
        params: KernelParams,
    ) -> Result<()> {
        if self.in_flight.is_some() {
            return Err(Error::Device(
                "submit called while a dispatch is awaiting readback".into(),
            ));
        }

        if self.uploaded_generation != Some(self.generation) {
            self.corner_scratch.clear();
            self.corner_scratch.extend(corners.iter().map(GpuCorner::from));
            self.device.write_corners(&self.corner_scratch)?;
            self.uploaded_generation = Some(self.generation);
        }
        self.device.write_particles(particles)?;

        let movement = self.pending_movement;
        let params = params.with_movement(movement);
        self.device.dispatch(kernels, &params)?;
        self.pending_movement = Vec3::ZERO;

        self.in_flight = Some(InFlight {
            particles: particles.len(),
            physics: kernels.contains(&Kernel::Physics),
            movement,
        });
        self.phase = ChannelPhase::AwaitingReadback;
        self.dispatches += 1;
        Ok(())
    }
}

impl Drop for OffloadChannel {
    fn drop(&mut self) {
        self.device.release();
    }
}

impl std::fmt::Debug for OffloadChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffloadChannel")
            .field("device", &self.device.label())
            .field("phase", &self.phase)
            .field("generation", &self.generation)
            .field("pending_movement", &self.pending_movement)
            .field("dispatches", &self.dispatches)
            .finish()
    }
}
