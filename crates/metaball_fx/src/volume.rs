//! 3D metaball volumes: a box-bounded cube lattice meshed with marching cubes.
//!
//! A [`MetaballVolume`] owns its lattice, the ids of the pool particles it renders, an offload
//! channel and the LOD state that decides how often it ticks. Particles themselves live in the
//! shared [`ParticlePool`].
use glam::{Affine3A, Vec3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::device::channel::OffloadChannel;
use crate::device::{DensityDevice, Kernel};
use crate::error::{Error, Result};
use crate::events::{emit, EventSink, FxEvent, FxEventKind, SkipReason, UnitRef};
use crate::field::layout::{GpuParticle, KernelParams};
use crate::grid::cube::build_cube_grid;
use crate::grid::frame::BoundingBox;
use crate::grid::CubeGrid;
use crate::lod::{LodScheduler, LodSettings, LodState};
use crate::march::cubes::triangulate_cubes;
use crate::march::{Interpolation, MeshBuffers};
use crate::particle::pool::ParticlePool;
use crate::particle::ParticleId;
use crate::scheduler::{Cadence, TickOutcome};

/// Handle of a volume inside an [`FxContext`](crate::context::FxContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VolumeId(pub(crate) u32);

impl VolumeId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VolumeSettings {
    /// Used in logs and errors.
    pub name: String,
    /// Containing box. Required.
    pub bounds: Option<BoundingBox>,
    /// Cells per world unit along each axis.
    pub resolution: u32,
    pub lod: LodSettings,
    pub interpolation: Interpolation,
    /// Opaque material id forwarded to the renderer.
    pub material: Option<u32>,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            name: "volume".into(),
            bounds: None,
            resolution: 3,
            lod: LodSettings::default(),
            interpolation: Interpolation::Ratio,
            material: None,
        }
    }
}

impl VolumeSettings {
    pub fn new(bounds: BoundingBox) -> Self {
        Self {
            bounds: Some(bounds),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_lod(mut self, lod: LodSettings) -> Self {
        self.lod = lod;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_material(mut self, material: Option<u32>) -> Self {
        self.material = material;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution == 0 {
            return Err(Error::InvalidConfig(format!(
                "volume '{}' resolution must be > 0",
                self.name
            )));
        }
        if let Some(bounds) = &self.bounds {
            bounds.validate()?;
        }
        self.lod.validate()
    }
}

/// What [`MetaballVolume::set_bounds`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsChange {
    Unchanged,
    /// Same size at a new center; the lattice follows on the device.
    Moved,
    /// Size changed; the lattice was rebuilt.
    Rebuilt,
}

/// A box of marching-cubes lattice rendering the pool particles it adopted.
pub struct MetaballVolume {
    id: VolumeId,
    settings: VolumeSettings,
    bounds: BoundingBox,
    grid: CubeGrid,
    particles: Vec<ParticleId>,
    channel: OffloadChannel,
    lod: LodScheduler,
    cadence: Cadence,
    mesh: MeshBuffers,
    enabled: bool,
    upload: Vec<GpuParticle>,
}

impl MetaballVolume {
    /// Builds the lattice. A volume without bounds is a setup error and is not created.
    pub fn new(settings: VolumeSettings, device: Box<dyn DensityDevice>) -> Result<Self> {
        let Some(bounds) = settings.bounds else {
            error!(
                "Volume '{}' has no bounding box; give it bounds sized to the effect.",
                settings.name
            );
            return Err(Error::MissingFrame {
                unit: settings.name,
            });
        };
        settings.validate()?;

        let grid = build_cube_grid(&bounds, settings.resolution)?;
        let lod = LodScheduler::new(settings.lod.clone())?;
        let cadence = Cadence::new(settings.lod.initial_interval);
        Ok(Self {
            id: VolumeId(0),
            settings,
            bounds,
            grid,
            particles: Vec::new(),
            channel: OffloadChannel::new(device),
            lod,
            cadence,
            mesh: MeshBuffers::new(),
            enabled: true,
            upload: Vec::new(),
        })
    }

    pub(crate) fn set_id(&mut self, id: VolumeId) {
        self.id = id;
    }

    pub fn id(&self) -> VolumeId {
        self.id
    }

    pub fn settings(&self) -> &VolumeSettings {
        &self.settings
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn grid(&self) -> &CubeGrid {
        &self.grid
    }

    /// Ids of adopted particles. May include ids retired since the last tick.
    pub fn particles(&self) -> &[ParticleId] {
        &self.particles
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Mesh from the most recent tick, relative to the bounds center.
    pub fn mesh(&self) -> &MeshBuffers {
        &self.mesh
    }

    pub fn channel(&self) -> &OffloadChannel {
        &self.channel
    }

    pub fn lod_state(&self) -> LodState {
        self.lod.state()
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    pub fn material(&self) -> Option<u32> {
        self.settings.material
    }

    pub fn interpolation(&self) -> Interpolation {
        self.settings.interpolation
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.settings.interpolation = interpolation;
    }

    pub fn set_lod(&mut self, lod: LodSettings) -> Result<()> {
        self.lod.set_settings(lod.clone())?;
        self.settings.lod = lod;
        Ok(())
    }

    pub fn local_to_world(&self) -> Affine3A {
        Affine3A::from_translation(self.bounds.center)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling releases device buffers and clears the mesh. Adopted particles are kept.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        if !enabled {
            self.channel.invalidate();
            self.mesh.clear();
        }
        self.cadence.reset();
        self.lod.invalidate();
    }

    pub fn adopt(&mut self, id: ParticleId) {
        if !self.particles.contains(&id) {
            self.particles.push(id);
        }
    }

    /// Returns `true` if `id` was adopted.
    pub fn release(&mut self, id: ParticleId) -> bool {
        let before = self.particles.len();
        self.particles.retain(|&p| p != id);
        self.particles.len() != before
    }

    pub fn clear_particles(&mut self) {
        self.particles.clear();
        self.mesh.clear();
        self.channel.discard_in_flight();
    }

    /// Metaball radius that reads well at the current lattice density.
    pub fn desired_particle_radius(&self) -> f32 {
        let cell = self.grid.cell_size();
        cell.x * cell.y * cell.z * 7.5
    }

    /// Moves or resizes the volume.
    pub fn set_bounds(&mut self, bounds: BoundingBox) -> Result<BoundsChange> {
        bounds.validate()?;
        if bounds.size != self.bounds.size {
            self.bounds = bounds;
            self.settings.bounds = Some(bounds);
            self.rebuild()?;
            return Ok(BoundsChange::Rebuilt);
        }
        let delta = bounds.center - self.bounds.center;
        if delta == Vec3::ZERO {
            return Ok(BoundsChange::Unchanged);
        }
        self.bounds = bounds;
        self.settings.bounds = Some(bounds);
        self.channel.track_movement(delta);
        Ok(BoundsChange::Moved)
    }

    /// Returns `true` if the lattice was rebuilt.
    pub fn set_resolution(&mut self, resolution: u32) -> Result<bool> {
        if resolution == 0 {
            return Err(Error::InvalidConfig("resolution must be > 0".into()));
        }
        if resolution == self.settings.resolution {
            return Ok(false);
        }
        self.settings.resolution = resolution;
        self.rebuild()?;
        Ok(true)
    }

    fn rebuild(&mut self) -> Result<()> {
        self.grid = build_cube_grid(&self.bounds, self.settings.resolution)?;
        self.channel.invalidate();
        self.mesh.clear();
        debug!(
            "Rebuilt volume '{}': {} corners, {} cells.",
            self.settings.name,
            self.grid.corner_count(),
            self.grid.cell_count()
        );
        Ok(())
    }

    /// Runs LOD evaluation and, when the cadence is due, one simulation tick.
    pub fn advance(
        &mut self,
        dt: f32,
        view_point: Vec3,
        pool: &ParticlePool,
        sink: &mut dyn EventSink,
    ) -> TickOutcome {
        if !self.enabled {
            return TickOutcome::Inactive;
        }
        if let Some(state) = self.lod.advance(dt, self.bounds.center, view_point) {
            self.cadence.set_interval(state.tick_interval);
            let volume = self.id;
            emit(sink, FxEventKind::LodChanged, || FxEvent::LodChanged {
                volume,
                detail_level: state.detail_level,
                tick_interval: state.tick_interval,
            });
        }
        if !self.cadence.poll(dt) {
            return TickOutcome::NotDue;
        }

        let unit = UnitRef::Volume(self.id);
        self.particles.retain(|&id| pool.is_alive(id));
        let skip = if self.lod.state().is_hidden() {
            Some(SkipReason::Hidden)
        } else if self.particles.is_empty() {
            Some(SkipReason::NoParticles)
        } else {
            None
        };
        if let Some(reason) = skip {
            self.mesh.clear();
            self.channel.discard_in_flight();
            emit(sink, FxEventKind::TickSkipped, || FxEvent::TickSkipped {
                unit,
                reason,
            });
            return TickOutcome::Skipped(reason);
        }

        match self.simulate(pool) {
            Ok(triangles) => {
                emit(sink, FxEventKind::MeshUpdated, || FxEvent::MeshUpdated {
                    unit,
                    triangles,
                });
                TickOutcome::Updated { triangles }
            }
            Err(err) => {
                warn!("Volume '{}' device failure: {err}", self.settings.name);
                self.channel.recover(self.grid.corners_mut());
                self.mesh.clear();
                emit(sink, FxEventKind::DeviceFailed, || FxEvent::DeviceFailed {
                    unit,
                    message: err.to_string(),
                });
                TickOutcome::DeviceFailed
            }
        }
    }

    fn simulate(&mut self, pool: &ParticlePool) -> Result<usize> {
        self.upload.clear();
        self.upload.extend(
            self.particles
                .iter()
                .filter_map(|&id| pool.get(id))
                .map(|p| GpuParticle::from(p.source())),
        );

        self.channel.collect(self.grid.corners_mut(), None)?;
        let params = KernelParams::new(
            self.grid.dims(),
            self.grid.corner_count(),
            self.upload.len(),
        );
        self.channel
            .submit(self.grid.corners(), &self.upload, &[Kernel::Densities], params)?;

        self.mesh
            .begin(Affine3A::from_translation(-self.bounds.center));
        Ok(triangulate_cubes(
            &self.grid,
            self.settings.interpolation,
            &mut self.mesh,
        ))
    }
}

impl std::fmt::Debug for MetaballVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaballVolume")
            .field("id", &self.id)
            .field("name", &self.settings.name)
            .field("bounds", &self.bounds)
            .field("particles", &self.particles.len())
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::channel::ChannelPhase;
    use crate::device::cpu::CpuDevice;
    use crate::device::testing::{flaky, FailAt};
    use crate::events::VecSink;
    use crate::particle::SpawnRequest;

    fn cpu() -> Box<dyn DensityDevice> {
        Box::new(CpuDevice::new())
    }

    fn unit_box() -> BoundingBox {
        BoundingBox::new(Vec3::ZERO, Vec3::splat(2.0))
    }

    fn volume() -> MetaballVolume {
        MetaballVolume::new(VolumeSettings::new(unit_box()).with_resolution(2), cpu()).unwrap()
    }

    fn pool_with_ball(volume: &mut MetaballVolume, at: Vec3) -> ParticlePool {
        let mut pool = ParticlePool::with_capacity(4);
        let request = SpawnRequest::new(at, Vec3::ZERO)
            .with_radius(1.5)
            .with_life(10.0);
        let id = pool.fire(&request, Some(volume.id())).unwrap();
        volume.adopt(id);
        pool
    }

    #[test]
    fn missing_bounds_is_a_setup_error() {
        let err =
            MetaballVolume::new(VolumeSettings::default().with_name("jet"), cpu()).unwrap_err();
        assert!(matches!(err, Error::MissingFrame { ref unit } if unit == "jet"));
    }

    #[test]
    fn lattice_matches_box_and_resolution() {
        let v = volume();
        assert_eq!(v.grid().cell_count(), 64);
        assert_eq!(v.grid().corner_count(), 125);
        assert!((v.desired_particle_radius() - 0.9375).abs() < 1e-6);
    }

    #[test]
    fn mesh_appears_one_tick_after_first_dispatch() {
        let mut v = volume();
        let pool = pool_with_ball(&mut v, Vec3::ZERO);

        let first = v.advance(0.02, Vec3::ZERO, &pool, &mut ());
        assert_eq!(first, TickOutcome::Updated { triangles: 0 });
        assert!(v.mesh().is_empty());

        let second = v.advance(0.02, Vec3::ZERO, &pool, &mut ());
        let TickOutcome::Updated { triangles } = second else {
            panic!("expected update, got {second:?}");
        };
        assert!(triangles > 0);
        assert_eq!(v.mesh().triangle_count(), triangles);
    }

    #[test]
    fn far_viewer_hides_the_volume() {
        let mut v = volume();
        let pool = pool_with_ball(&mut v, Vec3::ZERO);
        let mut sink = VecSink::new();
        let outcome = v.advance(0.5, Vec3::new(500.0, 0.0, 0.0), &pool, &mut sink);
        assert_eq!(outcome, TickOutcome::Skipped(SkipReason::Hidden));
        assert_eq!(sink.count(FxEventKind::LodChanged), 1);
        assert_eq!(sink.count(FxEventKind::TickSkipped), 1);
    }

    #[test]
    fn volume_without_particles_skips() {
        let mut v = volume();
        let pool = ParticlePool::with_capacity(1);
        let outcome = v.advance(0.05, Vec3::ZERO, &pool, &mut ());
        assert_eq!(outcome, TickOutcome::Skipped(SkipReason::NoParticles));
        assert!(v.mesh().is_empty());
    }

    #[test]
    fn cadence_follows_lod_interval() {
        let mut v = volume();
        let pool = pool_with_ball(&mut v, Vec3::ZERO);
        assert!(v.advance(0.015, Vec3::ZERO, &pool, &mut ()).ran());
        assert_eq!(v.advance(0.005, Vec3::ZERO, &pool, &mut ()), TickOutcome::NotDue);
        assert!((v.cadence().interval() - 0.015).abs() < 1e-6);
    }

    #[test]
    fn translation_is_tracked_and_resize_rebuilds() {
        let mut v = volume();
        let moved = BoundingBox::new(Vec3::X, Vec3::splat(2.0));
        assert_eq!(v.set_bounds(moved).unwrap(), BoundsChange::Moved);
        assert_eq!(v.channel().pending_movement(), Vec3::X);
        assert_eq!(v.set_bounds(moved).unwrap(), BoundsChange::Unchanged);

        let grown = BoundingBox::new(Vec3::X, Vec3::new(3.0, 2.0, 2.0));
        assert_eq!(v.set_bounds(grown).unwrap(), BoundsChange::Rebuilt);
        assert_eq!(v.grid().cell_count(), 6 * 4 * 4);
        assert_eq!(v.channel().pending_movement(), Vec3::ZERO);
    }

    #[test]
    fn resolution_change_rebuilds_only_when_different() {
        let mut v = volume();
        assert!(!v.set_resolution(2).unwrap());
        assert!(v.set_resolution(1).unwrap());
        assert_eq!(v.grid().corner_count(), 27);
        assert!(v.set_resolution(0).is_err());
    }

    fn assert_corners_follow_bounds(v: &MetaballVolume) {
        let expected = build_cube_grid(&v.bounds(), v.settings().resolution).unwrap();
        for (got, want) in v.grid().corners().iter().zip(expected.corners().iter()) {
            assert!(
                got.position.abs_diff_eq(want.position, 1e-5),
                "{} vs {}",
                got.position,
                want.position
            );
        }
    }

    #[test]
    fn device_failure_keeps_corners_on_moved_bounds() {
        let (device, switch) = flaky();
        let settings = VolumeSettings::new(unit_box()).with_resolution(2);
        let mut v = MetaballVolume::new(settings, device).unwrap();
        let pool = pool_with_ball(&mut v, Vec3::new(1.0, 0.5, 0.0));

        assert!(v.advance(0.02, Vec3::ZERO, &pool, &mut ()).ran());
        v.set_bounds(BoundingBox::new(Vec3::X, Vec3::splat(2.0))).unwrap();
        assert!(v.advance(0.02, Vec3::ZERO, &pool, &mut ()).ran());
        v.set_bounds(BoundingBox::new(Vec3::new(1.0, 1.0, 0.0), Vec3::splat(2.0)))
            .unwrap();

        switch.arm(FailAt::ReadCorners);
        let mut sink = VecSink::only([FxEventKind::DeviceFailed]);
        assert_eq!(
            v.advance(0.02, Vec3::ZERO, &pool, &mut sink),
            TickOutcome::DeviceFailed
        );
        assert_eq!(sink.len(), 1);
        assert!(v.mesh().is_empty());
        assert_corners_follow_bounds(&v);

        assert!(matches!(
            v.advance(0.02, Vec3::ZERO, &pool, &mut ()),
            TickOutcome::Updated { .. }
        ));
        let TickOutcome::Updated { triangles } = v.advance(0.02, Vec3::ZERO, &pool, &mut ())
        else {
            panic!("expected update after recovery");
        };
        assert!(triangles > 0);
        assert_corners_follow_bounds(&v);
    }

    #[test]
    fn failed_dispatch_is_retried_next_tick() {
        let (device, switch) = flaky();
        let settings = VolumeSettings::new(unit_box()).with_resolution(2);
        let mut v = MetaballVolume::new(settings, device).unwrap();
        let pool = pool_with_ball(&mut v, Vec3::ZERO);

        v.set_bounds(BoundingBox::new(Vec3::Z, Vec3::splat(2.0))).unwrap();
        switch.arm(FailAt::Dispatch);
        assert_eq!(
            v.advance(0.02, Vec3::ZERO, &pool, &mut ()),
            TickOutcome::DeviceFailed
        );
        assert_eq!(v.channel().pending_movement(), Vec3::ZERO);
        assert_corners_follow_bounds(&v);
        assert!(matches!(
            v.advance(0.02, Vec3::ZERO, &pool, &mut ()),
            TickOutcome::Updated { .. }
        ));
        assert_eq!(v.channel().phase(), ChannelPhase::AwaitingReadback);
    }

    #[test]
    fn disabled_volume_is_inactive() {
        let mut v = volume();
        let pool = pool_with_ball(&mut v, Vec3::ZERO);
        v.set_enabled(false);
        assert_eq!(v.advance(1.0, Vec3::ZERO, &pool, &mut ()), TickOutcome::Inactive);
    }

    #[test]
    fn release_forgets_particles() {
        let mut v = volume();
        let pool = pool_with_ball(&mut v, Vec3::ZERO);
        let id = v.particles()[0];
        assert!(pool.is_alive(id));
        assert!(v.release(id));
        assert!(!v.release(id));
        assert_eq!(v.particle_count(), 0);
    }
}
