//! The simulation context: one owner for the particle pool, the volumes and the decal pool.
//!
//! Hosts construct one [`FxContext`], feed it fire requests and collision events, and call
//! [`FxContext::advance`] once per frame.
use glam::Vec3;
use rand::rngs::StdRng;
use rand::SeedableRng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{info, trace, warn};

use crate::decal::{DecalPool, DecalSettings, StainOutcome, StainRequest, StainSource};
use crate::device::{cpu_factory, DeviceFactory};
use crate::error::{Error, Result};
use crate::events::{emit, EventSink, FxEvent, FxEventKind};
use crate::grid::frame::BoundingBox;
use crate::grid::probe::SurfaceProbe;
use crate::particle::collision::{
    apply_collision, BounceOutcome, CollisionEvent, CollisionFilter, IgnoreReason,
};
use crate::particle::pool::ParticlePool;
use crate::particle::{ParticleId, ParticleSettings, SpawnRequest};
use crate::scheduler::TickOutcome;
use crate::volume::{BoundsChange, MetaballVolume, VolumeId, VolumeSettings};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FxSettings {
    /// Maximum simultaneously live metaballs.
    pub pool_capacity: usize,
    pub particles: ParticleSettings,
    pub decals: DecalSettings,
    pub collision: CollisionFilter,
    /// Seed of the context RNG.
    pub seed: u64,
    /// Scale fired radii by the target volume's [`MetaballVolume::desired_particle_radius`].
    pub scale_to_volume: bool,
    /// Whether a first bounce requests a stain.
    pub stain_on_bounce: bool,
}

impl Default for FxSettings {
    fn default() -> Self {
        Self {
            pool_capacity: 256,
            particles: ParticleSettings::default(),
            decals: DecalSettings::default(),
            collision: CollisionFilter::default(),
            seed: 0,
            scale_to_volume: false,
            stain_on_bounce: true,
        }
    }
}

impl FxSettings {
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_particles(mut self, particles: ParticleSettings) -> Self {
        self.particles = particles;
        self
    }

    pub fn with_decals(mut self, decals: DecalSettings) -> Self {
        self.decals = decals;
        self
    }

    pub fn with_collision(mut self, collision: CollisionFilter) -> Self {
        self.collision = collision;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_scale_to_volume(mut self, scale: bool) -> Self {
        self.scale_to_volume = scale;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_capacity == 0 {
            return Err(Error::InvalidConfig("pool_capacity must be > 0".into()));
        }
        self.particles.validate()?;
        self.decals.validate()
    }
}

/// Summary of one [`FxContext::advance`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub retired: usize,
    pub live_particles: usize,
    pub volumes_updated: usize,
    pub volumes_skipped: usize,
    pub decals_updated: usize,
}

/// What a collision event did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionOutcome {
    pub bounce: BounceOutcome,
    pub stain: Option<StainOutcome>,
}

/// Owns every simulation unit. There is no global state; pass the context where it is needed.
pub struct FxContext {
    settings: FxSettings,
    pool: ParticlePool,
    volumes: Vec<Option<MetaballVolume>>,
    /// Slots of removed volumes, reused by the next [`FxContext::add_volume`].
    free_volumes: Vec<u32>,
    decals: DecalPool,
    factory: DeviceFactory,
    rng: StdRng,
}

impl FxContext {
    /// Context backed by host devices.
    pub fn new(settings: FxSettings) -> Result<Self> {
        Self::with_factory(settings, cpu_factory())
    }

    /// Context whose volumes and decals each get a device from `factory`.
    pub fn with_factory(settings: FxSettings, factory: DeviceFactory) -> Result<Self> {
        settings.validate()?;
        let pool = ParticlePool::try_new(settings.pool_capacity, settings.particles.clone())?;
        let decals = DecalPool::new(settings.decals.clone(), factory.clone())?;
        info!(
            "Created fx context: {} particles, {} decal grids.",
            settings.pool_capacity, settings.decals.capacity
        );
        Ok(Self {
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
            pool,
            volumes: Vec::new(),
            free_volumes: Vec::new(),
            decals,
            factory,
        })
    }

    pub fn settings(&self) -> &FxSettings {
        &self.settings
    }

    pub fn pool(&self) -> &ParticlePool {
        &self.pool
    }

    pub fn decals(&self) -> &DecalPool {
        &self.decals
    }

    pub fn decals_mut(&mut self) -> &mut DecalPool {
        &mut self.decals
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn set_particle_settings(&mut self, particles: ParticleSettings) -> Result<()> {
        self.pool.set_settings(particles.clone())?;
        self.settings.particles = particles;
        Ok(())
    }

    pub fn set_collision_filter(&mut self, filter: CollisionFilter) {
        self.settings.collision = filter;
    }

    pub fn add_volume(
        &mut self,
        settings: VolumeSettings,
        sink: &mut dyn EventSink,
    ) -> Result<VolumeId> {
        let mut volume = MetaballVolume::new(settings, (self.factory)()?)?;
        let id = match self.free_volumes.pop() {
            Some(index) => VolumeId(index),
            None => {
                self.volumes.push(None);
                VolumeId(self.volumes.len() as u32 - 1)
            }
        };
        volume.set_id(id);
        info!(
            "Added volume '{}' with {} cells.",
            volume.name(),
            volume.grid().cell_count()
        );
        self.volumes[id.index()] = Some(volume);
        emit(sink, FxEventKind::VolumeAdded, || FxEvent::VolumeAdded {
            volume: id,
        });
        Ok(id)
    }

    /// Unregisters a volume, retiring the particles it owns and releasing its device.
    /// Returns `false` for an unknown id. The id may be handed out again by a later
    /// [`FxContext::add_volume`].
    pub fn remove_volume(&mut self, id: VolumeId, sink: &mut dyn EventSink) -> bool {
        let Some(volume) = self.volumes.get_mut(id.index()).and_then(Option::take) else {
            return false;
        };
        for particle in volume.particles() {
            if self.pool.retire(*particle).is_some() {
                emit(sink, FxEventKind::ParticleRetired, || {
                    FxEvent::ParticleRetired {
                        particle: *particle,
                        owner: Some(id),
                    }
                });
            }
        }
        self.free_volumes.push(id.0);
        info!("Removed volume '{}'.", volume.name());
        emit(sink, FxEventKind::VolumeRemoved, || FxEvent::VolumeRemoved {
            volume: id,
        });
        true
    }

    pub fn volume(&self, id: VolumeId) -> Option<&MetaballVolume> {
        self.volumes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn volume_mut(&mut self, id: VolumeId) -> Option<&mut MetaballVolume> {
        self.volumes.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Registered volumes in id order.
    pub fn volumes(&self) -> impl Iterator<Item = &MetaballVolume> {
        self.volumes.iter().flatten()
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len() - self.free_volumes.len()
    }

    /// Moves or resizes a volume, reporting rebuilds.
    pub fn set_volume_bounds(
        &mut self,
        id: VolumeId,
        bounds: BoundingBox,
        sink: &mut dyn EventSink,
    ) -> Result<BoundsChange> {
        let volume = self
            .volumes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::Other(format!("unknown volume {}", id.index())))?;
        let change = volume.set_bounds(bounds)?;
        if change == BoundsChange::Rebuilt {
            let (corners, cells) = (volume.grid().corner_count(), volume.grid().cell_count());
            emit(sink, FxEventKind::VolumeRebuilt, || FxEvent::VolumeRebuilt {
                volume: id,
                corners,
                cells,
            });
        }
        Ok(change)
    }

    /// Fires one particle, owned by `volume` if given. Returns `None` when the pool is full.
    pub fn fire(
        &mut self,
        volume: Option<VolumeId>,
        request: &SpawnRequest,
        sink: &mut dyn EventSink,
    ) -> Option<ParticleId> {
        let mut request = *request;
        if let Some(id) = volume {
            let Some(target) = self.volumes.get(id.index()).and_then(Option::as_ref) else {
                warn!("Fire request for unknown volume {}.", id.index());
                emit(sink, FxEventKind::Warning, || FxEvent::Warning {
                    context: format!("volume {}", id.index()),
                    message: "fire request for unknown volume".into(),
                });
                return None;
            };
            if self.settings.scale_to_volume {
                request.radius *= target.desired_particle_radius();
            }
        }

        let Some(particle) = self.pool.fire(&request, volume) else {
            trace!("Particle pool exhausted; dropped fire request.");
            emit(sink, FxEventKind::FireDropped, || FxEvent::FireDropped {
                volume,
            });
            return None;
        };
        if let Some(target) = volume.and_then(|id| self.volume_mut(id)) {
            target.adopt(particle);
        }
        Some(particle)
    }

    /// Fires every request in order. Returns how many got a particle.
    pub fn fire_many(
        &mut self,
        volume: Option<VolumeId>,
        requests: impl IntoIterator<Item = SpawnRequest>,
        sink: &mut dyn EventSink,
    ) -> usize {
        let mut fired = 0;
        for request in requests {
            if self.fire(volume, &request, sink).is_some() {
                fired += 1;
            }
        }
        fired
    }

    /// Bounces the particle and, on its first accepted contact, stains the surface.
    pub fn handle_collision(
        &mut self,
        event: &CollisionEvent,
        probe: Option<&mut dyn SurfaceProbe>,
        sink: &mut dyn EventSink,
    ) -> Result<CollisionOutcome> {
        let Some(particle) = self.pool.get_mut(event.particle) else {
            return Ok(CollisionOutcome {
                bounce: BounceOutcome::Ignored(IgnoreReason::UnknownParticle),
                stain: None,
            });
        };
        let bounce = apply_collision(
            particle,
            event,
            &self.settings.collision,
            &self.settings.particles,
            &mut self.rng,
        );
        let owner = particle.owner();
        if !bounce.bounced() {
            return Ok(CollisionOutcome { bounce, stain: None });
        }

        emit(sink, FxEventKind::Bounced, || FxEvent::Bounced {
            particle: event.particle,
            contact_point: event.contact_point,
        });
        if !self.settings.stain_on_bounce {
            return Ok(CollisionOutcome { bounce, stain: None });
        }

        let material = owner
            .and_then(|id| self.volumes.get(id.index()))
            .and_then(Option::as_ref)
            .and_then(MetaballVolume::material);
        let request = StainRequest::new(
            event.contact_point,
            event.contact_normal,
            StainSource::Particle(event.particle),
        )
        .with_surface(event.other)
        .with_material(material);
        let stain = self
            .decals
            .request_stain(&request, probe, &mut self.rng, sink)?;
        Ok(CollisionOutcome {
            bounce,
            stain: Some(stain),
        })
    }

    pub fn request_stain(
        &mut self,
        request: &StainRequest,
        probe: Option<&mut dyn SurfaceProbe>,
        sink: &mut dyn EventSink,
    ) -> Result<StainOutcome> {
        self.decals
            .request_stain(request, probe, &mut self.rng, sink)
    }

    /// Advances the whole simulation by `dt` seconds.
    ///
    /// Particles integrate first, expired ones leave their volumes, then volumes tick, then
    /// decals tick.
    pub fn advance(&mut self, dt: f32, view_point: Vec3, sink: &mut dyn EventSink) -> FrameReport {
        let mut report = FrameReport::default();

        let retired = self.pool.step(dt);
        for r in &retired {
            let owner = r.owner.and_then(|id| self.volumes.get_mut(id.index()));
            if let Some(owner) = owner.and_then(Option::as_mut) {
                owner.release(r.id);
            }
            emit(sink, FxEventKind::ParticleRetired, || {
                FxEvent::ParticleRetired {
                    particle: r.id,
                    owner: r.owner,
                }
            });
        }
        report.retired = retired.len();
        report.live_particles = self.pool.active_count();

        for volume in self.volumes.iter_mut().flatten() {
            match volume.advance(dt, view_point, &self.pool, sink) {
                TickOutcome::Updated { .. } => report.volumes_updated += 1,
                TickOutcome::Skipped(_) => report.volumes_skipped += 1,
                _ => {}
            }
        }

        report.decals_updated = self.decals.advance(dt, sink);
        report
    }

    /// Retires every particle and frees every decal. Volumes stay registered.
    pub fn reset(&mut self) {
        self.pool.rebuild(self.settings.pool_capacity);
        for volume in self.volumes.iter_mut().flatten() {
            volume.clear_particles();
        }
        self.decals.reset();
    }
}

impl std::fmt::Debug for FxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FxContext")
            .field("settings", &self.settings)
            .field("live_particles", &self.pool.active_count())
            .field("volumes", &self.volume_count())
            .field("decals", &self.decals)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecSink;
    use crate::lod::LodSettings;

    fn calm() -> FxSettings {
        FxSettings::default()
            .with_pool_capacity(4)
            .with_particles(ParticleSettings::default().with_gravity(Vec3::ZERO, 0.0))
            .with_decals(DecalSettings::new(1.25, 8, 2))
            .with_seed(11)
    }

    fn volume_settings() -> VolumeSettings {
        VolumeSettings::new(BoundingBox::new(Vec3::ZERO, Vec3::splat(2.0)))
            .with_resolution(2)
            .with_material(Some(3))
    }

    fn ball() -> SpawnRequest {
        SpawnRequest::new(Vec3::ZERO, Vec3::ZERO)
            .with_radius(1.5)
            .with_life(1.0)
    }

    #[test]
    fn context_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FxContext>();
    }

    #[test]
    fn fire_adopts_into_volume_and_drops_when_full() {
        let mut fx = FxContext::new(calm()).unwrap();
        let mut sink = VecSink::new();
        let volume = fx.add_volume(volume_settings(), &mut sink).unwrap();
        assert_eq!(fx.fire_many(Some(volume), vec![ball(); 5], &mut sink), 4);
        assert_eq!(fx.volume(volume).unwrap().particle_count(), 4);
        assert_eq!(sink.count(FxEventKind::FireDropped), 1);
        assert_eq!(sink.count(FxEventKind::VolumeAdded), 1);
    }

    #[test]
    fn unknown_volume_rejects_fire() {
        let mut fx = FxContext::new(calm()).unwrap();
        assert!(fx.fire(Some(VolumeId::new(9)), &ball(), &mut ()).is_none());
        assert_eq!(fx.pool().active_count(), 0);
    }

    #[test]
    fn scale_to_volume_multiplies_radius() {
        let mut fx = FxContext::new(calm().with_scale_to_volume(true)).unwrap();
        let volume = fx.add_volume(volume_settings(), &mut ()).unwrap();
        let id = fx.fire(Some(volume), &ball(), &mut ()).unwrap();
        let radius = fx.pool().get(id).unwrap().base_radius();
        assert!((radius - 1.5 * 0.9375).abs() < 1e-6);
    }

    #[test]
    fn expired_particles_leave_their_volume() {
        let mut fx = FxContext::new(calm()).unwrap();
        let volume = fx.add_volume(volume_settings(), &mut ()).unwrap();
        fx.fire(Some(volume), &ball(), &mut ()).unwrap();

        let mut sink = VecSink::only([FxEventKind::ParticleRetired]);
        let mut retired = 0;
        for _ in 0..11 {
            retired += fx.advance(0.1, Vec3::ZERO, &mut sink).retired;
        }
        assert_eq!(retired, 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(fx.volume(volume).unwrap().particle_count(), 0);
    }

    #[test]
    fn volumes_mesh_on_the_second_tick() {
        let mut fx = FxContext::new(calm()).unwrap();
        let volume = fx.add_volume(volume_settings(), &mut ()).unwrap();
        fx.fire(Some(volume), &ball().with_life(10.0), &mut ()).unwrap();

        let first = fx.advance(0.02, Vec3::ZERO, &mut ());
        assert_eq!(first.volumes_updated, 1);
        assert!(fx.volume(volume).unwrap().mesh().is_empty());
        fx.advance(0.02, Vec3::ZERO, &mut ());
        assert!(!fx.volume(volume).unwrap().mesh().is_empty());
    }

    #[test]
    fn hidden_volume_counts_as_skipped() {
        let mut fx = FxContext::new(calm()).unwrap();
        let settings = volume_settings().with_lod(LodSettings::new(10.0, 0.015, 0.2));
        let volume = fx.add_volume(settings, &mut ()).unwrap();
        fx.fire(Some(volume), &ball().with_life(10.0), &mut ()).unwrap();
        let report = fx.advance(0.5, Vec3::new(0.0, 0.0, 50.0), &mut ());
        assert_eq!(report.volumes_skipped, 1);
        assert_eq!(report.volumes_updated, 0);
    }

    #[test]
    fn first_bounce_stains_with_volume_material() {
        let mut fx = FxContext::new(calm()).unwrap();
        let volume = fx.add_volume(volume_settings(), &mut ()).unwrap();
        let id = fx.fire(Some(volume), &ball(), &mut ()).unwrap();
        let hit = CollisionEvent::new(id, Vec3::new(0.0, -1.0, 0.0), Vec3::Y)
            .with_relative_velocity(Vec3::new(0.0, 6.0, 0.0));

        let mut sink = VecSink::only([FxEventKind::Bounced, FxEventKind::StainPlaced]);
        let first = fx.handle_collision(&hit, None, &mut sink).unwrap();
        assert!(first.bounce.bounced());
        let stain = first.stain.unwrap();
        assert_eq!(fx.decals().get(stain.grid()).unwrap().material(), Some(3));

        let second = fx.handle_collision(&hit, None, &mut sink).unwrap();
        assert_eq!(
            second.bounce,
            BounceOutcome::Ignored(IgnoreReason::AlreadyBounced)
        );
        assert!(second.stain.is_none());
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn excluded_layer_neither_bounces_nor_stains() {
        let mut fx = FxContext::new(calm()).unwrap();
        let id = fx.fire(None, &ball(), &mut ()).unwrap();
        let hit = CollisionEvent::new(id, Vec3::ZERO, Vec3::Y).with_surface(Default::default(), 10);
        let outcome = fx.handle_collision(&hit, None, &mut ()).unwrap();
        assert_eq!(
            outcome.bounce,
            BounceOutcome::Ignored(IgnoreReason::ExcludedLayer)
        );
        assert_eq!(fx.decals().active_count(), 0);
    }

    #[test]
    fn stale_particle_ids_are_ignored() {
        let mut fx = FxContext::new(calm()).unwrap();
        let id = fx.fire(None, &ball().with_life(0.05), &mut ()).unwrap();
        fx.advance(0.1, Vec3::ZERO, &mut ());
        let hit = CollisionEvent::new(id, Vec3::ZERO, Vec3::Y);
        let outcome = fx.handle_collision(&hit, None, &mut ()).unwrap();
        assert_eq!(
            outcome.bounce,
            BounceOutcome::Ignored(IgnoreReason::UnknownParticle)
        );
    }

    #[test]
    fn resizing_a_volume_reports_rebuild() {
        let mut fx = FxContext::new(calm()).unwrap();
        let volume = fx.add_volume(volume_settings(), &mut ()).unwrap();
        let mut sink = VecSink::only([FxEventKind::VolumeRebuilt]);
        let bigger = BoundingBox::new(Vec3::ZERO, Vec3::splat(3.0));
        assert_eq!(
            fx.set_volume_bounds(volume, bigger, &mut sink).unwrap(),
            BoundsChange::Rebuilt
        );
        assert_eq!(sink.len(), 1);
        assert!(fx.set_volume_bounds(VolumeId::new(7), bigger, &mut sink).is_err());
    }

    #[test]
    fn reset_clears_particles_and_decals() {
        let mut fx = FxContext::new(calm()).unwrap();
        let volume = fx.add_volume(volume_settings(), &mut ()).unwrap();
        fx.fire(Some(volume), &ball(), &mut ()).unwrap();
        fx.request_stain(
            &StainRequest::new(Vec3::ZERO, Vec3::Y, StainSource::External),
            None,
            &mut (),
        )
        .unwrap();
        fx.reset();
        assert_eq!(fx.pool().active_count(), 0);
        assert_eq!(fx.volume(volume).unwrap().particle_count(), 0);
        assert_eq!(fx.decals().active_count(), 0);
    }

    #[test]
    fn reset_invalidates_particle_ids() {
        let mut fx = FxContext::new(calm()).unwrap();
        let old = fx.fire(None, &ball(), &mut ()).unwrap();
        fx.reset();
        let new = fx.fire(None, &ball(), &mut ()).unwrap();
        assert_ne!(old, new);
        assert!(fx.pool().get(old).is_none());
        let hit = CollisionEvent::new(old, Vec3::ZERO, Vec3::Y);
        let outcome = fx.handle_collision(&hit, None, &mut ()).unwrap();
        assert_eq!(
            outcome.bounce,
            BounceOutcome::Ignored(IgnoreReason::UnknownParticle)
        );
    }

    #[test]
    fn removed_volume_retires_its_particles_and_frees_its_slot() {
        let mut fx = FxContext::new(calm()).unwrap();
        let first = fx.add_volume(volume_settings(), &mut ()).unwrap();
        let second = fx.add_volume(volume_settings(), &mut ()).unwrap();
        fx.fire_many(Some(first), vec![ball(); 2], &mut ());
        fx.fire(Some(second), &ball(), &mut ()).unwrap();

        let mut sink = VecSink::only([FxEventKind::VolumeRemoved, FxEventKind::ParticleRetired]);
        assert!(fx.remove_volume(first, &mut sink));
        assert!(!fx.remove_volume(first, &mut sink));
        assert_eq!(sink.count(FxEventKind::VolumeRemoved), 1);
        assert_eq!(sink.count(FxEventKind::ParticleRetired), 2);
        assert!(fx.volume(first).is_none());
        assert_eq!(fx.volume_count(), 1);
        assert_eq!(fx.pool().active_count(), 1);
        assert!(fx.fire(Some(first), &ball(), &mut ()).is_none());

        let reused = fx.add_volume(volume_settings(), &mut ()).unwrap();
        assert_eq!(reused, first);
        assert_eq!(fx.volume(reused).unwrap().particle_count(), 0);
        assert_eq!(fx.volumes().count(), 2);
        assert_eq!(fx.advance(0.02, Vec3::ZERO, &mut ()).volumes_updated, 1);
    }
}
