//! Fixed-capacity particle storage with generational handles.
use tracing::trace;

use super::{Particle, ParticleId, ParticleSettings, SpawnRequest};
use crate::error::Result;
use crate::field::DensitySource;
use crate::volume::VolumeId;

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    particle: Option<Particle>,
}

/// A particle that was retired during [`ParticlePool::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retired {
    pub id: ParticleId,
    pub owner: Option<VolumeId>,
}

/// Bounded pool. Firing into a full pool is refused rather than blocking or growing.
#[derive(Debug, Clone)]
pub struct ParticlePool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    settings: ParticleSettings,
    /// Generation given to slots created by [`ParticlePool::rebuild`]. Stays above every
    /// generation ever handed out, so ids from before a rebuild never resolve again.
    generation_floor: u32,
}

impl ParticlePool {
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(capacity, ParticleSettings::default())
    }

    pub fn try_new(capacity: usize, settings: ParticleSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self::build(capacity, settings))
    }

    fn build(capacity: usize, settings: ParticleSettings) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                particle: None,
            })
            .collect();
        // Reversed so that `pop` hands out low indices first.
        let free = (0..capacity as u32).rev().collect();
        Self {
            slots,
            free,
            settings,
            generation_floor: 0,
        }
    }

    pub fn settings(&self) -> &ParticleSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: ParticleSettings) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Takes a free slot and launches a particle from it. Returns `None` if the pool is full.
    pub fn fire(&mut self, request: &SpawnRequest, owner: Option<VolumeId>) -> Option<ParticleId> {
        let index = self.free.pop()?;
        let slot = &mut self.slots[index as usize];
        slot.particle = Some(Particle::spawn(request, self.settings.viscosity, owner));
        Some(ParticleId {
            index,
            generation: slot.generation,
        })
    }

    /// Frees the particle's slot. Returns the particle if `id` was live.
    pub fn retire(&mut self, id: ParticleId) -> Option<Particle> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let particle = slot.particle.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(particle)
    }

    pub fn get(&self, id: ParticleId) -> Option<&Particle> {
        self.slots
            .get(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.particle.as_ref())
    }

    pub fn get_mut(&mut self, id: ParticleId) -> Option<&mut Particle> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.particle.as_mut())
    }

    pub fn is_alive(&self, id: ParticleId) -> bool {
        self.get(id).is_some()
    }

    /// Live particles in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ParticleId, &Particle)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.particle.as_ref().map(|p| {
                (
                    ParticleId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    p,
                )
            })
        })
    }

    /// Density sources for `ids`, skipping any that are no longer live.
    pub fn sources(&self, ids: &[ParticleId]) -> Vec<DensitySource> {
        ids.iter()
            .filter_map(|&id| self.get(id))
            .map(Particle::source)
            .collect()
    }

    /// Integrates every live particle and retires the expired ones.
    pub fn step(&mut self, dt: f32) -> Vec<Retired> {
        let mut expired = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(particle) = slot.particle.as_mut() {
                if !particle.step(dt, &self.settings) {
                    expired.push(Retired {
                        id: ParticleId {
                            index: index as u32,
                            generation: slot.generation,
                        },
                        owner: particle.owner(),
                    });
                }
            }
        }
        for retired in &expired {
            self.retire(retired.id);
        }
        if !expired.is_empty() {
            trace!("Retired {} particles.", expired.len());
        }
        expired
    }

    /// Retires everything and resizes the pool to `capacity`. Ids from before stay stale.
    pub fn rebuild(&mut self, capacity: usize) {
        let floor = self
            .slots
            .iter()
            .map(|s| s.generation.wrapping_add(1))
            .fold(self.generation_floor, u32::max);
        self.slots.truncate(capacity);
        for slot in &mut self.slots {
            slot.generation = slot.generation.wrapping_add(1);
            slot.particle = None;
        }
        self.slots.resize_with(capacity, || Slot {
            generation: floor,
            particle: None,
        });
        self.free = (0..capacity as u32).rev().collect();
        self.generation_floor = floor;
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn still(life: f32) -> SpawnRequest {
        SpawnRequest::new(Vec3::ZERO, Vec3::ZERO)
            .with_life(life)
            .with_radius(1.0)
    }

    fn no_gravity() -> ParticleSettings {
        ParticleSettings::default().with_gravity(Vec3::ZERO, 0.0)
    }

    #[test]
    fn pool_refuses_fire_beyond_capacity() {
        let mut pool = ParticlePool::with_capacity(3);
        for _ in 0..3 {
            assert!(pool.fire(&still(5.0), None).is_some());
        }
        assert!(pool.is_full());
        assert!(pool.fire(&still(5.0), None).is_none());
        assert_eq!(pool.active_count(), 3);
    }

    #[test]
    fn stale_ids_do_not_alias_reused_slots() {
        let mut pool = ParticlePool::with_capacity(1);
        let first = pool.fire(&still(5.0), None).unwrap();
        pool.retire(first).unwrap();
        let second = pool.fire(&still(5.0), None).unwrap();
        assert_eq!(first.index(), second.index());
        assert!(!pool.is_alive(first));
        assert!(pool.is_alive(second));
        assert!(pool.retire(first).is_none());
    }

    #[test]
    fn particle_retires_within_one_step_of_its_life() {
        let mut pool = ParticlePool::try_new(4, no_gravity()).unwrap();
        let id = pool.fire(&still(1.0), None).unwrap();
        let dt = 0.1;
        let mut elapsed = 0.0;
        let mut retired = Vec::new();
        while retired.is_empty() && elapsed < 5.0 {
            retired = pool.step(dt);
            elapsed += dt;
        }
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].id, id);
        assert!((elapsed - 1.0).abs() <= dt + 1e-4);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn sources_skip_dead_particles() {
        let mut pool = ParticlePool::try_new(2, no_gravity()).unwrap();
        let a = pool.fire(&still(5.0), None).unwrap();
        let b = pool.fire(&still(5.0), None).unwrap();
        pool.retire(a);
        let sources = pool.sources(&[a, b]);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].radius, 1.0);
    }

    #[test]
    fn rebuild_resizes_and_clears() {
        let mut pool = ParticlePool::with_capacity(2);
        pool.fire(&still(5.0), None);
        pool.rebuild(5);
        assert_eq!(pool.capacity(), 5);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn rebuild_invalidates_ids_from_before() {
        let mut pool = ParticlePool::with_capacity(2);
        let before = pool.fire(&still(5.0), None).unwrap();
        pool.rebuild(2);
        let after = pool.fire(&still(5.0), None).unwrap();
        assert_eq!(before.index(), after.index());
        assert!(pool.get(before).is_none());
        assert!(pool.retire(before).is_none());
        assert!(pool.is_alive(after));
    }

    #[test]
    fn shrink_then_grow_does_not_revive_old_ids() {
        let mut pool = ParticlePool::with_capacity(3);
        let ids: Vec<_> = (0..3).map(|_| pool.fire(&still(5.0), None).unwrap()).collect();
        pool.rebuild(1);
        pool.rebuild(3);
        let fresh: Vec<_> = (0..3).map(|_| pool.fire(&still(5.0), None).unwrap()).collect();
        for old in &ids {
            assert!(pool.get(*old).is_none());
        }
        for id in &fresh {
            assert!(pool.is_alive(*id));
        }
    }

    #[test]
    fn step_reports_owner_of_retired_particles() {
        let mut pool = ParticlePool::try_new(1, no_gravity()).unwrap();
        let owner = VolumeId::new(3);
        pool.fire(&still(0.05), Some(owner));
        let retired = pool.step(0.1);
        assert_eq!(retired[0].owner, Some(owner));
    }
}
