//! Collision response for metaballs hitting external geometry.
//!
//! Collision detection belongs to the host engine; this module only consumes the resulting
//! [`CollisionEvent`]s. The first accepted contact after a particle is fired shrinks it, kicks it
//! sideways along the contact plane, and asks for a stain at the contact point.
use glam::{Quat, Vec3};
use rand::RngCore;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{Particle, ParticleId, ParticleSettings};
use crate::random::{rand01, rand_range};

/// Opaque id of the surface a particle collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SurfaceId(pub u64);

/// A contact reported by the host physics engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionEvent {
    pub particle: ParticleId,
    pub contact_point: Vec3,
    pub contact_normal: Vec3,
    pub relative_velocity: Vec3,
    pub other: SurfaceId,
    pub other_layer: u32,
}

impl CollisionEvent {
    pub fn new(particle: ParticleId, contact_point: Vec3, contact_normal: Vec3) -> Self {
        Self {
            particle,
            contact_point,
            contact_normal,
            relative_velocity: Vec3::ZERO,
            other: SurfaceId::default(),
            other_layer: 0,
        }
    }

    pub fn with_relative_velocity(mut self, relative_velocity: Vec3) -> Self {
        self.relative_velocity = relative_velocity;
        self
    }

    pub fn with_surface(mut self, other: SurfaceId, layer: u32) -> Self {
        self.other = other;
        self.other_layer = layer;
        self
    }
}

/// Physics layers whose contacts never bounce or stain.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollisionFilter {
    pub excluded_layers: Vec<u32>,
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self {
            excluded_layers: vec![4, 10],
        }
    }
}

impl CollisionFilter {
    /// A filter that accepts every layer.
    pub fn accept_all() -> Self {
        Self {
            excluded_layers: Vec::new(),
        }
    }

    pub fn exclude(mut self, layer: u32) -> Self {
        if !self.excluded_layers.contains(&layer) {
            self.excluded_layers.push(layer);
        }
        self
    }

    pub fn accepts(&self, layer: u32) -> bool {
        !self.excluded_layers.contains(&layer)
    }
}

/// Why a collision had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    ExcludedLayer,
    AlreadyBounced,
    UnknownParticle,
}

/// Result of feeding one [`CollisionEvent`] to a particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BounceOutcome {
    /// The particle bounced; `boost` was added to its velocity.
    Bounced { boost: Vec3 },
    Ignored(IgnoreReason),
}

impl BounceOutcome {
    pub fn bounced(&self) -> bool {
        matches!(self, BounceOutcome::Bounced { .. })
    }
}

/// Random unit vector perpendicular to `normal`.
fn contact_tangent(normal: Vec3, rng: &mut dyn RngCore) -> Vec3 {
    let normal = normal.normalize_or(Vec3::Y);
    let angle = rand01(rng) * std::f32::consts::TAU;
    Quat::from_axis_angle(normal, angle) * normal.any_orthonormal_vector()
}

/// Applies a collision to `particle`.
pub fn apply_collision(
    particle: &mut Particle,
    event: &CollisionEvent,
    filter: &CollisionFilter,
    settings: &ParticleSettings,
    rng: &mut dyn RngCore,
) -> BounceOutcome {
    if !filter.accepts(event.other_layer) {
        return BounceOutcome::Ignored(IgnoreReason::ExcludedLayer);
    }
    if particle.bounced() {
        return BounceOutcome::Ignored(IgnoreReason::AlreadyBounced);
    }

    let impact = (event.relative_velocity * 0.5).length();
    let (low, high) = settings.bounce_gain;
    let gain = rand_range(rng, impact * low, impact * high);
    let boost = contact_tangent(event.contact_normal, rng) * gain;
    particle.velocity += boost;
    particle.mark_bounced();
    BounceOutcome::Bounced { boost }
}
