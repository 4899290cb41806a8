//! Metaball particles: spawning, integration, lifetime taper, and collision response.
//!
//! - [`pool::ParticlePool`]: bounded generational storage
//! - [`collision`]: external collision events, layer filtering, bounce re-projection
//! - [`emitter`]: fountain and splash spawn patterns
use glam::Vec3;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::field::DensitySource;
use crate::volume::VolumeId;

pub mod collision;
pub mod emitter;
pub mod pool;

/// Generational handle to a pooled particle. Stale handles never alias a newer particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticleId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ParticleId {
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Semi-implicit Euler step shared by host and device physics.
///
/// Applies drag, then acceleration, then moves by the new velocity.
#[inline]
pub fn integrate_motion(
    position: Vec3,
    velocity: Vec3,
    acceleration: Vec3,
    drag: f32,
    dt: f32,
) -> (Vec3, Vec3) {
    let mut velocity = velocity - velocity * drag * dt;
    velocity += acceleration * dt;
    (position + velocity * dt, velocity)
}

/// Integration and collision constants shared by all pooled particles.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParticleSettings {
    /// Field gravity direction and magnitude.
    pub gravity: Vec3,
    /// Scale applied to `gravity`.
    pub gravity_intensity: f32,
    /// Fraction of velocity removed per second.
    pub drag: f32,
    /// Default radius multiplier applied on each bounce.
    pub viscosity: f32,
    /// Bounce speed gain range, as fractions of half the impact speed.
    pub bounce_gain: (f32, f32),
}

impl Default for ParticleSettings {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            gravity_intensity: 1.0,
            drag: 0.0,
            viscosity: 0.95,
            bounce_gain: (0.5, 0.75),
        }
    }
}

impl ParticleSettings {
    pub fn with_gravity(mut self, gravity: Vec3, intensity: f32) -> Self {
        self.gravity = gravity;
        self.gravity_intensity = intensity;
        self
    }

    pub fn with_drag(mut self, drag: f32) -> Self {
        self.drag = drag;
        self
    }

    pub fn with_viscosity(mut self, viscosity: f32) -> Self {
        self.viscosity = viscosity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.gravity.is_finite() {
            return Err(Error::InvalidConfig("gravity must be finite".into()));
        }
        if self.drag < 0.0 {
            return Err(Error::InvalidConfig("drag must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&self.viscosity) {
            return Err(Error::InvalidConfig("viscosity must be in [0, 1]".into()));
        }
        if self.bounce_gain.0 > self.bounce_gain.1 {
            return Err(Error::InvalidConfig(
                "bounce_gain must be an ascending range".into(),
            ));
        }
        Ok(())
    }
}

/// Parameters for firing one particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnRequest {
    pub origin: Vec3,
    /// Launch direction; normalized on spawn. Zero means no initial velocity.
    pub direction: Vec3,
    pub speed: f32,
    pub radius: f32,
    /// Seconds until the particle is retired.
    pub life: f32,
    /// Overrides [`ParticleSettings::viscosity`] for this particle.
    pub viscosity: Option<f32>,
}

impl SpawnRequest {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            speed: 3.0,
            radius: 1.5,
            life: 10.0,
            viscosity: None,
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_life(mut self, life: f32) -> Self {
        self.life = life;
        self
    }

    pub fn with_viscosity(mut self, viscosity: f32) -> Self {
        self.viscosity = Some(viscosity);
        self
    }

    pub fn velocity(&self) -> Vec3 {
        self.direction.normalize_or_zero() * self.speed
    }
}

/// A live metaball.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub position: Vec3,
    pub velocity: Vec3,
    base_radius: f32,
    life: f32,
    viscosity: f32,
    bounced: bool,
    owner: Option<VolumeId>,
}

impl Particle {
    pub(crate) fn spawn(request: &SpawnRequest, viscosity: f32, owner: Option<VolumeId>) -> Self {
        Self {
            position: request.origin,
            velocity: request.velocity(),
            base_radius: request.radius.max(0.0),
            life: request.life,
            viscosity: request.viscosity.unwrap_or(viscosity),
            bounced: false,
            owner,
        }
    }

    /// Effective radius: the base radius tapered linearly over the last second of life.
    pub fn radius(&self) -> f32 {
        if self.life <= 0.0 {
            return 0.0;
        }
        self.base_radius * self.life.min(1.0)
    }

    /// Radius before lifetime taper; shrinks permanently on bounce.
    pub fn base_radius(&self) -> f32 {
        self.base_radius
    }

    pub fn life(&self) -> f32 {
        self.life
    }

    pub fn viscosity(&self) -> f32 {
        self.viscosity
    }

    /// Whether this particle already bounced since it was fired.
    pub fn bounced(&self) -> bool {
        self.bounced
    }

    pub fn owner(&self) -> Option<VolumeId> {
        self.owner
    }

    pub fn is_expired(&self) -> bool {
        self.life <= 0.0
    }

    pub fn source(&self) -> DensitySource {
        DensitySource::new(self.position, self.radius())
    }

    /// Advances motion and lifetime by `dt`. Returns `false` once the particle has expired.
    pub fn step(&mut self, dt: f32, settings: &ParticleSettings) -> bool {
        let (position, velocity) = integrate_motion(
            self.position,
            self.velocity,
            settings.gravity * settings.gravity_intensity,
            settings.drag,
            dt,
        );
        self.position = position;
        self.velocity = velocity;
        self.life -= dt;
        !self.is_expired()
    }

    pub(crate) fn mark_bounced(&mut self) {
        self.bounced = true;
        self.base_radius *= self.viscosity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrate_applies_drag_then_gravity() {
        let (p, v) = integrate_motion(Vec3::ZERO, Vec3::X * 2.0, Vec3::NEG_Y, 0.5, 1.0);
        assert_eq!(v, Vec3::new(1.0, -1.0, 0.0));
        assert_eq!(p, v);
    }

    #[test]
    fn spawn_normalizes_direction() {
        let request = SpawnRequest::new(Vec3::ZERO, Vec3::new(0.0, 10.0, 0.0)).with_speed(4.0);
        let particle = Particle::spawn(&request, 0.95, None);
        assert_eq!(particle.velocity, Vec3::new(0.0, 4.0, 0.0));
        let still = Particle::spawn(&SpawnRequest::new(Vec3::ZERO, Vec3::ZERO), 0.95, None);
        assert_eq!(still.velocity, Vec3::ZERO);
    }

    #[test]
    fn radius_tapers_over_last_second() {
        let request = SpawnRequest::new(Vec3::ZERO, Vec3::ZERO)
            .with_radius(2.0)
            .with_life(1.5);
        let mut particle = Particle::spawn(&request, 0.95, None);
        let settings = ParticleSettings::default().with_gravity(Vec3::ZERO, 0.0);
        assert_eq!(particle.radius(), 2.0);
        particle.step(1.0, &settings);
        assert!((particle.radius() - 1.0).abs() < 1e-6);
        assert!(!particle.step(0.5, &settings));
        assert_eq!(particle.radius(), 0.0);
    }

    #[test]
    fn request_viscosity_overrides_default() {
        let request = SpawnRequest::new(Vec3::ZERO, Vec3::ZERO).with_viscosity(0.5);
        let mut particle = Particle::spawn(&request, 0.95, None);
        particle.mark_bounced();
        assert_eq!(particle.base_radius(), 0.75);
        assert!(particle.bounced());
    }

    #[test]
    fn settings_validation_rejects_bad_values() {
        assert!(ParticleSettings::default().validate().is_ok());
        assert!(ParticleSettings::default()
            .with_viscosity(1.5)
            .validate()
            .is_err());
        assert!(ParticleSettings::default().with_drag(-1.0).validate().is_err());
    }
}
