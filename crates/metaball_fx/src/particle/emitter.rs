//! Spawn patterns that produce [`SpawnRequest`]s.
//!
//! Emitters never touch a pool. Callers feed the requests to
//! [`crate::context::FxContext::fire_many`] or a pool of their own.
use glam::{Quat, Vec3};
use rand::RngCore;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::SpawnRequest;
use crate::error::{Error, Result};
use crate::random::rand_range;

/// Ranges for a [`Fountain`] stream.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FountainSettings {
    /// Seconds between releases, sampled per release.
    pub rate: (f32, f32),
    pub speed: (f32, f32),
    pub size: (f32, f32),
    pub life: f32,
    /// Sideways spread added to the emitter's up axis.
    pub jitter: f32,
}

impl Default for FountainSettings {
    fn default() -> Self {
        Self {
            rate: (0.05, 0.2),
            speed: (4.0, 8.0),
            size: (0.2, 0.5),
            life: 2.0,
            jitter: 0.5,
        }
    }
}

impl FountainSettings {
    pub fn with_rate(mut self, min: f32, max: f32) -> Self {
        self.rate = (min, max);
        self
    }

    pub fn with_speed(mut self, min: f32, max: f32) -> Self {
        self.speed = (min, max);
        self
    }

    pub fn with_size(mut self, min: f32, max: f32) -> Self {
        self.size = (min, max);
        self
    }

    pub fn with_life(mut self, life: f32) -> Self {
        self.life = life;
        self
    }

    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, (min, max)) in [("rate", self.rate), ("speed", self.speed), ("size", self.size)]
        {
            if !(min.is_finite() && max.is_finite()) || min < 0.0 || min > max {
                return Err(Error::InvalidConfig(format!(
                    "fountain {name} must be a non-negative ascending range"
                )));
            }
        }
        if self.rate.0 <= 0.0 {
            return Err(Error::InvalidConfig("fountain rate must be > 0".into()));
        }
        if self.life <= 0.0 {
            return Err(Error::InvalidConfig("fountain life must be > 0".into()));
        }
        if self.jitter < 0.0 {
            return Err(Error::InvalidConfig("fountain jitter must be >= 0".into()));
        }
        Ok(())
    }
}

/// A continuous metaball stream, released along the local up axis.
#[derive(Debug, Clone)]
pub struct Fountain {
    settings: FountainSettings,
    pub position: Vec3,
    pub rotation: Quat,
    active: bool,
    timer: f32,
    flow_remaining: f32,
}

impl Fountain {
    pub fn new(position: Vec3, rotation: Quat, settings: FountainSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            position,
            rotation,
            active: true,
            timer: 0.1,
            flow_remaining: 0.0,
        })
    }

    pub fn settings(&self) -> &FountainSettings {
        &self.settings
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Releases immediately and keeps flowing for `seconds`, then stops.
    pub fn flow_for(&mut self, seconds: f32) {
        self.timer = 0.0;
        self.active = true;
        self.flow_remaining = seconds;
    }

    fn request(&self, rng: &mut dyn RngCore) -> SpawnRequest {
        let s = &self.settings;
        let mut direction = self.rotation * Vec3::Y;
        direction += self.rotation * Vec3::X * rand_range(rng, -s.jitter, s.jitter);
        direction += self.rotation * Vec3::Z * rand_range(rng, -s.jitter, s.jitter);
        SpawnRequest::new(self.position, direction)
            .with_speed(rand_range(rng, s.speed.0, s.speed.1))
            .with_radius(rand_range(rng, s.size.0, s.size.1))
            .with_life(s.life)
    }

    /// `n` releases at once. Resets the stream timer.
    pub fn burst(&mut self, n: usize, rng: &mut dyn RngCore) -> Vec<SpawnRequest> {
        let requests = (0..n).map(|_| self.request(rng)).collect();
        self.timer = rand_range(rng, self.settings.rate.0, self.settings.rate.1);
        requests
    }

    /// Advances the stream. Releases at most once per call.
    pub fn tick(&mut self, dt: f32, rng: &mut dyn RngCore) -> Option<SpawnRequest> {
        if self.flow_remaining > 0.0 {
            self.flow_remaining -= dt;
            self.active = self.flow_remaining > 0.0;
        }
        if !self.active {
            return None;
        }
        self.timer -= dt;
        if self.timer > 0.0 {
            return None;
        }
        let request = self.request(rng);
        self.timer = rand_range(rng, self.settings.rate.0, self.settings.rate.1);
        Some(request)
    }
}

/// A one-shot ring of releases around the emitter's forward axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splash {
    pub position: Vec3,
    pub rotation: Quat,
    pub count: u32,
    pub speed: f32,
    pub size: f32,
}

impl Splash {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        let fountain = FountainSettings::default();
        Self {
            position,
            rotation,
            count: 12,
            speed: fountain.speed.1,
            size: fountain.size.1,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        let axis = self.rotation * Vec3::Z;
        let up = self.rotation * Vec3::Y;
        let step = std::f32::consts::TAU / self.count.max(1) as f32;
        (0..self.count)
            .map(|i| {
                let direction = Quat::from_axis_angle(axis, step * i as f32) * up;
                SpawnRequest::new(self.position, direction)
                    .with_speed(self.speed)
                    .with_radius(self.size)
            })
            .collect()
    }
}
