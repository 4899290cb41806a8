//! Surface probing used to decide which decal cells have something underneath them.
use glam::Vec3;
use mint::Vector3;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A successful probe result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeHit {
    /// Hit point on the surface.
    pub point: Vector3<f32>,
    /// Surface normal at the hit point.
    pub normal: Vector3<f32>,
}

impl ProbeHit {
    pub fn new(point: impl Into<Vector3<f32>>, normal: impl Into<Vector3<f32>>) -> Self {
        Self {
            point: point.into(),
            normal: normal.into(),
        }
    }
}

/// Short-range directional raycast against world geometry.
///
/// Implementations typically wrap a physics engine query filtered to the layers a stain may
/// stick to.
pub trait SurfaceProbe {
    fn probe(
        &mut self,
        origin: Vector3<f32>,
        direction: Vector3<f32>,
        max_distance: f32,
    ) -> Option<ProbeHit>;
}

impl<F> SurfaceProbe for F
where
    F: FnMut(Vector3<f32>, Vector3<f32>, f32) -> Option<ProbeHit>,
{
    fn probe(
        &mut self,
        origin: Vector3<f32>,
        direction: Vector3<f32>,
        max_distance: f32,
    ) -> Option<ProbeHit> {
        self(origin, direction, max_distance)
    }
}

/// Distances used when probing each decal cell.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProbeSettings {
    /// How far above the cell (along the decal normal) the ray starts.
    pub lift: f32,
    /// Maximum ray length.
    pub reach: f32,
    /// Distance the cell is pushed off the hit surface.
    pub surface_offset: f32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            lift: 0.052,
            reach: 0.41,
            surface_offset: 0.012,
        }
    }
}

impl ProbeSettings {
    pub fn new(lift: f32, reach: f32, surface_offset: f32) -> Self {
        Self {
            lift,
            reach,
            surface_offset,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.reach <= 0.0 {
            return Err(Error::InvalidConfig("probe reach must be > 0".into()));
        }
        if self.lift < 0.0 || self.surface_offset < 0.0 {
            return Err(Error::InvalidConfig(
                "probe lift and surface_offset must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

/// Infinite plane, optionally limited to a disc radius around `point`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneProbe {
    pub point: Vec3,
    pub normal: Vec3,
    /// Hits farther than this from `point` miss. `None` means unbounded.
    pub radius: Option<f32>,
}

impl PlaneProbe {
    pub fn new(point: Vec3, normal: Vec3) -> Self {
        Self {
            point,
            normal: normal.normalize_or_zero(),
            radius: None,
        }
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = Some(radius);
        self
    }
}

impl SurfaceProbe for PlaneProbe {
    fn probe(
        &mut self,
        origin: Vector3<f32>,
        direction: Vector3<f32>,
        max_distance: f32,
    ) -> Option<ProbeHit> {
        let origin = Vec3::from(origin);
        let direction = Vec3::from(direction).normalize_or_zero();
        let denom = direction.dot(self.normal);
        if denom.abs() < 1e-6 {
            return None;
        }
        let t = (self.point - origin).dot(self.normal) / denom;
        if !(0.0..=max_distance).contains(&t) {
            return None;
        }
        let point = origin + direction * t;
        if let Some(radius) = self.radius {
            if point.distance(self.point) > radius {
                return None;
            }
        }
        Some(ProbeHit::new(point, self.normal))
    }
}
