//! Density accumulation from metaball sources onto grid corners.
//!
//! Every source contributes `max(0, 1 - distance / radius)` to every corner; a corner is inside
//! the surface once the sum reaches [`crate::grid::ACTIVATION_THRESHOLD`].
use glam::Vec3;

use crate::grid::CornerArena;

pub mod layout;

/// Position and influence radius of one metaball, copied in at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensitySource {
    pub position: Vec3,
    pub radius: f32,
}

impl DensitySource {
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self { position, radius }
    }
}

/// Linear falloff. Zero at and beyond `radius`, and for non-positive radii.
#[inline]
pub fn falloff(distance: f32, radius: f32) -> f32 {
    if radius <= 0.0 || distance >= radius {
        return 0.0;
    }
    1.0 - distance / radius
}

/// Total density at `point`.
pub fn intensity_at(point: Vec3, sources: &[DensitySource]) -> f32 {
    sources
        .iter()
        .map(|s| falloff(point.distance(s.position), s.radius))
        .sum()
}

/// Recomputes every corner's intensity and activation flag from `sources`.
pub fn accumulate(corners: &mut CornerArena, sources: &[DensitySource]) {
    for corner in corners.iter_mut() {
        let intensity = intensity_at(corner.position, sources);
        corner.set_intensity(intensity);
    }
}
