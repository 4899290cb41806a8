//! Decal placement: turning stain requests into pooled 2D metaball grids.
//!
//! A [`DecalPool`] owns a fixed number of [`DecalGrid`]s. Each [`StainRequest`] either lands on
//! an active grid close enough to reuse, claims an idle grid, or repurposes the grid claimed
//! longest ago.
use glam::Vec3;
use rand::RngCore;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::DeviceFactory;
use crate::error::{Error, Result};
use crate::events::{emit, EventSink, FxEvent, FxEventKind};
use crate::grid::frame::SquareFrame;
use crate::grid::probe::{ProbeSettings, SurfaceProbe};
use crate::march::Interpolation;
use crate::particle::collision::SurfaceId;
use crate::particle::ParticleId;
use crate::scheduler::TickOutcome;

pub mod grid;

pub use grid::{DecalGrid, DecalGridSettings};
use grid::Placement;

/// Index of a grid inside its [`DecalPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecalId(pub(crate) u32);

impl DecalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Who asked for a stain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StainSource {
    /// A pooled metaball on its first bounce.
    Particle(ParticleId),
    /// A scripted effect, identified by the caller.
    Effect(u32),
    External,
}

/// A request to paint a stain on a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StainRequest {
    pub position: Vec3,
    /// Surface normal at `position`.
    pub normal: Vec3,
    pub surface: SurfaceId,
    /// Opaque material id forwarded to the renderer.
    pub material: Option<u32>,
    /// Multiplier on the base grid size.
    pub size_scale: f32,
    /// Multiplier on burst particle size.
    pub particle_scale: f32,
    pub source: StainSource,
}

impl StainRequest {
    pub fn new(position: Vec3, normal: Vec3, source: StainSource) -> Self {
        Self {
            position,
            normal,
            surface: SurfaceId::default(),
            material: None,
            size_scale: 1.0,
            particle_scale: 1.0,
            source,
        }
    }

    pub fn with_surface(mut self, surface: SurfaceId) -> Self {
        self.surface = surface;
        self
    }

    pub fn with_material(mut self, material: Option<u32>) -> Self {
        self.material = material;
        self
    }

    pub fn with_size(mut self, size_scale: f32) -> Self {
        self.size_scale = size_scale;
        self
    }

    pub fn with_particle_scale(mut self, particle_scale: f32) -> Self {
        self.particle_scale = particle_scale;
        self
    }
}

/// How a [`StainRequest`] was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StainOutcome {
    /// Landed on an existing grid; `burst` tells whether a particle was added to it.
    Reused { grid: DecalId, burst: bool },
    /// A grid was (re)built at the request; `evicted` when it was taken from another stain.
    Placed { grid: DecalId, evicted: bool },
}

impl StainOutcome {
    pub fn grid(&self) -> DecalId {
        match *self {
            StainOutcome::Reused { grid, .. } | StainOutcome::Placed { grid, .. } => grid,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecalSettings {
    /// Grid edge length at size scale 1.
    pub base_size: f32,
    /// Cells per grid side.
    pub base_resolution: u32,
    /// Number of pooled grids.
    pub capacity: usize,
    /// Particles seeded into a freshly placed grid.
    pub seed_burst: usize,
    /// Offset of the grid plane from the surface, along the normal.
    pub surface_lift: f32,
    /// Reuse radius as a fraction of the requested grid size.
    pub reuse_factor: f32,
    /// Minimum reuse distance, as a fraction of `base_size`, for a reuse to add a particle.
    pub burst_factor: f32,
    pub interpolation: Interpolation,
    pub grid: DecalGridSettings,
    pub probe: ProbeSettings,
}

impl Default for DecalSettings {
    fn default() -> Self {
        Self {
            base_size: 1.25,
            base_resolution: 24,
            capacity: 32,
            seed_burst: 6,
            surface_lift: 0.02,
            reuse_factor: 0.25,
            burst_factor: 0.1,
            interpolation: Interpolation::Midpoint,
            grid: DecalGridSettings::default(),
            probe: ProbeSettings::default(),
        }
    }
}

impl DecalSettings {
    pub fn new(base_size: f32, base_resolution: u32, capacity: usize) -> Self {
        Self {
            base_size,
            base_resolution,
            capacity,
            ..Self::default()
        }
    }

    pub fn with_grid(mut self, grid: DecalGridSettings) -> Self {
        self.grid = grid;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_probe(mut self, probe: ProbeSettings) -> Self {
        self.probe = probe;
        self
    }

    pub fn reuse_threshold(&self, size_scale: f32) -> f32 {
        self.base_size * size_scale * self.reuse_factor
    }

    pub fn burst_threshold(&self) -> f32 {
        self.base_size * self.burst_factor
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base_size.is_finite() || self.base_size <= 0.0 {
            return Err(Error::InvalidConfig("decal base_size must be > 0".into()));
        }
        if self.base_resolution == 0 {
            return Err(Error::InvalidConfig(
                "decal base_resolution must be > 0".into(),
            ));
        }
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("decal capacity must be > 0".into()));
        }
        if self.reuse_factor < 0.0 || self.burst_factor < 0.0 {
            return Err(Error::InvalidConfig(
                "decal reuse and burst factors must be >= 0".into(),
            ));
        }
        self.grid.validate()?;
        self.probe.validate()
    }
}

/// Fixed pool of stain grids.
pub struct DecalPool {
    settings: DecalSettings,
    factory: DeviceFactory,
    grids: Vec<DecalGrid>,
    next_seq: u64,
}

impl DecalPool {
    pub fn new(settings: DecalSettings, factory: DeviceFactory) -> Result<Self> {
        settings.validate()?;
        let grids = Self::create_grids(&settings, &factory)?;
        Ok(Self {
            settings,
            factory,
            grids,
            next_seq: 0,
        })
    }

    fn create_grids(settings: &DecalSettings, factory: &DeviceFactory) -> Result<Vec<DecalGrid>> {
        (0..settings.capacity)
            .map(|i| {
                DecalGrid::new(
                    DecalId(i as u32),
                    settings.grid.clone(),
                    settings.interpolation,
                    factory()?,
                )
            })
            .collect()
    }

    pub fn settings(&self) -> &DecalSettings {
        &self.settings
    }

    pub fn capacity(&self) -> usize {
        self.grids.len()
    }

    pub fn grids(&self) -> &[DecalGrid] {
        &self.grids
    }

    pub fn get(&self, id: DecalId) -> Option<&DecalGrid> {
        self.grids.get(id.index())
    }

    pub fn get_mut(&mut self, id: DecalId) -> Option<&mut DecalGrid> {
        self.grids.get_mut(id.index())
    }

    pub fn active(&self) -> impl Iterator<Item = &DecalGrid> {
        self.grids.iter().filter(|g| g.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Switches interpolation on every grid.
    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.settings.interpolation = interpolation;
        for grid in &mut self.grids {
            grid.set_interpolation(interpolation);
        }
    }

    /// Nearest active grid within the reuse threshold of `position`.
    fn find_reusable(&self, position: Vec3, size_scale: f32) -> Option<(DecalId, f32)> {
        let threshold = self.settings.reuse_threshold(size_scale);
        self.grids
            .iter()
            .filter(|g| g.is_active())
            .filter_map(|g| g.center().map(|c| (g.id(), c.distance(position))))
            .filter(|&(_, d)| d <= threshold)
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// First idle grid, or the one claimed longest ago.
    fn choose_target(&self) -> Option<(DecalId, bool)> {
        if let Some(idle) = self.grids.iter().find(|g| !g.is_active()) {
            return Some((idle.id(), false));
        }
        self.grids
            .iter()
            .min_by_key(|g| g.assigned_seq())
            .map(|g| (g.id(), true))
    }

    /// Places or reuses a grid for `request`.
    pub fn request_stain(
        &mut self,
        request: &StainRequest,
        probe: Option<&mut dyn SurfaceProbe>,
        rng: &mut dyn RngCore,
        sink: &mut dyn EventSink,
    ) -> Result<StainOutcome> {
        if let Some((id, distance)) = self.find_reusable(request.position, request.size_scale) {
            let burst = distance >= self.settings.burst_threshold()
                && self.grids[id.index()].burst(
                    1,
                    request.position,
                    1.0,
                    request.particle_scale,
                    rng,
                ) > 0;
            emit(sink, FxEventKind::StainReused, || FxEvent::StainReused {
                decal: id,
                burst,
            });
            return Ok(StainOutcome::Reused { grid: id, burst });
        }

        let Some((id, evicted)) = self.choose_target() else {
            return Err(Error::Other("decal pool has no grids".into()));
        };
        if evicted {
            debug!("Decal pool full; repurposing grid {}.", id.index());
        }

        let normal = request.normal.normalize_or(Vec3::Z);
        let frame = SquareFrame::facing(
            request.position + normal * self.settings.surface_lift,
            normal,
            self.settings.base_size * request.size_scale,
            self.settings.base_resolution,
        );
        self.next_seq += 1;
        let placement = Placement {
            frame,
            surface: request.surface,
            material: request.material,
            particle_scale: request.particle_scale,
            seed_burst: self.settings.seed_burst,
            sequence: self.next_seq,
        };
        let probe_settings = self.settings.probe;
        self.grids[id.index()].place(placement, probe, &probe_settings, rng)?;

        emit(sink, FxEventKind::StainPlaced, || FxEvent::StainPlaced {
            decal: id,
            evicted,
        });
        Ok(StainOutcome::Placed { grid: id, evicted })
    }

    /// Moves every stain on `surface` by `delta`.
    pub fn move_surface(&mut self, surface: SurfaceId, delta: Vec3) {
        for grid in self.grids.iter_mut().filter(|g| g.is_active() && g.surface() == surface) {
            grid.move_by(delta);
        }
    }

    /// Ticks every active grid. Returns how many produced a fresh mesh.
    pub fn advance(&mut self, dt: f32, sink: &mut dyn EventSink) -> usize {
        self.grids
            .iter_mut()
            .map(|g| g.advance(dt, sink))
            .filter(|o| matches!(o, TickOutcome::Updated { .. }))
            .count()
    }

    /// Deactivates every grid.
    pub fn reset(&mut self) {
        for grid in &mut self.grids {
            grid.deactivate();
        }
        self.next_seq = 0;
    }

    /// Drops every grid and rebuilds the pool with a new size and resolution.
    pub fn resize(&mut self, capacity: usize, resolution: u32) -> Result<()> {
        let mut settings = self.settings.clone();
        settings.capacity = capacity;
        settings.base_resolution = resolution;
        settings.validate()?;
        self.grids = Self::create_grids(&settings, &self.factory)?;
        self.settings = settings;
        self.next_seq = 0;
        debug!("Rebuilt decal pool: {capacity} grids at resolution {resolution}.");
        Ok(())
    }
}

impl std::fmt::Debug for DecalPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecalPool")
            .field("settings", &self.settings)
            .field("capacity", &self.grids.len())
            .field("active", &self.active_count())
            .finish()
    }
}
