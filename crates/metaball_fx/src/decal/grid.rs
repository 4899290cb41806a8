//! A single surface stain: a 2D metaball simulation on an oriented square lattice.
use glam::{Affine3A, Vec3};
use rand::RngCore;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::DecalId;
use crate::device::channel::OffloadChannel;
use crate::device::{DensityDevice, Kernel};
use crate::error::{Error, Result};
use crate::events::{emit, EventSink, FxEvent, FxEventKind, SkipReason, UnitRef};
use crate::field::layout::{GpuParticle, KernelParams};
use crate::grid::frame::SquareFrame;
use crate::grid::probe::{ProbeSettings, SurfaceProbe};
use crate::grid::square::build_square_grid_with;
use crate::grid::SquareGrid;
use crate::march::squares::triangulate_squares;
use crate::march::{Interpolation, MeshBuffers};
use crate::particle::collision::SurfaceId;
use crate::random::rand_range;
use crate::scheduler::{Cadence, TickOutcome};

/// Simulation constants for every decal grid.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecalGridSettings {
    /// Bursts stop adding particles past this count.
    pub max_particles: usize,
    /// Seconds between simulation ticks.
    pub tick_interval: f32,
    /// Seconds of simulation before the stain dries and stops animating.
    pub dry_out: f32,
    pub drag: f32,
    /// World gravity; only its in-plane component acts on decal particles.
    pub gravity: Vec3,
    pub gravity_intensity: f32,
    /// Burst ball size as a fraction of the requested particle size.
    pub ball_scale: f32,
    /// Multiplier on the requested burst speed.
    pub speed_scale: f32,
    /// Bounds on burst radii, as fractions of the ball size.
    pub radius_range: (f32, f32),
}

impl Default for DecalGridSettings {
    fn default() -> Self {
        Self {
            max_particles: 48,
            tick_interval: 0.025,
            dry_out: 20.0,
            drag: 3.0,
            gravity: Vec3::NEG_Y,
            gravity_intensity: 0.5,
            ball_scale: 0.35,
            speed_scale: 3.5,
            radius_range: (0.2, 0.85),
        }
    }
}

impl DecalGridSettings {
    pub fn with_max_particles(mut self, max_particles: usize) -> Self {
        self.max_particles = max_particles;
        self
    }

    pub fn with_tick_interval(mut self, seconds: f32) -> Self {
        self.tick_interval = seconds;
        self
    }

    pub fn with_dry_out(mut self, seconds: f32) -> Self {
        self.dry_out = seconds;
        self
    }

    pub fn with_gravity(mut self, gravity: Vec3, intensity: f32) -> Self {
        self.gravity = gravity;
        self.gravity_intensity = intensity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval < 0.0 || !self.tick_interval.is_finite() {
            return Err(Error::InvalidConfig(
                "decal tick_interval must be finite and >= 0".into(),
            ));
        }
        if self.dry_out < 0.0 {
            return Err(Error::InvalidConfig("decal dry_out must be >= 0".into()));
        }
        if self.drag < 0.0 {
            return Err(Error::InvalidConfig("decal drag must be >= 0".into()));
        }
        if !self.gravity.is_finite() {
            return Err(Error::InvalidConfig("decal gravity must be finite".into()));
        }
        let (lo, hi) = self.radius_range;
        if lo < 0.0 || lo > hi {
            return Err(Error::InvalidConfig(
                "decal radius_range must be a non-negative ascending range".into(),
            ));
        }
        Ok(())
    }
}

/// Where and how a grid is (re)placed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement {
    pub frame: SquareFrame,
    pub surface: SurfaceId,
    pub material: Option<u32>,
    pub particle_scale: f32,
    pub seed_burst: usize,
    pub sequence: u64,
}

/// One pooled stain.
pub struct DecalGrid {
    id: DecalId,
    settings: DecalGridSettings,
    interpolation: Interpolation,
    frame: Option<SquareFrame>,
    grid: Option<SquareGrid>,
    particles: Vec<GpuParticle>,
    channel: OffloadChannel,
    cadence: Cadence,
    mesh: MeshBuffers,
    active: bool,
    dry_remaining: f32,
    surface: SurfaceId,
    material: Option<u32>,
    assigned_seq: u64,
}

impl DecalGrid {
    pub fn new(
        id: DecalId,
        settings: DecalGridSettings,
        interpolation: Interpolation,
        device: Box<dyn DensityDevice>,
    ) -> Result<Self> {
        settings.validate()?;
        let cadence = Cadence::new(settings.tick_interval);
        Ok(Self {
            id,
            settings,
            interpolation,
            frame: None,
            grid: None,
            particles: Vec::new(),
            channel: OffloadChannel::new(device),
            cadence,
            mesh: MeshBuffers::new(),
            active: false,
            dry_remaining: 0.0,
            surface: SurfaceId::default(),
            material: None,
            assigned_seq: 0,
        })
    }

    pub fn id(&self) -> DecalId {
        self.id
    }

    pub fn settings(&self) -> &DecalGridSettings {
        &self.settings
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn frame(&self) -> Option<&SquareFrame> {
        self.frame.as_ref()
    }

    /// World-space center, if placed.
    pub fn center(&self) -> Option<Vec3> {
        self.frame.map(|f| f.center)
    }

    pub fn grid(&self) -> Option<&SquareGrid> {
        self.grid.as_ref()
    }

    pub fn particles(&self) -> &[GpuParticle] {
        &self.particles
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Mesh from the most recent tick, in the decal's local frame.
    pub fn mesh(&self) -> &MeshBuffers {
        &self.mesh
    }

    pub fn channel(&self) -> &OffloadChannel {
        &self.channel
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn material(&self) -> Option<u32> {
        self.material
    }

    pub fn is_dry(&self) -> bool {
        self.active && self.dry_remaining <= 0.0
    }

    pub fn dry_remaining(&self) -> f32 {
        self.dry_remaining
    }

    /// Order in which this grid was last claimed by a stain.
    pub fn assigned_seq(&self) -> u64 {
        self.assigned_seq
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.interpolation = interpolation;
    }

    /// Decal-local to world transform.
    pub fn local_to_world(&self) -> Option<Affine3A> {
        self.frame
            .map(|f| Affine3A::from_rotation_translation(f.orientation, f.center))
    }

    /// Rebuilds the lattice at a new placement and seeds it with a burst.
    pub(crate) fn place(
        &mut self,
        placement: Placement,
        probe: Option<&mut dyn SurfaceProbe>,
        probe_settings: &ProbeSettings,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        let grid = build_square_grid_with(&placement.frame, probe, probe_settings)?;
        self.channel.invalidate();
        self.grid = Some(grid);
        self.frame = Some(placement.frame);
        self.particles.clear();
        self.mesh.clear();
        self.cadence.reset();
        self.dry_remaining = self.settings.dry_out;
        self.surface = placement.surface;
        self.material = placement.material;
        self.assigned_seq = placement.sequence;
        self.active = true;
        self.burst(
            placement.seed_burst,
            placement.frame.center,
            1.0,
            placement.particle_scale,
            rng,
        );
        Ok(())
    }

    /// Adds up to `count` particles at `position` with random in-plane velocities. Returns how
    /// many were added.
    ///
    /// Faster particles get smaller radii so a splash thins out towards its rim.
    pub fn burst(
        &mut self,
        count: usize,
        position: Vec3,
        speed: f32,
        size: f32,
        rng: &mut dyn RngCore,
    ) -> usize {
        let Some(frame) = self.frame else {
            return 0;
        };
        let ball = self.settings.ball_scale * size;
        if ball <= 0.0 {
            return 0;
        }
        let speed = speed * self.settings.speed_scale;
        let (lo, hi) = self.settings.radius_range;
        let room = self.settings.max_particles.saturating_sub(self.particles.len());
        let count = count.min(room);
        for _ in 0..count {
            let local = Vec3::new(
                rand_range(rng, -speed, speed),
                rand_range(rng, -speed, speed),
                0.0,
            );
            let velocity = frame.orientation * local;
            let radius = (ball / (velocity.length() / ball)).clamp(ball * lo, ball * hi);
            self.particles.push(GpuParticle::new(position, radius, velocity));
        }
        trace!("Decal {:?} burst {} particles.", self.id, count);
        count
    }

    /// Follows a moving parent surface.
    pub fn move_by(&mut self, delta: Vec3) {
        if let Some(frame) = self.frame.as_mut() {
            frame.center += delta;
            self.channel.track_movement(delta);
        }
    }

    /// Returns the grid to the pool. Device buffers are released immediately.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.grid = None;
        self.frame = None;
        self.particles.clear();
        self.mesh.clear();
        self.channel.invalidate();
    }

    /// Gravity with its component along the decal normal removed.
    fn plane_gravity(&self, frame: &SquareFrame) -> Vec3 {
        let normal = frame.forward();
        let g = self.settings.gravity;
        g - normal * g.dot(normal)
    }

    /// Runs one simulation tick if the cadence is due.
    pub fn advance(&mut self, dt: f32, sink: &mut dyn EventSink) -> TickOutcome {
        if !self.active {
            return TickOutcome::Inactive;
        }
        if !self.cadence.poll(dt) {
            return TickOutcome::NotDue;
        }
        let step = self.cadence.period();
        let unit = UnitRef::Decal(self.id);

        if self.dry_remaining <= 0.0 {
            self.mesh.clear();
            return TickOutcome::Skipped(SkipReason::DriedOut);
        }
        if self.particles.is_empty() {
            self.mesh.clear();
            self.channel.discard_in_flight();
            emit(sink, FxEventKind::TickSkipped, || FxEvent::TickSkipped {
                unit,
                reason: SkipReason::NoParticles,
            });
            return TickOutcome::Skipped(SkipReason::NoParticles);
        }

        let outcome = match self.simulate(step) {
            Ok(triangles) => {
                emit(sink, FxEventKind::MeshUpdated, || FxEvent::MeshUpdated {
                    unit,
                    triangles,
                });
                TickOutcome::Updated { triangles }
            }
            Err(err) => {
                warn!("Decal {:?} device failure: {err}", self.id);
                match self.grid.as_mut() {
                    Some(grid) => self.channel.recover(grid.corners_mut()),
                    None => self.channel.invalidate(),
                }
                self.mesh.clear();
                emit(sink, FxEventKind::DeviceFailed, || FxEvent::DeviceFailed {
                    unit,
                    message: err.to_string(),
                });
                TickOutcome::DeviceFailed
            }
        };

        self.dry_remaining -= step;
        if self.dry_remaining <= 0.0 {
            self.mesh.clear();
            let decal = self.id;
            emit(sink, FxEventKind::DecalDried, || FxEvent::DecalDried { decal });
        }
        outcome
    }

    /// collect -> submit -> triangulate. Returns the triangle count.
    fn simulate(&mut self, step: f32) -> Result<usize> {
        let Some(frame) = self.frame else {
            return Ok(0);
        };
        let gravity = self.plane_gravity(&frame);
        let Some(grid) = self.grid.as_mut() else {
            return Ok(0);
        };
        self.channel
            .collect(grid.corners_mut(), Some(self.particles.as_mut_slice()))?;

        let params = KernelParams::new(grid.dims(), grid.corner_count(), self.particles.len())
            .with_gravity(gravity, self.settings.gravity_intensity)
            .with_step(step, self.settings.drag);
        self.channel.submit(
            grid.corners(),
            &self.particles,
            &[Kernel::Physics, Kernel::Densities],
            params,
        )?;

        let to_local =
            Affine3A::from_rotation_translation(frame.orientation, frame.center).inverse();
        self.mesh.begin(to_local);
        Ok(triangulate_squares(grid, self.interpolation, &mut self.mesh))
    }
}

impl std::fmt::Debug for DecalGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecalGrid")
            .field("id", &self.id)
            .field("active", &self.active)
            .field("center", &self.center())
            .field("particles", &self.particles.len())
            .field("dry_remaining", &self.dry_remaining)
            .field("assigned_seq", &self.assigned_seq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::device::cpu::CpuDevice;
    use crate::device::testing::{flaky, FailAt};
    use crate::events::VecSink;

    fn decal(settings: DecalGridSettings) -> DecalGrid {
        DecalGrid::new(
            DecalId(0),
            settings,
            Interpolation::Midpoint,
            Box::new(CpuDevice::new()),
        )
        .unwrap()
    }

    fn placement(seed_burst: usize) -> Placement {
        Placement {
            frame: SquareFrame::facing(Vec3::ZERO, Vec3::Z, 1.25, 8),
            surface: SurfaceId(1),
            material: Some(3),
            particle_scale: 1.0,
            seed_burst,
            sequence: 1,
        }
    }

    #[test]
    fn placement_seeds_burst_and_activates() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut d = decal(DecalGridSettings::default());
        assert_eq!(d.advance(1.0, &mut ()), TickOutcome::Inactive);
        d.place(placement(6), None, &ProbeSettings::default(), &mut rng)
            .unwrap();
        assert!(d.is_active());
        assert_eq!(d.particle_count(), 6);
        assert_eq!(d.material(), Some(3));
        assert_eq!(d.grid().unwrap().corner_count(), 81);
    }

    #[test]
    fn burst_velocities_stay_in_plane_and_radii_are_bounded() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut d = decal(DecalGridSettings::default());
        d.place(placement(0), None, &ProbeSettings::default(), &mut rng)
            .unwrap();
        d.burst(20, Vec3::ZERO, 1.0, 1.0, &mut rng);
        let ball = 0.35;
        for p in d.particles() {
            assert!(p.velocity().z.abs() < 1e-6);
            assert!(p.radius >= ball * 0.2 - 1e-6 && p.radius <= ball * 0.85 + 1e-6);
        }
    }

    #[test]
    fn still_burst_gets_the_largest_radius() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut d = decal(DecalGridSettings::default());
        d.place(placement(0), None, &ProbeSettings::default(), &mut rng)
            .unwrap();
        d.burst(1, Vec3::ZERO, 0.0, 1.0, &mut rng);
        assert!((d.particles()[0].radius - 0.35 * 0.85).abs() < 1e-6);
    }

    #[test]
    fn burst_respects_particle_cap() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut d = decal(DecalGridSettings::default().with_max_particles(10));
        d.place(placement(6), None, &ProbeSettings::default(), &mut rng)
            .unwrap();
        assert_eq!(d.burst(6, Vec3::ZERO, 1.0, 1.0, &mut rng), 4);
        assert_eq!(d.particle_count(), 10);
    }

    #[test]
    fn first_tick_is_empty_and_second_has_mesh() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut d = decal(DecalGridSettings::default().with_gravity(Vec3::ZERO, 0.0));
        d.place(placement(0), None, &ProbeSettings::default(), &mut rng)
            .unwrap();
        d.burst(1, Vec3::ZERO, 0.0, 2.0, &mut rng);

        assert_eq!(d.advance(0.025, &mut ()), TickOutcome::Updated { triangles: 0 });
        match d.advance(0.025, &mut ()) {
            TickOutcome::Updated { triangles } => assert!(triangles > 0),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!d.mesh().is_empty());
    }

    #[test]
    fn dry_out_clears_mesh_and_stops_simulation() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut d = decal(
            DecalGridSettings::default()
                .with_gravity(Vec3::ZERO, 0.0)
                .with_dry_out(0.06),
        );
        d.place(placement(0), None, &ProbeSettings::default(), &mut rng)
            .unwrap();
        d.burst(1, Vec3::ZERO, 0.0, 2.0, &mut rng);
        let mut sink = VecSink::new();

        d.advance(0.025, &mut sink);
        d.advance(0.025, &mut sink);
        assert!(!d.mesh().is_empty());
        d.advance(0.025, &mut sink);
        assert!(d.is_dry());
        assert!(d.mesh().is_empty());
        assert_eq!(sink.count(FxEventKind::DecalDried), 1);
        assert_eq!(
            d.advance(0.025, &mut sink),
            TickOutcome::Skipped(SkipReason::DriedOut)
        );
        assert!(d.is_active());
    }

    #[test]
    fn decal_particles_slide_along_the_plane() {
        let mut rng = StdRng::seed_from_u64(7);
        // Facing +Y: gravity is entirely along the normal, so nothing moves.
        let mut flat = decal(DecalGridSettings::default());
        let mut p = placement(0);
        p.frame = SquareFrame::facing(Vec3::ZERO, Vec3::Y, 1.25, 8);
        flat.place(p, None, &ProbeSettings::default(), &mut rng).unwrap();
        flat.burst(1, Vec3::ZERO, 0.0, 1.0, &mut rng);
        for _ in 0..3 {
            flat.advance(0.025, &mut ());
        }
        assert!(flat.particles()[0].position().length() < 1e-6);

        // Facing +Z (a wall): gravity pulls straight down the plane.
        let mut wall = decal(DecalGridSettings::default());
        wall.place(placement(0), None, &ProbeSettings::default(), &mut rng)
            .unwrap();
        wall.burst(1, Vec3::ZERO, 0.0, 1.0, &mut rng);
        for _ in 0..3 {
            wall.advance(0.025, &mut ());
        }
        let moved = wall.particles()[0].position();
        assert!(moved.y < 0.0);
        assert!(moved.z.abs() < 1e-6);
    }

    #[test]
    fn device_failure_keeps_corners_on_the_moved_frame() {
        let mut rng = StdRng::seed_from_u64(9);
        let (device, switch) = flaky();
        let settings = DecalGridSettings::default().with_gravity(Vec3::ZERO, 0.0);
        let mut d = DecalGrid::new(DecalId(0), settings, Interpolation::Midpoint, device).unwrap();
        d.place(placement(0), None, &ProbeSettings::default(), &mut rng)
            .unwrap();
        d.burst(1, Vec3::ZERO, 0.0, 2.0, &mut rng);

        assert!(d.advance(0.025, &mut ()).ran());
        d.move_by(Vec3::X * 0.25);
        assert!(d.advance(0.025, &mut ()).ran());
        d.move_by(Vec3::Y * 0.25);

        switch.arm(FailAt::Dispatch);
        let mut sink = VecSink::only([FxEventKind::DeviceFailed]);
        assert_eq!(d.advance(0.025, &mut sink), TickOutcome::DeviceFailed);
        assert_eq!(sink.len(), 1);
        assert!(d.mesh().is_empty());

        let expected =
            build_square_grid_with(d.frame().unwrap(), None, &ProbeSettings::default()).unwrap();
        let corners_match = |d: &DecalGrid| {
            d.grid()
                .unwrap()
                .corners()
                .iter()
                .zip(expected.corners().iter())
                .all(|(got, want)| got.position.abs_diff_eq(want.position, 1e-5))
        };
        assert!(corners_match(&d));

        assert!(matches!(
            d.advance(0.025, &mut ()),
            TickOutcome::Updated { .. }
        ));
        assert!(matches!(
            d.advance(0.025, &mut ()),
            TickOutcome::Updated { .. }
        ));
        assert!(!d.mesh().is_empty());
        assert!(corners_match(&d));
    }

    #[test]
    fn move_by_translates_the_frame() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut d = decal(DecalGridSettings::default());
        d.place(placement(1), None, &ProbeSettings::default(), &mut rng)
            .unwrap();
        d.move_by(Vec3::X);
        assert_eq!(d.center(), Some(Vec3::X));
        assert_eq!(d.channel().pending_movement(), Vec3::X);
        d.deactivate();
        assert!(!d.is_active());
        assert_eq!(d.center(), None);
    }
}
