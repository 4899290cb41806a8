#![forbid(unsafe_code)]
//! metaball_fx: Metaball fluid effects built on isosurface extraction.
//!
//! Modules:
//! - grid: corner-sharing square and cube lattices, surface probing
//! - field: density falloff and device buffer layouts
//! - device: compute backends and the one-tick-latency offload channel
//! - march: marching squares/cubes tables and triangulation into mesh buffers
//! - particle: pooled metaballs, emitters, collision response
//! - lod, scheduler: distance-based detail and tick cadence
//! - decal: stain placement policy and 2D decal grids
//! - volume: 3D metaball volumes
//! - context: the simulation context that owns all of the above
//! - events: observation hooks
//!
//! For examples and docs, see README and docs.rs.
pub mod context;
pub mod decal;
pub mod device;
pub mod error;
pub mod events;
pub mod field;
pub mod grid;
pub mod lod;
pub mod march;
pub mod particle;
pub(crate) mod random;
pub mod scheduler;
pub mod volume;

/// Convenient re-exports for common types. Import with `use metaball_fx::prelude::*;`.
pub mod prelude {
    pub use crate::context::{CollisionOutcome, FrameReport, FxContext, FxSettings};
    pub use crate::decal::{
        DecalGrid, DecalGridSettings, DecalId, DecalPool, DecalSettings, StainOutcome,
        StainRequest, StainSource,
    };
    pub use crate::device::channel::{ChannelPhase, OffloadChannel};
    pub use crate::device::cpu::CpuDevice;
    pub use crate::device::{cpu_factory, DensityDevice, DeviceFactory, Kernel};
    pub use crate::error::{Error, Result};
    pub use crate::events::{
        AsEventSink, EventSink, FnSink, FxEvent, FxEventKind, MultiSink, SkipReason, UnitRef,
        VecSink,
    };
    pub use crate::field::{accumulate, falloff, intensity_at, DensitySource};
    pub use crate::grid::cube::build_cube_grid;
    pub use crate::grid::frame::{BoundingBox, SquareFrame};
    pub use crate::grid::probe::{PlaneProbe, ProbeHit, ProbeSettings, SurfaceProbe};
    pub use crate::grid::square::{build_square_grid, build_square_grid_with};
    pub use crate::grid::{CubeGrid, SquareGrid, ACTIVATION_THRESHOLD};
    pub use crate::lod::{LodScheduler, LodSettings, LodState};
    pub use crate::march::cubes::triangulate_cubes;
    pub use crate::march::squares::triangulate_squares;
    pub use crate::march::{Interpolation, MeshBuffers};
    pub use crate::particle::collision::{
        apply_collision, BounceOutcome, CollisionEvent, CollisionFilter, IgnoreReason, SurfaceId,
    };
    pub use crate::particle::emitter::{Fountain, FountainSettings, Splash};
    pub use crate::particle::pool::ParticlePool;
    pub use crate::particle::{Particle, ParticleId, ParticleSettings, SpawnRequest};
    pub use crate::scheduler::{Cadence, TickOutcome};
    pub use crate::volume::{BoundsChange, MetaballVolume, VolumeId, VolumeSettings};
}
