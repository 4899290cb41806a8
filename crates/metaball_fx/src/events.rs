//! Event types and sinks for observing the simulation.
//!
//! Every operation that can drop work, repurpose a unit, or skip a tick reports it as an
//! [`FxEvent`] through an [`EventSink`]. Sinks can opt out of event kinds via
//! [`EventSink::wants`] so callers skip building events nobody reads.
use glam::Vec3;

use crate::decal::DecalId;
use crate::particle::ParticleId;
use crate::volume::VolumeId;

/// The simulation unit an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitRef {
    Volume(VolumeId),
    Decal(DecalId),
}

/// Why a unit's tick did no density or mesh work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// LOD detail dropped to zero.
    Hidden,
    /// The unit owns no live particles.
    NoParticles,
    /// A decal's dry-out timer elapsed.
    DriedOut,
}

/// Describes events emitted by the simulation.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum FxEvent {
    /// A volume was registered with the context.
    VolumeAdded { volume: VolumeId },

    /// A volume was unregistered; its particles were retired first.
    VolumeRemoved { volume: VolumeId },

    /// A volume's lattice was rebuilt after a size or resolution change.
    VolumeRebuilt {
        volume: VolumeId,
        corners: usize,
        cells: usize,
    },

    /// A fire request found the particle pool exhausted.
    FireDropped { volume: Option<VolumeId> },

    /// A particle ran out of life and returned to the pool.
    ParticleRetired {
        particle: ParticleId,
        owner: Option<VolumeId>,
    },

    /// A particle's first accepted collision.
    Bounced {
        particle: ParticleId,
        contact_point: Vec3,
    },

    /// A stain claimed a grid.
    StainPlaced { decal: DecalId, evicted: bool },

    /// A stain landed on an existing nearby grid.
    StainReused { decal: DecalId, burst: bool },

    /// A decal's dry-out timer elapsed and its mesh was cleared.
    DecalDried { decal: DecalId },

    /// A new LOD evaluation for a volume.
    LodChanged {
        volume: VolumeId,
        detail_level: f32,
        tick_interval: f32,
    },

    /// A unit's tick was short-circuited.
    TickSkipped { unit: UnitRef, reason: SkipReason },

    /// A unit produced a fresh mesh.
    MeshUpdated { unit: UnitRef, triangles: usize },

    /// A compute device call failed; the unit's channel was invalidated.
    DeviceFailed { unit: UnitRef, message: String },

    /// Non-fatal warning.
    Warning {
        /// Context string (e.g. unit id).
        context: String,
        message: String,
    },
}

/// Discriminant of [`FxEvent`], used for filtering.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FxEventKind {
    VolumeAdded,
    VolumeRemoved,
    VolumeRebuilt,
    FireDropped,
    ParticleRetired,
    Bounced,
    StainPlaced,
    StainReused,
    DecalDried,
    LodChanged,
    TickSkipped,
    MeshUpdated,
    DeviceFailed,
    Warning,
}

impl FxEvent {
    pub fn kind(&self) -> FxEventKind {
        match self {
            FxEvent::VolumeAdded { .. } => FxEventKind::VolumeAdded,
            FxEvent::VolumeRemoved { .. } => FxEventKind::VolumeRemoved,
            FxEvent::VolumeRebuilt { .. } => FxEventKind::VolumeRebuilt,
            FxEvent::FireDropped { .. } => FxEventKind::FireDropped,
            FxEvent::ParticleRetired { .. } => FxEventKind::ParticleRetired,
            FxEvent::Bounced { .. } => FxEventKind::Bounced,
            FxEvent::StainPlaced { .. } => FxEventKind::StainPlaced,
            FxEvent::StainReused { .. } => FxEventKind::StainReused,
            FxEvent::DecalDried { .. } => FxEventKind::DecalDried,
            FxEvent::LodChanged { .. } => FxEventKind::LodChanged,
            FxEvent::TickSkipped { .. } => FxEventKind::TickSkipped,
            FxEvent::MeshUpdated { .. } => FxEventKind::MeshUpdated,
            FxEvent::DeviceFailed { .. } => FxEventKind::DeviceFailed,
            FxEvent::Warning { .. } => FxEventKind::Warning,
        }
    }
}

/// A generic event sink that accepts [`FxEvent`]s.
pub trait EventSink {
    fn send(&mut self, event: FxEvent);

    /// Whether events of `kind` should be built and sent at all.
    #[inline]
    fn wants(&self, _kind: FxEventKind) -> bool {
        true
    }

    fn send_many<I>(&mut self, events: I)
    where
        Self: Sized,
        I: IntoIterator<Item = FxEvent>,
    {
        for e in events {
            self.send(e);
        }
    }
}

/// A no-op event sink.
impl EventSink for () {
    #[inline]
    fn send(&mut self, _event: FxEvent) {}

    #[inline]
    fn wants(&self, _kind: FxEventKind) -> bool {
        false
    }
}

/// Sends `event` if the sink wants its kind. The closure runs only in that case.
#[inline]
pub(crate) fn emit(sink: &mut dyn EventSink, kind: FxEventKind, event: impl FnOnce() -> FxEvent) {
    if sink.wants(kind) {
        sink.send(event());
    }
}

/// An event sink that forwards to a user-provided closure.
pub struct FnSink<F>
where
    F: FnMut(FxEvent),
{
    f: F,
}

impl<F> FnSink<F>
where
    F: FnMut(FxEvent),
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventSink for FnSink<F>
where
    F: FnMut(FxEvent),
{
    #[inline]
    fn send(&mut self, event: FxEvent) {
        (self.f)(event);
    }
}

/// An event sink that collects events in a `Vec`, optionally restricted to some kinds.
#[derive(Default)]
pub struct VecSink {
    events: Vec<FxEvent>,
    only: Option<Vec<FxEventKind>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            events: Vec::with_capacity(cap),
            only: None,
        }
    }

    /// Collects only events of the given kinds.
    pub fn only(kinds: impl IntoIterator<Item = FxEventKind>) -> Self {
        Self {
            events: Vec::new(),
            only: Some(kinds.into_iter().collect()),
        }
    }

    pub fn into_inner(self) -> Vec<FxEvent> {
        self.events
    }

    pub fn as_slice(&self) -> &[FxEvent] {
        &self.events
    }

    pub fn count(&self, kind: FxEventKind) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSink for VecSink {
    #[inline]
    fn send(&mut self, event: FxEvent) {
        if self.wants(event.kind()) {
            self.events.push(event);
        }
    }

    fn wants(&self, kind: FxEventKind) -> bool {
        self.only.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

/// Fan-out sink that forwards each event to all contained sinks.
pub struct MultiSink<S: EventSink> {
    pub(crate) sinks: Vec<S>,
}

impl<S: EventSink> MultiSink<S> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sinks(sinks: Vec<S>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: S) {
        self.sinks.push(sink);
    }

    pub fn sinks(&self) -> &[S] {
        &self.sinks
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }
}

impl<S: EventSink> Default for MultiSink<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: EventSink> EventSink for MultiSink<S> {
    fn send(&mut self, event: FxEvent) {
        let kind = event.kind();
        let mut targets: Vec<&mut S> = self.sinks.iter_mut().filter(|s| s.wants(kind)).collect();
        let Some(last) = targets.pop() else {
            return;
        };
        for sink in targets {
            sink.send(event.clone());
        }
        last.send(event);
    }

    fn wants(&self, kind: FxEventKind) -> bool {
        self.sinks.iter().any(|s| s.wants(kind))
    }
}

/// Minimal adapter trait for types that can expose an [`EventSink`].
pub trait AsEventSink {
    fn as_event_sink(&mut self) -> &mut dyn EventSink;
}

impl<S: EventSink> AsEventSink for S {
    fn as_event_sink(&mut self) -> &mut dyn EventSink {
        self
    }
}
