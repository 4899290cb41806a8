//! Bevy plugin for metaball_fx providing resources, message types, and systems.
#![forbid(unsafe_code)]

use bevy::platform::collections::HashMap;
use bevy::prelude::*;
use metaball_fx::prelude::*;

#[cfg(feature = "ron")]
pub use assets::{FxProfile, FxProfileAsset, FxProfileAssetLoader, FxProfilePlugin};
pub use events::{ChannelSink, FxBus, FxBusConfig, FxEventFilter, FxMessage};

#[cfg(feature = "ron")]
mod assets;
mod events;

/// Convenient re-exports for common types. Import with `use bevy_metaball_fx::prelude::*;`.
pub mod prelude {
    pub use metaball_fx::prelude::*;

    #[cfg(feature = "ron")]
    pub use crate::assets::{FxProfile, FxProfileAsset, FxProfileAssetLoader, FxProfilePlugin};
    pub use crate::events::{ChannelSink, FxBus, FxBusConfig, FxEventFilter, FxMessage};
    pub use crate::{
        FireMetaball, FxFrame, FxMeshData, FxProbe, FxState, FxSystems, FxViewer, FxVolume,
        FxVolumeDefaults, FxVolumeHandle, MetaballCollision, MetaballFxPlugin, RequestStain,
    };
}

/// Bevy plugin owning one [`FxContext`] and ticking it every `Update`.
#[derive(Default)]
pub struct MetaballFxPlugin {
    pub settings: FxSettings,
}

impl MetaballFxPlugin {
    pub fn new(settings: FxSettings) -> Self {
        Self { settings }
    }
}

/// The simulation context shared by all fx systems.
#[derive(Resource)]
pub struct FxState(pub FxContext);

/// Report of the most recent simulation step.
#[derive(Resource, Debug, Default, Clone, Copy)]
pub struct FxFrame(pub FrameReport);

/// Surface probe used to trim decal grids against level geometry.
/// Insert one at startup; without it decals are placed unclipped.
#[derive(Resource, Default)]
pub struct FxProbe(pub Option<Box<dyn SurfaceProbe + Send + Sync>>);

impl FxProbe {
    pub fn new(probe: impl SurfaceProbe + Send + Sync + 'static) -> Self {
        Self(Some(Box::new(probe)))
    }

    fn as_probe(&mut self) -> Option<&mut dyn SurfaceProbe> {
        self.0
            .as_deref_mut()
            .map(|probe| probe as &mut dyn SurfaceProbe)
    }
}

/// Overrides applied to every [`FxVolume`] when it registers with the context.
#[derive(Resource, Debug, Default, Clone, Copy)]
pub struct FxVolumeDefaults {
    pub interpolation: Option<Interpolation>,
}

/// Maps volume entities to their ids in the context.
#[derive(Resource, Default)]
pub(crate) struct FxVolumeIndex(pub(crate) HashMap<Entity, VolumeId>);

/// System set containing every fx system, in execution order.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct FxSystems;

/// A metaball volume. Its bounds are centered on the entity's [`GlobalTransform`].
#[derive(Component, Debug, Clone)]
pub struct FxVolume {
    pub size: Vec3,
    pub settings: VolumeSettings,
}

impl FxVolume {
    pub fn new(size: Vec3) -> Self {
        Self {
            size,
            settings: VolumeSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: VolumeSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Added once a [`FxVolume`] is registered with the context.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FxVolumeHandle(pub VolumeId);

/// Marks a volume whose settings the context refused.
#[derive(Component)]
struct FxVolumeRejected;

/// Marks the entity whose position drives level of detail. The first one found wins.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct FxViewer;

/// Latest triangle list of a volume, in the volume's local space.
#[derive(Component, Debug, Default, Clone)]
pub struct FxMeshData {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub material: Option<u32>,
    revision: u64,
}

impl FxMeshData {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Fires one metaball, owned by the given volume entity if any.
#[derive(Message, Debug, Clone, Copy)]
pub struct FireMetaball {
    pub volume: Option<Entity>,
    pub request: SpawnRequest,
}

impl FireMetaball {
    pub fn new(volume: Option<Entity>, request: SpawnRequest) -> Self {
        Self { volume, request }
    }
}

/// A metaball touched something. Usually written by the physics integration.
#[derive(Message, Debug, Clone, Copy)]
pub struct MetaballCollision(pub CollisionEvent);

/// Places a stain directly, without a particle collision.
#[derive(Message, Debug, Clone)]
pub struct RequestStain(pub StainRequest);

impl Plugin for MetaballFxPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<FireMetaball>()
            .add_message::<MetaballCollision>()
            .add_message::<RequestStain>()
            .add_message::<FxMessage>()
            .init_resource::<Time>()
            .init_resource::<FxBusConfig>()
            .init_resource::<FxBus>()
            .init_resource::<FxProbe>()
            .init_resource::<FxFrame>()
            .init_resource::<FxVolumeIndex>()
            .init_resource::<FxVolumeDefaults>()
            .add_systems(
                Update,
                (
                    (
                        register_volumes,
                        release_removed_volumes,
                        sync_volume_bounds,
                        apply_fire_requests,
                        apply_collisions,
                        apply_stain_requests,
                        advance_fx,
                        write_volume_meshes,
                    )
                        .chain()
                        .run_if(resource_exists::<FxState>),
                    drain_fx_messages,
                )
                    .chain()
                    .in_set(FxSystems),
            );

        match FxContext::new(self.settings.clone()) {
            Ok(context) => {
                app.insert_resource(FxState(context));
            }
            Err(err) => error!("Invalid fx settings, simulation disabled: {err}"),
        }
    }
}

fn register_volumes(
    mut commands: Commands,
    mut state: ResMut<FxState>,
    mut index: ResMut<FxVolumeIndex>,
    defaults: Res<FxVolumeDefaults>,
    bus: Res<FxBus>,
    config: Res<FxBusConfig>,
    volumes: Query<
        (Entity, &FxVolume, Option<&GlobalTransform>),
        (Without<FxVolumeHandle>, Without<FxVolumeRejected>),
    >,
) {
    let mut sink = bus.sink(&config);
    for (entity, volume, transform) in &volumes {
        let center = transform.map_or(Vec3::ZERO, GlobalTransform::translation);
        let mut settings = volume.settings.clone();
        settings.bounds = Some(BoundingBox::new(center, volume.size));
        if let Some(interpolation) = defaults.interpolation {
            settings.interpolation = interpolation;
        }

        match state.0.add_volume(settings, &mut sink) {
            Ok(id) => {
                index.0.insert(entity, id);
                commands
                    .entity(entity)
                    .insert((FxVolumeHandle(id), FxMeshData::default()));
            }
            Err(err) => {
                error!("FxVolume {:?} rejected: {}", entity, err);
                commands.entity(entity).insert(FxVolumeRejected);
            }
        }
    }
}

fn release_removed_volumes(
    mut removed: RemovedComponents<FxVolume>,
    mut state: ResMut<FxState>,
    mut index: ResMut<FxVolumeIndex>,
    bus: Res<FxBus>,
    config: Res<FxBusConfig>,
) {
    let mut sink = bus.sink(&config);
    for entity in removed.read() {
        let Some(id) = index.0.remove(&entity) else {
            continue;
        };
        state.0.remove_volume(id, &mut sink);
    }
}

fn sync_volume_bounds(
    mut state: ResMut<FxState>,
    bus: Res<FxBus>,
    config: Res<FxBusConfig>,
    volumes: Query<
        (&FxVolumeHandle, &FxVolume, &GlobalTransform),
        Or<(Changed<GlobalTransform>, Changed<FxVolume>)>,
    >,
) {
    let mut sink = bus.sink(&config);
    for (handle, volume, transform) in &volumes {
        let bounds = BoundingBox::new(transform.translation(), volume.size);
        if let Err(err) = state.0.set_volume_bounds(handle.0, bounds, &mut sink) {
            warn!("Failed to update bounds of volume {:?}: {}", handle.0, err);
        }
    }
}

fn apply_fire_requests(
    mut requests: MessageReader<FireMetaball>,
    mut state: ResMut<FxState>,
    index: Res<FxVolumeIndex>,
    bus: Res<FxBus>,
    config: Res<FxBusConfig>,
) {
    let mut sink = bus.sink(&config);
    for fire in requests.read() {
        let volume = match fire.volume {
            Some(entity) => match index.0.get(&entity) {
                Some(id) => Some(*id),
                None => {
                    warn!("FireMetaball targets {:?}, which is not a registered volume", entity);
                    continue;
                }
            },
            None => None,
        };
        state.0.fire(volume, &fire.request, &mut sink);
    }
}

fn apply_collisions(
    mut collisions: MessageReader<MetaballCollision>,
    mut state: ResMut<FxState>,
    mut probe: ResMut<FxProbe>,
    bus: Res<FxBus>,
    config: Res<FxBusConfig>,
) {
    let mut sink = bus.sink(&config);
    for MetaballCollision(event) in collisions.read() {
        if let Err(err) = state.0.handle_collision(event, probe.as_probe(), &mut sink) {
            warn!("Collision for particle {:?} failed: {}", event.particle, err);
        }
    }
}

fn apply_stain_requests(
    mut requests: MessageReader<RequestStain>,
    mut state: ResMut<FxState>,
    mut probe: ResMut<FxProbe>,
    bus: Res<FxBus>,
    config: Res<FxBusConfig>,
) {
    let mut sink = bus.sink(&config);
    for RequestStain(request) in requests.read() {
        if let Err(err) = state.0.request_stain(request, probe.as_probe(), &mut sink) {
            warn!("Stain request failed: {}", err);
        }
    }
}

fn advance_fx(
    time: Res<Time>,
    mut state: ResMut<FxState>,
    mut frame: ResMut<FxFrame>,
    bus: Res<FxBus>,
    config: Res<FxBusConfig>,
    viewers: Query<&GlobalTransform, With<FxViewer>>,
) {
    let view_point = viewers
        .iter()
        .next()
        .map_or(Vec3::ZERO, GlobalTransform::translation);
    let mut sink = bus.sink(&config);
    frame.0 = state.0.advance(time.delta_secs(), view_point, &mut sink);
}

fn write_volume_meshes(
    state: Res<FxState>,
    mut meshes: Query<(&FxVolumeHandle, &mut FxMeshData)>,
) {
    for (handle, mut data) in &mut meshes {
        let Some(volume) = state.0.volume(handle.0) else {
            continue;
        };
        let revision = volume.cadence().fires();
        if data.revision == revision {
            continue;
        }
        data.revision = revision;
        data.positions = volume.mesh().position_arrays();
        data.indices = volume.mesh().indices().to_vec();
        data.material = volume.material();
    }
}

fn drain_fx_messages(bus: Res<FxBus>, mut messages: ResMut<Messages<FxMessage>>) {
    while let Ok(message) = bus.receiver().try_recv() {
        messages.write(message);
    }
}
