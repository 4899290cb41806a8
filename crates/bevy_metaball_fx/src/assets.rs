use core::result::Result;

use bevy::asset::io::Reader;
use bevy::asset::{AssetLoader, LoadContext};
use bevy::prelude::*;
use bevy::reflect::TypePath;
use bevy::tasks::ConditionalSendFuture;
use metaball_fx::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{FxState, FxVolumeDefaults, FxVolumeHandle, FxVolumeIndex};

/// Asset describing the [`FxSettings`] of a scene, plus optional per-volume overrides.
#[derive(Asset, TypePath, Clone, Debug, Serialize, Deserialize)]
pub struct FxProfileAsset {
    pub settings: FxSettings,
    /// Interpolation forced onto every volume while the profile is applied, including volumes
    /// spawned later. Stored in [`FxVolumeDefaults`].
    #[serde(default)]
    pub volume_interpolation: Option<Interpolation>,
}

/// The profile the plugin follows. Reloading or hot-swapping the asset rebuilds the context.
#[derive(Resource, Clone, Debug)]
pub struct FxProfile(pub Handle<FxProfileAsset>);

/// Asset loader for [`FxProfileAsset`] using RON files with `.metafx` extension.
#[derive(TypePath)]
pub struct FxProfileAssetLoader;

impl AssetLoader for FxProfileAssetLoader {
    type Asset = FxProfileAsset;
    type Settings = ();
    type Error = anyhow::Error;

    fn extensions(&self) -> &[&str] {
        &["metafx"]
    }

    fn load(
        &self,
        reader: &mut dyn Reader,
        _settings: &Self::Settings,
        _context: &mut LoadContext,
    ) -> impl ConditionalSendFuture<Output = Result<Self::Asset, Self::Error>> {
        Box::pin(async move {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).await?;
            let asset: FxProfileAsset =
                ron::de::from_bytes(&bytes).map_err(|e| anyhow::anyhow!(e))?;
            asset.settings.validate()?;
            Ok(asset)
        })
    }
}

impl FromWorld for FxProfileAssetLoader {
    fn from_world(_: &mut World) -> Self {
        FxProfileAssetLoader
    }
}

/// Loads `.metafx` profiles and applies the one referenced by [`FxProfile`].
/// Requires bevy's `AssetPlugin` and [`crate::MetaballFxPlugin`].
pub struct FxProfilePlugin;

impl Plugin for FxProfilePlugin {
    fn build(&self, app: &mut App) {
        app.init_asset::<FxProfileAsset>()
            .init_asset_loader::<FxProfileAssetLoader>()
            .add_systems(Update, apply_fx_profile.before(crate::FxSystems));
    }
}

fn apply_fx_profile(
    mut commands: Commands,
    mut asset_events: MessageReader<AssetEvent<FxProfileAsset>>,
    mut index: ResMut<FxVolumeIndex>,
    mut defaults: ResMut<FxVolumeDefaults>,
    profile: Option<Res<FxProfile>>,
    profiles: Res<Assets<FxProfileAsset>>,
    volumes: Query<Entity, With<FxVolumeHandle>>,
) {
    let Some(profile) = profile else {
        asset_events.clear();
        return;
    };
    let changed = asset_events.read().any(|event| {
        event.is_loaded_with_dependencies(&profile.0) || event.is_modified(&profile.0)
    });
    if !changed {
        return;
    }
    let Some(asset) = profiles.get(&profile.0) else {
        return;
    };

    let context = match FxContext::new(asset.settings.clone()) {
        Ok(context) => context,
        Err(err) => {
            error!("FxProfile {:?} rejected: {}", profile.0, err);
            return;
        }
    };
    info!("Applying fx profile {:?}.", profile.0);
    commands.insert_resource(FxState(context));
    defaults.interpolation = asset.volume_interpolation;

    // Every volume re-registers against the fresh context.
    index.0.clear();
    for entity in &volumes {
        commands.entity(entity).remove::<FxVolumeHandle>();
    }
}
