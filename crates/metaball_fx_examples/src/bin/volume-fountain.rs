use glam::{Quat, Vec2, Vec3};
use metaball_fx::prelude::*;
use metaball_fx_examples::{init_tracing, Canvas, RenderConfig, View};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = FxSettings::default()
        .with_pool_capacity(96)
        .with_particles(ParticleSettings::default().with_drag(0.2))
        .with_seed(7);
    let mut fx = FxContext::new(settings)?;
    let mut events = VecSink::only([FxEventKind::FireDropped, FxEventKind::ParticleRetired]);

    // A 6 x 4 x 6 box resting on the ground plane
    let bounds = BoundingBox::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(6.0, 4.0, 6.0));
    let volume = fx.add_volume(
        VolumeSettings::new(bounds)
            .with_name("fountain")
            .with_resolution(3)
            .with_material(Some(1)),
        &mut events,
    )?;

    let mut fountain = Fountain::new(
        Vec3::new(0.0, 0.4, 0.0),
        Quat::IDENTITY,
        FountainSettings::default()
            .with_rate(0.02, 0.04)
            .with_speed(4.5, 6.0)
            .with_size(1.0, 1.6)
            .with_life(1.6)
            .with_jitter(0.2),
    )?;

    let mut rng = StdRng::seed_from_u64(42);
    let camera = Vec3::new(0.0, 2.0, 12.0);
    let dt = 1.0 / 60.0;
    for frame in 0..150 {
        if let Some(request) = fountain.tick(dt, &mut rng) {
            fx.fire(Some(volume), &request, &mut events);
        }
        let report = fx.advance(dt, camera, &mut events);
        if frame % 30 == 0 {
            info!(
                frame,
                live = report.live_particles,
                retired = report.retired,
                "fountain step"
            );
        }
    }

    let volume = fx
        .volume(volume)
        .ok_or_else(|| anyhow::anyhow!("fountain volume vanished"))?;
    info!(
        triangles = volume.mesh().triangle_count(),
        retired = events.count(FxEventKind::ParticleRetired),
        dropped = events.count(FxEventKind::FireDropped),
        "fountain finished"
    );

    for (view, center, path) in [
        (View::Front, Vec2::new(0.0, 2.0), "volume-fountain-front.png"),
        (View::Top, Vec2::ZERO, "volume-fountain-top.png"),
    ] {
        let config = RenderConfig::new((800, 800), Vec2::splat(7.0))
            .with_center(center)
            .with_view(view);
        let mut canvas = Canvas::new(config);
        canvas.draw_mesh(volume.mesh(), volume.local_to_world(), [90, 170, 255]);
        canvas.draw_point(fountain.position, 4, [250, 200, 80]);
        canvas.save(path)?;
    }

    Ok(())
}
