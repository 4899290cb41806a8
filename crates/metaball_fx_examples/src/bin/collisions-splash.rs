use glam::{Affine3A, Quat, Vec2, Vec3};
use metaball_fx::prelude::*;
use metaball_fx_examples::{init_tracing, Canvas, RenderConfig, View};
use tracing::info;

const FLOOR: SurfaceId = SurfaceId(1);

fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut fx = FxContext::new(
        FxSettings::default()
            .with_pool_capacity(64)
            .with_decals(DecalSettings::new(1.0, 20, 24))
            .with_seed(21),
    )?;
    let mut events = VecSink::only([
        FxEventKind::Bounced,
        FxEventKind::StainPlaced,
        FxEventKind::StainReused,
    ]);

    let volume = fx.add_volume(
        VolumeSettings::new(BoundingBox::new(
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::new(8.0, 4.0, 8.0),
        ))
        .with_name("splash")
        .with_resolution(2)
        .with_material(Some(0)),
        &mut events,
    )?;

    // A ring of releases 3 units up, flung outwards and up before gravity takes over
    let splash = Splash::new(Vec3::new(0.0, 3.0, 0.0), Quat::from_rotation_x(-90f32.to_radians()))
        .with_count(16);
    let fired = fx.fire_many(Some(volume), splash.requests(), &mut events);
    info!(fired, "splash released");

    let mut floor = PlaneProbe::new(Vec3::ZERO, Vec3::Y);
    let dt = 1.0 / 60.0;
    for _ in 0..180 {
        fx.advance(dt, Vec3::new(0.0, 3.0, 10.0), &mut events);

        let hits: Vec<CollisionEvent> = fx
            .pool()
            .iter()
            .filter(|(_, p)| !p.bounced() && p.position.y <= 0.0)
            .map(|(id, p)| {
                CollisionEvent::new(id, Vec3::new(p.position.x, 0.0, p.position.z), Vec3::Y)
                    .with_relative_velocity(-p.velocity)
                    .with_surface(FLOOR, 0)
            })
            .collect();
        for hit in &hits {
            fx.handle_collision(hit, Some(&mut floor as &mut dyn SurfaceProbe), &mut events)?;
        }
    }

    info!(
        bounced = events.count(FxEventKind::Bounced),
        placed = events.count(FxEventKind::StainPlaced),
        reused = events.count(FxEventKind::StainReused),
        "splash landed"
    );

    let config = RenderConfig::new((900, 900), Vec2::splat(12.0))
        .with_view(View::Top)
        .with_background([40, 44, 52]);
    let mut canvas = Canvas::new(config);
    for grid in fx.decals().active() {
        let to_world = grid.local_to_world().unwrap_or(Affine3A::IDENTITY);
        canvas.draw_mesh(grid.mesh(), to_world, [120, 200, 255]);
    }
    for (_, particle) in fx.pool().iter() {
        canvas.draw_point(particle.position, 2, [255, 255, 255]);
    }
    canvas.save("collisions-splash.png")?;

    Ok(())
}
