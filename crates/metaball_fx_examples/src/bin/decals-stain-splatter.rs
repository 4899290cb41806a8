use glam::{Affine3A, Vec2, Vec3};
use metaball_fx::prelude::*;
use metaball_fx_examples::{init_tracing, Canvas, RenderConfig, View};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

const PALETTE: [[u8; 3]; 3] = [[200, 40, 50], [60, 170, 90], [230, 190, 60]];

fn main() -> anyhow::Result<()> {
    init_tracing();

    let decals = DecalSettings::new(1.25, 24, 12).with_grid(
        DecalGridSettings::default()
            .with_dry_out(3.0)
            .with_gravity(Vec3::new(0.3, -1.0, 0.0), 0.5),
    );
    let mut fx = FxContext::new(FxSettings::default().with_decals(decals).with_seed(3))?;

    // The floor ends 3 units from the origin, so stains near the rim get trimmed
    let mut floor = PlaneProbe::new(Vec3::ZERO, Vec3::Y).with_radius(3.0);
    let mut rng = StdRng::seed_from_u64(9);
    let mut events = VecSink::only([
        FxEventKind::StainPlaced,
        FxEventKind::StainReused,
        FxEventKind::DecalDried,
    ]);

    for i in 0..16u32 {
        let position = Vec3::new(rng.random_range(-3.0..3.0), 0.0, rng.random_range(-3.0..3.0));
        let request = StainRequest::new(position, Vec3::Y, StainSource::External)
            .with_material(Some(i % PALETTE.len() as u32))
            .with_size(rng.random_range(0.6..1.4));
        fx.request_stain(&request, Some(&mut floor as &mut dyn SurfaceProbe), &mut events)?;
    }

    let dt = 1.0 / 60.0;
    for _ in 0..120 {
        fx.advance(dt, Vec3::new(0.0, 8.0, 0.0), &mut events);
    }

    info!(
        placed = events.count(FxEventKind::StainPlaced),
        reused = events.count(FxEventKind::StainReused),
        dried = events.count(FxEventKind::DecalDried),
        active = fx.decals().active_count(),
        "stains settled"
    );

    let config = RenderConfig::new((900, 900), Vec2::splat(8.0))
        .with_view(View::Top)
        .with_background([235, 232, 225]);
    let mut canvas = Canvas::new(config);
    for grid in fx.decals().active() {
        let color = grid
            .material()
            .map_or([80, 80, 80], |m| PALETTE[m as usize % PALETTE.len()]);
        let to_world = grid.local_to_world().unwrap_or(Affine3A::IDENTITY);
        canvas.draw_mesh(grid.mesh(), to_world, color);
    }
    canvas.save("decals-stain-splatter.png")?;

    Ok(())
}
