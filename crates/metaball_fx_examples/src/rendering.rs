use std::path::Path;

use glam::{Affine3A, Vec2, Vec3};
use image::{Rgb, RgbImage};
use metaball_fx::prelude::MeshBuffers;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber honoring `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Orthographic camera direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    /// Looking down -Y; image right is +X, image up is -Z.
    Top,
    /// Looking down -Z; image right is +X, image up is +Y.
    Front,
}

impl View {
    fn project(self, p: Vec3) -> Vec2 {
        match self {
            View::Top => Vec2::new(p.x, -p.z),
            View::Front => Vec2::new(p.x, p.y),
        }
    }

    /// Larger is closer to the camera.
    fn depth(self, p: Vec3) -> f32 {
        match self {
            View::Top => p.y,
            View::Front => p.z,
        }
    }

    fn toward_camera(self) -> Vec3 {
        match self {
            View::Top => Vec3::Y,
            View::Front => Vec3::Z,
        }
    }
}

/// Output image size and the world window it shows.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub image_size: (u32, u32),
    pub center: Vec2,
    pub extent: Vec2,
    pub view: View,
    pub background: [u8; 3],
}

impl RenderConfig {
    pub fn new(image_size: (u32, u32), extent: Vec2) -> Self {
        Self {
            image_size,
            center: Vec2::ZERO,
            extent,
            view: View::Front,
            background: [24, 26, 33],
        }
    }

    pub fn with_center(mut self, center: Vec2) -> Self {
        self.center = center;
        self
    }

    pub fn with_view(mut self, view: View) -> Self {
        self.view = view;
        self
    }

    pub fn with_background(mut self, background: [u8; 3]) -> Self {
        self.background = background;
        self
    }

    fn to_pixel(&self, world: Vec3) -> Vec2 {
        let (w, h) = self.image_size;
        let rel = (self.view.project(world) - (self.center - self.extent * 0.5)) / self.extent;
        Vec2::new(rel.x * w as f32, (1.0 - rel.y) * h as f32)
    }
}

/// Depth-buffered flat-shaded triangle rasterizer.
pub struct Canvas {
    config: RenderConfig,
    image: RgbImage,
    depth: Vec<f32>,
}

impl Canvas {
    pub fn new(config: RenderConfig) -> Self {
        let (w, h) = config.image_size;
        let image = RgbImage::from_pixel(w, h, Rgb(config.background));
        Self {
            depth: vec![f32::NEG_INFINITY; (w * h) as usize],
            config,
            image,
        }
    }

    /// Draws every triangle of `mesh`, transformed by `local_to_world`. Returns triangles drawn.
    pub fn draw_mesh(
        &mut self,
        mesh: &MeshBuffers,
        local_to_world: Affine3A,
        color: [u8; 3],
    ) -> usize {
        let positions = mesh.positions();
        let mut drawn = 0;
        for tri in mesh.indices().chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]]
                .map(|i| local_to_world.transform_point3(positions[i as usize]));
            let normal = (b - a).cross(c - a).normalize_or_zero();
            let light = 0.35 + 0.65 * normal.dot(self.config.view.toward_camera()).abs();
            let shade = color.map(|ch| (ch as f32 * light).round().clamp(0.0, 255.0) as u8);
            self.fill_triangle(a, b, c, shade);
            drawn += 1;
        }
        drawn
    }

    /// Draws a filled dot of `radius` pixels, always on top.
    pub fn draw_point(&mut self, world: Vec3, radius: i32, color: [u8; 3]) {
        let p = self.config.to_pixel(world);
        let (w, h) = self.config.image_size;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy > radius * radius {
                    continue;
                }
                let x = p.x as i32 + dx;
                let y = p.y as i32 + dy;
                if x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h {
                    self.image.put_pixel(x as u32, y as u32, Rgb(color));
                }
            }
        }
    }

    fn fill_triangle(&mut self, a: Vec3, b: Vec3, c: Vec3, color: [u8; 3]) {
        let (w, h) = self.config.image_size;
        let (pa, pb, pc) = (
            self.config.to_pixel(a),
            self.config.to_pixel(b),
            self.config.to_pixel(c),
        );
        let area = edge(pa, pb, pc);
        if area.abs() < f32::EPSILON {
            return;
        }
        let (da, db, dc) = (
            self.config.view.depth(a),
            self.config.view.depth(b),
            self.config.view.depth(c),
        );

        let min = pa.min(pb).min(pc).max(Vec2::ZERO);
        let max = pa.max(pb).max(pc).min(Vec2::new(w as f32 - 1.0, h as f32 - 1.0));
        if min.x > max.x || min.y > max.y {
            return;
        }
        for y in min.y as u32..=max.y as u32 {
            for x in min.x as u32..=max.x as u32 {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let wa = edge(pb, pc, p) / area;
                let wb = edge(pc, pa, p) / area;
                let wc = edge(pa, pb, p) / area;
                if wa < 0.0 || wb < 0.0 || wc < 0.0 {
                    continue;
                }
                let z = wa * da + wb * db + wc * dc;
                let slot = (y * w + x) as usize;
                if z < self.depth[slot] {
                    continue;
                }
                self.depth[slot] = z;
                self.image.put_pixel(x, y, Rgb(color));
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        self.image.save(path)?;
        info!("Wrote {}", path.display());
        Ok(())
    }
}

#[inline]
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b - a).perp_dot(p - a)
}
