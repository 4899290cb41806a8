//! Oriented 2D lattice for decal grids.
//!
//! Corner ordering inside a [`SquareCell`](super::SquareCell):
//!
//! ```text
//! 3 ---- 2
//! |      |
//! 0 ---- 1      (right = +x, up = +y in the frame's local plane)
//! ```
use glam::{UVec3, Vec3};
use tracing::debug;

use super::frame::SquareFrame;
use super::probe::{ProbeSettings, SurfaceProbe};
use super::{finish_cells, CornerArena, LatticeLayout, PendingCell, SquareGrid};
use crate::error::Result;

/// Lattice offsets of the four square corners.
const SQUARE_OFFSETS: [UVec3; 4] = [
    UVec3::new(0, 0, 0),
    UVec3::new(1, 0, 0),
    UVec3::new(1, 1, 0),
    UVec3::new(0, 1, 0),
];

struct SquareLayout {
    right: Vec3,
    up: Vec3,
}

impl LatticeLayout<4> for SquareLayout {
    fn slot_offset(&self, slot: usize) -> UVec3 {
        SQUARE_OFFSETS[slot]
    }

    fn offset_to_world(&self, offset: UVec3) -> Vec3 {
        self.right * offset.x as f32 + self.up * offset.y as f32
    }
}

/// Builds a `resolution x resolution` grid over `frame`.
///
/// When a probe is supplied each cell is raycast against the surface below it: cells with a
/// facing surface snap onto it, cells without one are marked disabled.
pub fn build_square_grid(
    frame: &SquareFrame,
    probe: Option<&mut dyn SurfaceProbe>,
) -> Result<SquareGrid> {
    build_square_grid_with(frame, probe, &ProbeSettings::default())
}

/// Like [`build_square_grid`] with explicit probe distances.
pub fn build_square_grid_with(
    frame: &SquareFrame,
    mut probe: Option<&mut dyn SurfaceProbe>,
    probe_settings: &ProbeSettings,
) -> Result<SquareGrid> {
    frame.validate()?;
    probe_settings.validate()?;

    let res = frame.resolution as usize;
    let cell_size = frame.cell_size();
    let right = frame.right();
    let up = frame.up();
    let forward = frame.forward();
    let origin = frame.origin();

    let mut corners = CornerArena::with_capacity((res + 1) * (res + 1));
    let mut pending: Vec<PendingCell<4>> = Vec::with_capacity(res * res);

    for y in 0..res {
        for x in 0..res {
            let i = y * res + x;
            let mut anchor = origin + right * (x as f32 * cell_size) + up * (y as f32 * cell_size);
            let mut disabled = false;

            if let Some(probe) = probe.as_deref_mut() {
                let ray_origin = anchor + forward * probe_settings.lift;
                match probe.probe(ray_origin.into(), (-forward).into(), probe_settings.reach) {
                    Some(hit) if forward.dot(Vec3::from(hit.normal)) > 0.0 => {
                        anchor = Vec3::from(hit.point)
                            + Vec3::from(hit.normal) * probe_settings.surface_offset;
                    }
                    _ => disabled = true,
                }
            }

            let mut cell = PendingCell::new(anchor);
            cell.disabled = disabled;
            let handle = corners.push(anchor);
            cell.slots[0] = Some(handle);
            pending.push(cell);

            if x > 0 {
                pending[i - 1].slots[1] = Some(handle);
            }
            if y > 0 {
                pending[i - res].slots[3] = Some(handle);
                if x > 0 {
                    pending[i - res - 1].slots[2] = Some(handle);
                }
            }
        }
    }

    let dims = UVec3::new(frame.resolution, frame.resolution, 1);
    let layout = SquareLayout {
        right: right * cell_size,
        up: up * cell_size,
    };
    let cells = finish_cells(pending, dims, &layout, &mut corners)?;

    let grid = SquareGrid {
        corners,
        cells,
        dims,
        cell_size: Vec3::new(cell_size, cell_size, 0.0),
    };
    debug!(
        "Built square grid: {} cells, {} corners, {} disabled.",
        grid.cell_count(),
        grid.corner_count(),
        grid.disabled_count()
    );
    Ok(grid)
}
