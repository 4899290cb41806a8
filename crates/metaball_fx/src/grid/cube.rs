//! Axis-aligned 3D lattice for metaball volumes.
//!
//! Corner ordering inside a [`CubeCell`](super::CubeCell) follows the classic marching cubes
//! layout so the edge and triangle tables apply directly:
//!
//! ```text
//!     7 ------ 6
//!    /|       /|
//!   4 ------ 5 |        y
//!   | 3 -----|-2        |  z
//!   |/       |/         | /
//!   0 ------ 1          |/___ x
//! ```
use glam::{UVec3, Vec3};
use tracing::debug;

use super::frame::BoundingBox;
use super::{finish_cells, CornerArena, CubeGrid, LatticeLayout, PendingCell};
use crate::error::{Error, Result};

/// Lattice offsets of the eight cube corners.
pub const CUBE_OFFSETS: [UVec3; 8] = [
    UVec3::new(0, 0, 0),
    UVec3::new(1, 0, 0),
    UVec3::new(1, 0, 1),
    UVec3::new(0, 0, 1),
    UVec3::new(0, 1, 0),
    UVec3::new(1, 1, 0),
    UVec3::new(1, 1, 1),
    UVec3::new(0, 1, 1),
];

struct CubeLayout {
    cell_size: Vec3,
}

impl LatticeLayout<8> for CubeLayout {
    fn slot_offset(&self, slot: usize) -> UVec3 {
        CUBE_OFFSETS[slot]
    }

    fn offset_to_world(&self, offset: UVec3) -> Vec3 {
        offset.as_vec3() * self.cell_size
    }
}

/// Cells per axis for a box of `size` at `resolution` cells per world unit. The size is not
/// truncated first, so fractional sizes keep their share of cells.
pub fn cells_per_axis(size: Vec3, resolution: u32) -> UVec3 {
    let scaled = (size * resolution as f32).floor().max(Vec3::ONE);
    scaled.as_uvec3()
}

/// Builds a lattice filling `bounds` with `resolution` cells per world unit.
pub fn build_cube_grid(bounds: &BoundingBox, resolution: u32) -> Result<CubeGrid> {
    bounds.validate()?;
    if resolution == 0 {
        return Err(Error::InvalidConfig("resolution must be > 0".into()));
    }

    let dims = cells_per_axis(bounds.size, resolution);
    let cell_size = bounds.size / dims.as_vec3();
    let (w, h, d) = (dims.x as usize, dims.y as usize, dims.z as usize);
    let row = w;
    let layer = w * h;
    let min = bounds.min();

    let mut corners = CornerArena::with_capacity((w + 1) * (h + 1) * (d + 1));
    let mut pending: Vec<PendingCell<8>> = Vec::with_capacity(w * h * d);

    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let i = z * layer + y * row + x;
                let anchor = min + Vec3::new(x as f32, y as f32, z as f32) * cell_size;
                let handle = corners.push(anchor);
                let mut cell = PendingCell::new(anchor);
                cell.slots[0] = Some(handle);
                pending.push(cell);

                if x > 0 {
                    pending[i - 1].slots[1] = Some(handle);
                }
                if y > 0 {
                    pending[i - row].slots[4] = Some(handle);
                    if x > 0 {
                        pending[i - row - 1].slots[5] = Some(handle);
                    }
                }
                if z > 0 {
                    pending[i - layer].slots[3] = Some(handle);
                    if x > 0 {
                        pending[i - layer - 1].slots[2] = Some(handle);
                        if y > 0 {
                            pending[i - layer - row - 1].slots[6] = Some(handle);
                        }
                    }
                    if y > 0 {
                        pending[i - layer - row].slots[7] = Some(handle);
                    }
                }
            }
        }
    }

    let cells = finish_cells(pending, dims, &CubeLayout { cell_size }, &mut corners)?;
    let grid = CubeGrid {
        corners,
        cells,
        dims,
        cell_size,
    };
    debug!(
        "Built cube grid {}x{}x{}: {} corners.",
        dims.x,
        dims.y,
        dims.z,
        grid.corner_count()
    );
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(size: f32) -> BoundingBox {
        BoundingBox::new(Vec3::ZERO, Vec3::splat(size))
    }

    #[test]
    fn dims_follow_size_and_resolution() {
        assert_eq!(cells_per_axis(Vec3::new(2.0, 1.0, 3.0), 3), UVec3::new(6, 3, 9));
        assert_eq!(cells_per_axis(Vec3::splat(0.1), 2), UVec3::ONE);
    }

    #[test]
    fn fractional_sizes_keep_their_cells() {
        assert_eq!(cells_per_axis(Vec3::new(2.5, 1.75, 1.0), 2), UVec3::new(5, 3, 2));
    }

    #[test]
    fn corner_count_matches_shared_lattice() {
        let bounds = BoundingBox::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        let grid = build_cube_grid(&bounds, 2).unwrap();
        assert_eq!(grid.dims(), UVec3::new(4, 2, 2));
        assert_eq!(grid.cell_count(), 16);
        assert_eq!(grid.corner_count(), 5 * 3 * 3);
    }

    #[test]
    fn cell_corners_sit_at_their_offsets() {
        let grid = build_cube_grid(&unit_box(2.0), 1).unwrap();
        let corners = grid.corners();
        for (index, cell) in grid.cells().iter().enumerate() {
            let base = corners.get(cell.corner(0)).position;
            for (slot, offset) in CUBE_OFFSETS.iter().enumerate() {
                let expected = base + offset.as_vec3() * grid.cell_size();
                let actual = corners.get(cell.corner(slot)).position;
                assert!(
                    (expected - actual).length() < 1e-5,
                    "cell {index} slot {slot}: {actual} != {expected}"
                );
            }
        }
    }

    #[test]
    fn interior_corner_is_shared_by_eight_cells() {
        let grid = build_cube_grid(&unit_box(2.0), 1).unwrap();
        let mut refs = vec![0usize; grid.corner_count()];
        for cell in grid.cells() {
            for handle in cell.corners {
                refs[handle.index()] += 1;
            }
        }
        assert!(refs.iter().all(|&r| r > 0));
        assert_eq!(refs.iter().filter(|&&r| r == 8).count(), 1);
    }

    #[test]
    fn grid_spans_the_bounds() {
        let bounds = BoundingBox::new(Vec3::new(1.0, 2.0, 3.0), Vec3::splat(2.0));
        let grid = build_cube_grid(&bounds, 2).unwrap();
        let (mut lo, mut hi) = (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN));
        for corner in grid.corners().iter() {
            lo = lo.min(corner.position);
            hi = hi.max(corner.position);
        }
        assert!((lo - bounds.min()).length() < 1e-5);
        assert!((hi - bounds.max()).length() < 1e-5);
    }

    #[test]
    fn rebuild_is_stable() {
        let bounds = unit_box(3.0);
        let a = build_cube_grid(&bounds, 2).unwrap();
        let b = build_cube_grid(&bounds, 2).unwrap();
        assert_eq!(a.corner_count(), b.corner_count());
        assert_eq!(a.cell_count(), b.cell_count());
    }

    #[test]
    fn zero_resolution_is_rejected() {
        assert!(matches!(
            build_cube_grid(&unit_box(1.0), 0),
            Err(Error::InvalidConfig(_))
        ));
    }
}
