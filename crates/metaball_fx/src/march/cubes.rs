//! Marching cubes over a [`CubeGrid`].
use glam::Vec3;

use super::tables::{EDGE_CORNERS, EDGE_TABLE, TRI_TABLE};
use super::{Interpolation, MeshBuffers};
use crate::grid::{CornerArena, CubeCell, CubeGrid};

/// 8-bit mask with bit `k` set when corner `k` is active.
#[inline]
pub fn cube_configuration(corners: &CornerArena, cell: &CubeCell) -> u8 {
    let mut mask = 0u8;
    for (k, handle) in cell.corners.iter().enumerate() {
        if corners.get(*handle).active {
            mask |= 1 << k;
        }
    }
    mask
}

/// Triangulates one cube. Returns the number of triangles emitted.
pub fn triangulate_cube(
    corners: &CornerArena,
    cell: &CubeCell,
    interpolation: Interpolation,
    mesh: &mut MeshBuffers,
) -> usize {
    let mask = cube_configuration(corners, cell) as usize;
    let edges = EDGE_TABLE[mask];
    if edges == 0 {
        return 0;
    }

    let mut points = [Vec3::ZERO; 12];
    for (e, &(a, b)) in EDGE_CORNERS.iter().enumerate() {
        if edges & (1 << e) != 0 {
            let ca = corners.get(cell.corners[a]);
            let cb = corners.get(cell.corners[b]);
            points[e] =
                interpolation.edge_point(ca.position, ca.intensity, cb.position, cb.intensity);
        }
    }

    let mut emitted = 0;
    for tri in TRI_TABLE[mask].chunks_exact(3) {
        if tri[0] < 0 {
            break;
        }
        mesh.add_triangle(
            points[tri[0] as usize],
            points[tri[1] as usize],
            points[tri[2] as usize],
        );
        emitted += 1;
    }
    emitted
}

/// Triangulates every enabled cell of `grid`. Returns the number of triangles emitted.
pub fn triangulate_cubes(
    grid: &CubeGrid,
    interpolation: Interpolation,
    mesh: &mut MeshBuffers,
) -> usize {
    grid.cells()
        .iter()
        .filter(|c| !c.disabled)
        .map(|c| triangulate_cube(grid.corners(), c, interpolation, mesh))
        .sum()
}

#[cfg(test)]
mod tests {
    use glam::Affine3A;

    use super::*;
    use crate::field::{accumulate, DensitySource};
    use crate::grid::cube::build_cube_grid;
    use crate::grid::frame::BoundingBox;

    fn unit_cube() -> CubeGrid {
        build_cube_grid(&BoundingBox::new(Vec3::splat(0.5), Vec3::ONE), 1).unwrap()
    }

    fn set_active(grid: &mut CubeGrid, mask: u8) {
        let cell = grid.cells()[0];
        for k in 0..8 {
            let intensity = if mask & (1 << k) != 0 { 2.0 } else { 0.0 };
            grid.corners_mut().get_mut(cell.corner(k)).set_intensity(intensity);
        }
    }

    #[test]
    fn empty_and_full_masks_emit_nothing() {
        let mut grid = unit_cube();
        let mut mesh = MeshBuffers::new();
        assert_eq!(triangulate_cubes(&grid, Interpolation::Ratio, &mut mesh), 0);
        set_active(&mut grid, 0xff);
        assert_eq!(triangulate_cubes(&grid, Interpolation::Ratio, &mut mesh), 0);
        assert!(mesh.is_empty());
    }

    #[test]
    fn single_corner_emits_one_triangle() {
        let mut grid = unit_cube();
        set_active(&mut grid, 0b0000_0001);
        let cell = grid.cells()[0];
        assert_eq!(cube_configuration(grid.corners(), &cell), 1);
        let mut mesh = MeshBuffers::new();
        assert_eq!(triangulate_cubes(&grid, Interpolation::Midpoint, &mut mesh), 1);
        // Midpoints of the three edges leaving corner 0.
        let mut got: Vec<[f32; 3]> = mesh.position_arrays();
        got.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(got, vec![[0.0, 0.0, 0.5], [0.0, 0.5, 0.0], [0.5, 0.0, 0.0]]);
    }

    #[test]
    fn triangle_counts_follow_table() {
        let mut grid = unit_cube();
        for mask in [3u8, 7, 15, 0x81, 0x5a] {
            set_active(&mut grid, mask);
            let expected = TRI_TABLE[mask as usize]
                .iter()
                .take_while(|&&e| e >= 0)
                .count()
                / 3;
            let mut mesh = MeshBuffers::new();
            assert_eq!(
                triangulate_cubes(&grid, Interpolation::Ratio, &mut mesh),
                expected,
                "mask {mask:#x}"
            );
        }
    }

    #[test]
    fn triangulation_is_idempotent() {
        let mut grid =
            build_cube_grid(&BoundingBox::new(Vec3::ZERO, Vec3::splat(4.0)), 2).unwrap();
        accumulate(
            grid.corners_mut(),
            &[
                DensitySource::new(Vec3::ZERO, 1.6),
                DensitySource::new(Vec3::splat(0.5), 1.2),
            ],
        );
        let mut first = MeshBuffers::new();
        first.begin(Affine3A::IDENTITY);
        triangulate_cubes(&grid, Interpolation::Ratio, &mut first);
        let mut second = MeshBuffers::new();
        second.begin(Affine3A::IDENTITY);
        triangulate_cubes(&grid, Interpolation::Ratio, &mut second);
        assert!(first.triangle_count() > 0);
        assert_eq!(first.positions(), second.positions());
        assert_eq!(first.indices(), second.indices());
    }
}
