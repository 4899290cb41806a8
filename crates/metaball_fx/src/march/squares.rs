//! Marching squares over a [`SquareGrid`].
//!
//! Each of the 16 masks maps to a short list of triangles and quads built from cell corners and
//! edge crossings. The three-corner cases route through the crossing on the 0-2 diagonal, and the
//! checkerboard masks 5 and 10 produce two unconnected corner triangles.
use glam::Vec3;

use super::{Interpolation, MeshBuffers};
use crate::grid::{CornerArena, SquareCell, SquareGrid};

#[derive(Debug, Clone, Copy)]
enum Pt {
    Corner(u8),
    Edge(u8, u8),
}

#[derive(Debug, Clone, Copy)]
enum Piece {
    Tri([Pt; 3]),
    Quad([Pt; 4]),
}

use Piece::{Quad, Tri};
use Pt::{Corner as C, Edge as E};

const SQUARE_CASES: [&[Piece]; 16] = [
    // 0
    &[],
    // 1
    &[Tri([C(0), E(0, 1), E(0, 3)])],
    // 2
    &[Tri([C(1), E(1, 2), E(0, 1)])],
    // 3
    &[Quad([C(0), C(1), E(1, 2), E(0, 3)])],
    // 4
    &[Tri([C(2), E(2, 3), E(2, 1)])],
    // 5
    &[
        Tri([C(0), E(0, 1), E(0, 3)]),
        Tri([C(2), E(2, 3), E(2, 1)]),
    ],
    // 6
    &[Quad([C(1), C(2), E(2, 3), E(1, 0)])],
    // 7
    &[
        Quad([C(1), C(2), E(2, 3), E(1, 0)]),
        Tri([E(0, 2), E(2, 3), E(0, 3)]),
        Quad([E(0, 1), E(0, 2), E(0, 3), C(0)]),
    ],
    // 8
    &[Tri([E(2, 3), C(3), E(0, 3)])],
    // 9
    &[Quad([C(3), C(0), E(1, 0), E(2, 3)])],
    // 10
    &[
        Tri([C(1), E(1, 2), E(0, 1)]),
        Tri([C(3), E(0, 3), E(3, 2)]),
    ],
    // 11
    &[
        Quad([C(0), E(0, 1), E(2, 3), C(3)]),
        Tri([E(1, 2), E(2, 3), E(0, 2)]),
        Quad([E(1, 2), E(0, 2), E(0, 1), C(1)]),
    ],
    // 12
    &[Quad([C(2), C(3), E(3, 0), E(1, 2)])],
    // 13
    &[
        Quad([C(2), C(3), E(3, 0), E(2, 1)]),
        Tri([E(1, 2), E(2, 0), E(0, 1)]),
        Quad([E(1, 0), E(0, 2), E(0, 3), C(0)]),
    ],
    // 14
    &[
        Quad([C(2), E(2, 3), E(1, 0), C(1)]),
        Tri([E(1, 0), E(2, 0), E(0, 3)]),
        Quad([E(2, 3), C(3), E(0, 3), E(0, 2)]),
    ],
    // 15
    &[Quad([C(0), C(1), C(2), C(3)])],
];

/// 4-bit mask with bit `k` set when corner `k` is active.
#[inline]
pub fn square_configuration(corners: &CornerArena, cell: &SquareCell) -> u8 {
    let mut mask = 0u8;
    for (k, handle) in cell.corners.iter().enumerate() {
        if corners.get(*handle).active {
            mask |= 1 << k;
        }
    }
    mask
}

/// Triangulates one square. Disabled cells emit nothing. Returns the number of triangles.
pub fn triangulate_square(
    corners: &CornerArena,
    cell: &SquareCell,
    interpolation: Interpolation,
    mesh: &mut MeshBuffers,
) -> usize {
    if cell.disabled {
        return 0;
    }
    let resolve = |pt: Pt| -> Vec3 {
        match pt {
            Pt::Corner(k) => corners.get(cell.corners[k as usize]).position,
            Pt::Edge(a, b) => {
                let ca = corners.get(cell.corners[a as usize]);
                let cb = corners.get(cell.corners[b as usize]);
                interpolation.edge_point(ca.position, ca.intensity, cb.position, cb.intensity)
            }
        }
    };

    let mut emitted = 0;
    for piece in SQUARE_CASES[square_configuration(corners, cell) as usize] {
        match *piece {
            Tri([a, b, c]) => {
                mesh.add_triangle(resolve(a), resolve(b), resolve(c));
                emitted += 1;
            }
            Quad([a, b, c, d]) => {
                mesh.add_quad(resolve(a), resolve(b), resolve(c), resolve(d));
                emitted += 2;
            }
        }
    }
    emitted
}

/// Triangulates every enabled cell of `grid`. Returns the number of triangles emitted.
pub fn triangulate_squares(
    grid: &SquareGrid,
    interpolation: Interpolation,
    mesh: &mut MeshBuffers,
) -> usize {
    grid.cells()
        .iter()
        .map(|c| triangulate_square(grid.corners(), c, interpolation, mesh))
        .sum()
}
