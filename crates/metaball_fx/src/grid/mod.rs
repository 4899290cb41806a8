//! Corner lattices shared by the marching squares and marching cubes pipelines.
//!
//! A grid owns a [`CornerArena`] and a flat list of [`Cell`]s. Cells never own corners; they hold
//! [`CornerHandle`]s into the arena so every lattice point is stored exactly once and shared by up
//! to four (2D) or eight (3D) neighbouring cells.
//!
//! Builders:
//! - [`square::build_square_grid`]: oriented 2D decal lattice with optional surface probing
//! - [`cube::build_cube_grid`]: axis-aligned 3D lattice over a [`frame::BoundingBox`]
use std::collections::HashMap;

use glam::{UVec3, Vec3};

use crate::error::{Error, Result};

pub mod cube;
pub mod frame;
pub mod probe;
pub mod square;

/// Intensity at or above which a corner counts as inside the surface.
pub const ACTIVATION_THRESHOLD: f32 = 1.0;

/// Stable index of a corner inside its grid's [`CornerArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CornerHandle(u32);

impl CornerHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A lattice sample point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    /// World-space position.
    pub position: Vec3,
    /// Accumulated density from all contributing particles.
    pub intensity: f32,
    /// Whether `intensity` reached [`ACTIVATION_THRESHOLD`].
    pub active: bool,
}

impl Corner {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            intensity: 0.0,
            active: false,
        }
    }

    /// Stores a new intensity and refreshes the activation flag.
    #[inline]
    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity;
        self.active = intensity >= ACTIVATION_THRESHOLD;
    }
}

/// Owning storage for the corners of one grid.
#[derive(Debug, Clone, Default)]
pub struct CornerArena {
    corners: Vec<Corner>,
}

impl CornerArena {
    pub fn new() -> Self {
        Self {
            corners: Vec::new(),
        }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            corners: Vec::with_capacity(cap),
        }
    }

    /// Appends a corner at `position` and returns its handle.
    pub fn push(&mut self, position: Vec3) -> CornerHandle {
        let handle = CornerHandle(self.corners.len() as u32);
        self.corners.push(Corner::new(position));
        handle
    }

    #[inline]
    pub fn get(&self, handle: CornerHandle) -> &Corner {
        &self.corners[handle.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, handle: CornerHandle) -> &mut Corner {
        &mut self.corners[handle.index()]
    }

    pub fn len(&self) -> usize {
        self.corners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }

    pub fn as_slice(&self) -> &[Corner] {
        &self.corners
    }

    pub fn as_mut_slice(&mut self) -> &mut [Corner] {
        &mut self.corners
    }

    pub fn iter(&self) -> impl Iterator<Item = &Corner> {
        self.corners.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Corner> {
        self.corners.iter_mut()
    }

    /// Moves every corner by `delta`.
    pub fn translate(&mut self, delta: Vec3) {
        for corner in &mut self.corners {
            corner.position += delta;
        }
    }

    /// Resets every corner to zero intensity.
    pub fn clear_intensities(&mut self) {
        for corner in &mut self.corners {
            corner.set_intensity(0.0);
        }
    }

    /// Number of corners currently inside the surface.
    pub fn active_count(&self) -> usize {
        self.corners.iter().filter(|c| c.active).count()
    }
}

/// A group of `N` corners triangulated as one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell<const N: usize> {
    /// Corner handles in the grid's fixed corner ordering.
    pub corners: [CornerHandle; N],
    /// Set when the cell has no supporting surface and must be skipped.
    pub disabled: bool,
}

impl<const N: usize> Cell<N> {
    #[inline]
    pub fn corner(&self, slot: usize) -> CornerHandle {
        self.corners[slot]
    }
}

/// Marching squares cell.
pub type SquareCell = Cell<4>;
/// Marching cubes cell.
pub type CubeCell = Cell<8>;

/// A corner lattice and the cells that reference it.
#[derive(Debug, Clone)]
pub struct Grid<const N: usize> {
    pub(crate) corners: CornerArena,
    pub(crate) cells: Vec<Cell<N>>,
    pub(crate) dims: UVec3,
    pub(crate) cell_size: Vec3,
}

/// Oriented 2D lattice.
pub type SquareGrid = Grid<4>;
/// Axis-aligned 3D lattice.
pub type CubeGrid = Grid<8>;

impl<const N: usize> Grid<N> {
    pub fn corners(&self) -> &CornerArena {
        &self.corners
    }

    pub fn corners_mut(&mut self) -> &mut CornerArena {
        &mut self.corners
    }

    pub fn cells(&self) -> &[Cell<N>] {
        &self.cells
    }

    /// Cells per axis. The z component is 1 for 2D grids.
    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    /// Cell edge lengths along the grid's local axes.
    pub fn cell_size(&self) -> Vec3 {
        self.cell_size
    }

    pub fn corner_count(&self) -> usize {
        self.corners.len()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn disabled_count(&self) -> usize {
        self.cells.iter().filter(|c| c.disabled).count()
    }

    /// Splits the grid into its corners (mutable) and cells (shared).
    pub fn split_mut(&mut self) -> (&mut CornerArena, &[Cell<N>]) {
        (&mut self.corners, &self.cells)
    }
}

/// In-progress cell whose corner slots are filled by the sweep and fixup passes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingCell<const N: usize> {
    pub slots: [Option<CornerHandle>; N],
    pub anchor: Vec3,
    pub disabled: bool,
}

impl<const N: usize> PendingCell<N> {
    pub fn new(anchor: Vec3) -> Self {
        Self {
            slots: [None; N],
            anchor,
            disabled: false,
        }
    }
}

/// Lattice geometry needed by the fixup pass.
pub(crate) trait LatticeLayout<const N: usize> {
    /// Lattice offset of `slot` relative to the cell's corner 0.
    fn slot_offset(&self, slot: usize) -> UVec3;
    /// World-space displacement for a lattice offset.
    fn offset_to_world(&self, offset: UVec3) -> Vec3;
}

/// Fills every unassigned slot with a corner at its geometric position, sharing corners between
/// boundary cells by lattice coordinate, then resolves all slots into final cells.
pub(crate) fn finish_cells<const N: usize, L: LatticeLayout<N>>(
    pending: Vec<PendingCell<N>>,
    dims: UVec3,
    layout: &L,
    corners: &mut CornerArena,
) -> Result<Vec<Cell<N>>> {
    let mut boundary: HashMap<UVec3, CornerHandle> = HashMap::new();
    let mut cells = Vec::with_capacity(pending.len());

    for (index, mut cell) in pending.into_iter().enumerate() {
        let coord = lattice_coord(index, dims);
        for slot in 0..N {
            if cell.slots[slot].is_some() {
                continue;
            }
            let offset = layout.slot_offset(slot);
            let key = coord + offset;
            let handle = *boundary
                .entry(key)
                .or_insert_with(|| corners.push(cell.anchor + layout.offset_to_world(offset)));
            cell.slots[slot] = Some(handle);
        }

        let mut resolved = [CornerHandle(0); N];
        for (slot, handle) in cell.slots.iter().enumerate() {
            resolved[slot] = handle.ok_or_else(|| {
                Error::Topology(format!("cell {index} left build with empty slot {slot}"))
            })?;
        }
        cells.push(Cell {
            corners: resolved,
            disabled: cell.disabled,
        });
    }

    Ok(cells)
}

/// Lattice coordinate of the cell at flat `index` (x fastest, then y, then z).
#[inline]
pub(crate) fn lattice_coord(index: usize, dims: UVec3) -> UVec3 {
    let index = index as u32;
    let layer = dims.x * dims.y;
    UVec3::new(index % dims.x, (index % layer) / dims.x, index / layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_activation_is_inclusive() {
        let mut corner = Corner::new(Vec3::ZERO);
        corner.set_intensity(0.999);
        assert!(!corner.active);
        corner.set_intensity(ACTIVATION_THRESHOLD);
        assert!(corner.active);
        corner.set_intensity(0.0);
        assert!(!corner.active);
    }

    #[test]
    fn arena_hands_out_sequential_handles() {
        let mut arena = CornerArena::with_capacity(2);
        let a = arena.push(Vec3::X);
        let b = arena.push(Vec3::Y);
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena.get(b).position, Vec3::Y);
    }

    #[test]
    fn arena_translate_moves_all_corners() {
        let mut arena = CornerArena::new();
        arena.push(Vec3::ZERO);
        arena.push(Vec3::ONE);
        arena.translate(Vec3::new(0.0, 2.0, 0.0));
        let ys: Vec<f32> = arena.iter().map(|c| c.position.y).collect();
        assert_eq!(ys, vec![2.0, 3.0]);
    }

    #[test]
    fn lattice_coord_walks_x_fastest() {
        let dims = UVec3::new(3, 2, 2);
        assert_eq!(lattice_coord(0, dims), UVec3::ZERO);
        assert_eq!(lattice_coord(2, dims), UVec3::new(2, 0, 0));
        assert_eq!(lattice_coord(3, dims), UVec3::new(0, 1, 0));
        assert_eq!(lattice_coord(7, dims), UVec3::new(1, 0, 1));
    }
}
