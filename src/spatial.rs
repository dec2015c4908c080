//! Uniform spatial grid for neighbor queries.
//!
//! The grid is a cubic lattice of `side³` cells covering the scene cube.
//! Cell width is twice the largest rule radius, so a particle's whole
//! interaction sphere fits in the 2×2×2 block of cells around the half of
//! its cell that it sits in (see [`NeighborWindow::Octant`]).
//!
//! Cells are identified by the flattened index `x + y * side + z * side²`.

use glam::{IVec3, UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::buffers::try_alloc;
use crate::error::SimulationError;
use crate::rules::FlockParams;
use crate::stage;

/// Which cells around a particle are searched for neighbors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborWindow {
    /// The particle's cell plus, on each axis independently, the one
    /// adjacent cell on the side of the half it occupies. Up to 8 cells.
    #[default]
    Octant,
    /// The particle's cell and all 26 surrounding cells.
    Full27,
}

impl NeighborWindow {
    /// Numeric tag used by the GPU uniforms.
    pub fn as_u32(self) -> u32 {
        match self {
            NeighborWindow::Octant => 0,
            NeighborWindow::Full27 => 1,
        }
    }
}

/// Grid geometry, derived once from the scene scale and rule radii.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridParams {
    cell_width: f32,
    inverse_cell_width: f32,
    side: u32,
    cell_count: u32,
    min: Vec3,
}

impl GridParams {
    /// Derive the lattice for a cube of half-width `scene_scale`.
    pub fn new(scene_scale: f32, flock: &FlockParams) -> Result<Self, SimulationError> {
        if !scene_scale.is_finite() || scene_scale <= 0.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "scene_scale must be finite and > 0, got {}",
                scene_scale
            )));
        }
        flock.validate()?;

        let cell_width = 2.0 * flock.max_distance();
        let half_side = (scene_scale / cell_width).floor() as u64 + 1;
        let side = 2 * half_side;
        let cell_count = side
            .checked_mul(side)
            .and_then(|n| n.checked_mul(side))
            .unwrap_or(u64::MAX);
        // u32::MAX is reserved as the empty / invalid marker.
        if cell_count >= u32::MAX as u64 {
            return Err(SimulationError::InvalidConfig(format!(
                "grid of {}^3 cells is too large; increase rule distances or shrink the scene",
                side
            )));
        }

        Ok(Self {
            cell_width,
            inverse_cell_width: 1.0 / cell_width,
            side: side as u32,
            cell_count: cell_count as u32,
            min: Vec3::splat(-cell_width * half_side as f32),
        })
    }

    /// Edge length of one cell.
    pub fn cell_width(&self) -> f32 {
        self.cell_width
    }

    /// Reciprocal of the cell width.
    pub fn inverse_cell_width(&self) -> f32 {
        self.inverse_cell_width
    }

    /// Number of cells along each axis.
    pub fn side(&self) -> u32 {
        self.side
    }

    /// Total number of cells (`side³`).
    pub fn cell_count(&self) -> u32 {
        self.cell_count
    }

    /// Minimum corner of the lattice.
    pub fn min(&self) -> Vec3 {
        self.min
    }

    /// Flatten a 3D cell coordinate.
    #[inline]
    pub fn flatten(&self, cell: UVec3) -> u32 {
        cell.x + cell.y * self.side + cell.z * self.side * self.side
    }

    /// Position in cell units relative to the lattice corner.
    #[inline]
    fn local(&self, pos: Vec3) -> Vec3 {
        (pos - self.min) * self.inverse_cell_width
    }

    /// Cell coordinate containing `pos`, or `None` outside the lattice.
    #[inline]
    pub fn cell_coord(&self, pos: Vec3) -> Option<UVec3> {
        let g = self.local(pos).floor();
        // NaN fails both comparisons.
        if g.cmpge(Vec3::ZERO).all() && g.cmplt(Vec3::splat(self.side as f32)).all() {
            Some(g.as_uvec3())
        } else {
            None
        }
    }

    /// Flattened cell index of `pos`, or `None` outside the lattice.
    #[inline]
    pub fn cell_of(&self, pos: Vec3) -> Option<u32> {
        self.cell_coord(pos).map(|c| self.flatten(c))
    }

    /// Cells to search for neighbors of a particle at `pos`.
    ///
    /// Cells outside the lattice are left out. Empty when `pos` itself is
    /// outside the lattice.
    pub fn candidate_cells(&self, pos: Vec3, window: NeighborWindow) -> CandidateCells {
        let mut out = CandidateCells::default();
        let Some(cell) = self.cell_coord(pos) else {
            return out;
        };
        let base = cell.as_ivec3();

        match window {
            NeighborWindow::Octant => {
                let frac = self.local(pos) - cell.as_vec3();
                let step = IVec3::new(
                    if frac.x >= 0.5 { 1 } else { -1 },
                    if frac.y >= 0.5 { 1 } else { -1 },
                    if frac.z >= 0.5 { 1 } else { -1 },
                );
                for dz in [0, step.z] {
                    for dy in [0, step.y] {
                        for dx in [0, step.x] {
                            self.push_if_inside(&mut out, base + IVec3::new(dx, dy, dz));
                        }
                    }
                }
            }
            NeighborWindow::Full27 => {
                for dz in -1..=1 {
                    for dy in -1..=1 {
                        for dx in -1..=1 {
                            self.push_if_inside(&mut out, base + IVec3::new(dx, dy, dz));
                        }
                    }
                }
            }
        }
        out
    }

    fn push_if_inside(&self, out: &mut CandidateCells, cell: IVec3) {
        let side = self.side as i32;
        if cell.cmpge(IVec3::ZERO).all() && cell.cmplt(IVec3::splat(side)).all() {
            out.push(self.flatten(cell.as_uvec3()));
        }
    }
}

/// Small fixed-capacity list of cell indices.
#[derive(Clone, Copy, Debug)]
pub struct CandidateCells {
    cells: [u32; 27],
    len: usize,
}

impl Default for CandidateCells {
    fn default() -> Self {
        Self {
            cells: [0; 27],
            len: 0,
        }
    }
}

impl CandidateCells {
    fn push(&mut self, cell: u32) {
        self.cells[self.len] = cell;
        self.len += 1;
    }

    /// The collected cells.
    pub fn as_slice(&self) -> &[u32] {
        &self.cells[..self.len]
    }
}

/// Cell keys and particle slots, co-sorted by cell.
///
/// After [`GridIndex::compute`] entry `k` describes slot `k`; after sorting
/// (see [`crate::sort`]) the arrays are ordered by cell and
/// `slot_of[k]` names the particle behind sorted entry `k`.
#[derive(Debug)]
pub struct GridIndex {
    slot_of: Vec<u32>,
    cell_of: Vec<u32>,
}

impl GridIndex {
    /// Allocate index arrays for `count` particles.
    pub fn with_capacity(count: usize) -> Result<Self, SimulationError> {
        Ok(Self {
            slot_of: try_alloc("grid slot indices", count, 0u32)?,
            cell_of: try_alloc("grid cell indices", count, 0u32)?,
        })
    }

    /// Assign every slot its cell: `slot_of[i] = i`, `cell_of[i] = cell(pos[i])`.
    ///
    /// Fails on the first particle found outside the lattice; which one is
    /// reported is unspecified when several are.
    pub fn compute(
        &mut self,
        grid: &GridParams,
        positions: &[Vec3],
    ) -> Result<(), SimulationError> {
        debug_assert_eq!(positions.len(), self.slot_of.len());
        stage::try_launch_pair(&mut self.slot_of, &mut self.cell_of, |i| {
            let position = positions[i];
            match grid.cell_of(position) {
                Some(cell) => Ok((i as u32, cell)),
                None => Err(SimulationError::OutOfLattice { slot: i, position }),
            }
        })
    }

    /// Particle slot behind each entry.
    pub fn slot_of(&self) -> &[u32] {
        &self.slot_of
    }

    /// Cell of each entry.
    pub fn cell_of(&self) -> &[u32] {
        &self.cell_of
    }

    /// Both arrays, for sorting. Keys first.
    pub fn keys_and_values_mut(&mut self) -> (&mut [u32], &mut [u32]) {
        (&mut self.cell_of, &mut self.slot_of)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.slot_of.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.slot_of.is_empty()
    }
}

/// WGSL helpers mirroring [`GridParams`].
///
/// Expects a `params` uniform with the grid fields of [`crate::uniforms::SimUniforms`].
pub const GRID_WGSL: &str = r#"
const INVALID_CELL: u32 = 0xFFFFFFFFu;

fn grid_local(pos: vec3<f32>) -> vec3<f32> {
    return (pos - params.grid_min) * params.inverse_cell_width;
}

// Returns false when the position lies outside the lattice.
fn grid_in_lattice(g: vec3<f32>) -> bool {
    let side = f32(params.side);
    return all(g >= vec3<f32>(0.0)) && all(g < vec3<f32>(side));
}

fn grid_flatten(c: vec3<i32>) -> u32 {
    let side = params.side;
    return u32(c.x) + u32(c.y) * side + u32(c.z) * side * side;
}

// Flattened neighbor cell, or INVALID_CELL outside the lattice.
fn grid_neighbor(c: vec3<i32>) -> u32 {
    let side = i32(params.side);
    if any(c < vec3<i32>(0)) || any(c >= vec3<i32>(side)) {
        return INVALID_CELL;
    }
    return grid_flatten(c);
}

// Fills `cells` with the candidate window for `pos`; returns the count.
fn grid_candidates(pos: vec3<f32>, cells: ptr<function, array<u32, 27>>) -> u32 {
    let g = grid_local(pos);
    if !grid_in_lattice(floor(g)) {
        return 0u;
    }
    let base = vec3<i32>(floor(g));
    var n = 0u;
    if params.window == 0u {
        let frac = g - floor(g);
        let dir = select(vec3<i32>(-1), vec3<i32>(1), frac >= vec3<f32>(0.5));
        for (var z = 0; z < 2; z++) {
            for (var y = 0; y < 2; y++) {
                for (var x = 0; x < 2; x++) {
                    let cell = grid_neighbor(base + vec3<i32>(x, y, z) * dir);
                    if cell != INVALID_CELL {
                        (*cells)[n] = cell;
                        n += 1u;
                    }
                }
            }
        }
    } else {
        for (var z = -1; z <= 1; z++) {
            for (var y = -1; y <= 1; y++) {
                for (var x = -1; x <= 1; x++) {
                    let cell = grid_neighbor(base + vec3<i32>(x, y, z));
                    if cell != INVALID_CELL {
                        (*cells)[n] = cell;
                        n += 1u;
                    }
                }
            }
        }
    }
    return n;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridParams {
        GridParams::new(100.0, &FlockParams::default()).unwrap()
    }

    #[test]
    fn test_grid_derivation() {
        let g = grid();
        // Cell width 10, half side floor(100 / 10) + 1 = 11.
        assert_eq!(g.cell_width(), 10.0);
        assert_eq!(g.side(), 22);
        assert_eq!(g.cell_count(), 22 * 22 * 22);
        assert_eq!(g.min(), Vec3::splat(-110.0));
        assert!((g.inverse_cell_width() - 0.1).abs() < 1e-7);
    }

    #[test]
    fn test_scene_edges_inside_lattice() {
        let g = grid();
        assert!(g.cell_of(Vec3::splat(100.0)).is_some());
        assert!(g.cell_of(Vec3::splat(-100.0)).is_some());
        assert_eq!(g.cell_of(Vec3::splat(-110.0)), Some(0));
    }

    #[test]
    fn test_out_of_lattice_rejected() {
        let g = grid();
        assert_eq!(g.cell_of(Vec3::new(110.0, 0.0, 0.0)), None);
        assert_eq!(g.cell_of(Vec3::new(0.0, -110.1, 0.0)), None);
        assert_eq!(g.cell_of(Vec3::new(f32::NAN, 0.0, 0.0)), None);
    }

    #[test]
    fn test_flatten_order() {
        let g = grid();
        assert_eq!(g.flatten(UVec3::new(1, 0, 0)), 1);
        assert_eq!(g.flatten(UVec3::new(0, 1, 0)), 22);
        assert_eq!(g.flatten(UVec3::new(0, 0, 1)), 22 * 22);
        assert_eq!(g.cell_of(Vec3::new(-105.0, -95.0, -85.0)), Some(22 + 2 * 484));
    }

    #[test]
    fn test_invalid_scene_scale() {
        assert!(GridParams::new(0.0, &FlockParams::default()).is_err());
        assert!(GridParams::new(f32::INFINITY, &FlockParams::default()).is_err());
    }

    #[test]
    fn test_octant_window_steps_each_axis_independently() {
        let g = grid();
        // Cell (11, 11, 11) spans [0, 10) on each axis. Upper x half, lower y, upper z.
        let pos = Vec3::new(7.0, 2.0, 9.0);
        let cells = g.candidate_cells(pos, NeighborWindow::Octant);
        assert_eq!(cells.as_slice().len(), 8);

        let mut expected = Vec::new();
        for z in [11, 12] {
            for y in [11, 10] {
                for x in [11, 12] {
                    expected.push(g.flatten(UVec3::new(x, y, z)));
                }
            }
        }
        let mut got = cells.as_slice().to_vec();
        got.sort_unstable();
        expected.sort_unstable();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_octant_window_covers_interaction_sphere() {
        let g = grid();
        let radius = FlockParams::default().max_distance();
        let pos = Vec3::new(3.3, -7.9, 41.2);
        let cells = g.candidate_cells(pos, NeighborWindow::Octant);

        // Sample points on the sphere surface must fall into a candidate cell.
        for i in 0..64 {
            let theta = i as f32 * 0.7;
            let phi = i as f32 * 0.31;
            let dir = Vec3::new(theta.cos() * phi.sin(), theta.sin() * phi.sin(), phi.cos());
            let sample = pos + dir * (radius * 0.999);
            let cell = g.cell_of(sample).unwrap();
            assert!(cells.as_slice().contains(&cell), "sample {:?} escaped the window", sample);
        }
    }

    #[test]
    fn test_window_clipped_at_lattice_corner() {
        let g = grid();
        let corner = Vec3::splat(-109.0);
        assert_eq!(g.candidate_cells(corner, NeighborWindow::Octant).as_slice(), &[0]);
        assert_eq!(g.candidate_cells(corner, NeighborWindow::Full27).as_slice().len(), 8);
    }

    #[test]
    fn test_full_window_interior() {
        let g = grid();
        let cells = g.candidate_cells(Vec3::ZERO, NeighborWindow::Full27);
        assert_eq!(cells.as_slice().len(), 27);
    }

    #[test]
    fn test_grid_index_compute() {
        let g = grid();
        let positions = vec![Vec3::ZERO, Vec3::splat(-109.0), Vec3::new(15.0, 0.0, 0.0)];
        let mut index = GridIndex::with_capacity(3).unwrap();
        index.compute(&g, &positions).unwrap();
        assert_eq!(index.slot_of(), &[0, 1, 2]);
        assert_eq!(index.cell_of()[1], 0);
        assert_eq!(index.cell_of()[2], index.cell_of()[0] + 1);
    }

    #[test]
    fn test_grid_index_reports_out_of_lattice() {
        let g = grid();
        let positions = vec![Vec3::ZERO, Vec3::new(0.0, 500.0, 0.0)];
        let mut index = GridIndex::with_capacity(2).unwrap();
        match index.compute(&g, &positions) {
            Err(SimulationError::OutOfLattice { slot, .. }) => assert_eq!(slot, 1),
            other => panic!("expected OutOfLattice, got {:?}", other),
        }
    }
}
