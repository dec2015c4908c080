//! Neighbor-search strategies for the velocity update.
//!
//! All three strategies produce the same result up to floating-point
//! summation order; they differ only in how candidates are found:
//!
//! - [`brute_force`] visits every particle.
//! - [`scattered`] visits particles in the candidate cells, reaching their
//!   data through `slot_of` into the unsorted columns.
//! - [`coherent`] visits the same cells over columns that
//!   [`reorder_coherent`] has gathered into sorted order, so a cell's
//!   particles are contiguous and no indirection is needed.
//!
//! Each writes exactly its own slot of `out` and returns the number of
//! particles whose speed had to be clamped.

use glam::Vec3;

use crate::cells::CellTable;
use crate::rules::{FlockAccumulator, FlockParams};
use crate::spatial::{GridIndex, GridParams, NeighborWindow};
use crate::stage;

/// Shared inputs of the two grid strategies.
#[derive(Clone, Copy)]
pub struct GridQuery<'a> {
    /// Rule constants.
    pub params: &'a FlockParams,
    /// Grid geometry.
    pub grid: &'a GridParams,
    /// Candidate window.
    pub window: NeighborWindow,
    /// Cell ranges for this step.
    pub cells: &'a CellTable,
}

/// O(N²) baseline: every other particle is a candidate.
pub fn brute_force(
    params: &FlockParams,
    positions: &[Vec3],
    velocities: &[Vec3],
    out: &mut [Vec3],
) -> usize {
    stage::launch_flagged(out, |i| {
        let mut acc = FlockAccumulator::new(positions[i]);
        for (j, (&p, &v)) in positions.iter().zip(velocities).enumerate() {
            if j != i {
                acc.visit(params, p, v);
            }
        }
        let update = acc.resolve(params, velocities[i]);
        (update.velocity, update.clamped)
    })
}

/// Grid search through the `slot_of` indirection over unsorted columns.
///
/// `index` must already be sorted and `query.cells` built from it.
pub fn scattered(
    query: GridQuery<'_>,
    index: &GridIndex,
    positions: &[Vec3],
    velocities: &[Vec3],
    out: &mut [Vec3],
) -> usize {
    let slot_of = index.slot_of();
    stage::launch_flagged(out, |i| {
        let origin = positions[i];
        let mut acc = FlockAccumulator::new(origin);
        for &cell in query.grid.candidate_cells(origin, query.window).as_slice() {
            let Some(range) = query.cells.range(cell) else {
                continue;
            };
            for &slot in &slot_of[range] {
                let j = slot as usize;
                if j != i {
                    acc.visit(query.params, positions[j], velocities[j]);
                }
            }
        }
        let update = acc.resolve(query.params, velocities[i]);
        (update.velocity, update.clamped)
    })
}

/// Gather both columns into sorted-cell order: `sorted[i] = unsorted[slot_of[i]]`.
pub fn reorder_coherent(
    slot_of: &[u32],
    positions: &[Vec3],
    velocities: &[Vec3],
    sorted_positions: &mut [Vec3],
    sorted_velocities: &mut [Vec3],
) {
    stage::launch_pair(sorted_positions, sorted_velocities, |i| {
        let slot = slot_of[i] as usize;
        (positions[slot], velocities[slot])
    });
}

/// Grid search over columns already gathered by [`reorder_coherent`].
///
/// `out` is indexed in sorted order, like the inputs.
pub fn coherent(
    query: GridQuery<'_>,
    sorted_positions: &[Vec3],
    sorted_velocities: &[Vec3],
    out: &mut [Vec3],
) -> usize {
    stage::launch_flagged(out, |i| {
        let origin = sorted_positions[i];
        let mut acc = FlockAccumulator::new(origin);
        for &cell in query.grid.candidate_cells(origin, query.window).as_slice() {
            let Some(range) = query.cells.range(cell) else {
                continue;
            };
            for j in range {
                if j != i {
                    acc.visit(query.params, sorted_positions[j], sorted_velocities[j]);
                }
            }
        }
        let update = acc.resolve(query.params, sorted_velocities[i]);
        (update.velocity, update.clamped)
    })
}
