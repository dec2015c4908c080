//! Per-cell index ranges over the sorted particle order.
//!
//! Built every step from the sorted cell keys. Cell `c` owns the half-open
//! range `start[c]..end[c]` of sorted entries; unpopulated cells hold
//! [`EMPTY_CELL`] in both tables.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::error::SimulationError;

/// Marker for a cell with no particles.
pub const EMPTY_CELL: u32 = u32::MAX;

/// Start/end tables, one entry per grid cell.
///
/// Entries are atomics because the build stage scatters writes by cell
/// index from many work-items. Each entry is written by at most one item
/// per step, so relaxed ordering suffices; the stage barrier publishes them.
#[derive(Debug)]
pub struct CellTable {
    start: Vec<AtomicU32>,
    end: Vec<AtomicU32>,
}

impl CellTable {
    /// Allocate an empty table for `cell_count` cells.
    pub fn new(cell_count: usize) -> Result<Self, SimulationError> {
        Ok(Self {
            start: alloc_table("cell start table", cell_count)?,
            end: alloc_table("cell end table", cell_count)?,
        })
    }

    /// Mark every cell empty.
    pub fn reset(&self) {
        self.start
            .par_iter()
            .zip(self.end.par_iter())
            .for_each(|(s, e)| {
                s.store(EMPTY_CELL, Ordering::Relaxed);
                e.store(EMPTY_CELL, Ordering::Relaxed);
            });
    }

    /// Record the range of each populated cell from sorted keys.
    ///
    /// `sorted_cells` must be ascending and every key below the cell count.
    /// Call [`CellTable::reset`] first; cells absent from the keys keep
    /// whatever they held.
    pub fn build(&self, sorted_cells: &[u32]) {
        let n = sorted_cells.len();
        if n == 0 {
            return;
        }
        debug_assert!(sorted_cells.windows(2).all(|w| w[0] <= w[1]));

        (0..n).into_par_iter().for_each(|i| {
            let cell = sorted_cells[i] as usize;
            if i == 0 {
                self.start[cell].store(0, Ordering::Relaxed);
            } else {
                let prev = sorted_cells[i - 1] as usize;
                if prev != cell {
                    self.end[prev].store(i as u32, Ordering::Relaxed);
                    self.start[cell].store(i as u32, Ordering::Relaxed);
                }
            }
            if i == n - 1 {
                self.end[cell].store(n as u32, Ordering::Relaxed);
            }
        });
    }

    /// Sorted-entry range of `cell`, or `None` when it is empty.
    #[inline]
    pub fn range(&self, cell: u32) -> Option<Range<usize>> {
        let start = self.start[cell as usize].load(Ordering::Relaxed);
        if start == EMPTY_CELL {
            return None;
        }
        let end = self.end[cell as usize].load(Ordering::Relaxed);
        Some(start as usize..end as usize)
    }

    /// Populated cells with their ranges, in cell order.
    pub fn populated(&self) -> impl Iterator<Item = (u32, Range<usize>)> + '_ {
        (0..self.start.len() as u32).filter_map(move |c| self.range(c).map(|r| (c, r)))
    }

    /// Raw start entry of `cell`.
    pub fn start(&self, cell: u32) -> u32 {
        self.start[cell as usize].load(Ordering::Relaxed)
    }

    /// Raw end entry of `cell` (exclusive).
    pub fn end(&self, cell: u32) -> u32 {
        self.end[cell as usize].load(Ordering::Relaxed)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.start.len()
    }

    /// Whether the table has no cells.
    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }
}

fn alloc_table(what: &'static str, count: usize) -> Result<Vec<AtomicU32>, SimulationError> {
    let mut v = Vec::new();
    v.try_reserve_exact(count)
        .map_err(|_| SimulationError::Allocation { what, count })?;
    v.extend((0..count).map(|_| AtomicU32::new(EMPTY_CELL)));
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ranges() {
        let table = CellTable::new(8).unwrap();
        table.reset();
        table.build(&[1, 1, 3, 3, 3, 6]);

        assert_eq!(table.range(0), None);
        assert_eq!(table.range(1), Some(0..2));
        assert_eq!(table.range(2), None);
        assert_eq!(table.range(3), Some(2..5));
        assert_eq!(table.range(6), Some(5..6));
        assert_eq!(table.range(7), None);
    }

    #[test]
    fn test_ranges_cover_every_entry() {
        let keys = [0, 0, 2, 2, 2, 4, 5, 5, 5, 5, 9];
        let table = CellTable::new(10).unwrap();
        table.reset();
        table.build(&keys);

        let total: usize = table.populated().map(|(_, r)| r.len()).sum();
        assert_eq!(total, keys.len());
        for (cell, range) in table.populated() {
            assert!(keys[range].iter().all(|&k| k == cell));
        }
    }

    #[test]
    fn test_single_entry() {
        let table = CellTable::new(4).unwrap();
        table.reset();
        table.build(&[2]);
        assert_eq!(table.range(2), Some(0..1));
        assert_eq!(table.populated().count(), 1);
    }

    #[test]
    fn test_reset_clears_previous_step() {
        let table = CellTable::new(4).unwrap();
        table.reset();
        table.build(&[0, 1]);
        table.reset();
        table.build(&[3, 3]);
        assert_eq!(table.range(0), None);
        assert_eq!(table.range(1), None);
        assert_eq!(table.range(3), Some(0..2));
        assert_eq!(table.start(0), EMPTY_CELL);
        assert_eq!(table.end(0), EMPTY_CELL);
    }
}
