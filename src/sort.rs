//! Sort-by-key primitive.
//!
//! Orders a key array ascending and applies the same permutation to a
//! companion value array. O(N log N). Order among equal keys is
//! unspecified: particles sharing a cell are interchangeable.

use rayon::prelude::*;

/// Sorts `keys` ascending, permuting `values` identically.
pub trait KeySort {
    /// Sort in place. `keys` and `values` must have the same length.
    fn sort_by_key(&mut self, keys: &mut [u32], values: &mut [u32]);
}

/// Parallel unstable sort over zipped `(key, value)` pairs.
///
/// Keeps its pair buffer between calls.
#[derive(Debug, Default)]
pub struct ParallelKeySort {
    pairs: Vec<(u32, u32)>,
}

impl ParallelKeySort {
    /// Create a sorter with an empty scratch buffer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeySort for ParallelKeySort {
    fn sort_by_key(&mut self, keys: &mut [u32], values: &mut [u32]) {
        assert_eq!(keys.len(), values.len(), "keys and values differ in length");

        self.pairs.clear();
        keys.par_iter()
            .copied()
            .zip(values.par_iter().copied())
            .collect_into_vec(&mut self.pairs);

        self.pairs.par_sort_unstable_by_key(|&(k, _)| k);

        keys.par_iter_mut()
            .zip(values.par_iter_mut())
            .zip(self.pairs.par_iter())
            .for_each(|((k, v), &(pk, pv))| {
                *k = pk;
                *v = pv;
            });
    }
}
