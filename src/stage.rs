//! Data-parallel stage launcher.
//!
//! A stage is a pure function of the work-item index, run once per output
//! slot on the rayon pool. Every launch returns only after all items have
//! finished, which is the barrier between consecutive stages: nothing a
//! stage writes is visible to a later stage until the whole stage is done,
//! and no item can observe another item's output within the same stage.

use rayon::prelude::*;

/// Run `f(i)` for every slot of `out` and store the result there.
pub fn launch<T, F>(out: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    out.par_iter_mut().enumerate().for_each(|(i, o)| *o = f(i));
}

/// Like [`launch`], but `f` also returns a flag; returns how many items raised it.
pub fn launch_flagged<T, F>(out: &mut [T], f: F) -> usize
where
    T: Send,
    F: Fn(usize) -> (T, bool) + Sync + Send,
{
    out.par_iter_mut()
        .enumerate()
        .map(|(i, o)| {
            let (value, flag) = f(i);
            *o = value;
            flag as usize
        })
        .sum()
}

/// Run `f(i)` for every index and write its pair of results into `a[i]`, `b[i]`.
pub fn launch_pair<A, B, F>(a: &mut [A], b: &mut [B], f: F)
where
    A: Send,
    B: Send,
    F: Fn(usize) -> (A, B) + Sync + Send,
{
    assert_eq!(a.len(), b.len(), "paired stage outputs differ in length");
    a.par_iter_mut()
        .zip(b.par_iter_mut())
        .enumerate()
        .for_each(|(i, (a, b))| {
            let (va, vb) = f(i);
            *a = va;
            *b = vb;
        });
}

/// Fallible [`launch_pair`]. Stops early on the first error observed.
///
/// Outputs are partially written when an error is returned.
pub fn try_launch_pair<A, B, E, F>(a: &mut [A], b: &mut [B], f: F) -> Result<(), E>
where
    A: Send,
    B: Send,
    E: Send,
    F: Fn(usize) -> Result<(A, B), E> + Sync + Send,
{
    assert_eq!(a.len(), b.len(), "paired stage outputs differ in length");
    a.par_iter_mut()
        .zip(b.par_iter_mut())
        .enumerate()
        .try_for_each(|(i, (a, b))| {
            let (va, vb) = f(i)?;
            *a = va;
            *b = vb;
            Ok(())
        })
}
