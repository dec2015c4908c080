//! Particle storage.
//!
//! Positions and velocities are column-oriented: slot `i` of each column
//! belongs to particle `i`. Both columns are double buffered with
//! [`PingPong`] so a stage can read one side while writing the other.

use glam::Vec3;

use crate::error::SimulationError;

/// Allocate `count` copies of `value`, reporting failure instead of aborting.
pub(crate) fn try_alloc<T: Clone>(
    what: &'static str,
    count: usize,
    value: T,
) -> Result<Vec<T>, SimulationError> {
    let mut v = Vec::new();
    v.try_reserve_exact(count)
        .map_err(|_| SimulationError::Allocation { what, count })?;
    v.resize(count, value);
    Ok(v)
}

/// A pair of equally sized buffers with a "current" and a "next" side.
///
/// The next side is only reachable through [`PingPong::split`], which
/// hands it out mutably while the current side is borrowed shared, so a
/// stage can never read the buffer it is writing.
#[derive(Debug)]
pub struct PingPong<T> {
    current: Vec<T>,
    next: Vec<T>,
}

impl<T: Clone> PingPong<T> {
    /// Wrap `initial` as the current side and allocate a matching next side.
    pub fn new(what: &'static str, initial: Vec<T>, fill: T) -> Result<Self, SimulationError> {
        let next = try_alloc(what, initial.len(), fill)?;
        Ok(Self {
            current: initial,
            next,
        })
    }
}

impl<T> PingPong<T> {
    /// Read-only view of the current side.
    pub fn current(&self) -> &[T] {
        &self.current
    }

    /// Borrow the current side for reading and the next side for writing.
    pub fn split(&mut self) -> (&[T], &mut [T]) {
        (&self.current, &mut self.next)
    }

    /// Make the next side current. O(1).
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
    }

    /// Number of elements per side.
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// Whether both sides are empty.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

/// All per-particle columns of the CPU kernel.
#[derive(Debug)]
pub struct ParticleStore {
    /// Position ping-pong pair.
    pub positions: PingPong<Vec3>,
    /// Velocity ping-pong pair.
    pub velocities: PingPong<Vec3>,
    /// Positions gathered into sorted-cell order.
    pub sorted_positions: Vec<Vec3>,
    /// Velocities gathered into sorted-cell order.
    pub sorted_velocities: Vec<Vec3>,
}

impl ParticleStore {
    /// Build a store from initial columns of equal length.
    pub fn new(positions: Vec<Vec3>, velocities: Vec<Vec3>) -> Result<Self, SimulationError> {
        if positions.len() != velocities.len() {
            return Err(SimulationError::InvalidConfig(format!(
                "{} positions but {} velocities",
                positions.len(),
                velocities.len()
            )));
        }
        let count = positions.len();
        Ok(Self {
            positions: PingPong::new("positions", positions, Vec3::ZERO)?,
            velocities: PingPong::new("velocities", velocities, Vec3::ZERO)?,
            sorted_positions: try_alloc("sorted positions", count, Vec3::ZERO)?,
            sorted_velocities: try_alloc("sorted velocities", count, Vec3::ZERO)?,
        })
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the store holds no particles.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
