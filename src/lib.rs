//! # flockgrid - uniform-grid boids flocking
//!
//! Data-parallel boids with three interchangeable neighbor searches, run on
//! the CPU (rayon) or the GPU (wgpu compute).
//!
//! ## Quick Start
//!
//! ```ignore
//! use flockgrid::prelude::*;
//!
//! fn main() -> Result<(), SimulationError> {
//!     let mut sim = Simulation::new()
//!         .with_particle_count(10_000)
//!         .with_seed(1)
//!         .initialize()?;
//!     for _ in 0..600 {
//!         sim.step(0.2, Strategy::CoherentGrid)?;
//!     }
//!     let positions = sim.snapshot_positions()?;
//!     println!("{} boids", positions.len());
//!     sim.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Pipeline
//!
//! One step runs these stages in order, each finishing before the next:
//!
//! 1. Key every particle with the flattened index of its grid cell.
//! 2. Sort the `(cell, slot)` pairs by cell.
//! 3. Reset the cell table and record each populated cell's range.
//! 4. For the coherent strategy, gather positions and velocities into
//!    sorted order.
//! 5. Evaluate the three flocking rules against candidate neighbors.
//! 6. Integrate positions and wrap them back into the scene cube.
//!
//! The brute-force strategy skips stages 1 to 4.
//!
//! ## Strategies
//!
//! | Strategy | Neighbor set | Data access |
//! |----------|--------------|-------------|
//! | [`Strategy::BruteForce`] | every other particle | direct |
//! | [`Strategy::ScatteredGrid`] | candidate cells | through the sorted slot array |
//! | [`Strategy::CoherentGrid`] | candidate cells | gathered copy in cell order |
//!
//! After a coherent step, particle slots follow sorted-cell order.

pub mod buffers;
pub mod cells;
pub mod config;
pub mod cpu;
pub mod error;
pub mod gpu;
pub mod integrate;
pub mod neighbors;
pub mod rules;
pub mod simulation;
pub mod sort;
pub mod spatial;
pub mod spawn;
mod stage;
pub mod uniforms;

pub use cells::{CellTable, EMPTY_CELL};
pub use config::SimConfig;
pub use cpu::CpuKernel;
pub use error::{GpuError, SimulationError};
pub use glam::{UVec3, Vec3};
pub use gpu::GpuKernel;
pub use rules::FlockParams;
pub use simulation::{Simulation, SimulationKernel, StageTimings, StepStats, Strategy};
pub use sort::{KeySort, ParallelKeySort};
pub use spatial::{GridIndex, GridParams, NeighborWindow};

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use flockgrid::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::SimConfig;
    pub use crate::cpu::CpuKernel;
    pub use crate::error::SimulationError;
    pub use crate::gpu::GpuKernel;
    pub use crate::rules::FlockParams;
    pub use crate::simulation::{Simulation, SimulationKernel, StepStats, Strategy};
    pub use crate::spatial::NeighborWindow;
    pub use crate::Vec3;
}
