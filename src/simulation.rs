//! Simulation builder, kernel trait and per-step bookkeeping.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::cpu::CpuKernel;
use crate::error::SimulationError;
use crate::gpu::GpuKernel;
use crate::rules::FlockParams;
use crate::spatial::{GridParams, NeighborWindow};

/// Neighbor-search strategy used by one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Every particle against every other.
    BruteForce,
    /// Uniform grid, particle data reached through the sorted slot array.
    #[serde(alias = "scattered")]
    ScatteredGrid,
    /// Uniform grid over particle data gathered into cell order.
    #[serde(alias = "coherent")]
    CoherentGrid,
}

impl Strategy {
    /// All strategies, cheapest last.
    pub const ALL: [Strategy; 3] = [
        Strategy::BruteForce,
        Strategy::ScatteredGrid,
        Strategy::CoherentGrid,
    ];

    /// Whether this strategy builds the spatial grid.
    pub fn uses_grid(self) -> bool {
        !matches!(self, Strategy::BruteForce)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::BruteForce => "brute_force",
            Strategy::ScatteredGrid => "scattered",
            Strategy::CoherentGrid => "coherent",
        };
        f.write_str(name)
    }
}

impl FromStr for Strategy {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "brute_force" | "bruteforce" | "naive" => Ok(Strategy::BruteForce),
            "scattered" | "scattered_grid" | "uniform" => Ok(Strategy::ScatteredGrid),
            "coherent" | "coherent_grid" => Ok(Strategy::CoherentGrid),
            other => Err(SimulationError::InvalidConfig(format!(
                "unknown strategy '{}'",
                other
            ))),
        }
    }
}

/// What happened during one step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepStats {
    /// Strategy that ran.
    pub strategy: Option<Strategy>,
    /// Particles whose speed was clamped to `max_speed`.
    pub clamped: usize,
    /// Cells holding at least one particle (0 for brute force).
    pub populated_cells: usize,
    /// Per-stage wall time.
    pub timings: StageTimings,
}

/// Wall time spent in each stage of a step.
///
/// The GPU kernel only fills `total`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageTimings {
    /// Cell keys and slot indices.
    pub grid: Duration,
    /// Sort by cell.
    pub sort: Duration,
    /// Cell table reset and build.
    pub cells: Duration,
    /// Coherent gather.
    pub reorder: Duration,
    /// Velocity update.
    pub evaluate: Duration,
    /// Position update.
    pub integrate: Duration,
    /// Whole step.
    pub total: Duration,
}

/// A simulation back-end that owns its particle buffers.
///
/// Every method observes the state after the most recently completed
/// step; a failed [`step`](SimulationKernel::step) leaves that state as it was.
pub trait SimulationKernel {
    /// Advance the simulation by `dt` using `strategy`.
    fn step(&mut self, dt: f32, strategy: Strategy) -> Result<StepStats, SimulationError>;

    /// Copy of the current positions.
    fn snapshot_positions(&self) -> Result<Vec<Vec3>, SimulationError>;

    /// Copy of the current velocities.
    fn snapshot_velocities(&self) -> Result<Vec<Vec3>, SimulationError>;

    /// Number of particles.
    fn particle_count(&self) -> usize;

    /// Grid geometry.
    fn grid(&self) -> &GridParams;

    /// Release every buffer. Consumes the kernel, so it can happen only once.
    fn shutdown(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}

/// Reject a time step that would write non-finite values into the columns.
pub(crate) fn check_dt(dt: f32) -> Result<(), SimulationError> {
    if dt.is_finite() {
        Ok(())
    } else {
        Err(SimulationError::InvalidConfig(format!("time step must be finite, got {}", dt)))
    }
}

/// Check explicit initial columns before any buffer is built.
///
/// Positions must lie in the scene cube and velocities must be finite.
pub(crate) fn check_initial_state(
    config: &SimConfig,
    positions: &[Vec3],
    velocities: &[Vec3],
) -> Result<(), SimulationError> {
    if positions.is_empty() {
        return Err(SimulationError::InvalidConfig(
            "at least one particle is required".into(),
        ));
    }
    if positions.len() != velocities.len() {
        return Err(SimulationError::InvalidConfig(format!(
            "{} positions but {} velocities",
            positions.len(),
            velocities.len()
        )));
    }
    if let Some((slot, &position)) = positions
        .iter()
        .enumerate()
        .find(|(_, p)| p.abs().max_element() > config.scene_scale || p.is_nan())
    {
        return Err(SimulationError::OutOfLattice { slot, position });
    }
    if let Some((slot, velocity)) = velocities.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(SimulationError::InvalidConfig(format!(
            "particle {} has non-finite velocity {:?}",
            slot, velocity
        )));
    }
    Ok(())
}

/// A boids simulation builder.
///
/// Use method chaining to configure, then call [`Simulation::initialize`]
/// for the CPU kernel or [`Simulation::initialize_gpu`] for the GPU one.
///
/// ```ignore
/// use flockgrid::prelude::*;
///
/// let mut sim = Simulation::new()
///     .with_particle_count(5_000)
///     .with_seed(7)
///     .initialize()?;
/// for _ in 0..100 {
///     sim.step(0.2, Strategy::CoherentGrid)?;
/// }
/// ```
#[derive(Clone, Debug, Default)]
pub struct Simulation {
    config: SimConfig,
}

impl Simulation {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: SimConfig) -> Self {
        Self { config }
    }

    /// Set the number of particles.
    pub fn with_particle_count(mut self, count: u32) -> Self {
        self.config.particle_count = count;
        self
    }

    /// Set the placement seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Set the scene half-width (cube from -scale to +scale).
    pub fn with_scene_scale(mut self, scale: f32) -> Self {
        self.config.scene_scale = scale;
        self
    }

    /// Set the rule constants.
    pub fn with_flock(mut self, flock: FlockParams) -> Self {
        self.config.flock = flock;
        self
    }

    /// Set the candidate cell window of the grid strategies.
    pub fn with_neighbor_window(mut self, window: NeighborWindow) -> Self {
        self.config.neighbor_window = window;
        self
    }

    /// Set the per-axis bound of the random initial velocity.
    pub fn with_initial_speed(mut self, speed: f32) -> Self {
        self.config.initial_speed = speed;
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Allocate and seed a CPU kernel.
    pub fn initialize(&self) -> Result<CpuKernel, SimulationError> {
        CpuKernel::initialize(&self.config)
    }

    /// Allocate and seed a GPU kernel.
    pub fn initialize_gpu(&self) -> Result<GpuKernel, SimulationError> {
        GpuKernel::initialize(&self.config)
    }
}
