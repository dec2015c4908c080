//! Reference CPU kernel.
//!
//! Runs every stage as a rayon parallel map. Each stage finishes before the
//! next starts, and the ping-pong columns keep reads and writes apart.

use std::time::Instant;

use glam::Vec3;

use crate::buffers::ParticleStore;
use crate::cells::CellTable;
use crate::config::SimConfig;
use crate::error::SimulationError;
use crate::integrate::integrate;
use crate::neighbors::{self, GridQuery};
use crate::rules::FlockParams;
use crate::simulation::{
    check_dt, check_initial_state, SimulationKernel, StageTimings, StepStats, Strategy,
};
use crate::sort::{KeySort, ParallelKeySort};
use crate::spatial::{GridIndex, GridParams, NeighborWindow};
use crate::spawn::spawn_uniform;

/// CPU implementation of [`SimulationKernel`].
pub struct CpuKernel {
    store: ParticleStore,
    index: GridIndex,
    cells: CellTable,
    sorter: Box<dyn KeySort + Send>,
    grid: GridParams,
    flock: FlockParams,
    window: NeighborWindow,
    scene_scale: f32,
    steps: u64,
}

impl CpuKernel {
    /// Allocate all buffers and place particles from the configured seed.
    pub fn initialize(config: &SimConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        let count = config.particle_count as usize;
        let (positions, velocities) =
            spawn_uniform(count, config.seed, config.scene_scale, config.initial_speed)?;
        Self::from_state(config, positions, velocities)
    }

    /// Build a kernel around explicit initial columns.
    ///
    /// The configured particle count and seed are ignored. Every position
    /// must lie in the scene cube and every velocity must be finite.
    pub fn from_state(
        config: &SimConfig,
        positions: Vec<Vec3>,
        velocities: Vec<Vec3>,
    ) -> Result<Self, SimulationError> {
        let grid = config.validate()?;
        check_initial_state(config, &positions, &velocities)?;

        let count = positions.len();
        let store = ParticleStore::new(positions, velocities)?;
        let index = GridIndex::with_capacity(count)?;
        let cells = CellTable::new(grid.cell_count() as usize)?;

        log::info!(
            "CPU kernel: {} particles, grid {}^3 ({} cells, width {})",
            count,
            grid.side(),
            grid.cell_count(),
            grid.cell_width()
        );

        Ok(Self {
            store,
            index,
            cells,
            sorter: Box::new(ParallelKeySort::new()),
            grid,
            flock: config.flock,
            window: config.neighbor_window,
            scene_scale: config.scene_scale,
            steps: 0,
        })
    }

    /// Replace the sort primitive.
    pub fn with_sorter(mut self, sorter: impl KeySort + Send + 'static) -> Self {
        self.sorter = Box::new(sorter);
        self
    }

    /// Current positions.
    pub fn positions(&self) -> &[Vec3] {
        self.store.positions.current()
    }

    /// Current velocities.
    pub fn velocities(&self) -> &[Vec3] {
        self.store.velocities.current()
    }

    /// Cell table of the last grid step.
    pub fn cells(&self) -> &CellTable {
        &self.cells
    }

    /// Sorted grid index of the last grid step.
    pub fn grid_index(&self) -> &GridIndex {
        &self.index
    }

    /// Completed steps.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Stages 1-4: reset the table, key every slot, sort, build ranges.
    fn build_grid(&mut self, timings: &mut StageTimings) -> Result<usize, SimulationError> {
        let t = Instant::now();
        self.index.compute(&self.grid, self.store.positions.current())?;
        timings.grid = t.elapsed();

        let t = Instant::now();
        let (keys, values) = self.index.keys_and_values_mut();
        self.sorter.sort_by_key(keys, values);
        timings.sort = t.elapsed();

        let t = Instant::now();
        self.cells.reset();
        self.cells.build(self.index.cell_of());
        timings.cells = t.elapsed();

        Ok(self.cells.populated().count())
    }
}

impl SimulationKernel for CpuKernel {
    fn step(&mut self, dt: f32, strategy: Strategy) -> Result<StepStats, SimulationError> {
        check_dt(dt)?;
        let start = Instant::now();
        let mut stats = StepStats {
            strategy: Some(strategy),
            ..Default::default()
        };

        if strategy.uses_grid() {
            stats.populated_cells = self.build_grid(&mut stats.timings)?;
        }

        let query = GridQuery {
            params: &self.flock,
            grid: &self.grid,
            window: self.window,
            cells: &self.cells,
        };
        let store = &mut self.store;

        match strategy {
            Strategy::BruteForce | Strategy::ScatteredGrid => {
                let t = Instant::now();
                let positions = store.positions.current();
                let (velocities, next_velocities) = store.velocities.split();
                stats.clamped = if strategy == Strategy::BruteForce {
                    neighbors::brute_force(&self.flock, positions, velocities, next_velocities)
                } else {
                    neighbors::scattered(query, &self.index, positions, velocities, next_velocities)
                };
                store.velocities.swap();
                stats.timings.evaluate = t.elapsed();

                let t = Instant::now();
                let (positions, next_positions) = store.positions.split();
                let velocities = store.velocities.current();
                integrate(positions, velocities, next_positions, dt, self.scene_scale);
                store.positions.swap();
                stats.timings.integrate = t.elapsed();
            }
            Strategy::CoherentGrid => {
                let t = Instant::now();
                neighbors::reorder_coherent(
                    self.index.slot_of(),
                    store.positions.current(),
                    store.velocities.current(),
                    &mut store.sorted_positions,
                    &mut store.sorted_velocities,
                );
                stats.timings.reorder = t.elapsed();

                let t = Instant::now();
                let (_, next_velocities) = store.velocities.split();
                stats.clamped = neighbors::coherent(
                    query,
                    &store.sorted_positions,
                    &store.sorted_velocities,
                    next_velocities,
                );
                store.velocities.swap();
                stats.timings.evaluate = t.elapsed();

                // Slots now follow sorted-cell order.
                let t = Instant::now();
                let (_, next_positions) = store.positions.split();
                integrate(
                    &store.sorted_positions,
                    store.velocities.current(),
                    next_positions,
                    dt,
                    self.scene_scale,
                );
                store.positions.swap();
                stats.timings.integrate = t.elapsed();
            }
        }

        stats.timings.total = start.elapsed();
        self.steps += 1;

        if stats.clamped > 0 {
            log::debug!(
                "step {}: {} of {} velocities clamped to {}",
                self.steps,
                stats.clamped,
                self.store.len(),
                self.flock.max_speed
            );
        }
        log::trace!("step {} ({}): {:?}", self.steps, strategy, stats.timings);

        Ok(stats)
    }

    fn snapshot_positions(&self) -> Result<Vec<Vec3>, SimulationError> {
        Ok(self.positions().to_vec())
    }

    fn snapshot_velocities(&self) -> Result<Vec<Vec3>, SimulationError> {
        Ok(self.velocities().to_vec())
    }

    fn particle_count(&self) -> usize {
        self.store.len()
    }

    fn grid(&self) -> &GridParams {
        &self.grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SimConfig {
        SimConfig {
            particle_count: 300,
            seed: 5,
            scene_scale: 20.0,
            initial_speed: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_initialize_counts() {
        let kernel = CpuKernel::initialize(&small_config()).unwrap();
        assert_eq!(kernel.particle_count(), 300);
        assert_eq!(kernel.positions().len(), 300);
        assert_eq!(kernel.steps(), 0);
    }

    #[test]
    fn test_from_state_rejects_outside_scene() {
        let config = small_config();
        let err = CpuKernel::from_state(
            &config,
            vec![Vec3::ZERO, Vec3::new(0.0, 0.0, 25.0)],
            vec![Vec3::ZERO; 2],
        )
        .err()
        .unwrap();
        assert!(matches!(err, SimulationError::OutOfLattice { slot: 1, .. }));
    }

    #[test]
    fn test_grid_step_builds_table() {
        let mut kernel = CpuKernel::initialize(&small_config()).unwrap();
        let stats = kernel.step(0.1, Strategy::ScatteredGrid).unwrap();
        assert!(stats.populated_cells > 0);
        let total: usize = kernel.cells().populated().map(|(_, r)| r.len()).sum();
        assert_eq!(total, 300);
        assert!(kernel.grid_index().cell_of().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_brute_force_step_skips_grid() {
        let mut kernel = CpuKernel::initialize(&small_config()).unwrap();
        let stats = kernel.step(0.1, Strategy::BruteForce).unwrap();
        assert_eq!(stats.populated_cells, 0);
        assert_eq!(stats.strategy, Some(Strategy::BruteForce));
    }

    #[test]
    fn test_failed_step_leaves_state() {
        let config = small_config();
        let mut kernel = CpuKernel::from_state(
            &config,
            vec![Vec3::ZERO, Vec3::X],
            vec![Vec3::ZERO; 2],
        )
        .unwrap();
        // Move a particle out of the lattice behind the kernel's back.
        kernel.store.positions = crate::buffers::PingPong::new(
            "positions",
            vec![Vec3::ZERO, Vec3::splat(1.0e6)],
            Vec3::ZERO,
        )
        .unwrap();
        let before = kernel.velocities().to_vec();
        assert!(kernel.step(0.1, Strategy::CoherentGrid).is_err());
        assert_eq!(kernel.velocities(), &before[..]);
        assert_eq!(kernel.steps(), 0);
    }

    #[test]
    fn test_non_finite_dt_rejected() {
        let mut kernel = CpuKernel::initialize(&small_config()).unwrap();
        let positions = kernel.positions().to_vec();
        let velocities = kernel.velocities().to_vec();
        for dt in [f32::INFINITY, f32::NEG_INFINITY, f32::NAN] {
            for strategy in Strategy::ALL {
                let err = kernel.step(dt, strategy).err().unwrap();
                assert!(matches!(err, SimulationError::InvalidConfig(_)));
            }
        }
        assert_eq!(kernel.positions(), &positions[..]);
        assert_eq!(kernel.velocities(), &velocities[..]);
        assert_eq!(kernel.steps(), 0);
    }

    #[test]
    fn test_from_state_rejects_non_finite_velocity() {
        let config = small_config();
        for bad in [Vec3::new(f32::NAN, 0.0, 0.0), Vec3::new(0.0, f32::INFINITY, 0.0)] {
            let positions = vec![Vec3::ZERO, Vec3::X];
            let err = CpuKernel::from_state(&config, positions, vec![Vec3::ZERO, bad])
                .err()
                .unwrap();
            assert!(matches!(err, SimulationError::InvalidConfig(_)));
        }
    }

    /// Insertion sort over the pairs, one thread.
    struct SerialKeySort;

    impl KeySort for SerialKeySort {
        fn sort_by_key(&mut self, keys: &mut [u32], values: &mut [u32]) {
            assert_eq!(keys.len(), values.len());
            for i in 1..keys.len() {
                let mut j = i;
                while j > 0 && keys[j - 1] > keys[j] {
                    keys.swap(j - 1, j);
                    values.swap(j - 1, j);
                    j -= 1;
                }
            }
        }
    }

    #[test]
    fn test_custom_sorter_gives_same_step() {
        let config = small_config();
        let mut parallel = CpuKernel::initialize(&config).unwrap();
        let mut serial = CpuKernel::initialize(&config).unwrap().with_sorter(SerialKeySort);

        let a = parallel.step(0.2, Strategy::ScatteredGrid).unwrap();
        let b = serial.step(0.2, Strategy::ScatteredGrid).unwrap();
        assert_eq!(a.populated_cells, b.populated_cells);
        assert_eq!(parallel.grid_index().cell_of(), serial.grid_index().cell_of());
        for (p, s) in parallel.velocities().iter().zip(serial.velocities()) {
            assert!((*p - *s).abs().max_element() < 1e-5);
        }
        for (p, s) in parallel.positions().iter().zip(serial.positions()) {
            assert!((*p - *s).abs().max_element() < 1e-5);
        }
    }
}
