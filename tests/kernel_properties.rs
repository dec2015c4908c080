//! Integration tests for the CPU kernel.
//!
//! These run whole steps through the public API and check properties that
//! must hold for every strategy.

use flockgrid::prelude::*;
use flockgrid::{GridParams, SimulationError};

const TOLERANCE: f32 = 1e-4;

fn config(count: u32, seed: u64) -> SimConfig {
    SimConfig {
        particle_count: count,
        seed,
        scene_scale: 20.0,
        initial_speed: 0.5,
        ..Default::default()
    }
}

fn assert_close(a: Vec3, b: Vec3, what: &str) {
    assert!(
        (a - b).abs().max_element() <= TOLERANCE,
        "{}: {:?} vs {:?}",
        what,
        a,
        b
    );
}

// ============================================================================
// Invariants after stepping
// ============================================================================

#[test]
fn test_speed_never_exceeds_max() {
    for strategy in Strategy::ALL {
        let mut sim = Simulation::from_config(config(500, 1)).initialize().unwrap();
        let max_speed = FlockParams::default().max_speed;
        for _ in 0..5 {
            sim.step(0.2, strategy).unwrap();
        }
        for v in sim.snapshot_velocities().unwrap() {
            assert!(v.length() <= max_speed + TOLERANCE, "{}: speed {}", strategy, v.length());
        }
    }
}

#[test]
fn test_positions_stay_in_scene() {
    let cfg = config(500, 2);
    for strategy in Strategy::ALL {
        let mut sim = Simulation::from_config(cfg.clone()).initialize().unwrap();
        for _ in 0..20 {
            sim.step(1.0, strategy).unwrap();
        }
        for p in sim.snapshot_positions().unwrap() {
            assert!(p.abs().max_element() <= cfg.scene_scale, "{}: {:?}", strategy, p);
        }
    }
}

#[test]
fn test_cell_ranges_cover_every_particle() {
    let mut sim = Simulation::from_config(config(800, 3)).initialize().unwrap();
    for strategy in [Strategy::ScatteredGrid, Strategy::CoherentGrid] {
        let stats = sim.step(0.2, strategy).unwrap();
        let cells = sim.cells();
        let total: usize = cells.populated().map(|(_, r)| r.len()).sum();
        assert_eq!(total, 800);
        assert_eq!(cells.populated().count(), stats.populated_cells);

        // Ranges tile the sorted array without gaps.
        let mut ranges: Vec<_> = cells.populated().map(|(_, r)| r).collect();
        ranges.sort_by_key(|r| r.start);
        assert_eq!(ranges[0].start, 0);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }

        // Every sorted slot lies in the range of its own cell.
        let index = sim.grid_index();
        for (i, &cell) in index.cell_of().iter().enumerate() {
            assert!(cells.range(cell).unwrap().contains(&i));
        }
    }
}

#[test]
fn test_same_seed_same_trajectory() {
    for strategy in Strategy::ALL {
        let mut a = Simulation::from_config(config(300, 42)).initialize().unwrap();
        let mut b = Simulation::from_config(config(300, 42)).initialize().unwrap();
        for _ in 0..4 {
            a.step(0.2, strategy).unwrap();
            b.step(0.2, strategy).unwrap();
        }
        assert_eq!(a.snapshot_positions().unwrap(), b.snapshot_positions().unwrap());
        assert_eq!(a.snapshot_velocities().unwrap(), b.snapshot_velocities().unwrap());
    }
}

#[test]
fn test_zero_dt_moves_nothing() {
    let mut sim = Simulation::from_config(config(200, 4)).initialize().unwrap();
    let before = sim.snapshot_positions().unwrap();
    let velocities_before = sim.snapshot_velocities().unwrap();
    sim.step(0.0, Strategy::ScatteredGrid).unwrap();
    assert_eq!(sim.snapshot_positions().unwrap(), before);
    assert_ne!(sim.snapshot_velocities().unwrap(), velocities_before);
}

// ============================================================================
// Strategy equivalence
// ============================================================================

#[test]
fn test_strategies_agree_after_one_step() {
    for window in [NeighborWindow::Octant, NeighborWindow::Full27] {
        let cfg = SimConfig {
            neighbor_window: window,
            ..config(600, 7)
        };
        let mut brute = Simulation::from_config(cfg.clone()).initialize().unwrap();
        let mut scattered = Simulation::from_config(cfg.clone()).initialize().unwrap();
        let mut coherent = Simulation::from_config(cfg).initialize().unwrap();

        brute.step(0.2, Strategy::BruteForce).unwrap();
        scattered.step(0.2, Strategy::ScatteredGrid).unwrap();
        coherent.step(0.2, Strategy::CoherentGrid).unwrap();

        let bp = brute.snapshot_positions().unwrap();
        let bv = brute.snapshot_velocities().unwrap();
        let sp = scattered.snapshot_positions().unwrap();
        let sv = scattered.snapshot_velocities().unwrap();
        for i in 0..bp.len() {
            assert_close(bp[i], sp[i], "scattered position");
            assert_close(bv[i], sv[i], "scattered velocity");
        }

        // Coherent slot i holds the particle that was in slot slot_of[i].
        let slot_of = coherent.grid_index().slot_of().to_vec();
        let cp = coherent.snapshot_positions().unwrap();
        let cv = coherent.snapshot_velocities().unwrap();
        for (i, &slot) in slot_of.iter().enumerate() {
            assert_close(bp[slot as usize], cp[i], "coherent position");
            assert_close(bv[slot as usize], cv[i], "coherent velocity");
        }
    }
}

#[test]
fn test_two_particle_flock() {
    let cfg = config(2, 0);
    for strategy in Strategy::ALL {
        let mut kernel = CpuKernel::from_state(
            &cfg,
            vec![Vec3::ZERO, Vec3::X],
            vec![Vec3::ZERO; 2],
        )
        .unwrap();
        kernel.step(1.0, strategy).unwrap();

        // Cohesion pulls in by 0.01, separation pushes out by 0.1.
        let mut velocities = kernel.snapshot_velocities().unwrap();
        let mut positions = kernel.snapshot_positions().unwrap();
        velocities.sort_by(|a, b| a.x.total_cmp(&b.x));
        positions.sort_by(|a, b| a.x.total_cmp(&b.x));
        assert_close(velocities[0], Vec3::new(-0.09, 0.0, 0.0), "left velocity");
        assert_close(velocities[1], Vec3::new(0.09, 0.0, 0.0), "right velocity");
        assert_close(positions[0], Vec3::new(-0.09, 0.0, 0.0), "left position");
        assert_close(positions[1], Vec3::new(1.09, 0.0, 0.0), "right position");
    }
}

#[test]
fn test_isolated_particle_keeps_velocity() {
    let cfg = config(2, 0);
    let v = Vec3::new(0.3, -0.2, 0.1);
    let mut kernel = CpuKernel::from_state(
        &cfg,
        vec![Vec3::new(-15.0, -15.0, -15.0), Vec3::new(15.0, 15.0, 15.0)],
        vec![v, Vec3::ZERO],
    )
    .unwrap();
    kernel.step(1.0, Strategy::CoherentGrid).unwrap();
    let velocities = kernel.snapshot_velocities().unwrap();
    assert!(velocities.contains(&v));
}

// ============================================================================
// Errors and lifecycle
// ============================================================================

#[test]
fn test_invalid_rule_distance_rejected() {
    let mut flock = FlockParams::default();
    flock.rule2_distance = 0.0;
    let err = Simulation::new()
        .with_particle_count(10)
        .with_flock(flock)
        .initialize()
        .err()
        .unwrap();
    assert!(matches!(err, SimulationError::InvalidConfig(_)));
}

#[test]
fn test_oversized_lattice_rejected() {
    let mut flock = FlockParams::default();
    flock.rule1_distance = 1e-6;
    flock.rule2_distance = 1e-6;
    flock.rule3_distance = 1e-6;
    assert!(GridParams::new(1.0e6, &flock).is_err());
}

#[test]
fn test_from_state_rejects_mismatched_columns() {
    let err = CpuKernel::from_state(&config(2, 0), vec![Vec3::ZERO; 3], vec![Vec3::ZERO; 2])
        .err()
        .unwrap();
    assert!(matches!(err, SimulationError::InvalidConfig(_)));
}

#[test]
fn test_shutdown_consumes_kernel() {
    let mut sim = Simulation::new()
        .with_particle_count(64)
        .with_scene_scale(10.0)
        .initialize()
        .unwrap();
    sim.step(0.2, Strategy::CoherentGrid).unwrap();
    assert_eq!(sim.particle_count(), 64);
    assert_eq!(sim.steps(), 1);
    sim.shutdown();
}

#[test]
fn test_infinite_dt_rejected_before_brute_force() {
    let mut sim = Simulation::from_config(config(50, 9)).initialize().unwrap();
    let err = sim.step(f32::INFINITY, Strategy::BruteForce).err().unwrap();
    assert!(matches!(err, SimulationError::InvalidConfig(_)));
    for p in sim.snapshot_positions().unwrap() {
        assert!(p.is_finite());
    }
    // The next grid step still runs.
    sim.step(0.2, Strategy::ScatteredGrid).unwrap();
    assert_eq!(sim.steps(), 1);
}
