//! Benchmarks for one simulation step per strategy on the CPU kernel,
//! plus the grid stages in isolation.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use flockgrid::prelude::*;
use flockgrid::sort::{KeySort, ParallelKeySort};
use flockgrid::spatial::GridIndex;
use flockgrid::spawn::spawn_uniform;

fn bench_config(count: u32) -> SimConfig {
    SimConfig {
        particle_count: count,
        seed: 1,
        initial_speed: 0.5,
        ..Default::default()
    }
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("step");
    group.sample_size(20);

    for count in [1_000u32, 5_000, 20_000] {
        for strategy in Strategy::ALL {
            // Quadratic in the particle count; keep it to the small sizes.
            if strategy == Strategy::BruteForce && count > 5_000 {
                continue;
            }
            let id = BenchmarkId::new(strategy.to_string(), count);
            group.bench_with_input(id, &count, |b, &count| {
                let mut sim = Simulation::from_config(bench_config(count)).initialize().unwrap();
                b.iter(|| black_box(sim.step(0.2, strategy).unwrap()))
            });
        }
    }

    group.finish();
}

fn bench_grid_stages(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_stages");
    let config = bench_config(50_000);
    let grid = config.validate().unwrap();
    let (positions, _) = spawn_uniform(50_000, 1, config.scene_scale, 0.0).unwrap();

    group.bench_function("compute_indices", |b| {
        let mut index = GridIndex::with_capacity(positions.len()).unwrap();
        b.iter(|| index.compute(&grid, black_box(&positions)).unwrap())
    });

    group.bench_function("sort_by_key", |b| {
        let mut index = GridIndex::with_capacity(positions.len()).unwrap();
        let mut sorter = ParallelKeySort::new();
        b.iter(|| {
            index.compute(&grid, &positions).unwrap();
            let (keys, values) = index.keys_and_values_mut();
            sorter.sort_by_key(keys, values);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_step, bench_grid_stages);
criterion_main!(benches);
