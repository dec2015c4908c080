//! Seeded initial conditions.
//!
//! Positions are uniform in the scene cube; velocities are uniform in a
//! cube of half-width `initial_speed` (all zero by default). The same seed
//! and count always yield the same particles.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::buffers::try_alloc;
use crate::error::SimulationError;

/// Deterministic random source for particle placement.
pub struct SpawnContext {
    /// Half-width of the scene cube.
    pub bounds: f32,
    rng: StdRng,
}

impl SpawnContext {
    /// Create a context for a scene of half-width `bounds`.
    pub fn new(seed: u64, bounds: f32) -> Self {
        Self {
            bounds,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Random point in `[-half, half]³`.
    #[inline]
    pub fn random_in_cube(&mut self, half: f32) -> Vec3 {
        if half <= 0.0 {
            return Vec3::ZERO;
        }
        Vec3::new(
            self.rng.gen_range(-half..=half),
            self.rng.gen_range(-half..=half),
            self.rng.gen_range(-half..=half),
        )
    }

    /// Random point inside the scene cube.
    #[inline]
    pub fn random_position(&mut self) -> Vec3 {
        self.random_in_cube(self.bounds)
    }
}

/// Generate `count` positions and velocities.
pub fn spawn_uniform(
    count: usize,
    seed: u64,
    scene_scale: f32,
    initial_speed: f32,
) -> Result<(Vec<Vec3>, Vec<Vec3>), SimulationError> {
    let mut positions = try_alloc("initial positions", count, Vec3::ZERO)?;
    let mut velocities = try_alloc("initial velocities", count, Vec3::ZERO)?;

    let mut ctx = SpawnContext::new(seed, scene_scale);
    for (p, v) in positions.iter_mut().zip(velocities.iter_mut()) {
        *p = ctx.random_position();
        *v = ctx.random_in_cube(initial_speed);
    }
    Ok((positions, velocities))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_inside_scene() {
        let (pos, vel) = spawn_uniform(2000, 3, 100.0, 0.0).unwrap();
        assert_eq!(pos.len(), 2000);
        assert!(pos.iter().all(|p| p.abs().max_element() <= 100.0));
        assert!(vel.iter().all(|v| *v == Vec3::ZERO));
    }

    #[test]
    fn test_spawn_is_seeded() {
        let a = spawn_uniform(50, 42, 10.0, 1.0).unwrap();
        let b = spawn_uniform(50, 42, 10.0, 1.0).unwrap();
        let c = spawn_uniform(50, 43, 10.0, 1.0).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.0, c.0);
    }

    #[test]
    fn test_initial_speed_bounds_velocity() {
        let (_, vel) = spawn_uniform(500, 1, 10.0, 0.5).unwrap();
        assert!(vel.iter().all(|v| v.abs().max_element() <= 0.5));
        assert!(vel.iter().any(|v| *v != Vec3::ZERO));
    }
}
