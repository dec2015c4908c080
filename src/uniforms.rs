//! Uniform blocks shared by the GPU compute passes.

use bytemuck::{Pod, Zeroable};

use crate::config::SimConfig;
use crate::spatial::GridParams;

/// Per-step parameters of every flocking pass. Matches `SimParams` in
/// [`SIM_UNIFORMS_WGSL`] field for field (80 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SimUniforms {
    pub grid_min: [f32; 3],
    pub inverse_cell_width: f32,
    pub side: u32,
    pub cell_count: u32,
    pub num_particles: u32,
    pub padded_count: u32,
    pub rule1_distance: f32,
    pub rule2_distance: f32,
    pub rule3_distance: f32,
    pub max_speed: f32,
    pub rule1_scale: f32,
    pub rule2_scale: f32,
    pub rule3_scale: f32,
    pub scene_scale: f32,
    pub dt: f32,
    pub window: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

impl SimUniforms {
    /// Fill from a validated configuration. `dt` starts at zero.
    pub fn new(
        config: &SimConfig,
        grid: &GridParams,
        num_particles: u32,
        padded_count: u32,
    ) -> Self {
        let flock = &config.flock;
        Self {
            grid_min: grid.min().to_array(),
            inverse_cell_width: grid.inverse_cell_width(),
            side: grid.side(),
            cell_count: grid.cell_count(),
            num_particles,
            padded_count,
            rule1_distance: flock.rule1_distance,
            rule2_distance: flock.rule2_distance,
            rule3_distance: flock.rule3_distance,
            max_speed: flock.max_speed,
            rule1_scale: flock.rule1_scale,
            rule2_scale: flock.rule2_scale,
            rule3_scale: flock.rule3_scale,
            scene_scale: config.scene_scale,
            dt: 0.0,
            window: config.neighbor_window.as_u32(),
            _pad0: 0,
            _pad1: 0,
        }
    }

    /// Copy with a new time step.
    pub fn with_dt(mut self, dt: f32) -> Self {
        self.dt = dt;
        self
    }
}

/// One compare-exchange stage of the bitonic sort.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct SortStep {
    /// Partner distance.
    pub j: u32,
    /// Size of the bitonic sequences being merged.
    pub k: u32,
    /// Padded element count.
    pub count: u32,
    pub _pad: u32,
}

/// Every `(j, k)` stage sorting `count` elements (`count` a power of two).
pub fn bitonic_steps(count: u32) -> Vec<SortStep> {
    debug_assert!(count.is_power_of_two());
    let mut steps = Vec::new();
    let mut k = 2;
    while k <= count {
        let mut j = k / 2;
        while j > 0 {
            steps.push(SortStep { j, k, count, _pad: 0 });
            j /= 2;
        }
        k *= 2;
    }
    steps
}

/// WGSL declaration of [`SimUniforms`].
pub const SIM_UNIFORMS_WGSL: &str = r#"
struct SimParams {
    grid_min: vec3<f32>,
    inverse_cell_width: f32,
    side: u32,
    cell_count: u32,
    num_particles: u32,
    padded_count: u32,
    rule1_distance: f32,
    rule2_distance: f32,
    rule3_distance: f32,
    max_speed: f32,
    rule1_scale: f32,
    rule2_scale: f32,
    rule3_scale: f32,
    scene_scale: f32,
    dt: f32,
    window: u32,
    _pad0: u32,
    _pad1: u32,
};
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_size_matches_wgsl() {
        assert_eq!(std::mem::size_of::<SimUniforms>(), 80);
        assert_eq!(std::mem::size_of::<SortStep>(), 16);
    }

    #[test]
    fn test_uniforms_from_config() {
        let config = SimConfig::default();
        let grid = config.validate().unwrap();
        let u = SimUniforms::new(&config, &grid, 5000, 8192).with_dt(0.2);
        assert_eq!(u.side, 22);
        assert_eq!(u.grid_min, [-110.0; 3]);
        assert_eq!(u.padded_count, 8192);
        assert_eq!(u.dt, 0.2);
        assert_eq!(u.window, 0);
    }

    #[test]
    fn test_bitonic_step_count() {
        // log2(n) * (log2(n) + 1) / 2 stages.
        assert_eq!(bitonic_steps(1).len(), 0);
        assert_eq!(bitonic_steps(2).len(), 1);
        assert_eq!(bitonic_steps(8).len(), 6);
        assert_eq!(bitonic_steps(1024).len(), 55);
        assert_eq!(bitonic_steps(8)[0], SortStep { j: 1, k: 2, count: 8, _pad: 0 });
    }

    /// Run the stage list on the CPU the way the shader does.
    #[test]
    fn test_bitonic_steps_sort() {
        let mut keys = vec![0u32, 1, 0, 3, 0, 2, 2, 0, 5, 6];
        keys.resize(16, u32::MAX);
        let mut vals: Vec<u32> = (0..16).collect();
        for s in bitonic_steps(16) {
            for i in 0..s.count {
                let l = i ^ s.j;
                if l <= i {
                    continue;
                }
                let ascending = (i & s.k) == 0;
                let (a, b) = (keys[i as usize], keys[l as usize]);
                if (ascending && a > b) || (!ascending && a < b) {
                    keys.swap(i as usize, l as usize);
                    vals.swap(i as usize, l as usize);
                }
            }
        }
        assert_eq!(&keys[..10], &[0, 0, 0, 0, 1, 2, 2, 3, 5, 6]);
        let mut zeros = vals[..4].to_vec();
        zeros.sort_unstable();
        assert_eq!(zeros, vec![0, 2, 4, 7]);
    }
}
