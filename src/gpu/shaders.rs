//! WGSL sources of the flocking compute kernels.
//!
//! Every kernel except the sort lives in one module assembled from the
//! helper snippets of [`crate::spatial`], [`crate::rules`] and
//! [`crate::integrate`]. Pipelines use auto layout, so each entry point's
//! bind group holds exactly the bindings that entry point touches.

use crate::integrate::INTEGRATE_WGSL;
use crate::rules::FLOCK_WGSL;
use crate::spatial::GRID_WGSL;
use crate::uniforms::SIM_UNIFORMS_WGSL;

pub const WORKGROUP_SIZE: u32 = 256;

/// Binding slots of the flocking module (group 0).
pub mod binding {
    pub const PARAMS: u32 = 0;
    pub const POS_IN: u32 = 1;
    pub const VEL_IN: u32 = 2;
    pub const VEL_OUT: u32 = 3;
    pub const POS_OUT: u32 = 4;
    pub const KEYS: u32 = 5;
    pub const VALS: u32 = 6;
    pub const CELL_START: u32 = 7;
    pub const CELL_END: u32 = 8;
    pub const STATUS: u32 = 9;
}

const BINDINGS_WGSL: &str = r#"
struct Status {
    out_of_lattice: atomic<u32>,
    clamped: atomic<u32>,
};

@group(0) @binding(0) var<uniform> params: SimParams;
@group(0) @binding(1) var<storage, read> pos_in: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> vel_in: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read_write> vel_out: array<vec4<f32>>;
@group(0) @binding(4) var<storage, read_write> pos_out: array<vec4<f32>>;
@group(0) @binding(5) var<storage, read_write> keys: array<u32>;
@group(0) @binding(6) var<storage, read_write> vals: array<u32>;
@group(0) @binding(7) var<storage, read_write> cell_start: array<u32>;
@group(0) @binding(8) var<storage, read_write> cell_end: array<u32>;
@group(0) @binding(9) var<storage, read_write> status: Status;
"#;

const KERNELS_WGSL: &str = r#"
@compute @workgroup_size(256)
fn clear_cells(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.cell_count {
        return;
    }
    cell_start[i] = INVALID_CELL;
    cell_end[i] = INVALID_CELL;
}

// Pad slots past num_particles sort behind every real cell.
@compute @workgroup_size(256)
fn compute_indices(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.padded_count {
        return;
    }
    vals[i] = i;
    if i >= params.num_particles {
        keys[i] = INVALID_CELL;
        return;
    }
    let g = floor(grid_local(pos_in[i].xyz));
    if grid_in_lattice(g) {
        keys[i] = grid_flatten(vec3<i32>(g));
    } else {
        keys[i] = INVALID_CELL;
        atomicAdd(&status.out_of_lattice, 1u);
    }
}

@compute @workgroup_size(256)
fn build_cells(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    let n = params.num_particles;
    if i >= n {
        return;
    }
    let cell = keys[i];
    if i == 0u {
        if cell != INVALID_CELL {
            cell_start[cell] = 0u;
        }
    } else {
        let prev = keys[i - 1u];
        if prev != cell {
            if prev != INVALID_CELL {
                cell_end[prev] = i;
            }
            if cell != INVALID_CELL {
                cell_start[cell] = i;
            }
        }
    }
    if i == n - 1u && cell != INVALID_CELL {
        cell_end[cell] = n;
    }
}

@compute @workgroup_size(256)
fn reorder(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.num_particles {
        return;
    }
    let slot = vals[i];
    pos_out[i] = pos_in[slot];
    vel_out[i] = vel_in[slot];
}

@compute @workgroup_size(256)
fn update_naive(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.num_particles {
        return;
    }
    var f = flock_new(pos_in[i].xyz);
    for (var j = 0u; j < params.num_particles; j++) {
        if j != i {
            flock_visit(&f, pos_in[j].xyz, vel_in[j].xyz);
        }
    }
    vel_out[i] = vec4<f32>(flock_resolve(f, vel_in[i].xyz), 0.0);
}

@compute @workgroup_size(256)
fn update_scattered(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.num_particles {
        return;
    }
    let origin = pos_in[i].xyz;
    var f = flock_new(origin);
    var cells: array<u32, 27>;
    let count = grid_candidates(origin, &cells);
    for (var c = 0u; c < count; c++) {
        let first = cell_start[cells[c]];
        if first == INVALID_CELL {
            continue;
        }
        let last = cell_end[cells[c]];
        for (var k = first; k < last; k++) {
            let j = vals[k];
            if j != i {
                flock_visit(&f, pos_in[j].xyz, vel_in[j].xyz);
            }
        }
    }
    vel_out[i] = vec4<f32>(flock_resolve(f, vel_in[i].xyz), 0.0);
}

// pos_in and vel_in hold the gathered columns, so k indexes them directly.
@compute @workgroup_size(256)
fn update_coherent(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.num_particles {
        return;
    }
    let origin = pos_in[i].xyz;
    var f = flock_new(origin);
    var cells: array<u32, 27>;
    let count = grid_candidates(origin, &cells);
    for (var c = 0u; c < count; c++) {
        let first = cell_start[cells[c]];
        if first == INVALID_CELL {
            continue;
        }
        let last = cell_end[cells[c]];
        for (var k = first; k < last; k++) {
            if k != i {
                flock_visit(&f, pos_in[k].xyz, vel_in[k].xyz);
            }
        }
    }
    vel_out[i] = vec4<f32>(flock_resolve(f, vel_in[i].xyz), 0.0);
}

@compute @workgroup_size(256)
fn integrate(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.num_particles {
        return;
    }
    let p = pos_in[i].xyz + vel_in[i].xyz * params.dt;
    pos_out[i] = vec4<f32>(wrap_position(p, params.scene_scale), 0.0);
}
"#;

/// Bitonic compare-exchange over `keys` with `vals` in tow. One dispatch
/// per [`crate::uniforms::SortStep`], selected by dynamic offset.
pub const BITONIC_WGSL: &str = r#"
struct SortStep {
    j: u32,
    k: u32,
    count: u32,
    _pad: u32,
};

@group(0) @binding(0) var<storage, read_write> keys: array<u32>;
@group(0) @binding(1) var<storage, read_write> vals: array<u32>;
@group(0) @binding(2) var<uniform> sort_step: SortStep;

@compute @workgroup_size(256)
fn bitonic_step(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= sort_step.count {
        return;
    }
    let l = i ^ sort_step.j;
    if l <= i {
        return;
    }
    let a = keys[i];
    let b = keys[l];
    let ascending = (i & sort_step.k) == 0u;
    if (ascending && a > b) || (!ascending && a < b) {
        keys[i] = b;
        keys[l] = a;
        let v = vals[i];
        vals[i] = vals[l];
        vals[l] = v;
    }
}
"#;

/// Full source of the flocking module.
pub fn flock_shader_source() -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        SIM_UNIFORMS_WGSL, BINDINGS_WGSL, GRID_WGSL, FLOCK_WGSL, INTEGRATE_WGSL, KERNELS_WGSL
    )
}
