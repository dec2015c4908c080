//! Explicit Euler position update with toroidal wraparound.

use glam::Vec3;

use crate::stage;

/// Teleport a coordinate that left `[-scale, scale]` to the opposite face.
///
/// The coordinate lands exactly on the opposite face; the overshoot is
/// dropped rather than carried over.
#[inline]
pub fn wrap_coordinate(x: f32, scale: f32) -> f32 {
    if x < -scale {
        scale
    } else if x > scale {
        -scale
    } else {
        x
    }
}

/// Wrap every component of `p` into the scene cube.
#[inline]
pub fn wrap(p: Vec3, scale: f32) -> Vec3 {
    Vec3::new(
        wrap_coordinate(p.x, scale),
        wrap_coordinate(p.y, scale),
        wrap_coordinate(p.z, scale),
    )
}

/// `out[i] = wrap(positions[i] + velocities[i] * dt)`.
pub fn integrate(
    positions: &[Vec3],
    velocities: &[Vec3],
    out: &mut [Vec3],
    dt: f32,
    scene_scale: f32,
) {
    debug_assert_eq!(positions.len(), velocities.len());
    stage::launch(out, |i| wrap(positions[i] + velocities[i] * dt, scene_scale));
}

/// WGSL counterpart of [`wrap`].
pub const INTEGRATE_WGSL: &str = r#"
fn wrap_coordinate(x: f32, scale: f32) -> f32 {
    if x < -scale {
        return scale;
    }
    if x > scale {
        return -scale;
    }
    return x;
}

fn wrap_position(p: vec3<f32>, scale: f32) -> vec3<f32> {
    return vec3<f32>(
        wrap_coordinate(p.x, scale),
        wrap_coordinate(p.y, scale),
        wrap_coordinate(p.z, scale),
    );
}
"#;
