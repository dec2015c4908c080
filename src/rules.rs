//! Flocking rules shared by every neighbor-search strategy.
//!
//! Each particle gathers three running sums over its candidate neighbors:
//!
//! | Rule | Neighbors within | Accumulates | Contribution |
//! |------|------------------|-------------|--------------|
//! | 1 (cohesion) | `rule1_distance` | neighbor position | `(mean - self) * rule1_scale` |
//! | 2 (separation) | `rule2_distance` | `self - neighbor` | `sum * rule2_scale` |
//! | 3 (alignment) | `rule3_distance` | neighbor velocity | `mean * rule3_scale` |
//!
//! The new velocity is the old one plus all three contributions, clamped
//! to `max_speed`. Strategies differ only in which neighbors they visit,
//! so they all feed the same [`FlockAccumulator`].

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

/// Tunable constants of the three flocking rules.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlockParams {
    /// Cohesion radius.
    pub rule1_distance: f32,
    /// Separation radius.
    pub rule2_distance: f32,
    /// Alignment radius.
    pub rule3_distance: f32,
    /// Cohesion strength.
    pub rule1_scale: f32,
    /// Separation strength.
    pub rule2_scale: f32,
    /// Alignment strength.
    pub rule3_scale: f32,
    /// Upper bound on particle speed.
    pub max_speed: f32,
}

impl Default for FlockParams {
    fn default() -> Self {
        Self {
            rule1_distance: 5.0,
            rule2_distance: 3.0,
            rule3_distance: 5.0,
            rule1_scale: 0.01,
            rule2_scale: 0.1,
            rule3_scale: 0.1,
            max_speed: 1.0,
        }
    }
}

impl FlockParams {
    /// Largest of the three rule radii. Sets the grid cell width.
    pub fn max_distance(&self) -> f32 {
        self.rule1_distance
            .max(self.rule2_distance)
            .max(self.rule3_distance)
    }

    /// Check that every radius and the speed limit are finite and positive.
    pub fn validate(&self) -> Result<(), SimulationError> {
        let positive = [
            ("rule1_distance", self.rule1_distance),
            ("rule2_distance", self.rule2_distance),
            ("rule3_distance", self.rule3_distance),
            ("max_speed", self.max_speed),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(SimulationError::InvalidConfig(format!(
                    "{} must be finite and > 0, got {}",
                    name, value
                )));
            }
        }
        let scales = [
            ("rule1_scale", self.rule1_scale),
            ("rule2_scale", self.rule2_scale),
            ("rule3_scale", self.rule3_scale),
        ];
        for (name, value) in scales {
            if !value.is_finite() {
                return Err(SimulationError::InvalidConfig(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Result of resolving one particle's accumulated rules.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VelocityUpdate {
    /// New velocity, already clamped.
    pub velocity: Vec3,
    /// Whether the raw velocity exceeded `max_speed`.
    pub clamped: bool,
}

/// Running sums for a single particle.
#[derive(Clone, Copy, Debug)]
pub struct FlockAccumulator {
    origin: Vec3,
    center: Vec3,
    cohesion_count: u32,
    separation: Vec3,
    alignment: Vec3,
    alignment_count: u32,
}

impl FlockAccumulator {
    /// Start accumulating around a particle at `origin`.
    pub fn new(origin: Vec3) -> Self {
        Self {
            origin,
            center: Vec3::ZERO,
            cohesion_count: 0,
            separation: Vec3::ZERO,
            alignment: Vec3::ZERO,
            alignment_count: 0,
        }
    }

    /// Fold in one neighbor. The caller is responsible for skipping self.
    #[inline]
    pub fn visit(&mut self, params: &FlockParams, position: Vec3, velocity: Vec3) {
        let distance = self.origin.distance(position);
        if distance < params.rule1_distance {
            self.center += position;
            self.cohesion_count += 1;
        }
        if distance < params.rule2_distance {
            self.separation -= position - self.origin;
        }
        if distance < params.rule3_distance {
            self.alignment += velocity;
            self.alignment_count += 1;
        }
    }

    /// Combine the sums with the particle's current velocity.
    pub fn resolve(&self, params: &FlockParams, velocity: Vec3) -> VelocityUpdate {
        let mut v = velocity;
        if self.cohesion_count > 0 {
            let mean = self.center / self.cohesion_count as f32;
            v += (mean - self.origin) * params.rule1_scale;
        }
        v += self.separation * params.rule2_scale;
        if self.alignment_count > 0 {
            v += self.alignment / self.alignment_count as f32 * params.rule3_scale;
        }

        let speed = v.length();
        if speed > params.max_speed {
            VelocityUpdate {
                velocity: v * (params.max_speed / speed),
                clamped: true,
            }
        } else {
            VelocityUpdate {
                velocity: v,
                clamped: false,
            }
        }
    }
}

/// WGSL counterpart of [`FlockAccumulator`].
///
/// Expects a `params` uniform with the rule fields of [`crate::uniforms::SimUniforms`].
pub const FLOCK_WGSL: &str = r#"
struct Flock {
    origin: vec3<f32>,
    center: vec3<f32>,
    cohesion_count: u32,
    separation: vec3<f32>,
    alignment: vec3<f32>,
    alignment_count: u32,
};

fn flock_new(origin: vec3<f32>) -> Flock {
    var f: Flock;
    f.origin = origin;
    f.center = vec3<f32>(0.0);
    f.cohesion_count = 0u;
    f.separation = vec3<f32>(0.0);
    f.alignment = vec3<f32>(0.0);
    f.alignment_count = 0u;
    return f;
}

fn flock_visit(f: ptr<function, Flock>, pos: vec3<f32>, vel: vec3<f32>) {
    let d = distance((*f).origin, pos);
    if d < params.rule1_distance {
        (*f).center += pos;
        (*f).cohesion_count += 1u;
    }
    if d < params.rule2_distance {
        (*f).separation -= pos - (*f).origin;
    }
    if d < params.rule3_distance {
        (*f).alignment += vel;
        (*f).alignment_count += 1u;
    }
}

// Returns the clamped velocity; bumps the clamp counter when it had to clamp.
fn flock_resolve(f: Flock, vel: vec3<f32>) -> vec3<f32> {
    var v = vel;
    if f.cohesion_count > 0u {
        let mean = f.center / f32(f.cohesion_count);
        v += (mean - f.origin) * params.rule1_scale;
    }
    v += f.separation * params.rule2_scale;
    if f.alignment_count > 0u {
        v += f.alignment / f32(f.alignment_count) * params.rule3_scale;
    }
    let speed = length(v);
    if speed > params.max_speed {
        atomicAdd(&status.clamped, 1u);
        v = v * (params.max_speed / speed);
    }
    return v;
}
"#;
