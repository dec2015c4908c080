//! Simulation configuration.
//!
//! [`SimConfig`] can be serialized to JSON; missing fields take their
//! defaults, so a file only needs the values it changes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SimulationError;
use crate::rules::FlockParams;
use crate::spatial::{GridParams, NeighborWindow};

/// Complete simulation configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    /// Number of boids.
    pub particle_count: u32,
    /// Seed for initial placement.
    pub seed: u64,
    /// Half-width of the cubic scene.
    pub scene_scale: f32,
    /// Per-axis bound of the random initial velocity.
    pub initial_speed: f32,
    /// Cells searched by the grid strategies.
    pub neighbor_window: NeighborWindow,
    /// Rule constants.
    pub flock: FlockParams,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            particle_count: 5000,
            seed: 0,
            scene_scale: 100.0,
            initial_speed: 0.0,
            neighbor_window: NeighborWindow::Octant,
            flock: FlockParams::default(),
        }
    }
}

impl SimConfig {
    /// Check every value and derive the grid it implies.
    pub fn validate(&self) -> Result<GridParams, SimulationError> {
        if self.particle_count == 0 {
            return Err(SimulationError::InvalidConfig(
                "particle_count must be at least 1".into(),
            ));
        }
        if !self.initial_speed.is_finite() || self.initial_speed < 0.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "initial_speed must be finite and >= 0, got {}",
                self.initial_speed
            )));
        }
        GridParams::new(self.scene_scale, &self.flock)
    }

    /// Parse a configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, SimulationError> {
        serde_json::from_str(json)
            .map_err(|e| SimulationError::InvalidConfig(format!("bad config JSON: {}", e)))
    }

    /// Save the configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let json = fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}
