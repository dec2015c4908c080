//! Error types for flockgrid.
//!
//! Every failure the pipeline can report is surfaced here. Nothing in the
//! library aborts the process; a caller that treats a failure as fatal
//! decides that for itself.

use std::fmt;

use glam::Vec3;

/// Errors that can occur during GPU initialization and readback.
#[derive(Debug)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    NoAdapter,
    /// Failed to create GPU device.
    DeviceCreation(wgpu::RequestDeviceError),
    /// Failed to map buffer for reading.
    BufferMapping(String),
    /// The device rejected a resource or submission.
    Validation(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoAdapter => write!(
                f,
                "No compatible GPU adapter found. \
                 Ensure your system has a GPU with Vulkan/Metal/DX12 support."
            ),
            GpuError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            GpuError::BufferMapping(msg) => write!(f, "Failed to map GPU buffer: {}", msg),
            GpuError::Validation(msg) => write!(f, "GPU validation error: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceCreation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::RequestDeviceError> for GpuError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        GpuError::DeviceCreation(e)
    }
}

/// Errors that can occur when building or stepping a simulation.
#[derive(Debug)]
pub enum SimulationError {
    /// A configuration value is out of its valid range.
    InvalidConfig(String),
    /// A buffer could not be allocated.
    Allocation {
        /// Which buffer failed.
        what: &'static str,
        /// Requested element count.
        count: usize,
    },
    /// A particle position maps to a cell outside the lattice.
    OutOfLattice {
        /// Offending particle slot.
        slot: usize,
        /// Its position at the start of the step.
        position: Vec3,
    },
    /// The GPU kernel found this many particles outside the lattice.
    OutOfLatticeCount(u32),
    /// GPU failure.
    Gpu(GpuError),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            SimulationError::Allocation { what, count } => {
                write!(f, "Failed to allocate {} ({} elements)", what, count)
            }
            SimulationError::OutOfLattice { slot, position } => write!(
                f,
                "Particle {} at {} lies outside the spatial grid",
                slot, position
            ),
            SimulationError::OutOfLatticeCount(n) => {
                write!(f, "{} particles lie outside the spatial grid", n)
            }
            SimulationError::Gpu(e) => write!(f, "GPU error: {}", e),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::Gpu(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GpuError> for SimulationError {
    fn from(e: GpuError) -> Self {
        SimulationError::Gpu(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_lattice_display() {
        let e = SimulationError::OutOfLattice {
            slot: 7,
            position: Vec3::new(500.0, 0.0, 0.0),
        };
        let msg = e.to_string();
        assert!(msg.contains("Particle 7"));
        assert!(msg.contains("outside the spatial grid"));
    }

    #[test]
    fn test_gpu_error_source_chain() {
        let e: SimulationError = GpuError::NoAdapter.into();
        assert!(e.to_string().starts_with("GPU error"));
        assert!(std::error::Error::source(&e).is_some());
    }
}
