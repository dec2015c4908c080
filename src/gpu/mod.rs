//! GPU kernel.
//!
//! Mirrors the CPU pipeline with wgpu compute passes. Every stage is one
//! dispatch and the queue orders them, so a pass only starts after the
//! previous one has finished writing. Position and velocity columns are
//! double-buffered; a step reads parity `p` and writes parity `1 - p`.

mod shaders;
mod spatial_gpu;

use std::sync::mpsc;
use std::time::Instant;

use glam::Vec3;

pub use shaders::{flock_shader_source, BITONIC_WGSL, WORKGROUP_SIZE};
pub use spatial_gpu::SpatialGpu;

use crate::config::SimConfig;
use crate::error::{GpuError, SimulationError};
use crate::simulation::{check_dt, check_initial_state, SimulationKernel, StepStats, Strategy};
use crate::spatial::GridParams;
use crate::spawn::spawn_uniform;
use crate::uniforms::SimUniforms;
use shaders::binding;
use spatial_gpu::GridBuffers;

/// Two `u32` atomics: out-of-lattice count, clamp count.
const STATUS_SIZE: u64 = 8;

/// Bind groups of the flocking passes for one parity.
struct FlockBindGroups {
    naive: wgpu::BindGroup,
    scattered: wgpu::BindGroup,
    reorder: wgpu::BindGroup,
    coherent: wgpu::BindGroup,
    integrate_unsorted: wgpu::BindGroup,
    integrate_sorted: wgpu::BindGroup,
}

struct FlockPipelines {
    update_naive: wgpu::ComputePipeline,
    update_scattered: wgpu::ComputePipeline,
    reorder: wgpu::ComputePipeline,
    update_coherent: wgpu::ComputePipeline,
    integrate: wgpu::ComputePipeline,
}

/// GPU implementation of [`SimulationKernel`].
pub struct GpuKernel {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,

    positions: [wgpu::Buffer; 2],
    velocities: [wgpu::Buffer; 2],
    sorted_positions: wgpu::Buffer,
    sorted_velocities: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    status_buffer: wgpu::Buffer,
    status_staging: wgpu::Buffer,

    spatial: SpatialGpu,
    pipelines: FlockPipelines,
    bind_groups: [FlockBindGroups; 2],

    uniforms: SimUniforms,
    grid: GridParams,
    parity: usize,
    num_particles: u32,
    steps: u64,
}

impl GpuKernel {
    /// Acquire a device, allocate all buffers and place particles from the
    /// configured seed.
    pub fn initialize(config: &SimConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        let (positions, velocities) = spawn_uniform(
            config.particle_count as usize,
            config.seed,
            config.scene_scale,
            config.initial_speed,
        )?;
        Self::from_state(config, &positions, &velocities)
    }

    /// Build a kernel around explicit initial columns.
    pub fn from_state(
        config: &SimConfig,
        positions: &[Vec3],
        velocities: &[Vec3],
    ) -> Result<Self, SimulationError> {
        let grid = config.validate()?;
        check_initial_state(config, positions, velocities)?;

        let num_particles = u32::try_from(positions.len()).map_err(|_| {
            SimulationError::InvalidConfig(format!(
                "{} particles exceed u32 slots",
                positions.len()
            ))
        })?;
        let padded_count = num_particles.checked_next_power_of_two().ok_or_else(|| {
            SimulationError::InvalidConfig(format!(
                "{} particles cannot be padded for sorting",
                num_particles
            ))
        })?;

        let (adapter_name, device, queue) = pollster::block_on(request_device())?;
        check_limits(&device.limits(), num_particles, padded_count, grid.cell_count())?;

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let uniforms = SimUniforms::new(config, &grid, num_particles, padded_count);
        let kernel = Self::build(
            device,
            queue,
            adapter_name,
            uniforms,
            grid,
            positions,
            velocities,
        );

        if let Some(e) = pollster::block_on(kernel.device.pop_error_scope()) {
            return Err(GpuError::Validation(e.to_string()).into());
        }
        if pollster::block_on(kernel.device.pop_error_scope()).is_some() {
            return Err(SimulationError::Allocation {
                what: "GPU particle buffers",
                count: positions.len(),
            });
        }

        log::info!(
            "GPU kernel on {}: {} particles (sort width {}, {} bitonic stages), grid {}^3",
            kernel.adapter_name,
            num_particles,
            padded_count,
            kernel.spatial.sort_stage_count(),
            kernel.grid.side()
        );
        Ok(kernel)
    }

    fn build(
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_name: String,
        uniforms: SimUniforms,
        grid: GridParams,
        positions: &[Vec3],
        velocities: &[Vec3],
    ) -> Self {
        use wgpu::util::DeviceExt;

        let column_usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        let column_size = positions.len() as u64 * std::mem::size_of::<[f32; 4]>() as u64;
        let column = |label: &str, data: Option<&[Vec3]>| match data {
            Some(data) => device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&to_vec4(data)),
                usage: column_usage,
            }),
            None => device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: column_size,
                usage: column_usage,
                mapped_at_creation: false,
            }),
        };

        let positions = [column("Positions A", Some(positions)), column("Positions B", None)];
        let velocities = [column("Velocities A", Some(velocities)), column("Velocities B", None)];
        let sorted_positions = column("Sorted Positions", None);
        let sorted_velocities = column("Sorted Velocities", None);

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sim Params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let status_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Status"),
            size: STATUS_SIZE,
            usage: column_usage,
            mapped_at_creation: false,
        });
        let status_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Status Staging"),
            size: STATUS_SIZE,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let source = flock_shader_source();
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Flock Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let spatial = SpatialGpu::new(
            &device,
            &module,
            GridBuffers {
                params: &params_buffer,
                status: &status_buffer,
                positions: [&positions[0], &positions[1]],
            },
            uniforms.num_particles,
            uniforms.padded_count,
            uniforms.cell_count,
        );

        let pipeline = |entry_point: &str, label: &str| {
            create_compute_pipeline(&device, &module, entry_point, label)
        };
        let pipelines = FlockPipelines {
            update_naive: pipeline("update_naive", "Update Naive Pipeline"),
            update_scattered: pipeline("update_scattered", "Update Scattered Pipeline"),
            reorder: pipeline("reorder", "Reorder Pipeline"),
            update_coherent: pipeline("update_coherent", "Update Coherent Pipeline"),
            integrate: pipeline("integrate", "Integrate Pipeline"),
        };

        let bind_group =
            |label: &str, pipeline: &wgpu::ComputePipeline, entries: &[wgpu::BindGroupEntry]| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(label),
                    layout: &pipeline.get_bind_group_layout(0),
                    entries,
                })
            };

        let bind_groups = [0usize, 1].map(|cur| {
            let next = 1 - cur;
            FlockBindGroups {
                naive: bind_group(
                    "Update Naive Bind Group",
                    &pipelines.update_naive,
                    &[
                        entry(binding::PARAMS, &params_buffer),
                        entry(binding::POS_IN, &positions[cur]),
                        entry(binding::VEL_IN, &velocities[cur]),
                        entry(binding::VEL_OUT, &velocities[next]),
                        entry(binding::STATUS, &status_buffer),
                    ],
                ),
                scattered: bind_group(
                    "Update Scattered Bind Group",
                    &pipelines.update_scattered,
                    &[
                        entry(binding::PARAMS, &params_buffer),
                        entry(binding::POS_IN, &positions[cur]),
                        entry(binding::VEL_IN, &velocities[cur]),
                        entry(binding::VEL_OUT, &velocities[next]),
                        entry(binding::VALS, &spatial.vals),
                        entry(binding::CELL_START, &spatial.cell_start),
                        entry(binding::CELL_END, &spatial.cell_end),
                        entry(binding::STATUS, &status_buffer),
                    ],
                ),
                reorder: bind_group(
                    "Reorder Bind Group",
                    &pipelines.reorder,
                    &[
                        entry(binding::PARAMS, &params_buffer),
                        entry(binding::POS_IN, &positions[cur]),
                        entry(binding::VEL_IN, &velocities[cur]),
                        entry(binding::VEL_OUT, &sorted_velocities),
                        entry(binding::POS_OUT, &sorted_positions),
                        entry(binding::VALS, &spatial.vals),
                    ],
                ),
                coherent: bind_group(
                    "Update Coherent Bind Group",
                    &pipelines.update_coherent,
                    &[
                        entry(binding::PARAMS, &params_buffer),
                        entry(binding::POS_IN, &sorted_positions),
                        entry(binding::VEL_IN, &sorted_velocities),
                        entry(binding::VEL_OUT, &velocities[next]),
                        entry(binding::CELL_START, &spatial.cell_start),
                        entry(binding::CELL_END, &spatial.cell_end),
                        entry(binding::STATUS, &status_buffer),
                    ],
                ),
                integrate_unsorted: bind_group(
                    "Integrate Bind Group",
                    &pipelines.integrate,
                    &[
                        entry(binding::PARAMS, &params_buffer),
                        entry(binding::POS_IN, &positions[cur]),
                        entry(binding::VEL_IN, &velocities[next]),
                        entry(binding::POS_OUT, &positions[next]),
                    ],
                ),
                // Coherent slots follow the gathered order.
                integrate_sorted: bind_group(
                    "Integrate Sorted Bind Group",
                    &pipelines.integrate,
                    &[
                        entry(binding::PARAMS, &params_buffer),
                        entry(binding::POS_IN, &sorted_positions),
                        entry(binding::VEL_IN, &velocities[next]),
                        entry(binding::POS_OUT, &positions[next]),
                    ],
                ),
            }
        });

        Self {
            device,
            queue,
            adapter_name,
            positions,
            velocities,
            sorted_positions,
            sorted_velocities,
            params_buffer,
            status_buffer,
            status_staging,
            spatial,
            pipelines,
            bind_groups,
            uniforms,
            grid,
            parity: 0,
            num_particles: uniforms.num_particles,
            steps: 0,
        }
    }

    /// Name of the adapter the kernel runs on.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Completed steps.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn read_status(&self) -> Result<[u32; 2], GpuError> {
        let words: Vec<u32> = map_read(&self.device, &self.status_staging)?;
        match words.as_slice() {
            [out_of_lattice, clamped] => Ok([*out_of_lattice, *clamped]),
            _ => Err(GpuError::BufferMapping(format!(
                "status readback returned {} words",
                words.len()
            ))),
        }
    }

    fn read_column(&self, source: &wgpu::Buffer) -> Result<Vec<Vec3>, GpuError> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Snapshot Staging"),
            size: source.size(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Snapshot Encoder"),
        });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, source.size());
        self.queue.submit(Some(encoder.finish()));

        let data: Vec<[f32; 4]> = map_read(&self.device, &staging)?;
        Ok(data.iter().map(|v| Vec3::new(v[0], v[1], v[2])).collect())
    }
}

impl SimulationKernel for GpuKernel {
    fn step(&mut self, dt: f32, strategy: Strategy) -> Result<StepStats, SimulationError> {
        check_dt(dt)?;
        let start = Instant::now();
        let cur = self.parity;
        let workgroups = self.num_particles.div_ceil(WORKGROUP_SIZE);

        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&self.uniforms.with_dt(dt)));

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Step Encoder"),
        });
        encoder.clear_buffer(&self.status_buffer, 0, None);

        if strategy.uses_grid() {
            self.spatial.execute(&mut encoder, cur);
        }

        let groups = &self.bind_groups[cur];
        let pipelines = &self.pipelines;
        let passes: Vec<(&str, &wgpu::ComputePipeline, &wgpu::BindGroup)> = match strategy {
            Strategy::BruteForce => vec![
                ("Update Naive", &pipelines.update_naive, &groups.naive),
                ("Integrate", &pipelines.integrate, &groups.integrate_unsorted),
            ],
            Strategy::ScatteredGrid => vec![
                ("Update Scattered", &pipelines.update_scattered, &groups.scattered),
                ("Integrate", &pipelines.integrate, &groups.integrate_unsorted),
            ],
            Strategy::CoherentGrid => vec![
                ("Reorder", &pipelines.reorder, &groups.reorder),
                ("Update Coherent", &pipelines.update_coherent, &groups.coherent),
                ("Integrate", &pipelines.integrate, &groups.integrate_sorted),
            ],
        };
        for (label, pipeline, bind_group) in passes {
            dispatch(&mut encoder, label, pipeline, bind_group, workgroups);
        }

        encoder.copy_buffer_to_buffer(&self.status_buffer, 0, &self.status_staging, 0, STATUS_SIZE);
        self.queue.submit(Some(encoder.finish()));

        let [out_of_lattice, clamped] = self.read_status()?;
        if out_of_lattice > 0 {
            // Results went to the other parity; the current one is untouched.
            return Err(SimulationError::OutOfLatticeCount(out_of_lattice));
        }

        self.parity = 1 - cur;
        self.steps += 1;

        let mut stats = StepStats {
            strategy: Some(strategy),
            clamped: clamped as usize,
            ..Default::default()
        };
        stats.timings.total = start.elapsed();

        if clamped > 0 {
            log::debug!(
                "step {}: {} of {} velocities clamped to {}",
                self.steps,
                clamped,
                self.num_particles,
                self.uniforms.max_speed
            );
        }
        log::trace!("step {} ({}) on GPU: {:?}", self.steps, strategy, stats.timings.total);

        Ok(stats)
    }

    fn snapshot_positions(&self) -> Result<Vec<Vec3>, SimulationError> {
        Ok(self.read_column(&self.positions[self.parity])?)
    }

    fn snapshot_velocities(&self) -> Result<Vec<Vec3>, SimulationError> {
        Ok(self.read_column(&self.velocities[self.parity])?)
    }

    fn particle_count(&self) -> usize {
        self.num_particles as usize
    }

    fn grid(&self) -> &GridParams {
        &self.grid
    }

    fn shutdown(self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
        for buffer in self
            .positions
            .iter()
            .chain(&self.velocities)
            .chain([&self.sorted_positions, &self.sorted_velocities])
            .chain([&self.spatial.keys, &self.spatial.vals])
            .chain([&self.spatial.cell_start, &self.spatial.cell_end])
            .chain([&self.params_buffer, &self.status_buffer, &self.status_staging])
        {
            buffer.destroy();
        }
        log::info!("GPU kernel released after {} steps", self.steps);
    }
}

async fn request_device() -> Result<(String, wgpu::Device, wgpu::Queue), GpuError> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .ok_or(GpuError::NoAdapter)?;

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Flock Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        )
        .await?;

    Ok((adapter.get_info().name, device, queue))
}

fn check_limits(
    limits: &wgpu::Limits,
    num_particles: u32,
    padded_count: u32,
    cell_count: u32,
) -> Result<(), SimulationError> {
    let max_invocations =
        limits.max_compute_workgroups_per_dimension as u64 * WORKGROUP_SIZE as u64;
    if padded_count as u64 > max_invocations || cell_count as u64 > max_invocations {
        return Err(SimulationError::InvalidConfig(format!(
            "{} sort slots or {} cells exceed {} invocations per dispatch",
            padded_count, cell_count, max_invocations
        )));
    }
    let largest = (num_particles as u64 * 16)
        .max(padded_count as u64 * 4)
        .max(cell_count as u64 * 4);
    if largest > limits.max_storage_buffer_binding_size as u64 {
        return Err(SimulationError::InvalidConfig(format!(
            "a {} byte buffer exceeds the {} byte storage binding limit",
            largest, limits.max_storage_buffer_binding_size
        )));
    }
    Ok(())
}

/// Map a `MAP_READ` buffer, copy its contents out and unmap it.
fn map_read<T: bytemuck::Pod>(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
) -> Result<Vec<T>, GpuError> {
    let slice = buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|e| GpuError::BufferMapping(e.to_string()))?
        .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

    let data = {
        let view = slice.get_mapped_range();
        bytemuck::try_cast_slice::<u8, T>(&view).map(|values| values.to_vec())
    };
    buffer.unmap();
    data.map_err(|e| GpuError::BufferMapping(e.to_string()))
}

fn to_vec4(values: &[Vec3]) -> Vec<[f32; 4]> {
    values.iter().map(|v| v.extend(0.0).to_array()).collect()
}

fn dispatch(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    workgroups: u32,
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(workgroups, 1, 1);
}

pub(crate) fn create_compute_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    entry_point: &str,
    label: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: None, // Auto layout
        module: shader,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

pub(crate) fn entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}
