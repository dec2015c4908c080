//! GPU uniform-grid infrastructure
//!
//! Handles cell index computation, bitonic sort, and cell table building.

use std::num::NonZeroU64;

use wgpu::util::DeviceExt;

use crate::uniforms::{bitonic_steps, SortStep};

use super::shaders::{binding, BITONIC_WGSL, WORKGROUP_SIZE};
use super::{create_compute_pipeline, entry};

/// Buffers shared between the grid stages and the flocking passes.
pub struct GridBuffers<'a> {
    pub params: &'a wgpu::Buffer,
    pub status: &'a wgpu::Buffer,
    /// Position column of each parity.
    pub positions: [&'a wgpu::Buffer; 2],
}

/// GPU resources for the sorted cell index.
pub struct SpatialGpu {
    /// Cell key per sorted slot, padded to a power of two.
    pub keys: wgpu::Buffer,
    /// Particle slot per sorted slot.
    pub vals: wgpu::Buffer,
    pub cell_start: wgpu::Buffer,
    pub cell_end: wgpu::Buffer,

    clear_cells_pipeline: wgpu::ComputePipeline,
    compute_indices_pipeline: wgpu::ComputePipeline,
    bitonic_pipeline: wgpu::ComputePipeline,
    build_cells_pipeline: wgpu::ComputePipeline,

    clear_cells_bind_group: wgpu::BindGroup,
    // Indexed by parity.
    compute_indices_bind_groups: [wgpu::BindGroup; 2],
    bitonic_bind_group: wgpu::BindGroup,
    build_cells_bind_group: wgpu::BindGroup,

    sort_offsets: Vec<u32>,
    num_particles: u32,
    padded_count: u32,
    cell_count: u32,
}

impl SpatialGpu {
    pub fn new(
        device: &wgpu::Device,
        module: &wgpu::ShaderModule,
        buffers: GridBuffers<'_>,
        num_particles: u32,
        padded_count: u32,
        cell_count: u32,
    ) -> Self {
        let key_size = padded_count as u64 * std::mem::size_of::<u32>() as u64;
        let cell_table_size = cell_count as u64 * std::mem::size_of::<u32>() as u64;

        let keys = storage_buffer(device, "Cell Keys", key_size);
        let vals = storage_buffer(device, "Slot Indices", key_size);
        let cell_start = storage_buffer(device, "Cell Start", cell_table_size);
        let cell_end = storage_buffer(device, "Cell End", cell_table_size);

        // One 16-byte stage per aligned slot, addressed with dynamic offsets.
        let stride = device.limits().min_uniform_buffer_offset_alignment.max(16);
        let steps = bitonic_steps(padded_count);
        let slots = steps.len().max(1);
        let mut table = vec![0u8; slots * stride as usize];
        let mut sort_offsets = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            let offset = i * stride as usize;
            table[offset..offset + std::mem::size_of::<SortStep>()]
                .copy_from_slice(bytemuck::bytes_of(step));
            sort_offsets.push(offset as u32);
        }
        let sort_steps_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bitonic Steps"),
            contents: &table,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let clear_cells_pipeline =
            create_compute_pipeline(device, module, "clear_cells", "Clear Cells Pipeline");
        let compute_indices_pipeline =
            create_compute_pipeline(device, module, "compute_indices", "Compute Indices Pipeline");
        let build_cells_pipeline =
            create_compute_pipeline(device, module, "build_cells", "Build Cells Pipeline");
        let (bitonic_pipeline, bitonic_layout) = create_bitonic_pipeline(device);

        let clear_cells_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Clear Cells Bind Group"),
            layout: &clear_cells_pipeline.get_bind_group_layout(0),
            entries: &[
                entry(binding::PARAMS, buffers.params),
                entry(binding::CELL_START, &cell_start),
                entry(binding::CELL_END, &cell_end),
            ],
        });

        let compute_indices_bind_groups = [0usize, 1].map(|parity| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Compute Indices Bind Group"),
                layout: &compute_indices_pipeline.get_bind_group_layout(0),
                entries: &[
                    entry(binding::PARAMS, buffers.params),
                    entry(binding::POS_IN, buffers.positions[parity]),
                    entry(binding::KEYS, &keys),
                    entry(binding::VALS, &vals),
                    entry(binding::STATUS, buffers.status),
                ],
            })
        });

        let bitonic_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bitonic Bind Group"),
            layout: &bitonic_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: keys.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: vals.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &sort_steps_buffer,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<SortStep>() as u64),
                    }),
                },
            ],
        });

        let build_cells_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Build Cells Bind Group"),
            layout: &build_cells_pipeline.get_bind_group_layout(0),
            entries: &[
                entry(binding::PARAMS, buffers.params),
                entry(binding::KEYS, &keys),
                entry(binding::CELL_START, &cell_start),
                entry(binding::CELL_END, &cell_end),
            ],
        });

        Self {
            keys,
            vals,
            cell_start,
            cell_end,
            clear_cells_pipeline,
            compute_indices_pipeline,
            bitonic_pipeline,
            build_cells_pipeline,
            clear_cells_bind_group,
            compute_indices_bind_groups,
            bitonic_bind_group,
            build_cells_bind_group,
            sort_offsets,
            num_particles,
            padded_count,
            cell_count,
        }
    }

    /// Number of bitonic dispatches per step.
    pub fn sort_stage_count(&self) -> usize {
        self.sort_offsets.len()
    }

    /// Record the grid stages reading positions of `parity`.
    pub fn execute(&self, encoder: &mut wgpu::CommandEncoder, parity: usize) {
        let particle_workgroups = self.num_particles.div_ceil(WORKGROUP_SIZE);
        let padded_workgroups = self.padded_count.div_ceil(WORKGROUP_SIZE);

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Clear Cells"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.clear_cells_pipeline);
            pass.set_bind_group(0, &self.clear_cells_bind_group, &[]);
            pass.dispatch_workgroups(self.cell_count.div_ceil(WORKGROUP_SIZE), 1, 1);
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Compute Indices"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.compute_indices_pipeline);
            pass.set_bind_group(0, &self.compute_indices_bind_groups[parity], &[]);
            pass.dispatch_workgroups(padded_workgroups, 1, 1);
        }

        if !self.sort_offsets.is_empty() {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Bitonic Sort"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.bitonic_pipeline);
            for &offset in &self.sort_offsets {
                pass.set_bind_group(0, &self.bitonic_bind_group, &[offset]);
                pass.dispatch_workgroups(padded_workgroups, 1, 1);
            }
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Build Cell Table"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.build_cells_pipeline);
            pass.set_bind_group(0, &self.build_cells_bind_group, &[]);
            pass.dispatch_workgroups(particle_workgroups, 1, 1);
        }
    }
}

fn storage_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// The sort needs a dynamic-offset uniform, which auto layout cannot express.
fn create_bitonic_pipeline(
    device: &wgpu::Device,
) -> (wgpu::ComputePipeline, wgpu::BindGroupLayout) {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Bitonic Sort Shader"),
        source: wgpu::ShaderSource::Wgsl(BITONIC_WGSL.into()),
    });

    let storage = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };

    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Bitonic Bind Group Layout"),
        entries: &[
            storage(0),
            storage(1),
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<SortStep>() as u64),
                },
                count: None,
            },
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Bitonic Pipeline Layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("Bitonic Pipeline"),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some("bitonic_step"),
        compilation_options: Default::default(),
        cache: None,
    });

    (pipeline, layout)
}
