//! GPU backend: the step kernel as a wgpu compute pipeline over storage
//! buffers, ping-ponged through two pre-built bind groups.

use std::sync::Arc;

use glam::Vec4;
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, Buffer, BufferDescriptor, BufferUsages, CommandEncoderDescriptor,
    ComputePipeline, Device, Instance, PipelineLayoutDescriptor, Queue, ShaderStages,
    util::{BufferInitDescriptor, DeviceExt},
};

use crate::{
    config::{KernelParams, Resolution},
    error::FluidError,
    grid::{BufferId, DrawImage, GridRole},
    jets::JetUpload,
    sim::{StepBackend, StepBindings, kernel},
};

const CELL_BYTES: u64 = std::mem::size_of::<[f32; 4]>() as u64;

/// Device and queue the simulation runs on. Created once by the host and
/// handed to the backend explicitly.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    pub async fn new() -> Result<Self, FluidError> {
        let instance = Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await?;

        log::info!("Using adapter: {:?}", adapter.get_info());

        let downlevel_caps = adapter.get_downlevel_capabilities();
        if !downlevel_caps
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(FluidError::Dispatch(
                "adapter does not support compute shaders".into(),
            ));
        }

        // Four grids plus the jet list are bound to the one kernel.
        let required_limits = wgpu::Limits {
            max_storage_buffers_per_shader_stage: 5,
            ..wgpu::Limits::downlevel_defaults()
        };
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("jetfluid device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
            })
            .await?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info: adapter.get_info(),
        })
    }

    pub fn new_blocking() -> Result<Self, FluidError> {
        pollster::block_on(Self::new())
    }
}

struct GpuGrid {
    id: BufferId,
    buffer: Buffer,
}

impl GpuGrid {
    fn zeroed(device: &Device, size: u64, label: &str) -> Self {
        // wgpu zero-initializes buffers that are not mapped at creation.
        let buffer = device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Self {
            id: BufferId::next(),
            buffer,
        }
    }
}

/// Create both halves of a grid pair, reporting allocation failure for `role`.
fn create_pair(
    device: &Device,
    role: GridRole,
    resolution: Resolution,
) -> Result<[GpuGrid; 2], FluidError> {
    let size = resolution.cell_count() as u64 * CELL_BYTES;
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let pair = [
        GpuGrid::zeroed(device, size, &format!("{role} grid 1")),
        GpuGrid::zeroed(device, size, &format!("{role} grid 2")),
    ];
    match pop_error_scope(device) {
        Some(e) => Err(FluidError::ResourceExhausted {
            role,
            resolution,
            reason: e.to_string(),
        }),
        None => Ok(pair),
    }
}

/// Block until the device reports on the innermost error scope.
fn pop_error_scope(device: &Device) -> Option<wgpu::Error> {
    pollster::block_on(device.pop_error_scope())
}

/// Check that a `role` grid at `resolution` can be bound as one storage
/// buffer and covered by a single dispatch under `limits`.
fn check_fits(
    role: GridRole,
    resolution: Resolution,
    limits: &wgpu::Limits,
) -> Result<(), FluidError> {
    let exhausted = |reason: String| FluidError::ResourceExhausted {
        role,
        resolution,
        reason,
    };

    let size = resolution.cell_count() as u64 * CELL_BYTES;
    let max_size = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
    if size > max_size {
        return Err(exhausted(format!(
            "{size} byte grid exceeds the device limit of {max_size} bytes"
        )));
    }

    let [tiles_x, tiles_y] = kernel::tile_count([resolution.width, resolution.height]);
    let max_tiles = limits.max_compute_workgroups_per_dimension;
    if tiles_x > max_tiles || tiles_y > max_tiles {
        return Err(exhausted(format!(
            "{tiles_x}x{tiles_y} workgroups exceed the device limit of {max_tiles} per dimension"
        )));
    }
    Ok(())
}

struct GpuGrids {
    phys: [GpuGrid; 2],
    draw: [GpuGrid; 2],
    cells_bg: BindGroup,
    cells_bg_rev: BindGroup,
    params_buf: Buffer,
    params_bind_group: BindGroup,
    params: KernelParams,
    /// When set, index 1 is the input half of both pairs.
    flipped_bufs: bool,
}

impl GpuGrids {
    fn input(&self) -> usize {
        self.flipped_bufs as usize
    }

    fn output(&self) -> usize {
        1 - self.input()
    }
}

pub struct GpuBackend {
    context: GpuContext,
    pipeline: ComputePipeline,
    cells_bg_layout: BindGroupLayout,
    params_bg_layout: BindGroupLayout,
    jets_bg_layout: BindGroupLayout,
    grids: Option<GpuGrids>,
}

fn storage_entry(binding: u32, read_only: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuBackend {
    /// Compile the step kernel on `context`'s device. Grids are allocated
    /// later, by `StepBackend::allocate`.
    pub fn new(context: GpuContext) -> Result<Self, FluidError> {
        let device = &context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::include_wgsl!("./shader.wgsl"));

        let cells_bg_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("cells bind group layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                storage_entry(3, false),
            ],
        });

        let params_bg_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("parameters bind group layout"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let jets_bg_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("jets bind group layout"),
            entries: &[storage_entry(0, true)],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("step pipeline layout"),
            bind_group_layouts: &[&cells_bg_layout, &params_bg_layout, &jets_bg_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("step compute pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("step_kernel"),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(e) = pop_error_scope(device) {
            return Err(FluidError::Dispatch(format!(
                "failed to build the step kernel: {e}"
            )));
        }

        Ok(Self {
            context,
            pipeline,
            cells_bg_layout,
            params_bg_layout,
            jets_bg_layout,
            grids: None,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    fn cells_bind_group(&self, label: &str, input: [&Buffer; 2], output: [&Buffer; 2]) -> BindGroup {
        self.context
            .device
            .create_bind_group(&BindGroupDescriptor {
                label: Some(label),
                layout: &self.cells_bg_layout,
                entries: &[
                    BindGroupEntry {
                        binding: 0,
                        resource: input[0].as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: input[1].as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 2,
                        resource: output[0].as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 3,
                        resource: output[1].as_entire_binding(),
                    },
                ],
            })
    }

    /// Copy `src` into a mappable buffer and block until it can be read.
    fn read_buffer(&self, src: &Buffer) -> Result<Vec<[f32; 4]>, FluidError> {
        let device = &self.context.device;
        let staging = device.create_buffer(&BufferDescriptor {
            label: Some("readback buffer"),
            size: src.size(),
            mapped_at_creation: false,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        });
        let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
        encoder.copy_buffer_to_buffer(src, 0, &staging, 0, None);
        let index = self.context.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(index),
                timeout: None,
            })
            .map_err(|e| FluidError::Dispatch(e.to_string()))?;
        match pollster::block_on(rx.receive()) {
            Some(result) => result?,
            None => return Err(FluidError::Dispatch("readback was dropped".into())),
        }

        let view = slice.get_mapped_range();
        let cells = bytemuck::cast_slice::<u8, [f32; 4]>(&view).to_vec();
        drop(view);
        staging.unmap();
        Ok(cells)
    }
}

impl StepBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn allocate(&mut self, params: &KernelParams) -> Result<(), FluidError> {
        self.release();
        let resolution = params.resolution();
        let device = &self.context.device;
        let limits = device.limits();
        check_fits(GridRole::Physical, resolution, &limits)?;
        check_fits(GridRole::Draw, resolution, &limits)?;

        let phys = create_pair(device, GridRole::Physical, resolution)?;
        let draw = create_pair(device, GridRole::Draw, resolution)?;

        let cells_bg = self.cells_bind_group(
            "cells bind group (1 -> 2)",
            [&phys[0].buffer, &draw[0].buffer],
            [&phys[1].buffer, &draw[1].buffer],
        );
        let cells_bg_rev = self.cells_bind_group(
            "cells bind group (2 -> 1)",
            [&phys[1].buffer, &draw[1].buffer],
            [&phys[0].buffer, &draw[0].buffer],
        );

        let device = &self.context.device;
        let params_buf = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("kernel parameters buffer"),
            contents: bytemuck::bytes_of(params),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });
        let params_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("kernel parameters bind group"),
            layout: &self.params_bg_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: params_buf.as_entire_binding(),
            }],
        });

        self.grids = Some(GpuGrids {
            phys,
            draw,
            cells_bg,
            cells_bg_rev,
            params_buf,
            params_bind_group,
            params: *params,
            flipped_bufs: false,
        });
        Ok(())
    }

    fn release(&mut self) {
        if let Some(grids) = self.grids.take() {
            for grid in grids.phys.iter().chain(grids.draw.iter()) {
                grid.buffer.destroy();
            }
            grids.params_buf.destroy();
        }
    }

    fn resolution(&self) -> Option<Resolution> {
        self.grids.as_ref().map(|g| g.params.resolution())
    }

    fn bindings(&self) -> Option<StepBindings> {
        self.grids.as_ref().map(|g| StepBindings {
            phys_in: g.phys[g.input()].id,
            phys_out: g.phys[g.output()].id,
            draw_in: g.draw[g.input()].id,
            draw_out: g.draw[g.output()].id,
        })
    }

    fn dispatch(&mut self, jets: &JetUpload) -> Result<(), FluidError> {
        let grids = self.grids.as_ref().ok_or(FluidError::NotInitialized)?;
        let device = &self.context.device;
        let queue = &self.context.queue;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let params = grids.params.with_jet_count(jets.count());
        queue.write_buffer(&grids.params_buf, 0, bytemuck::bytes_of(&params));

        let jets_buf = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("jets buffer"),
            contents: jets.gpu_bytes(),
            usage: BufferUsages::STORAGE,
        });
        let jets_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("jets bind group"),
            layout: &self.jets_bg_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: jets_buf.as_entire_binding(),
            }],
        });

        let [tiles_x, tiles_y] = kernel::tile_count(params.resolution);
        let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("step encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("step compute pass"),
                ..Default::default()
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(
                0,
                if grids.flipped_bufs {
                    &grids.cells_bg_rev
                } else {
                    &grids.cells_bg
                },
                &[],
            );
            pass.set_bind_group(1, &grids.params_bind_group, &[]);
            pass.set_bind_group(2, &jets_bind_group, &[]);
            pass.dispatch_workgroups(tiles_x, tiles_y, 1);
        }
        let index = queue.submit(std::iter::once(encoder.finish()));

        // The swap that follows must never see a half-written output.
        let polled = device.poll(wgpu::PollType::Wait {
            submission_index: Some(index),
            timeout: None,
        });
        jets_buf.destroy();
        if let Some(e) = pop_error_scope(device) {
            return Err(FluidError::Dispatch(e.to_string()));
        }
        polled.map_err(|e| FluidError::Dispatch(e.to_string()))?;
        Ok(())
    }

    fn swap(&mut self) {
        if let Some(grids) = self.grids.as_mut() {
            grids.flipped_bufs = !grids.flipped_bufs;
        }
    }

    fn read_draw(&self, id: BufferId) -> Result<DrawImage, FluidError> {
        let grids = self.grids.as_ref().ok_or(FluidError::NotInitialized)?;
        let grid = grids
            .draw
            .iter()
            .find(|grid| grid.id == id)
            .ok_or_else(|| FluidError::Dispatch(format!("draw buffer {id:?} is not allocated")))?;
        let cells = self.read_buffer(&grid.buffer)?;
        Ok(DrawImage::from_cells(grids.params.resolution(), &cells))
    }

    fn read_physical(&self) -> Result<Vec<Vec4>, FluidError> {
        let grids = self.grids.as_ref().ok_or(FluidError::NotInitialized)?;
        let cells = self.read_buffer(&grids.phys[grids.input()].buffer)?;
        Ok(cells.into_iter().map(Vec4::from_array).collect())
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        self.release();
    }
}
