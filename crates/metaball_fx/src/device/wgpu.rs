//! WGSL compute implementation of [`DensityDevice`].
//!
//! One [`WgpuContext`] owns the adapter, device, queue, and compiled pipelines; every grid gets
//! its own [`WgpuDevice`] with private storage and staging buffers.
use std::sync::{Arc, Mutex};

use bytemuck::Pod;
use tracing::info;

use super::{DensityDevice, DeviceFactory, Kernel};
use crate::error::{Error, Result};
use crate::field::layout::{GpuCorner, GpuParticle, KernelParams};

const WORKGROUP_SIZE: u32 = 64;

/// Shared wgpu state for all grids.
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: wgpu::BindGroupLayout,
    densities: wgpu::ComputePipeline,
    physics: wgpu::ComputePipeline,
    adapter_name: String,
}

impl WgpuContext {
    /// Requests a high-performance adapter and compiles the kernels, blocking until ready.
    pub fn new_blocking() -> Result<Arc<Self>> {
        pollster::block_on(Self::new())
    }

    pub async fn new() -> Result<Arc<Self>> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
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
            .ok_or_else(|| Error::Device("no compatible adapter".into()))?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("metaball_fx"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| Error::Device(e.to_string()))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("metaball kernels"),
            source: wgpu::ShaderSource::Wgsl(include_str!("kernels.wgsl").into()),
        });

        let storage_entry = |binding| wgpu::BindGroupLayoutEntry {
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
            label: Some("metaball kernel layout"),
            entries: &[
                storage_entry(0),
                storage_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("metaball pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = |kernel: Kernel| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kernel.entry_point()),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(kernel.entry_point()),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let densities = pipeline(Kernel::Densities);
        let physics = pipeline(Kernel::Physics);

        info!("Compute device ready on adapter '{}'.", adapter_name);
        Ok(Arc::new(Self {
            device,
            queue,
            layout,
            densities,
            physics,
            adapter_name,
        }))
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Factory handing out [`WgpuDevice`]s that share this context.
    pub fn factory(self: &Arc<Self>) -> DeviceFactory {
        let context = Arc::clone(self);
        Arc::new(move || {
            Ok(Box::new(WgpuDevice::new(Arc::clone(&context))) as Box<dyn DensityDevice>)
        })
    }
}

type MapSlot = Arc<Mutex<Option<std::result::Result<(), wgpu::BufferAsyncError>>>>;

/// Storage buffer plus its readback staging twin, sized to an exact element count.
struct GpuBuffer {
    storage: wgpu::Buffer,
    staging: wgpu::Buffer,
    len: usize,
    mapping: Option<MapSlot>,
}

impl GpuBuffer {
    fn new<T: Pod>(device: &wgpu::Device, label: &str, len: usize) -> Self {
        // Zero-length bindings are invalid; keep one element of headroom.
        let size = (len.max(1) * std::mem::size_of::<T>()) as u64;
        let storage = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            storage,
            staging,
            len,
            mapping: None,
        }
    }

    fn byte_len<T: Pod>(&self) -> u64 {
        (self.len.max(1) * std::mem::size_of::<T>()) as u64
    }

    fn request_map(&mut self) {
        let slot: MapSlot = Arc::new(Mutex::new(None));
        let writer = Arc::clone(&slot);
        self.staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                if let Ok(mut guard) = writer.lock() {
                    *guard = Some(result);
                }
            });
        self.mapping = Some(slot);
    }

    fn read<T: Pod>(&mut self, device: &wgpu::Device, out: &mut [T]) -> Result<()> {
        let slot = self
            .mapping
            .take()
            .ok_or_else(|| Error::Device("no readback pending".into()))?;
        device.poll(wgpu::Maintain::Wait);
        let status = slot
            .lock()
            .map_err(|_| Error::Device("map slot poisoned".into()))?
            .take();
        match status {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(Error::Device(e.to_string())),
            None => return Err(Error::Device("readback did not complete".into())),
        }

        if out.len() != self.len {
            self.staging.unmap();
            return Err(Error::Device(format!(
                "readback length {} does not match buffer length {}",
                out.len(),
                self.len
            )));
        }
        {
            let data = self.staging.slice(..).get_mapped_range();
            let values: &[T] = bytemuck::cast_slice(&data);
            out.copy_from_slice(&values[..self.len]);
        }
        self.staging.unmap();
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.storage.destroy();
        self.staging.destroy();
    }
}

/// Per-grid buffers on a shared [`WgpuContext`].
pub struct WgpuDevice {
    context: Arc<WgpuContext>,
    params: wgpu::Buffer,
    corners: Option<GpuBuffer>,
    particles: Option<GpuBuffer>,
    bind_group: Option<wgpu::BindGroup>,
    allocations: u64,
}

impl WgpuDevice {
    pub fn new(context: Arc<WgpuContext>) -> Self {
        let params = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("metaball params"),
            size: std::mem::size_of::<KernelParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            context,
            params,
            corners: None,
            particles: None,
            bind_group: None,
            allocations: 0,
        }
    }

    fn upload<T: Pod>(
        context: &WgpuContext,
        slot: &mut Option<GpuBuffer>,
        bind_group: &mut Option<wgpu::BindGroup>,
        allocations: &mut u64,
        label: &str,
        data: &[T],
    ) {
        if slot.as_ref().map(|b| b.len) != Some(data.len()) {
            *slot = Some(GpuBuffer::new::<T>(&context.device, label, data.len()));
            *bind_group = None;
            *allocations += 1;
        }
        if let Some(buffer) = slot.as_ref() {
            if !data.is_empty() {
                context
                    .queue
                    .write_buffer(&buffer.storage, 0, bytemuck::cast_slice(data));
            }
        }
    }

    fn ensure_bind_group(&mut self) -> Result<()> {
        if self.bind_group.is_some() {
            return Ok(());
        }
        if self.particles.is_none() {
            self.particles = Some(GpuBuffer::new::<GpuParticle>(
                &self.context.device,
                "metaball particles",
                0,
            ));
            self.allocations += 1;
        }
        let (Some(corners), Some(particles)) = (self.corners.as_ref(), self.particles.as_ref())
        else {
            return Err(Error::Device("corner buffer was never written".into()));
        };
        self.bind_group = Some(
            self.context
                .device
                .create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("metaball bind group"),
                    layout: &self.context.layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: corners.storage.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: particles.storage.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: self.params.as_entire_binding(),
                        },
                    ],
                }),
        );
        Ok(())
    }
}

impl DensityDevice for WgpuDevice {
    fn label(&self) -> &str {
        "wgpu"
    }

    fn write_corners(&mut self, corners: &[GpuCorner]) -> Result<()> {
        Self::upload(
            &self.context,
            &mut self.corners,
            &mut self.bind_group,
            &mut self.allocations,
            "metaball corners",
            corners,
        );
        Ok(())
    }

    fn write_particles(&mut self, particles: &[GpuParticle]) -> Result<()> {
        Self::upload(
            &self.context,
            &mut self.particles,
            &mut self.bind_group,
            &mut self.allocations,
            "metaball particles",
            particles,
        );
        Ok(())
    }

    fn dispatch(&mut self, kernels: &[Kernel], params: &KernelParams) -> Result<()> {
        self.ensure_bind_group()?;
        let (Some(bind_group), Some(corners), Some(particles)) = (
            self.bind_group.as_ref(),
            self.corners.as_mut(),
            self.particles.as_mut(),
        ) else {
            return Err(Error::Device("buffers missing at dispatch".into()));
        };

        self.context
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(params));

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("metaball dispatch"),
            });
        for kernel in kernels {
            let (pipeline, count) = match kernel {
                Kernel::Physics => (&self.context.physics, params.particle_count()),
                Kernel::Densities => (&self.context.densities, params.corner_count()),
            };
            if count == 0 {
                continue;
            }
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.entry_point()),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups((count as u32).div_ceil(WORKGROUP_SIZE), 1, 1);
        }

        encoder.copy_buffer_to_buffer(
            &corners.storage,
            0,
            &corners.staging,
            0,
            corners.byte_len::<GpuCorner>(),
        );
        let physics = kernels.contains(&Kernel::Physics);
        if physics {
            encoder.copy_buffer_to_buffer(
                &particles.storage,
                0,
                &particles.staging,
                0,
                particles.byte_len::<GpuParticle>(),
            );
        }
        self.context.queue.submit(std::iter::once(encoder.finish()));

        corners.request_map();
        if physics {
            particles.request_map();
        }
        Ok(())
    }

    fn read_corners(&mut self, out: &mut [GpuCorner]) -> Result<()> {
        let buffer = self
            .corners
            .as_mut()
            .ok_or_else(|| Error::Device("corner buffer released".into()))?;
        buffer.read(&self.context.device, out)
    }

    fn read_particles(&mut self, out: &mut [GpuParticle]) -> Result<()> {
        let buffer = self
            .particles
            .as_mut()
            .ok_or_else(|| Error::Device("particle buffer released".into()))?;
        buffer.read(&self.context.device, out)
    }

    fn release(&mut self) {
        self.bind_group = None;
        self.corners = None;
        self.particles = None;
    }

    fn allocation_count(&self) -> u64 {
        self.allocations
    }
}
