//! Trace pipeline, output target and the dispatch itself.
//!
//! The output texture and its staging buffer are reallocated only when the
//! requested size changes. Each dispatch blocks until the image is back in
//! host memory; the staging copy is the result handed to the caller.

use rt_shaders::{CameraUniforms, ShadingUniforms, TRACE_ENTRY_POINT, TRACE_KERNEL_WGSL, WORKGROUP_SIZE};
use tracing::debug;

use crate::util::Result;

use super::buffers::{map_read, padded_row_bytes};
use super::device::GpuDevice;
use super::GpuTlas;

/// Output storage texture format.
const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Storage texture plus host-readable staging buffer for one image size.
struct OutputTarget {
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    staging: wgpu::Buffer,
    padded_row: u32,
}

impl OutputTarget {
    fn new(gpu: &GpuDevice, width: u32, height: u32) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("rt_output"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OUTPUT_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let padded_row = padded_row_bytes(width);
        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rt_output_staging"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            width,
            height,
            texture,
            view,
            staging,
            padded_row,
        }
    }
}

/// Compute pipeline for the trace kernel plus per-size output resources.
pub struct TracePipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    camera_buffer: wgpu::Buffer,
    shading_buffer: wgpu::Buffer,
    target: Option<OutputTarget>,
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl TracePipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("rt_trace_shader"),
            source: wgpu::ShaderSource::Wgsl(TRACE_KERNEL_WGSL.into()),
        });

        let bind_group_layout = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rt_trace_bgl"),
            entries: &[
                // @binding(0..=5) hierarchy and instance storage
                storage_entry(0),
                storage_entry(1),
                storage_entry(2),
                storage_entry(3),
                storage_entry(4),
                storage_entry(5),
                // @binding(6) camera, @binding(7) shading
                uniform_entry(6),
                uniform_entry(7),
                // @binding(8) output image
                wgpu::BindGroupLayoutEntry {
                    binding: 8,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: OUTPUT_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("rt_trace_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("rt_trace_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(TRACE_ENTRY_POINT),
            compilation_options: Default::default(),
            cache: None,
        });

        let camera_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rt_camera"),
            size: std::mem::size_of::<CameraUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let shading_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rt_shading"),
            size: std::mem::size_of::<ShadingUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            pipeline,
            bind_group_layout,
            camera_buffer,
            shading_buffer,
            target: None,
        }
    }

    /// Reallocate the output texture and staging buffer if the size changed.
    fn ensure_target(&mut self, gpu: &GpuDevice, width: u32, height: u32) -> Result<()> {
        let current = self.target.as_ref().map(|t| (t.width, t.height));
        if current == Some((width, height)) {
            return Ok(());
        }
        // Old target goes first so a failed allocation does not hold both
        self.target = None;
        let target = gpu.scoped("output image", || Ok(OutputTarget::new(gpu, width, height)))?;
        debug!(width, height, padded_row = target.padded_row, "output target allocated");
        self.target = Some(target);
        Ok(())
    }

    /// Trace one image and return tightly packed RGBA8 rows.
    #[tracing::instrument(skip_all, fields(width = width, height = height))]
    pub fn dispatch(
        &mut self,
        gpu: &GpuDevice,
        tlas: &GpuTlas,
        camera: &CameraUniforms,
        shading: &ShadingUniforms,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        self.ensure_target(gpu, width, height)?;
        let Some(target) = self.target.as_ref() else {
            return Err(crate::util::Error::NotInitialized);
        };

        gpu.queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(camera));
        gpu.queue.write_buffer(&self.shading_buffer, 0, bytemuck::bytes_of(shading));

        gpu.scoped("trace dispatch", || {
            let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("rt_trace_bg"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: tlas.top_nodes.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: tlas.top_order.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: tlas.instances.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: tlas.world_to_object.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: tlas.blas_nodes.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: tlas.blas_triangles.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: self.camera_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 7,
                        resource: self.shading_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 8,
                        resource: wgpu::BindingResource::TextureView(&target.view),
                    },
                ],
            });

            let mut encoder = gpu.encoder("rt_trace");
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("rt_trace_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(width.div_ceil(WORKGROUP_SIZE), height.div_ceil(WORKGROUP_SIZE), 1);
            }

            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: &target.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &target.staging,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(target.padded_row),
                        rows_per_image: Some(height),
                    },
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
            gpu.queue.submit(Some(encoder.finish()));
            Ok(())
        })?;

        let padded = map_read(gpu, &target.staging, target.padded_row as u64 * height as u64)?;
        Ok(unpad_rows(&padded, width, height, target.padded_row))
    }
}

/// Strip row padding from a texture readback.
pub fn unpad_rows(padded: &[u8], width: u32, height: u32, padded_row: u32) -> Vec<u8> {
    let row = width as usize * 4;
    let mut out = Vec::with_capacity(row * height as usize);
    for chunk in padded.chunks(padded_row as usize).take(height as usize) {
        out.extend_from_slice(&chunk[..row.min(chunk.len())]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpad_rows() {
        // 2x2 image, rows padded to 12 bytes
        let padded: Vec<u8> = (0..24).collect();
        let out = unpad_rows(&padded, 2, 2, 12);
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5, 6, 7, 12, 13, 14, 15, 16, 17, 18, 19]);
    }
}
