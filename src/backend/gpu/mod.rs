//! wgpu compute variant, one instance per native API.
//!
//! Hierarchies are built on the host and traversed by the WGSL kernel in
//! `rt-shaders`. Every build, refit and dispatch submits its commands and
//! waits for the device before returning.
//!
//! ## Resource layout
//! - Geometry: vertex and index bytes in device storage buffers
//! - BLAS: one result buffer, nodes followed by triangles in leaf order
//! - TLAS: traversal descriptors, world-to-object transforms, top-level nodes
//!   and leaf order, plus a bottom-level pool holding a GPU-side copy of each
//!   referenced BLAS result. A descriptor's structure reference is
//!   `(triangle_offset << 32) | node_offset` into that pool.

mod buffers;
mod device;
mod dispatch;

use std::mem::size_of;

use rt_shaders::{BvhNode, GpuTriangle, ShadingUniforms};
use tracing::debug;

use crate::accel::{assemble_triangles, Aabb, BlasData, GeometryDesc, GeometryLayout, Instance, TopLevel};
use crate::handle::{BlasHandle, GeometryHandle, TlasHandle};
use crate::util::{Error, Result};

use super::{BackendKind, Image, ResourceCounts, ResourceTables, RtBackend, TraceRaysOptions};

pub use buffers::{align4, padded_row_bytes};
pub use device::{native_backends, GpuDevice};
pub use dispatch::unpad_rows;

use buffers::{allocate, read_back, upload, STORAGE};
use dispatch::TracePipeline;

struct GpuGeometry {
    layout: GeometryLayout,
    vertices: wgpu::Buffer,
    indices: Option<wgpu::Buffer>,
}

struct GpuBlas {
    /// Nodes then triangles.
    result: wgpu::Buffer,
    node_count: u32,
    triangle_count: u32,
    bounds: Aabb,
}

impl GpuBlas {
    #[inline]
    fn nodes_bytes(&self) -> u64 {
        self.node_count as u64 * size_of::<BvhNode>() as u64
    }

    #[inline]
    fn triangles_bytes(&self) -> u64 {
        self.triangle_count as u64 * size_of::<GpuTriangle>() as u64
    }
}

/// Device buffers of a built TLAS (bound by the dispatch).
pub(crate) struct GpuTlas {
    top: TopLevel,
    top_nodes: wgpu::Buffer,
    top_order: wgpu::Buffer,
    instances: wgpu::Buffer,
    world_to_object: wgpu::Buffer,
    blas_nodes: wgpu::Buffer,
    blas_triangles: wgpu::Buffer,
}

/// Where one BLAS lands in a TLAS's bottom-level pool.
struct PoolCopy {
    blas: BlasHandle,
    node_offset: u32,
    triangle_offset: u32,
}

/// Pack pool offsets into a structure reference.
#[inline]
pub fn pool_reference(node_offset: u32, triangle_offset: u32) -> u64 {
    ((triangle_offset as u64) << 32) | node_offset as u64
}

/// Compute variant for one native API.
pub struct GpuBackend {
    kind: BackendKind,
    gpu: GpuDevice,
    pipeline: TracePipeline,
    tables: ResourceTables<GpuGeometry, GpuBlas, GpuTlas>,
    shading: ShadingUniforms,
}

impl GpuBackend {
    /// Open the device for `kind` and compile the trace pipeline.
    pub fn initialize(kind: BackendKind, allow_software: bool, shading: ShadingUniforms) -> Result<Self> {
        let gpu = GpuDevice::open(kind, allow_software)?;
        let pipeline = gpu.scoped("trace pipeline", || Ok(TracePipeline::new(&gpu)))?;
        Ok(Self {
            kind,
            gpu,
            pipeline,
            tables: ResourceTables::new(kind.name()),
            shading,
        })
    }

    /// Adapter name, for diagnostics.
    pub fn adapter_name(&self) -> &str {
        &self.gpu.info.name
    }

    fn max_storage_bytes(&self) -> u64 {
        self.gpu.limits.max_storage_buffer_binding_size as u64
    }

    fn check_storage(&self, what: &str, bytes: u64) -> Result<()> {
        if bytes > self.max_storage_bytes() {
            return Err(Error::Allocation(format!(
                "{} needs {} bytes, device binding limit is {}",
                what,
                bytes,
                self.max_storage_bytes()
            )));
        }
        Ok(())
    }

    /// Pull a geometry's inputs back from device memory and assemble triangles.
    fn read_geometry(&self, geom: &GpuGeometry, geometry_index: u32) -> Result<Vec<crate::accel::Triangle>> {
        let vertices = read_back(&self.gpu, &geom.vertices, geom.layout.vertex_bytes())?;
        let indices = match &geom.indices {
            Some(buf) => {
                let bytes = read_back(&self.gpu, buf, geom.layout.index_bytes())?;
                Some(bytemuck::pod_collect_to_vec::<u8, u32>(&bytes))
            }
            None => None,
        };
        assemble_triangles(&geom.layout, &vertices, indices.as_deref(), geometry_index)
    }
}

impl RtBackend for GpuBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn create_geometry(&mut self, desc: &GeometryDesc) -> Result<GeometryHandle> {
        let layout = desc.validate()?;
        self.check_storage("vertex buffer", layout.vertex_bytes())?;

        let gpu = &self.gpu;
        let record = gpu.scoped("geometry buffers", || {
            let vertices = upload(gpu, "rt_vertices", desc.vertex_bytes(), STORAGE);
            let indices = desc
                .indices
                .as_ref()
                .map(|idx| upload(gpu, "rt_indices", bytemuck::cast_slice(idx), STORAGE));
            Ok(GpuGeometry {
                layout,
                vertices,
                indices,
            })
        })?;

        let handle = self.tables.geometries.insert(record)?;
        debug!(?handle, bytes = layout.vertex_bytes() + layout.index_bytes(), "geometry uploaded");
        Ok(handle)
    }

    fn destroy_geometry(&mut self, handle: GeometryHandle) {
        if let Some(geom) = self.tables.geometries.remove(handle) {
            geom.vertices.destroy();
            if let Some(indices) = geom.indices {
                indices.destroy();
            }
        }
    }

    #[tracing::instrument(skip_all, fields(backend = %self.kind, geometries = geometries.len()))]
    fn create_blas(&mut self, geometries: &[GeometryHandle]) -> Result<BlasHandle> {
        if geometries.is_empty() {
            return Err(Error::invalid("BLAS needs at least one geometry"));
        }

        let mut triangles = Vec::new();
        let mut ids = Vec::with_capacity(geometries.len());
        for (index, &handle) in geometries.iter().enumerate() {
            let geom = self.tables.geometries.get(handle)?;
            triangles.extend(self.read_geometry(geom, index as u32)?);
            ids.push(handle.id());
        }

        let sizes = BlasData::estimate_sizes(triangles.len() as u64);
        debug!(result = sizes.result_bytes, scratch = sizes.scratch_bytes, "BLAS build sizes");

        let blas = BlasData::build(ids, triangles)?;
        let blob = blas.result_blob();
        self.check_storage("BLAS result", blob.len() as u64)?;

        let gpu = &self.gpu;
        let result = gpu.scoped("BLAS build", || {
            let result = allocate(gpu, "rt_blas_result", blob.len() as u64, STORAGE);
            let scratch = upload(gpu, "rt_blas_scratch", &blob, wgpu::BufferUsages::COPY_SRC);
            let mut encoder = gpu.encoder("rt_blas_build");
            encoder.copy_buffer_to_buffer(&scratch, 0, &result, 0, align4(blob.len() as u64));
            gpu.submit_and_wait(encoder)?;
            scratch.destroy();
            Ok(result)
        })?;

        let record = GpuBlas {
            result,
            node_count: blas.nodes.len() as u32,
            triangle_count: blas.triangles.len() as u32,
            bounds: blas.bounds,
        };
        let handle = self.tables.blases.insert(record)?;
        debug!(?handle, nodes = blas.nodes.len(), triangles = blas.triangles.len(), "BLAS built");
        Ok(handle)
    }

    fn destroy_blas(&mut self, handle: BlasHandle) {
        if let Some(blas) = self.tables.blases.remove(handle) {
            blas.result.destroy();
        }
    }

    #[tracing::instrument(skip_all, fields(backend = %self.kind, instances = instances.len()))]
    fn create_tlas(&mut self, instances: &[Instance]) -> Result<TlasHandle> {
        let blases = &self.tables.blases;
        let mut copies: Vec<PoolCopy> = Vec::new();
        let mut node_total: u32 = 0;
        let mut triangle_total: u32 = 0;

        let top = TopLevel::build(instances, |handle, _slot| {
            let blas = blases.get(handle)?;
            let copy = PoolCopy {
                blas: handle,
                node_offset: node_total,
                triangle_offset: triangle_total,
            };
            node_total = node_total
                .checked_add(blas.node_count)
                .ok_or_else(|| Error::invalid("bottom-level pool too large"))?;
            triangle_total = triangle_total
                .checked_add(blas.triangle_count)
                .ok_or_else(|| Error::invalid("bottom-level pool too large"))?;
            let reference = pool_reference(copy.node_offset, copy.triangle_offset);
            copies.push(copy);
            Ok((reference, blas.bounds))
        })?;

        let node_pool_bytes = node_total as u64 * size_of::<BvhNode>() as u64;
        let triangle_pool_bytes = triangle_total as u64 * size_of::<GpuTriangle>() as u64;
        self.check_storage("bottom-level node pool", node_pool_bytes)?;
        self.check_storage("bottom-level triangle pool", triangle_pool_bytes)?;
        let sizes = top.sizes();
        debug!(
            result = sizes.result_bytes,
            instances = sizes.scratch_bytes,
            pool = node_pool_bytes + triangle_pool_bytes,
            "TLAS build sizes"
        );

        let gpu = &self.gpu;
        let record = gpu.scoped("TLAS build", || {
            let blas_nodes = allocate(gpu, "rt_tlas_blas_nodes", node_pool_bytes, STORAGE);
            let blas_triangles = allocate(gpu, "rt_tlas_blas_triangles", triangle_pool_bytes, STORAGE);

            let mut encoder = gpu.encoder("rt_tlas_build");
            for copy in &copies {
                let blas = blases.get(copy.blas)?;
                let node_dst = copy.node_offset as u64 * size_of::<BvhNode>() as u64;
                let tri_dst = copy.triangle_offset as u64 * size_of::<GpuTriangle>() as u64;
                encoder.copy_buffer_to_buffer(&blas.result, 0, &blas_nodes, node_dst, blas.nodes_bytes());
                encoder.copy_buffer_to_buffer(
                    &blas.result,
                    blas.nodes_bytes(),
                    &blas_triangles,
                    tri_dst,
                    blas.triangles_bytes(),
                );
            }

            let record = GpuTlas {
                top_nodes: upload(gpu, "rt_tlas_nodes", bytemuck::cast_slice(&top.nodes), STORAGE),
                top_order: upload(gpu, "rt_tlas_order", bytemuck::cast_slice(&top.order), STORAGE),
                instances: upload(gpu, "rt_tlas_instances", bytemuck::cast_slice(&top.traversal), STORAGE),
                world_to_object: upload(
                    gpu,
                    "rt_tlas_world_to_object",
                    bytemuck::cast_slice(&top.world_to_object),
                    STORAGE,
                ),
                blas_nodes,
                blas_triangles,
                top,
            };
            gpu.submit_and_wait(encoder)?;
            Ok(record)
        })?;

        let handle = self.tables.tlases.insert(record)?;
        debug!(?handle, blases = copies.len(), "TLAS built");
        Ok(handle)
    }

    fn update_tlas(&mut self, handle: TlasHandle, instances: &[Instance]) -> Result<()> {
        let tlas = self.tables.tlases.get_mut(handle)?;
        let next = tlas.top.refitted(handle.id(), instances)?;

        let gpu = &self.gpu;
        gpu.scoped("TLAS refit", || {
            gpu.queue.write_buffer(&tlas.instances, 0, bytemuck::cast_slice(&next.traversal));
            gpu.queue.write_buffer(&tlas.world_to_object, 0, bytemuck::cast_slice(&next.world_to_object));
            gpu.queue.write_buffer(&tlas.top_nodes, 0, bytemuck::cast_slice(&next.nodes));
            gpu.queue.submit(std::iter::empty());
            gpu.wait()
        })?;
        // Host copy follows the device only once the writes landed
        tlas.top = next;
        debug!(?handle, instances = instances.len(), hidden = tlas.top.hidden_count(), "TLAS refit");
        Ok(())
    }

    fn destroy_tlas(&mut self, handle: TlasHandle) {
        if let Some(tlas) = self.tables.tlases.remove(handle) {
            for buffer in [
                &tlas.top_nodes,
                &tlas.top_order,
                &tlas.instances,
                &tlas.world_to_object,
                &tlas.blas_nodes,
                &tlas.blas_triangles,
            ] {
                buffer.destroy();
            }
        }
    }

    fn trace_rays(&mut self, options: &TraceRaysOptions) -> Result<Image> {
        options.check_size(self.gpu.limits.max_texture_dimension_2d)?;
        let tlas = self.tables.tlases.get(options.tlas)?;
        let live = tlas.top.slots().iter().map(|s| s.blas_id);
        if let Some(blas) = self.tables.first_missing_blas(live) {
            return Err(Error::DanglingBlas {
                tlas: options.tlas.id(),
                blas,
            });
        }

        let shading = options.resolve_shading(&self.shading);
        let pixels = self.pipeline.dispatch(
            &self.gpu,
            tlas,
            &options.camera,
            &shading,
            options.width,
            options.height,
        )?;
        debug!(tlas = options.tlas.id(), width = options.width, height = options.height, "rays traced");
        Ok(Image {
            width: options.width,
            height: options.height,
            pixels,
        })
    }

    fn resource_counts(&self) -> ResourceCounts {
        self.tables.counts()
    }
}
