//! Host reference variant.
//!
//! Runs the same build, refit and shading as the compute variants, with
//! `rayon` spreading image rows across threads. Results are bit-exact across
//! runs, which makes it the variant tests verify pixels against.

use std::sync::Arc;

use tracing::debug;

use crate::accel::trace::{render, HostScene};
use crate::accel::{assemble_triangles, BlasData, GeometryDesc, GeometryLayout, Instance, TopLevel};
use crate::handle::{BlasHandle, GeometryHandle, TlasHandle};
use crate::util::{Error, Result};
use rt_shaders::ShadingUniforms;

use super::{BackendKind, Image, ResourceCounts, ResourceTables, RtBackend, TraceRaysOptions};

/// Largest image edge accepted by the host variant.
pub const MAX_IMAGE_DIM: u32 = 16384;

struct CpuGeometry {
    layout: GeometryLayout,
    vertices: Vec<u8>,
    indices: Option<Vec<u32>>,
}

struct CpuTlas {
    top: TopLevel,
    /// Slot index -> BLAS data (the slot index is the structure reference).
    bottoms: Vec<Arc<BlasData>>,
}

/// Host variant (`"cpu"`).
pub struct CpuBackend {
    tables: ResourceTables<CpuGeometry, Arc<BlasData>, CpuTlas>,
    shading: ShadingUniforms,
}

impl CpuBackend {
    pub fn new(shading: ShadingUniforms) -> Self {
        debug!(threads = rayon::current_num_threads(), "cpu backend ready");
        Self {
            tables: ResourceTables::new("cpu"),
            shading,
        }
    }
}

impl RtBackend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn create_geometry(&mut self, desc: &GeometryDesc) -> Result<GeometryHandle> {
        let layout = desc.validate()?;
        let record = CpuGeometry {
            layout,
            vertices: desc.vertex_bytes().to_vec(),
            indices: desc.indices.clone(),
        };
        let handle = self.tables.geometries.insert(record)?;
        debug!(?handle, triangles = layout.triangle_count(), "geometry created");
        Ok(handle)
    }

    fn destroy_geometry(&mut self, handle: GeometryHandle) {
        self.tables.geometries.remove(handle);
    }

    fn create_blas(&mut self, geometries: &[GeometryHandle]) -> Result<BlasHandle> {
        if geometries.is_empty() {
            return Err(Error::invalid("BLAS needs at least one geometry"));
        }

        let mut triangles = Vec::new();
        let mut ids = Vec::with_capacity(geometries.len());
        for (index, &handle) in geometries.iter().enumerate() {
            let geom = self.tables.geometries.get(handle)?;
            triangles.extend(assemble_triangles(
                &geom.layout,
                &geom.vertices,
                geom.indices.as_deref(),
                index as u32,
            )?);
            ids.push(handle.id());
        }

        let blas = BlasData::build(ids, triangles)?;
        debug!(nodes = blas.nodes.len(), triangles = blas.triangles.len(), "BLAS built");
        self.tables.blases.insert(Arc::new(blas))
    }

    fn destroy_blas(&mut self, handle: BlasHandle) {
        self.tables.blases.remove(handle);
    }

    fn create_tlas(&mut self, instances: &[Instance]) -> Result<TlasHandle> {
        let blases = &self.tables.blases;
        let mut bottoms = Vec::new();
        let top = TopLevel::build(instances, |handle, slot| {
            let blas = blases.get(handle)?;
            bottoms.push(Arc::clone(blas));
            Ok((slot as u64, blas.bounds))
        })?;

        debug!(instances = top.instance_count(), blases = bottoms.len(), "TLAS built");
        self.tables.tlases.insert(CpuTlas { top, bottoms })
    }

    fn update_tlas(&mut self, handle: TlasHandle, instances: &[Instance]) -> Result<()> {
        let tlas = self.tables.tlases.get_mut(handle)?;
        tlas.top.refit(handle.id(), instances)?;
        debug!(?handle, instances = instances.len(), "TLAS refit");
        Ok(())
    }

    fn destroy_tlas(&mut self, handle: TlasHandle) {
        self.tables.tlases.remove(handle);
    }

    fn trace_rays(&mut self, options: &TraceRaysOptions) -> Result<Image> {
        options.check_size(MAX_IMAGE_DIM)?;
        let tlas = self.tables.tlases.get(options.tlas)?;
        let live = tlas.top.slots().iter().map(|s| s.blas_id);
        if let Some(blas) = self.tables.first_missing_blas(live) {
            return Err(Error::DanglingBlas {
                tlas: options.tlas.id(),
                blas,
            });
        }

        let shading = options.resolve_shading(&self.shading);
        let scene = HostScene {
            top: &tlas.top,
            bottoms: &tlas.bottoms,
        };
        let pixels = render(&scene, &options.camera, &shading, options.width, options.height);
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
