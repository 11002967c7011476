//! Backend variants behind one interface.
//!
//! [`RtBackend`] is the build/refit/dispatch contract. Implementations:
//! - [`gpu::GpuBackend`]: wgpu compute, one instance per native API
//! - [`cpu::CpuBackend`]: host reference (opt-in)
//! - [`stub::StubBackend`]: always available, does nothing
//!
//! A backend owns its three resource tables; dropping it releases whatever
//! the caller did not destroy.

pub mod cpu;
pub mod gpu;
pub mod stub;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::accel::{GeometryDesc, Instance, ShadingMode};
use crate::handle::{kind, BlasHandle, GeometryHandle, TlasHandle};
use crate::table::ResourceTable;
use crate::util::{Error, Result};
use rt_shaders::{CameraUniforms, ShadingUniforms};

/// Backend identifiers, as reported by `getBackend()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Vulkan
    Vulkan,
    /// Direct3D 12
    Dxr,
    /// Metal
    Metal,
    /// Host reference
    Cpu,
    /// Stub
    None,
}

impl BackendKind {
    /// Native variants in platform preference order.
    pub fn platform_order() -> &'static [BackendKind] {
        if cfg!(target_os = "windows") {
            &[BackendKind::Dxr, BackendKind::Vulkan]
        } else if cfg!(any(target_os = "macos", target_os = "ios")) {
            &[BackendKind::Metal, BackendKind::Vulkan]
        } else {
            &[BackendKind::Vulkan]
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vulkan => "vulkan",
            Self::Dxr => "dxr",
            Self::Metal => "metal",
            Self::Cpu => "cpu",
            Self::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vulkan" | "vk" => Some(Self::Vulkan),
            "dxr" | "dx12" | "d3d12" => Some(Self::Dxr),
            "metal" | "mtl" => Some(Self::Metal),
            "cpu" => Some(Self::Cpu),
            "none" | "stub" => Some(Self::None),
            _ => None,
        }
    }

    /// Parse a comma-separated list, skipping unknown names.
    pub fn parse_list(s: &str) -> Vec<Self> {
        s.split(',').filter(|p| !p.trim().is_empty()).filter_map(Self::parse).collect()
    }

    #[inline]
    pub fn is_gpu(self) -> bool {
        matches!(self, Self::Vulkan | Self::Dxr | Self::Metal)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments of a dispatch.
#[derive(Debug, Clone, Copy)]
pub struct TraceRaysOptions {
    pub tlas: TlasHandle,
    pub width: u32,
    pub height: u32,
    pub camera: CameraUniforms,
    /// Override of the configured hit colouring.
    pub shading: Option<ShadingMode>,
}

impl TraceRaysOptions {
    pub fn new(tlas: TlasHandle, width: u32, height: u32, camera: CameraUniforms) -> Self {
        Self {
            tlas,
            width,
            height,
            camera,
            shading: None,
        }
    }

    pub fn with_shading(mut self, mode: ShadingMode) -> Self {
        self.shading = Some(mode);
        self
    }

    /// Configured uniforms with this call's mode override applied.
    pub fn resolve_shading(&self, base: &ShadingUniforms) -> ShadingUniforms {
        let mut out = *base;
        if let Some(mode) = self.shading {
            out.mode = mode.raw();
        }
        out
    }

    /// Reject empty images and sizes past `max_dim`.
    pub fn check_size(&self, max_dim: u32) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid(format!("image size {}x{} is empty", self.width, self.height)));
        }
        if self.width > max_dim || self.height > max_dim {
            return Err(Error::invalid(format!(
                "image size {}x{} exceeds {}",
                self.width, self.height, max_dim
            )));
        }
        Ok(())
    }
}

/// RGBA8 image returned by a dispatch, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Image {
    /// Pixel at `(x, y)`, `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let p = self.pixels.get(i..i + 4)?;
        Some([p[0], p[1], p[2], p[3]])
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let img = image::RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| Error::invalid("pixel buffer does not match image size"))?;
        img.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

/// Live resources per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceCounts {
    pub geometries: usize,
    pub blases: usize,
    pub tlases: usize,
}

impl ResourceCounts {
    #[inline]
    pub fn total(&self) -> usize {
        self.geometries + self.blases + self.tlases
    }
}

impl fmt::Display for ResourceCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} geometries, {} BLAS, {} TLAS",
            self.geometries, self.blases, self.tlases
        )
    }
}

/// The three tables a backend owns.
pub struct ResourceTables<G, B, T> {
    owner: &'static str,
    pub geometries: ResourceTable<kind::Geometry, G>,
    pub blases: ResourceTable<kind::Blas, B>,
    pub tlases: ResourceTable<kind::Tlas, T>,
}

impl<G, B, T> ResourceTables<G, B, T> {
    pub fn new(owner: &'static str) -> Self {
        Self {
            owner,
            geometries: ResourceTable::new(),
            blases: ResourceTable::new(),
            tlases: ResourceTable::new(),
        }
    }

    pub fn counts(&self) -> ResourceCounts {
        ResourceCounts {
            geometries: self.geometries.len(),
            blases: self.blases.len(),
            tlases: self.tlases.len(),
        }
    }

    /// First BLAS id in `ids` with no live entry.
    pub fn first_missing_blas(&self, ids: impl IntoIterator<Item = u32>) -> Option<u32> {
        ids.into_iter().find(|&id| !self.blases.contains_id(id))
    }
}

impl<G, B, T> Drop for ResourceTables<G, B, T> {
    fn drop(&mut self) {
        let counts = self.counts();
        // TLAS first: they reference BLAS data
        self.tlases.clear();
        self.blases.clear();
        self.geometries.clear();
        if counts.total() > 0 {
            tracing::debug!(backend = self.owner, "released {}", counts);
        }
    }
}

/// Build/refit/dispatch contract every variant implements.
///
/// Every method reports failure through `Err`; turning errors into invalid
/// handles and log lines is the job of [`RayTracer`](crate::RayTracer).
pub trait RtBackend: Send {
    fn kind(&self) -> BackendKind;

    fn is_supported(&self) -> bool;

    fn create_geometry(&mut self, desc: &GeometryDesc) -> Result<GeometryHandle>;

    /// No-op for unknown or already destroyed handles.
    fn destroy_geometry(&mut self, handle: GeometryHandle);

    fn create_blas(&mut self, geometries: &[GeometryHandle]) -> Result<BlasHandle>;

    fn destroy_blas(&mut self, handle: BlasHandle);

    fn create_tlas(&mut self, instances: &[Instance]) -> Result<TlasHandle>;

    /// Refit in place; the TLAS is untouched on `Err`.
    fn update_tlas(&mut self, handle: TlasHandle, instances: &[Instance]) -> Result<()>;

    fn destroy_tlas(&mut self, handle: TlasHandle);

    fn trace_rays(&mut self, options: &TraceRaysOptions) -> Result<Image>;

    fn resource_counts(&self) -> ResourceCounts;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names_roundtrip() {
        for kind in [
            BackendKind::Vulkan,
            BackendKind::Dxr,
            BackendKind::Metal,
            BackendKind::Cpu,
            BackendKind::None,
        ] {
            assert_eq!(BackendKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(BackendKind::parse(" DX12 "), Some(BackendKind::Dxr));
        assert_eq!(BackendKind::parse("opengl"), None);
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            BackendKind::parse_list("cpu, bogus,,vulkan"),
            vec![BackendKind::Cpu, BackendKind::Vulkan]
        );
    }

    #[test]
    fn test_platform_order_is_gpu_only() {
        let order = BackendKind::platform_order();
        assert!(!order.is_empty());
        assert!(order.iter().all(|k| k.is_gpu()));
    }

    #[test]
    fn test_image_pixel() {
        let img = Image {
            width: 2,
            height: 1,
            pixels: vec![1, 2, 3, 4, 5, 6, 7, 8],
        };
        assert_eq!(img.pixel(1, 0), Some([5, 6, 7, 8]));
        assert_eq!(img.pixel(2, 0), None);
        assert_eq!(img.pixel(0, 1), None);
    }

    #[test]
    fn test_check_size() {
        let opts = TraceRaysOptions::new(TlasHandle::INVALID, 0, 4, CameraUniforms::default());
        assert!(opts.check_size(64).is_err());
        let opts = TraceRaysOptions::new(TlasHandle::INVALID, 65, 4, CameraUniforms::default());
        assert!(opts.check_size(64).is_err());
        let opts = TraceRaysOptions::new(TlasHandle::INVALID, 64, 64, CameraUniforms::default());
        assert!(opts.check_size(64).is_ok());
    }

    /// Records its name in a shared log when dropped.
    struct Tracked {
        name: &'static str,
        log: std::sync::Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.log.lock().push(self.name);
        }
    }

    #[test]
    fn test_tables_drop_releases_tlas_then_blas_then_geometry() {
        let log = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let tracked = |name| Tracked {
            name,
            log: std::sync::Arc::clone(&log),
        };

        let mut tables: ResourceTables<Tracked, Tracked, Tracked> = ResourceTables::new("test");
        tables.geometries.insert(tracked("geometry")).unwrap();
        tables.geometries.insert(tracked("geometry")).unwrap();
        tables.blases.insert(tracked("blas")).unwrap();
        tables.tlases.insert(tracked("tlas")).unwrap();
        assert_eq!(tables.counts().total(), 4);
        assert!(log.lock().is_empty());

        drop(tables);
        assert_eq!(*log.lock(), vec!["tlas", "blas", "geometry", "geometry"]);
    }
}
