//! Public entry points.
//!
//! [`RayTracer`] owns one negotiated backend and is the only place errors
//! stop: every failure is logged once and turned into a sentinel (invalid
//! handle, `false`, or `None`). Nothing here panics or blocks on anything
//! but GPU completion.

use std::fmt::Display;

use tracing::warn;

use crate::accel::{GeometryDesc, Instance};
use crate::backend::stub::StubBackend;
use crate::backend::{BackendKind, Image, ResourceCounts, RtBackend, TraceRaysOptions};
use crate::config::RtConfig;
use crate::factory::{create_backend, create_backend_with};
use crate::handle::{BlasHandle, GeometryHandle, Handle, TlasHandle};

/// Ray tracing subsystem handle.
pub struct RayTracer {
    backend: Box<dyn RtBackend>,
}

impl Default for RayTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl RayTracer {
    /// Negotiate a backend from the loaded configuration.
    pub fn new() -> Self {
        Self::from_backend(create_backend())
    }

    /// Negotiate a backend from `config`.
    pub fn with_config(config: &RtConfig) -> Self {
        Self::from_backend(create_backend_with(config))
    }

    /// Wrap an already initialized backend.
    pub fn from_backend(backend: Box<dyn RtBackend>) -> Self {
        Self { backend }
    }

    /// Always-unsupported instance.
    pub fn stub() -> Self {
        Self::from_backend(Box::new(StubBackend::new()))
    }

    /// `isSupported()`
    pub fn is_supported(&self) -> bool {
        self.backend.is_supported()
    }

    /// `getBackend()`: `"vulkan"`, `"dxr"`, `"metal"`, `"cpu"` or `"none"`.
    pub fn backend_name(&self) -> &'static str {
        self.backend.kind().name()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn create_geometry(&mut self, desc: &GeometryDesc) -> GeometryHandle {
        sentinel("createGeometry", self.backend.create_geometry(desc))
    }

    pub fn create_blas(&mut self, geometries: &[GeometryHandle]) -> BlasHandle {
        sentinel("createBLAS", self.backend.create_blas(geometries))
    }

    pub fn create_tlas(&mut self, instances: &[Instance]) -> TlasHandle {
        sentinel("createTLAS", self.backend.create_tlas(instances))
    }

    /// Refit; `false` (TLAS unchanged) on any failure.
    pub fn update_tlas(&mut self, handle: TlasHandle, instances: &[Instance]) -> bool {
        match self.backend.update_tlas(handle, instances) {
            Ok(()) => true,
            Err(e) => {
                log_rejected("updateTLAS", e);
                false
            }
        }
    }

    /// Dispatch one primary ray per pixel; `None` on any failure.
    pub fn trace_rays(&mut self, options: &TraceRaysOptions) -> Option<Image> {
        match self.backend.trace_rays(options) {
            Ok(image) => Some(image),
            Err(e) => {
                log_rejected("traceRays", e);
                None
            }
        }
    }

    /// Idempotent.
    pub fn destroy_geometry(&mut self, handle: GeometryHandle) {
        self.backend.destroy_geometry(handle);
    }

    /// Idempotent.
    pub fn destroy_blas(&mut self, handle: BlasHandle) {
        self.backend.destroy_blas(handle);
    }

    /// Idempotent.
    pub fn destroy_tlas(&mut self, handle: TlasHandle) {
        self.backend.destroy_tlas(handle);
    }

    pub fn resource_counts(&self) -> ResourceCounts {
        self.backend.resource_counts()
    }
}

fn log_rejected(op: &str, e: impl Display) {
    warn!("{} failed: {}", op, e);
}

fn sentinel<K>(op: &str, result: crate::util::Result<Handle<K>>) -> Handle<K> {
    result.unwrap_or_else(|e| {
        log_rejected(op, e);
        Handle::INVALID
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;

    fn cpu() -> RayTracer {
        RayTracer::from_backend(Box::new(CpuBackend::new(RtConfig::default().shading_uniforms())))
    }

    #[test]
    fn test_sentinels() {
        let mut rt = cpu();
        assert!(!rt.create_geometry(&GeometryDesc::default()).is_valid());
        assert!(!rt.create_blas(&[]).is_valid());
        assert!(!rt.create_tlas(&[]).is_valid());
        assert!(!rt.update_tlas(TlasHandle::INVALID, &[]));
        assert_eq!(rt.resource_counts().total(), 0);
    }

    #[test]
    fn test_backend_name() {
        assert_eq!(cpu().backend_name(), "cpu");
        assert_eq!(RayTracer::stub().backend_name(), "none");
    }
}
