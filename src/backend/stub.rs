//! Always-available fallback. Reports unsupported, does no GPU work.

use crate::accel::{GeometryDesc, Instance};
use crate::handle::{BlasHandle, GeometryHandle, TlasHandle};
use crate::util::{Error, Result};

use super::{BackendKind, Image, ResourceCounts, RtBackend, TraceRaysOptions};

const REASON: &str = "no hardware ray tracing backend available";

/// Stub variant (`"none"`).
#[derive(Debug, Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl RtBackend for StubBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::None
    }

    fn is_supported(&self) -> bool {
        false
    }

    fn create_geometry(&mut self, _desc: &GeometryDesc) -> Result<GeometryHandle> {
        Err(Error::unsupported(REASON))
    }

    fn destroy_geometry(&mut self, _handle: GeometryHandle) {}

    fn create_blas(&mut self, _geometries: &[GeometryHandle]) -> Result<BlasHandle> {
        Err(Error::unsupported(REASON))
    }

    fn destroy_blas(&mut self, _handle: BlasHandle) {}

    fn create_tlas(&mut self, _instances: &[Instance]) -> Result<TlasHandle> {
        Err(Error::unsupported(REASON))
    }

    fn update_tlas(&mut self, _handle: TlasHandle, _instances: &[Instance]) -> Result<()> {
        Err(Error::unsupported(REASON))
    }

    fn destroy_tlas(&mut self, _handle: TlasHandle) {}

    fn trace_rays(&mut self, _options: &TraceRaysOptions) -> Result<Image> {
        Err(Error::unsupported(REASON))
    }

    fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_shaders::CameraUniforms;

    #[test]
    fn test_stub_rejects_everything() {
        let mut stub = StubBackend::new();
        assert!(!stub.is_supported());
        assert_eq!(stub.kind(), BackendKind::None);

        let desc = GeometryDesc::from_positions(&[[0.0; 3]; 3], None);
        assert!(matches!(stub.create_geometry(&desc), Err(Error::Unsupported(_))));
        assert!(stub.create_blas(&[GeometryHandle::INVALID]).is_err());
        assert!(stub.create_tlas(&[]).is_err());
        let opts = TraceRaysOptions::new(TlasHandle::INVALID, 2, 2, CameraUniforms::default());
        assert!(stub.trace_rays(&opts).is_err());
        assert_eq!(stub.resource_counts().total(), 0);
    }
}
