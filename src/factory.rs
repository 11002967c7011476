//! Backend negotiation.
//!
//! Candidates are tried in order; the first one that initializes wins. When
//! none does, the stub is returned, so callers never need to branch on
//! hardware availability.

use tracing::{info, warn};

use crate::backend::cpu::CpuBackend;
use crate::backend::gpu::GpuBackend;
use crate::backend::stub::StubBackend;
use crate::backend::{BackendKind, RtBackend};
use crate::config::RtConfig;
use crate::util::Result;

/// Negotiate with the loaded configuration.
pub fn create_backend() -> Box<dyn RtBackend> {
    create_backend_with(&RtConfig::load())
}

/// Negotiate with an explicit configuration.
pub fn create_backend_with(config: &RtConfig) -> Box<dyn RtBackend> {
    for kind in config.candidates() {
        match initialize(kind, config) {
            Ok(backend) => {
                info!("using {} backend", backend.kind());
                return backend;
            }
            Err(e) => warn!("{} backend unavailable: {}", kind, e),
        }
    }
    info!("no ray tracing backend initialized; falling back to stub");
    Box::new(StubBackend::new())
}

/// Initialize one candidate.
pub fn initialize(kind: BackendKind, config: &RtConfig) -> Result<Box<dyn RtBackend>> {
    let shading = config.shading_uniforms();
    Ok(match kind {
        BackendKind::Vulkan | BackendKind::Dxr | BackendKind::Metal => {
            Box::new(GpuBackend::initialize(kind, config.allow_software_adapter, shading)?)
        }
        BackendKind::Cpu => Box::new(CpuBackend::new(shading)),
        BackendKind::None => Box::new(StubBackend::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kinds: &[BackendKind]) -> RtConfig {
        RtConfig {
            backend_preference: Some(kinds.to_vec()),
            ..Default::default()
        }
    }

    #[test]
    fn test_none_selects_stub() {
        let backend = create_backend_with(&config(&[BackendKind::None, BackendKind::Cpu]));
        assert_eq!(backend.kind(), BackendKind::None);
        assert!(!backend.is_supported());
    }

    #[test]
    fn test_cpu_when_preferred() {
        let backend = create_backend_with(&config(&[BackendKind::Cpu]));
        assert_eq!(backend.kind(), BackendKind::Cpu);
        assert!(backend.is_supported());
    }

    #[test]
    fn test_negotiated_backend_is_known() {
        // Whatever the machine has, the result is one of the candidates or the stub
        let backend = create_backend_with(&RtConfig::default());
        let kind = backend.kind();
        assert!(kind == BackendKind::None || BackendKind::platform_order().contains(&kind));
        assert_eq!(backend.is_supported(), kind != BackendKind::None);
    }
}
