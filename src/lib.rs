//! # rtcore
//!
//! Hardware ray tracing acceleration-structure manager.
//!
//! Geometry is uploaded once, grouped into bottom-level acceleration
//! structures (BLAS), instanced into a top-level structure (TLAS), and
//! traced with one primary ray per pixel. Every resource is addressed by a
//! typed 32-bit handle; 0 is never a valid handle and marks failure.
//!
//! A backend is negotiated once at construction. On machines without a
//! usable GPU the subsystem still constructs, reports `"none"`, and turns
//! every creation call into an invalid handle.
//!
//! ## Modules
//!
//! - [`util`] - Errors and affine helpers
//! - [`handle`] - Typed resource handles
//! - [`table`] - Handle-keyed resource tables
//! - [`accel`] - BVH construction, instance encoding, host traversal
//! - [`backend`] - Backend trait and the gpu, cpu and stub backends
//! - [`factory`] - Backend negotiation
//! - [`config`] - JSON configuration and environment overrides
//! - [`tracer`] - [`RayTracer`], the public entry point
//! - [`scenes`] - Built-in scenes used by the CLI and tests
//!
//! ## Example
//!
//! ```ignore
//! use rtcore::prelude::*;
//!
//! let mut rt = RayTracer::new();
//! if rt.is_supported() {
//!     let geo = rt.create_geometry(&GeometryDesc::from_positions(&positions, None));
//!     let blas = rt.create_blas(&[geo]);
//!     let tlas = rt.create_tlas(&[Instance::new(blas)]);
//!     let image = rt.trace_rays(&TraceRaysOptions::new(tlas, 640, 480, camera));
//! }
//! ```

pub mod util;
pub mod handle;
pub mod table;
pub mod accel;
pub mod backend;
pub mod factory;
pub mod config;
pub mod tracer;
pub mod scenes;

// Re-export commonly used types
pub use util::{Error, Result};
pub use handle::{BlasHandle, GeometryHandle, Handle, TlasHandle};
pub use accel::{GeometryDesc, Instance, ShadingMode};
pub use backend::{BackendKind, Image, ResourceCounts, RtBackend, TraceRaysOptions};
pub use config::RtConfig;
pub use factory::{create_backend, create_backend_with};
pub use tracer::RayTracer;
pub use rt_shaders::CameraUniforms;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Error, Result};
    pub use crate::handle::{BlasHandle, GeometryHandle, TlasHandle};
    pub use crate::accel::{GeometryDesc, Instance, ShadingMode};
    pub use crate::backend::{BackendKind, Image, TraceRaysOptions};
    pub use crate::config::RtConfig;
    pub use crate::tracer::RayTracer;
    pub use rt_shaders::CameraUniforms;
}
