//! Host-side acceleration-structure algorithms shared by every backend.
//!
//! Two-level BVH:
//! 1. [`geometry`] validates caller geometry and assembles triangles
//! 2. [`blas`] builds one bottom-level hierarchy over those triangles
//! 3. [`tlas`] encodes instances and builds/refits the top level
//! 4. [`trace`] generates primary rays and shades the closest hit

pub mod blas;
pub mod build;
pub mod bvh;
pub mod geometry;
pub mod tlas;
pub mod trace;

pub use blas::{BlasData, BuildSizes};
pub use build::{build_bvh, refit, Bvh};
pub use bvh::{Aabb, Primitive, Triangle};
pub use geometry::{assemble_triangles, GeometryDesc, GeometryLayout};
pub use tlas::{encode_instance, BlasSlot, Instance, TopLevel, MAX_INSTANCE_ID};
pub use trace::{HostScene, ShadingMode};
