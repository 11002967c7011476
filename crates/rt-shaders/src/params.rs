//! GPU layout types shared by the host and the trace kernel.
//!
//! Every struct here maps byte-for-byte onto a WGSL struct in
//! [`TRACE_KERNEL_WGSL`](crate::TRACE_KERNEL_WGSL). Sizes are asserted in the
//! tests below; changing a field means changing the kernel too.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Instance flag: disable triangle facing culling (same bit as the native APIs).
pub const INSTANCE_FLAG_TRIANGLE_CULL_DISABLE: u8 = 0x1;

/// Shading mode: barycentric debug colour.
pub const SHADING_MODE_BARYCENTRIC: u32 = 0;
/// Shading mode: per-instance palette with a single diffuse light.
pub const SHADING_MODE_INSTANCE_PALETTE: u32 = 1;

/// Flat BVH node (32 bytes).
///
/// Internal node: `left_or_first` = left child index (right = left + 1), `count` = 0.
/// Leaf node: `left_or_first` = first primitive index, `count` > 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// Object-space triangle in BVH leaf order (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuTriangle {
    pub v0: [f32; 3],
    /// Triangle index within its geometry.
    pub primitive_index: u32,
    pub v1: [f32; 3],
    /// Geometry index within the owning BLAS.
    pub geometry_index: u32,
    pub v2: [f32; 3],
    pub _pad: u32,
}

/// Native instance descriptor (64 bytes).
///
/// Same binary layout as `VkAccelerationStructureInstanceKHR`,
/// `D3D12_RAYTRACING_INSTANCE_DESC` and Metal's user-id instance descriptor
/// after packing: a row-major 3x4 transform, 24-bit custom index + 8-bit mask,
/// 24-bit record offset + 8-bit flags, 64-bit structure reference.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceDescriptor {
    pub transform: [[f32; 4]; 3],
    pub instance_custom_index_and_mask: u32,
    pub sbt_offset_and_flags: u32,
    pub acceleration_structure_reference: u64,
}

impl InstanceDescriptor {
    /// Pack the bit fields. `custom_index` and `sbt_offset` keep their low 24 bits.
    pub fn new(
        transform: [[f32; 4]; 3],
        custom_index: u32,
        mask: u8,
        sbt_offset: u32,
        flags: u8,
        reference: u64,
    ) -> Self {
        Self {
            transform,
            instance_custom_index_and_mask: (custom_index & 0x00FF_FFFF) | ((mask as u32) << 24),
            sbt_offset_and_flags: (sbt_offset & 0x00FF_FFFF) | ((flags as u32) << 24),
            acceleration_structure_reference: reference,
        }
    }

    #[inline]
    pub fn custom_index(&self) -> u32 {
        self.instance_custom_index_and_mask & 0x00FF_FFFF
    }

    #[inline]
    pub fn mask(&self) -> u8 {
        (self.instance_custom_index_and_mask >> 24) as u8
    }

    #[inline]
    pub fn sbt_offset(&self) -> u32 {
        self.sbt_offset_and_flags & 0x00FF_FFFF
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        (self.sbt_offset_and_flags >> 24) as u8
    }
}

/// Row-major 3x4 affine transform (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct AffineRows {
    pub rows: [[f32; 4]; 3],
}

impl AffineRows {
    pub const IDENTITY: Self = Self {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    /// Rows of `m` with the implicit `[0,0,0,1]` bottom row dropped.
    pub fn from_mat4(m: &Mat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        Self {
            rows: [r0.to_array(), r1.to_array(), r2.to_array()],
        }
    }

    /// Expand back to a full 4x4 (bottom row `[0,0,0,1]`).
    pub fn to_mat4(&self) -> Mat4 {
        let r = &self.rows;
        Mat4::from_cols_array(&[
            r[0][0], r[1][0], r[2][0], 0.0,
            r[0][1], r[1][1], r[2][1], 0.0,
            r[0][2], r[1][2], r[2][2], 0.0,
            r[0][3], r[1][3], r[2][3], 1.0,
        ])
    }

    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let r = &self.rows;
        Vec3::new(
            r[0][0] * p.x + r[0][1] * p.y + r[0][2] * p.z + r[0][3],
            r[1][0] * p.x + r[1][1] * p.y + r[1][2] * p.z + r[1][3],
            r[2][0] * p.x + r[2][1] * p.y + r[2][2] * p.z + r[2][3],
        )
    }

    #[inline]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        let r = &self.rows;
        Vec3::new(
            r[0][0] * v.x + r[0][1] * v.y + r[0][2] * v.z,
            r[1][0] * v.x + r[1][1] * v.y + r[1][2] * v.z,
            r[2][0] * v.x + r[2][1] * v.y + r[2][2] * v.z,
        )
    }

    /// Multiply by the transpose of the upper 3x3 (normal transform when `self`
    /// is a world-to-object matrix).
    #[inline]
    pub fn transform_normal_transposed(&self, n: Vec3) -> Vec3 {
        let r = &self.rows;
        Vec3::new(
            n.x * r[0][0] + n.y * r[1][0] + n.z * r[2][0],
            n.x * r[0][1] + n.y * r[1][1] + n.z * r[2][1],
            n.x * r[0][2] + n.y * r[1][2] + n.z * r[2][2],
        )
    }
}

/// Camera uniform block: inverse view then inverse projection, both column-major.
///
/// This is the 32-float block scripts hand to `traceRays`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniforms {
    pub inv_view: [f32; 16],
    pub inv_proj: [f32; 16],
}

impl Default for CameraUniforms {
    fn default() -> Self {
        Self {
            inv_view: Mat4::IDENTITY.to_cols_array(),
            inv_proj: Mat4::IDENTITY.to_cols_array(),
        }
    }
}

impl CameraUniforms {
    /// Number of floats in the uniform block.
    pub const FLOAT_COUNT: usize = 32;

    /// Accept exactly 32 floats (inverse view, inverse projection).
    pub fn from_slice(floats: &[f32]) -> Option<Self> {
        if floats.len() != Self::FLOAT_COUNT {
            return None;
        }
        let mut out = Self::zeroed();
        out.inv_view.copy_from_slice(&floats[..16]);
        out.inv_proj.copy_from_slice(&floats[16..]);
        Some(out)
    }

    pub fn from_matrices(inv_view: Mat4, inv_proj: Mat4) -> Self {
        Self {
            inv_view: inv_view.to_cols_array(),
            inv_proj: inv_proj.to_cols_array(),
        }
    }

    /// Right-handed perspective camera at `eye` looking at `target`.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov_y_radians: f32, aspect: f32) -> Self {
        let view = Mat4::look_at_rh(eye, target, up);
        let proj = Mat4::perspective_rh(fov_y_radians, aspect, 0.1, 1000.0);
        Self::from_matrices(view.inverse(), proj.inverse())
    }

    #[inline]
    pub fn inv_view(&self) -> Mat4 {
        Mat4::from_cols_array(&self.inv_view)
    }

    #[inline]
    pub fn inv_proj(&self) -> Mat4 {
        Mat4::from_cols_array(&self.inv_proj)
    }
}

/// Shading uniform block (128 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadingUniforms {
    /// Miss colour when the ray points straight down (rgb, a unused).
    pub sky_bottom: [f32; 4],
    /// Miss colour when the ray points straight up (rgb, a unused).
    pub sky_top: [f32; 4],
    /// Instance palette, indexed by `custom_index % 4`.
    pub palette: [[f32; 4]; 4],
    /// Direction towards the light (xyz, w unused).
    pub light_dir: [f32; 4],
    pub mode: u32,
    pub t_min: f32,
    pub t_max: f32,
    pub _pad: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(size_of::<BvhNode>(), 32);
        assert_eq!(size_of::<GpuTriangle>(), 48);
        assert_eq!(size_of::<InstanceDescriptor>(), 64);
        assert_eq!(size_of::<AffineRows>(), 48);
        assert_eq!(size_of::<CameraUniforms>(), 128);
        assert_eq!(size_of::<ShadingUniforms>(), 128);
    }

    #[test]
    fn test_instance_bitfields() {
        let d = InstanceDescriptor::new(AffineRows::IDENTITY.rows, 0x1ABC_DEF0, 0x0F, 0, 1, 42);
        assert_eq!(d.custom_index(), 0x00BC_DEF0);
        assert_eq!(d.mask(), 0x0F);
        assert_eq!(d.flags(), 1);
        assert_eq!(d.acceleration_structure_reference, 42);
    }

    #[test]
    fn test_reference_is_last_eight_bytes() {
        let d = InstanceDescriptor::new(AffineRows::IDENTITY.rows, 0, 0xFF, 0, 0, 0x0000_0002_0000_0001);
        let bytes = bytemuck::bytes_of(&d);
        assert_eq!(&bytes[56..60], &1u32.to_le_bytes());
        assert_eq!(&bytes[60..64], &2u32.to_le_bytes());
    }

    #[test]
    fn test_camera_from_slice() {
        assert!(CameraUniforms::from_slice(&[0.0; 31]).is_none());
        let mut floats = [0.0f32; 32];
        floats[0] = 1.0;
        floats[16] = 2.0;
        let cam = CameraUniforms::from_slice(&floats).unwrap();
        assert_eq!(cam.inv_view[0], 1.0);
        assert_eq!(cam.inv_proj[0], 2.0);
    }

    #[test]
    fn test_affine_roundtrip_mat4() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)) * Mat4::from_scale(Vec3::splat(2.0));
        let a = AffineRows::from_mat4(&m);
        assert_eq!(a.rows[0], [2.0, 0.0, 0.0, 1.0]);
        assert_eq!(a.to_mat4(), m);
        let p = a.transform_point(Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(p, Vec3::new(3.0, 4.0, 5.0));
    }
}
