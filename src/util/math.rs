//! Math type re-exports and transform packing helpers.
//!
//! Scripts hand over 4x4 matrices as 16 floats in column-major order with an
//! implicit `[0,0,0,1]` bottom row. The native instance descriptors want a
//! row-major 3x4 block. The conversion here is a pure relayout, not a change
//! of coordinate space.

pub use glam::{Mat3, Mat4, Vec2, Vec3, Vec3A, Vec4};
pub use rt_shaders::AffineRows;

/// Relayout a column-major 4x4 into a row-major 3x4.
///
/// Output row `r`, column `c` = input element at column `c`, row `r`.
#[inline]
pub fn column_major_to_rows(m: &[f32; 16]) -> [[f32; 4]; 3] {
    let mut rows = [[0.0f32; 4]; 3];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = m[c * 4 + r];
        }
    }
    rows
}

/// Inverse of an affine 3x4 transform, or `None` if the 3x3 part is singular.
pub fn invert_affine(a: &AffineRows) -> Option<AffineRows> {
    let m = a.to_mat4();
    let det = m.determinant();
    if !det.is_finite() || det.abs() < 1e-12 {
        return None;
    }
    Some(AffineRows::from_mat4(&m.inverse()))
}

/// Quantize a linear colour channel to unorm8 (round to nearest).
#[inline]
pub fn unorm8(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}
