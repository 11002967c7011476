//! Triangle geometry input: validation, vertex decode, triangle assembly.
//!
//! Vertices are opaque byte records of `vertex_stride` bytes whose first 12
//! bytes are the position as three little-endian `f32`. Indices are 32-bit.

use crate::util::{Error, Result};

use super::bvh::Triangle;

/// Smallest stride that still holds a position.
pub const MIN_VERTEX_STRIDE: u32 = 12;

/// Caller-supplied geometry description.
#[derive(Debug, Clone, Default)]
pub struct GeometryDesc {
    /// Raw vertex bytes, at least `vertex_count * vertex_stride` long.
    pub vertices: Vec<u8>,
    pub vertex_count: u32,
    /// Bytes between consecutive vertices.
    pub vertex_stride: u32,
    /// Optional 32-bit index list (three per triangle).
    pub indices: Option<Vec<u32>>,
}

/// Recorded shape of a created geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryLayout {
    pub vertex_count: u32,
    pub vertex_stride: u32,
    /// 0 when non-indexed.
    pub index_count: u32,
}

impl GeometryLayout {
    /// `index_count / 3` if indexed, else `vertex_count / 3`.
    #[inline]
    pub fn triangle_count(&self) -> u32 {
        if self.index_count > 0 {
            self.index_count / 3
        } else {
            self.vertex_count / 3
        }
    }

    #[inline]
    pub fn vertex_bytes(&self) -> u64 {
        self.vertex_count as u64 * self.vertex_stride as u64
    }

    #[inline]
    pub fn index_bytes(&self) -> u64 {
        self.index_count as u64 * 4
    }
}

impl GeometryDesc {
    /// Tightly packed positions (stride 12).
    pub fn from_positions(positions: &[[f32; 3]], indices: Option<&[u32]>) -> Self {
        Self {
            vertices: bytemuck::cast_slice::<[f32; 3], u8>(positions).to_vec(),
            vertex_count: positions.len() as u32,
            vertex_stride: MIN_VERTEX_STRIDE,
            indices: indices.map(|i| i.to_vec()),
        }
    }

    /// Check counts, stride, byte length and index range.
    pub fn validate(&self) -> Result<GeometryLayout> {
        if self.vertex_count == 0 {
            return Err(Error::invalid("geometry has no vertices"));
        }
        if self.vertex_stride < MIN_VERTEX_STRIDE || self.vertex_stride % 4 != 0 {
            return Err(Error::invalid(format!(
                "vertex stride {} must be a multiple of 4 and at least {}",
                self.vertex_stride, MIN_VERTEX_STRIDE
            )));
        }

        let layout = GeometryLayout {
            vertex_count: self.vertex_count,
            vertex_stride: self.vertex_stride,
            index_count: self.indices.as_ref().map_or(0, |i| i.len() as u32),
        };

        if (self.vertices.len() as u64) < layout.vertex_bytes() {
            return Err(Error::invalid(format!(
                "vertex data is {} bytes, need {} ({} x {})",
                self.vertices.len(),
                layout.vertex_bytes(),
                self.vertex_count,
                self.vertex_stride
            )));
        }
        if let Some(indices) = &self.indices {
            if indices.is_empty() {
                return Err(Error::invalid("index list is present but empty"));
            }
            if let Some(&bad) = indices.iter().find(|&&i| i >= self.vertex_count) {
                return Err(Error::invalid(format!(
                    "index {} out of range for {} vertices",
                    bad, self.vertex_count
                )));
            }
        }
        if layout.triangle_count() == 0 {
            return Err(Error::invalid("geometry holds no complete triangle"));
        }
        Ok(layout)
    }

    /// Vertex bytes trimmed to exactly `vertex_count * vertex_stride`.
    pub fn vertex_bytes(&self) -> &[u8] {
        let len = (self.vertex_count as usize * self.vertex_stride as usize).min(self.vertices.len());
        &self.vertices[..len]
    }
}

/// Position of vertex `index`.
#[inline]
fn position(vertices: &[u8], stride: usize, index: usize) -> Result<[f32; 3]> {
    let start = index * stride;
    let bytes = vertices
        .get(start..start + 12)
        .ok_or_else(|| Error::invalid(format!("vertex {} lies outside the vertex data", index)))?;
    Ok(bytemuck::pod_read_unaligned::<[f32; 3]>(bytes))
}

/// Assemble the triangles of one geometry (trailing partial triangles dropped).
pub fn assemble_triangles(
    layout: &GeometryLayout,
    vertices: &[u8],
    indices: Option<&[u32]>,
    geometry_index: u32,
) -> Result<Vec<Triangle>> {
    let stride = layout.vertex_stride as usize;
    let count = layout.triangle_count() as usize;
    let mut out = Vec::with_capacity(count);

    for prim in 0..count {
        let corner = |k: usize| -> Result<[f32; 3]> {
            let vi = match indices {
                Some(idx) => {
                    let i = idx
                        .get(prim * 3 + k)
                        .ok_or_else(|| Error::invalid("index data shorter than index count"))?;
                    *i as usize
                }
                None => prim * 3 + k,
            };
            position(vertices, stride, vi)
        };
        out.push(Triangle {
            v0: corner(0)?,
            v1: corner(1)?,
            v2: corner(2)?,
            primitive_index: prim as u32,
            geometry_index,
        });
    }
    Ok(out)
}
