//! Bounding boxes and build primitives.
//!
//! The flat node layout itself ([`BvhNode`]) lives in `rt-shaders` so the
//! host and the trace kernel agree on it byte-for-byte.

use glam::Vec3;
use rt_shaders::{AffineRows, BvhNode, GpuTriangle};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: [f32::INFINITY; 3],
        max: [f32::NEG_INFINITY; 3],
    };

    /// Grow to include a point.
    #[inline]
    pub fn grow_point(&mut self, p: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    /// Grow to include another AABB.
    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    /// Surface area (for SAH cost).
    #[inline]
    pub fn area(&self) -> f32 {
        let dx = self.max[0] - self.min[0];
        let dy = self.max[1] - self.min[1];
        let dz = self.max[2] - self.min[2];
        2.0 * (dx * dy + dy * dz + dz * dx)
    }

    /// Centroid of the AABB.
    #[inline]
    pub fn centroid(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Bounds of this box after an affine transform (all 8 corners).
    pub fn transformed(&self, xf: &AffineRows) -> Aabb {
        if self.is_empty() {
            return Aabb::EMPTY;
        }
        let mut out = Aabb::EMPTY;
        for corner in 0..8 {
            let p = Vec3::new(
                if corner & 1 == 0 { self.min[0] } else { self.max[0] },
                if corner & 2 == 0 { self.min[1] } else { self.max[1] },
                if corner & 4 == 0 { self.min[2] } else { self.max[2] },
            );
            out.grow_point(xf.transform_point(p).to_array());
        }
        out
    }

    /// Box stored in a node (leaf or internal fields filled by the caller).
    #[inline]
    pub fn node(&self, left_or_first: u32, count: u32) -> BvhNode {
        BvhNode {
            aabb_min: self.min,
            left_or_first,
            aabb_max: self.max,
            count,
        }
    }

    #[inline]
    pub fn of_node(node: &BvhNode) -> Aabb {
        Aabb {
            min: node.aabb_min,
            max: node.aabb_max,
        }
    }
}

/// Anything the SAH builder can partition.
pub trait Primitive {
    fn bounds(&self) -> Aabb;
    fn centroid(&self) -> [f32; 3];
}

impl Primitive for Aabb {
    #[inline]
    fn bounds(&self) -> Aabb {
        *self
    }

    #[inline]
    fn centroid(&self) -> [f32; 3] {
        Aabb::centroid(self)
    }
}

/// Host-side triangle used during a bottom-level build (before upload).
#[derive(Debug, Clone, PartialEq)]
pub struct Triangle {
    pub v0: [f32; 3],
    pub v1: [f32; 3],
    pub v2: [f32; 3],
    /// Triangle index within its geometry.
    pub primitive_index: u32,
    /// Geometry index within the BLAS input list.
    pub geometry_index: u32,
}

impl Primitive for Triangle {
    fn bounds(&self) -> Aabb {
        let mut b = Aabb::EMPTY;
        b.grow_point(self.v0);
        b.grow_point(self.v1);
        b.grow_point(self.v2);
        b
    }

    fn centroid(&self) -> [f32; 3] {
        [
            (self.v0[0] + self.v1[0] + self.v2[0]) / 3.0,
            (self.v0[1] + self.v1[1] + self.v2[1]) / 3.0,
            (self.v0[2] + self.v1[2] + self.v2[2]) / 3.0,
        ]
    }
}

impl Triangle {
    /// Convert to the packed kernel layout.
    pub fn to_gpu(&self) -> GpuTriangle {
        GpuTriangle {
            v0: self.v0,
            primitive_index: self.primitive_index,
            v1: self.v1,
            geometry_index: self.geometry_index,
            v2: self.v2,
            _pad: 0,
        }
    }
}
