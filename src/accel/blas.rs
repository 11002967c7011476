//! Bottom-level build product.
//!
//! A BLAS is the concatenated triangles of its input geometries, reordered
//! into BVH leaf order, plus the node array. Once built it no longer depends
//! on the geometry it came from.

use std::mem::size_of;

use rt_shaders::{BvhNode, GpuTriangle};

use crate::util::{Error, Result};

use super::build::build_bvh;
use super::bvh::{Aabb, Triangle};

/// Storage a build needs: the retained result and the transient scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildSizes {
    pub result_bytes: u64,
    pub scratch_bytes: u64,
}

/// Host copy of a built bottom-level structure.
#[derive(Debug, Clone)]
pub struct BlasData {
    /// Flat node array; leaf `left_or_first` indexes `triangles` directly.
    pub nodes: Vec<BvhNode>,
    /// Triangles in leaf order.
    pub triangles: Vec<GpuTriangle>,
    /// Object-space bounds of every triangle.
    pub bounds: Aabb,
    /// Geometry ids that contributed, in input order.
    pub geometry_ids: Vec<u32>,
}

impl BlasData {
    /// Build from the assembled triangles of `geometry_ids`.
    #[tracing::instrument(skip_all, fields(geometries = geometry_ids.len(), triangles = triangles.len()))]
    pub fn build(geometry_ids: Vec<u32>, triangles: Vec<Triangle>) -> Result<Self> {
        if geometry_ids.is_empty() {
            return Err(Error::invalid("BLAS needs at least one geometry"));
        }
        if triangles.is_empty() {
            return Err(Error::invalid("BLAS geometries hold no triangles"));
        }

        let bvh = build_bvh(&triangles);
        let ordered: Vec<GpuTriangle> = bvh.prim_indices.iter().map(|&i| triangles[i].to_gpu()).collect();

        Ok(Self {
            bounds: bvh.bounds(),
            nodes: bvh.nodes,
            triangles: ordered,
            geometry_ids,
        })
    }

    /// Sizes for `triangle_count` triangles before the build runs.
    ///
    /// The node count is bounded by `2n - 1`; scratch holds per-primitive
    /// bounds, centroids and the working index list.
    pub fn estimate_sizes(triangle_count: u64) -> BuildSizes {
        let max_nodes = triangle_count.saturating_mul(2).saturating_sub(1).max(1);
        BuildSizes {
            result_bytes: max_nodes * size_of::<BvhNode>() as u64
                + triangle_count * size_of::<GpuTriangle>() as u64,
            scratch_bytes: triangle_count * (size_of::<Aabb>() + 12 + size_of::<usize>()) as u64,
        }
    }

    /// Exact result size: nodes then triangles.
    #[inline]
    pub fn result_bytes(&self) -> u64 {
        self.nodes_bytes() + (self.triangles.len() * size_of::<GpuTriangle>()) as u64
    }

    #[inline]
    pub fn nodes_bytes(&self) -> u64 {
        (self.nodes.len() * size_of::<BvhNode>()) as u64
    }

    /// Result bytes in upload order (nodes, then triangles).
    pub fn result_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.result_bytes() as usize);
        blob.extend_from_slice(bytemuck::cast_slice(&self.nodes));
        blob.extend_from_slice(bytemuck::cast_slice(&self.triangles));
        blob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri(x: f32, geometry_index: u32, primitive_index: u32) -> Triangle {
        Triangle {
            v0: [x, 0.0, 0.0],
            v1: [x + 1.0, 0.0, 0.0],
            v2: [x, 1.0, 0.0],
            primitive_index,
            geometry_index,
        }
    }

    #[test]
    fn test_build_rejects_empty() {
        assert!(BlasData::build(vec![], vec![tri(0.0, 0, 0)]).is_err());
        assert!(BlasData::build(vec![1], vec![]).is_err());
    }

    #[test]
    fn test_build_keeps_every_triangle() {
        let tris: Vec<Triangle> = (0..40).map(|i| tri(i as f32 * 3.0, i % 2, i / 2)).collect();
        let blas = BlasData::build(vec![4, 9], tris).unwrap();
        assert_eq!(blas.triangles.len(), 40);
        assert_eq!(blas.geometry_ids, vec![4, 9]);
        assert_eq!(blas.bounds.min, [0.0, 0.0, 0.0]);
        assert_eq!(blas.bounds.max, [118.0, 1.0, 0.0]);

        // leaves index triangles directly
        for node in blas.nodes.iter().filter(|n| n.is_leaf()) {
            let end = (node.left_or_first + node.count) as usize;
            assert!(end <= blas.triangles.len());
        }
    }

    #[test]
    fn test_result_blob_layout() {
        let blas = BlasData::build(vec![1], vec![tri(0.0, 0, 0)]).unwrap();
        let blob = blas.result_blob();
        assert_eq!(blob.len() as u64, blas.result_bytes());
        assert_eq!(blas.nodes_bytes(), 32);
        assert_eq!(blob.len(), 32 + 48);
    }

    #[test]
    fn test_estimate_covers_actual() {
        let tris: Vec<Triangle> = (0..17).map(|i| tri(i as f32 * 2.0, 0, i)).collect();
        let estimate = BlasData::estimate_sizes(17);
        let blas = BlasData::build(vec![1], tris).unwrap();
        assert!(estimate.result_bytes >= blas.result_bytes());
        assert!(estimate.scratch_bytes > 0);
    }
}
