//! SAH-based BVH builder and refit.
//!
//! One flat node array per structure: BLAS hierarchies are built over
//! triangles, TLAS hierarchies over world-space instance boxes. Splits are
//! picked with a 12-bin surface area heuristic.
//!
//! Children are always allocated after their parent, so walking the node
//! array in reverse visits every child before its parent. [`refit`] relies
//! on that to update bounds in one pass without touching topology.

use rt_shaders::BvhNode;

use super::bvh::{Aabb, Primitive};

/// Candidate planes per axis are the borders between these bins.
const NUM_BINS: usize = 12;

/// Relative cost of visiting a node and of testing one primitive.
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Ranges this small always become leaves.
const MAX_LEAF_SIZE: usize = 4;

/// Hierarchy over a BLAS's triangles or a TLAS's instance boxes.
#[derive(Debug, Clone)]
pub struct Bvh {
    /// Nodes in allocation order; the root is `nodes[0]`.
    pub nodes: Vec<BvhNode>,
    /// Primitive order after partitioning; leaf ranges index this.
    pub prim_indices: Vec<usize>,
}

impl Bvh {
    /// Root bounds (empty box for an empty hierarchy).
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map(Aabb::of_node).unwrap_or(Aabb::EMPTY)
    }

    /// Deepest root-to-leaf path, counted in nodes.
    pub fn depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack = vec![(0usize, 1usize)];
        while let Some((idx, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(idx) else {
                continue;
            };
            max_depth = max_depth.max(depth);
            if !node.is_leaf() && !self.is_empty_root(idx) {
                let left = node.left_or_first as usize;
                stack.push((left, depth + 1));
                stack.push((left + 1, depth + 1));
            }
        }
        max_depth
    }

    fn is_empty_root(&self, idx: usize) -> bool {
        idx == 0 && self.prim_indices.is_empty()
    }
}

/// Chosen split plane.
#[derive(Debug, Clone, Copy)]
struct Split {
    axis: usize,
    pos: f32,
    /// Unnormalized SAH cost (area-weighted, not divided by the parent area).
    cost: f32,
}

/// A node still waiting for its primitive range to be resolved.
struct Pending {
    node: usize,
    range: std::ops::Range<usize>,
}

/// Build a BVH over `prims` with binned SAH.
///
/// The same builder serves BLAS triangles and TLAS instance boxes. `prims`
/// is left untouched; leaves index into the returned `prim_indices`.
/// An empty input yields a single empty leaf that no ray can hit.
#[tracing::instrument(skip_all, fields(prim_count = prims.len()))]
pub fn build_bvh<P: Primitive>(prims: &[P]) -> Bvh {
    let n = prims.len();
    if n == 0 {
        return Bvh {
            nodes: vec![Aabb::EMPTY.node(0, 0)],
            prim_indices: vec![],
        };
    }

    let centroids: Vec<[f32; 3]> = prims.iter().map(|p| p.centroid()).collect();
    let aabbs: Vec<Aabb> = prims.iter().map(|p| p.bounds()).collect();
    let mut indices: Vec<usize> = (0..n).collect();

    // A binary tree over n leaves-worth of primitives has at most 2n - 1 nodes
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(Aabb::EMPTY.node(0, 0));

    // Instance lists and dense meshes can both be deep; no recursion
    let mut pending = vec![Pending { node: 0, range: 0..n }];

    while let Some(Pending { node, range }) = pending.pop() {
        let (start, end) = (range.start, range.end);
        let count = end - start;
        let members = &indices[range.clone()];

        let bounds = members.iter().fold(Aabb::EMPTY, |mut acc, &i| {
            acc.grow(&aabbs[i]);
            acc
        });

        if count <= MAX_LEAF_SIZE {
            nodes[node] = bounds.node(start as u32, count as u32);
            continue;
        }

        let centroid_bounds = members.iter().fold(Aabb::EMPTY, |mut acc, &i| {
            acc.grow_point(centroids[i]);
            acc
        });

        // Leaf when no plane separates the centroids or SAH prefers keeping
        // them together; leaves carry an explicit count so size is not capped
        let leaf_cost = count as f32 * INTERSECT_COST * bounds.area();
        let split = match find_best_split(members, &aabbs, &centroids, &centroid_bounds) {
            Some(split) if split.cost < leaf_cost => split,
            _ => {
                nodes[node] = bounds.node(start as u32, count as u32);
                continue;
            }
        };

        let left_len = split_in_place(&mut indices[range], |&i| centroids[i][split.axis] < split.pos);
        // All centroids on one side of the plane: halve the range instead
        let mid = match left_len {
            0 => start + count / 2,
            l if l == count => start + count / 2,
            l => start + l,
        };

        let left = nodes.len();
        nodes.push(Aabb::EMPTY.node(0, 0));
        nodes.push(Aabb::EMPTY.node(0, 0));
        nodes[node] = bounds.node(left as u32, 0);

        // Popped in reverse, so the left child is resolved first
        pending.push(Pending { node: left + 1, range: mid..end });
        pending.push(Pending { node: left, range: start..mid });
    }

    tracing::trace!(nodes = nodes.len(), "bvh built");
    Bvh {
        nodes,
        prim_indices: indices,
    }
}

/// Recompute node bounds for moved primitives, keeping the hierarchy.
///
/// `bounds[i]` is the new box of primitive `i` in the original (unordered)
/// numbering; `prim_indices` is the order produced by [`build_bvh`].
pub fn refit(nodes: &mut [BvhNode], prim_indices: &[usize], bounds: &[Aabb]) {
    if prim_indices.is_empty() {
        return;
    }
    for idx in (0..nodes.len()).rev() {
        let node = nodes[idx];
        let mut aabb = Aabb::EMPTY;
        if node.is_leaf() {
            let first = node.left_or_first as usize;
            for &prim in &prim_indices[first..first + node.count as usize] {
                aabb.grow(&bounds[prim]);
            }
        } else {
            let left = node.left_or_first as usize;
            aabb.grow(&Aabb::of_node(&nodes[left]));
            aabb.grow(&Aabb::of_node(&nodes[left + 1]));
        }
        nodes[idx].aabb_min = aabb.min;
        nodes[idx].aabb_max = aabb.max;
    }
}

/// Cheapest binned split over the three axes, `None` if every axis is flat.
fn find_best_split(
    indices: &[usize],
    aabbs: &[Aabb],
    centroids: &[[f32; 3]],
    centroid_bounds: &Aabb,
) -> Option<Split> {
    let mut best: Option<Split> = None;

    for axis in 0..3 {
        let lo = centroid_bounds.min[axis];
        let extent = centroid_bounds.max[axis] - lo;
        if extent < 1e-8 {
            continue;
        }

        let mut bin_bounds = [Aabb::EMPTY; NUM_BINS];
        let mut bin_counts = [0usize; NUM_BINS];
        let scale = NUM_BINS as f32 / extent;
        for &i in indices {
            let bin = (((centroids[i][axis] - lo) * scale) as usize).min(NUM_BINS - 1);
            bin_bounds[bin].grow(&aabbs[i]);
            bin_counts[bin] += 1;
        }

        // below[k]: area and count of bins 0..=k
        let mut below = [(0.0f32, 0usize); NUM_BINS - 1];
        let mut acc = Aabb::EMPTY;
        let mut acc_count = 0;
        for k in 0..NUM_BINS - 1 {
            acc.grow(&bin_bounds[k]);
            acc_count += bin_counts[k];
            below[k] = (if acc_count > 0 { acc.area() } else { 0.0 }, acc_count);
        }

        // Walk down from the top bin; plane k sits between bins k-1 and k
        let mut acc = Aabb::EMPTY;
        let mut acc_count = 0;
        for k in (1..NUM_BINS).rev() {
            acc.grow(&bin_bounds[k]);
            acc_count += bin_counts[k];
            let above_area = if acc_count > 0 { acc.area() } else { 0.0 };
            let (below_area, below_count) = below[k - 1];
            let cost = TRAVERSAL_COST
                + INTERSECT_COST * (below_count as f32 * below_area + acc_count as f32 * above_area);

            if best.map_or(true, |b| cost < b.cost) {
                best = Some(Split {
                    axis,
                    pos: lo + (k as f32 / NUM_BINS as f32) * extent,
                    cost,
                });
            }
        }
    }

    best
}

/// Move elements matching `goes_left` to the front; returns how many did.
fn split_in_place<T: Copy>(slice: &mut [T], goes_left: impl Fn(&T) -> bool) -> usize {
    let (left, right): (Vec<T>, Vec<T>) = slice.iter().copied().partition(|x| goes_left(x));
    let n = left.len();
    for (dst, src) in slice.iter_mut().zip(left.into_iter().chain(right)) {
        *dst = src;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::bvh::Triangle;

    fn make_tri(cx: f32, cy: f32, cz: f32) -> Triangle {
        Triangle {
            v0: [cx - 0.5, cy - 0.5, cz],
            v1: [cx + 0.5, cy - 0.5, cz],
            v2: [cx, cy + 0.5, cz],
            primitive_index: 0,
            geometry_index: 0,
        }
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = build_bvh::<Triangle>(&[]);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.prim_indices.len(), 0);
        assert!(bvh.bounds().is_empty());
    }

    #[test]
    fn test_single_triangle() {
        let tris = vec![make_tri(0.0, 0.0, 0.0)];
        let bvh = build_bvh(&tris);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 1);
        assert_eq!(bvh.prim_indices.len(), 1);
        assert_eq!(bvh.depth(), 1);
    }

    #[test]
    fn test_many_triangles_builds_tree() {
        // 100 triangles spread along X
        let tris: Vec<Triangle> = (0..100)
            .map(|i| make_tri(i as f32 * 2.0, 0.0, 0.0))
            .collect();
        let bvh = build_bvh(&tris);

        assert!(bvh.nodes.len() > 1, "BVH should have internal nodes");

        let mut sorted = bvh.prim_indices.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());

        let root = &bvh.nodes[0];
        assert!(root.aabb_min[0] < 0.0);
        assert!(root.aabb_max[0] > 198.0);
        assert!(bvh.depth() < 64);
    }

    #[test]
    fn test_leaf_count_correct() {
        let tris = vec![
            make_tri(0.0, 0.0, 0.0),
            make_tri(1.0, 0.0, 0.0),
            make_tri(2.0, 0.0, 0.0),
        ];
        let bvh = build_bvh(&tris);
        assert_eq!(bvh.nodes[0].count, 3);
    }

    #[test]
    fn test_children_follow_parents() {
        let tris: Vec<Triangle> = (0..64)
            .map(|i| make_tri((i % 8) as f32 * 3.0, (i / 8) as f32 * 3.0, 0.0))
            .collect();
        let bvh = build_bvh(&tris);
        for (idx, node) in bvh.nodes.iter().enumerate() {
            if !node.is_leaf() {
                assert!(node.left_or_first as usize > idx);
            }
        }
    }

    #[test]
    fn test_identical_centroids_make_leaf() {
        let tris: Vec<Triangle> = (0..10).map(|_| make_tri(1.0, 1.0, 1.0)).collect();
        let bvh = build_bvh(&tris);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 10);
    }

    #[test]
    fn test_split_in_place_keeps_members() {
        let mut ids = [5usize, 2, 8, 1, 9, 4];
        let left = split_in_place(&mut ids, |&i| i < 5);
        assert_eq!(left, 3);
        assert_eq!(ids, [2, 1, 4, 5, 8, 9]);
    }

    #[test]
    fn test_refit_tracks_moved_boxes() {
        let boxes: Vec<Aabb> = (0..20)
            .map(|i| Aabb {
                min: [i as f32 * 4.0, 0.0, 0.0],
                max: [i as f32 * 4.0 + 1.0, 1.0, 1.0],
            })
            .collect();
        let mut bvh = build_bvh(&boxes);
        let topology: Vec<(u32, u32)> = bvh.nodes.iter().map(|n| (n.left_or_first, n.count)).collect();

        let moved: Vec<Aabb> = boxes
            .iter()
            .map(|b| Aabb {
                min: [b.min[0], b.min[1] + 10.0, b.min[2]],
                max: [b.max[0], b.max[1] + 10.0, b.max[2]],
            })
            .collect();
        refit(&mut bvh.nodes, &bvh.prim_indices, &moved);

        let after: Vec<(u32, u32)> = bvh.nodes.iter().map(|n| (n.left_or_first, n.count)).collect();
        assert_eq!(topology, after);
        assert_eq!(bvh.nodes[0].aabb_min, [0.0, 10.0, 0.0]);
        assert_eq!(bvh.nodes[0].aabb_max, [77.0, 11.0, 1.0]);
    }
}
