//! Top-level build product: instance encoding, top-level BVH, refit.
//!
//! Every distinct BLAS an instance list references is assigned a slot with a
//! 64-bit structure reference. What the reference means is up to the backend
//! (a pool offset pair on the GPU, a slot index on the host); this module
//! only packs it into the instance descriptors.
//!
//! Transforms are taken as given. An instance whose transform has no
//! inverse (zero scale is the usual way to hide one) keeps its native
//! descriptor but is masked out of `traversal`, so no ray ever reaches it.

use std::collections::HashMap;
use std::mem::size_of;

use bytemuck::Zeroable;
use rt_shaders::{AffineRows, BvhNode, InstanceDescriptor, INSTANCE_FLAG_TRIANGLE_CULL_DISABLE};

use crate::handle::BlasHandle;
use crate::util::{column_major_to_rows, invert_affine, Error, Result};

use super::blas::BuildSizes;
use super::build::{build_bvh, refit};
use super::bvh::Aabb;

/// Largest application instance id (24 bits).
pub const MAX_INSTANCE_ID: u32 = 0x00FF_FFFF;

/// One placement of a BLAS in a TLAS input list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    pub blas: BlasHandle,
    /// Column-major 4x4; the bottom row is assumed `[0,0,0,1]`.
    pub transform: [f32; 16],
    /// Visibility mask; the instance is skipped when `mask & 0xFF == 0`.
    pub mask: u8,
    /// Application id reported on hit. Only the low 24 bits are kept.
    pub instance_id: u32,
}

impl Instance {
    /// Identity placement, full mask, id 0.
    pub fn new(blas: BlasHandle) -> Self {
        Self {
            blas,
            transform: glam::Mat4::IDENTITY.to_cols_array(),
            mask: 0xFF,
            instance_id: 0,
        }
    }

    pub fn with_transform(mut self, transform: [f32; 16]) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_id(mut self, instance_id: u32) -> Self {
        self.instance_id = instance_id;
        self
    }

    /// Row-major 3x4 block of the transform.
    #[inline]
    pub fn rows(&self) -> AffineRows {
        AffineRows {
            rows: column_major_to_rows(&self.transform),
        }
    }
}

/// Encode one instance into the native descriptor layout.
pub fn encode_instance(instance: &Instance, reference: u64) -> InstanceDescriptor {
    InstanceDescriptor::new(
        column_major_to_rows(&instance.transform),
        instance.instance_id & MAX_INSTANCE_ID,
        instance.mask,
        0,
        INSTANCE_FLAG_TRIANGLE_CULL_DISABLE,
        reference,
    )
}

/// A distinct BLAS referenced by a TLAS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlasSlot {
    pub blas_id: u32,
    pub reference: u64,
    /// Object-space bounds of the BLAS.
    pub bounds: Aabb,
}

/// Host copy of a built top-level structure.
#[derive(Debug, Clone)]
pub struct TopLevel {
    /// Top-level nodes over world-space instance bounds.
    pub nodes: Vec<BvhNode>,
    /// Instance indices in leaf order.
    pub order: Vec<u32>,
    /// One native descriptor per instance, in input order.
    pub descriptors: Vec<InstanceDescriptor>,
    /// Descriptors as traversal reads them: non-invertible instances have mask 0.
    pub traversal: Vec<InstanceDescriptor>,
    /// Inverse instance transforms, in input order (zero when there is none).
    pub world_to_object: Vec<AffineRows>,
    slots: Vec<BlasSlot>,
    slot_of: HashMap<u32, usize>,
    instance_slots: Vec<usize>,
}

/// Encoded per-instance data, computed before anything is committed.
struct Encoded {
    descriptors: Vec<InstanceDescriptor>,
    traversal: Vec<InstanceDescriptor>,
    world_to_object: Vec<AffineRows>,
    world_bounds: Vec<Aabb>,
    instance_slots: Vec<usize>,
}

impl TopLevel {
    /// Build from `instances`, asking `resolve` for the reference and bounds
    /// of each distinct BLAS (called once per BLAS with its new slot index).
    #[tracing::instrument(skip_all, fields(instances = instances.len()))]
    pub fn build<F>(instances: &[Instance], mut resolve: F) -> Result<Self>
    where
        F: FnMut(BlasHandle, usize) -> Result<(u64, Aabb)>,
    {
        if instances.is_empty() {
            return Err(Error::invalid("TLAS needs at least one instance"));
        }
        u32::try_from(instances.len()).map_err(|_| Error::invalid("too many instances"))?;

        let mut slots = Vec::new();
        let mut slot_of = HashMap::new();
        for inst in instances {
            if !inst.blas.is_valid() {
                return Err(Error::InvalidHandle { kind: "BLAS", id: 0 });
            }
            if slot_of.contains_key(&inst.blas.id()) {
                continue;
            }
            let slot = slots.len();
            let (reference, bounds) = resolve(inst.blas, slot)?;
            slot_of.insert(inst.blas.id(), slot);
            slots.push(BlasSlot {
                blas_id: inst.blas.id(),
                reference,
                bounds,
            });
        }

        let encoded = encode_all(instances, &slots, &slot_of)?;
        let bvh = build_bvh(&encoded.world_bounds);

        Ok(Self {
            nodes: bvh.nodes,
            order: bvh.prim_indices.iter().map(|&i| i as u32).collect(),
            descriptors: encoded.descriptors,
            traversal: encoded.traversal,
            world_to_object: encoded.world_to_object,
            slots,
            slot_of,
            instance_slots: encoded.instance_slots,
        })
    }

    /// Re-encode transforms/masks/ids and refit bounds in place.
    ///
    /// Fails without modifying anything when the count differs or an
    /// instance names a BLAS this TLAS was not built over.
    pub fn refit(&mut self, tlas_id: u32, instances: &[Instance]) -> Result<()> {
        *self = self.refitted(tlas_id, instances)?;
        Ok(())
    }

    /// Refitted copy, leaving `self` as it was. Backends that mirror the
    /// structure on a device commit the copy only once the device accepted it.
    pub fn refitted(&self, tlas_id: u32, instances: &[Instance]) -> Result<Self> {
        if instances.len() != self.descriptors.len() {
            return Err(Error::InstanceCountMismatch {
                expected: self.descriptors.len() as u32,
                actual: instances.len() as u32,
            });
        }
        if let Some(inst) = instances.iter().find(|i| !self.slot_of.contains_key(&i.blas.id())) {
            return Err(Error::TopologyChanged {
                tlas: tlas_id,
                blas: inst.blas.id(),
            });
        }

        let encoded = encode_all(instances, &self.slots, &self.slot_of)?;
        let order: Vec<usize> = self.order.iter().map(|&i| i as usize).collect();
        let mut nodes = self.nodes.clone();
        refit(&mut nodes, &order, &encoded.world_bounds);

        Ok(Self {
            nodes,
            order: self.order.clone(),
            descriptors: encoded.descriptors,
            traversal: encoded.traversal,
            world_to_object: encoded.world_to_object,
            slots: self.slots.clone(),
            slot_of: self.slot_of.clone(),
            instance_slots: encoded.instance_slots,
        })
    }

    /// Number of instances masked out for lack of an inverse transform.
    pub fn hidden_count(&self) -> usize {
        self.descriptors
            .iter()
            .zip(&self.traversal)
            .filter(|(native, walked)| native.mask() != 0 && walked.mask() == 0)
            .count()
    }

    #[inline]
    pub fn instance_count(&self) -> u32 {
        self.descriptors.len() as u32
    }

    /// Distinct BLAS slots in first-reference order.
    #[inline]
    pub fn slots(&self) -> &[BlasSlot] {
        &self.slots
    }

    /// Slot referenced by instance `index`.
    #[inline]
    pub fn slot_of_instance(&self, index: usize) -> Option<&BlasSlot> {
        self.instance_slots.get(index).and_then(|&s| self.slots.get(s))
    }

    /// World-space bounds of the whole structure.
    #[inline]
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map(Aabb::of_node).unwrap_or(Aabb::EMPTY)
    }

    /// Result (nodes + order) and instance-buffer sizes.
    pub fn sizes(&self) -> BuildSizes {
        BuildSizes {
            result_bytes: (self.nodes.len() * size_of::<BvhNode>() + self.order.len() * 4) as u64,
            scratch_bytes: (self.descriptors.len() * size_of::<InstanceDescriptor>()) as u64,
        }
    }
}

fn encode_all(instances: &[Instance], slots: &[BlasSlot], slot_of: &HashMap<u32, usize>) -> Result<Encoded> {
    let mut out = Encoded {
        descriptors: Vec::with_capacity(instances.len()),
        traversal: Vec::with_capacity(instances.len()),
        world_to_object: Vec::with_capacity(instances.len()),
        world_bounds: Vec::with_capacity(instances.len()),
        instance_slots: Vec::with_capacity(instances.len()),
    };

    for inst in instances {
        let slot_index = *slot_of
            .get(&inst.blas.id())
            .ok_or(Error::InvalidHandle { kind: "BLAS", id: inst.blas.id() })?;
        let slot = &slots[slot_index];

        let rows = inst.rows();
        let desc = encode_instance(inst, slot.reference);
        let (inverse, walked) = match invert_affine(&rows) {
            Some(inverse) => (inverse, desc),
            None => (AffineRows::zeroed(), masked_out(desc)),
        };

        out.descriptors.push(desc);
        out.traversal.push(walked);
        out.world_to_object.push(inverse);
        out.world_bounds.push(slot.bounds.transformed(&rows));
        out.instance_slots.push(slot_index);
    }
    Ok(out)
}

/// Same descriptor with the visibility mask cleared.
#[inline]
fn masked_out(desc: InstanceDescriptor) -> InstanceDescriptor {
    InstanceDescriptor {
        instance_custom_index_and_mask: desc.instance_custom_index_and_mask & MAX_INSTANCE_ID,
        ..desc
    }
}
