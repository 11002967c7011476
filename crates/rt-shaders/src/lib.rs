//! Primary-ray kernel for rtcore's compute backends.
//!
//! The kernel walks a two-level hierarchy: a top-level BVH over instance
//! bounds, then a bottom-level BVH per instance in object space. Host code
//! builds both hierarchies; see [`params`] for the buffer layouts.
//!
//! ## Bindings (group 0)
//! ```text
//! 0  top-level nodes        storage  BvhNode[]
//! 1  top-level leaf order   storage  u32[]      (instance indices)
//! 2  instance descriptors   storage  InstanceDescriptor[]
//! 3  world-to-object        storage  AffineRows[]
//! 4  bottom-level nodes     storage  BvhNode[]  (pool, offset via reference lo)
//! 5  bottom-level triangles storage  GpuTriangle[] (pool, offset via reference hi)
//! 6  camera                 uniform  CameraUniforms
//! 7  shading                uniform  ShadingUniforms
//! 8  output                 storage texture rgba8unorm, write
//! ```

mod params;

pub use params::{
    AffineRows, BvhNode, CameraUniforms, GpuTriangle, InstanceDescriptor, ShadingUniforms,
    INSTANCE_FLAG_TRIANGLE_CULL_DISABLE, SHADING_MODE_BARYCENTRIC, SHADING_MODE_INSTANCE_PALETTE,
};

/// Workgroup edge (must match `@workgroup_size` in the kernel).
pub const WORKGROUP_SIZE: u32 = 8;

/// Traversal stack depth per level.
pub const STACK_SIZE: u32 = 64;

/// Ray mask applied against each instance mask.
pub const RAY_MASK: u8 = 0xFF;

/// Entry point name of the trace kernel.
pub const TRACE_ENTRY_POINT: &str = "trace_primary";

/// Trace kernel source.
pub const TRACE_KERNEL_WGSL: &str = r#"
// Primary rays against a two-level BVH.

struct BvhNode {
    aabb_min: vec3<f32>,
    left_or_first: u32,
    aabb_max: vec3<f32>,
    count: u32,
}

struct Tri {
    v0: vec3<f32>,
    primitive_index: u32,
    v1: vec3<f32>,
    geometry_index: u32,
    v2: vec3<f32>,
    pad: u32,
}

struct InstanceDesc {
    row0: vec4<f32>,
    row1: vec4<f32>,
    row2: vec4<f32>,
    custom_index_and_mask: u32,
    sbt_offset_and_flags: u32,
    reference_lo: u32,
    reference_hi: u32,
}

struct Affine {
    row0: vec4<f32>,
    row1: vec4<f32>,
    row2: vec4<f32>,
}

struct Camera {
    inv_view: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
}

struct Shading {
    sky_bottom: vec4<f32>,
    sky_top: vec4<f32>,
    palette: array<vec4<f32>, 4>,
    light_dir: vec4<f32>,
    mode: u32,
    t_min: f32,
    t_max: f32,
    pad: u32,
}

struct Hit {
    t: f32,
    u: f32,
    v: f32,
    found: bool,
    normal: vec3<f32>,
}

@group(0) @binding(0) var<storage, read> top_nodes: array<BvhNode>;
@group(0) @binding(1) var<storage, read> top_order: array<u32>;
@group(0) @binding(2) var<storage, read> instance_descs: array<InstanceDesc>;
@group(0) @binding(3) var<storage, read> world_to_object: array<Affine>;
@group(0) @binding(4) var<storage, read> blas_nodes: array<BvhNode>;
@group(0) @binding(5) var<storage, read> blas_tris: array<Tri>;
@group(0) @binding(6) var<uniform> camera: Camera;
@group(0) @binding(7) var<uniform> shading: Shading;
@group(0) @binding(8) var output_image: texture_storage_2d<rgba8unorm, write>;

const STACK_SIZE: u32 = 64u;
const RAY_MASK: u32 = 0xFFu;
const MODE_INSTANCE_PALETTE: u32 = 1u;

fn safe_inverse(d: vec3<f32>) -> vec3<f32> {
    let s = select(vec3<f32>(-1.0), vec3<f32>(1.0), d >= vec3<f32>(0.0));
    return s / max(abs(d), vec3<f32>(1e-20));
}

fn hits_box(o: vec3<f32>, inv_d: vec3<f32>, bmin: vec3<f32>, bmax: vec3<f32>, t_min: f32, t_max: f32) -> bool {
    let t0 = (bmin - o) * inv_d;
    let t1 = (bmax - o) * inv_d;
    let near = max(max(min(t0.x, t1.x), min(t0.y, t1.y)), min(t0.z, t1.z));
    let far = min(min(max(t0.x, t1.x), max(t0.y, t1.y)), max(t0.z, t1.z));
    return near <= far && far >= t_min && near <= t_max;
}

// Returns (t, u, v); t < 0 means no hit. Double-sided.
fn hits_triangle(o: vec3<f32>, d: vec3<f32>, tri: Tri, t_min: f32, t_max: f32) -> vec3<f32> {
    let no_hit = vec3<f32>(-1.0, 0.0, 0.0);
    let e1 = tri.v1 - tri.v0;
    let e2 = tri.v2 - tri.v0;
    let p = cross(d, e2);
    let det = dot(e1, p);
    if (abs(det) < 1e-12) {
        return no_hit;
    }
    let inv_det = 1.0 / det;
    let s = o - tri.v0;
    let u = dot(s, p) * inv_det;
    if (u < 0.0 || u > 1.0) {
        return no_hit;
    }
    let q = cross(s, e1);
    let v = dot(d, q) * inv_det;
    if (v < 0.0 || u + v > 1.0) {
        return no_hit;
    }
    let t = dot(e2, q) * inv_det;
    if (t < t_min || t > t_max) {
        return no_hit;
    }
    return vec3<f32>(t, u, v);
}

fn affine_point(a: Affine, p: vec3<f32>) -> vec3<f32> {
    let h = vec4<f32>(p, 1.0);
    return vec3<f32>(dot(a.row0, h), dot(a.row1, h), dot(a.row2, h));
}

fn affine_vector(a: Affine, v: vec3<f32>) -> vec3<f32> {
    let h = vec4<f32>(v, 0.0);
    return vec3<f32>(dot(a.row0, h), dot(a.row1, h), dot(a.row2, h));
}

fn trace_bottom(o: vec3<f32>, d: vec3<f32>, node_base: u32, tri_base: u32, t_max: f32) -> Hit {
    var hit: Hit;
    hit.t = t_max;
    hit.found = false;
    let inv_d = safe_inverse(d);

    var stack: array<u32, 64>;
    stack[0] = 0u;
    var sp = 1u;
    while (sp > 0u) {
        sp -= 1u;
        let node = blas_nodes[node_base + stack[sp]];
        if (!hits_box(o, inv_d, node.aabb_min, node.aabb_max, shading.t_min, hit.t)) {
            continue;
        }
        if (node.count > 0u) {
            for (var i = 0u; i < node.count; i++) {
                let tri = blas_tris[tri_base + node.left_or_first + i];
                let r = hits_triangle(o, d, tri, shading.t_min, hit.t);
                if (r.x >= 0.0) {
                    hit.t = r.x;
                    hit.u = r.y;
                    hit.v = r.z;
                    hit.found = true;
                    hit.normal = cross(tri.v1 - tri.v0, tri.v2 - tri.v0);
                }
            }
        } else if (sp + 2u <= STACK_SIZE) {
            stack[sp] = node.left_or_first;
            stack[sp + 1u] = node.left_or_first + 1u;
            sp += 2u;
        }
    }
    return hit;
}

fn miss_color(dir: vec3<f32>) -> vec3<f32> {
    let t = 0.5 * (dir.y + 1.0);
    return mix(shading.sky_bottom.xyz, shading.sky_top.xyz, t);
}

fn trace(origin: vec3<f32>, dir: vec3<f32>) -> vec3<f32> {
    var best_t = shading.t_max;
    var best_u = 0.0;
    var best_v = 0.0;
    var best_normal = vec3<f32>(0.0);
    var best_instance = 0u;
    var found = false;

    let inv_dir = safe_inverse(dir);
    var stack: array<u32, 64>;
    stack[0] = 0u;
    var sp = 1u;
    while (sp > 0u) {
        sp -= 1u;
        let node = top_nodes[stack[sp]];
        if (!hits_box(origin, inv_dir, node.aabb_min, node.aabb_max, shading.t_min, best_t)) {
            continue;
        }
        if (node.count > 0u) {
            for (var i = 0u; i < node.count; i++) {
                let index = top_order[node.left_or_first + i];
                let desc = instance_descs[index];
                if (((desc.custom_index_and_mask >> 24u) & RAY_MASK) == 0u) {
                    continue;
                }
                let xf = world_to_object[index];
                let hit = trace_bottom(
                    affine_point(xf, origin),
                    affine_vector(xf, dir),
                    desc.reference_lo,
                    desc.reference_hi,
                    best_t
                );
                if (hit.found) {
                    best_t = hit.t;
                    best_u = hit.u;
                    best_v = hit.v;
                    best_normal = hit.normal;
                    best_instance = index;
                    found = true;
                }
            }
        } else if (sp + 2u <= STACK_SIZE) {
            stack[sp] = node.left_or_first;
            stack[sp + 1u] = node.left_or_first + 1u;
            sp += 2u;
        }
    }

    if (!found) {
        return miss_color(dir);
    }
    if (shading.mode == MODE_INSTANCE_PALETTE) {
        let id = instance_descs[best_instance].custom_index_and_mask & 0xFFFFFFu;
        let base = shading.palette[id % 4u].xyz;
        let xf = world_to_object[best_instance];
        let n = normalize(best_normal.x * xf.row0.xyz + best_normal.y * xf.row1.xyz + best_normal.z * xf.row2.xyz);
        let l = normalize(shading.light_dir.xyz);
        return base * (0.25 + 0.75 * abs(dot(n, l)));
    }
    return vec3<f32>(1.0 - best_u - best_v, best_u, best_v);
}

@compute @workgroup_size(8, 8, 1)
fn trace_primary(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = textureDimensions(output_image);
    if (gid.x >= dims.x || gid.y >= dims.y) {
        return;
    }
    let pixel_center = vec2<f32>(gid.xy) + vec2<f32>(0.5);
    let uv = pixel_center / vec2<f32>(dims) * 2.0 - 1.0;

    let origin = (camera.inv_view * vec4<f32>(0.0, 0.0, 0.0, 1.0)).xyz;
    let clip_target = camera.inv_proj * vec4<f32>(uv.x, -uv.y, 1.0, 1.0);
    let view_dir = normalize(clip_target.xyz / clip_target.w);
    let dir = normalize((camera.inv_view * vec4<f32>(view_dir, 0.0)).xyz);

    let color = trace(origin, dir);
    textureStore(output_image, vec2<i32>(gid.xy), vec4<f32>(clamp(color, vec3<f32>(0.0), vec3<f32>(1.0)), 1.0));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_mentions_entry_point() {
        assert!(TRACE_KERNEL_WGSL.contains(&format!("fn {}(", TRACE_ENTRY_POINT)));
        assert!(TRACE_KERNEL_WGSL.contains(&format!("@workgroup_size({}, {}, 1)", WORKGROUP_SIZE, WORKGROUP_SIZE)));
        assert!(TRACE_KERNEL_WGSL.contains(&format!("STACK_SIZE: u32 = {}u", STACK_SIZE)));
    }

    #[test]
    fn test_kernel_binding_count() {
        let bindings = TRACE_KERNEL_WGSL.matches("@binding(").count();
        assert_eq!(bindings, 9);
    }
}
