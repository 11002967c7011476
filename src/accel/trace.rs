//! Host reference for ray generation, traversal and shading.
//!
//! Mirrors the WGSL kernel in `rt-shaders` operation for operation, so the
//! host variant and the compute variants agree on every pixel up to float
//! rounding on the device.

use std::sync::Arc;

use glam::{Vec3, Vec4};
use rayon::prelude::*;
use rt_shaders::{
    BvhNode, CameraUniforms, GpuTriangle, ShadingUniforms, RAY_MASK, SHADING_MODE_BARYCENTRIC,
    SHADING_MODE_INSTANCE_PALETTE, STACK_SIZE,
};
use serde::{Deserialize, Serialize};

use crate::util::unorm8;

use super::blas::BlasData;
use super::tlas::TopLevel;

/// Hit colouring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadingMode {
    /// `(1-u-v, u, v)` from the hit barycentrics.
    #[default]
    Barycentric,
    /// Four-colour palette keyed by instance id, with one diffuse light.
    InstancePalette,
}

impl ShadingMode {
    #[inline]
    pub fn raw(self) -> u32 {
        match self {
            Self::Barycentric => SHADING_MODE_BARYCENTRIC,
            Self::InstancePalette => SHADING_MODE_INSTANCE_PALETTE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Barycentric => "bary",
            Self::InstancePalette => "palette",
        }
    }

    /// Accepts the short CLI names and the config names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bary" | "barycentric" => Some(Self::Barycentric),
            "palette" | "instance_palette" => Some(Self::InstancePalette),
            _ => None,
        }
    }
}

/// Closest hit along one ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
    /// Object-space geometric normal (unnormalized).
    pub normal: Vec3,
    /// Index into the TLAS instance list.
    pub instance: usize,
}

/// Everything the host traversal reads: the top level plus the BLAS each
/// slot reference (a slot index) points at.
pub struct HostScene<'a> {
    pub top: &'a TopLevel,
    pub bottoms: &'a [Arc<BlasData>],
}

/// World-space ray through the centre of pixel `(x, y)`.
pub fn primary_ray(camera: &CameraUniforms, x: u32, y: u32, width: u32, height: u32) -> (Vec3, Vec3) {
    let inv_view = camera.inv_view();
    let inv_proj = camera.inv_proj();

    let u = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
    let v = (y as f32 + 0.5) / height as f32 * 2.0 - 1.0;

    let origin = (inv_view * Vec4::new(0.0, 0.0, 0.0, 1.0)).truncate();
    let target = inv_proj * Vec4::new(u, -v, 1.0, 1.0);
    let view_dir = (target.truncate() / target.w).normalize();
    let dir = (inv_view * view_dir.extend(0.0)).truncate().normalize();
    (origin, dir)
}

/// Sky gradient on `dir.y`.
#[inline]
pub fn miss_color(dir: Vec3, shading: &ShadingUniforms) -> Vec3 {
    let t = 0.5 * (dir.y + 1.0);
    let bottom = Vec4::from_array(shading.sky_bottom).truncate();
    let top = Vec4::from_array(shading.sky_top).truncate();
    bottom * (1.0 - t) + top * t
}

#[inline]
fn safe_inverse(d: Vec3) -> Vec3 {
    let f = |c: f32| if c >= 0.0 { 1.0 / c.abs().max(1e-20) } else { -1.0 / c.abs().max(1e-20) };
    Vec3::new(f(d.x), f(d.y), f(d.z))
}

#[inline]
fn hits_box(o: Vec3, inv_d: Vec3, node: &BvhNode, t_min: f32, t_max: f32) -> bool {
    let t0 = (Vec3::from_array(node.aabb_min) - o) * inv_d;
    let t1 = (Vec3::from_array(node.aabb_max) - o) * inv_d;
    let near = t0.min(t1).max_element();
    let far = t0.max(t1).min_element();
    near <= far && far >= t_min && near <= t_max
}

/// Double-sided ray/triangle test; `(t, u, v)` on hit.
#[inline]
fn hits_triangle(o: Vec3, d: Vec3, tri: &GpuTriangle, t_min: f32, t_max: f32) -> Option<(f32, f32, f32)> {
    let v0 = Vec3::from_array(tri.v0);
    let e1 = Vec3::from_array(tri.v1) - v0;
    let e2 = Vec3::from_array(tri.v2) - v0;
    let p = d.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = o - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = d.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    if t < t_min || t > t_max {
        return None;
    }
    Some((t, u, v))
}

fn trace_bottom(blas: &BlasData, o: Vec3, d: Vec3, t_min: f32, t_max: f32) -> Option<(f32, f32, f32, Vec3)> {
    let inv_d = safe_inverse(d);
    let mut best: Option<(f32, f32, f32, Vec3)> = None;
    let mut closest = t_max;

    let mut stack = [0u32; STACK_SIZE as usize];
    let mut sp = 1usize;
    while sp > 0 {
        sp -= 1;
        let Some(node) = blas.nodes.get(stack[sp] as usize) else {
            continue;
        };
        if !hits_box(o, inv_d, node, t_min, closest) {
            continue;
        }
        if node.is_leaf() {
            let first = node.left_or_first as usize;
            for tri in blas.triangles.iter().skip(first).take(node.count as usize) {
                if let Some((t, u, v)) = hits_triangle(o, d, tri, t_min, closest) {
                    closest = t;
                    let n = (Vec3::from_array(tri.v1) - Vec3::from_array(tri.v0))
                        .cross(Vec3::from_array(tri.v2) - Vec3::from_array(tri.v0));
                    best = Some((t, u, v, n));
                }
            }
        } else if sp + 2 <= STACK_SIZE as usize {
            stack[sp] = node.left_or_first;
            stack[sp + 1] = node.left_or_first + 1;
            sp += 2;
        }
    }
    best
}

/// Closest hit against the two-level hierarchy.
pub fn closest_hit(scene: &HostScene<'_>, origin: Vec3, dir: Vec3, t_min: f32, t_max: f32) -> Option<Hit> {
    let top = scene.top;
    let inv_dir = safe_inverse(dir);
    let mut best: Option<Hit> = None;
    let mut closest = t_max;

    let mut stack = [0u32; STACK_SIZE as usize];
    let mut sp = 1usize;
    while sp > 0 {
        sp -= 1;
        let Some(node) = top.nodes.get(stack[sp] as usize) else {
            continue;
        };
        if !hits_box(origin, inv_dir, node, t_min, closest) {
            continue;
        }
        if node.is_leaf() {
            let first = node.left_or_first as usize;
            for &index in top.order.iter().skip(first).take(node.count as usize) {
                let index = index as usize;
                let desc = &top.traversal[index];
                if desc.mask() & RAY_MASK == 0 {
                    continue;
                }
                let Some(blas) = scene.bottoms.get(desc.acceleration_structure_reference as usize) else {
                    continue;
                };
                let xf = &top.world_to_object[index];
                let o = xf.transform_point(origin);
                let d = xf.transform_vector(dir);
                if let Some((t, u, v, normal)) = trace_bottom(blas, o, d, t_min, closest) {
                    closest = t;
                    best = Some(Hit {
                        t,
                        u,
                        v,
                        normal,
                        instance: index,
                    });
                }
            }
        } else if sp + 2 <= STACK_SIZE as usize {
            stack[sp] = node.left_or_first;
            stack[sp + 1] = node.left_or_first + 1;
            sp += 2;
        }
    }
    best
}

/// Linear colour for one ray.
pub fn shade(scene: &HostScene<'_>, origin: Vec3, dir: Vec3, shading: &ShadingUniforms) -> Vec3 {
    let Some(hit) = closest_hit(scene, origin, dir, shading.t_min, shading.t_max) else {
        return miss_color(dir, shading);
    };

    if shading.mode == SHADING_MODE_INSTANCE_PALETTE {
        let id = scene.top.descriptors[hit.instance].custom_index();
        let base = Vec4::from_array(shading.palette[(id % 4) as usize]).truncate();
        let xf = &scene.top.world_to_object[hit.instance];
        let n = xf.transform_normal_transposed(hit.normal).normalize();
        let l = Vec4::from_array(shading.light_dir).truncate().normalize();
        return base * (0.25 + 0.75 * n.dot(l).abs());
    }
    Vec3::new(1.0 - hit.u - hit.v, hit.u, hit.v)
}

/// Render a `width x height` RGBA8 image, rows in parallel.
#[tracing::instrument(skip_all, fields(width = width, height = height))]
pub fn render(
    scene: &HostScene<'_>,
    camera: &CameraUniforms,
    shading: &ShadingUniforms,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let row_bytes = width as usize * 4;
    let mut pixels = vec![0u8; row_bytes * height as usize];
    if row_bytes == 0 {
        return pixels;
    }

    pixels
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let (origin, dir) = primary_ray(camera, x as u32, y as u32, width, height);
                let c = shade(scene, origin, dir, shading);
                px.copy_from_slice(&[unorm8(c.x), unorm8(c.y), unorm8(c.z), 255]);
            }
        });
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::bvh::Triangle;
    use crate::accel::tlas::Instance;
    use crate::handle::BlasHandle;

    fn shading(mode: ShadingMode) -> ShadingUniforms {
        ShadingUniforms {
            sky_bottom: [1.0, 1.0, 1.0, 0.0],
            sky_top: [0.5, 0.7, 1.0, 0.0],
            palette: [[1.0, 0.0, 0.0, 1.0], [0.0, 1.0, 0.0, 1.0], [0.0, 0.0, 1.0, 1.0], [1.0, 1.0, 0.0, 1.0]],
            light_dir: [0.0, 0.0, 1.0, 0.0],
            mode: mode.raw(),
            t_min: 0.001,
            t_max: 10000.0,
            _pad: 0,
        }
    }

    /// Big triangle in the z = 5 plane covering the view axis.
    fn wall() -> Arc<BlasData> {
        let tri = Triangle {
            v0: [-10.0, -10.0, 5.0],
            v1: [10.0, -10.0, 5.0],
            v2: [0.0, 10.0, 5.0],
            primitive_index: 0,
            geometry_index: 0,
        };
        Arc::new(BlasData::build(vec![1], vec![tri]).unwrap())
    }

    fn top_for(blas: &Arc<BlasData>, instances: &[Instance]) -> TopLevel {
        TopLevel::build(instances, |_, slot| Ok((slot as u64, blas.bounds))).unwrap()
    }

    #[test]
    fn test_primary_ray_identity_camera() {
        let (o, d) = primary_ray(&CameraUniforms::default(), 0, 0, 1, 1);
        assert_eq!(o, Vec3::ZERO);
        assert_eq!(d, Vec3::Z);
    }

    #[test]
    fn test_miss_color_horizon_is_midpoint() {
        let s = shading(ShadingMode::Barycentric);
        let c = miss_color(Vec3::X, &s);
        assert!((c - Vec3::new(0.75, 0.85, 1.0)).abs().max_element() < 1e-6);
        assert_eq!(miss_color(Vec3::NEG_Y, &s), Vec3::ONE);
    }

    #[test]
    fn test_closest_hit_and_barycentrics() {
        let blas = wall();
        let top = top_for(&blas, &[Instance::new(BlasHandle::from_id(1))]);
        let bottoms = [blas];
        let scene = HostScene { top: &top, bottoms: &bottoms };

        let hit = closest_hit(&scene, Vec3::ZERO, Vec3::Z, 0.001, 1000.0).unwrap();
        assert!((hit.t - 5.0).abs() < 1e-5);
        assert_eq!(hit.instance, 0);
        let c = shade(&scene, Vec3::ZERO, Vec3::Z, &shading(ShadingMode::Barycentric));
        assert!((c.x + c.y + c.z - 1.0).abs() < 1e-5);

        assert!(closest_hit(&scene, Vec3::ZERO, Vec3::NEG_Z, 0.001, 1000.0).is_none());
    }

    #[test]
    fn test_mask_zero_is_invisible() {
        let blas = wall();
        let top = top_for(&blas, &[Instance::new(BlasHandle::from_id(1)).with_mask(0)]);
        let bottoms = [blas];
        let scene = HostScene { top: &top, bottoms: &bottoms };
        assert!(closest_hit(&scene, Vec3::ZERO, Vec3::Z, 0.001, 1000.0).is_none());
    }

    #[test]
    fn test_zero_scale_instance_is_never_hit() {
        let blas = wall();
        let gone = Instance::new(BlasHandle::from_id(1))
            .with_transform(glam::Mat4::from_scale(Vec3::ZERO).to_cols_array());
        let top = top_for(&blas, &[gone]);
        let bottoms = [blas];
        let scene = HostScene { top: &top, bottoms: &bottoms };
        assert!(closest_hit(&scene, Vec3::ZERO, Vec3::Z, 0.001, 1000.0).is_none());
        assert!(closest_hit(&scene, Vec3::new(0.0, 0.0, -1.0), Vec3::Z, 0.001, 1000.0).is_none());
    }

    #[test]
    fn test_nearest_instance_wins() {
        let blas = wall();
        let near = Instance::new(BlasHandle::from_id(1)).with_id(1).with_transform(
            glam::Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0)).to_cols_array(),
        );
        let far = Instance::new(BlasHandle::from_id(1)).with_id(2);
        let top = top_for(&blas, &[far, near]);
        let bottoms = [blas];
        let scene = HostScene { top: &top, bottoms: &bottoms };
        let hit = closest_hit(&scene, Vec3::ZERO, Vec3::Z, 0.001, 1000.0).unwrap();
        assert_eq!(hit.instance, 1);
        assert!((hit.t - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_palette_uses_instance_id() {
        let blas = wall();
        let top = top_for(&blas, &[Instance::new(BlasHandle::from_id(1)).with_id(6)]);
        let bottoms = [blas];
        let scene = HostScene { top: &top, bottoms: &bottoms };
        // id 6 -> palette[2] (blue); normal parallel to light -> full intensity
        let c = shade(&scene, Vec3::ZERO, Vec3::Z, &shading(ShadingMode::InstancePalette));
        assert!((c - Vec3::new(0.0, 0.0, 1.0)).abs().max_element() < 1e-5);
    }

    #[test]
    fn test_render_dimensions() {
        let blas = wall();
        let top = top_for(&blas, &[Instance::new(BlasHandle::from_id(1))]);
        let bottoms = [blas];
        let scene = HostScene { top: &top, bottoms: &bottoms };
        let px = render(&scene, &CameraUniforms::default(), &shading(ShadingMode::Barycentric), 3, 2);
        assert_eq!(px.len(), 3 * 2 * 4);
        assert!(px.chunks_exact(4).all(|p| p[3] == 255));
    }

    #[test]
    fn test_shading_mode_parse() {
        assert_eq!(ShadingMode::parse("bary"), Some(ShadingMode::Barycentric));
        assert_eq!(ShadingMode::parse("Palette"), Some(ShadingMode::InstancePalette));
        assert_eq!(ShadingMode::parse("phong"), None);
    }
}
