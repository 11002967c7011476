//! Built-in test scenes and camera helpers.
//!
//! - `triangle`: one large triangle in the z = 0 plane, one identity instance
//! - `box`: a unit quad instanced four times as the back, floor, left and
//!   right walls of an open box, instance ids 0..=3 (one palette colour each)

use glam::{Mat4, Vec3};
use rt_shaders::CameraUniforms;

use crate::accel::{GeometryDesc, Instance};
use crate::handle::{BlasHandle, GeometryHandle, TlasHandle};
use crate::tracer::RayTracer;

/// Which built-in scene to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SceneKind {
    #[default]
    Triangle,
    Box,
}

impl SceneKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "triangle" | "tri" => Some(Self::Triangle),
            "box" => Some(Self::Box),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Triangle => "triangle",
            Self::Box => "box",
        }
    }
}

/// Non-indexed triangle large enough to fill the [`triangle_camera`] view.
pub fn triangle_geometry() -> GeometryDesc {
    GeometryDesc::from_positions(&[[-4.0, -4.0, 0.0], [4.0, -4.0, 0.0], [0.0, 4.0, 0.0]], None)
}

/// Camera on +Z looking at the origin, 60 degree vertical field of view.
pub fn triangle_camera(aspect: f32) -> CameraUniforms {
    CameraUniforms::look_at(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO, Vec3::Y, 60f32.to_radians(), aspect)
}

/// Indexed unit quad spanning [-1, 1] in the XY plane.
pub fn quad_geometry() -> GeometryDesc {
    GeometryDesc::from_positions(
        &[[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]],
        Some(&[0, 1, 2, 0, 2, 3]),
    )
}

/// The four walls; `phase` slides the back wall sideways (0 = at rest).
pub fn box_instances(quad: BlasHandle, phase: f32) -> [Instance; 4] {
    use std::f32::consts::FRAC_PI_2;

    let back = Mat4::from_translation(Vec3::new(0.25 * phase.sin(), 0.0, -1.0));
    let floor = Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0)) * Mat4::from_rotation_x(-FRAC_PI_2);
    let left = Mat4::from_translation(Vec3::new(-1.0, 0.0, 0.0)) * Mat4::from_rotation_y(FRAC_PI_2);
    let right = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)) * Mat4::from_rotation_y(-FRAC_PI_2);

    let walls = [back, floor, left, right];
    std::array::from_fn(|i| {
        Instance::new(quad)
            .with_transform(walls[i].to_cols_array())
            .with_id(i as u32)
    })
}

/// Camera in front of the open side of the box.
pub fn box_camera(aspect: f32) -> CameraUniforms {
    CameraUniforms::look_at(Vec3::new(0.0, 0.0, 3.5), Vec3::ZERO, Vec3::Y, 45f32.to_radians(), aspect)
}

/// A scene built through the public API.
#[derive(Debug)]
pub struct Scene {
    pub kind: SceneKind,
    pub geometry: GeometryHandle,
    pub blas: BlasHandle,
    pub tlas: TlasHandle,
    pub instances: Vec<Instance>,
}

impl Scene {
    /// Build `kind`; `None` (with everything released) if any step failed.
    pub fn build(rt: &mut RayTracer, kind: SceneKind) -> Option<Self> {
        let desc = match kind {
            SceneKind::Triangle => triangle_geometry(),
            SceneKind::Box => quad_geometry(),
        };
        let geometry = rt.create_geometry(&desc);
        if !geometry.is_valid() {
            return None;
        }
        let blas = rt.create_blas(&[geometry]);
        if !blas.is_valid() {
            rt.destroy_geometry(geometry);
            return None;
        }
        let instances = match kind {
            SceneKind::Triangle => vec![Instance::new(blas)],
            SceneKind::Box => box_instances(blas, 0.0).to_vec(),
        };
        let tlas = rt.create_tlas(&instances);
        if !tlas.is_valid() {
            rt.destroy_blas(blas);
            rt.destroy_geometry(geometry);
            return None;
        }
        Some(Self {
            kind,
            geometry,
            blas,
            tlas,
            instances,
        })
    }

    pub fn camera(&self, aspect: f32) -> CameraUniforms {
        match self.kind {
            SceneKind::Triangle => triangle_camera(aspect),
            SceneKind::Box => box_camera(aspect),
        }
    }

    /// Release in reverse creation order.
    pub fn destroy(self, rt: &mut RayTracer) {
        rt.destroy_tlas(self.tlas);
        rt.destroy_blas(self.blas);
        rt.destroy_geometry(self.geometry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_instance_ids() {
        let walls = box_instances(BlasHandle::from_id(1), 0.0);
        let ids: Vec<u32> = walls.iter().map(|i| i.instance_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        // back wall sits at z = -1
        assert_eq!(walls[0].transform[14], -1.0);
    }

    #[test]
    fn test_box_phase_moves_back_wall_only() {
        let rest = box_instances(BlasHandle::from_id(1), 0.0);
        let moved = box_instances(BlasHandle::from_id(1), 1.0);
        assert_ne!(rest[0].transform, moved[0].transform);
        assert_eq!(rest[1..], moved[1..]);
    }

    #[test]
    fn test_scene_kind_parse() {
        assert_eq!(SceneKind::parse("BOX"), Some(SceneKind::Box));
        assert_eq!(SceneKind::parse("tri"), Some(SceneKind::Triangle));
        assert_eq!(SceneKind::parse("sponza"), None);
    }

    #[test]
    fn test_geometry_validates() {
        assert_eq!(triangle_geometry().validate().unwrap().triangle_count(), 1);
        assert_eq!(quad_geometry().validate().unwrap().triangle_count(), 2);
    }
}
