//! Host backend: handle lifecycle, refit and dispatch behaviour.

use rtcore::accel::encode_instance;
use rtcore::backend::cpu::CpuBackend;
use rtcore::config::RtConfig;
use rtcore::scenes::{box_instances, triangle_camera, triangle_geometry, Scene, SceneKind};
use rtcore::{
    BlasHandle, CameraUniforms, GeometryDesc, GeometryHandle, Image, Instance, RayTracer, ResourceCounts,
    ShadingMode, TlasHandle, TraceRaysOptions,
};

fn cpu() -> RayTracer {
    RayTracer::from_backend(Box::new(CpuBackend::new(RtConfig::default().shading_uniforms())))
}

fn translation(x: f32, y: f32, z: f32) -> [f32; 16] {
    [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        x, y, z, 1.0,
    ]
}

/// One triangle -> BLAS -> TLAS with the given instances.
fn triangle_scene(rt: &mut RayTracer) -> (GeometryHandle, BlasHandle) {
    let geo = rt.create_geometry(&triangle_geometry());
    assert!(geo.is_valid());
    let blas = rt.create_blas(&[geo]);
    assert!(blas.is_valid());
    (geo, blas)
}

fn render(rt: &mut RayTracer, tlas: TlasHandle, w: u32, h: u32) -> Image {
    rt.trace_rays(&TraceRaysOptions::new(tlas, w, h, triangle_camera(w as f32 / h as f32)))
        .expect("dispatch should succeed")
}

fn rgb_sum(p: [u8; 4]) -> i32 {
    p[0] as i32 + p[1] as i32 + p[2] as i32
}

#[test]
fn test_invalid_inputs_return_invalid_handles() {
    let mut rt = cpu();
    let (geo, blas) = triangle_scene(&mut rt);
    let before = rt.resource_counts();

    // Geometry
    assert!(!rt.create_geometry(&GeometryDesc::default()).is_valid());
    let out_of_range = GeometryDesc::from_positions(&[[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]], Some(&[0, 1, 7]));
    assert!(!rt.create_geometry(&out_of_range).is_valid());
    let mut short = triangle_geometry();
    short.vertex_count = 4;
    assert!(!rt.create_geometry(&short).is_valid());

    // BLAS
    assert!(!rt.create_blas(&[]).is_valid());
    assert!(!rt.create_blas(&[GeometryHandle::INVALID]).is_valid());
    assert!(!rt.create_blas(&[geo, GeometryHandle::INVALID]).is_valid());

    // TLAS
    assert!(!rt.create_tlas(&[]).is_valid());
    assert!(!rt.create_tlas(&[Instance::new(BlasHandle::INVALID)]).is_valid());
    assert!(!rt.create_tlas(&[Instance::new(blas), Instance::new(BlasHandle::INVALID)]).is_valid());

    assert_eq!(rt.resource_counts(), before);
}

#[test]
fn test_zero_scale_instance_is_hidden() {
    let mut rt = cpu();
    let (_, blas) = triangle_scene(&mut rt);
    let zero = glam::Mat4::from_scale(glam::Vec3::ZERO).to_cols_array();

    let both = rt.create_tlas(&[Instance::new(blas), Instance::new(blas).with_transform(zero)]);
    assert!(both.is_valid());
    let alone = rt.create_tlas(&[Instance::new(blas)]);
    assert_eq!(render(&mut rt, both, 4, 4), render(&mut rt, alone, 4, 4));

    // Hiding the only instance leaves nothing but sky
    let hidden = rt.create_tlas(&[Instance::new(blas).with_transform(zero)]);
    assert!(hidden.is_valid());
    let image = render(&mut rt, hidden, 2, 2);
    for y in 0..2 {
        for x in 0..2 {
            assert!(rgb_sum(image.pixel(x, y).unwrap()) > 400);
        }
    }

    // And a refit brings it back
    assert!(rt.update_tlas(hidden, &[Instance::new(blas)]));
    assert_eq!(render(&mut rt, hidden, 4, 4), render(&mut rt, alone, 4, 4));
}

#[test]
fn test_destroy_is_idempotent() {
    let mut rt = cpu();
    let (geo, blas) = triangle_scene(&mut rt);
    let tlas = rt.create_tlas(&[Instance::new(blas)]);
    assert!(tlas.is_valid());

    for _ in 0..2 {
        rt.destroy_tlas(tlas);
        rt.destroy_blas(blas);
        rt.destroy_geometry(geo);
    }
    rt.destroy_tlas(TlasHandle::INVALID);
    rt.destroy_blas(BlasHandle::INVALID);
    rt.destroy_geometry(GeometryHandle::INVALID);

    assert_eq!(rt.resource_counts(), ResourceCounts::default());
}

#[test]
fn test_ids_are_never_reused() {
    let mut rt = cpu();
    let first = rt.create_geometry(&triangle_geometry());
    rt.destroy_geometry(first);
    let second = rt.create_geometry(&triangle_geometry());
    assert!(second.id() > first.id());
    assert_ne!(first, second);
}

#[test]
fn test_blas_survives_geometry_destroy() {
    // BLAS data is self-contained once built
    let mut rt = cpu();
    let (geo, blas) = triangle_scene(&mut rt);
    rt.destroy_geometry(geo);
    let tlas = rt.create_tlas(&[Instance::new(blas)]);
    assert!(tlas.is_valid());
    let image = render(&mut rt, tlas, 2, 2);
    assert!((rgb_sum(image.pixel(0, 0).unwrap()) - 255).abs() <= 2);
}

#[test]
fn test_instance_encoding_transform() {
    let identity = encode_instance(&Instance::new(BlasHandle::INVALID), 0);
    assert_eq!(
        identity.transform,
        [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]]
    );

    let moved = Instance::new(BlasHandle::INVALID).with_transform(translation(3.0, -2.0, 5.5));
    let desc = encode_instance(&moved, 0);
    let last: Vec<f32> = desc.transform.iter().map(|row| row[3]).collect();
    assert_eq!(last, vec![3.0, -2.0, 5.5]);
}

#[test]
fn test_instance_encoding_fields() {
    let inst = Instance::new(BlasHandle::INVALID).with_id(0x1234_5678).with_mask(0x0F);
    let desc = encode_instance(&inst, 42);
    assert_eq!(desc.custom_index(), 0x34_5678);
    assert_eq!(desc.mask(), 0x0F);
    assert_eq!(desc.sbt_offset(), 0);
    assert_eq!(desc.flags(), rt_shaders::INSTANCE_FLAG_TRIANGLE_CULL_DISABLE);
    assert_eq!(desc.acceleration_structure_reference, 42);
}

#[test]
fn test_update_count_mismatch_leaves_tlas_unchanged() {
    let mut rt = cpu();
    let (_, blas) = triangle_scene(&mut rt);
    let tlas = rt.create_tlas(&[Instance::new(blas)]);
    let before = render(&mut rt, tlas, 8, 8);

    assert!(!rt.update_tlas(tlas, &[Instance::new(blas), Instance::new(blas)]));
    assert!(!rt.update_tlas(tlas, &[]));
    assert_eq!(render(&mut rt, tlas, 8, 8), before);
}

#[test]
fn test_update_with_foreign_blas_rejected() {
    let mut rt = cpu();
    let (geo, blas) = triangle_scene(&mut rt);
    let other = rt.create_blas(&[geo]);
    let tlas = rt.create_tlas(&[Instance::new(blas)]);
    let before = render(&mut rt, tlas, 4, 4);

    assert!(!rt.update_tlas(tlas, &[Instance::new(other)]));
    assert_eq!(render(&mut rt, tlas, 4, 4), before);
}

#[test]
fn test_update_moves_instance() {
    let mut rt = cpu();
    let (_, blas) = triangle_scene(&mut rt);
    let tlas = rt.create_tlas(&[Instance::new(blas)]);
    let hit = render(&mut rt, tlas, 2, 2);

    // Far off to the side: every ray misses
    assert!(rt.update_tlas(tlas, &[Instance::new(blas).with_transform(translation(100.0, 0.0, 0.0))]));
    let moved = render(&mut rt, tlas, 2, 2);
    assert_ne!(moved, hit);
    for y in 0..2 {
        for x in 0..2 {
            assert!(rgb_sum(moved.pixel(x, y).unwrap()) > 400);
        }
    }

    // And back
    assert!(rt.update_tlas(tlas, &[Instance::new(blas)]));
    assert_eq!(render(&mut rt, tlas, 2, 2), hit);
}

#[test]
fn test_miss_color_at_horizon() {
    let mut rt = cpu();
    let (_, blas) = triangle_scene(&mut rt);
    let tlas = rt.create_tlas(&[Instance::new(blas).with_transform(translation(100.0, 0.0, 0.0))]);

    // Identity camera: the single pixel's ray is (0, 0, 1)
    let image = rt
        .trace_rays(&TraceRaysOptions::new(tlas, 1, 1, CameraUniforms::default()))
        .unwrap();
    // 0.5 * (1, 1, 1) + 0.5 * (0.5, 0.7, 1.0)
    assert_eq!(image.pixel(0, 0), Some([191, 217, 255, 255]));
}

#[test]
fn test_single_triangle_scenario() {
    let mut rt = cpu();
    let (_, blas) = triangle_scene(&mut rt);
    let tlas = rt.create_tlas(&[Instance::new(blas)]);
    let image = render(&mut rt, tlas, 2, 2);

    assert_eq!(image.width, 2);
    assert_eq!(image.height, 2);
    assert_eq!(image.pixels.len(), 16);
    for y in 0..2 {
        for x in 0..2 {
            // Barycentrics sum to one
            let p = image.pixel(x, y).unwrap();
            assert!((rgb_sum(p) - 255).abs() <= 2, "pixel ({}, {}) = {:?}", x, y, p);
            assert_eq!(p[3], 255);
        }
    }
}

#[test]
fn test_zero_mask_is_invisible() {
    let mut rt = cpu();
    let (_, blas) = triangle_scene(&mut rt);
    let tlas = rt.create_tlas(&[Instance::new(blas).with_mask(0)]);
    let image = render(&mut rt, tlas, 2, 2);
    for y in 0..2 {
        for x in 0..2 {
            assert!(rgb_sum(image.pixel(x, y).unwrap()) > 400);
        }
    }
}

#[test]
fn test_palette_mode_is_flat_per_instance() {
    let mut rt = cpu();
    let (_, blas) = triangle_scene(&mut rt);
    // palette[2] is blue
    let tlas = rt.create_tlas(&[Instance::new(blas).with_id(6)]);
    let camera = triangle_camera(1.0);
    let image = rt
        .trace_rays(&TraceRaysOptions::new(tlas, 2, 2, camera).with_shading(ShadingMode::InstancePalette))
        .unwrap();

    let first = image.pixel(0, 0).unwrap();
    assert!(first[2] > first[1] && first[1] > first[0]);
    for y in 0..2 {
        for x in 0..2 {
            assert_eq!(image.pixel(x, y), Some(first));
        }
    }
}

#[test]
fn test_dangling_blas() {
    let mut rt = cpu();
    let (_, blas) = triangle_scene(&mut rt);
    let tlas = rt.create_tlas(&[Instance::new(blas)]);
    rt.destroy_blas(blas);

    let options = TraceRaysOptions::new(tlas, 2, 2, triangle_camera(1.0));
    assert!(rt.trace_rays(&options).is_none());
    assert!(!rt.create_tlas(&[Instance::new(blas)]).is_valid());
}

#[test]
fn test_trace_rejects_bad_arguments() {
    let mut rt = cpu();
    let (_, blas) = triangle_scene(&mut rt);
    let tlas = rt.create_tlas(&[Instance::new(blas)]);
    let camera = triangle_camera(1.0);

    assert!(rt.trace_rays(&TraceRaysOptions::new(tlas, 0, 4, camera)).is_none());
    assert!(rt.trace_rays(&TraceRaysOptions::new(tlas, 4, 0, camera)).is_none());
    assert!(rt.trace_rays(&TraceRaysOptions::new(TlasHandle::INVALID, 4, 4, camera)).is_none());

    rt.destroy_tlas(tlas);
    assert!(rt.trace_rays(&TraceRaysOptions::new(tlas, 4, 4, camera)).is_none());
}

#[test]
fn test_box_scene_shows_every_wall() {
    let mut rt = cpu();
    let scene = Scene::build(&mut rt, SceneKind::Box).expect("box scene");
    assert_eq!(scene.instances.len(), 4);

    let (w, h) = (32, 32);
    let image = rt
        .trace_rays(&TraceRaysOptions::new(scene.tlas, w, h, scene.camera(1.0)).with_shading(ShadingMode::InstancePalette))
        .unwrap();
    // Centre pixel lands on the back wall (palette[0], red dominant)
    let centre = image.pixel(w / 2, h / 2).unwrap();
    assert!(centre[0] > centre[1] && centre[0] > centre[2]);

    // Refit keeps working across frames
    for frame in 1..4 {
        assert!(rt.update_tlas(scene.tlas, &box_instances(scene.blas, frame as f32)));
    }
    scene.destroy(&mut rt);
    assert_eq!(rt.resource_counts(), ResourceCounts::default());
}

#[test]
fn test_save_png() {
    let mut rt = cpu();
    let (_, blas) = triangle_scene(&mut rt);
    let tlas = rt.create_tlas(&[Instance::new(blas)]);
    let image = render(&mut rt, tlas, 4, 3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.png");
    image.save_png(&path).unwrap();
    let loaded = image::open(&path).unwrap().to_rgba8();
    assert_eq!(loaded.dimensions(), (4, 3));
    assert_eq!(loaded.into_raw(), image.pixels);
}
