//! Shared scene builders for integration tests

use ember_gi::prelude::*;

/// Closed unit box with inward-facing walls, an emissive ceiling and
/// diffuse everything else. 12 triangles; ceiling triangles are 2 and 3.
pub fn closed_box(emittance: f32, reflectance: f32) -> TriangleMesh {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    let mut slots = Vec::new();

    let mut quad = |a: Vec3, b: Vec3, c: Vec3, d: Vec3, slot: u32| {
        let base = vertices.len() as u32;
        vertices.extend([a, b, c, d]);
        indices.push([base, base + 1, base + 2]);
        indices.push([base, base + 2, base + 3]);
        slots.extend([slot, slot]);
    };

    let v = |x: f32, y: f32, z: f32| Vec3::new(x, y, z);
    // floor (normal +Y)
    quad(v(0., 0., 0.), v(0., 0., 1.), v(1., 0., 1.), v(1., 0., 0.), 1);
    // ceiling (normal -Y), the emitter
    quad(v(0., 1., 0.), v(1., 1., 0.), v(1., 1., 1.), v(0., 1., 1.), 0);
    // wall x=0 (normal +X)
    quad(v(0., 0., 0.), v(0., 1., 0.), v(0., 1., 1.), v(0., 0., 1.), 1);
    // wall x=1 (normal -X)
    quad(v(1., 0., 0.), v(1., 0., 1.), v(1., 1., 1.), v(1., 1., 0.), 1);
    // wall z=0 (normal +Z)
    quad(v(0., 0., 0.), v(1., 0., 0.), v(1., 1., 0.), v(0., 1., 0.), 1);
    // wall z=1 (normal -Z)
    quad(v(0., 0., 1.), v(0., 1., 1.), v(1., 1., 1.), v(1., 0., 1.), 1);

    TriangleMesh::new(
        vertices,
        indices,
        vec![
            Material::emissive(Vec3::splat(emittance)),
            Material::diffuse(Vec3::splat(reflectance)),
        ],
        slots,
    )
    .expect("box construction is valid")
}

/// Indices of the emissive ceiling triangles in [`closed_box`]
#[allow(dead_code)]
pub const CEILING: [u32; 2] = [2, 3];

/// Route solver log output through the test harness
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Run a progressive solve from zero direct lighting for up to
/// `steps` improve steps
pub fn solve_box(mesh: &TriangleMesh, seed: u64, steps: u32) -> ProgressiveScene {
    init_logs();
    let collider = Collider::build(mesh);
    let mut scene = ProgressiveScene::with_seed(mesh, seed);
    let direct = vec![Vec3::ZERO; mesh.triangle_count()];
    scene
        .reset(true, true, &DirectIrradiance::FloatRgb(&direct))
        .expect("reset with matching lengths");
    let mut done = 0;
    scene.improve(&collider, || {
        done += 1;
        done >= steps
    });
    scene
}
