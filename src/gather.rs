//! Final gather: per-ray radiance queries over solver output
//!
//! The gatherer answers "what radiance arrives here from that
//! direction" by tracing specular chains exactly and reading the
//! diffuse component from a solver (progressive or packed) instead of
//! integrating it by brute force. Without a solver attached it falls
//! back to one Russian-roulette secondary ray per diffuse bounce.
//!
//! The context is shared and immutable, so renders parallelize by
//! handing each worker its own RNG.

use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::collider::Collider;
use crate::geometry::{SceneGeometry, TrianglePlane};
use crate::packed::runtime::PackedSolver;
use crate::radiosity::sampler::orthonormal_basis;
use crate::radiosity::scene::ProgressiveScene;
use crate::types::{reflect, refract, Ray, TriangleIndex};

use std::f32::consts::PI;

/// Occluders crossed by one shadow ray before giving up
const MAX_SHADOW_SURFACES: u32 = 16;

/// A light source for direct-lighting shadow rays
#[derive(Debug, Clone, Copy)]
pub enum Light {
    /// Parallel light, infinitely far away
    Directional {
        /// Normalized, pointing toward the light
        direction: Vec3,
        /// Irradiance on a surface facing the light (W/m^2, HDR)
        color: Vec3,
    },
    /// Omnidirectional light with inverse-square falloff
    Point {
        /// World-space position
        position: Vec3,
        /// Intensity (W/sr per channel, HDR)
        color: Vec3,
        /// Attenuation radius, no contribution beyond it
        radius: f32,
    },
}

impl Light {
    /// Direction toward the light, distance, and unshadowed irradiance
    /// at `point`
    fn sample(&self, point: Vec3) -> (Vec3, f32, Vec3) {
        match *self {
            Light::Directional { direction, color } => (direction, f32::INFINITY, color),
            Light::Point {
                position,
                color,
                radius,
            } => {
                let delta = position - point;
                let distance = delta.length();
                if distance >= radius || distance <= 1e-6 {
                    return (Vec3::Z, distance, Vec3::ZERO);
                }
                (delta / distance, distance, color / (distance * distance))
            }
        }
    }
}

/// Radiance arriving from outside the scene
pub trait Environment: Sync {
    /// Incoming radiance from `direction` (pointing away from the scene)
    fn radiance(&self, direction: Vec3) -> Vec3;
}

/// Uniform environment color
pub struct ConstantEnvironment(pub Vec3);

impl Environment for ConstantEnvironment {
    #[inline]
    fn radiance(&self, _direction: Vec3) -> Vec3 {
        self.0
    }
}

/// Two-color hemisphere blend, brighter toward +Y
pub struct SkyEnvironment {
    /// Radiance looking down
    pub ground: Vec3,
    /// Radiance looking up
    pub sky: Vec3,
}

impl Default for SkyEnvironment {
    fn default() -> Self {
        SkyEnvironment {
            ground: Vec3::new(0.1, 0.08, 0.05),
            sky: Vec3::new(0.4, 0.6, 1.0),
        }
    }
}

impl Environment for SkyEnvironment {
    #[inline]
    fn radiance(&self, direction: Vec3) -> Vec3 {
        let t = direction.y * 0.5 + 0.5;
        self.ground + (self.sky - self.ground) * t
    }
}

/// Gather quality knobs
#[derive(Debug, Clone, Copy)]
pub struct GatherQuality {
    /// Hard bound on recursion depth
    pub max_depth: u32,
    /// From this depth on the diffuse component is read straight from
    /// the solver's exitance instead of tracing lights again
    pub solver_read_depth: u32,
    /// Paths whose cumulative weight falls below this terminate
    pub min_visibility: f32,
    /// Scales environment radiance on misses
    pub environment_multiplier: f32,
}

impl Default for GatherQuality {
    fn default() -> Self {
        GatherQuality {
            max_depth: 25,
            solver_read_depth: 1,
            min_visibility: 1e-3,
            environment_multiplier: 1.0,
        }
    }
}

/// Where the gatherer reads precomputed diffuse lighting from
pub enum SolverRead<'a> {
    /// Live progressive solver
    Progressive(&'a ProgressiveScene),
    /// Packed replay runtime
    Packed(&'a PackedSolver),
    /// No solver, diffuse bounces are path traced
    None,
}

impl SolverRead<'_> {
    /// Radiant exitance of a triangle, if a solver is attached
    fn exitance(&self, t: TriangleIndex) -> Option<Vec3> {
        match self {
            SolverRead::Progressive(scene) => Some(scene.triangle(t).exitance()),
            SolverRead::Packed(solver) => Some(solver.triangle_exitance(t)),
            SolverRead::None => None,
        }
    }

    /// Indirect irradiance of a triangle, if a solver is attached
    fn indirect_irradiance(&self, t: TriangleIndex) -> Option<Vec3> {
        match self {
            SolverRead::Progressive(scene) => Some(scene.triangle(t).indirect_irradiance()),
            SolverRead::Packed(solver) => Some(solver.triangle_indirect_irradiance(t)),
            SolverRead::None => None,
        }
    }
}

/// Shared, immutable gather context
pub struct Gatherer<'a> {
    geometry: &'a dyn SceneGeometry,
    collider: &'a Collider,
    lights: &'a [Light],
    environment: &'a dyn Environment,
    solver: SolverRead<'a>,
    quality: GatherQuality,
}

impl<'a> Gatherer<'a> {
    /// Assemble a gather context over a static scene
    pub fn new(
        geometry: &'a dyn SceneGeometry,
        collider: &'a Collider,
        lights: &'a [Light],
        environment: &'a dyn Environment,
        solver: SolverRead<'a>,
        quality: GatherQuality,
    ) -> Self {
        Gatherer {
            geometry,
            collider,
            lights,
            environment,
            solver,
            quality,
        }
    }

    /// Radiance arriving at `origin` from `direction`
    ///
    /// `skip` excludes the surface the query starts on, `visibility`
    /// is the path weight accumulated so far (1.0 at the camera).
    pub fn incident_radiance(
        &self,
        origin: Vec3,
        direction: Vec3,
        skip: Option<TriangleIndex>,
        visibility: f32,
        depth: u32,
        rng: &mut SmallRng,
    ) -> Vec3 {
        if visibility < self.quality.min_visibility || depth > self.quality.max_depth {
            return Vec3::ZERO;
        }
        let ray = Ray::new(origin, direction);
        let hit = match self.collider.intersect(&ray, f32::INFINITY, skip) {
            Some(h) => h,
            None => return self.environment.radiance(direction) * self.quality.environment_multiplier,
        };
        let Some(material) = self.geometry.material(hit.triangle as usize) else {
            return Vec3::ZERO;
        };
        let vertices = self.geometry.triangle_vertices(hit.triangle as usize);
        let normal = TrianglePlane::from_vertices(&vertices).normal;
        let facing = if hit.front_side { normal } else { -normal };

        let mut radiance = Vec3::ZERO;

        // Diffuse and emissive component. Lambertian surfaces radiate
        // M = pi * L, so exitance converts to radiance by 1/pi.
        let use_solver = depth >= self.quality.solver_read_depth;
        let solver_exitance = if use_solver && hit.front_side {
            self.solver.exitance(hit.triangle)
        } else {
            None
        };
        match solver_exitance {
            Some(exitance) => {
                // Exitance already includes emission and all bounces
                radiance += exitance / PI;
            }
            None => {
                if hit.front_side || material.emits_from_back {
                    radiance += material.diffuse_emittance / PI;
                }
                if material.diffuse_magnitude() > 0.0 {
                    let direct =
                        self.direct_irradiance_at(hit.point, facing, hit.triangle);
                    let indirect = match self.solver.indirect_irradiance(hit.triangle) {
                        Some(e) if hit.front_side => e,
                        _ => self.bounced_irradiance(
                            hit.point,
                            facing,
                            hit.triangle,
                            visibility,
                            depth,
                            rng,
                        ),
                    };
                    radiance += material.diffuse_reflectance / PI * (direct + indirect);
                }
            }
        }

        // Specular chains are traced exactly
        let specular = material.specular_magnitude();
        if specular > 0.0 {
            let mirror = reflect(ray.direction, normal);
            radiance += material.specular_reflectance
                * self.incident_radiance(
                    hit.point,
                    mirror,
                    Some(hit.triangle),
                    visibility * specular,
                    depth + 1,
                    rng,
                );
        }
        let transmitted = material.transmittance_magnitude();
        if transmitted > 0.0 {
            let eta = if hit.front_side {
                1.0 / material.refraction_index
            } else {
                material.refraction_index
            };
            let bent = refract(ray.direction, normal, hit.front_side, eta)
                .unwrap_or_else(|| reflect(ray.direction, normal));
            radiance += material.specular_transmittance
                * self.incident_radiance(
                    hit.point,
                    bent,
                    Some(hit.triangle),
                    visibility * transmitted,
                    depth + 1,
                    rng,
                );
        }

        radiance
    }

    /// Direct irradiance from the light list, shadow ray per light
    fn direct_irradiance_at(&self, point: Vec3, facing: Vec3, skip: TriangleIndex) -> Vec3 {
        let mut total = Vec3::ZERO;
        for light in self.lights {
            let (to_light, distance, irradiance) = light.sample(point);
            let cos = facing.dot(to_light);
            if cos <= 0.0 || irradiance == Vec3::ZERO {
                continue;
            }
            let shadow = self.shadow_transmittance(point, to_light, distance, skip);
            if shadow == Vec3::ZERO {
                continue;
            }
            total += irradiance * shadow * cos;
        }
        total
    }

    /// Per-channel visibility toward a light, walking through partial
    /// occluders and multiplying their transmittance; opaque surfaces
    /// end the walk at zero
    fn shadow_transmittance(
        &self,
        mut point: Vec3,
        to_light: Vec3,
        mut distance: f32,
        mut skip: TriangleIndex,
    ) -> Vec3 {
        let mut transmittance = Vec3::ONE;
        for _ in 0..MAX_SHADOW_SURFACES {
            let ray = Ray::new(point, to_light);
            let hit = match self.collider.intersect(&ray, distance, Some(skip)) {
                Some(h) => h,
                None => return transmittance,
            };
            let blocker = match self.geometry.material(hit.triangle as usize) {
                Some(m) => m.specular_transmittance,
                None => Vec3::ONE, // inert faces do not block
            };
            transmittance *= blocker;
            if transmittance == Vec3::ZERO {
                return Vec3::ZERO;
            }
            point = hit.point;
            distance -= hit.distance;
            skip = hit.triangle;
            if distance <= 0.0 {
                return transmittance;
            }
        }
        Vec3::ZERO
    }

    /// Solver-less fallback: estimate indirect irradiance with one
    /// Russian-roulette cosine-weighted secondary ray
    fn bounced_irradiance(
        &self,
        point: Vec3,
        facing: Vec3,
        skip: TriangleIndex,
        visibility: f32,
        depth: u32,
        rng: &mut SmallRng,
    ) -> Vec3 {
        let survive = 0.5f32;
        if rng.gen::<f32>() >= survive {
            return Vec3::ZERO;
        }
        let direction = cosine_direction(rng, facing);
        let radiance = self.incident_radiance(
            point,
            direction,
            Some(skip),
            visibility * survive,
            depth + 1,
            rng,
        );
        // Cosine-weighted pdf makes the irradiance estimate pi * L,
        // divided by the survival probability
        radiance * PI / survive
    }
}

/// Random cosine-weighted direction around `normal`
#[inline]
fn cosine_direction(rng: &mut SmallRng, normal: Vec3) -> Vec3 {
    let u: f32 = rng.gen();
    let phi = std::f32::consts::TAU * rng.gen::<f32>();
    let r = u.sqrt();
    let z = (1.0 - u).max(0.0).sqrt();
    let (tangent, bitangent) = orthonormal_basis(normal);
    tangent * (r * phi.cos()) + bitangent * (r * phi.sin()) + normal * z
}

/// Trace one radiance value per pixel, rows in parallel
///
/// `camera` maps normalized film coordinates in [0,1) to a primary
/// ray. Each row gets its own RNG derived from `seed`, so results are
/// deterministic per seed regardless of worker scheduling.
pub fn render_rows(
    gatherer: &Gatherer<'_>,
    width: usize,
    height: usize,
    seed: u64,
    camera: impl Fn(f32, f32) -> Ray + Sync,
    pixels: &mut [Vec3],
) {
    assert_eq!(pixels.len(), width * height, "pixel buffer size mismatch");
    pixels
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let mut rng =
                SmallRng::seed_from_u64(seed ^ (y as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
            for (x, pixel) in row.iter_mut().enumerate() {
                let u = (x as f32 + 0.5) / width as f32;
                let v = (y as f32 + 0.5) / height as f32;
                let ray = camera(u, v);
                *pixel =
                    gatherer.incident_radiance(ray.origin, ray.direction, None, 1.0, 0, &mut rng);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TriangleMesh;
    use crate::material::Material;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(3)
    }

    fn floor_quad(material: Material) -> TriangleMesh {
        TriangleMesh::new(
            vec![
                Vec3::new(-1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(-1.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 3, 2]],
            vec![material],
            vec![0, 0],
        )
        .unwrap()
    }

    #[test]
    fn test_miss_returns_environment() {
        let mesh = floor_quad(Material::default());
        let collider = Collider::build(&mesh);
        let env = ConstantEnvironment(Vec3::splat(2.0));
        let gatherer = Gatherer::new(
            &mesh,
            &collider,
            &[],
            &env,
            SolverRead::None,
            GatherQuality::default(),
        );
        let out = gatherer.incident_radiance(
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::Y,
            None,
            1.0,
            0,
            &mut rng(),
        );
        assert_eq!(out, Vec3::splat(2.0));
    }

    #[test]
    fn test_environment_multiplier() {
        let mesh = floor_quad(Material::default());
        let collider = Collider::build(&mesh);
        let env = ConstantEnvironment(Vec3::splat(2.0));
        let quality = GatherQuality {
            environment_multiplier: 0.5,
            ..GatherQuality::default()
        };
        let gatherer = Gatherer::new(&mesh, &collider, &[], &env, SolverRead::None, quality);
        let out =
            gatherer.incident_radiance(Vec3::new(0.0, 1.0, 0.0), Vec3::Y, None, 1.0, 0, &mut rng());
        assert_eq!(out, Vec3::splat(1.0));
    }

    #[test]
    fn test_emissive_surface_visible() {
        let mesh = floor_quad(Material::emissive(Vec3::splat(PI)));
        let collider = Collider::build(&mesh);
        let env = ConstantEnvironment(Vec3::ZERO);
        let gatherer = Gatherer::new(
            &mesh,
            &collider,
            &[],
            &env,
            SolverRead::None,
            GatherQuality::default(),
        );
        let out = gatherer.incident_radiance(
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::NEG_Y,
            None,
            1.0,
            0,
            &mut rng(),
        );
        // Exitance pi -> radiance 1
        assert!((out - Vec3::ONE).length() < 1e-5);
    }

    #[test]
    fn test_back_side_of_emitter_is_dark() {
        let mesh = floor_quad(Material::emissive(Vec3::splat(PI)));
        let collider = Collider::build(&mesh);
        let env = ConstantEnvironment(Vec3::ZERO);
        let gatherer = Gatherer::new(
            &mesh,
            &collider,
            &[],
            &env,
            SolverRead::None,
            GatherQuality::default(),
        );
        let out = gatherer.incident_radiance(
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::Y,
            None,
            1.0,
            0,
            &mut rng(),
        );
        assert_eq!(out, Vec3::ZERO);
    }

    #[test]
    fn test_directional_light_shadowed() {
        // Floor plus an opaque blocker above it
        let mesh = TriangleMesh::new(
            vec![
                Vec3::new(-1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(-1.0, 0.0, 1.0),
                Vec3::new(-1.0, 0.5, -1.0),
                Vec3::new(1.0, 0.5, -1.0),
                Vec3::new(1.0, 0.5, 1.0),
                Vec3::new(-1.0, 0.5, 1.0),
            ],
            vec![[0, 2, 1], [0, 3, 2], [4, 6, 5], [4, 7, 6]],
            vec![Material::diffuse(Vec3::splat(0.8))],
            vec![0, 0, 0, 0],
        )
        .unwrap();
        let collider = Collider::build(&mesh);
        let env = ConstantEnvironment(Vec3::ZERO);
        let lights = [Light::Directional {
            direction: Vec3::Y,
            color: Vec3::splat(5.0),
        }];
        let gatherer = Gatherer::new(
            &mesh,
            &collider,
            &lights,
            &env,
            SolverRead::None,
            GatherQuality {
                max_depth: 0, // direct lighting only
                ..GatherQuality::default()
            },
        );
        let direct = gatherer.direct_irradiance_at(Vec3::new(0.0, 0.0, 0.0), Vec3::Y, 0);
        assert_eq!(direct, Vec3::ZERO, "blocker should shadow the floor");
    }

    #[test]
    fn test_glass_transmits_partial_shadow() {
        let mesh = TriangleMesh::new(
            vec![
                Vec3::new(-1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(-1.0, 0.0, 1.0),
                Vec3::new(-1.0, 0.5, -1.0),
                Vec3::new(1.0, 0.5, -1.0),
                Vec3::new(1.0, 0.5, 1.0),
                Vec3::new(-1.0, 0.5, 1.0),
            ],
            vec![[0, 2, 1], [0, 3, 2], [4, 6, 5], [4, 7, 6]],
            vec![Material::diffuse(Vec3::splat(0.8)), Material::glass(1.5)],
            vec![0, 0, 1, 1],
        )
        .unwrap();
        let collider = Collider::build(&mesh);
        let env = ConstantEnvironment(Vec3::ZERO);
        let lights = [Light::Directional {
            direction: Vec3::Y,
            color: Vec3::splat(5.0),
        }];
        let gatherer = Gatherer::new(
            &mesh,
            &collider,
            &lights,
            &env,
            SolverRead::None,
            GatherQuality::default(),
        );
        let direct = gatherer.direct_irradiance_at(Vec3::new(0.0, 0.0, 0.0), Vec3::Y, 0);
        // Glass (transmittance 0.9) dims but does not kill the light
        assert!(direct.x > 0.0);
        assert!(direct.x < 5.0);
        assert!((direct.x - 5.0 * 0.9).abs() < 1e-4);
    }

    #[test]
    fn test_mirror_box_terminates() {
        // Two facing mirrors bounce forever without the depth guard
        let mesh = TriangleMesh::new(
            vec![
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(-1.0, 1.0, 0.0),
                Vec3::new(-1.0, -1.0, 1.0),
                Vec3::new(1.0, -1.0, 1.0),
                Vec3::new(1.0, 1.0, 1.0),
                Vec3::new(-1.0, 1.0, 1.0),
            ],
            vec![[0, 1, 2], [0, 2, 3], [4, 6, 5], [4, 7, 6]],
            vec![Material::mirror()],
            vec![0, 0, 0, 0],
        )
        .unwrap();
        let collider = Collider::build(&mesh);
        let env = ConstantEnvironment(Vec3::splat(1.0));
        let gatherer = Gatherer::new(
            &mesh,
            &collider,
            &[],
            &env,
            SolverRead::None,
            GatherQuality::default(),
        );
        let out = gatherer.incident_radiance(
            Vec3::new(0.0, 0.0, 0.5),
            Vec3::Z,
            None,
            1.0,
            0,
            &mut rng(),
        );
        assert!(out.is_finite(), "mirror chain must terminate");
    }

    #[test]
    fn test_render_rows_deterministic() {
        let mesh = floor_quad(Material::default());
        let collider = Collider::build(&mesh);
        let env = SkyEnvironment::default();
        let gatherer = Gatherer::new(
            &mesh,
            &collider,
            &[],
            &env,
            SolverRead::None,
            GatherQuality::default(),
        );
        let camera = |u: f32, v: f32| {
            Ray::new(
                Vec3::new(0.0, 0.5, -2.0),
                Vec3::new(u - 0.5, v - 0.5, 1.0),
            )
        };

        let mut a = vec![Vec3::ZERO; 8 * 8];
        let mut b = vec![Vec3::ZERO; 8 * 8];
        render_rows(&gatherer, 8, 8, 99, camera, &mut a);
        render_rows(&gatherer, 8, 8, 99, camera, &mut b);
        assert_eq!(a, b);
    }
}
