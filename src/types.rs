//! Core value types shared across the solver
//!
//! Linear-space RGB energy is carried in `glam::Vec3` throughout the
//! crate; there is no gamma anywhere inside the transport math.

use glam::Vec3;

/// Index of a triangle inside the attached static scene
pub type TriangleIndex = u32;

/// A ray with normalized direction
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// Ray origin
    pub origin: Vec3,
    /// Ray direction (must be normalized)
    pub direction: Vec3,
}

impl Ray {
    /// Create a ray, normalizing the direction
    #[inline]
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Ray {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Point at parameter t along the ray
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Result of a ray-vs-mesh intersection query
#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    /// Distance from ray origin to the hit point
    pub distance: f32,
    /// Index of the hit triangle
    pub triangle: TriangleIndex,
    /// Barycentric coordinates of the hit (u toward v1, v toward v2)
    pub barycentric: (f32, f32),
    /// World-space hit point
    pub point: Vec3,
    /// True when the ray arrived at the front side of the triangle
    pub front_side: bool,
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Create an empty (inverted) AABB
    #[inline]
    pub fn empty() -> Self {
        Aabb {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    /// Create AABB from min/max
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Aabb { min, max }
    }

    /// Expand AABB to include a point
    #[inline]
    pub fn expand_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Expand AABB to include another AABB
    #[inline]
    pub fn expand_aabb(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Get center of AABB
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get longest axis (0=X, 1=Y, 2=Z)
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let d = self.max - self.min;
        if d.x > d.y && d.x > d.z {
            0
        } else if d.y > d.z {
            1
        } else {
            2
        }
    }

    /// Slab test against a ray; returns entry distance if the ray
    /// intersects within `[0, max_distance]`
    #[inline]
    pub fn intersect_ray(&self, ray: &Ray, max_distance: f32) -> Option<f32> {
        let inv = ray.direction.recip();
        let t0 = (self.min - ray.origin) * inv;
        let t1 = (self.max - ray.origin) * inv;
        let t_min = t0.min(t1);
        let t_max = t0.max(t1);
        let near = t_min.x.max(t_min.y).max(t_min.z).max(0.0);
        let far = t_max.x.min(t_max.y).min(t_max.z).min(max_distance);
        if near <= far {
            Some(near)
        } else {
            None
        }
    }
}

/// Sum of RGB channels, used as the scalar "amount of energy" metric
/// for shooter selection and convergence tracking
#[inline]
pub fn energy_sum(e: Vec3) -> f32 {
    e.x + e.y + e.z
}

/// Mirror reflection of `incoming` about `normal`
#[inline]
pub fn reflect(incoming: Vec3, normal: Vec3) -> Vec3 {
    incoming - 2.0 * incoming.dot(normal) * normal
}

/// Refraction of `incoming` through a surface with relative index
/// `eta`, `None` on total internal reflection
#[inline]
pub fn refract(incoming: Vec3, normal: Vec3, front_side: bool, eta: f32) -> Option<Vec3> {
    let n = if front_side { normal } else { -normal };
    let cos_i = (-incoming).dot(n);
    let sin2_t = eta * eta * (1.0 - cos_i * cos_i);
    if sin2_t > 1.0 {
        return None;
    }
    let cos_t = (1.0 - sin2_t).sqrt();
    Some((incoming * eta + n * (eta * cos_i - cos_t)).normalize_or_zero())
}
