//! Low-discrepancy hemisphere sampling for factor measurement
//!
//! Exit directions for form-factor shooting come from a golden-ratio
//! spiral remapped to a cosine-weighted hemisphere, so a batch of N
//! rays is stratified and fully deterministic for a given batch offset.
//! Ray origins jitter over the shooter's surface with a seeded RNG;
//! the same seed reproduces the same shooting sequence.

use glam::Vec3;
use rand::rngs::SmallRng;
use rand::Rng;

use crate::geometry::barycentric_point;

/// Inverse golden ratio, drives the spiral azimuth sequence
const INV_GOLDEN: f32 = 0.618_034;

/// Cosine-weighted hemisphere direction for sample `i` of `n`
///
/// `offset` rotates the whole sequence (Cranley-Patterson style) so
/// successive batches from one shooter do not repeat directions.
#[inline]
pub fn hemisphere_direction(i: u32, n: u32, offset: f32, normal: Vec3) -> Vec3 {
    let u = (i as f32 + 0.5) / n as f32;
    let phi = std::f32::consts::TAU * ((i as f32 * INV_GOLDEN + offset).fract());

    // Cosine-weighted: pdf = cos(theta)/pi, ideal for diffuse exitance
    let r = u.sqrt();
    let z = (1.0 - u).max(0.0).sqrt();
    let local = Vec3::new(r * phi.cos(), r * phi.sin(), z);

    let (tangent, bitangent) = orthonormal_basis(normal);
    tangent * local.x + bitangent * local.y + normal * local.z
}

/// Stable orthonormal basis around a unit normal
#[inline]
pub fn orthonormal_basis(normal: Vec3) -> (Vec3, Vec3) {
    let helper = if normal.x.abs() > 0.9 { Vec3::Y } else { Vec3::X };
    let tangent = helper.cross(normal).normalize_or_zero();
    let bitangent = normal.cross(tangent);
    (tangent, bitangent)
}

/// Uniform random point on a triangle via barycentric folding
#[inline]
pub fn surface_point(rng: &mut SmallRng, vertices: &[Vec3; 3]) -> Vec3 {
    let mut u: f32 = rng.gen();
    let mut v: f32 = rng.gen();
    if u + v > 1.0 {
        u = 1.0 - u;
        v = 1.0 - v;
    }
    barycentric_point(vertices, u, v)
}
