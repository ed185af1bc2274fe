//! Surface material model for light transport
//!
//! A deliberately small, physically linear material: diffuse
//! reflectance and emittance drive the radiosity solver, the specular
//! terms drive mirror/refraction chains in factor measurement and in
//! the gatherer. All colors are linear-space RGB.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::types::energy_sum;

/// Per-triangle material used by the transport core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    /// Fraction of incident energy reflected diffusely (per channel, [0,1))
    pub diffuse_reflectance: Vec3,
    /// Radiant exitance emitted from the front side (W/m^2, linear)
    pub diffuse_emittance: Vec3,
    /// Fraction of incident energy reflected as a mirror (per channel)
    pub specular_reflectance: Vec3,
    /// Fraction of incident energy transmitted through the surface (per channel)
    pub specular_transmittance: Vec3,
    /// Index of refraction for the transmitted component (glass = 1.5)
    pub refraction_index: f32,
    /// Whether the back side also emits
    pub emits_from_back: bool,
}

impl Default for Material {
    fn default() -> Self {
        Material::diffuse(Vec3::splat(0.5))
    }
}

impl Material {
    /// Plain diffuse surface with the given reflectance
    pub fn diffuse(reflectance: Vec3) -> Self {
        Material {
            diffuse_reflectance: reflectance,
            diffuse_emittance: Vec3::ZERO,
            specular_reflectance: Vec3::ZERO,
            specular_transmittance: Vec3::ZERO,
            refraction_index: 1.0,
            emits_from_back: false,
        }
    }

    /// Diffuse emitter (area light)
    pub fn emissive(exitance: Vec3) -> Self {
        Material {
            diffuse_reflectance: Vec3::ZERO,
            diffuse_emittance: exitance,
            specular_reflectance: Vec3::ZERO,
            specular_transmittance: Vec3::ZERO,
            refraction_index: 1.0,
            emits_from_back: false,
        }
    }

    /// Near-perfect mirror
    pub fn mirror() -> Self {
        Material {
            diffuse_reflectance: Vec3::ZERO,
            diffuse_emittance: Vec3::ZERO,
            specular_reflectance: Vec3::splat(0.95),
            specular_transmittance: Vec3::ZERO,
            refraction_index: 1.0,
            emits_from_back: false,
        }
    }

    /// Clear glass with the given index of refraction
    pub fn glass(refraction_index: f32) -> Self {
        Material {
            diffuse_reflectance: Vec3::ZERO,
            diffuse_emittance: Vec3::ZERO,
            specular_reflectance: Vec3::splat(0.05),
            specular_transmittance: Vec3::splat(0.9),
            refraction_index,
            emits_from_back: false,
        }
    }

    /// Whether the material injects energy into the scene
    #[inline]
    pub fn is_emissive(&self) -> bool {
        energy_sum(self.diffuse_emittance) > 0.0
    }

    /// Whether any specular component is worth following
    #[inline]
    pub fn is_specular(&self) -> bool {
        energy_sum(self.specular_reflectance) > 0.0
            || energy_sum(self.specular_transmittance) > 0.0
    }

    /// Scalar magnitude of the diffuse component, for roulette weighting
    #[inline]
    pub fn diffuse_magnitude(&self) -> f32 {
        energy_sum(self.diffuse_reflectance) / 3.0
    }

    /// Scalar magnitude of the mirror component
    #[inline]
    pub fn specular_magnitude(&self) -> f32 {
        energy_sum(self.specular_reflectance) / 3.0
    }

    /// Scalar magnitude of the transmitted component
    #[inline]
    pub fn transmittance_magnitude(&self) -> f32 {
        energy_sum(self.specular_transmittance) / 3.0
    }

    /// True when any reflectance channel reaches or exceeds 1.0, which
    /// makes progressive radiosity diverge (energy grows every bounce)
    #[inline]
    pub fn is_over_unity(&self) -> bool {
        let total = self.diffuse_reflectance + self.specular_reflectance + self.specular_transmittance;
        total.x >= 1.0 || total.y >= 1.0 || total.z >= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diffuse_constructor() {
        let m = Material::diffuse(Vec3::splat(0.7));
        assert!(!m.is_emissive());
        assert!(!m.is_specular());
        assert!((m.diffuse_magnitude() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_emissive_constructor() {
        let m = Material::emissive(Vec3::new(10.0, 8.0, 6.0));
        assert!(m.is_emissive());
        assert_eq!(m.diffuse_reflectance, Vec3::ZERO);
    }

    #[test]
    fn test_mirror_and_glass_are_specular() {
        assert!(Material::mirror().is_specular());
        assert!(Material::glass(1.5).is_specular());
    }

    #[test]
    fn test_over_unity_detection() {
        let mut m = Material::diffuse(Vec3::splat(0.6));
        assert!(!m.is_over_unity());
        m.specular_reflectance = Vec3::splat(0.5);
        assert!(m.is_over_unity());
    }
}
