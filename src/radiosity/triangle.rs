//! Triangle energy model
//!
//! Each scene triangle carries three accumulators and a sparse
//! form-factor list. Accumulator semantics, fixed across the whole
//! crate:
//!
//! - `flux_direct` is incident direct flux (W), kept so indirect
//!   measures can be derived by subtraction.
//! - `flux_to_diffuse` is exiting flux (W) waiting to be shot: energy
//!   the triangle will reflect diffusely plus any unshot emission.
//! - `flux_diffused` is exiting flux already shot.
//!
//! Storing the exiting side keeps the conservation invariant simple:
//! with all reflectances below one, the sum of `flux_to_diffuse +
//! flux_diffused` over the scene never grows past the injected total.

use glam::Vec3;

use crate::geometry::TrianglePlane;
use crate::material::Material;
use crate::smoothing::NodeHandle;
use crate::types::{energy_sum, TriangleIndex};

/// Directed transport edge: "this triangle illuminates `destination`
/// with weight `visibility`"
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormFactor {
    /// Receiving triangle
    pub destination: TriangleIndex,
    /// Fraction of shot energy arriving there, in [0,1]
    pub visibility: f32,
}

/// One mesh face in solver space with its energy state
#[derive(Debug, Clone)]
pub struct SolverTriangle {
    /// Face plane, area and centroid
    pub plane: TrianglePlane,
    /// Corner positions
    pub vertices: [Vec3; 3],
    /// Material, `None` marks the triangle inert
    pub material: Option<Material>,
    /// Incident direct flux from the last reset (W)
    pub flux_direct: Vec3,
    /// Exiting flux not yet shot (W)
    pub flux_to_diffuse: Vec3,
    /// Exiting flux already shot (W)
    pub flux_diffused: Vec3,
    /// Form factors measured from this triangle; rebuilt as a whole,
    /// never patched incrementally
    pub factors: Vec<FormFactor>,
    /// Rays used for the last factor rebuild, 0 = never measured
    pub factor_rays: u32,
    /// Exiting energy received since the last factor rebuild, drives
    /// the lazy per-triangle refresh decision
    pub energy_since_refresh: f32,
    /// Exiting energy present when factors were last rebuilt
    pub energy_at_refresh: f32,
    /// Detail-level-0 flag carried through packing for host renderers
    pub is_lod0: bool,
    /// Interpolation node of each corner
    pub corner_nodes: [NodeHandle; 3],
}

impl SolverTriangle {
    /// Create a triangle from geometry; area and material are set
    /// together, and a missing material or zero area marks it inert.
    pub fn new(vertices: [Vec3; 3], material: Option<Material>) -> Self {
        let plane = TrianglePlane::from_vertices(&vertices);
        let material = if plane.is_degenerate() { None } else { material };
        SolverTriangle {
            plane,
            vertices,
            material,
            flux_direct: Vec3::ZERO,
            flux_to_diffuse: Vec3::ZERO,
            flux_diffused: Vec3::ZERO,
            factors: Vec::new(),
            factor_rays: 0,
            energy_since_refresh: 0.0,
            energy_at_refresh: 0.0,
            is_lod0: true,
            corner_nodes: [NodeHandle::NONE; 3],
        }
    }

    /// Inert triangles neither shoot nor receive
    #[inline]
    pub fn is_inert(&self) -> bool {
        self.material.is_none() || self.plane.area <= 0.0
    }

    /// Scalar magnitude of the unshot exiting energy
    #[inline]
    pub fn unshot_energy(&self) -> f32 {
        energy_sum(self.flux_to_diffuse)
    }

    /// Clear all accumulators; factors survive unless the caller
    /// resets them separately
    pub fn reset_energies(&mut self) {
        self.flux_direct = Vec3::ZERO;
        self.flux_to_diffuse = Vec3::ZERO;
        self.flux_diffused = Vec3::ZERO;
        self.energy_since_refresh = 0.0;
    }

    /// Drop measured factors (forces a refresh before the next shot)
    pub fn reset_factors(&mut self) {
        self.factors.clear();
        self.factors.shrink_to_fit();
        self.factor_rays = 0;
        self.energy_at_refresh = 0.0;
        self.energy_since_refresh = 0.0;
    }

    /// Receive exiting-side energy (already scaled by this triangle's
    /// reflectance by the sender)
    #[inline]
    pub fn receive(&mut self, exiting: Vec3) {
        self.flux_to_diffuse += exiting;
        self.energy_since_refresh += energy_sum(exiting);
    }

    /// Total exiting flux so far (shot + waiting)
    #[inline]
    pub fn exiting_flux(&self) -> Vec3 {
        self.flux_to_diffuse + self.flux_diffused
    }

    /// Radiant exitance (W/m^2), zero for inert triangles
    #[inline]
    pub fn exitance(&self) -> Vec3 {
        if self.is_inert() {
            Vec3::ZERO
        } else {
            self.exiting_flux() / self.plane.area
        }
    }

    /// Direct irradiance as injected by the last reset (W/m^2)
    #[inline]
    pub fn direct_irradiance(&self) -> Vec3 {
        if self.is_inert() {
            Vec3::ZERO
        } else {
            self.flux_direct / self.plane.area
        }
    }

    /// Indirect irradiance (W/m^2), derived from the exiting
    /// accumulators by inverting the reflectance scaling
    ///
    /// Channels with negligible reflectance carry no usable record of
    /// received energy and read as zero. Small negative differences
    /// from float rounding are the caller's to clamp at caching time.
    pub fn indirect_irradiance(&self) -> Vec3 {
        let material = match &self.material {
            Some(m) => m,
            None => return Vec3::ZERO,
        };
        let seed = self.flux_direct * material.diffuse_reflectance
            + material.diffuse_emittance * self.plane.area;
        let received = self.exiting_flux() - seed;
        let inv_area = 1.0 / self.plane.area;
        let per_channel = |received: f32, reflectance: f32| {
            if reflectance > 1e-6 {
                received / reflectance * inv_area
            } else {
                0.0
            }
        };
        Vec3::new(
            per_channel(received.x, material.diffuse_reflectance.x),
            per_channel(received.y, material.diffuse_reflectance.y),
            per_channel(received.z, material.diffuse_reflectance.z),
        )
    }

    /// All accumulators finite?
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.flux_direct.is_finite()
            && self.flux_to_diffuse.is_finite()
            && self.flux_diffused.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle(material: Option<Material>) -> SolverTriangle {
        SolverTriangle::new([Vec3::ZERO, Vec3::X, Vec3::Y], material)
    }

    #[test]
    fn test_inert_without_material() {
        let t = unit_triangle(None);
        assert!(t.is_inert());
        assert_eq!(t.exitance(), Vec3::ZERO);
    }

    #[test]
    fn test_degenerate_is_inert_even_with_material() {
        let t = SolverTriangle::new(
            [Vec3::ZERO, Vec3::X, Vec3::X * 3.0],
            Some(Material::default()),
        );
        assert!(t.is_inert());
        assert!(t.material.is_none(), "area and material are set together");
    }

    #[test]
    fn test_receive_and_exitance() {
        let mut t = unit_triangle(Some(Material::diffuse(Vec3::splat(0.5))));
        t.receive(Vec3::splat(1.0));
        assert_eq!(t.unshot_energy(), 3.0);
        // area = 0.5, exiting flux 1 per channel
        assert!((t.exitance() - Vec3::splat(2.0)).length() < 1e-6);
    }

    #[test]
    fn test_indirect_irradiance_inverts_reflectance() {
        let mut t = unit_triangle(Some(Material::diffuse(Vec3::splat(0.5))));
        // Received incident 4 W per channel, sender scaled it by 0.5
        t.receive(Vec3::splat(2.0));
        let indirect = t.indirect_irradiance();
        // incident flux 4 / area 0.5 = 8 W/m^2
        assert!((indirect - Vec3::splat(8.0)).length() < 1e-4);
    }

    #[test]
    fn test_indirect_zero_reflectance_channel() {
        let mut t = unit_triangle(Some(Material::diffuse(Vec3::new(0.5, 0.0, 0.5))));
        t.receive(Vec3::new(1.0, 0.0, 1.0));
        let indirect = t.indirect_irradiance();
        assert_eq!(indirect.y, 0.0);
        assert!(indirect.x > 0.0);
    }

    #[test]
    fn test_reset_factors_clears_measurement() {
        let mut t = unit_triangle(Some(Material::default()));
        t.factors.push(FormFactor {
            destination: 3,
            visibility: 0.5,
        });
        t.factor_rays = 100;
        t.reset_factors();
        assert!(t.factors.is_empty());
        assert_eq!(t.factor_rays, 0);
    }
}
