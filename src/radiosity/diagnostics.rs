//! On-demand solver consistency checks
//!
//! Nothing here runs during normal stepping; hosts call
//! [`ConsistencyReport::gather`] when a scene looks wrong and want a
//! cheap summary before reaching for a debugger.

use crate::radiosity::scene::ProgressiveScene;
use crate::types::energy_sum;

/// Histogram buckets, one per power-of-two-ish magnitude band
pub const HISTOGRAM_BUCKETS: usize = 256;

/// Snapshot of scene health
#[derive(Debug, Clone)]
pub struct ConsistencyReport {
    /// Triangles whose accumulators contain NaN or infinity
    pub non_finite_triangles: usize,
    /// Triangles whose material reflects plus transmits more than it
    /// receives
    pub over_unity_materials: usize,
    /// Triangles excluded from transport
    pub inert_triangles: usize,
    /// Running injected flux (W)
    pub injected_flux: f32,
    /// Unshot flux still waiting (W)
    pub remaining_flux: f32,
    /// Log-scale histogram of per-triangle direct irradiance magnitude;
    /// bucket 0 holds zero, the rest span 1e-6..1e6
    pub direct_histogram: [u32; HISTOGRAM_BUCKETS],
}

impl ConsistencyReport {
    /// Walk the scene and build a report; O(triangles)
    pub fn gather(scene: &ProgressiveScene) -> Self {
        let mut report = ConsistencyReport {
            non_finite_triangles: 0,
            over_unity_materials: 0,
            inert_triangles: 0,
            injected_flux: scene.injected_flux(),
            remaining_flux: scene.unshot_flux(),
            direct_histogram: [0; HISTOGRAM_BUCKETS],
        };

        for tri in scene.triangles() {
            if tri.is_inert() {
                report.inert_triangles += 1;
                continue;
            }
            if !tri.is_finite() {
                report.non_finite_triangles += 1;
            }
            if let Some(material) = &tri.material {
                if material.is_over_unity() {
                    report.over_unity_materials += 1;
                }
            }
            let magnitude = energy_sum(tri.direct_irradiance());
            report.direct_histogram[bucket_of(magnitude)] += 1;
        }

        log::debug!(
            "consistency: {} non-finite, {} over-unity, {} inert, injected {:.3} W, remaining {:.3} W",
            report.non_finite_triangles,
            report.over_unity_materials,
            report.inert_triangles,
            report.injected_flux,
            report.remaining_flux,
        );
        report
    }

    /// A scene is healthy when nothing non-finite was found and no
    /// material creates energy
    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.non_finite_triangles == 0 && self.over_unity_materials == 0
    }
}

/// Map an irradiance magnitude onto a log-scale bucket covering
/// 1e-6..1e6 W/m^2; zero and subnormal values land in bucket 0,
/// non-finite values in the last bucket
fn bucket_of(magnitude: f32) -> usize {
    if !magnitude.is_finite() {
        return HISTOGRAM_BUCKETS - 1;
    }
    if magnitude < 1e-6 {
        return 0;
    }
    let span = 12.0; // log10 range, -6..+6
    let normalized = (magnitude.log10() + 6.0) / span;
    let bucket = 1.0 + normalized * (HISTOGRAM_BUCKETS - 2) as f32;
    (bucket as usize).min(HISTOGRAM_BUCKETS - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TriangleMesh;
    use crate::material::Material;
    use crate::radiosity::scene::DirectIrradiance;
    use glam::Vec3;

    fn quad(material: Material) -> TriangleMesh {
        TriangleMesh::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y],
            vec![[0, 1, 2], [0, 2, 3]],
            vec![material],
            vec![0, 0],
        )
        .unwrap()
    }

    #[test]
    fn test_healthy_scene() {
        let mesh = quad(Material::diffuse(Vec3::splat(0.5)));
        let mut scene = ProgressiveScene::new(&mesh);
        let direct = vec![Vec3::splat(1.0); 2];
        scene
            .reset(true, true, &DirectIrradiance::FloatRgb(&direct))
            .unwrap();

        let report = ConsistencyReport::gather(&scene);
        assert!(report.is_healthy());
        assert_eq!(report.inert_triangles, 0);
        assert!(report.injected_flux > 0.0);
        // Both triangles carry 1 W/m^2 per channel
        let populated: u32 = report.direct_histogram.iter().sum();
        assert_eq!(populated, 2);
        assert_eq!(report.direct_histogram[0], 0);
    }

    #[test]
    fn test_over_unity_material_flagged() {
        let mesh = quad(Material::diffuse(Vec3::splat(1.2)));
        let scene = ProgressiveScene::new(&mesh);
        let report = ConsistencyReport::gather(&scene);
        assert_eq!(report.over_unity_materials, 2);
        assert!(!report.is_healthy());
    }

    #[test]
    fn test_zero_direct_lands_in_bucket_zero() {
        let mesh = quad(Material::diffuse(Vec3::splat(0.5)));
        let mut scene = ProgressiveScene::new(&mesh);
        let direct = vec![Vec3::ZERO; 2];
        scene
            .reset(true, true, &DirectIrradiance::FloatRgb(&direct))
            .unwrap();
        let report = ConsistencyReport::gather(&scene);
        assert_eq!(report.direct_histogram[0], 2);
    }

    #[test]
    fn test_bucket_ordering() {
        assert_eq!(bucket_of(0.0), 0);
        assert!(bucket_of(1e-3) < bucket_of(1.0));
        assert!(bucket_of(1.0) < bucket_of(1e3));
        assert_eq!(bucket_of(f32::NAN), HISTOGRAM_BUCKETS - 1);
        assert_eq!(bucket_of(f32::INFINITY), HISTOGRAM_BUCKETS - 1);
    }
}
