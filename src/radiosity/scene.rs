//! Progressive radiosity scene
//!
//! Orchestrates energy shooting among triangles. Each improve step
//! either *refreshes* the selected shooter (measures its form factors
//! with a batch of stratified hemisphere rays, never moving energy) or
//! *distributes* its unshot energy over already-measured factors
//! (never re-measuring). Keeping measurement and distribution strictly
//! separate is the invariant that makes the conservation property hold.

use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::collider::Collider;
use crate::geometry::SceneGeometry;
use crate::radiosity::sampler::{hemisphere_direction, surface_point};
use crate::radiosity::triangle::{FormFactor, SolverTriangle};
use crate::smoothing::{InterpolationGraph, NodeHandle};
use crate::types::{energy_sum, reflect, refract, Ray, TriangleIndex};

/// Hysteresis: enter distribute mode when one shooter holds more than
/// this fraction of the injected flux
pub const DISTRIB_LEVEL_HIGH: f32 = 0.9;
/// Hysteresis: fall back to refresh mode below this fraction
pub const DISTRIB_LEVEL_LOW: f32 = 0.6;
/// Geometric growth of a shooter's measurement batch between refreshes
pub const REFRESH_MULTIPLY: u32 = 2;
/// Upper bound on batch growth, as a multiple of the base batch
pub const MAX_REFRESH_DISBALANCE: u32 = 64;
/// Rays in the first measurement batch of a shooter
pub const BASE_REFRESH_RAYS: u32 = 64;
/// A shooter's factors go stale once the energy received since the
/// last rebuild exceeds this multiple of the energy present at rebuild
const REFRESH_ERROR_LEVEL: f32 = 4.0;
/// Specular chain recursion guard during factor measurement
const MAX_SPECULAR_DEPTH: u32 = 25;
/// Photon weights below this are absorbed without further bounces
const MIN_PHOTON_WEIGHT: f32 = 1e-4;
/// Unshot energy below this fraction of injected flux is negligible
const NEGLIGIBLE_ENERGY: f32 = 1e-6;

/// Result of a reset or improve call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImproveStatus {
    /// Nothing to simulate: total injected flux is zero
    Finished,
    /// At least one shooter's unshot energy was fully redistributed
    Improved,
    /// No energy was redistributed during the call
    NotImproved,
    /// Accumulators became non-finite; the scene is terminal
    InternalError,
}

/// Errors surfaced by the progressive solver
#[derive(Error, Debug)]
pub enum SolverError {
    /// Direct-irradiance input length does not match the scene
    #[error("direct irradiance holds {got} entries, scene has {expected} triangles")]
    EncodingMismatch {
        /// Triangle count of the scene
        expected: usize,
        /// Entries supplied
        got: usize,
    },

    /// Growing a factor array failed; the previous factors remain valid
    #[error("factor storage allocation failed for triangle {triangle}")]
    FactorAllocation {
        /// Shooter whose rebuild failed
        triangle: TriangleIndex,
    },

    /// The scene already reported `InternalError` and must be dropped
    #[error("scene is terminal after an internal error")]
    Poisoned,
}

/// 256-entry custom-to-physical lookup table for quantized inputs
///
/// Maps one byte of the RGBA8 encoding to a physically linear scalar,
/// applied per channel.
#[derive(Debug, Clone)]
pub struct ScaleTable {
    table: [f32; 256],
}

impl ScaleTable {
    /// Identity mapping onto [0,1]
    pub fn identity() -> Self {
        let mut table = [0.0; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = i as f32 / 255.0;
        }
        ScaleTable { table }
    }

    /// Gamma decode (e.g. 2.2 for sRGB-like inputs)
    pub fn from_gamma(gamma: f32) -> Self {
        let mut table = [0.0; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = (i as f32 / 255.0).powf(gamma);
        }
        ScaleTable { table }
    }

    /// Arbitrary custom scale
    pub fn custom(table: [f32; 256]) -> Self {
        ScaleTable { table }
    }

    /// Decode one quantized RGBA8 entry to linear RGB (alpha ignored)
    #[inline]
    pub fn decode(&self, rgba: [u8; 4]) -> Vec3 {
        Vec3::new(
            self.table[rgba[0] as usize],
            self.table[rgba[1] as usize],
            self.table[rgba[2] as usize],
        )
    }
}

/// Per-triangle direct irradiance accepted by [`ProgressiveScene::reset`]
///
/// Exactly one encoding is supplied per call; the enum makes the
/// "both at once" ambiguity unrepresentable.
pub enum DirectIrradiance<'a> {
    /// Quantized RGBA8 with a custom-to-physical lookup table
    Quantized {
        /// One RGBA8 entry per triangle
        values: &'a [[u8; 4]],
        /// Byte-to-physical decode table
        table: &'a ScaleTable,
    },
    /// Raw linear float RGB, one entry per triangle (W/m^2)
    FloatRgb(&'a [Vec3]),
}

impl DirectIrradiance<'_> {
    fn len(&self) -> usize {
        match self {
            DirectIrradiance::Quantized { values, .. } => values.len(),
            DirectIrradiance::FloatRgb(values) => values.len(),
        }
    }

    #[inline]
    fn get(&self, i: usize) -> Vec3 {
        match self {
            DirectIrradiance::Quantized { values, table } => table.decode(values[i]),
            DirectIrradiance::FloatRgb(values) => values[i],
        }
    }
}

/// Shooter-selection mode, switched with hysteresis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShootMode {
    /// Prefer measuring factors where a shot would pay off most
    Refresh,
    /// Prefer moving the largest unshot energy
    Distribute,
}

/// Tracks triangles currently holding non-negligible unshot energy
///
/// Insertion is O(1); the best-shooter query scans live members and
/// drops dead ones as it goes, so the cost of a scan is amortized over
/// the insertions that created the entries.
#[derive(Debug, Default)]
struct ReflectorSet {
    members: Vec<TriangleIndex>,
    in_set: Vec<bool>,
}

impl ReflectorSet {
    fn with_capacity(triangles: usize) -> Self {
        ReflectorSet {
            members: Vec::new(),
            in_set: vec![false; triangles],
        }
    }

    #[inline]
    fn insert(&mut self, t: TriangleIndex) {
        let slot = &mut self.in_set[t as usize];
        if !*slot {
            *slot = true;
            self.members.push(t);
        }
    }

    fn clear(&mut self) {
        self.members.clear();
        self.in_set.iter_mut().for_each(|s| *s = false);
    }

    /// Best member by `metric`, dropping members below `threshold`
    fn best(
        &mut self,
        threshold: f32,
        energy: impl Fn(TriangleIndex) -> f32,
        metric: impl Fn(TriangleIndex) -> f32,
    ) -> Option<TriangleIndex> {
        let mut best: Option<(TriangleIndex, f32)> = None;
        let mut i = 0;
        while i < self.members.len() {
            let t = self.members[i];
            if energy(t) <= threshold {
                self.in_set[t as usize] = false;
                self.members.swap_remove(i);
                continue;
            }
            let score = metric(t);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((t, score));
            }
            i += 1;
        }
        best.map(|(t, _)| t)
    }
}

/// Aggregate counters exposed to host UIs
#[derive(Debug, Clone, Copy)]
pub struct SceneStats {
    /// Triangles in the scene
    pub triangles: usize,
    /// Triangles excluded from transport (no material / zero area)
    pub inert_triangles: usize,
    /// Total flux injected by the last propagation reset (W)
    pub injected_flux: f32,
    /// Unshot exiting flux still waiting for distribution (W)
    pub unshot_flux: f32,
    /// Distribution steps performed since the last factor reset
    pub shots_done: u64,
    /// Measurement rays cast since the last factor reset
    pub refresh_rays: u64,
}

/// The mutable progressive-radiosity simulation state
pub struct ProgressiveScene {
    triangles: Vec<SolverTriangle>,
    reflectors: ReflectorSet,
    injected_flux: f32,
    shots_done: u64,
    refresh_rays: u64,
    mode: ShootMode,
    rng: SmallRng,
    poisoned: bool,
    // scratch for factor measurement, reused across refreshes
    hit_power: Vec<f32>,
    touched: Vec<TriangleIndex>,
}

impl ProgressiveScene {
    /// Attach a static scene; triangles with missing materials or zero
    /// area are created inert and excluded from transport for good.
    pub fn new(geometry: &dyn SceneGeometry) -> Self {
        Self::with_seed(geometry, 0x51_70_1e_55)
    }

    /// Attach with an explicit RNG seed; identical seeds and call
    /// sequences reproduce identical results.
    pub fn with_seed(geometry: &dyn SceneGeometry, seed: u64) -> Self {
        let count = geometry.triangle_count();
        let mut triangles = Vec::with_capacity(count);
        for t in 0..count {
            triangles.push(SolverTriangle::new(
                geometry.triangle_vertices(t),
                geometry.material(t).cloned(),
            ));
        }
        ProgressiveScene {
            reflectors: ReflectorSet::with_capacity(count),
            injected_flux: 0.0,
            shots_done: 0,
            refresh_rays: 0,
            mode: ShootMode::Refresh,
            rng: SmallRng::seed_from_u64(seed),
            poisoned: false,
            hit_power: vec![0.0; count],
            touched: Vec::new(),
            triangles,
        }
    }

    /// Number of triangles (inert included)
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Read access for queries, packing and tests
    #[inline]
    pub fn triangle(&self, t: TriangleIndex) -> &SolverTriangle {
        &self.triangles[t as usize]
    }

    /// All triangles, in scene order
    #[inline]
    pub fn triangles(&self) -> &[SolverTriangle] {
        &self.triangles
    }

    /// Wire a triangle's corners to interpolation nodes
    pub fn set_corner_nodes(&mut self, t: TriangleIndex, nodes: [NodeHandle; 3]) {
        self.triangles[t as usize].corner_nodes = nodes;
    }

    /// Wire every triangle's corners from a smoothing graph
    pub fn attach_smoothing(&mut self, graph: &InterpolationGraph) {
        for t in 0..self.triangles.len() {
            self.triangles[t].corner_nodes = graph.triangle_nodes(t as TriangleIndex);
        }
    }

    /// Smoothed indirect irradiance at one wired corner (W/m^2)
    ///
    /// Returns the sentinel color for corners without interpolation.
    pub fn corner_indirect_irradiance(
        &self,
        t: TriangleIndex,
        corner: usize,
        graph: &InterpolationGraph,
    ) -> Vec3 {
        let handle = self.triangles[t as usize].corner_nodes[corner];
        graph.smooth(handle, |tri| self.triangle(tri).indirect_irradiance())
    }

    /// Reinitialize accumulators from per-triangle direct irradiance
    ///
    /// `reset_factors` additionally drops all measured factors and
    /// forces `reset_propagation`. With `reset_propagation == false`
    /// the propagated indirect state survives and only the direct
    /// component is swapped, which hosts use for moving lights over a
    /// converged solution.
    pub fn reset(
        &mut self,
        reset_factors: bool,
        reset_propagation: bool,
        direct: &DirectIrradiance<'_>,
    ) -> Result<ImproveStatus, SolverError> {
        if self.poisoned {
            return Err(SolverError::Poisoned);
        }
        if direct.len() != self.triangles.len() {
            return Err(SolverError::EncodingMismatch {
                expected: self.triangles.len(),
                got: direct.len(),
            });
        }
        let reset_propagation = reset_propagation || reset_factors;

        if reset_factors {
            for tri in &mut self.triangles {
                tri.reset_factors();
            }
            self.shots_done = 0;
            self.refresh_rays = 0;
            self.mode = ShootMode::Refresh;
        }

        if reset_propagation {
            self.reflectors.clear();
            self.injected_flux = 0.0;
            for (i, tri) in self.triangles.iter_mut().enumerate() {
                tri.reset_energies();
                let Some(material) = tri.material.as_ref() else {
                    continue;
                };
                let area = tri.plane.area;
                let irradiance = direct.get(i);
                tri.flux_direct = irradiance * area;
                tri.flux_to_diffuse = irradiance * material.diffuse_reflectance * area
                    + material.diffuse_emittance * area;
                self.injected_flux += energy_sum(tri.flux_to_diffuse);
            }
        } else {
            // Swap the direct component in place, keep indirect state
            for (i, tri) in self.triangles.iter_mut().enumerate() {
                let Some(material) = tri.material.as_ref() else {
                    continue;
                };
                let area = tri.plane.area;
                let new_direct = direct.get(i) * area;
                let delta = (new_direct - tri.flux_direct) * material.diffuse_reflectance;
                tri.flux_direct = new_direct;
                tri.flux_to_diffuse = (tri.flux_to_diffuse + delta).max(Vec3::ZERO);
                self.injected_flux += energy_sum(delta).max(0.0);
            }
        }

        let threshold = self.negligible_threshold();
        for t in 0..self.triangles.len() {
            if self.triangles[t].unshot_energy() > threshold {
                self.reflectors.insert(t as TriangleIndex);
            }
        }

        if self.injected_flux <= 0.0 {
            Ok(ImproveStatus::Finished)
        } else {
            Ok(ImproveStatus::NotImproved)
        }
    }

    /// Run shooting/distribution steps until `end` returns true
    ///
    /// Cancellation is cooperative: `end` is polled between steps,
    /// never inside a measurement batch.
    pub fn improve(&mut self, collider: &Collider, mut end: impl FnMut() -> bool) -> ImproveStatus {
        if self.poisoned {
            return ImproveStatus::InternalError;
        }
        let mut improved = false;
        loop {
            self.update_mode();
            let shooter = match self.select_shooter() {
                Some(t) => t,
                None => break,
            };

            if self.needs_refresh(shooter) {
                match self.refresh_factors(collider, shooter) {
                    Ok(()) => {}
                    Err(SolverError::FactorAllocation { triangle }) => {
                        // Previous factors stay valid; skip the rebuild
                        log::warn!("factor rebuild failed for triangle {triangle}, keeping old factors");
                    }
                    Err(_) => {}
                }
            } else {
                self.distribute(shooter);
                improved = true;
                if !self.triangles[shooter as usize].is_finite() {
                    self.poisoned = true;
                    return ImproveStatus::InternalError;
                }
            }

            if end() {
                break;
            }
        }
        if improved {
            ImproveStatus::Improved
        } else {
            ImproveStatus::NotImproved
        }
    }

    /// Scene-relative progress metric: distribution steps performed
    /// per unit of remaining unshot energy. Non-decreasing across
    /// improve calls until factors are reset.
    pub fn accuracy(&self) -> f32 {
        if self.injected_flux <= 0.0 {
            return f32::MAX;
        }
        let remaining = self.unshot_flux() / self.injected_flux;
        self.shots_done as f32 / remaining.max(1e-9)
    }

    /// Unshot exiting flux summed over the scene (W)
    pub fn unshot_flux(&self) -> f32 {
        self.triangles.iter().map(|t| t.unshot_energy()).sum()
    }

    /// Exiting flux summed over the scene, shot and unshot (W)
    pub fn total_flux(&self) -> f32 {
        self.triangles
            .iter()
            .map(|t| energy_sum(t.exiting_flux()))
            .sum()
    }

    /// Running total of injected flux (W): the reset seeds plus every
    /// delivery made by distribution steps since. Accumulated exiting
    /// flux never legitimately exceeds this.
    #[inline]
    pub fn injected_flux(&self) -> f32 {
        self.injected_flux
    }

    /// Aggregate counters for host UIs
    pub fn stats(&self) -> SceneStats {
        SceneStats {
            triangles: self.triangles.len(),
            inert_triangles: self.triangles.iter().filter(|t| t.is_inert()).count(),
            injected_flux: self.injected_flux,
            unshot_flux: self.unshot_flux(),
            shots_done: self.shots_done,
            refresh_rays: self.refresh_rays,
        }
    }

    // ------------------------------------------------------------------
    // shooter selection
    // ------------------------------------------------------------------

    #[inline]
    fn negligible_threshold(&self) -> f32 {
        NEGLIGIBLE_ENERGY * self.injected_flux.max(f32::MIN_POSITIVE)
    }

    fn update_mode(&mut self) {
        if self.injected_flux <= 0.0 {
            return;
        }
        let max_unshot = self
            .triangles
            .iter()
            .map(|t| t.unshot_energy())
            .fold(0.0f32, f32::max);
        let ratio = max_unshot / self.injected_flux;
        match self.mode {
            ShootMode::Refresh if ratio > DISTRIB_LEVEL_HIGH => {
                self.mode = ShootMode::Distribute;
            }
            ShootMode::Distribute if ratio < DISTRIB_LEVEL_LOW => {
                self.mode = ShootMode::Refresh;
            }
            _ => {}
        }
    }

    fn select_shooter(&mut self) -> Option<TriangleIndex> {
        let threshold = self.negligible_threshold();
        let triangles = &self.triangles;
        let mode = self.mode;
        self.reflectors.best(
            threshold,
            |t| triangles[t as usize].unshot_energy(),
            |t| {
                let tri = &triangles[t as usize];
                match mode {
                    // Energy a measurement shot would pay off per ray
                    ShootMode::Refresh => {
                        tri.unshot_energy() / (tri.factor_rays + BASE_REFRESH_RAYS) as f32
                    }
                    ShootMode::Distribute => tri.unshot_energy(),
                }
            },
        )
    }

    #[inline]
    fn needs_refresh(&self, t: TriangleIndex) -> bool {
        let tri = &self.triangles[t as usize];
        tri.factor_rays == 0
            || tri.energy_since_refresh
                > REFRESH_ERROR_LEVEL * tri.energy_at_refresh.max(self.negligible_threshold())
    }

    // ------------------------------------------------------------------
    // refresh: measure factors, move no energy
    // ------------------------------------------------------------------

    fn refresh_factors(
        &mut self,
        collider: &Collider,
        shooter: TriangleIndex,
    ) -> Result<(), SolverError> {
        let (rays, vertices, normal) = {
            let tri = &self.triangles[shooter as usize];
            let grown = if tri.factor_rays == 0 {
                BASE_REFRESH_RAYS
            } else {
                (tri.factor_rays.saturating_mul(REFRESH_MULTIPLY))
                    .min(BASE_REFRESH_RAYS * MAX_REFRESH_DISBALANCE)
            };
            (grown, tri.vertices, tri.plane.normal)
        };

        debug_assert!(self.touched.is_empty());
        let batch_offset: f32 = self.rng.gen();
        for i in 0..rays {
            let origin = surface_point(&mut self.rng, &vertices);
            let direction = hemisphere_direction(i, rays, batch_offset, normal);
            self.follow_photon(
                collider,
                Ray::new(origin, direction),
                1.0,
                shooter,
                0,
            );
        }

        // Turn accumulated hit power into a fresh factor list and swap
        // it in atomically; on allocation failure the old list survives.
        let mut factors = Vec::new();
        if factors.try_reserve_exact(self.touched.len()).is_err() {
            for &t in &self.touched {
                self.hit_power[t as usize] = 0.0;
            }
            self.touched.clear();
            return Err(SolverError::FactorAllocation { triangle: shooter });
        }
        let inv_rays = 1.0 / rays as f32;
        self.touched.sort_unstable();
        for &t in &self.touched {
            let power = std::mem::replace(&mut self.hit_power[t as usize], 0.0);
            factors.push(FormFactor {
                destination: t,
                visibility: (power * inv_rays).min(1.0),
            });
        }
        self.touched.clear();

        let tri = &mut self.triangles[shooter as usize];
        tri.factors = factors;
        tri.factor_rays = rays;
        tri.energy_at_refresh = tri.unshot_energy();
        tri.energy_since_refresh = 0.0;
        self.refresh_rays += rays as u64;
        Ok(())
    }

    /// Trace one measurement photon; specular chains are followed by
    /// weighted branching until the weight dies out or the guard depth
    /// is reached, then the remainder lands on a diffuse catcher.
    fn follow_photon(
        &mut self,
        collider: &Collider,
        ray: Ray,
        weight: f32,
        skip: TriangleIndex,
        depth: u32,
    ) {
        if weight < MIN_PHOTON_WEIGHT || depth >= MAX_SPECULAR_DEPTH {
            return;
        }
        let hit = match collider.intersect(&ray, f32::INFINITY, Some(skip)) {
            Some(h) => h,
            None => return, // left the scene, energy lost
        };
        let (material, normal) = {
            let tri = &self.triangles[hit.triangle as usize];
            let Some(material) = tri.material.clone() else {
                return;
            };
            (material, tri.plane.normal)
        };

        let specular = material.specular_magnitude();
        let transmitted = material.transmittance_magnitude();
        let caught = (1.0 - specular - transmitted).max(0.0);
        if caught > 0.0 {
            let slot = &mut self.hit_power[hit.triangle as usize];
            if *slot == 0.0 {
                self.touched.push(hit.triangle);
            }
            *slot += weight * caught;
        }

        if specular > 0.0 {
            let mirror = reflect(ray.direction, normal);
            self.follow_photon(
                collider,
                Ray::new(hit.point, mirror),
                weight * specular,
                hit.triangle,
                depth + 1,
            );
        }
        if transmitted > 0.0 {
            let eta = if hit.front_side {
                1.0 / material.refraction_index
            } else {
                material.refraction_index
            };
            match refract(ray.direction, normal, hit.front_side, eta) {
                Some(bent) => self.follow_photon(
                    collider,
                    Ray::new(hit.point, bent),
                    weight * transmitted,
                    hit.triangle,
                    depth + 1,
                ),
                // Total internal reflection folds into the mirror term
                None => self.follow_photon(
                    collider,
                    Ray::new(hit.point, reflect(ray.direction, normal)),
                    weight * transmitted,
                    hit.triangle,
                    depth + 1,
                ),
            }
        }
    }

    // ------------------------------------------------------------------
    // distribute: move energy over measured factors, measure nothing
    // ------------------------------------------------------------------

    fn distribute(&mut self, shooter: TriangleIndex) {
        let exiting = {
            let tri = &mut self.triangles[shooter as usize];
            let e = tri.flux_to_diffuse;
            tri.flux_diffused += e;
            tri.flux_to_diffuse = Vec3::ZERO;
            e
        };

        let factors = std::mem::take(&mut self.triangles[shooter as usize].factors);
        let threshold = self.negligible_threshold();
        for factor in &factors {
            let dest = &mut self.triangles[factor.destination as usize];
            if dest.is_inert() {
                continue;
            }
            let reflectance = dest
                .material
                .as_ref()
                .map(|m| m.diffuse_reflectance)
                .unwrap_or(Vec3::ZERO);
            let incident = exiting * factor.visibility;
            let retained = incident * reflectance;
            dest.receive(retained);
            // Running total: re-injected energy counts as injected, so
            // accumulated flux can only exceed it if energy is shot twice
            self.injected_flux += energy_sum(retained);
            if dest.unshot_energy() > threshold {
                self.reflectors.insert(factor.destination);
            }
        }
        self.triangles[shooter as usize].factors = factors;
        self.shots_done += 1;
    }
}
