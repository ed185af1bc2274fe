//! Packed replay runtime
//!
//! Replays precomputed factor tables for realtime lighting: no rays,
//! no measurement, just energy moving over the packed edges. Energy
//! lives in per-shard arrays matching the file's destination
//! partition, so the multi-threaded path can hand each shard to its
//! own worker without any write sharing.

use glam::Vec3;
use rayon::prelude::*;

use crate::geometry::SceneGeometry;
use crate::packed::file::{load_packed, FileError, PackedSolverFile};
use crate::radiosity::scene::{ImproveStatus, SolverError};
use crate::smoothing::SENTINEL_IRRADIANCE;
use crate::types::energy_sum;
use std::path::Path;

/// Shooters replayed per batch
pub const BESTS: usize = 200;

/// Unshot energy below this fraction of injected flux is negligible
const NEGLIGIBLE_ENERGY: f32 = 1e-6;

/// Replay execution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threading {
    /// One thread, shooters processed strictly in order; energy a
    /// shooter received earlier in the batch is included when its turn
    /// comes
    Single,
    /// Shard-parallel over the rayon pool; the whole batch shoots a
    /// snapshot of its energy, receipts within the batch wait for a
    /// later batch
    Multi,
}

/// Per-shard mutable energy state, indexed by `dest_local`
#[derive(Debug, Clone)]
struct ShardState {
    /// Exiting flux waiting to be shot (W)
    to_diffuse: Vec<Vec3>,
    /// Exiting flux already shot (W)
    diffused: Vec<Vec3>,
    /// Exiting-side seed from the last reset (W)
    seed: Vec<Vec3>,
}

impl ShardState {
    fn zeroed(len: usize) -> Self {
        ShardState {
            to_diffuse: vec![Vec3::ZERO; len],
            diffused: vec![Vec3::ZERO; len],
            seed: vec![Vec3::ZERO; len],
        }
    }
}

/// Realtime solver replaying a [`PackedSolverFile`]
pub struct PackedSolver {
    file: PackedSolverFile,
    shards: Vec<ShardState>,
    /// Diffuse reflectance per global triangle, cached at reset
    reflectance: Vec<Vec3>,
    injected_flux: f32,
    /// Smoothed per-node indirect irradiance
    indirect_cache: Vec<Vec3>,
    /// Sum of corner weights per node
    node_power: Vec<f32>,
    /// Bumped whenever energy moves
    energy_generation: u64,
    /// Generation the cache was computed at
    cache_generation: u64,
}

impl PackedSolver {
    /// Wrap validated packed tables
    pub fn new(file: PackedSolverFile) -> Result<Self, FileError> {
        file.validate()?;
        let shards = (0..file.num_shards)
            .map(|s| ShardState::zeroed(file.shard_len(s)))
            .collect();
        let node_count = file.smoothing.node_count();
        let node_power = (0..node_count)
            .map(|n| {
                file.smoothing
                    .corners_of(n as u32)
                    .iter()
                    .map(|c| c.weight)
                    .sum()
            })
            .collect();
        Ok(PackedSolver {
            reflectance: vec![Vec3::ZERO; file.triangle_count as usize],
            shards,
            injected_flux: 0.0,
            indirect_cache: vec![Vec3::ZERO; node_count],
            node_power,
            energy_generation: 0,
            cache_generation: 0,
            file,
        })
    }

    /// Load packed tables from disk and wrap them
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FileError> {
        Self::new(load_packed(path)?)
    }

    /// The underlying tables
    #[inline]
    pub fn file(&self) -> &PackedSolverFile {
        &self.file
    }

    /// Triangles covered by the tables
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.file.triangle_count as usize
    }

    #[inline]
    fn locate(&self, t: u32) -> (usize, usize) {
        (
            (t % self.file.num_shards) as usize,
            (t / self.file.num_shards) as usize,
        )
    }

    /// Re-seed energy from current scene lighting; factors are
    /// untouched, so this is cheap enough to run per frame
    pub fn illumination_reset(&mut self, geometry: &dyn SceneGeometry) -> Result<(), SolverError> {
        if geometry.triangle_count() != self.triangle_count() {
            return Err(SolverError::EncodingMismatch {
                expected: self.triangle_count(),
                got: geometry.triangle_count(),
            });
        }
        self.injected_flux = 0.0;
        for t in 0..self.triangle_count() {
            let area = self.file.areas[t];
            let seed = match geometry.material(t) {
                Some(material) if area > 0.0 => {
                    self.reflectance[t] = material.diffuse_reflectance;
                    geometry.direct_irradiance(t) * material.diffuse_reflectance * area
                        + material.diffuse_emittance * area
                }
                _ => {
                    self.reflectance[t] = Vec3::ZERO;
                    Vec3::ZERO
                }
            };
            let (shard, local) = self.locate(t as u32);
            let state = &mut self.shards[shard];
            state.seed[local] = seed;
            state.to_diffuse[local] = seed;
            state.diffused[local] = Vec3::ZERO;
            self.injected_flux += energy_sum(seed);
        }
        self.energy_generation += 1;
        Ok(())
    }

    /// Replay batches of the best shooters until `end` returns true or
    /// all unshot energy is negligible
    pub fn illumination_improve(
        &mut self,
        mut end: impl FnMut() -> bool,
        threading: Threading,
    ) -> ImproveStatus {
        if self.injected_flux <= 0.0 {
            return ImproveStatus::Finished;
        }
        let mut improved = false;
        loop {
            let batch = self.select_bests();
            if batch.is_empty() {
                break;
            }
            match threading {
                Threading::Single => self.replay_sequential(&batch),
                Threading::Multi => self.replay_parallel(&batch),
            }
            self.energy_generation += 1;
            improved = true;
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

    /// Up to [`BESTS`] shooters with the most unshot energy
    fn select_bests(&self) -> Vec<u32> {
        let threshold = NEGLIGIBLE_ENERGY * self.injected_flux.max(f32::MIN_POSITIVE);
        let mut candidates: Vec<(u32, f32)> = (0..self.file.triangle_count)
            .filter_map(|t| {
                let (shard, local) = self.locate(t);
                let unshot = energy_sum(self.shards[shard].to_diffuse[local]);
                (unshot > threshold).then_some((t, unshot))
            })
            .collect();
        candidates.sort_unstable_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(BESTS);
        candidates.into_iter().map(|(t, _)| t).collect()
    }

    /// One shooter at a time; a shooter sees energy delivered to it by
    /// earlier members of the same batch
    fn replay_sequential(&mut self, batch: &[u32]) {
        let num_shards = self.file.num_shards;
        for &shooter in batch {
            let (shard, local) = self.locate(shooter);
            let exiting = {
                let state = &mut self.shards[shard];
                let e = state.to_diffuse[local];
                state.diffused[local] += e;
                state.to_diffuse[local] = Vec3::ZERO;
                e
            };
            for s in 0..num_shards as usize {
                // split borrow: the factor table is read-only
                let table = &self.file.shards[s];
                let state = &mut self.shards[s];
                for factor in table.factors_of(shooter) {
                    let dest_global = factor.dest_local * num_shards + s as u32;
                    let retained =
                        exiting * factor.visibility * self.reflectance[dest_global as usize];
                    state.to_diffuse[factor.dest_local as usize] += retained;
                    self.injected_flux += energy_sum(retained);
                }
            }
        }
    }

    /// Whole batch shoots a snapshot, shards replay in parallel
    fn replay_parallel(&mut self, batch: &[u32]) {
        let num_shards = self.file.num_shards;
        let snapshot: Vec<(u32, Vec3)> = batch
            .iter()
            .map(|&shooter| {
                let (shard, local) = self.locate(shooter);
                let state = &mut self.shards[shard];
                let e = state.to_diffuse[local];
                state.diffused[local] += e;
                state.to_diffuse[local] = Vec3::ZERO;
                (shooter, e)
            })
            .collect();

        let file = &self.file;
        let reflectance = &self.reflectance;
        let added: f32 = self
            .shards
            .par_iter_mut()
            .enumerate()
            .map(|(s, state)| {
                let table = &file.shards[s];
                let mut added = 0.0;
                for &(shooter, exiting) in &snapshot {
                    for factor in table.factors_of(shooter) {
                        let dest_global = factor.dest_local * num_shards + s as u32;
                        let retained =
                            exiting * factor.visibility * reflectance[dest_global as usize];
                        state.to_diffuse[factor.dest_local as usize] += retained;
                        added += energy_sum(retained);
                    }
                }
                added
            })
            .sum();
        self.injected_flux += added;
    }

    /// Radiant exitance of one triangle (W/m^2)
    pub fn triangle_exitance(&self, t: u32) -> Vec3 {
        let area = self.file.areas[t as usize];
        if area <= 0.0 {
            return Vec3::ZERO;
        }
        let (shard, local) = self.locate(t);
        let state = &self.shards[shard];
        (state.to_diffuse[local] + state.diffused[local]) / area
    }

    /// Indirect irradiance of one triangle (W/m^2), derived from the
    /// exiting accumulators by inverting the reflectance scaling
    pub fn triangle_indirect_irradiance(&self, t: u32) -> Vec3 {
        let area = self.file.areas[t as usize];
        if area <= 0.0 {
            return Vec3::ZERO;
        }
        let (shard, local) = self.locate(t);
        let state = &self.shards[shard];
        let received = state.to_diffuse[local] + state.diffused[local] - state.seed[local];
        let rho = self.reflectance[t as usize];
        let inv_area = 1.0 / area;
        let per_channel = |received: f32, reflectance: f32| {
            if reflectance > 1e-6 {
                received / reflectance * inv_area
            } else {
                0.0
            }
        };
        Vec3::new(
            per_channel(received.x, rho.x),
            per_channel(received.y, rho.y),
            per_channel(received.z, rho.z),
        )
    }

    /// Unshot exiting flux summed over the scene (W)
    pub fn unshot_flux(&self) -> f32 {
        self.shards
            .iter()
            .flat_map(|s| s.to_diffuse.iter())
            .map(|&e| energy_sum(e))
            .sum()
    }

    /// Exiting flux summed over the scene, shot and unshot (W)
    pub fn total_flux(&self) -> f32 {
        self.shards
            .iter()
            .map(|s| {
                s.to_diffuse
                    .iter()
                    .zip(&s.diffused)
                    .map(|(&a, &b)| energy_sum(a + b))
                    .sum::<f32>()
            })
            .sum()
    }

    /// Running total of injected flux (W)
    #[inline]
    pub fn injected_flux(&self) -> f32 {
        self.injected_flux
    }

    /// Recompute the smoothed per-node indirect cache; O(corners).
    /// Rounding can push a node slightly negative, clamped here so
    /// readers never see negative irradiance.
    pub fn update_indirect_irradiance(&mut self) {
        for n in 0..self.indirect_cache.len() {
            if self.node_power[n] <= 0.0 {
                self.indirect_cache[n] = SENTINEL_IRRADIANCE;
                continue;
            }
            let mut sum = Vec3::ZERO;
            for corner in self.file.smoothing.corners_of(n as u32) {
                sum += self.triangle_indirect_irradiance(corner.triangle) * corner.weight;
            }
            self.indirect_cache[n] = (sum / self.node_power[n]).max(Vec3::ZERO);
        }
        self.cache_generation = self.energy_generation;
    }

    /// Cached smoothed indirect irradiance at one triangle corner
    ///
    /// Reads the cache as-is; call [`Self::update_indirect_irradiance`]
    /// after improving to bring it up to date.
    pub fn indirect_irradiance(&self, t: u32, corner: usize) -> Vec3 {
        let node = self.file.smoothing.triangle_nodes[t as usize][corner];
        if node == u32::MAX {
            return SENTINEL_IRRADIANCE;
        }
        self.indirect_cache[node as usize]
    }

    /// Does the cache reflect the latest energy state?
    #[inline]
    pub fn is_cache_current(&self) -> bool {
        self.cache_generation == self.energy_generation
    }
}
