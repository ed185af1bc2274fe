//! Precompute: turn a solved progressive scene into packed tables
//!
//! Packing snapshots the measured form factors and the interpolation
//! graph into the flat, shard-partitioned layout the replay runtime
//! consumes. Energy state is NOT packed; the runtime re-seeds from
//! scene lighting on every reset.

use crate::packed::file::{
    PackedCorner, PackedFactor, PackedShard, PackedSmoothing, PackedSolverFile,
};
use crate::radiosity::scene::ProgressiveScene;
use crate::smoothing::InterpolationGraph;

/// Build packed tables from measured factors and a smoothing graph
///
/// Destinations are distributed round-robin over `num_shards` so
/// parallel replay workers own disjoint energy ranges. Triangles whose
/// factors were never measured pack as empty rows; their energy cannot
/// move at replay time, so packing is normally done after the
/// progressive solve converged.
pub fn pack(
    scene: &ProgressiveScene,
    graph: &InterpolationGraph,
    num_shards: u32,
) -> PackedSolverFile {
    let num_shards = num_shards.max(1);
    let count = scene.triangle_count();

    let unmeasured = scene
        .triangles()
        .iter()
        .filter(|t| !t.is_inert() && t.factor_rays == 0)
        .count();
    if unmeasured > 0 {
        log::warn!("packing {unmeasured} triangles with unmeasured factors, their energy will not move at replay");
    }

    // Two passes per shard: count factors per source, then fill
    let mut shards: Vec<PackedShard> = (0..num_shards)
        .map(|_| PackedShard {
            offsets: vec![0u32; count + 1],
            factors: Vec::new(),
        })
        .collect();

    for (source, tri) in scene.triangles().iter().enumerate() {
        for factor in &tri.factors {
            let shard = (factor.destination % num_shards) as usize;
            // counts land in offsets[source + 1], the prefix sum below
            // turns them into end offsets
            shards[shard].offsets[source + 1] += 1;
        }
    }
    for shard in &mut shards {
        let mut running = 0u32;
        for offset in shard.offsets.iter_mut() {
            running += *offset;
            *offset = running;
        }
        shard.factors = vec![
            PackedFactor {
                dest_local: 0,
                visibility: 0.0,
            };
            running as usize
        ];
    }

    let mut cursors: Vec<Vec<u32>> = shards
        .iter()
        .map(|s| s.offsets[..count].to_vec())
        .collect();
    for (source, tri) in scene.triangles().iter().enumerate() {
        for factor in &tri.factors {
            let shard = (factor.destination % num_shards) as usize;
            let slot = cursors[shard][source];
            shards[shard].factors[slot as usize] = PackedFactor {
                dest_local: factor.destination / num_shards,
                visibility: factor.visibility,
            };
            cursors[shard][source] += 1;
        }
    }

    PackedSolverFile {
        triangle_count: count as u32,
        num_shards,
        shards,
        areas: scene.triangles().iter().map(|t| t.plane.area).collect(),
        is_lod0: scene.triangles().iter().map(|t| t.is_lod0).collect(),
        smoothing: flatten_smoothing(graph, count),
    }
}

/// Flatten the node arena into offset/corner arrays
fn flatten_smoothing(graph: &InterpolationGraph, triangle_count: usize) -> PackedSmoothing {
    let mut node_offsets = Vec::with_capacity(graph.node_count() + 1);
    let mut corners = Vec::new();
    node_offsets.push(0u32);
    for node in graph.nodes() {
        for corner in &node.corners {
            corners.push(PackedCorner {
                triangle: corner.triangle,
                weight: corner.weight,
            });
        }
        node_offsets.push(corners.len() as u32);
    }

    let triangle_nodes = (0..triangle_count)
        .map(|t| {
            let handles = graph.triangle_nodes(t as u32);
            [handles[0].raw(), handles[1].raw(), handles[2].raw()]
        })
        .collect();

    PackedSmoothing {
        node_offsets,
        corners,
        triangle_nodes,
    }
}
