//! Vertex smoothing: the interpolation graph
//!
//! Groups triangle corners around mesh vertices into interpolation
//! nodes so discontinuous per-triangle lighting can be read as
//! continuous per-vertex lighting. Nodes live in a dense arena and are
//! addressed by integer handles; triangles point at nodes and nodes
//! point back at triangles by index, so there are no ownership cycles.
//!
//! Construction runs once per static scene:
//! 1. one node per mesh vertex, corners weighted by corner angle times
//!    triangle area,
//! 2. optional proximity merge of nodes closer than the minimum
//!    feature size, closest pair first,
//! 3. split of each node into clusters whose face normals stay within
//!    the maximum smoothing angle of each other.

use glam::Vec3;

use crate::geometry::{SceneGeometry, TrianglePlane};
use crate::types::TriangleIndex;

/// Irradiance reported for corners with no meaningful interpolation
/// (all neighbor triangles degenerate). Deliberately loud.
pub const SENTINEL_IRRADIANCE: Vec3 = Vec3::new(1.0, 0.0, 1.0);

/// Handle into the interpolation-node arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(u32);

impl NodeHandle {
    /// "No node" sentinel
    pub const NONE: NodeHandle = NodeHandle(u32::MAX);

    /// Arena slot, `None` for the sentinel
    #[inline]
    pub fn index(self) -> Option<usize> {
        if self == Self::NONE {
            None
        } else {
            Some(self.0 as usize)
        }
    }

    /// Raw value, used by the packed-file flattening
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Rebuild from a raw value
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        NodeHandle(raw)
    }
}

/// One triangle corner contributing to a node
#[derive(Debug, Clone, Copy)]
pub struct Corner {
    /// Contributing triangle
    pub triangle: TriangleIndex,
    /// Contribution weight: corner angle times triangle area
    pub weight: f32,
}

/// Shared accumulation point for per-vertex light smoothing
#[derive(Debug, Clone)]
pub struct InterpolationNode {
    /// Representative position (the mesh vertex, or the first vertex
    /// of a merged group)
    pub position: Vec3,
    /// Contributing corners; empty for unreferenced vertices
    pub corners: Vec<Corner>,
    /// Sum of corner weights, normalizes smoothed reads
    pub power: f32,
}

impl InterpolationNode {
    /// Nodes without usable corners answer with the sentinel
    #[inline]
    pub fn has_interpolation(&self) -> bool {
        self.power > 0.0
    }
}

/// Smoothing parameters
#[derive(Debug, Clone, Copy)]
pub struct SmoothingConfig {
    /// Nodes closer than this may be merged into one (0 disables)
    pub min_feature_size: f32,
    /// Maximum angle (radians) between face normals sharing a node
    pub max_smooth_angle: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        SmoothingConfig {
            min_feature_size: 0.0,
            max_smooth_angle: 0.33,
        }
    }
}

/// The immutable interpolation graph of a static scene
#[derive(Debug, Clone)]
pub struct InterpolationGraph {
    nodes: Vec<InterpolationNode>,
    triangle_nodes: Vec<[NodeHandle; 3]>,
}

/// Corner candidate collected during construction
#[derive(Debug, Clone, Copy)]
struct RawCorner {
    triangle: TriangleIndex,
    corner: u8,
    weight: f32,
    normal: Vec3,
}

impl InterpolationGraph {
    /// Build the graph from the mesh's vertex-to-triangle adjacency
    pub fn build(geometry: &dyn SceneGeometry, config: &SmoothingConfig) -> Self {
        let vertex_count = geometry.vertex_count();
        let triangle_count = geometry.triangle_count();

        // Stage 1: per-vertex corner lists
        let mut vertex_corners: Vec<Vec<RawCorner>> = vec![Vec::new(); vertex_count];
        for t in 0..triangle_count {
            let v = geometry.triangle_vertices(t);
            let plane = TrianglePlane::from_vertices(&v);
            if plane.is_degenerate() || geometry.material(t).is_none() {
                continue;
            }
            let idx = geometry.triangle_indices(t);
            for k in 0..3 {
                let angle = corner_angle(&v, k);
                vertex_corners[idx[k] as usize].push(RawCorner {
                    triangle: t as TriangleIndex,
                    corner: k as u8,
                    weight: angle * plane.area,
                    normal: plane.normal,
                });
            }
        }

        // Stage 2: proximity merge of vertex groups
        let groups = merge_groups(geometry, config.min_feature_size);

        // Stage 3: angle split inside each group
        let min_dot = config.max_smooth_angle.cos();
        let mut nodes = Vec::new();
        let mut triangle_nodes = vec![[NodeHandle::NONE; 3]; triangle_count];

        for group in &groups {
            let position = geometry.vertex_position(group[0] as usize);
            let mut corners: Vec<RawCorner> = Vec::new();
            for &v in group {
                corners.extend_from_slice(&vertex_corners[v as usize]);
            }
            if corners.is_empty() {
                // Unreferenced vertex: flagged by a zero-corner node
                nodes.push(InterpolationNode {
                    position,
                    corners: Vec::new(),
                    power: 0.0,
                });
                continue;
            }

            // Greedy clustering: a corner joins the first cluster it is
            // mutually compatible with, else it starts a new one
            let mut clusters: Vec<Vec<RawCorner>> = Vec::new();
            for corner in corners.drain(..) {
                let target = clusters.iter_mut().find(|cluster| {
                    cluster
                        .iter()
                        .all(|member| member.normal.dot(corner.normal) >= min_dot)
                });
                match target {
                    Some(cluster) => cluster.push(corner),
                    None => clusters.push(vec![corner]),
                }
            }

            for cluster in clusters {
                let handle = NodeHandle(nodes.len() as u32);
                let mut power = 0.0;
                let mut node_corners = Vec::with_capacity(cluster.len());
                for member in &cluster {
                    power += member.weight;
                    node_corners.push(Corner {
                        triangle: member.triangle,
                        weight: member.weight,
                    });
                    triangle_nodes[member.triangle as usize][member.corner as usize] = handle;
                }
                nodes.push(InterpolationNode {
                    position,
                    corners: node_corners,
                    power,
                });
            }
        }

        InterpolationGraph {
            nodes,
            triangle_nodes,
        }
    }

    /// Number of nodes in the arena
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Node by handle
    #[inline]
    pub fn node(&self, handle: NodeHandle) -> Option<&InterpolationNode> {
        self.nodes.get(handle.index()?)
    }

    /// All nodes, in arena order
    #[inline]
    pub fn nodes(&self) -> &[InterpolationNode] {
        &self.nodes
    }

    /// Node handles of one triangle's corners
    #[inline]
    pub fn triangle_nodes(&self, triangle: TriangleIndex) -> [NodeHandle; 3] {
        self.triangle_nodes
            .get(triangle as usize)
            .copied()
            .unwrap_or([NodeHandle::NONE; 3])
    }

    /// Smoothed per-node value: weighted average of a per-triangle
    /// measure over the node's corners; sentinel when the node has no
    /// usable interpolation
    pub fn smooth(
        &self,
        handle: NodeHandle,
        mut measure: impl FnMut(TriangleIndex) -> Vec3,
    ) -> Vec3 {
        let node = match self.node(handle) {
            Some(n) => n,
            None => return SENTINEL_IRRADIANCE,
        };
        if !node.has_interpolation() {
            return SENTINEL_IRRADIANCE;
        }
        let mut sum = Vec3::ZERO;
        for corner in &node.corners {
            sum += measure(corner.triangle) * corner.weight;
        }
        sum / node.power
    }
}

/// Interior angle of triangle `v` at corner `k`
fn corner_angle(v: &[Vec3; 3], k: usize) -> f32 {
    let a = v[k];
    let b = v[(k + 1) % 3];
    let c = v[(k + 2) % 3];
    let e1 = (b - a).normalize_or_zero();
    let e2 = (c - a).normalize_or_zero();
    e1.dot(e2).clamp(-1.0, 1.0).acos()
}

/// Greedy proximity merge: vertices closer than `min_feature_size`
/// collapse into one group, earliest-closest-pair-first
fn merge_groups(geometry: &dyn SceneGeometry, min_feature_size: f32) -> Vec<Vec<u32>> {
    let vertex_count = geometry.vertex_count();
    let mut group_of: Vec<u32> = (0..vertex_count as u32).collect();

    if min_feature_size > 0.0 && vertex_count > 1 {
        let limit_sq = min_feature_size * min_feature_size;
        let mut pairs: Vec<(f32, u32, u32)> = Vec::new();
        for i in 0..vertex_count {
            let pi = geometry.vertex_position(i);
            for j in (i + 1)..vertex_count {
                let d = (geometry.vertex_position(j) - pi).length_squared();
                if d < limit_sq {
                    pairs.push((d, i as u32, j as u32));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        // Bounded greedy: each pair is processed once, roots collapse
        // toward the lower index
        for &(_, i, j) in &pairs {
            let ri = find_root(&mut group_of, i);
            let rj = find_root(&mut group_of, j);
            if ri != rj {
                let (lo, hi) = if ri < rj { (ri, rj) } else { (rj, ri) };
                group_of[hi as usize] = lo;
            }
        }

        let merged = (0..vertex_count as u32)
            .filter(|&v| find_root(&mut group_of, v) != v)
            .count();
        if vertex_count > 0 && merged * 10 > vertex_count * 9 {
            log::warn!(
                "vertex smoothing merged {merged} of {vertex_count} vertices; \
                 min_feature_size {min_feature_size} looks too large for this scene's units"
            );
        }
    }

    let mut groups: Vec<Vec<u32>> = Vec::new();
    let mut group_index: Vec<u32> = vec![u32::MAX; vertex_count];
    for v in 0..vertex_count as u32 {
        let root = find_root(&mut group_of, v);
        let slot = group_index[root as usize];
        if slot == u32::MAX {
            group_index[root as usize] = groups.len() as u32;
            groups.push(vec![v]);
        } else {
            groups[slot as usize].push(v);
        }
    }
    groups
}

fn find_root(parent: &mut [u32], mut v: u32) -> u32 {
    while parent[v as usize] != v {
        let grand = parent[parent[v as usize] as usize];
        parent[v as usize] = grand;
        v = grand;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TriangleMesh;
    use crate::material::Material;

    fn normal_of(mesh: &TriangleMesh, triangle: TriangleIndex) -> Vec3 {
        TrianglePlane::from_vertices(&mesh.triangle_vertices(triangle as usize)).normal
    }

    /// Flat quad: two triangles sharing an edge, all normals +Z
    fn flat_quad() -> TriangleMesh {
        TriangleMesh::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
            vec![Material::default()],
            vec![0, 0],
        )
        .unwrap()
    }

    /// Two triangles meeting at a sharp 90 degree ridge along the
    /// shared edge (0,0,0)-(0,1,0)
    fn ridge() -> TriangleMesh {
        TriangleMesh::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),  // first face in XY plane, normal +Z-ish
                Vec3::new(0.0, 0.0, 1.0),  // second face in YZ plane, normal +X-ish
            ],
            vec![[0, 2, 1], [0, 1, 3]],
            vec![Material::default()],
            vec![0, 0],
        )
        .unwrap()
    }

    #[test]
    fn test_flat_quad_shares_nodes() {
        let graph = InterpolationGraph::build(&flat_quad(), &SmoothingConfig::default());
        // Coplanar faces: shared vertices 0 and 2 each get one node
        // referenced by both triangles
        let t0 = graph.triangle_nodes(0);
        let t1 = graph.triangle_nodes(1);
        assert_eq!(t0[0], t1[0], "vertex 0 should share a node");
        assert_eq!(t0[2], t1[1], "vertex 2 should share a node");
        // 4 vertices, no splits
        assert_eq!(graph.node_count(), 4);
    }

    #[test]
    fn test_sharp_ridge_splits_nodes() {
        let config = SmoothingConfig {
            min_feature_size: 0.0,
            max_smooth_angle: 0.3, // well under the 90 degree ridge
        };
        let graph = InterpolationGraph::build(&ridge(), &config);
        let t0 = graph.triangle_nodes(0);
        let t1 = graph.triangle_nodes(1);
        // Shared vertices 0 and 1 must split into separate nodes
        assert_ne!(t0[0], t1[0]);
        assert_ne!(t0[2], t1[1]);

        // Partition property: corners in one node are within the angle,
        // corners in different nodes at the same vertex exceed it
        for node in graph.nodes() {
            for a in &node.corners {
                for b in &node.corners {
                    let na = normal_of(&ridge(), a.triangle);
                    let nb = normal_of(&ridge(), b.triangle);
                    assert!(na.dot(nb) >= config.max_smooth_angle.cos() - 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_wide_angle_keeps_ridge_together() {
        let config = SmoothingConfig {
            min_feature_size: 0.0,
            max_smooth_angle: 2.0, // beyond 90 degrees
        };
        let graph = InterpolationGraph::build(&ridge(), &config);
        let t0 = graph.triangle_nodes(0);
        let t1 = graph.triangle_nodes(1);
        assert_eq!(t0[0], t1[0], "wide angle should keep the ridge smooth");
    }

    #[test]
    fn test_unreferenced_vertex_flagged_not_fatal() {
        let mesh = TriangleMesh::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::splat(9.0)],
            vec![[0, 1, 2]],
            vec![Material::default()],
            vec![0],
        )
        .unwrap();
        let graph = InterpolationGraph::build(&mesh, &SmoothingConfig::default());
        let lonely = graph
            .nodes()
            .iter()
            .find(|n| n.corners.is_empty())
            .expect("unreferenced vertex should produce a zero-corner node");
        assert!(!lonely.has_interpolation());
    }

    #[test]
    fn test_zero_area_neighborhood_returns_sentinel() {
        let mesh = TriangleMesh::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::X * 2.0],
            vec![[0, 1, 2]],
            vec![Material::default()],
            vec![0],
        )
        .unwrap();
        let graph = InterpolationGraph::build(&mesh, &SmoothingConfig::default());
        // Degenerate triangle contributes no corners anywhere
        for v in 0..3u32 {
            let handle = NodeHandle(v);
            let value = graph.smooth(handle, |_| Vec3::ONE);
            assert_eq!(value, SENTINEL_IRRADIANCE);
        }
    }

    #[test]
    fn test_proximity_merge() {
        // Two quads 1e-4 apart: with a feature size of 0.01 their seam
        // vertices merge into shared nodes
        let mesh = TriangleMesh::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(1.0001, 0.0, 0.0),
                Vec3::new(2.0, 0.0, 0.0),
                Vec3::new(2.0, 1.0, 0.0),
                Vec3::new(1.0001, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3], [4, 5, 6], [4, 6, 7]],
            vec![Material::default()],
            vec![0, 0, 0, 0],
        )
        .unwrap();

        let merged = InterpolationGraph::build(
            &mesh,
            &SmoothingConfig {
                min_feature_size: 0.01,
                max_smooth_angle: 0.33,
            },
        );
        let apart = InterpolationGraph::build(&mesh, &SmoothingConfig::default());

        assert!(merged.node_count() < apart.node_count());
        // Triangle 0 corner at vertex 1 and triangle 2 corner at
        // vertex 4 now interpolate through the same node
        assert_eq!(merged.triangle_nodes(0)[1], merged.triangle_nodes(2)[0]);
    }

    #[test]
    fn test_smooth_weighted_average() {
        let graph = InterpolationGraph::build(&flat_quad(), &SmoothingConfig::default());
        // Vertex 0 is shared by both triangles with equal corner
        // weights (45 degree corners, equal areas)
        let handle = graph.triangle_nodes(0)[0];
        let value = graph.smooth(handle, |t| {
            if t == 0 {
                Vec3::splat(2.0)
            } else {
                Vec3::splat(4.0)
            }
        });
        assert!((value - Vec3::splat(3.0)).length() < 1e-4);
    }
}
