//! Ray-vs-mesh intersection service
//!
//! Provides the collider consumed by the radiosity solver and the
//! gatherer: a BVH over scene triangles with nearest-hit ray queries.
//! Front/back side of the hit is reported so callers can resolve
//! emission direction and refraction.

use glam::Vec3;

use crate::geometry::SceneGeometry;
use crate::types::{Aabb, Ray, RayHit, TriangleIndex};

/// Minimum ray parameter, rejects self-intersections at the origin
const RAY_EPSILON: f32 = 1e-5;

/// Triangle with precomputed edges for the intersection test
#[derive(Debug, Clone, Copy)]
struct ColliderTriangle {
    v0: Vec3,
    edge1: Vec3,
    edge2: Vec3,
    aabb: Aabb,
}

impl ColliderTriangle {
    fn new(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        let mut aabb = Aabb::empty();
        aabb.expand_point(v0);
        aabb.expand_point(v1);
        aabb.expand_point(v2);
        ColliderTriangle {
            v0,
            edge1: v1 - v0,
            edge2: v2 - v0,
            aabb,
        }
    }

    /// Moller-Trumbore intersection; returns (t, u, v, front_side)
    #[inline]
    fn intersect(&self, ray: &Ray, max_distance: f32) -> Option<(f32, f32, f32, bool)> {
        let pvec = ray.direction.cross(self.edge2);
        let det = self.edge1.dot(pvec);
        if det.abs() < 1e-12 {
            return None; // ray parallel to triangle plane
        }
        let inv_det = 1.0 / det;
        let tvec = ray.origin - self.v0;
        let u = tvec.dot(pvec) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let qvec = tvec.cross(self.edge1);
        let v = ray.direction.dot(qvec) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = self.edge2.dot(qvec) * inv_det;
        if t < RAY_EPSILON || t > max_distance {
            return None;
        }
        // det > 0: ray hits the counter-clockwise (front) side
        Some((t, u, v, det > 0.0))
    }
}

/// BVH node
#[derive(Debug)]
enum BvhNode {
    Leaf {
        aabb: Aabb,
        triangles: Vec<u32>,
    },
    Internal {
        aabb: Aabb,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    #[inline]
    fn aabb(&self) -> &Aabb {
        match self {
            BvhNode::Leaf { aabb, .. } => aabb,
            BvhNode::Internal { aabb, .. } => aabb,
        }
    }
}

/// BVH-accelerated ray collider over a static scene
pub struct Collider {
    triangles: Vec<ColliderTriangle>,
    /// Maps collider slots back to scene triangle indices (degenerate
    /// faces are not inserted)
    scene_index: Vec<TriangleIndex>,
    root: Option<BvhNode>,
}

const MAX_TRIANGLES_PER_LEAF: usize = 8;

impl Collider {
    /// Build a collider for all non-degenerate triangles of a scene
    pub fn build(geometry: &dyn SceneGeometry) -> Self {
        let mut triangles = Vec::new();
        let mut scene_index = Vec::new();
        for t in 0..geometry.triangle_count() {
            let v = geometry.triangle_vertices(t);
            if (v[1] - v[0]).cross(v[2] - v[0]).length_squared() <= 0.0 {
                continue;
            }
            triangles.push(ColliderTriangle::new(v[0], v[1], v[2]));
            scene_index.push(t as TriangleIndex);
        }

        if triangles.is_empty() {
            return Collider {
                triangles,
                scene_index,
                root: None,
            };
        }

        let slots: Vec<u32> = (0..triangles.len() as u32).collect();
        let root = Self::build_node(&triangles, slots);
        Collider {
            triangles,
            scene_index,
            root: Some(root),
        }
    }

    /// Recursively build nodes: median split along the longest axis
    fn build_node(triangles: &[ColliderTriangle], slots: Vec<u32>) -> BvhNode {
        let mut aabb = Aabb::empty();
        for &s in &slots {
            aabb.expand_aabb(&triangles[s as usize].aabb);
        }

        if slots.len() <= MAX_TRIANGLES_PER_LEAF {
            return BvhNode::Leaf {
                aabb,
                triangles: slots,
            };
        }

        let axis = aabb.longest_axis();
        let mut sorted = slots;
        sorted.sort_by(|&a, &b| {
            let ca = triangles[a as usize].aabb.center()[axis];
            let cb = triangles[b as usize].aabb.center()[axis];
            ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mid = sorted.len() / 2;
        let (left_slots, right_slots) = sorted.split_at(mid);
        BvhNode::Internal {
            aabb,
            left: Box::new(Self::build_node(triangles, left_slots.to_vec())),
            right: Box::new(Self::build_node(triangles, right_slots.to_vec())),
        }
    }

    /// Nearest intersection along `ray` within `max_distance`
    ///
    /// `skip` excludes one scene triangle, used when shooting from a
    /// surface to avoid re-hitting the shooter itself.
    pub fn intersect(
        &self,
        ray: &Ray,
        max_distance: f32,
        skip: Option<TriangleIndex>,
    ) -> Option<RayHit> {
        let root = self.root.as_ref()?;
        let mut best: Option<RayHit> = None;
        self.intersect_node(root, ray, max_distance, skip, &mut best);
        best
    }

    fn intersect_node(
        &self,
        node: &BvhNode,
        ray: &Ray,
        max_distance: f32,
        skip: Option<TriangleIndex>,
        best: &mut Option<RayHit>,
    ) {
        let limit = best.map_or(max_distance, |h| h.distance);
        if node.aabb().intersect_ray(ray, limit).is_none() {
            return;
        }
        match node {
            BvhNode::Leaf { triangles, .. } => {
                for &slot in triangles {
                    let scene_t = self.scene_index[slot as usize];
                    if skip == Some(scene_t) {
                        continue;
                    }
                    let limit = best.map_or(max_distance, |h| h.distance);
                    if let Some((t, u, v, front)) =
                        self.triangles[slot as usize].intersect(ray, limit)
                    {
                        *best = Some(RayHit {
                            distance: t,
                            triangle: scene_t,
                            barycentric: (u, v),
                            point: ray.at(t),
                            front_side: front,
                        });
                    }
                }
            }
            BvhNode::Internal { left, right, .. } => {
                // Visit the child whose box is entered first
                let limit = best.map_or(max_distance, |h| h.distance);
                let dl = left.aabb().intersect_ray(ray, limit);
                let dr = right.aabb().intersect_ray(ray, limit);
                match (dl, dr) {
                    (Some(a), Some(b)) if a <= b => {
                        self.intersect_node(left, ray, max_distance, skip, best);
                        self.intersect_node(right, ray, max_distance, skip, best);
                    }
                    (Some(_), Some(_)) => {
                        self.intersect_node(right, ray, max_distance, skip, best);
                        self.intersect_node(left, ray, max_distance, skip, best);
                    }
                    (Some(_), None) => self.intersect_node(left, ray, max_distance, skip, best),
                    (None, Some(_)) => self.intersect_node(right, ray, max_distance, skip, best),
                    (None, None) => {}
                }
            }
        }
    }

    /// Whether any surface lies between two points (for shadow rays);
    /// opaque occluders only, transmittance is the caller's business
    pub fn occluded(&self, from: Vec3, to: Vec3, skip: Option<TriangleIndex>) -> bool {
        let delta = to - from;
        let distance = delta.length();
        if distance <= RAY_EPSILON {
            return false;
        }
        let ray = Ray::new(from, delta);
        self.intersect(&ray, distance - RAY_EPSILON, skip).is_some()
    }

    /// Number of triangles inserted into the BVH
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }
}
