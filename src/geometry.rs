//! Geometry adapter boundary
//!
//! The solver does not own scene geometry. It consumes it through the
//! [`SceneGeometry`] trait: indexed triangles in one coordinate/scale
//! space, a per-triangle material lookup and a per-triangle direct
//! irradiance query. [`TriangleMesh`] is the concrete adapter used by
//! hosts and tests.

use glam::Vec3;
use thiserror::Error;

use crate::material::Material;

/// Errors reported when attaching geometry
#[derive(Error, Debug)]
pub enum GeometryError {
    /// Scene contains no triangles at all
    #[error("geometry is empty: no triangles")]
    Empty,

    /// An index references a vertex that does not exist
    #[error("triangle {triangle} references vertex {vertex} out of {count}")]
    VertexOutOfRange {
        /// Offending triangle
        triangle: usize,
        /// Offending vertex index
        vertex: u32,
        /// Number of vertices present
        count: usize,
    },

    /// A triangle references a material slot that does not exist
    #[error("triangle {triangle} references material {material} out of {count}")]
    MaterialOutOfRange {
        /// Offending triangle
        triangle: usize,
        /// Offending material slot
        material: u32,
        /// Number of materials present
        count: usize,
    },
}

/// Read-only view of a static triangle scene
///
/// Implementations must be consistent for the lifetime of any solver
/// attached to them: same triangle count, same positions, same
/// materials. Direct irradiance is the only part expected to change
/// between solver resets.
pub trait SceneGeometry: Sync {
    /// Number of triangles in the scene
    fn triangle_count(&self) -> usize;

    /// Number of shared vertices
    fn vertex_count(&self) -> usize;

    /// Vertex indices of a triangle
    fn triangle_indices(&self, triangle: usize) -> [u32; 3];

    /// Position of a shared vertex
    fn vertex_position(&self, vertex: usize) -> Vec3;

    /// World-space corner positions of a triangle
    fn triangle_vertices(&self, triangle: usize) -> [Vec3; 3] {
        let idx = self.triangle_indices(triangle);
        [
            self.vertex_position(idx[0] as usize),
            self.vertex_position(idx[1] as usize),
            self.vertex_position(idx[2] as usize),
        ]
    }

    /// Material of a triangle, `None` for inert faces
    fn material(&self, triangle: usize) -> Option<&Material>;

    /// Current direct irradiance on a triangle (W/m^2, linear RGB)
    ///
    /// Read by the packed solver on `illumination_reset`. Adapters
    /// without dynamic lighting return zero.
    fn direct_irradiance(&self, triangle: usize) -> Vec3 {
        let _ = triangle;
        Vec3::ZERO
    }
}

/// Derived per-triangle geometry: normal, area, centroid
#[derive(Debug, Clone, Copy)]
pub struct TrianglePlane {
    /// Unit face normal (zero for degenerate triangles)
    pub normal: Vec3,
    /// Surface area (zero for degenerate triangles)
    pub area: f32,
    /// Centroid
    pub centroid: Vec3,
}

impl TrianglePlane {
    /// Compute plane data from corner positions
    pub fn from_vertices(v: &[Vec3; 3]) -> Self {
        let cross = (v[1] - v[0]).cross(v[2] - v[0]);
        let double_area = cross.length();
        TrianglePlane {
            normal: if double_area > 0.0 {
                cross / double_area
            } else {
                Vec3::ZERO
            },
            area: double_area * 0.5,
            centroid: (v[0] + v[1] + v[2]) / 3.0,
        }
    }

    /// Degenerate triangles never take part in energy transport
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.area <= 0.0
    }
}

/// Concrete indexed triangle mesh with per-triangle material slots
#[derive(Debug, Clone)]
pub struct TriangleMesh {
    vertices: Vec<Vec3>,
    indices: Vec<[u32; 3]>,
    materials: Vec<Material>,
    material_slots: Vec<u32>,
    direct_irradiance: Vec<Vec3>,
}

impl TriangleMesh {
    /// Build a mesh and validate all indices eagerly
    ///
    /// `material_slots[t]` selects the material of triangle `t` from
    /// `materials`. Degenerate triangles are accepted here (they are
    /// marked inert later by the solver), but an empty scene and
    /// out-of-range indices are rejected.
    pub fn new(
        vertices: Vec<Vec3>,
        indices: Vec<[u32; 3]>,
        materials: Vec<Material>,
        material_slots: Vec<u32>,
    ) -> Result<Self, GeometryError> {
        if indices.is_empty() {
            return Err(GeometryError::Empty);
        }
        for (t, tri) in indices.iter().enumerate() {
            for &v in tri {
                if v as usize >= vertices.len() {
                    return Err(GeometryError::VertexOutOfRange {
                        triangle: t,
                        vertex: v,
                        count: vertices.len(),
                    });
                }
            }
        }
        for (t, &slot) in material_slots.iter().enumerate() {
            if slot as usize >= materials.len() {
                return Err(GeometryError::MaterialOutOfRange {
                    triangle: t,
                    material: slot,
                    count: materials.len(),
                });
            }
        }
        let triangle_count = indices.len();
        Ok(TriangleMesh {
            vertices,
            indices,
            materials,
            material_slots,
            direct_irradiance: vec![Vec3::ZERO; triangle_count],
        })
    }

    /// Set the direct irradiance reported for one triangle
    pub fn set_direct_irradiance(&mut self, triangle: usize, irradiance: Vec3) {
        if let Some(slot) = self.direct_irradiance.get_mut(triangle) {
            *slot = irradiance;
        }
    }

    /// Replace direct irradiance for all triangles
    pub fn set_all_direct_irradiance(&mut self, irradiance: &[Vec3]) {
        for (slot, &value) in self.direct_irradiance.iter_mut().zip(irradiance) {
            *slot = value;
        }
    }

    /// Materials owned by this mesh
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }
}

impl SceneGeometry for TriangleMesh {
    fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    fn triangle_indices(&self, triangle: usize) -> [u32; 3] {
        self.indices[triangle]
    }

    fn vertex_position(&self, vertex: usize) -> Vec3 {
        self.vertices[vertex]
    }

    fn material(&self, triangle: usize) -> Option<&Material> {
        let slot = *self.material_slots.get(triangle)?;
        self.materials.get(slot as usize)
    }

    fn direct_irradiance(&self, triangle: usize) -> Vec3 {
        self.direct_irradiance
            .get(triangle)
            .copied()
            .unwrap_or(Vec3::ZERO)
    }
}

/// Barycentric interpolation helper shared by the sampling code
#[inline]
pub fn barycentric_point(v: &[Vec3; 3], u: f32, w: f32) -> Vec3 {
    v[0] * (1.0 - u - w) + v[1] * u + v[2] * w
}
