//! # ember-gi
//!
//! Global-illumination light transport for triangle scenes.
//!
//! Three cooperating engines share one energy model:
//!
//! - **Progressive radiosity**: a shooting solver that lazily measures
//!   form factors with stratified hemisphere rays and redistributes
//!   unshot energy, refining forever and readable at any moment.
//! - **Packed replay**: the measured factors frozen into flat,
//!   shard-partitioned tables (saved as a checksummed binary file) and
//!   replayed with no ray casting, single- or multi-threaded.
//! - **Final gather**: a per-ray radiance query that traces specular
//!   chains exactly and reads the diffuse component from either solver.
//!
//! A vertex-smoothing interpolation graph turns the per-triangle
//! results into continuous per-vertex lighting.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ember_gi::prelude::*;
//!
//! let mesh = TriangleMesh::new(vertices, indices, materials, slots)?;
//! let collider = Collider::build(&mesh);
//! let mut scene = ProgressiveScene::new(&mesh);
//!
//! scene.reset(true, true, &DirectIrradiance::FloatRgb(&direct))?;
//! scene.improve(&collider, || start.elapsed() > budget);
//!
//! let exitance = scene.triangle(0).exitance();
//! ```

#![warn(missing_docs)]

pub mod collider;
pub mod gather;
pub mod geometry;
pub mod material;
pub mod packed;
pub mod radiosity;
pub mod smoothing;
pub mod types;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude - commonly used types and functions
pub mod prelude {
    pub use crate::collider::Collider;
    pub use crate::gather::{
        render_rows, ConstantEnvironment, Environment, GatherQuality, Gatherer, Light,
        SkyEnvironment, SolverRead,
    };
    pub use crate::geometry::{GeometryError, SceneGeometry, TriangleMesh, TrianglePlane};
    pub use crate::material::Material;
    pub use crate::packed::{
        load_packed, pack, read_header, save_packed, FileError, PackedSolver, PackedSolverFile,
        Threading,
    };
    pub use crate::radiosity::{
        ConsistencyReport, DirectIrradiance, ImproveStatus, ProgressiveScene, ScaleTable,
        SceneStats, SolverError,
    };
    pub use crate::smoothing::{InterpolationGraph, NodeHandle, SmoothingConfig};
    pub use crate::types::{energy_sum, Aabb, Ray, RayHit, TriangleIndex};
    pub use glam::Vec3;
}

// Re-exports for convenience
pub use collider::Collider;
pub use geometry::TriangleMesh;
pub use packed::PackedSolver;
pub use radiosity::ProgressiveScene;
