//! Progressive radiosity solver
//!
//! The solver owns per-triangle energy accumulators and a sparse
//! form-factor matrix measured lazily by shooting stratified hemisphere
//! rays. Hosts drive it with [`ProgressiveScene::reset`] followed by
//! repeated [`ProgressiveScene::improve`] calls; results are read back
//! per triangle as exitance or direct/indirect irradiance.

pub mod diagnostics;
pub mod sampler;
pub mod scene;
pub mod triangle;

pub use diagnostics::ConsistencyReport;
pub use scene::{
    DirectIrradiance, ImproveStatus, ProgressiveScene, ScaleTable, SceneStats, SolverError,
};
pub use triangle::{FormFactor, SolverTriangle};
