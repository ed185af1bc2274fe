//! Packed solver: precomputed factor tables for realtime replay
//!
//! The progressive solver measures form factors with rays; packing
//! freezes those factors (plus the interpolation graph) into flat
//! shard-partitioned tables that a lightweight runtime replays with no
//! ray casting at all. Tables round-trip through a checksummed binary
//! file so the precompute can run offline.

pub mod builder;
pub mod file;
pub mod runtime;

pub use builder::pack;
pub use file::{
    load_packed, read_header, save_packed, FileError, PackedHeader, PackedSolverFile,
};
pub use runtime::{PackedSolver, Threading, BESTS};
