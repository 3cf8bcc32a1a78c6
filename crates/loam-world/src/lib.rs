//! World sizing, chunk addressing, and deterministic voxel sampling.
#![forbid(unsafe_code)]

pub mod coord;
pub mod worldgen;

pub use coord::{ChunkCoord, FACE_OFFSETS};
pub use worldgen::{GenCtx, World, WorldGenMode, WorldGenParams, load_params_from_path};
