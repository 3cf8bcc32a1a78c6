//! Block definitions and the id/name registry.
#![forbid(unsafe_code)]

pub mod config;
pub mod registry;

pub use config::{BlockDef, BlocksConfig};
pub use registry::{AIR, BlockId, BlockRegistry, BlockType};
