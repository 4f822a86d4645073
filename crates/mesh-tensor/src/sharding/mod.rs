//! Mesh description and per-tensor partition metadata.

mod mesh;
mod registry;
mod spec;
mod tile;

pub use mesh::*;
pub use registry::*;
pub use spec::*;
pub use tile::*;
