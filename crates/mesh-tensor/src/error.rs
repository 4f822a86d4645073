use alloc::string::String;
use core::fmt;

use crate::sharding::{MeshAxis, MeshConfigError, SchemaViolation};

/// Which handle of an operation an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferRole {
    /// The single handle of a lookup or tile shape computation.
    Tensor,
    /// The source of a block-addressed copy.
    Source,
    /// The destination of a block-addressed copy.
    Destination,
}

impl fmt::Display for BufferRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferRole::Tensor => f.write_str("tensor"),
            BufferRole::Source => f.write_str("source"),
            BufferRole::Destination => f.write_str("destination"),
        }
    }
}

/// Errors raised by shape and offset arithmetic.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    /// A block coordinate does not have one entry per block shape dimension.
    #[error("{role} block coordinate rank {coord_rank} differs from block rank {block_rank}")]
    BlockRankMismatch {
        /// The handle the coordinate addresses.
        role: BufferRole,
        /// Length of the coordinate.
        coord_rank: usize,
        /// Length of the registered block shape.
        block_rank: usize,
    },
    /// A sharded dimension does not exist in the global shape.
    #[error("mesh axis '{axis}' shards dimension {dim}, but the global shape has rank {rank}")]
    DimensionOutOfRange {
        /// The mesh axis.
        axis: MeshAxis,
        /// The sharded dimension.
        dim: usize,
        /// Rank of the global shape.
        rank: usize,
    },
    /// A block coordinate times its block extent does not fit in `usize`.
    #[error("{role} block coordinate {coord} times extent {extent} overflows in dimension {dim}")]
    OffsetOverflow {
        /// The handle the coordinate addresses.
        role: BufferRole,
        /// The dimension.
        dim: usize,
        /// The block coordinate.
        coord: usize,
        /// The block extent.
        extent: usize,
    },
}

/// Broad category of a [`MeshTensorError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid mesh configuration.
    Config,
    /// Malformed partition metadata.
    Schema,
    /// No partition metadata registered for a handle.
    NotFound,
    /// Inconsistent shapes or coordinates.
    Shape,
}

/// Errors raised by mesh tensor bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MeshTensorError {
    /// The mesh configuration is invalid.
    #[error(transparent)]
    Config(#[from] MeshConfigError),
    /// A partition metadata entry was rejected.
    #[error("invalid mesh tensor info for buffer '{buffer}' (entry {entry}): {reason}")]
    Schema {
        /// Position of the entry in the annotation input.
        entry: usize,
        /// Name of the buffer the entry describes.
        buffer: String,
        /// What is wrong with the entry.
        reason: SchemaViolation,
    },
    /// No partition metadata is registered for a buffer.
    #[error("mesh tensor info for {role} buffer '{buffer}' not found")]
    NotFound {
        /// Name of the buffer.
        buffer: String,
        /// Which handle of the operation it was.
        role: BufferRole,
    },
    /// Shapes or coordinates do not line up.
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

impl MeshTensorError {
    /// Broad category of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MeshTensorError::Config(_) => ErrorKind::Config,
            MeshTensorError::Schema { .. } => ErrorKind::Schema,
            MeshTensorError::NotFound { .. } => ErrorKind::NotFound,
            MeshTensorError::Shape(_) => ErrorKind::Shape,
        }
    }
}
