use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::Serialize;
use serde_json::{Map, Value};

use super::MeshAxis;

/// Key holding the per-dimension block extents in raw partition metadata.
pub const BLOCK_SHAPE_KEY: &str = "block_shape";
/// Key holding the producing program identifier in raw partition metadata.
pub const PROGRAM_ID_KEY: &str = "program_id";
/// Key holding the mesh-axis to tensor-dimension map in raw partition metadata.
pub const SHARDING_KEY: &str = "sharding";

/// Specifies how a single tensor dimension is distributed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DimDistribution {
    /// Dimension is sharded across a specific mesh axis.
    Sharded(MeshAxis),
    /// Dimension is replicated (not sharded).
    Replicated,
}

/// Reasons a partition metadata entry is rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchemaViolation {
    /// The entry is not a mapping.
    #[error("expected a mapping, got {0}")]
    NotAMapping(String),
    /// A required key is absent.
    #[error("missing required key '{0}'")]
    MissingKey(&'static str),
    /// `block_shape` is not a non-empty list of positive integers.
    #[error("'block_shape' must be a non-empty list of positive integers, got {0}")]
    InvalidBlockShape(String),
    /// `sharding` is not a mapping with exactly the keys `"x"` and `"y"` holding integers.
    #[error("'sharding' must map exactly 'x' and 'y' to dimension indices, got {0}")]
    InvalidSharding(String),
    /// A sharded dimension does not exist in the tensor.
    #[error("mesh axis '{axis}' is mapped to dimension {dim}, but the tensor has rank {rank}")]
    DimensionOutOfRange {
        /// The mesh axis whose mapping is invalid.
        axis: MeshAxis,
        /// The mapped tensor dimension.
        dim: usize,
        /// The tensor rank.
        rank: usize,
    },
    /// Both mesh axes are mapped to the same tensor dimension.
    #[error("mesh axes 'x' and 'y' are both mapped to dimension {0}")]
    AxisCollision(usize),
    /// The block shape does not have one entry per tensor dimension.
    #[error("'block_shape' has {block_rank} dimension(s), but the tensor has rank {rank}")]
    RankMismatch {
        /// Length of the block shape.
        block_rank: usize,
        /// The tensor rank.
        rank: usize,
    },
}

/// Maps each mesh axis to the tensor dimension split along it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ShardingAxisMap {
    /// Tensor dimension split along the `"x"` axis.
    x: usize,
    /// Tensor dimension split along the `"y"` axis.
    y: usize,
}

impl ShardingAxisMap {
    /// Creates a map sharding dimension `x` along the `"x"` axis and `y` along `"y"`.
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// The tensor dimension split along `axis`.
    pub fn dim(&self, axis: MeshAxis) -> usize {
        match axis {
            MeshAxis::X => self.x,
            MeshAxis::Y => self.y,
        }
    }

    /// The mesh axis splitting tensor dimension `dim`, if any.
    pub fn axis_of(&self, dim: usize) -> Option<MeshAxis> {
        MeshAxis::ALL.into_iter().find(|&axis| self.dim(axis) == dim)
    }

    fn from_value(value: &Value) -> Result<Self, SchemaViolation> {
        let invalid = || SchemaViolation::InvalidSharding(value.to_string());
        let map = value.as_object().ok_or_else(invalid)?;
        if map.len() != MeshAxis::ALL.len() {
            return Err(invalid());
        }

        let dim = |axis: MeshAxis| {
            map.get(axis.name())
                .and_then(Value::as_u64)
                .and_then(|dim| usize::try_from(dim).ok())
                .ok_or_else(invalid)
        };

        Ok(Self::new(dim(MeshAxis::X)?, dim(MeshAxis::Y)?))
    }
}

/// Describes how one tensor is partitioned across the device mesh.
///
/// A `PartitionInfo` records the block shape used to turn block coordinates into element
/// offsets, which tensor dimension is split along each mesh axis, and the identifier of the
/// program that produced the metadata. Keys this crate does not understand are kept verbatim
/// in an opaque side channel and emitted again when the metadata is serialized.
///
/// Instances are validated on construction and never change afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PartitionInfo {
    /// Element extent of one partition block, per tensor dimension.
    block_shape: Vec<usize>,
    /// Identifier of the program (rank) the metadata belongs to, never interpreted.
    program_id: Value,
    /// Tensor dimension split along each mesh axis.
    sharding: ShardingAxisMap,
    /// Caller-defined metadata transported unchanged.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl PartitionInfo {
    /// Creates a new [`PartitionInfo`], validating the block shape against the sharding map.
    ///
    /// The block shape determines the tensor rank: it must hold one positive extent per
    /// dimension, both sharded dimensions must lie below that rank, and the two mesh axes
    /// must split different dimensions.
    pub fn new<S: Into<Vec<usize>>, P: Into<Value>>(
        block_shape: S,
        sharding: ShardingAxisMap,
        program_id: P,
    ) -> Result<Self, SchemaViolation> {
        let block_shape = block_shape.into();
        if block_shape.is_empty() || block_shape.contains(&0) {
            return Err(SchemaViolation::InvalidBlockShape(alloc::format!(
                "{block_shape:?}"
            )));
        }

        let rank = block_shape.len();
        for axis in MeshAxis::ALL {
            let dim = sharding.dim(axis);
            if dim >= rank {
                return Err(SchemaViolation::DimensionOutOfRange { axis, dim, rank });
            }
        }

        if sharding.x == sharding.y {
            return Err(SchemaViolation::AxisCollision(sharding.x));
        }

        Ok(Self {
            block_shape,
            program_id: program_id.into(),
            sharding,
            extra: Map::new(),
        })
    }

    /// Attaches caller-defined metadata that is transported without interpretation.
    ///
    /// Keys colliding with `block_shape`, `program_id` or `sharding` are dropped.
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra
            .into_iter()
            .filter(|(key, _)| !is_reserved_key(key))
            .collect();
        self
    }

    /// Parses and validates raw partition metadata.
    ///
    /// The value must be a mapping holding at least `block_shape`, `program_id` and
    /// `sharding`; every other key is preserved as opaque metadata.
    pub fn from_value(value: &Value) -> Result<Self, SchemaViolation> {
        let map = value
            .as_object()
            .ok_or_else(|| SchemaViolation::NotAMapping(value.to_string()))?;

        let field = |key: &'static str| map.get(key).ok_or(SchemaViolation::MissingKey(key));
        let block_shape = field(BLOCK_SHAPE_KEY)?;
        let program_id = field(PROGRAM_ID_KEY)?;
        let sharding = field(SHARDING_KEY)?;

        let block_shape = block_shape
            .as_array()
            .and_then(|dims| {
                dims.iter()
                    .map(|dim| dim.as_u64().and_then(|dim| usize::try_from(dim).ok()))
                    .collect::<Option<Vec<_>>>()
            })
            .ok_or_else(|| SchemaViolation::InvalidBlockShape(block_shape.to_string()))?;
        let sharding = ShardingAxisMap::from_value(sharding)?;

        let extra = map
            .iter()
            .filter(|(key, _)| !is_reserved_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self::new(block_shape, sharding, program_id.clone())?.with_extra(extra))
    }

    /// Element extent of one partition block, per tensor dimension.
    pub fn block_shape(&self) -> &[usize] {
        &self.block_shape
    }

    /// Tensor rank described by this metadata.
    pub fn rank(&self) -> usize {
        self.block_shape.len()
    }

    /// Identifier of the program the metadata belongs to, as supplied.
    pub fn program_id(&self) -> &Value {
        &self.program_id
    }

    /// Tensor dimension split along each mesh axis.
    pub fn sharding(&self) -> &ShardingAxisMap {
        &self.sharding
    }

    /// Caller-defined metadata carried alongside the partition description.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// How tensor dimension `dim` is distributed across the mesh.
    pub fn dim_distribution(&self, dim: usize) -> DimDistribution {
        match self.sharding.axis_of(dim) {
            Some(axis) => DimDistribution::Sharded(axis),
            None => DimDistribution::Replicated,
        }
    }

    /// Renders the metadata back into its raw mapping form.
    pub fn to_value(&self) -> Value {
        // Serializing plain integers, lists and string-keyed maps cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn is_reserved_key(key: &str) -> bool {
    matches!(key, BLOCK_SHAPE_KEY | PROGRAM_ID_KEY | SHARDING_KEY)
}
