use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::HashMap;
use serde_json::{Map, Value};

use super::{PartitionInfo, SchemaViolation};
use crate::tensor::{MeshBuffer, StorageId};
use crate::{BufferRole, MeshTensorError};

/// Immutable view of every registered partition entry, keyed by storage.
pub type RegistrySnapshot = Arc<HashMap<StorageId, PartitionInfo>>;

/// Records the partition metadata of every tensor handle of one compilation unit.
///
/// The registry is only ever replaced as a whole: [`annotate`](Self::annotate) validates the
/// complete new mapping first and swaps it in afterwards, so a failed call leaves the previous
/// mapping untouched and a successful one drops every entry it does not mention.
#[derive(Clone, Debug, Default)]
pub struct PartitionRegistry {
    entries: RegistrySnapshot,
}

impl PartitionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the registry with raw metadata for each buffer.
    ///
    /// Every value must be a mapping holding `block_shape`, `program_id` and `sharding`, with
    /// a block shape of the buffer's rank. The first invalid entry rejects the whole call.
    pub fn annotate<'a, B, I>(&mut self, entries: I) -> Result<AnnotationToken, MeshTensorError>
    where
        B: MeshBuffer + 'a,
        I: IntoIterator<Item = (&'a B, &'a Value)>,
    {
        let parsed = entries
            .into_iter()
            .enumerate()
            .map(|(entry, (buffer, raw))| {
                PartitionInfo::from_value(raw)
                    .map(|info| (buffer, info))
                    .map_err(|reason| schema_error(entry, buffer, reason))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.annotate_infos(parsed)
    }

    /// Replaces the registry with already validated metadata for each buffer.
    ///
    /// Only the block shape rank is checked against the buffer's rank.
    pub fn annotate_infos<'a, B, I>(
        &mut self,
        entries: I,
    ) -> Result<AnnotationToken, MeshTensorError>
    where
        B: MeshBuffer + 'a,
        I: IntoIterator<Item = (&'a B, PartitionInfo)>,
    {
        let mut mapping = HashMap::new();
        for (entry, (buffer, info)) in entries.into_iter().enumerate() {
            let rank = buffer.shape().len();
            if info.rank() != rank {
                return Err(schema_error(
                    entry,
                    buffer,
                    SchemaViolation::RankMismatch {
                        block_rank: info.rank(),
                        rank,
                    },
                ));
            }
            mapping.insert(buffer.storage_id(), info);
        }

        log::debug!(
            "Replacing mesh tensor registry: {} entries dropped, {} registered",
            self.entries.len(),
            mapping.len()
        );
        self.entries = Arc::new(mapping);

        Ok(AnnotationToken {
            entries: self.entries.clone(),
        })
    }

    /// Partition metadata registered for `storage`.
    pub fn get(&self, storage: StorageId) -> Option<&PartitionInfo> {
        self.entries.get(&storage)
    }

    /// Partition metadata registered for `buffer`'s storage.
    pub fn lookup<B: MeshBuffer>(
        &self,
        buffer: &B,
        role: BufferRole,
    ) -> Result<&PartitionInfo, MeshTensorError> {
        self.get(buffer.storage_id())
            .ok_or_else(|| MeshTensorError::NotFound {
                buffer: buffer.name().to_string(),
                role,
            })
    }

    /// Whether `storage` has registered metadata.
    pub fn contains(&self, storage: StorageId) -> bool {
        self.entries.contains_key(&storage)
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The current mapping; later annotations do not affect it.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.entries.clone()
    }
}

fn schema_error<B: MeshBuffer>(
    entry: usize,
    buffer: &B,
    reason: SchemaViolation,
) -> MeshTensorError {
    MeshTensorError::Schema {
        entry,
        buffer: buffer.name().to_string(),
        reason,
    }
}

/// Opaque attribute produced by a successful annotation.
///
/// The token is meant to be attached to the compiled function the metadata belongs to. It
/// keeps the exact registry contents it was created from.
#[derive(Clone, Debug)]
pub struct AnnotationToken {
    entries: RegistrySnapshot,
}

impl AnnotationToken {
    /// Function attribute key the metadata is published under.
    pub const ATTR_KEY: &'static str = "mesh_tensor_info";

    /// Metadata carried by the token for `storage`.
    pub fn get(&self, storage: StorageId) -> Option<&PartitionInfo> {
        self.entries.get(&storage)
    }

    /// Number of entries carried by the token.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the token carries no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the token as a function attribute.
    ///
    /// The result has the form `{"mesh_tensor_info": {"<storage id>": {<metadata>}}}`.
    pub fn to_attr(&self) -> Value {
        let infos = self
            .entries
            .iter()
            .map(|(storage, info)| (storage.value().to_string(), info.to_value()))
            .collect::<Map<_, _>>();

        let mut attr = Map::new();
        attr.insert(Self::ATTR_KEY.to_string(), Value::Object(infos));
        Value::Object(attr)
    }
}
