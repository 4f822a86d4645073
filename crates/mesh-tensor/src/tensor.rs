use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use portable_atomic::{AtomicU64, Ordering};

/// Stable identity of the storage backing a tensor handle.
///
/// Partition metadata is keyed by storage rather than by handle, so two views over the same
/// storage resolve to the same entry.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct StorageId(u64);

impl StorageId {
    /// Wraps an identity assigned by the caller.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates an identity that no other call to `fresh` returns.
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw identity value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "storage#{}", self.0)
    }
}

/// A handle to a mesh-distributed tensor, as seen by partition bookkeeping.
///
/// Implementors expose the identity of their storage, their shape, and a way to build the
/// region descriptor handed to a [`CopyPrimitive`], either for the whole tensor or starting
/// at an element offset.
pub trait MeshBuffer {
    /// View passed to the copy primitive.
    type Region;

    /// Identity of the underlying storage.
    fn storage_id(&self) -> StorageId;

    /// Human readable name used in error messages.
    fn name(&self) -> &str;

    /// Global shape of the tensor.
    fn shape(&self) -> &[usize];

    /// The whole tensor as a region.
    fn whole(&self) -> Self::Region;

    /// The region starting at element offset `origin`.
    ///
    /// No bounds checking is expected here; the copy primitive enforces its own.
    fn region_at(&self, origin: &[usize]) -> Self::Region;
}

/// The transfer operation a block-addressed copy delegates to.
///
/// The meaning of `Output` belongs to the implementor; it is returned to the caller untouched.
pub trait CopyPrimitive<S, D> {
    /// Result of one copy.
    type Output;

    /// Copies `src` into `dst`.
    fn copy(&mut self, src: S, dst: D) -> Self::Output;
}

impl<S, D, O, F> CopyPrimitive<S, D> for F
where
    F: FnMut(S, D) -> O,
{
    type Output = O;

    fn copy(&mut self, src: S, dst: D) -> O {
        self(src, dst)
    }
}

/// Metadata-only handle to a mesh-distributed tensor.
///
/// A `TensorBuffer` owns no data: it names a storage, and describes the global shape under
/// which that storage is viewed. [`TensorBuffer::view`] creates a differently shaped handle
/// over the same storage, which shares partition metadata with the original.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorBuffer {
    /// Name used in diagnostics.
    name: String,
    /// Identity of the backing storage.
    storage: StorageId,
    /// Global shape of the tensor (across all devices).
    shape: Vec<usize>,
}

impl TensorBuffer {
    /// Creates a handle backed by fresh storage.
    pub fn new<N: Into<String>, S: Into<Vec<usize>>>(name: N, shape: S) -> Self {
        Self::with_storage(name, StorageId::fresh(), shape)
    }

    /// Creates a handle backed by an existing storage.
    pub fn with_storage<N: Into<String>, S: Into<Vec<usize>>>(
        name: N,
        storage: StorageId,
        shape: S,
    ) -> Self {
        Self {
            name: name.into(),
            storage,
            shape: shape.into(),
        }
    }

    /// Creates another handle over the same storage.
    pub fn view<N: Into<String>, S: Into<Vec<usize>>>(&self, name: N, shape: S) -> Self {
        Self::with_storage(name, self.storage, shape)
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

impl MeshBuffer for TensorBuffer {
    type Region = BufferRegion;

    fn storage_id(&self) -> StorageId {
        self.storage
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn whole(&self) -> BufferRegion {
        BufferRegion {
            buffer: self.clone(),
            origin: None,
        }
    }

    fn region_at(&self, origin: &[usize]) -> BufferRegion {
        BufferRegion {
            buffer: self.clone(),
            origin: Some(origin.to_vec()),
        }
    }
}

/// A [`TensorBuffer`], either whole or addressed from an element offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferRegion {
    buffer: TensorBuffer,
    origin: Option<Vec<usize>>,
}

impl BufferRegion {
    /// The buffer this region belongs to.
    pub fn buffer(&self) -> &TensorBuffer {
        &self.buffer
    }

    /// Element offset the region starts at, `None` for the whole tensor.
    pub fn origin(&self) -> Option<&[usize]> {
        self.origin.as_deref()
    }

    /// Whether the region covers the whole tensor.
    pub fn is_whole(&self) -> bool {
        self.origin.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_storage_ids_are_unique() {
        let a = TensorBuffer::new("a", [4, 4]);
        let b = TensorBuffer::new("b", [4, 4]);

        assert_ne!(a.storage_id(), b.storage_id());
    }

    #[test]
    fn test_views_share_storage() {
        let a = TensorBuffer::new("a", [8, 8]);
        let flat = a.view("a_flat", [64]);

        assert_eq!(flat.storage_id(), a.storage_id());
        assert_eq!(flat.rank(), 1);
        assert_eq!(flat.name(), "a_flat");
    }

    #[test]
    fn test_regions() {
        let a = TensorBuffer::with_storage("a", StorageId::new(7), [8, 8]);

        assert!(a.whole().is_whole());
        assert_eq!(a.region_at(&[2, 4]).origin(), Some(&[2, 4][..]));
        assert_eq!(a.region_at(&[2, 4]).buffer(), &a);
        assert_eq!(a.storage_id().to_string(), "storage#7");
    }

    #[test]
    fn test_closure_copy_primitive() {
        let a = TensorBuffer::new("a", [2]);
        let b = TensorBuffer::new("b", [2]);
        let mut copier = |src: BufferRegion, dst: BufferRegion| (src.is_whole(), dst.is_whole());

        assert_eq!(copier.copy(a.whole(), b.region_at(&[1])), (true, false));
    }
}
