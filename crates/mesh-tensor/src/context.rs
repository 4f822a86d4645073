use alloc::vec::Vec;

use serde_json::Value;

use crate::sharding::{self, AnnotationToken, MeshDescriptor, PartitionInfo, PartitionRegistry};
use crate::tensor::{CopyPrimitive, MeshBuffer};
use crate::{BufferRole, MeshTensorError, ShapeError};

/// Owns the device mesh and the partition registry of one compilation unit.
///
/// All mesh tensor operations go through a `MeshContext`: annotate the handles of a
/// compiled function once, then query tile shapes and issue block-addressed copies against
/// the registered metadata.
///
/// # Example
///
/// ```rust
/// use mesh_tensor::{MeshContext, TensorBuffer};
/// use serde_json::json;
///
/// let mut ctx = MeshContext::from_config(&json!({"x": 2, "y": 4})).unwrap();
/// let a = TensorBuffer::new("a", [128, 256]);
/// let info = json!({"block_shape": [16, 16], "program_id": 0, "sharding": {"x": 0, "y": 1}});
///
/// ctx.annotate([(&a, &info)]).unwrap();
///
/// assert_eq!(ctx.tile_shape(&a).unwrap(), vec![64, 64]);
/// assert_eq!(ctx.block_offset(&a, &[2, 3]).unwrap(), vec![32, 48]);
/// ```
#[derive(Clone, Debug)]
pub struct MeshContext {
    mesh: MeshDescriptor,
    registry: PartitionRegistry,
}

impl MeshContext {
    /// Creates a context over `mesh` with an empty registry.
    pub fn new(mesh: MeshDescriptor) -> Self {
        Self {
            mesh,
            registry: PartitionRegistry::new(),
        }
    }

    /// Creates a context from a mesh configuration value.
    pub fn from_config(config: &Value) -> Result<Self, MeshTensorError> {
        Ok(Self::new(MeshDescriptor::from_config(config)?))
    }

    /// The device mesh.
    pub fn mesh(&self) -> &MeshDescriptor {
        &self.mesh
    }

    /// The partition registry.
    pub fn registry(&self) -> &PartitionRegistry {
        &self.registry
    }

    /// Replaces all partition metadata with the raw entries given.
    ///
    /// See [`PartitionRegistry::annotate`].
    pub fn annotate<'a, B, I>(&mut self, entries: I) -> Result<AnnotationToken, MeshTensorError>
    where
        B: MeshBuffer + 'a,
        I: IntoIterator<Item = (&'a B, &'a Value)>,
    {
        self.registry.annotate(entries)
    }

    /// Replaces all partition metadata with the validated entries given.
    ///
    /// See [`PartitionRegistry::annotate_infos`].
    pub fn annotate_infos<'a, B, I>(
        &mut self,
        entries: I,
    ) -> Result<AnnotationToken, MeshTensorError>
    where
        B: MeshBuffer + 'a,
        I: IntoIterator<Item = (&'a B, PartitionInfo)>,
    {
        self.registry.annotate_infos(entries)
    }

    /// Partition metadata registered for `buffer`.
    pub fn lookup<B: MeshBuffer>(&self, buffer: &B) -> Result<&PartitionInfo, MeshTensorError> {
        self.registry.lookup(buffer, BufferRole::Tensor)
    }

    /// Shape of the tile each device holds for `buffer`, using the buffer's own shape as the
    /// global shape.
    pub fn tile_shape<B: MeshBuffer>(&self, buffer: &B) -> Result<Vec<usize>, MeshTensorError> {
        self.tile_shape_for(buffer, buffer.shape())
    }

    /// Shape of the tile each device holds for `buffer` when its global shape is
    /// `global_shape`.
    pub fn tile_shape_for<B: MeshBuffer>(
        &self,
        buffer: &B,
        global_shape: &[usize],
    ) -> Result<Vec<usize>, MeshTensorError> {
        let info = self.lookup(buffer)?;
        let local_shape = sharding::tile_shape(&self.mesh, info, global_shape)?;

        log::trace!(
            "Tile shape of '{}': {:?} -> {:?}",
            buffer.name(),
            global_shape,
            local_shape
        );
        Ok(local_shape)
    }

    /// Element offset of block `block_coord` of `buffer`.
    pub fn block_offset<B: MeshBuffer>(
        &self,
        buffer: &B,
        block_coord: &[usize],
    ) -> Result<Vec<usize>, MeshTensorError> {
        self.resolve_offset(buffer, block_coord, BufferRole::Tensor)
    }

    /// Copies between two mesh tensors, optionally addressed by block coordinates.
    ///
    /// When a block coordinate is given, the corresponding handle is replaced by its region
    /// starting at `block_coord * block_shape`, using the metadata registered for it.
    /// Without a coordinate, the whole tensor is used and no metadata is required. The
    /// transfer itself is done by `copier`, whose output is returned unchanged; shape
    /// compatibility and bounds are left to it.
    pub fn copy<S, D, C>(
        &self,
        copier: &mut C,
        src: &S,
        dst: &D,
        src_block_coord: Option<&[usize]>,
        dst_block_coord: Option<&[usize]>,
    ) -> Result<C::Output, MeshTensorError>
    where
        S: MeshBuffer,
        D: MeshBuffer,
        C: CopyPrimitive<S::Region, D::Region>,
    {
        let src_region = self.region(src, src_block_coord, BufferRole::Source)?;
        let dst_region = self.region(dst, dst_block_coord, BufferRole::Destination)?;

        Ok(copier.copy(src_region, dst_region))
    }

    fn region<B: MeshBuffer>(
        &self,
        buffer: &B,
        block_coord: Option<&[usize]>,
        role: BufferRole,
    ) -> Result<B::Region, MeshTensorError> {
        match block_coord {
            Some(coord) => {
                let origin = self.resolve_offset(buffer, coord, role)?;
                Ok(buffer.region_at(&origin))
            }
            None => Ok(buffer.whole()),
        }
    }

    fn resolve_offset<B: MeshBuffer>(
        &self,
        buffer: &B,
        block_coord: &[usize],
        role: BufferRole,
    ) -> Result<Vec<usize>, MeshTensorError> {
        let block_shape = self.registry.lookup(buffer, role)?.block_shape();
        if block_coord.len() != block_shape.len() {
            return Err(ShapeError::BlockRankMismatch {
                role,
                coord_rank: block_coord.len(),
                block_rank: block_shape.len(),
            }
            .into());
        }

        let offset = block_coord
            .iter()
            .zip(block_shape)
            .enumerate()
            .map(|(dim, (&coord, &extent))| {
                coord
                    .checked_mul(extent)
                    .ok_or(ShapeError::OffsetOverflow {
                        role,
                        dim,
                        coord,
                        extent,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::trace!(
            "Resolved {role} block {:?} of '{}' to element offset {:?}",
            block_coord,
            buffer.name(),
            offset
        );
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::tensor::{BufferRegion, TensorBuffer};
    use alloc::vec;
    use serde_json::json;

    /// Copy primitive recording every region it is handed.
    #[derive(Default)]
    struct RecordingCopy {
        calls: Vec<(BufferRegion, BufferRegion)>,
    }

    impl CopyPrimitive<BufferRegion, BufferRegion> for RecordingCopy {
        type Output = usize;

        fn copy(&mut self, src: BufferRegion, dst: BufferRegion) -> usize {
            self.calls.push((src, dst));
            self.calls.len()
        }
    }

    fn context() -> MeshContext {
        MeshContext::new(MeshDescriptor::new(2, 4).unwrap())
    }

    fn info(block_shape: &[usize]) -> Value {
        json!({"block_shape": block_shape, "program_id": 0, "sharding": {"x": 0, "y": 1}})
    }

    #[test]
    fn test_copy_resolves_block_coordinates() {
        let mut ctx = context();
        let src = TensorBuffer::new("src", [128, 256]);
        let dst = TensorBuffer::new("dst", [64, 64]);
        let (src_info, dst_info) = (info(&[16, 16]), info(&[8, 4]));
        ctx.annotate([(&src, &src_info), (&dst, &dst_info)]).unwrap();
        let mut copier = RecordingCopy::default();

        let out = ctx
            .copy(&mut copier, &src, &dst, Some(&[2, 3]), Some(&[1, 5]))
            .unwrap();

        assert_eq!(out, 1);
        let (src_region, dst_region) = &copier.calls[0];
        assert_eq!(src_region.origin(), Some(&[32, 48][..]));
        assert_eq!(dst_region.origin(), Some(&[8, 20][..]));
    }

    #[test]
    fn test_copy_without_coordinates_needs_no_metadata() {
        let ctx = context();
        let src = TensorBuffer::new("src", [16]);
        let dst = TensorBuffer::new("dst", [16]);
        let mut copier = RecordingCopy::default();

        ctx.copy(&mut copier, &src, &dst, None, None).unwrap();

        let (src_region, dst_region) = &copier.calls[0];
        assert!(src_region.is_whole());
        assert!(dst_region.is_whole());
        assert_eq!(src_region.buffer(), &src);
    }

    #[test]
    fn test_copy_mixed_coordinates() {
        let mut ctx = context();
        let src = TensorBuffer::new("src", [128, 256]);
        let dst = TensorBuffer::new("dst", [16, 16]);
        let src_info = info(&[16, 16]);
        ctx.annotate([(&src, &src_info)]).unwrap();
        let mut copier = RecordingCopy::default();

        ctx.copy(&mut copier, &src, &dst, Some(&[0, 1]), None).unwrap();

        let (src_region, dst_region) = &copier.calls[0];
        assert_eq!(src_region.origin(), Some(&[0, 16][..]));
        assert!(dst_region.is_whole());
    }

    #[test]
    fn test_copy_reports_missing_side() {
        let mut ctx = context();
        let src = TensorBuffer::new("src", [16, 16]);
        let dst = TensorBuffer::new("dst", [16, 16]);
        let src_info = info(&[4, 4]);
        ctx.annotate([(&src, &src_info)]).unwrap();
        let mut copier = RecordingCopy::default();

        let err = ctx
            .copy(&mut copier, &src, &dst, Some(&[1, 1]), Some(&[0, 0]))
            .unwrap_err();
        assert_eq!(
            err,
            MeshTensorError::NotFound {
                buffer: "dst".into(),
                role: BufferRole::Destination
            }
        );

        let err = ctx
            .copy(&mut copier, &dst, &src, Some(&[0, 0]), None)
            .unwrap_err();
        assert_eq!(
            err,
            MeshTensorError::NotFound {
                buffer: "dst".into(),
                role: BufferRole::Source
            }
        );
        assert!(copier.calls.is_empty());
    }

    #[test]
    fn test_copy_coordinate_rank_should_match_block_shape() {
        let mut ctx = context();
        let src = TensorBuffer::new("src", [16, 16]);
        let src_info = info(&[4, 4]);
        ctx.annotate([(&src, &src_info)]).unwrap();
        let mut copier = RecordingCopy::default();

        let err = ctx
            .copy(&mut copier, &src, &src, Some(&[1, 1, 1]), None)
            .unwrap_err();

        assert_eq!(
            err,
            MeshTensorError::Shape(ShapeError::BlockRankMismatch {
                role: BufferRole::Source,
                coord_rank: 3,
                block_rank: 2
            })
        );
    }

    #[test]
    fn test_block_offset_overflow() {
        let mut ctx = context();
        let src = TensorBuffer::new("src", [16, 16]);
        let src_info = info(&[4, 4]);
        ctx.annotate([(&src, &src_info)]).unwrap();

        let err = ctx.block_offset(&src, &[0, usize::MAX]).unwrap_err();

        assert!(matches!(
            err,
            MeshTensorError::Shape(ShapeError::OffsetOverflow { dim: 1, .. })
        ));
    }

    #[test]
    fn test_tile_shape_requires_registration() {
        let ctx = context();
        let a = TensorBuffer::new("a", [128, 256]);

        let err = ctx.tile_shape(&a).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "mesh tensor info for tensor buffer 'a' not found");
    }

    #[test]
    fn test_tile_shape_for_explicit_global_shape() {
        let mut ctx = context();
        let a = TensorBuffer::new("a", [128, 256]);
        let a_info = info(&[16, 16]);
        ctx.annotate([(&a, &a_info)]).unwrap();

        assert_eq!(ctx.tile_shape(&a).unwrap(), vec![64, 64]);
        assert_eq!(ctx.tile_shape_for(&a, &[100, 30]).unwrap(), vec![50, 8]);
    }

    #[test]
    fn test_context_from_invalid_config() {
        let err = MeshContext::from_config(&json!({"x": 2})).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
