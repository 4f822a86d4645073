use alloc::vec::Vec;

use super::{MeshAxis, MeshDescriptor, PartitionInfo};
use crate::ShapeError;

/// Divides `a` by `b`, rounding up.
///
/// Equal to `floor((a + b - 1) / b)`: exact divisions do not round up, and any `0 < a < b`
/// yields 1.
///
/// # Panics
/// Panics if `b` is zero. Mesh axis counts are always positive, so tile shape computations
/// never hit this.
pub fn ceil_div(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

/// Computes the shape of the tile each device holds for a tensor of shape `global_shape`.
///
/// The dimension split along each mesh axis is ceil-divided by that axis' device count; every
/// other dimension keeps its global size. This is the uniform upper bound: the last device
/// along an axis may hold a smaller remainder, which is not computed here.
pub fn tile_shape(
    mesh: &MeshDescriptor,
    info: &PartitionInfo,
    global_shape: &[usize],
) -> Result<Vec<usize>, ShapeError> {
    let mut local_shape = global_shape.to_vec();

    for axis in MeshAxis::ALL {
        let dim = info.sharding().dim(axis);
        let size = global_shape
            .get(dim)
            .ok_or(ShapeError::DimensionOutOfRange {
                axis,
                dim,
                rank: global_shape.len(),
            })?;
        local_shape[dim] = ceil_div(*size, mesh.device_count_of(axis));
    }

    Ok(local_shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharding::ShardingAxisMap;
    use alloc::vec;
    use rstest::rstest;

    fn info(rank: usize, x: usize, y: usize) -> PartitionInfo {
        PartitionInfo::new(vec![1; rank], ShardingAxisMap::new(x, y), 0u64).unwrap()
    }

    #[rstest]
    #[case(64, 2, 32)]
    #[case(100, 3, 34)]
    #[case(99, 3, 33)]
    #[case(1, 4, 1)]
    #[case(3, 4, 1)]
    #[case(7, 1, 7)]
    #[case(0, 4, 0)]
    fn test_ceil_div(#[case] a: usize, #[case] b: usize, #[case] expected: usize) {
        assert_eq!(ceil_div(a, b), expected);
    }

    #[test]
    #[should_panic]
    fn test_ceil_div_by_zero() {
        let _ = ceil_div(4, 0);
    }

    #[test]
    fn test_ceil_div_matches_floor_formula() {
        for a in 1..64 {
            for b in 1..16 {
                assert_eq!(ceil_div(a, b), (a + b - 1) / b, "a={a}, b={b}");
            }
        }
    }

    #[rstest]
    #[case((2, 4), [128, 256], [64, 64])]
    #[case((3, 4), [100, 256], [34, 64])]
    #[case((1, 1), [100, 256], [100, 256])]
    #[case((8, 2), [5, 3], [1, 2])]
    fn test_tile_shape_2d(
        #[case] mesh: (usize, usize),
        #[case] global: [usize; 2],
        #[case] expected: [usize; 2],
    ) {
        let mesh = MeshDescriptor::new(mesh.0, mesh.1).unwrap();

        assert_eq!(tile_shape(&mesh, &info(2, 0, 1), &global), Ok(expected.to_vec()));
    }

    #[test]
    fn test_tile_shape_keeps_unsharded_dims() {
        let mesh = MeshDescriptor::new(2, 4).unwrap();

        let local = tile_shape(&mesh, &info(4, 3, 1), &[7, 30, 5, 9]).unwrap();

        assert_eq!(local, vec![7, 8, 5, 5]);
    }

    #[test]
    fn test_tile_shape_sharded_dim_should_be_in_bound() {
        let mesh = MeshDescriptor::new(2, 2).unwrap();

        let err = tile_shape(&mesh, &info(3, 0, 2), &[8, 8]).unwrap_err();

        assert_eq!(
            err,
            ShapeError::DimensionOutOfRange {
                axis: MeshAxis::Y,
                dim: 2,
                rank: 2
            }
        );
    }
}
