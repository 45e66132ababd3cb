//! Label volume statistics

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::CanonicalTensor;

/// Minimal axis-aligned box (inclusive, depth/height/width order) around
/// all non-zero voxels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundingBox {
    /// The label volume has no non-zero voxel.
    Empty,
    Extent { lo: [usize; 3], hi: [usize; 3] },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelStats {
    pub bounding_box: BoundingBox,
    /// Non-zero voxel count per label value, values rounded to the nearest
    /// integer.
    pub nnz: BTreeMap<i64, u64>,
    /// Depth index of the slice with the largest non-zero area; lowest
    /// index wins ties (so an all-zero volume reports 0).
    pub max_slice: usize,
}

pub fn label_statistics(tensor: &CanonicalTensor) -> LabelStats {
    let [depth, height, width, channels] = tensor.shape;
    let plane = height * width;

    let mut lo = [usize::MAX; 3];
    let mut hi = [0usize; 3];
    let mut any = false;
    let mut nnz: BTreeMap<i64, u64> = BTreeMap::new();
    let mut area = vec![0u64; depth];

    for d in 0..depth {
        for p in 0..plane {
            let base = (d * plane + p) * channels;
            let mut hit = false;
            for c in 0..channels {
                // float masks are resampled; the nearest integer is the label
                let label = tensor.data.value_at(base + c).round();
                if label != 0.0 && !label.is_nan() {
                    hit = true;
                    *nnz.entry(label as i64).or_insert(0) += 1;
                }
            }
            if hit {
                let pos = [d, p / width, p % width];
                for axis in 0..3 {
                    lo[axis] = lo[axis].min(pos[axis]);
                    hi[axis] = hi[axis].max(pos[axis]);
                }
                area[d] += 1;
                any = true;
            }
        }
    }

    let mut max_slice = 0;
    for (d, a) in area.iter().enumerate() {
        if *a > area[max_slice] {
            max_slice = d;
        }
    }

    LabelStats {
        bounding_box: if any { BoundingBox::Extent { lo, hi } } else { BoundingBox::Empty },
        nnz,
        max_slice,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VoxelData;

    #[test]
    fn test_empty_label() {
        let t = CanonicalTensor::new([2, 2, 2, 1], [1.0; 3], VoxelData::U8(vec![0; 8])).unwrap();
        let s = label_statistics(&t);
        assert_eq!(s.bounding_box, BoundingBox::Empty);
        assert!(s.nnz.is_empty());
        assert_eq!(s.max_slice, 0);
    }

    #[test]
    fn test_box_counts_and_max_slice() {
        // depth 3, 2x3 plane
        #[rustfmt::skip]
        let data = vec![
            0, 0, 0,
            0, 0, 0,

            0, 1, 1,
            0, 2, 0,

            0, 0, 0,
            1, 0, 0,
        ];
        let t = CanonicalTensor::new([3, 2, 3, 1], [1.0; 3], VoxelData::U8(data)).unwrap();
        let s = label_statistics(&t);

        assert_eq!(s.bounding_box, BoundingBox::Extent { lo: [1, 0, 0], hi: [2, 1, 2] });
        assert_eq!(s.nnz.get(&1), Some(&3));
        assert_eq!(s.nnz.get(&2), Some(&1));
        assert_eq!(s.max_slice, 1);
    }

    #[test]
    fn test_max_slice_tie_prefers_lowest() {
        let data = vec![0, 1, 1, 0, 0, 1];
        let t = CanonicalTensor::new([3, 1, 2, 1], [1.0; 3], VoxelData::I32(data)).unwrap();
        assert_eq!(label_statistics(&t).max_slice, 0);
    }

    #[test]
    fn test_fractional_values_round_to_labels() {
        let data = vec![0.4, -0.3, 1.6, 0.0, 2.0, 0.9, f32::NAN, 0.2];
        let t = CanonicalTensor::new([2, 2, 2, 1], [1.0; 3], VoxelData::F32(data)).unwrap();
        let s = label_statistics(&t);

        assert_eq!(s.nnz.get(&1), Some(&1));
        assert_eq!(s.nnz.get(&2), Some(&2));
        assert_eq!(s.nnz.len(), 2);
        assert_eq!(s.bounding_box, BoundingBox::Extent { lo: [0, 0, 0], hi: [1, 1, 1] });
        assert_eq!(s.max_slice, 1);
    }
}
