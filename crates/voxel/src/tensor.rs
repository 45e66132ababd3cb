//! Decoded and canonical tensors

use serde::{Deserialize, Serialize};

use crate::{Result, VoxelError};

/// Element type of a voxel payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    U8,
    I8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl DType {
    /// Stable on-disk / in-hash code. Never renumber.
    pub const fn code(self) -> u8 {
        match self {
            DType::U8 => 1,
            DType::I8 => 2,
            DType::I16 => 3,
            DType::U16 => 4,
            DType::I32 => 5,
            DType::U32 => 6,
            DType::F32 => 7,
            DType::F64 => 8,
        }
    }

    pub const fn byte_size(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

/// Flat voxel payload in C order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum VoxelData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! each_variant {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            VoxelData::U8($v) => $body,
            VoxelData::I8($v) => $body,
            VoxelData::I16($v) => $body,
            VoxelData::U16($v) => $body,
            VoxelData::I32($v) => $body,
            VoxelData::U32($v) => $body,
            VoxelData::F32($v) => $body,
            VoxelData::F64($v) => $body,
        }
    };
}

macro_rules! map_variant {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            VoxelData::U8($v) => VoxelData::U8($body),
            VoxelData::I8($v) => VoxelData::I8($body),
            VoxelData::I16($v) => VoxelData::I16($body),
            VoxelData::U16($v) => VoxelData::U16($body),
            VoxelData::I32($v) => VoxelData::I32($body),
            VoxelData::U32($v) => VoxelData::U32($body),
            VoxelData::F32($v) => VoxelData::F32($body),
            VoxelData::F64($v) => VoxelData::F64($body),
        }
    };
}

impl VoxelData {
    pub fn dtype(&self) -> DType {
        match self {
            VoxelData::U8(_) => DType::U8,
            VoxelData::I8(_) => DType::I8,
            VoxelData::I16(_) => DType::I16,
            VoxelData::U16(_) => DType::U16,
            VoxelData::I32(_) => DType::I32,
            VoxelData::U32(_) => DType::U32,
            VoxelData::F32(_) => DType::F32,
            VoxelData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `i` widened to f64.
    pub fn value_at(&self, i: usize) -> f64 {
        each_variant!(self, v => v[i] as f64)
    }

    /// Little-endian byte image of the payload. This is the canonical byte
    /// form used by both the container and the content hash.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * self.dtype().byte_size());
        each_variant!(self, v => {
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
        });
        out
    }

    pub fn from_le_bytes(dtype: DType, bytes: &[u8]) -> Result<Self> {
        let size = dtype.byte_size();
        if bytes.len() % size != 0 {
            return Err(VoxelError::Container(format!(
                "payload length {} is not a multiple of {size}",
                bytes.len()
            )));
        }

        macro_rules! collect {
            ($t:ty, $variant:ident) => {
                VoxelData::$variant(
                    bytes
                        .chunks_exact(size)
                        .map(|c| {
                            let mut buf = [0u8; std::mem::size_of::<$t>()];
                            buf.copy_from_slice(c);
                            <$t>::from_le_bytes(buf)
                        })
                        .collect(),
                )
            };
        }

        Ok(match dtype {
            DType::U8 => VoxelData::U8(bytes.to_vec()),
            DType::I8 => collect!(i8, I8),
            DType::I16 => collect!(i16, I16),
            DType::U16 => collect!(u16, U16),
            DType::I32 => collect!(i32, I32),
            DType::U32 => collect!(u32, U32),
            DType::F32 => collect!(f32, F32),
            DType::F64 => collect!(f64, F64),
        })
    }

    /// Reorder a channel-first payload (`channels` blocks of `spatial`
    /// elements) into channel-last order.
    pub fn channels_last(&self, spatial: usize, channels: usize) -> VoxelData {
        fn permute<T: Copy>(src: &[T], spatial: usize, channels: usize) -> Vec<T> {
            let mut out = Vec::with_capacity(src.len());
            for s in 0..spatial {
                for c in 0..channels {
                    out.push(src[c * spatial + s]);
                }
            }
            out
        }
        map_variant!(self, v => permute(v, spatial, channels))
    }
}

/// Number of voxels in `shape`. Zero-length axes and products that do not
/// fit in `usize` are decode errors.
pub fn voxel_count(shape: &[usize]) -> Result<usize> {
    if shape.contains(&0) {
        return Err(VoxelError::Decode(format!("shape {shape:?} has an empty axis")));
    }
    shape
        .iter()
        .try_fold(1usize, |n, &d| n.checked_mul(d))
        .ok_or_else(|| VoxelError::Decode(format!("shape {shape:?} overflows the voxel count")))
}

/// Payload size in bytes of `count` voxels of `dtype`.
pub fn payload_len(count: usize, dtype: DType) -> Result<usize> {
    count.checked_mul(dtype.byte_size()).ok_or_else(|| {
        VoxelError::Decode(format!("{count} voxels of {dtype:?} overflow the payload size"))
    })
}

/// Output of a source reader: an array of any rank in C order, with
/// physical spacing for the spatial axes (also C order, may be shorter than
/// the rank or empty).
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedVolume {
    pub shape: Vec<usize>,
    pub spacing: Vec<f32>,
    pub data: VoxelData,
}

/// A tensor in the canonical D x H x W x C layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTensor {
    pub shape: [usize; 4],
    /// Physical voxel spacing along depth, height and width.
    pub dims: [f32; 3],
    pub data: VoxelData,
}

impl CanonicalTensor {
    pub fn new(shape: [usize; 4], dims: [f32; 3], data: VoxelData) -> Result<Self> {
        let expected = voxel_count(&shape)?;
        if expected != data.len() {
            return Err(VoxelError::Decode(format!(
                "shape {shape:?} needs {expected} voxels, payload has {}",
                data.len()
            )));
        }
        Ok(Self { shape, dims, data })
    }

    pub fn slices(&self) -> usize {
        self.shape[0]
    }

    pub fn channels(&self) -> usize {
        self.shape[3]
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }
}

/// Reshape a decoded volume into D x H x W x C.
///
/// 1-D `(W)` becomes `(1, 1, W, 1)`, 2-D `(H, W)` becomes `(1, H, W, 1)`,
/// 3-D `(D, H, W)` becomes `(D, H, W, 1)` and 4-D input is taken as already
/// channel-last. Missing spacing entries default to 1.0.
pub fn canonicalize(volume: DecodedVolume) -> Result<CanonicalTensor> {
    let DecodedVolume { shape, spacing, data } = volume;

    let canonical = match shape.as_slice() {
        [w] => [1, 1, *w, 1],
        [h, w] => [1, *h, *w, 1],
        [d, h, w] => [*d, *h, *w, 1],
        [d, h, w, c] => [*d, *h, *w, *c],
        [] => return Err(VoxelError::Decode("source decoded to a rank-0 array".into())),
        _ => return Err(VoxelError::RankTooHigh { rank: shape.len() }),
    };

    let spatial_rank = shape.len().min(3);
    let mut dims = [1.0f32; 3];
    for (axis, slot) in dims.iter_mut().skip(3 - spatial_rank).enumerate() {
        if let Some(s) = spacing.get(axis) {
            if s.is_finite() && *s > 0.0 {
                *slot = *s;
            }
        }
    }

    CanonicalTensor::new(canonical, dims, data)
}
