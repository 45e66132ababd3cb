//! Canonical binary container
//!
//! Layout:
//! ```text
//! magic   b"VOXC"
//! version u16 LE
//! hlen    u32 LE
//! header  bincode(ContainerHeader), hlen bytes
//! payload little-endian voxels, C order over (D, H, W, C)
//! ```

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{content_hash, CanonicalTensor, DType, LabelStats, Result, VoxelData, VoxelError};

pub const CONTAINER_MAGIC: &[u8; 4] = b"VOXC";
const CONTAINER_VERSION: u16 = 1;
const PREAMBLE: usize = 4 + 2 + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerKind {
    Image,
    Label,
}

impl ContainerKind {
    pub fn extension(self) -> &'static str {
        match self {
            ContainerKind::Image => "vimg",
            ContainerKind::Label => "vlbl",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub kind: ContainerKind,
    pub dtype: DType,
    pub dims: [f32; 3],
    pub shape: [u64; 4],
    pub slices: u64,
    pub hash: String,
    /// Present on label containers only.
    pub label: Option<LabelStats>,
}

pub fn encode_container(
    kind: ContainerKind,
    tensor: &CanonicalTensor,
    hash: &str,
    label: Option<&LabelStats>,
) -> Result<Vec<u8>> {
    if (kind == ContainerKind::Label) != label.is_some() {
        return Err(VoxelError::Container(
            "label statistics must accompany exactly the label kind".into(),
        ));
    }

    let header = ContainerHeader {
        kind,
        dtype: tensor.dtype(),
        dims: tensor.dims,
        shape: tensor.shape.map(|d| d as u64),
        slices: tensor.slices() as u64,
        hash: hash.to_string(),
        label: label.cloned(),
    };
    let header_bytes =
        bincode::serialize(&header).map_err(|e| VoxelError::Container(e.to_string()))?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| VoxelError::Container("header too large".into()))?;

    let payload = tensor.data.to_le_bytes();
    let mut out = Vec::with_capacity(PREAMBLE + header_bytes.len() + payload.len());
    out.extend_from_slice(CONTAINER_MAGIC);
    out.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a container and check the payload against the stored hash.
pub fn decode_container(bytes: &[u8]) -> Result<(ContainerHeader, CanonicalTensor)> {
    let header_end = PREAMBLE + header_len(bytes)?;
    if bytes.len() < header_end {
        return Err(VoxelError::Container("container header truncated".into()));
    }

    let header: ContainerHeader = bincode::deserialize(&bytes[PREAMBLE..header_end])
        .map_err(|e| VoxelError::Container(e.to_string()))?;

    let data = VoxelData::from_le_bytes(header.dtype, &bytes[header_end..])?;
    let shape = header.shape.map(|d| d as usize);
    let tensor = CanonicalTensor::new(shape, header.dims, data)
        .map_err(|e| VoxelError::Container(e.to_string()))?;

    let actual = content_hash(&tensor);
    if actual != header.hash {
        return Err(VoxelError::HashMismatch {
            expected: header.hash,
            actual,
        });
    }

    Ok((header, tensor))
}

/// Length of the bincode header, from the fixed preamble.
fn header_len(preamble: &[u8]) -> Result<usize> {
    if preamble.len() < PREAMBLE || &preamble[..4] != CONTAINER_MAGIC {
        return Err(VoxelError::Container("missing container magic".into()));
    }
    let version = u16::from_le_bytes([preamble[4], preamble[5]]);
    if version != CONTAINER_VERSION {
        return Err(VoxelError::Container(format!("unknown container version {version}")));
    }
    Ok(u32::from_le_bytes([preamble[6], preamble[7], preamble[8], preamble[9]]) as usize)
}

/// Read only the header of a stored container; the payload is neither read
/// nor verified.
pub fn read_container_header(path: &Path) -> Result<ContainerHeader> {
    let mut f = fs::File::open(path)?;
    let mut preamble = [0u8; PREAMBLE];
    f.read_exact(&mut preamble)?;
    let mut header = vec![0u8; header_len(&preamble)?];
    f.read_exact(&mut header)?;
    bincode::deserialize(&header).map_err(|e| VoxelError::Container(e.to_string()))
}

pub fn read_container(path: &Path) -> Result<(ContainerHeader, CanonicalTensor)> {
    decode_container(&fs::read(path)?)
}

/// Write `bytes` to `path` through a sibling temp file and a rename, so a
/// reader never observes a partially written container.
pub fn write_container_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| VoxelError::Io(format!("invalid artifact path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp.{}", uuid::Uuid::new_v4()));

    let written = (|| -> std::io::Result<()> {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
