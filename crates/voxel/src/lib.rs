//! Canonical voxel handling
//!
//! Decodes heterogeneous source volumes, reshapes them to the canonical
//! depth x height x width x channel layout, hashes the decoded content and
//! writes the canonical binary container.

mod tensor;
mod hash;
mod labels;
mod container;
mod convert;
pub mod readers;

pub use tensor::{canonicalize, CanonicalTensor, DType, DecodedVolume, VoxelData};
pub use hash::content_hash;
pub use labels::{label_statistics, BoundingBox, LabelStats};
pub use container::{
    decode_container, encode_container, read_container, read_container_header,
    write_container_atomic, ContainerHeader,
    ContainerKind, CONTAINER_MAGIC,
};
pub use convert::{ArtifactMeta, FormatConverter};
pub use readers::{ReaderRegistry, VolumeReader};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoxelError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Unsupported source: {0}")]
    Unsupported(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Decoded rank {rank} exceeds the canonical 4 dimensions")]
    RankTooHigh { rank: usize },

    #[error("Container error: {0}")]
    Container(String),

    #[error("Artifact {file} already holds this content with different metadata: {detail}")]
    ArtifactConflict { file: String, detail: String },

    #[error("Container hash mismatch: header says {expected}, payload hashes to {actual}")]
    HashMismatch { expected: String, actual: String },
}

impl From<std::io::Error> for VoxelError {
    fn from(e: std::io::Error) -> Self {
        VoxelError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VoxelError>;
