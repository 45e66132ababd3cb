//! Content hashing over canonical voxel content

use crate::CanonicalTensor;

const DOMAIN: &[u8] = b"voxel-content:v1";

/// Hex BLAKE3 digest of a canonical tensor.
///
/// Covers dtype, canonical shape and the little-endian payload. Spacing is
/// not covered; equal hashes with different `dims` surface as a conflict at
/// merge time.
pub fn content_hash(tensor: &CanonicalTensor) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(DOMAIN);
    hasher.update(&[tensor.dtype().code()]);
    for d in tensor.shape {
        hasher.update(&(d as u64).to_le_bytes());
    }
    hasher.update(&tensor.data.to_le_bytes());
    hex::encode(hasher.finalize().as_bytes())
}
