use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    canonicalize, content_hash, encode_container, label_statistics, read_container_header,
    write_container_atomic, CanonicalTensor, ContainerKind, LabelStats, ReaderRegistry, Result,
    VoxelError,
};

/// What a conversion produced, minus the tensor itself.
#[derive(Clone, Debug, PartialEq)]
pub struct ArtifactMeta {
    pub file: PathBuf,
    pub hash: String,
    pub dims: [f32; 3],
    pub shape: [usize; 4],
    pub slices: usize,
    pub label: Option<LabelStats>,
}

pub struct FormatConverter {
    registry: ReaderRegistry,
}

impl FormatConverter {
    pub fn new(registry: ReaderRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ReaderRegistry {
        &self.registry
    }

    /// Decode a source file into the canonical layout without writing anything.
    pub fn decode(&self, source: &Path) -> Result<CanonicalTensor> {
        canonicalize(self.registry.read(source)?)
    }

    /// Decode `source`, hash it and write the canonical container into
    /// `dest_dir` as `<hash>.<ext>`. An artifact already present under that
    /// name is left untouched.
    pub fn convert(
        &self,
        source: &Path,
        kind: ContainerKind,
        dest_dir: &Path,
    ) -> Result<(CanonicalTensor, ArtifactMeta)> {
        let tensor = self.decode(source)?;
        let hash = content_hash(&tensor);
        let label = match kind {
            ContainerKind::Label => Some(label_statistics(&tensor)),
            ContainerKind::Image => None,
        };

        let file = dest_dir.join(format!("{hash}.{}", kind.extension()));
        if stored_matches(&file, &tensor)? {
            debug!(source = %source.display(), hash = %hash, "artifact already present");
        } else {
            let bytes = encode_container(kind, &tensor, &hash, label.as_ref())?;
            write_container_atomic(&file, &bytes)?;
            debug!(source = %source.display(), file = %file.display(), "artifact written");
        }

        let meta = ArtifactMeta {
            file,
            hash,
            dims: tensor.dims,
            shape: tensor.shape,
            slices: tensor.slices(),
            label,
        };
        Ok((tensor, meta))
    }
}

/// Whether `file` already holds `tensor`'s container. A missing or
/// unreadable artifact is reported as absent so it gets rewritten; one whose
/// header disagrees on shape, dtype or spacing is an `ArtifactConflict`.
fn stored_matches(file: &Path, tensor: &CanonicalTensor) -> Result<bool> {
    if !file.exists() {
        return Ok(false);
    }
    let header = match read_container_header(file) {
        Ok(h) => h,
        Err(e) => {
            warn!(file = %file.display(), "unreadable artifact, rewriting: {e}");
            return Ok(false);
        }
    };
    let shape = tensor.shape.map(|d| d as u64);
    if header.shape != shape || header.dtype != tensor.dtype() || header.dims != tensor.dims {
        return Err(VoxelError::ArtifactConflict {
            file: file.display().to_string(),
            detail: format!(
                "stored shape {:?} dims {:?}, incoming shape {:?} dims {:?}",
                header.shape, header.dims, shape, tensor.dims
            ),
        });
    }
    Ok(true)
}

impl Default for FormatConverter {
    fn default() -> Self {
        Self::new(ReaderRegistry::with_defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::{nifti, npy};
    use crate::{read_container, BoundingBox};

    #[test]
    fn test_nifti_and_npy_collapse_to_one_hash() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<i16> = (0..12).collect();
        let nii = dir.path().join("a.nii");
        let arr = dir.path().join("a.npy");
        std::fs::write(&nii, nifti::tests::nifti_i16(&[4, 3], &[1.0, 1.0], &data)).unwrap();
        std::fs::write(&arr, npy::tests::npy_i16(&[3, 4], &data)).unwrap();

        let conv = FormatConverter::default();
        let out = dir.path().join("out");
        let (_, a) = conv.convert(&nii, ContainerKind::Image, &out).unwrap();
        let (_, b) = conv.convert(&arr, ContainerKind::Image, &out).unwrap();

        assert_eq!(a.hash, b.hash);
        assert_eq!(a.file, b.file);
        assert_eq!(a.shape, [1, 3, 4, 1]);
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 1);
    }

    #[test]
    fn test_label_conversion_roundtrips_through_container() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("mask.nii");
        std::fs::write(&src, nifti::tests::nifti_i16(&[2, 2, 2], &[1.0, 1.0, 3.0], &[0, 0, 0, 0, 0, 1, 0, 0])).unwrap();

        let conv = FormatConverter::default();
        let (tensor, meta) = conv.convert(&src, ContainerKind::Label, dir.path()).unwrap();
        let stats = meta.label.clone().unwrap();
        assert_eq!(stats.bounding_box, BoundingBox::Extent { lo: [1, 0, 1], hi: [1, 0, 1] });
        assert_eq!(meta.dims, [3.0, 1.0, 1.0]);

        let (header, back) = read_container(&meta.file).unwrap();
        assert_eq!(back, tensor);
        assert_eq!(header.label, Some(stats));
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let conv = FormatConverter::default();
        let err = conv
            .convert(&dir.path().join("gone.nii"), ContainerKind::Image, dir.path())
            .unwrap_err();
        assert!(matches!(err, VoxelError::Io(_)));
    }

    #[test]
    fn test_unknown_format_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("notes.txt");
        std::fs::write(&src, b"hello").unwrap();
        let err = FormatConverter::default().decode(&src).unwrap_err();
        assert!(matches!(err, VoxelError::Unsupported(_)));
    }

    #[test]
    fn test_same_content_with_other_spacing_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<i16> = (0..8).collect();
        let fine = dir.path().join("fine.nii");
        let coarse = dir.path().join("coarse.nii");
        std::fs::write(&fine, nifti::tests::nifti_i16(&[2, 2, 2], &[1.0, 1.0, 1.0], &data)).unwrap();
        std::fs::write(&coarse, nifti::tests::nifti_i16(&[2, 2, 2], &[1.0, 1.0, 3.0], &data)).unwrap();

        let conv = FormatConverter::default();
        let out = dir.path().join("out");
        let (_, first) = conv.convert(&fine, ContainerKind::Image, &out).unwrap();
        let err = conv.convert(&coarse, ContainerKind::Image, &out).unwrap_err();
        assert!(matches!(err, VoxelError::ArtifactConflict { .. }));

        let header = read_container_header(&first.file).unwrap();
        assert_eq!(header.dims, first.dims);
    }

    #[test]
    fn test_corrupt_artifact_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.nii");
        std::fs::write(&src, nifti::tests::nifti_i16(&[2, 2], &[1.0, 1.0], &[1, 2, 3, 4])).unwrap();

        let conv = FormatConverter::default();
        let (_, meta) = conv.convert(&src, ContainerKind::Image, dir.path()).unwrap();
        std::fs::write(&meta.file, b"junk").unwrap();
        conv.convert(&src, ContainerKind::Image, dir.path()).unwrap();
        assert!(read_container(&meta.file).is_ok());
    }
}
