//! Source format readers
//!
//! Readers sit at the boundary: each turns one source format into a
//! [`DecodedVolume`]. The registry picks one by file name suffix, falling
//! back to sniffing the first bytes of the file.

pub(crate) mod nifti;
pub(crate) mod npy;

pub use nifti::NiftiReader;
pub use npy::NpyReader;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::{DecodedVolume, Result, VoxelError};

const SNIFF_LEN: usize = 512;

pub trait VolumeReader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower-case file name suffixes this reader claims, e.g. `".nii.gz"`.
    fn suffixes(&self) -> &'static [&'static str];

    /// Whether the leading bytes of a file look like this format.
    fn sniff(&self, head: &[u8]) -> bool;

    fn read(&self, path: &Path) -> Result<DecodedVolume>;
}

pub struct ReaderRegistry {
    readers: Vec<Box<dyn VolumeReader>>,
}

impl ReaderRegistry {
    pub fn empty() -> Self {
        Self { readers: Vec::new() }
    }

    /// Registry with the built-in NIfTI-1 and NumPy readers.
    pub fn with_defaults() -> Self {
        let mut r = Self::empty();
        r.register(Box::new(NiftiReader));
        r.register(Box::new(NpyReader));
        r
    }

    pub fn register(&mut self, reader: Box<dyn VolumeReader>) {
        self.readers.push(reader);
    }

    pub fn reader_for(&self, path: &Path) -> Result<&dyn VolumeReader> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if let Some(r) = self
            .readers
            .iter()
            .find(|r| r.suffixes().iter().any(|s| name.ends_with(s)))
        {
            return Ok(r.as_ref());
        }

        let mut head = Vec::with_capacity(SNIFF_LEN);
        File::open(path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)?;

        self.readers
            .iter()
            .find(|r| r.sniff(&head))
            .map(|r| r.as_ref())
            .ok_or_else(|| VoxelError::Unsupported(format!("no reader for {}", path.display())))
    }

    pub fn read(&self, path: &Path) -> Result<DecodedVolume> {
        self.reader_for(path)?.read(path)
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
