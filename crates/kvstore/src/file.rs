//! File-backed storage: the whole map lives in memory and every mutation is
//! flushed to a single JSON file via temp-file + rename.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::storage::{scan, Storage};
use crate::{Result, StorageError};

pub struct FileBackedStorage {
    path: PathBuf,
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl FileBackedStorage {
    /// Open (or create on first write) the store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = fs::read(&path)?;
            decode(&bytes)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let encoded: BTreeMap<String, String> = self
            .data
            .iter()
            .map(|(k, v)| (hex::encode(k), hex::encode(v)))
            .collect();
        let bytes = serde_json::to_vec(&encoded)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file_name = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StorageError::Io(format!("invalid store path {}", self.path.display())))?;
        let tmp = self
            .path
            .with_file_name(format!("{file_name}.tmp.{}", uuid::Uuid::new_v4()));

        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    if bytes.is_empty() {
        return Ok(BTreeMap::new());
    }
    let raw: BTreeMap<String, String> =
        serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))?;
    raw.into_iter()
        .map(|(k, v)| {
            let k = hex::decode(k).map_err(|e| StorageError::Serialization(e.to_string()))?;
            let v = hex::decode(v).map_err(|e| StorageError::Serialization(e.to_string()))?;
            Ok((k, v))
        })
        .collect()
}

impl Storage for FileBackedStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let prev = self.data.insert(key.to_vec(), value.to_vec());
        if let Err(e) = self.flush() {
            // keep memory consistent with what is on disk
            match prev {
                Some(p) => self.data.insert(key.to_vec(), p),
                None => self.data.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        let Some(prev) = self.data.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.flush() {
            self.data.insert(key.to_vec(), prev);
            return Err(e);
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(scan(&self.data, prefix))
    }
}
