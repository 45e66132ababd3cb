#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use kvstore::InMemoryStorage;
use studies::{AppContext, ImportDocument, KvDocumentStore, SourceEntry, SourceSeries, StudyMeta};

pub type MemStore = KvDocumentStore<InMemoryStorage>;

pub fn mem_store(db: &str) -> Arc<MemStore> {
    Arc::new(KvDocumentStore::new(InMemoryStorage::new(), db))
}

pub fn context(root: &Path, db: &str, folds: u32) -> AppContext {
    AppContext {
        name: "test".into(),
        db: db.into(),
        dst_root: root.join("data"),
        folds,
        extra: BTreeMap::new(),
    }
}

/// Little-endian NIfTI-1 single file with i16 voxels.
pub fn nifti_i16(dims: &[usize], pixdim: &[f32], data: &[i16]) -> Vec<u8> {
    let mut h = vec![0u8; 352];
    h[0..4].copy_from_slice(&348i32.to_le_bytes());
    h[40..42].copy_from_slice(&(dims.len() as i16).to_le_bytes());
    for (i, d) in dims.iter().enumerate() {
        let at = 42 + i * 2;
        h[at..at + 2].copy_from_slice(&(*d as i16).to_le_bytes());
    }
    h[70..72].copy_from_slice(&4i16.to_le_bytes());
    h[72..74].copy_from_slice(&16i16.to_le_bytes());
    for (i, p) in pixdim.iter().enumerate() {
        let at = 80 + i * 4;
        h[at..at + 4].copy_from_slice(&p.to_le_bytes());
    }
    h[108..112].copy_from_slice(&352f32.to_le_bytes());
    h[344..348].copy_from_slice(b"n+1\0");
    for v in data {
        h.extend_from_slice(&v.to_le_bytes());
    }
    h
}

pub fn npy_i16(shape: &[usize], data: &[i16]) -> Vec<u8> {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let shape_lit = if dims.len() == 1 {
        format!("({},)", dims[0])
    } else {
        format!("({})", dims.join(", "))
    };
    let mut header = format!("{{'descr': '<i2', 'fortran_order': False, 'shape': {shape_lit}, }}");
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut out = b"\x93NUMPY".to_vec();
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for v in data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap()
}

pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> String {
    let path: PathBuf = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path.to_string_lossy().into_owned()
}

/// A 2x3x4 volume whose voxels are `seed..seed+24`.
pub fn volume(dir: &Path, name: &str, seed: i16) -> String {
    let data: Vec<i16> = (seed..seed + 24).collect();
    write(dir, name, &nifti_i16(&[4, 3, 2], &[1.0, 1.0, 2.0], &data))
}

pub fn doc(studyid: &str, series: &[(&str, &[&str])], labels: &[&str]) -> ImportDocument {
    ImportDocument {
        study: StudyMeta::new(studyid),
        series: series
            .iter()
            .map(|(sid, files)| SourceSeries {
                seriesid: sid.to_string(),
                description: String::new(),
                data: files.iter().map(|f| SourceEntry::new(*f)).collect(),
            })
            .collect(),
        labels: labels.iter().map(|f| SourceEntry::new(*f)).collect(),
    }
}
