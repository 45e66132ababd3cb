use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use importer::Importer;
use kvstore::InMemoryStorage;
use studies::{
    errors_for_study, retry_documents, AppContext, ImportDocument, KvDocumentStore, SourceEntry,
    SourceSeries, StudyMeta, StudyStore,
};

/// C-order little-endian u8 `.npy`.
fn npy_u8(shape: &[usize], data: &[u8]) -> Vec<u8> {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let shape_lit = if dims.len() == 1 {
        format!("({},)", dims[0])
    } else {
        format!("({})", dims.join(", "))
    };
    let mut header = format!("{{'descr': '|u1', 'fortran_order': False, 'shape': {shape_lit}, }}");
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut out = b"\x93NUMPY\x01\x00".to_vec();
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(data);
    out
}

fn write(dir: &Path, name: &str, bytes: &[u8]) -> String {
    let p = dir.join(name);
    std::fs::write(&p, bytes).unwrap();
    p.to_string_lossy().into_owned()
}

fn document(studyid: &str, images: Vec<String>, labels: Vec<String>) -> ImportDocument {
    ImportDocument {
        study: StudyMeta::new(studyid).with_field("patient", serde_json::json!(format!("P-{studyid}"))),
        series: vec![SourceSeries {
            seriesid: "ct".into(),
            description: "CT venous".into(),
            data: images.into_iter().map(SourceEntry::new).collect(),
        }],
        labels: labels.into_iter().map(SourceEntry::new).collect(),
    }
}

fn main() {
    println!("=== Import Demo: content-addressed study ingestion ===\n");

    let scratch = tempfile::tempdir().unwrap();
    let src = scratch.path();

    // 8x8 slices, 4 deep
    let volume: Vec<u8> = (0..256).map(|v| (v % 251) as u8).collect();
    let mut mask = vec![0u8; 256];
    for z in 1..3 {
        for y in 2..5 {
            for x in 3..6 {
                mask[z * 64 + y * 8 + x] = if z == 2 && y == 3 { 2 } else { 1 };
            }
        }
    }

    let ct = write(src, "ct.npy", &npy_u8(&[4, 8, 8], &volume));
    let ct_copy = write(src, "ct_copy.npy", &npy_u8(&[4, 8, 8], &volume));
    let seg = write(src, "seg.npy", &npy_u8(&[4, 8, 8], &mask));
    let missing = src.join("later.npy").to_string_lossy().into_owned();

    let store = Arc::new(KvDocumentStore::new(InMemoryStorage::new(), "liver"));
    let context = AppContext {
        name: "demo".into(),
        db: "liver".into(),
        dst_root: src.join("data"),
        folds: 5,
        extra: BTreeMap::new(),
    };
    let importer = Importer::new(store.clone(), context);

    // 1. First batch, one file missing
    println!("--- Batch 1 ---");
    let batch = vec![
        document("study-001", vec![ct.clone(), missing.clone()], vec![seg.clone()]),
        document("study-002", vec![ct_copy.clone()], vec![]),
    ];
    let report = importer.run(&batch);
    println!("ok: {}  failed: {}", report.succeeded, report.failed);
    println!("files converted: {}  failed: {}", report.files_converted, report.files_failed);
    for e in errors_for_study(store.as_ref(), "study-001").unwrap() {
        println!("  logged [{}] {}", e.reason, e.file.unwrap_or_default());
    }

    // 2. Reimport with a byte-identical copy: nothing new
    println!("\n--- Reimport ---");
    let again = importer.run(&[document("study-001", vec![ct_copy], vec![seg])]);
    println!("appended: {}  duplicates: {}", again.appended, again.duplicates);

    // 3. Fix the missing file and retry only what failed
    println!("\n--- Retry ---");
    let shifted: Vec<u8> = volume.iter().map(|v| v.wrapping_add(1)).collect();
    write(src, "later.npy", &npy_u8(&[4, 8, 8], &shifted));
    let retry = retry_documents(store.as_ref(), &batch).unwrap();
    println!("documents to retry: {}", retry.len());
    let fixed = importer.run(&retry);
    println!("appended: {}", fixed.appended);

    // 4. Folds
    println!("\n--- Validation split ---");
    let summary = importer.validation_split().unwrap();
    println!("studies: {}  updated: {}", summary.studies, summary.updated);

    let record = store.get("study-001").unwrap().expect("study-001 was imported");
    println!("\n--- study-001 ---");
    println!("{}", serde_json::to_string_pretty(&record).unwrap());
}
