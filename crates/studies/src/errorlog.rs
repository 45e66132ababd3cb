//! Queries over the append-only import error log.

use std::collections::{BTreeMap, BTreeSet};

use crate::{ErrorEntry, ErrorReason, ImportDocument, Result, StudyStore};

pub fn errors_for_study<S: StudyStore + ?Sized>(store: &S, studyid: &str) -> Result<Vec<ErrorEntry>> {
    Ok(store
        .errors()?
        .into_iter()
        .filter(|e| e.studyid.as_deref() == Some(studyid))
        .collect())
}

pub fn errors_with_reason<S: StudyStore + ?Sized>(
    store: &S,
    reason: ErrorReason,
) -> Result<Vec<ErrorEntry>> {
    Ok(store.errors()?.into_iter().filter(|e| e.reason == reason).collect())
}

#[derive(Default)]
struct RetryScope {
    whole: bool,
    files: BTreeSet<String>,
}

/// The part of `batch` that retryable errors point at.
///
/// A document with a file-less retryable error (a store failure) comes back
/// whole; otherwise only its failed file references are kept. Documents with
/// no retryable error are dropped. Retrying already-imported content is
/// harmless since merging is idempotent.
pub fn retry_documents<S: StudyStore + ?Sized>(
    store: &S,
    batch: &[ImportDocument],
) -> Result<Vec<ImportDocument>> {
    let mut scopes: BTreeMap<String, RetryScope> = BTreeMap::new();
    for e in store.errors()? {
        if !e.reason.is_retryable() {
            continue;
        }
        let Some(id) = e.studyid else { continue };
        let scope = scopes.entry(id).or_default();
        match e.file {
            Some(f) => {
                scope.files.insert(f);
            }
            None => scope.whole = true,
        }
    }

    let mut out = Vec::new();
    for doc in batch {
        let Some(scope) = scopes.get(doc.studyid()) else { continue };
        if scope.whole {
            out.push(doc.clone());
            continue;
        }

        let mut narrowed = ImportDocument {
            study: doc.study.clone(),
            series: Vec::new(),
            labels: doc
                .labels
                .iter()
                .filter(|l| scope.files.contains(&l.file))
                .cloned()
                .collect(),
        };
        for s in &doc.series {
            let data: Vec<_> = s.data.iter().filter(|d| scope.files.contains(&d.file)).cloned().collect();
            if !data.is_empty() {
                let mut series = s.clone();
                series.data = data;
                narrowed.series.push(series);
            }
        }
        if narrowed.file_count() > 0 {
            out.push(narrowed);
        }
    }
    Ok(out)
}
