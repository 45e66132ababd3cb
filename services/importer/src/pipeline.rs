//! Batch import: convert every referenced file, merge into the stored
//! record, persist, and log what failed without stopping the batch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use studies::{
    apply_validation_split, merge, resolve_context, AppContext, ContextStore, DataEntry,
    ErrorEntry, ErrorReason, ImportDocument, LabelEntry, PartialContext, SeriesEntry,
    SourceEntry, SplitSummary, StudyRecord, StudyStore,
};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use voxel::{ArtifactMeta, ContainerKind, FormatConverter, VoxelError};

/// What happened to one document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentOutcome {
    pub studyid: String,
    pub succeeded: bool,
    /// The merged record was written (false for a no-op reimport).
    pub persisted: bool,
    pub files_converted: usize,
    pub files_failed: usize,
    pub appended: usize,
    pub duplicates: usize,
    pub errors: Vec<ErrorEntry>,
}

/// Totals over a batch, plus every error entry the batch produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportReport {
    pub succeeded: usize,
    pub failed: usize,
    pub files_converted: usize,
    pub files_failed: usize,
    pub appended: usize,
    pub duplicates: usize,
    pub errors: Vec<ErrorEntry>,
}

impl ImportReport {
    fn absorb(&mut self, outcome: DocumentOutcome) {
        if outcome.succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.files_converted += outcome.files_converted;
        self.files_failed += outcome.files_failed;
        self.appended += outcome.appended;
        self.duplicates += outcome.duplicates;
        self.errors.extend(outcome.errors);
    }
}

pub struct Importer<S: StudyStore> {
    store: Arc<S>,
    converter: Arc<FormatConverter>,
    context: AppContext,
}

impl<S: StudyStore> Clone for Importer<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            converter: Arc::clone(&self.converter),
            context: self.context.clone(),
        }
    }
}

impl<S: StudyStore> Importer<S> {
    pub fn new(store: Arc<S>, context: AppContext) -> Self {
        Self {
            store,
            converter: Arc::new(FormatConverter::default()),
            context,
        }
    }

    /// Resolve `partial` first; a configuration error aborts before any
    /// document is looked at.
    pub fn with_partial_context<C: ContextStore + ?Sized>(
        store: Arc<S>,
        contexts: &C,
        partial: PartialContext,
    ) -> studies::Result<Self> {
        let context = resolve_context(contexts, partial)?;
        Ok(Self::new(store, context))
    }

    pub fn with_converter(mut self, converter: FormatConverter) -> Self {
        self.converter = Arc::new(converter);
        self
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Import `documents` one after another.
    pub fn run(&self, documents: &[ImportDocument]) -> ImportReport {
        info!(db = %self.context.db, documents = documents.len(), "import: started");
        let mut report = ImportReport::default();
        for doc in documents {
            report.absorb(self.import_document(doc));
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            errors = report.errors.len(),
            "import: finished"
        );
        report
    }

    pub fn import_document(&self, doc: &ImportDocument) -> DocumentOutcome {
        let studyid = doc.studyid().to_string();
        let mut out = DocumentOutcome {
            studyid: studyid.clone(),
            ..Default::default()
        };

        if let Err(e) = doc.validate() {
            self.log_error(
                ErrorEntry::new(Some(&studyid), None, ErrorReason::InvalidDocument, e.to_string()),
                &mut out.errors,
            );
            return out;
        }

        let existing = match self.store.get(&studyid) {
            Ok(r) => r,
            Err(e) => {
                self.log_error(
                    ErrorEntry::new(
                        Some(&studyid),
                        None,
                        ErrorReason::StorePersistFailed,
                        format!("load failed: {e}"),
                    ),
                    &mut out.errors,
                );
                return out;
            }
        };

        let dest = self.context.artifact_dir(&studyid);
        let mut incoming = StudyRecord::new(doc.study.clone());

        for series in &doc.series {
            let mut data = Vec::with_capacity(series.data.len());
            for src in &series.data {
                if let Some(meta) = self.convert(&studyid, src, ContainerKind::Image, &dest, &mut out) {
                    data.push(DataEntry::from_artifact(src, &meta));
                }
            }
            incoming.series.push(SeriesEntry {
                seriesid: series.seriesid.clone(),
                description: series.description.clone(),
                data,
            });
        }

        for src in &doc.labels {
            let Some(meta) = self.convert(&studyid, src, ContainerKind::Label, &dest, &mut out) else {
                continue;
            };
            match meta.label.clone() {
                Some(stats) => incoming
                    .labels
                    .push(LabelEntry::new(DataEntry::from_artifact(src, &meta), stats)),
                None => {
                    out.files_converted -= 1;
                    out.files_failed += 1;
                    self.log_error(
                        ErrorEntry::new(
                            Some(&studyid),
                            Some(&src.file),
                            ErrorReason::ConversionFailed,
                            "label conversion produced no statistics",
                        ),
                        &mut out.errors,
                    );
                }
            }
        }

        if out.files_converted == 0 {
            warn!(studyid = %studyid, "import: no file converted, nothing to merge");
            return out;
        }

        let before = existing.clone();
        let merged = merge(existing, incoming);
        out.appended = merged.appended;
        out.duplicates = merged.duplicates;

        for c in &merged.conflicts {
            self.log_error(
                ErrorEntry::new(
                    Some(&studyid),
                    Some(&c.incoming_file),
                    ErrorReason::HashConflict,
                    format!("{}: {}", c.slot, c.detail),
                ),
                &mut out.errors,
            );
        }

        if before.as_ref() == Some(&merged.record) {
            debug!(studyid = %studyid, duplicates = out.duplicates, "import: record unchanged");
            out.succeeded = true;
            return out;
        }

        match self.store.upsert(&merged.record) {
            Ok(()) => {
                info!(
                    studyid = %studyid,
                    appended = out.appended,
                    duplicates = out.duplicates,
                    "import: record persisted"
                );
                out.persisted = true;
                out.succeeded = true;
            }
            Err(e) => {
                self.log_error(
                    ErrorEntry::new(
                        Some(&studyid),
                        None,
                        ErrorReason::StorePersistFailed,
                        format!("upsert failed: {e}"),
                    ),
                    &mut out.errors,
                );
            }
        }
        out
    }

    fn convert(
        &self,
        studyid: &str,
        src: &SourceEntry,
        kind: ContainerKind,
        dest: &Path,
        out: &mut DocumentOutcome,
    ) -> Option<ArtifactMeta> {
        match self.converter.convert(Path::new(&src.file), kind, dest) {
            Ok((_, meta)) => {
                out.files_converted += 1;
                Some(meta)
            }
            Err(e) => {
                out.files_failed += 1;
                let reason = match e {
                    VoxelError::ArtifactConflict { .. } => ErrorReason::HashConflict,
                    _ => ErrorReason::ConversionFailed,
                };
                self.log_error(
                    ErrorEntry::new(Some(studyid), Some(&src.file), reason, e.to_string()),
                    &mut out.errors,
                );
                None
            }
        }
    }

    /// Append to the store's error log and to `sink`. An entry the store
    /// refuses still reaches the report.
    fn log_error(&self, entry: ErrorEntry, sink: &mut Vec<ErrorEntry>) {
        warn!(
            studyid = entry.studyid.as_deref().unwrap_or("-"),
            file = entry.file.as_deref().unwrap_or("-"),
            reason = %entry.reason,
            "import: {}",
            entry.detail
        );
        if let Err(e) = self.store.append_error(&entry) {
            error!(reason = %entry.reason, "import: error log append failed: {e}");
        }
        sink.push(entry);
    }

    /// Recompute folds over every stored study using the context's fold count.
    pub fn validation_split(&self) -> studies::Result<SplitSummary> {
        let summary = apply_validation_split(self.store.as_ref(), self.context.folds)?;
        info!(
            folds = self.context.folds,
            studies = summary.studies,
            updated = summary.updated,
            "import: validation split applied"
        );
        Ok(summary)
    }
}

impl<S: StudyStore + 'static> Importer<S> {
    /// Import from async code without blocking the runtime: sequential on one
    /// blocking task when `max_parallel <= 1`, otherwise [`Self::run_concurrent`].
    pub async fn run_batch(&self, documents: Vec<ImportDocument>, max_parallel: usize) -> ImportReport {
        if max_parallel > 1 {
            return self.run_concurrent(documents, max_parallel).await;
        }
        let size = documents.len();
        let importer = self.clone();
        match tokio::task::spawn_blocking(move || importer.run(&documents)).await {
            Ok(report) => report,
            Err(e) => {
                let mut report = ImportReport::default();
                self.log_error(
                    ErrorEntry::new(None, None, ErrorReason::StorePersistFailed, format!("import task failed: {e}")),
                    &mut report.errors,
                );
                report.failed = size;
                report
            }
        }
    }

    /// Import with up to `max_parallel` studies in flight.
    ///
    /// Documents sharing a `studyid` stay in one group and run in batch
    /// order, so each study's read-merge-write never races itself. Outcomes
    /// are reported group by group in order of each group's first document.
    pub async fn run_concurrent(&self, documents: Vec<ImportDocument>, max_parallel: usize) -> ImportReport {
        info!(
            db = %self.context.db,
            documents = documents.len(),
            max_parallel,
            "import: started (concurrent)"
        );

        let mut order: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<ImportDocument>> = Vec::new();
        for doc in documents {
            let idx = *order.entry(doc.studyid().to_string()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[idx].push(doc);
        }

        let permits = Arc::new(Semaphore::new(max_parallel.max(1)));
        let mut handles = Vec::with_capacity(groups.len());
        for group in groups {
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(p) => p,
                Err(e) => {
                    error!("import: semaphore closed: {e}");
                    break;
                }
            };
            let studyid = group.first().map(|d| d.studyid().to_string()).unwrap_or_default();
            let size = group.len();
            let importer = self.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                group.iter().map(|d| importer.import_document(d)).collect::<Vec<_>>()
            });
            handles.push((studyid, size, handle));
        }

        let mut report = ImportReport::default();
        for (studyid, size, handle) in handles {
            match handle.await {
                Ok(outcomes) => outcomes.into_iter().for_each(|o| report.absorb(o)),
                Err(e) => {
                    // Whatever the group did before the panic is in the store;
                    // the whole group is marked for retry.
                    let mut errors = Vec::new();
                    self.log_error(
                        ErrorEntry::new(
                            Some(&studyid),
                            None,
                            ErrorReason::StorePersistFailed,
                            format!("import task failed: {e}"),
                        ),
                        &mut errors,
                    );
                    report.failed += size;
                    report.errors.extend(errors);
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            errors = report.errors.len(),
            "import: finished (concurrent)"
        );
        report
    }
}
