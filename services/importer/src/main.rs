use std::sync::Arc;

use anyhow::{Context, Result};
use kvstore::FileBackedStorage;
use studies::{resolve_context, save_context, ImportDocument, KvDocumentStore};
use tracing::{error, info};

use importer::config::ImporterConfig;
use importer::Importer;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = ImporterConfig::from_env()?;

    // --- Store ---
    let storage = FileBackedStorage::new(cfg.store_path.clone())
        .with_context(|| format!("Failed to open store {}", cfg.store_path.display()))?;
    let contexts = KvDocumentStore::new(storage, "");

    // --- Context (fatal if unresolved) ---
    let context = match resolve_context(&contexts, cfg.context.clone()) {
        Ok(c) => c,
        Err(e) => {
            error!(context = %cfg.context.name, "context resolution failed: {e}");
            return Err(e).context("Invalid application context");
        }
    };
    if cfg.save_context {
        save_context(&contexts, &context).context("Failed to save context")?;
        info!(context = %context.name, "context saved");
    }
    info!(
        context = %context.name,
        db = %context.db,
        dst_root = %context.dst_root.display(),
        folds = context.folds,
        "context resolved"
    );

    // --- Input ---
    let raw = std::fs::read(&cfg.documents)
        .with_context(|| format!("Failed to read {}", cfg.documents.display()))?;
    let documents: Vec<ImportDocument> =
        serde_json::from_slice(&raw).context("Import documents must be a JSON array")?;

    // --- Import ---
    let store = Arc::new(contexts.with_db(&context.db));
    let importer = Importer::new(store, context);
    let report = importer.run_batch(documents, cfg.concurrency).await;

    if cfg.split {
        let splitter = importer.clone();
        tokio::task::spawn_blocking(move || splitter.validation_split())
            .await
            .context("Validation split task failed")?
            .context("Validation split failed")?;
    }

    println!(
        "imported {} ok, {} failed ({} files converted, {} failed, {} new entries, {} duplicates)",
        report.succeeded,
        report.failed,
        report.files_converted,
        report.files_failed,
        report.appended,
        report.duplicates
    );
    for e in &report.errors {
        println!(
            "  [{}] {} {}: {}",
            e.reason,
            e.studyid.as_deref().unwrap_or("-"),
            e.file.as_deref().unwrap_or("-"),
            e.detail
        );
    }

    Ok(())
}
