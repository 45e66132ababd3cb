use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use studies::PartialContext;

#[derive(Clone, Debug)]
pub struct ImporterConfig {
    /// JSON array of import documents.
    pub documents: PathBuf,
    pub store_path: PathBuf,
    /// Explicit context fields; unset ones come from the persisted context
    /// of the same name, then defaults.
    pub context: PartialContext,
    pub save_context: bool,
    pub concurrency: usize,
    pub split: bool,
}

impl ImporterConfig {
    pub fn from_env() -> Result<Self> {
        let documents = PathBuf::from(get("IMPORT_DOCUMENTS")?);
        let store_path = std::env::var("IMPORT_STORE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("importer_store.json"));

        let mut context = PartialContext::named(
            std::env::var("IMPORT_CONTEXT").unwrap_or_else(|_| "default".to_string()),
        );
        context.db = std::env::var("IMPORT_DB").ok();
        context.dst_root = std::env::var("IMPORT_DST_ROOT").ok().map(PathBuf::from);
        context.folds = match std::env::var("IMPORT_FOLDS") {
            Ok(v) => Some(v.parse::<u32>().with_context(|| format!("IMPORT_FOLDS is not a number: {v}"))?),
            Err(_) => None,
        };

        let concurrency = match std::env::var("IMPORT_CONCURRENCY") {
            Ok(v) => v
                .parse::<usize>()
                .with_context(|| format!("IMPORT_CONCURRENCY is not a number: {v}"))?,
            Err(_) => 1,
        };
        let save_context = flag("IMPORT_SAVE_CONTEXT", false);
        let split = flag("IMPORT_SPLIT", true);

        if concurrency == 0 {
            bail!("IMPORT_CONCURRENCY must be at least 1");
        }
        if context.folds == Some(0) {
            bail!("IMPORT_FOLDS must be at least 1");
        }

        Ok(Self {
            documents,
            store_path,
            context,
            save_context,
            concurrency,
            split,
        })
    }
}

fn get(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Missing required env var: {key}"))
}

fn flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(default)
}
