use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{ContextStore, Result, StudiesError};

pub const DEFAULT_DST_ROOT: &str = "data";
pub const DEFAULT_FOLDS: u32 = 5;

/// Fully resolved application context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppContext {
    pub name: String,
    pub db: String,
    pub dst_root: PathBuf,
    pub folds: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl AppContext {
    /// Directory receiving converted artifacts for one study.
    pub fn artifact_dir(&self, studyid: &str) -> PathBuf {
        self.dst_root
            .join(path_component(&self.db))
            .join(path_component(studyid))
    }
}

/// Encode an id as a single path component. ASCII letters, digits, `-` and
/// `_` pass through; every other byte becomes `%XX`. Distinct ids give
/// distinct components and none of them is `.` or `..`. The empty id maps to
/// a lone `%`.
fn path_component(id: &str) -> String {
    if id.is_empty() {
        return "%".into();
    }
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// A context with any subset of fields set. Also the shape persisted
/// contexts are read back as.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialContext {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folds: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl PartialContext {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Fill fields unset here from `lower`.
    pub fn layered_over(self, lower: PartialContext) -> PartialContext {
        let mut extra = lower.extra;
        extra.extend(self.extra);
        PartialContext {
            name: self.name,
            db: self.db.filter(|d| !d.is_empty()).or(lower.db),
            dst_root: self.dst_root.or(lower.dst_root),
            folds: self.folds.or(lower.folds),
            extra,
        }
    }
}

/// Resolve `partial` into a full context: explicit fields win over the
/// persisted context of the same name, which wins over built-in defaults.
/// `db` has no default.
pub fn resolve_context<C: ContextStore + ?Sized>(
    store: &C,
    partial: PartialContext,
) -> Result<AppContext> {
    if partial.name.trim().is_empty() {
        return Err(StudiesError::Configuration("context name is empty".into()));
    }

    let layered = match store.get_context(&partial.name)? {
        Some(persisted) => partial.layered_over(persisted),
        None => partial,
    };

    let db = layered
        .db
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| {
            StudiesError::Configuration(format!("context {:?} has no db", layered.name))
        })?;

    let folds = layered.folds.unwrap_or(DEFAULT_FOLDS);
    if folds == 0 {
        return Err(StudiesError::Configuration("folds must be at least 1".into()));
    }

    Ok(AppContext {
        name: layered.name,
        db,
        dst_root: layered.dst_root.unwrap_or_else(|| PathBuf::from(DEFAULT_DST_ROOT)),
        folds,
        extra: layered.extra,
    })
}

pub fn save_context<C: ContextStore + ?Sized>(store: &C, context: &AppContext) -> Result<()> {
    store.put_context(context)
}

/// Removing an unknown name is a no-op.
pub fn remove_context<C: ContextStore + ?Sized>(store: &C, name: &str) -> Result<()> {
    store.remove_context(name)
}
