use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use voxel::{ArtifactMeta, BoundingBox, LabelStats};

use crate::{Result, StudiesError};

pub const DEFAULT_ENTRY_TYPE: &str = "orig";

fn default_entry_type() -> String {
    DEFAULT_ENTRY_TYPE.to_string()
}

/// One stored transformation of a series' (or label's) voxel content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataEntry {
    pub file: String,
    pub hash: String,
    pub dims: [f32; 3],
    pub shape: [usize; 4],
    pub slices: usize,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(rename = "type", default = "default_entry_type")]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl DataEntry {
    /// Stored entry for a converted source reference.
    pub fn from_artifact(source: &SourceEntry, meta: &ArtifactMeta) -> Self {
        Self {
            file: meta.file.to_string_lossy().into_owned(),
            hash: meta.hash.clone(),
            dims: meta.dims,
            shape: meta.shape,
            slices: meta.slices,
            tags: source.tags.clone(),
            kind: source.kind.clone().unwrap_or_else(default_entry_type),
            name: source.name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelEntry {
    #[serde(flatten)]
    pub data: DataEntry,
    pub bounding_box: BoundingBox,
    pub nnz: BTreeMap<i64, u64>,
    pub max_slice: usize,
}

impl LabelEntry {
    pub fn new(data: DataEntry, stats: LabelStats) -> Self {
        Self {
            data,
            bounding_box: stats.bounding_box,
            nnz: stats.nnz,
            max_slice: stats.max_slice,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub seriesid: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data: Vec<DataEntry>,
}

/// Study-level metadata. `studyid` and `valid` are typed; everything else
/// (patient ids, dates, ...) is kept as free-form JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyMeta {
    #[serde(default)]
    pub studyid: String,
    /// Fold count -> assigned fold index.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub valid: BTreeMap<u32, u32>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, JsonValue>,
}

impl StudyMeta {
    pub fn new(studyid: impl Into<String>) -> Self {
        Self {
            studyid: studyid.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// The persisted per-study document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StudyRecord {
    pub study: StudyMeta,
    #[serde(default)]
    pub series: Vec<SeriesEntry>,
    #[serde(default)]
    pub labels: Vec<LabelEntry>,
}

impl StudyRecord {
    pub fn new(study: StudyMeta) -> Self {
        Self {
            study,
            series: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn studyid(&self) -> &str {
        &self.study.studyid
    }

    pub fn series(&self, seriesid: &str) -> Option<&SeriesEntry> {
        self.series.iter().find(|s| s.seriesid == seriesid)
    }

    pub fn entry_count(&self) -> usize {
        self.series.iter().map(|s| s.data.len()).sum::<usize>() + self.labels.len()
    }

    pub fn hashes(&self) -> BTreeSet<&str> {
        self.series
            .iter()
            .flat_map(|s| s.data.iter())
            .map(|d| d.hash.as_str())
            .chain(self.labels.iter().map(|l| l.data.hash.as_str()))
            .collect()
    }
}

// ---- Import input ----

/// A reference to a source file, before conversion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub file: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SourceEntry {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            tags: BTreeSet::new(),
            kind: None,
            name: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceSeries {
    pub seriesid: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data: Vec<SourceEntry>,
}

/// Same shape as [`StudyRecord`], but every `file` points at a source file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportDocument {
    pub study: StudyMeta,
    #[serde(default)]
    pub series: Vec<SourceSeries>,
    #[serde(default)]
    pub labels: Vec<SourceEntry>,
}

impl ImportDocument {
    pub fn studyid(&self) -> &str {
        &self.study.studyid
    }

    pub fn file_count(&self) -> usize {
        self.series.iter().map(|s| s.data.len()).sum::<usize>() + self.labels.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.study.studyid.trim().is_empty() {
            return Err(StudiesError::InvalidDocument("study.studyid is missing".into()));
        }
        if self.file_count() == 0 {
            return Err(StudiesError::InvalidDocument(
                "document references no series or label files".into(),
            ));
        }
        if let Some(s) = self.series.iter().find(|s| s.seriesid.trim().is_empty()) {
            return Err(StudiesError::InvalidDocument(format!(
                "series with description {:?} has no seriesid",
                s.description
            )));
        }
        let blank_file = self
            .series
            .iter()
            .flat_map(|s| s.data.iter())
            .chain(self.labels.iter())
            .any(|e| e.file.trim().is_empty());
        if blank_file {
            return Err(StudiesError::InvalidDocument("empty file reference".into()));
        }
        Ok(())
    }
}

// ---- Error log ----

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorReason {
    InvalidDocument,
    ConversionFailed,
    StorePersistFailed,
    /// Equal content hash with different shape or spacing.
    HashConflict,
}

impl ErrorReason {
    /// Whether re-running the same input can succeed without a caller fix
    /// to the document itself.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorReason::ConversionFailed | ErrorReason::StorePersistFailed)
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorReason::InvalidDocument => "InvalidDocument",
            ErrorReason::ConversionFailed => "ConversionFailed",
            ErrorReason::StorePersistFailed => "StorePersistFailed",
            ErrorReason::HashConflict => "HashConflict",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub studyid: Option<String>,
    pub file: Option<String>,
    pub reason: ErrorReason,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn new(
        studyid: Option<&str>,
        file: Option<&str>,
        reason: ErrorReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            studyid: studyid.filter(|s| !s.is_empty()).map(str::to_string),
            file: file.map(str::to_string),
            reason,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}
