//! Append-only merge of a converted import into a stored study record.

use crate::{DataEntry, LabelEntry, SeriesEntry, StudyMeta, StudyRecord};

/// An incoming entry whose hash is already stored with a different shape or
/// spacing. Not merged; reported instead.
#[derive(Clone, Debug, PartialEq)]
pub struct HashConflict {
    /// `series:<seriesid>` or `labels`.
    pub slot: String,
    pub hash: String,
    pub stored_file: String,
    pub incoming_file: String,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeOutcome {
    pub record: StudyRecord,
    pub appended: usize,
    pub duplicates: usize,
    pub conflicts: Vec<HashConflict>,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.appended > 0
    }
}

trait HasData {
    fn data(&self) -> &DataEntry;
}

impl HasData for DataEntry {
    fn data(&self) -> &DataEntry {
        self
    }
}

impl HasData for LabelEntry {
    fn data(&self) -> &DataEntry {
        &self.data
    }
}

/// Merge `incoming` (a study already populated with converted entries) into
/// `existing`.
///
/// Stored entries are never removed, reordered or modified. Within each
/// series (matched by `seriesid`) and within `labels`, an incoming entry is
/// appended only if its hash is new to that slot. Study metadata is filled
/// key by key where the stored value is absent or null.
pub fn merge(existing: Option<StudyRecord>, incoming: StudyRecord) -> MergeOutcome {
    let StudyRecord { study, series, labels } = incoming;

    let mut out = MergeOutcome {
        record: match existing {
            Some(mut rec) => {
                merge_meta(&mut rec.study, study);
                rec
            }
            None => StudyRecord::new(study),
        },
        appended: 0,
        duplicates: 0,
        conflicts: Vec::new(),
    };

    for inc in series {
        let slot = format!("series:{}", inc.seriesid);
        let idx = out.record.series.iter().position(|s| s.seriesid == inc.seriesid);
        match idx {
            Some(i) => {
                let target = &mut out.record.series[i];
                if target.description.is_empty() && !inc.description.is_empty() {
                    target.description = inc.description;
                }
                append_unique(&mut target.data, inc.data, &slot, &mut out.appended, &mut out.duplicates, &mut out.conflicts);
            }
            None => {
                let mut fresh = SeriesEntry {
                    seriesid: inc.seriesid,
                    description: inc.description,
                    data: Vec::new(),
                };
                append_unique(&mut fresh.data, inc.data, &slot, &mut out.appended, &mut out.duplicates, &mut out.conflicts);
                if !fresh.data.is_empty() {
                    out.record.series.push(fresh);
                }
            }
        }
    }

    append_unique(
        &mut out.record.labels,
        labels,
        "labels",
        &mut out.appended,
        &mut out.duplicates,
        &mut out.conflicts,
    );

    out
}

fn append_unique<T: HasData>(
    stored: &mut Vec<T>,
    incoming: Vec<T>,
    slot: &str,
    appended: &mut usize,
    duplicates: &mut usize,
    conflicts: &mut Vec<HashConflict>,
) {
    for entry in incoming {
        let new = entry.data();
        match stored.iter().find(|s| s.data().hash == new.hash) {
            None => {
                stored.push(entry);
                *appended += 1;
            }
            Some(old) => {
                let old = old.data();
                if old.shape == new.shape && old.dims == new.dims {
                    *duplicates += 1;
                } else {
                    conflicts.push(HashConflict {
                        slot: slot.to_string(),
                        hash: new.hash.clone(),
                        stored_file: old.file.clone(),
                        incoming_file: new.file.clone(),
                        detail: format!(
                            "hash {} stored with shape {:?} dims {:?}, incoming shape {:?} dims {:?}",
                            new.hash, old.shape, old.dims, new.shape, new.dims
                        ),
                    });
                }
            }
        }
    }
}

/// Fill absent or null metadata; existing values are never overwritten.
fn merge_meta(stored: &mut StudyMeta, incoming: StudyMeta) {
    if stored.studyid.is_empty() {
        stored.studyid = incoming.studyid;
    }
    for (folds, fold) in incoming.valid {
        stored.valid.entry(folds).or_insert(fold);
    }
    for (key, value) in incoming.fields {
        match stored.fields.get(&key) {
            Some(v) if !v.is_null() => {}
            _ => {
                stored.fields.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};
    use voxel::BoundingBox;

    fn entry(file: &str, hash: &str) -> DataEntry {
        DataEntry {
            file: file.into(),
            hash: hash.into(),
            dims: [1.0, 1.0, 1.0],
            shape: [2, 4, 4, 1],
            slices: 2,
            tags: BTreeSet::new(),
            kind: "orig".into(),
            name: None,
        }
    }

    fn label(file: &str, hash: &str) -> LabelEntry {
        LabelEntry {
            data: entry(file, hash),
            bounding_box: BoundingBox::Empty,
            nnz: BTreeMap::new(),
            max_slice: 0,
        }
    }

    fn record(id: &str, series: Vec<(&str, Vec<DataEntry>)>, labels: Vec<LabelEntry>) -> StudyRecord {
        StudyRecord {
            study: StudyMeta::new(id),
            series: series
                .into_iter()
                .map(|(sid, data)| SeriesEntry { seriesid: sid.into(), description: String::new(), data })
                .collect(),
            labels,
        }
    }

    #[test]
    fn test_absent_existing_takes_incoming() {
        let inc = record("s1", vec![("t1", vec![entry("a", "h1"), entry("a2", "h1")])], vec![label("m", "l1")]);
        let out = merge(None, inc);
        assert_eq!(out.record.series[0].data.len(), 1);
        assert_eq!(out.record.labels.len(), 1);
        assert_eq!(out.appended, 2);
        assert_eq!(out.duplicates, 1);
    }

    #[test]
    fn test_history_preserved_and_new_appended() {
        let existing = record("s1", vec![("t1", vec![entry("a", "A"), entry("b", "B")])], vec![]);
        let inc = record("s1", vec![("t1", vec![entry("c", "C")])], vec![]);

        let out = merge(Some(existing.clone()), inc);
        let hashes: Vec<&str> = out.record.series[0].data.iter().map(|d| d.hash.as_str()).collect();
        assert_eq!(hashes, vec!["A", "B", "C"]);
        assert_eq!(out.record.series[0].data[..2], existing.series[0].data[..]);
    }

    #[test]
    fn test_remerge_is_noop() {
        let inc = record("s1", vec![("t1", vec![entry("a", "A")])], vec![label("m", "L")]);
        let first = merge(None, inc.clone()).record;
        let again = merge(Some(first.clone()), inc);
        assert_eq!(again.record, first);
        assert!(!again.changed());
        assert_eq!(again.duplicates, 2);
    }

    #[test]
    fn test_unseen_series_appended_wholesale() {
        let existing = record("s1", vec![("t1", vec![entry("a", "A")])], vec![]);
        let inc = record("s1", vec![("t2", vec![entry("b", "B")]), ("t3", vec![])], vec![]);
        let out = merge(Some(existing), inc);
        let ids: Vec<&str> = out.record.series.iter().map(|s| s.seriesid.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn test_same_hash_in_other_series_is_kept() {
        let existing = record("s1", vec![("t1", vec![entry("a", "A")])], vec![]);
        let inc = record("s1", vec![("t2", vec![entry("a", "A")])], vec![]);
        let out = merge(Some(existing), inc);
        assert_eq!(out.record.series.len(), 2);
    }

    #[test]
    fn test_hash_conflict_reported_not_merged() {
        let existing = record("s1", vec![("t1", vec![entry("a", "A")])], vec![]);
        let mut odd = entry("z", "A");
        odd.dims = [3.0, 1.0, 1.0];
        let out = merge(Some(existing.clone()), record("s1", vec![("t1", vec![odd])], vec![]));

        assert_eq!(out.record, existing);
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].slot, "series:t1");
        assert_eq!(out.conflicts[0].incoming_file, "z");
    }

    #[test]
    fn test_meta_only_fills_gaps() {
        let mut existing = record("s1", vec![], vec![]);
        existing.study.fields.insert("patient".into(), json!("p1"));
        existing.study.fields.insert("date".into(), json!(null));
        existing.study.valid.insert(5, 2);

        let mut inc = record("s1", vec![], vec![]);
        inc.study.fields.insert("patient".into(), json!("OTHER"));
        inc.study.fields.insert("date".into(), json!("2020-01-01"));
        inc.study.fields.insert("slices".into(), json!(40));
        inc.study.valid.insert(5, 4);

        let meta = merge(Some(existing), inc).record.study;
        assert_eq!(meta.fields["patient"], json!("p1"));
        assert_eq!(meta.fields["date"], json!("2020-01-01"));
        assert_eq!(meta.fields["slices"], json!(40));
        assert_eq!(meta.valid[&5], 2);
    }
}
