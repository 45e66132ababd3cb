//! Deterministic cross-validation fold assignment.
//!
//! `fold = u64_le(blake3(studyid)[..8]) mod folds`. Assignment depends only
//! on the id and the fold count, so it is stable across runs and machines;
//! changing `folds` reshuffles most studies.

use std::collections::BTreeMap;

use crate::{Result, StudiesError, StudyStore};

pub fn fold_of(studyid: &str, folds: u32) -> u32 {
    let digest = blake3::hash(studyid.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(head) % u64::from(folds.max(1))) as u32
}

pub fn split<'a, I>(studyids: I, folds: u32) -> Result<BTreeMap<String, u32>>
where
    I: IntoIterator<Item = &'a str>,
{
    if folds == 0 {
        return Err(StudiesError::InvalidFolds(folds));
    }
    Ok(studyids
        .into_iter()
        .map(|id| (id.to_string(), fold_of(id, folds)))
        .collect())
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitSummary {
    pub studies: usize,
    /// Records whose `study.valid[folds]` was written or changed.
    pub updated: usize,
}

/// Recompute folds over every stored study and write each into
/// `study.valid[folds]`. Re-running with the same `folds` writes nothing.
pub fn apply_validation_split<S: StudyStore + ?Sized>(store: &S, folds: u32) -> Result<SplitSummary> {
    let ids = store.list_studyids()?;
    let assignment = split(ids.iter().map(String::as_str), folds)?;

    let mut summary = SplitSummary {
        studies: assignment.len(),
        updated: 0,
    };
    for (id, fold) in assignment {
        let Some(mut rec) = store.get(&id)? else { continue };
        if rec.study.valid.get(&folds) == Some(&fold) {
            continue;
        }
        rec.study.valid.insert(folds, fold);
        store.upsert(&rec)?;
        summary.updated += 1;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KvDocumentStore, StudyMeta, StudyRecord};
    use kvstore::InMemoryStorage;

    #[test]
    fn test_split_deterministic() {
        let ids: Vec<String> = (0..200).map(|i| format!("study-{i}")).collect();
        let a = split(ids.iter().map(String::as_str), 5).unwrap();
        let b = split(ids.iter().map(String::as_str), 5).unwrap();
        assert_eq!(a, b);
        assert!(a.values().all(|f| *f < 5));
    }

    #[test]
    fn test_split_uses_every_fold() {
        let ids: Vec<String> = (0..500).map(|i| format!("s{i}")).collect();
        let a = split(ids.iter().map(String::as_str), 10).unwrap();
        let used: std::collections::BTreeSet<u32> = a.values().copied().collect();
        assert_eq!(used.len(), 10);
    }

    #[test]
    fn test_zero_folds_rejected() {
        assert!(matches!(split(["a"], 0), Err(StudiesError::InvalidFolds(0))));
    }

    #[test]
    fn test_apply_is_idempotent_and_keeps_other_fold_counts() {
        let store = KvDocumentStore::new(InMemoryStorage::new(), "db");
        for i in 0..20 {
            store.upsert(&StudyRecord::new(StudyMeta::new(format!("s{i}")))).unwrap();
        }

        let first = apply_validation_split(&store, 5).unwrap();
        assert_eq!(first, SplitSummary { studies: 20, updated: 20 });
        let second = apply_validation_split(&store, 5).unwrap();
        assert_eq!(second.updated, 0);

        apply_validation_split(&store, 10).unwrap();
        let rec = store.get("s3").unwrap().unwrap();
        assert_eq!(rec.study.valid.get(&5), Some(&fold_of("s3", 5)));
        assert_eq!(rec.study.valid.get(&10), Some(&fold_of("s3", 10)));
    }
}
