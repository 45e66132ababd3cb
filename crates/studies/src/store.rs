use std::sync::{Arc, Mutex, MutexGuard};

use kvstore::Storage;

use crate::{AppContext, ErrorEntry, PartialContext, Result, StudiesError, StudyRecord};

/// Study collection of one database.
pub trait StudyStore: Send + Sync {
    fn get(&self, studyid: &str) -> Result<Option<StudyRecord>>;
    fn upsert(&self, record: &StudyRecord) -> Result<()>;
    fn list_studyids(&self) -> Result<Vec<String>>;
    fn append_error(&self, entry: &ErrorEntry) -> Result<()>;
    /// All error entries, oldest first.
    fn errors(&self) -> Result<Vec<ErrorEntry>>;
}

/// Named application contexts, kept apart from study data.
pub trait ContextStore: Send + Sync {
    fn get_context(&self, name: &str) -> Result<Option<PartialContext>>;
    fn put_context(&self, context: &AppContext) -> Result<()>;
    fn remove_context(&self, name: &str) -> Result<()>;
    fn list_contexts(&self) -> Result<Vec<String>>;
}

/// Document store over a byte-level [`Storage`].
///
/// Keys:
/// - `study:<hex db>:<studyid>` -> JSON [`StudyRecord`]
/// - `error:<hex db>:<seq>` -> JSON [`ErrorEntry`]
/// - `errseq:<hex db>` -> next error sequence number
/// - `context:<name>` -> JSON [`AppContext`]
///
/// Handles for different databases share the same storage; every
/// operation runs under the storage mutex, so read-modify-write cycles on
/// the store's own keys are atomic.
pub struct KvDocumentStore<S: Storage> {
    storage: Arc<Mutex<S>>,
    db: String,
}

impl<S: Storage> Clone for KvDocumentStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            db: self.db.clone(),
        }
    }
}

impl<S: Storage> KvDocumentStore<S> {
    pub fn new(storage: S, db: impl Into<String>) -> Self {
        Self {
            storage: Arc::new(Mutex::new(storage)),
            db: db.into(),
        }
    }

    /// Handle on another database sharing this storage.
    pub fn with_db(&self, db: impl Into<String>) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            db: db.into(),
        }
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    fn lock(&self) -> Result<MutexGuard<'_, S>> {
        self.storage
            .lock()
            .map_err(|_| StudiesError::Storage("storage lock poisoned".into()))
    }

    fn study_prefix(&self) -> String {
        format!("study:{}:", hex::encode(&self.db))
    }

    fn study_key(&self, studyid: &str) -> Vec<u8> {
        let mut k = self.study_prefix();
        k.push_str(studyid);
        k.into_bytes()
    }

    fn error_prefix(&self) -> String {
        format!("error:{}:", hex::encode(&self.db))
    }

    fn error_seq_key(&self) -> Vec<u8> {
        format!("errseq:{}", hex::encode(&self.db)).into_bytes()
    }
}

fn context_key(name: &str) -> Vec<u8> {
    format!("context:{name}").into_bytes()
}

fn to_json<T: serde::Serialize>(v: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(v).map_err(|e| StudiesError::Ser(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| StudiesError::Ser(e.to_string()))
}

impl<S: Storage> StudyStore for KvDocumentStore<S> {
    fn get(&self, studyid: &str) -> Result<Option<StudyRecord>> {
        let key = self.study_key(studyid);
        match self.lock()?.get(&key)? {
            Some(bytes) => Ok(Some(from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    fn upsert(&self, record: &StudyRecord) -> Result<()> {
        if record.studyid().is_empty() {
            return Err(StudiesError::InvalidDocument("record has no studyid".into()));
        }
        let key = self.study_key(record.studyid());
        let value = to_json(record)?;
        self.lock()?.put(&key, &value)?;
        Ok(())
    }

    fn list_studyids(&self) -> Result<Vec<String>> {
        let prefix = self.study_prefix();
        let rows = self.lock()?.scan_prefix(prefix.as_bytes())?;
        rows.into_iter()
            .map(|(k, _)| {
                String::from_utf8(k[prefix.len()..].to_vec())
                    .map_err(|e| StudiesError::Ser(e.to_string()))
            })
            .collect()
    }

    fn append_error(&self, entry: &ErrorEntry) -> Result<()> {
        let value = to_json(entry)?;
        let seq_key = self.error_seq_key();

        let mut storage = self.lock()?;
        let seq: u64 = match storage.get(&seq_key)? {
            Some(bytes) => from_json(&bytes)?,
            None => 0,
        };
        // Reserve the number before writing the entry: a failed entry write
        // leaves a gap, never an entry a later append would overwrite.
        storage.put(&seq_key, &to_json(&(seq + 1))?)?;
        // zero-padded so key order is append order
        let key = format!("{}{seq:020}", self.error_prefix()).into_bytes();
        storage.put(&key, &value)?;
        Ok(())
    }

    fn errors(&self) -> Result<Vec<ErrorEntry>> {
        let prefix = self.error_prefix();
        let rows = self.lock()?.scan_prefix(prefix.as_bytes())?;
        rows.iter().map(|(_, v)| from_json(v)).collect()
    }
}

impl<S: Storage> ContextStore for KvDocumentStore<S> {
    fn get_context(&self, name: &str) -> Result<Option<PartialContext>> {
        match self.lock()?.get(&context_key(name))? {
            Some(bytes) => Ok(Some(from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_context(&self, context: &AppContext) -> Result<()> {
        let value = to_json(context)?;
        self.lock()?.put(&context_key(&context.name), &value)?;
        Ok(())
    }

    fn remove_context(&self, name: &str) -> Result<()> {
        self.lock()?.delete(&context_key(name))?;
        Ok(())
    }

    fn list_contexts(&self) -> Result<Vec<String>> {
        let prefix = "context:";
        let rows = self.lock()?.scan_prefix(prefix.as_bytes())?;
        Ok(rows
            .into_iter()
            .map(|(k, _)| String::from_utf8_lossy(&k[prefix.len()..]).into_owned())
            .collect())
    }
}
