use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{JsonlLog, StoreError};
use crate::models::SubmissionRecord;

/// Log line: the record plus a digest of the API key that created it.
/// Lines written without an owner never match a lookup.
#[derive(Debug, Serialize, Deserialize)]
struct OwnedRecord {
    #[serde(default)]
    owner: String,
    #[serde(flatten)]
    record: SubmissionRecord,
}

/// Accepted submissions keyed by owner and scope. Backs idempotent replay
/// across restarts; the in-memory guard only covers the running process.
pub struct SubmissionStore {
    log: JsonlLog<OwnedRecord>,
    index: DashMap<String, SubmissionRecord>,
}

fn index_key(owner: &str, scope: &str) -> String {
    format!("{owner}|{scope}")
}

impl SubmissionStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let log: JsonlLog<OwnedRecord> = JsonlLog::new(path);
        let index = DashMap::new();
        for line in log.read_all().await? {
            index.insert(index_key(&line.owner, &line.record.scope), line.record);
        }
        Ok(Self { log, index })
    }

    /// Record stored for `scope` by the caller identified by `owner`.
    pub fn get(&self, owner: &str, scope: &str) -> Option<SubmissionRecord> {
        self.index
            .get(&index_key(owner, scope))
            .map(|entry| entry.value().clone())
    }

    /// Insert or replace the owner's record for its scope.
    pub async fn put(&self, owner: &str, record: &SubmissionRecord) -> Result<(), StoreError> {
        let line = OwnedRecord {
            owner: owner.to_string(),
            record: record.clone(),
        };
        self.log.append(&line).await?;
        self.index.insert(index_key(owner, &record.scope), line.record);
        Ok(())
    }

    pub fn find_by_document(&self, document_id: &str) -> Option<SubmissionRecord> {
        self.find(|r| r.document_id.as_deref() == Some(document_id))
    }

    pub fn find_by_external_reference(&self, reference: &str) -> Option<SubmissionRecord> {
        self.find(|r| r.external_reference == reference)
    }

    fn find(&self, predicate: impl Fn(&SubmissionRecord) -> bool) -> Option<SubmissionRecord> {
        self.index
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
    }
}
