//! Record store abstraction and the in-memory implementation.
//!
//! The store is the only shared mutable resource in the system. It enforces
//! the unique-key constraint on (owner, repo, pr_number): a create against
//! an existing key updates that record instead of inserting a duplicate.
//! Concurrent writers get last-write-wins semantics on non-key fields.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ReviewError;
use crate::record::{RecordId, RecordKey, ReviewRecord};

/// Storage backend for review records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_key(&self, key: &RecordKey) -> Result<Option<ReviewRecord>, ReviewError>;

    async fn find_by_id(&self, id: RecordId) -> Result<Option<ReviewRecord>, ReviewError>;

    /// Insert a record, assigning its id. If a record already exists for the
    /// key, that record is updated in place (keeping its id) and returned.
    async fn create(&self, record: ReviewRecord) -> Result<ReviewRecord, ReviewError>;

    /// Persist the current state of an existing record.
    async fn save(&self, record: &ReviewRecord) -> Result<(), ReviewError>;
}

/// In-memory store for tests and single-process runs.
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<RecordKey, ReviewRecord>>,
    next_id: AtomicI64,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of stored records (one per key).
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_by_key(&self, key: &RecordKey) -> Result<Option<ReviewRecord>, ReviewError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<ReviewRecord>, ReviewError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn create(&self, mut record: ReviewRecord) -> Result<ReviewRecord, ReviewError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.key) {
            // Unique-key constraint: update the existing record, keep its id.
            record.id = existing.id;
        } else {
            record.id = RecordId(self.next_id.fetch_add(1, Ordering::SeqCst));
        }
        records.insert(record.key.clone(), record.clone());
        Ok(record)
    }

    async fn save(&self, record: &ReviewRecord) -> Result<(), ReviewError> {
        let mut records = self.records.write().await;
        records.insert(record.key.clone(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PrSnapshot;

    fn snapshot(sha: &str) -> PrSnapshot {
        PrSnapshot {
            repo_full_name: "octo/widgets".to_string(),
            title: "Add widget".to_string(),
            body: None,
            author: "octocat".to_string(),
            base_branch: "main".to_string(),
            head_branch: "feature".to_string(),
            head_sha: sha.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_id() {
        let store = InMemoryRecordStore::new();
        let key = RecordKey::new("octo", "widgets", 7);
        let record = store
            .create(ReviewRecord::new(key.clone(), snapshot("abc")))
            .await
            .unwrap();
        assert_ne!(record.id, RecordId(0));

        let found = store.find_by_id(record.id).await.unwrap();
        assert_eq!(found, Some(record));
    }

    #[tokio::test]
    async fn test_create_on_existing_key_updates_not_duplicates() {
        let store = InMemoryRecordStore::new();
        let key = RecordKey::new("octo", "widgets", 7);

        let first = store
            .create(ReviewRecord::new(key.clone(), snapshot("abc")))
            .await
            .unwrap();
        let second = store
            .create(ReviewRecord::new(key.clone(), snapshot("def")))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.len().await, 1);

        let found = store.find_by_key(&key).await.unwrap().unwrap();
        assert_eq!(found.snapshot.head_sha, "def");
    }

    #[tokio::test]
    async fn test_save_round_trip() {
        let store = InMemoryRecordStore::new();
        let key = RecordKey::new("octo", "widgets", 7);
        let mut record = store
            .create(ReviewRecord::new(key.clone(), snapshot("abc")))
            .await
            .unwrap();

        record.mark_in_progress().unwrap();
        store.save(&record).await.unwrap();

        let found = store.find_by_key(&key).await.unwrap().unwrap();
        assert_eq!(found.status, crate::record::ReviewStatus::InProgress);
    }
}
