//! In-memory store implementations.
//!
//! `MemoryJobStore` and `MemoryCollection` back the test suites and embedded
//! single-process use. The collection pages records in identifier order with
//! an epoch-stamped continuation token, so swapping the collection contents
//! out from under an outstanding cursor surfaces the same fatal
//! invalid-cursor error a production store would raise.

use crate::error::{MigratorError, Result};
use crate::models::JobState;
use crate::store::{CollectionStore, CollectionTx, JobStore, RecordPage};
use crate::transform::{PartialUpdate, Record};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// In-memory [`JobStore`] with version-guarded updates.
#[derive(Default)]
pub struct MemoryJobStore {
    rows: Arc<RwLock<HashMap<String, JobState>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, name: &str) -> Result<Option<JobState>> {
        Ok(self.rows.read().get(name).cloned())
    }

    async fn get_or_create(&self, state: JobState) -> Result<JobState> {
        let mut rows = self.rows.write();
        let row = rows.entry(state.name.clone()).or_insert(state);
        Ok(row.clone())
    }

    async fn update(&self, mut state: JobState) -> Result<Option<JobState>> {
        let mut rows = self.rows.write();
        match rows.get(&state.name) {
            Some(stored) if stored.version == state.version => {
                state.version += 1;
                rows.insert(state.name.clone(), state.clone());
                Ok(Some(state))
            }
            Some(_) => Ok(None),
            None => Err(MigratorError::Store(format!(
                "update for unknown job: {}",
                state.name
            ))),
        }
    }

    async fn list_not_done(
        &self,
        since: Option<DateTime<Utc>>,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<JobState>> {
        let rows = self.rows.read();
        let mut matches: Vec<JobState> = rows
            .values()
            .filter(|s| !s.is_done)
            .filter(|s| since.map_or(true, |cutoff| s.created_at >= cutoff))
            .filter(|s| after.map_or(true, |name| s.name.as_str() > name))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<JobState>> {
        let rows = self.rows.read();
        let mut matches: Vec<JobState> = rows.values().cloned().collect();
        matches.sort_by(|a, b| b.latest_start.cmp(&a.latest_start));
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }

    async fn delete_done_before(
        &self,
        cutoff: Option<DateTime<Utc>>,
        page_size: i64,
    ) -> Result<u64> {
        let mut rows = self.rows.write();
        let victims: Vec<String> = rows
            .values()
            .filter(|s| s.is_done)
            .filter(|s| {
                cutoff.map_or(true, |c| s.latest_end.map(|end| end < c).unwrap_or(false))
            })
            .map(|s| s.name.clone())
            .take(page_size.max(0) as usize)
            .collect();
        for name in &victims {
            rows.remove(name);
        }
        Ok(victims.len() as u64)
    }
}

struct CollectionInner {
    records: BTreeMap<String, Record>,
    /// Bumped by [`MemoryCollection::invalidate_cursors`]; continuation
    /// tokens carry the epoch they were minted under.
    epoch: u64,
}

/// In-memory [`CollectionStore`] with buffered transactional writes and
/// deterministic id-ordered paging.
pub struct MemoryCollection {
    inner: Arc<RwLock<CollectionInner>>,
    commits: Arc<AtomicU64>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(CollectionInner {
                records: BTreeMap::new(),
                epoch: 0,
            })),
            commits: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn insert(&self, record: Record) {
        let mut inner = self.inner.write();
        inner.records.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.inner.read().records.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Number of committed transactions, used by tests to verify dry runs
    /// never commit.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Simulate swapping the underlying collection or filter between runs:
    /// every outstanding continuation token becomes invalid.
    pub fn invalidate_cursors(&self) {
        self.inner.write().epoch += 1;
    }

    fn encode_cursor(epoch: u64, last_id: &str) -> String {
        format!("v{epoch}:{last_id}")
    }

    fn decode_cursor(cursor: &str, current_epoch: u64) -> Result<String> {
        let (epoch_part, last_id) = cursor.split_once(':').ok_or_else(|| {
            MigratorError::InvalidCursor {
                job: String::new(),
                reason: format!("malformed token: {cursor}"),
            }
        })?;
        let epoch: u64 = epoch_part
            .strip_prefix('v')
            .and_then(|e| e.parse().ok())
            .ok_or_else(|| MigratorError::InvalidCursor {
                job: String::new(),
                reason: format!("malformed token: {cursor}"),
            })?;
        if epoch != current_epoch {
            return Err(MigratorError::InvalidCursor {
                job: String::new(),
                reason: "token was minted against a different collection state".to_string(),
            });
        }
        Ok(last_id.to_string())
    }
}

impl Default for MemoryCollection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CollectionStore for MemoryCollection {
    async fn begin(&self) -> Result<Box<dyn CollectionTx>> {
        Ok(Box::new(MemoryTx {
            inner: Arc::clone(&self.inner),
            commits: Arc::clone(&self.commits),
            pending: Vec::new(),
        }))
    }
}

struct MemoryTx {
    inner: Arc<RwLock<CollectionInner>>,
    commits: Arc<AtomicU64>,
    pending: Vec<(String, PartialUpdate)>,
}

#[async_trait]
impl CollectionTx for MemoryTx {
    async fn fetch_page(&mut self, cursor: Option<&str>, batch_size: i64) -> Result<RecordPage> {
        let inner = self.inner.read();
        let start_after = match cursor {
            Some(token) => Some(MemoryCollection::decode_cursor(token, inner.epoch)?),
            None => None,
        };

        let records: Vec<Record> = inner
            .records
            .values()
            .filter(|r| start_after.as_deref().map_or(true, |last| r.id.as_str() > last))
            .take(batch_size.max(0) as usize)
            .cloned()
            .collect();

        let is_done = match records.last() {
            Some(last) => inner.records.range(next_key(&last.id)..).next().is_none(),
            None => true,
        };
        let continuation = if is_done {
            None
        } else {
            records
                .last()
                .map(|r| MemoryCollection::encode_cursor(inner.epoch, &r.id))
        };

        Ok(RecordPage {
            records,
            continuation,
            is_done,
        })
    }

    async fn apply_update(&mut self, record_id: &str, update: &PartialUpdate) -> Result<()> {
        {
            let inner = self.inner.read();
            if !inner.records.contains_key(record_id) {
                return Err(MigratorError::Store(format!(
                    "record not found: {record_id}"
                )));
            }
        }
        self.pending.push((record_id.to_string(), update.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut inner = self.inner.write();
        for (id, update) in self.pending {
            if let Some(record) = inner.records.get_mut(&id) {
                for (field, value) in update {
                    record.fields.insert(field, value);
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Buffered writes are simply dropped.
        Ok(())
    }
}

/// Smallest string strictly greater than `key` in byte order.
fn next_key(key: &str) -> String {
    let mut next = key.to_string();
    next.push('\0');
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn record(id: &str) -> Record {
        Record::new(id, Map::new())
    }

    fn collection_of(n: usize) -> MemoryCollection {
        let collection = MemoryCollection::new();
        for i in 0..n {
            collection.insert(record(&format!("r{i:03}")));
        }
        collection
    }

    #[tokio::test]
    async fn test_paging_traverses_whole_collection() {
        let collection = collection_of(5);
        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut tx = collection.begin().await.unwrap();
            let page = tx.fetch_page(cursor.as_deref(), 2).await.unwrap();
            tx.rollback().await.unwrap();
            seen.extend(page.records.iter().map(|r| r.id.clone()));
            if page.is_done {
                break;
            }
            cursor = page.continuation;
        }

        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], "r000");
        assert_eq!(seen[4], "r004");
    }

    #[tokio::test]
    async fn test_final_page_has_no_continuation() {
        let collection = collection_of(4);
        let mut tx = collection.begin().await.unwrap();
        let page = tx.fetch_page(None, 4).await.unwrap();
        assert!(page.is_done);
        assert!(page.continuation.is_none());
    }

    #[tokio::test]
    async fn test_rollback_discards_updates() {
        let collection = collection_of(1);
        let mut tx = collection.begin().await.unwrap();
        let mut update = Map::new();
        update.insert("x".to_string(), json!(1));
        tx.apply_update("r000", &update).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(collection.get("r000").unwrap().get("x").is_none());
        assert_eq!(collection.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_merges_partial_update() {
        let collection = collection_of(1);
        let mut tx = collection.begin().await.unwrap();
        let mut update = Map::new();
        update.insert("x".to_string(), json!(1));
        tx.apply_update("r000", &update).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(collection.get("r000").unwrap().get("x"), Some(&json!(1)));
        assert_eq!(collection.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_cursor_is_fatal() {
        let collection = collection_of(4);
        let mut tx = collection.begin().await.unwrap();
        let page = tx.fetch_page(None, 2).await.unwrap();
        tx.rollback().await.unwrap();
        let stale = page.continuation.unwrap();

        collection.invalidate_cursors();

        let mut tx = collection.begin().await.unwrap();
        let err = tx.fetch_page(Some(&stale), 2).await.unwrap_err();
        assert!(matches!(err, MigratorError::InvalidCursor { .. }));
    }

    #[tokio::test]
    async fn test_job_store_cas_rejects_stale_version() {
        let store = MemoryJobStore::new();
        let state = store
            .get_or_create(JobState::new("j", None))
            .await
            .unwrap();

        let mut first = state.clone();
        first.processed = 1;
        let updated = store.update(first).await.unwrap();
        assert!(updated.is_some());

        // Second writer still holds version 0.
        let mut second = state;
        second.processed = 99;
        assert!(store.update(second).await.unwrap().is_none());

        let stored = store.get("j").await.unwrap().unwrap();
        assert_eq!(stored.processed, 1);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_list_not_done_pages_by_name() {
        let store = MemoryJobStore::new();
        for name in ["a", "b", "c"] {
            store
                .get_or_create(JobState::new(name, None))
                .await
                .unwrap();
        }

        let first = store.list_not_done(None, None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].name, "a");

        let rest = store.list_not_done(None, Some("b"), 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name, "c");
    }
}
