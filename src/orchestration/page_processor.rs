//! # Page Processor
//!
//! Applies the transform to every record of one bounded page inside one
//! collection transaction. A record visited but unchanged still counts as
//! processed. Any transform failure aborts the whole page with the offending
//! record's identifier attached; nothing from a failed page is committed.

use crate::error::{MigratorError, Result};
use crate::orchestration::types::PageResult;
use crate::store::CollectionTx;
use crate::transform::{PartialUpdate, Transform};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

/// Processes one page of records with a resolved transform.
pub struct PageProcessor {
    /// Run per-record transforms concurrently within the page. Callers must
    /// guarantee idempotence and freedom from intra-page read-after-write
    /// dependencies before enabling this.
    parallel: bool,
}

impl PageProcessor {
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    /// Fetch one page starting at `cursor`, run the transform over each
    /// record, stage the resulting updates on the transaction, and report
    /// the page outcome. The caller owns commit/rollback.
    pub async fn process(
        &self,
        tx: &mut dyn CollectionTx,
        transform: &Arc<dyn Transform>,
        job: &str,
        cursor: Option<&str>,
        batch_size: i64,
    ) -> Result<PageResult> {
        let page = tx.fetch_page(cursor, batch_size).await.map_err(|e| {
            // The memory/postgres stores cannot know the job name; stamp it
            // here so operator guidance names the job to restart.
            match e {
                MigratorError::InvalidCursor { reason, .. } => MigratorError::InvalidCursor {
                    job: job.to_string(),
                    reason,
                },
                other => other,
            }
        })?;

        let records_processed = page.records.len() as i64;
        debug!(
            job = %job,
            cursor = cursor,
            records = records_processed,
            is_done = page.is_done,
            parallel = self.parallel,
            "Processing page"
        );

        let updates: Vec<(String, Option<PartialUpdate>)> = if self.parallel {
            // All record transforms start together; the page advances only
            // once every one of them has settled successfully.
            try_join_all(page.records.iter().map(|record| async move {
                let update = transform.apply(record).await.map_err(|e| {
                    MigratorError::Transform {
                        job: job.to_string(),
                        record_id: record.id.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok::<_, MigratorError>((record.id.clone(), update))
            }))
            .await?
        } else {
            let mut staged = Vec::with_capacity(page.records.len());
            for record in &page.records {
                let update =
                    transform
                        .apply(record)
                        .await
                        .map_err(|e| MigratorError::Transform {
                            job: job.to_string(),
                            record_id: record.id.clone(),
                            reason: e.to_string(),
                        })?;
                staged.push((record.id.clone(), update));
            }
            staged
        };

        for (record_id, update) in updates {
            match update {
                Some(update) if !update.is_empty() => {
                    tx.apply_update(&record_id, &update).await?;
                }
                _ => {}
            }
        }

        Ok(PageResult {
            continuation: page.continuation,
            is_done: page.is_done,
            records_processed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CollectionStore, MemoryCollection};
    use crate::transform::{FnTransform, Record};
    use serde_json::{json, Map};

    fn collection_of(n: usize) -> MemoryCollection {
        let collection = MemoryCollection::new();
        for i in 0..n {
            collection.insert(Record::new(format!("r{i:03}"), Map::new()));
        }
        collection
    }

    fn set_flag() -> Arc<dyn Transform> {
        Arc::new(FnTransform::new(|_r: &Record| {
            let mut update = Map::new();
            update.insert("flag".to_string(), json!(true));
            Ok(Some(update))
        }))
    }

    #[tokio::test]
    async fn test_processes_full_page_and_counts_unchanged() {
        let collection = collection_of(3);
        // Change only one record; all three still count as processed.
        let transform: Arc<dyn Transform> = Arc::new(FnTransform::new(|r: &Record| {
            if r.id == "r001" {
                let mut update = Map::new();
                update.insert("flag".to_string(), json!(true));
                Ok(Some(update))
            } else {
                Ok(None)
            }
        }));

        let processor = PageProcessor::new(false);
        let mut tx = collection.begin().await.unwrap();
        let result = processor
            .process(tx.as_mut(), &transform, "j", None, 10)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(result.records_processed, 3);
        assert!(result.is_done);
        assert!(result.continuation.is_none());
        assert_eq!(collection.get("r001").unwrap().get("flag"), Some(&json!(true)));
        assert!(collection.get("r000").unwrap().get("flag").is_none());
    }

    #[tokio::test]
    async fn test_partial_page_returns_continuation() {
        let collection = collection_of(5);
        let processor = PageProcessor::new(false);
        let transform = set_flag();

        let mut tx = collection.begin().await.unwrap();
        let result = processor
            .process(tx.as_mut(), &transform, "j", None, 2)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(result.records_processed, 2);
        assert!(!result.is_done);
        assert!(result.continuation.is_some());
    }

    #[tokio::test]
    async fn test_transform_failure_names_record_and_stages_nothing() {
        let collection = collection_of(3);
        let transform: Arc<dyn Transform> = Arc::new(FnTransform::new(|r: &Record| {
            if r.id == "r001" {
                anyhow::bail!("cannot parse legacy field");
            }
            let mut update = Map::new();
            update.insert("flag".to_string(), json!(true));
            Ok(Some(update))
        }));

        let processor = PageProcessor::new(false);
        let mut tx = collection.begin().await.unwrap();
        let err = processor
            .process(tx.as_mut(), &transform, "j", None, 10)
            .await
            .unwrap_err();
        tx.rollback().await.unwrap();

        match err {
            MigratorError::Transform { record_id, reason, .. } => {
                assert_eq!(record_id, "r001");
                assert!(reason.contains("legacy field"));
            }
            other => panic!("expected transform error, got {other:?}"),
        }
        // Nothing committed: r000 was transformed before the failure but the
        // page aborted as a whole.
        assert!(collection.get("r000").unwrap().get("flag").is_none());
    }

    #[tokio::test]
    async fn test_parallel_page_applies_all_updates() {
        let collection = collection_of(4);
        let processor = PageProcessor::new(true);
        let transform = set_flag();

        let mut tx = collection.begin().await.unwrap();
        let result = processor
            .process(tx.as_mut(), &transform, "j", None, 10)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(result.records_processed, 4);
        for i in 0..4 {
            let record = collection.get(&format!("r{i:03}")).unwrap();
            assert_eq!(record.get("flag"), Some(&json!(true)));
        }
    }

    #[tokio::test]
    async fn test_invalid_cursor_is_stamped_with_job() {
        let collection = collection_of(2);
        let processor = PageProcessor::new(false);
        let transform = set_flag();

        let mut tx = collection.begin().await.unwrap();
        let err = processor
            .process(tx.as_mut(), &transform, "set-default", Some("v99:r000"), 2)
            .await
            .unwrap_err();
        tx.rollback().await.unwrap();

        match err {
            MigratorError::InvalidCursor { job, .. } => assert_eq!(job, "set-default"),
            other => panic!("expected invalid cursor error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_collection_is_done_immediately() {
        let collection = MemoryCollection::new();
        let processor = PageProcessor::new(false);
        let transform = set_flag();

        let mut tx = collection.begin().await.unwrap();
        let result = processor
            .process(tx.as_mut(), &transform, "j", None, 10)
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(result.records_processed, 0);
        assert!(result.is_done);
    }
}
