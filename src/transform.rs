//! # Transform Adapter
//!
//! The seam between the engine and user-supplied per-record code. A
//! [`Transform`] is handed one record at a time and answers with either
//! "no change" (`None`) or a partial update to merge into that record.
//! Transforms never touch job state; the orchestrator owns all bookkeeping.
//!
//! ## Usage
//!
//! ```rust
//! use migrator_core::transform::{FnTransform, Record, Transform};
//! use serde_json::{json, Map, Value};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let set_default = FnTransform::new(|record: &Record| {
//!     if record.fields.contains_key("locale") {
//!         return Ok(None);
//!     }
//!     let mut update = Map::new();
//!     update.insert("locale".to_string(), json!("en-US"));
//!     Ok(Some(update))
//! });
//!
//! let record = Record::new("doc-1", Map::new());
//! let update = set_default.apply(&record).await?;
//! assert!(update.is_some());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A partial update: field name to new value, merged into the record as a
/// single store-level update. An empty map means "no change".
pub type PartialUpdate = Map<String, Value>;

/// One document from the target collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned identifier, stable across pages.
    pub id: String,
    /// Document body as loosely-typed JSON fields.
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new<S: Into<String>>(id: S, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Field accessor for transforms that only need to inspect a value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// User-supplied per-record migration logic.
///
/// Implementations may perform external I/O. Errors abort the whole page;
/// the engine attaches the failing record's identifier for diagnostics.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Inspect one record and return the partial update to apply, or `None`
    /// for records that need no change (they still count as processed).
    async fn apply(&self, record: &Record) -> anyhow::Result<Option<PartialUpdate>>;
}

/// Adapter wrapping a plain function as a [`Transform`].
///
/// Convenient for simple field rewrites and for tests; transforms that need
/// async I/O should implement the trait directly.
pub struct FnTransform<F>
where
    F: Fn(&Record) -> anyhow::Result<Option<PartialUpdate>> + Send + Sync,
{
    func: F,
}

impl<F> FnTransform<F>
where
    F: Fn(&Record) -> anyhow::Result<Option<PartialUpdate>> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Transform for FnTransform<F>
where
    F: Fn(&Record) -> anyhow::Result<Option<PartialUpdate>> + Send + Sync,
{
    async fn apply(&self, record: &Record) -> anyhow::Result<Option<PartialUpdate>> {
        (self.func)(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_transform_no_change() {
        let noop = FnTransform::new(|_record: &Record| Ok(None));
        let record = Record::new("r1", Map::new());
        let result = noop.apply(&record).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_fn_transform_partial_update() {
        let transform = FnTransform::new(|record: &Record| {
            if record.get("count").is_some() {
                return Ok(None);
            }
            let mut update = Map::new();
            update.insert("count".to_string(), json!(0));
            Ok(Some(update))
        });

        let record = Record::new("r1", Map::new());
        let update = transform.apply(&record).await.unwrap().unwrap();
        assert_eq!(update.get("count"), Some(&json!(0)));

        let mut fields = Map::new();
        fields.insert("count".to_string(), json!(7));
        let record = Record::new("r2", fields);
        assert!(transform.apply(&record).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fn_transform_error_propagates() {
        let failing = FnTransform::new(|_record: &Record| Err(anyhow::anyhow!("user code blew up")));
        let record = Record::new("r1", Map::new());
        let err = failing.apply(&record).await.unwrap_err();
        assert!(err.to_string().contains("blew up"));
    }
}
