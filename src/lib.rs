//! # Migrator Core
//!
//! A resumable batch-migration engine: register transforms, run them over a
//! record collection in bounded pages, and survive restarts by persisting an
//! opaque continuation cursor after every committed page.
//!
//! ## Key Features
//!
//! - **Bounded pages**: one page per invocation, one transaction per page
//! - **Resumability**: a crashed or canceled job re-runs from its last
//!   committed cursor, never from the beginning
//! - **Single live worker per job**: duplicate starts silently defer to the
//!   invocation already in flight
//! - **Dry runs**: execute a page in a transaction that is always rolled
//!   back, returning the would-be status without persisting anything
//! - **Series**: chain jobs so each starts when its predecessor completes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use migrator_core::config::MigratorConfig;
//! use migrator_core::orchestration::{Migrator, RunRequest};
//! use migrator_core::registry::TransformRegistry;
//! use migrator_core::store::{MemoryCollection, MemoryJobStore};
//! use migrator_core::transform::{FnTransform, Record};
//! use std::sync::Arc;
//!
//! # async fn run() -> migrator_core::error::Result<()> {
//! let registry = TransformRegistry::new();
//! registry
//!     .register(
//!         "set-default",
//!         Arc::new(FnTransform::new(|record: &Record| {
//!             if record.get("flag").is_none() {
//!                 let mut update = serde_json::Map::new();
//!                 update.insert("flag".into(), serde_json::json!(false));
//!                 return Ok(Some(update));
//!             }
//!             Ok(None)
//!         })),
//!     )
//!     .await?;
//!
//! let (migrator, scheduler) = Migrator::with_tokio_scheduler(
//!     MigratorConfig::default(),
//!     registry,
//!     Arc::new(MemoryJobStore::new()),
//!     Arc::new(MemoryCollection::new()),
//! );
//! let status = migrator.run_page(RunRequest::new("set-default")).await?;
//! scheduler.quiesce().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod transform;

pub use config::MigratorConfig;
pub use error::{MigratorError, Result};
pub use models::{JobState, JobStatus, MigrationState, WorkerLiveness};
pub use orchestration::{CursorArg, Migrator, RunRequest, SeriesLink};
pub use registry::TransformRegistry;
pub use scheduler::{
    ManualScheduler, TokioScheduler, WorkDispatcher, WorkItem, WorkScheduler, WorkerRef,
};
pub use store::{
    CollectionStore, CollectionTx, JobStore, MemoryCollection, MemoryJobStore, PgJobStore,
    RecordPage,
};
pub use transform::{FnTransform, PartialUpdate, Record, Transform};
