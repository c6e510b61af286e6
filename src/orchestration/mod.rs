//! # Orchestration
//!
//! The engine's coordination layer: the [`Migrator`] state machine, the
//! [`PageProcessor`] that executes one bounded page per transaction, the
//! pure status projection, and the request/result types that flow between
//! them and through the scheduler.
//!
//! ## Key Components
//!
//! - **Migrator**: validates requests, reconciles cursors, persists page
//!   progress, and reschedules itself through the [`crate::scheduler`]
//! - **PageProcessor**: applies a transform to every record of one page
//! - **Status projection**: combines persisted state with worker liveness
//! - **Types**: [`RunRequest`], [`CursorArg`], [`SeriesLink`], [`PageResult`]

pub mod migrator;
pub mod page_processor;
pub mod status_projector;
pub mod types;

pub use migrator::Migrator;
pub use page_processor::PageProcessor;
pub use status_projector::project_status;
pub use types::{CursorArg, PageResult, RunRequest, SeriesLink};
