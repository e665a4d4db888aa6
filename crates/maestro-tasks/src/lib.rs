//! Bounded per-user task pools with a review/retry quality gate.
//!
//! Each user owns a [`TaskManager`] holding at most ten live delegated
//! tasks. Tasks run in their own tokio tasks, carry per-task cancellation
//! tokens grouped by the message cycle that spawned them, and optionally
//! pass through a reviewer before completing. Every task leaves a
//! persisted, human-readable document behind.
//!
//! # Main types
//!
//! - [`TaskManager`] — Per-user pool: admission, execution, cancellation, waiting.
//! - [`Task`] — One delegated unit of work and its retry bookkeeping.
//! - [`WorkExecutor`] / [`WorkReviewer`] — Seams to the generative backend.
//! - [`DocumentStore`] — Persistence seam for task documents.

/// Task documents and their stores.
pub mod document;
/// The per-user task manager.
pub mod manager;
/// Executor and reviewer seams.
pub mod review;
/// Task state and status lifecycle.
pub mod task;

pub use document::{DocumentOutcome, DocumentStore, FileDocumentStore, NullDocumentStore};
pub use manager::{CompletedWork, TaskManager};
pub use review::{ReviewVerdict, WorkExecutor, WorkRequest, WorkReviewer};
pub use task::{RetryAttempt, Task, TaskStatus};
