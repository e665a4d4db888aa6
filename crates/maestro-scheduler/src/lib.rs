//! Recurring job scheduler.
//!
//! Users register jobs in five shapes (daily, weekly, monthly,
//! interval, once) with run-count limits. Armed timers deliver fires
//! into the engine, which re-validates, updates lifecycle state, and
//! hands the stored prompt to a [`ScheduledWorkRunner`]. Every
//! mutation lands in an append-only operation log, with full snapshots
//! on delete.
//!
//! # Main types
//!
//! - [`Scheduler`] — the multi-user engine
//! - [`ScheduledJob`] / [`JobDraft`] / [`JobPatch`] — job model
//! - [`TimerFacility`] — timer seam, with [`TokioTimers`] and
//!   [`ManualTimers`] implementations
//! - [`JobStore`] — persistence seam, with [`FileJobStore`] and
//!   [`MemoryJobStore`] implementations
//! - [`OperationLog`] — append-only JSONL operation history

/// Scheduler engine and the runner seam.
pub mod engine;
/// Job definitions, drafts, patches, and trigger predicates.
pub mod job;
/// Append-only operation log.
pub mod oplog;
/// Job persistence.
pub mod store;
/// Timer facility and implementations.
pub mod timers;
/// Field validation for user-supplied schedules.
pub mod validate;

pub use engine::{ScheduledWorkRunner, Scheduler};
pub use job::{JobDraft, JobPatch, ScheduleKind, ScheduledJob};
pub use oplog::{OpEntry, OperationLog};
pub use store::{FileJobStore, JobStore, MemoryJobStore};
pub use timers::{ManualTimers, TimerFacility, TimerGuard, TimerKey, TimerSpec, TokioTimers};
