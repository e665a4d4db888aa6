//! Per-user session wiring.
//!
//! Ties the engine together: a [`SessionRegistry`] lazily creates one
//! [`UserSession`] per user (task manager, orchestrator actor, delivery
//! queue sharing one notifier), runs the idle-eviction sweep, and
//! bridges scheduler fires into the owning user's task manager.
//!
//! # Main types
//!
//! - [`SessionRegistry`] — all live sessions, creation and eviction
//! - [`UserSession`] — one user's task manager, orchestrator, and queue
//! - [`EngineDeps`] — the external seams, constructed once
//! - [`SessionWorkRunner`] — scheduler-to-task-manager bridge

/// Session registry and engine dependencies.
pub mod registry;
/// Scheduled-work bridge.
pub mod scheduled;
/// The per-user session object.
pub mod session;

pub use registry::{EngineDeps, SessionRegistry};
pub use scheduled::SessionWorkRunner;
pub use session::UserSession;
