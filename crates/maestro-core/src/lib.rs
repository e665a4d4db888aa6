//! Core types and error definitions for the Maestro engine.
//!
//! This crate provides the foundational types shared across all Maestro
//! crates: error handling, user identity, the outbound notification seam,
//! and engine configuration.
//!
//! # Main types
//!
//! - [`MaestroError`] — Unified error enum for all Maestro subsystems.
//! - [`MaestroResult`] — Convenience alias for `Result<T, MaestroError>`.
//! - [`UserId`] — Transport-assigned identity of an end user.
//! - [`Notifier`] — The seam components use to push text to a user.
//! - [`config::EngineConfig`] — Tunable limits for every subsystem.

/// Engine configuration sections and their defaults.
pub mod config;

use serde::{Deserialize, Serialize};

// --- Error types ---

/// Top-level error type for the Maestro engine.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum MaestroError {
    /// An error from the task manager or a task execution boundary.
    #[error("Task error: {0}")]
    Task(String),

    /// An error from the per-user message orchestrator.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error from the outbound delivery queue or its transport.
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// An error from the recurring job scheduler.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// A synchronous rejection of invalid user-supplied input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error related to session creation, lookup, or teardown.
    #[error("Session error: {0}")]
    Session(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

// --- User identity ---

/// Transport-assigned identity of an end user.
///
/// Every per-user structure in the engine (task pool, orchestrator
/// context, delivery lane, job map) is keyed by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// --- Notification seam ---

/// Pushes user-visible text toward one user.
///
/// Implemented by the delivery queue so that task completions, retry
/// notices, queue acknowledgements, and scheduler output all travel the
/// same strictly ordered lane. An implementation is scoped to a single
/// user; callers never pass the recipient.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Queues one text message for the user. Returns once the message is
    /// accepted for delivery, not once it is sent.
    async fn notify(&self, text: &str) -> MaestroResult<()>;
}
