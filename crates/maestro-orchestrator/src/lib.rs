//! Per-user message orchestration: debounced merging, cancel-and-merge,
//! buffering, and the sub-agent synthesis turn.
//!
//! Each user gets one actor task owning an Idle → Merging → Processing →
//! WaitingSubAgents cycle. Messages arriving inside the merge window
//! coalesce into one run; a quick follow-up during a run cancels and
//! restarts it over the combined text; anything later queues behind the
//! run and starts exactly one new cycle when it finishes. At most one
//! run is ever active per user.
//!
//! # Main types
//!
//! - [`MessageOrchestrator`] — Spawns the per-user actor.
//! - [`OrchestratorHandle`] — Delivers messages and observes the phase.
//! - [`MainAgent`] — The reasoning-agent seam driven once per cycle.
//! - [`Phase`] — Where a conversation currently stands.

/// The actor loop and its cycle state.
pub mod actor;
/// The main agent seam.
pub mod agent;
/// The handle over a running actor.
pub mod handle;

pub use actor::{MessageOrchestrator, Phase};
pub use agent::{AgentTurn, MainAgent, TurnPhase};
pub use handle::OrchestratorHandle;
