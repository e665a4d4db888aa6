//! The main reasoning agent seam.

use maestro_core::{MaestroResult, UserId};
use maestro_tasks::CompletedWork;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What kind of turn the agent is being asked to take.
#[derive(Debug, Clone)]
pub enum TurnPhase {
    /// A (possibly merged) user message.
    User,
    /// A synthesis pass over the results of the cycle's delegated tasks.
    Synthesis {
        /// Completed sub-task results, in creation order.
        completed: Vec<CompletedWork>,
    },
}

/// One invocation of the main agent.
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub user_id: UserId,
    /// The message cycle this turn belongs to. Tasks the agent delegates
    /// during the turn must use this as their parent id.
    pub message_id: Uuid,
    /// The merged user text for the cycle.
    pub text: String,
    pub phase: TurnPhase,
    /// Fires when the cycle is cancelled; implementations observe it at
    /// their own suspension points and return early.
    pub cancellation: CancellationToken,
}

/// The long-lived reasoning agent behind one user's conversation.
///
/// `Ok(Some(text))` is a reply to deliver; `Ok(None)` means the turn
/// produced no user-visible output. Errors are caught at the cycle
/// boundary and never tear down the orchestrator.
#[async_trait::async_trait]
pub trait MainAgent: Send + Sync {
    /// Runs one turn to completion.
    async fn run(&self, turn: AgentTurn) -> MaestroResult<Option<String>>;
}
