//! One user's live engine state.

use std::sync::Arc;

use maestro_core::{MaestroResult, Notifier, UserId};
use maestro_delivery::DeliveryQueue;
use maestro_orchestrator::{MessageOrchestrator, OrchestratorHandle, Phase};
use maestro_tasks::TaskManager;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::registry::EngineDeps;

/// Everything that exists per user: the task manager, the orchestrator
/// actor, and the ordered delivery lane. Sessions are created by the
/// registry on first contact and torn down by idle eviction.
pub struct UserSession {
    user_id: UserId,
    tasks: TaskManager,
    orchestrator: OrchestratorHandle,
    queue: DeliveryQueue,
    last_seen: Mutex<Instant>,
}

impl UserSession {
    pub(crate) fn open(user_id: UserId, deps: &EngineDeps) -> Arc<Self> {
        let queue = DeliveryQueue::new(user_id.clone(), deps.transport.clone());
        let notifier: Arc<dyn Notifier> = Arc::new(queue.clone());
        let tasks = TaskManager::new(
            user_id.clone(),
            deps.config.tasks.clone(),
            deps.executor.clone(),
            deps.reviewer.clone(),
            notifier.clone(),
            deps.documents.clone(),
        );
        let orchestrator = MessageOrchestrator::spawn(
            user_id.clone(),
            deps.config.orchestrator.clone(),
            deps.agent.clone(),
            tasks.clone(),
            notifier,
        );
        Arc::new(Self {
            user_id,
            tasks,
            orchestrator,
            queue,
            last_seen: Mutex::new(Instant::now()),
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn orchestrator(&self) -> &OrchestratorHandle {
        &self.orchestrator
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Hands an inbound message to the orchestrator.
    pub fn deliver_message(&self, text: &str) -> MaestroResult<()> {
        self.touch();
        self.orchestrator.deliver(text)
    }

    pub(crate) fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_seen.lock().elapsed()
    }

    /// True when nothing is in flight: orchestrator idle, no live
    /// tasks, delivery lane drained. Only quiescent sessions may be
    /// evicted.
    pub async fn is_quiescent(&self) -> bool {
        self.orchestrator.phase() == Phase::Idle
            && self.tasks.active_count().await == 0
            && self.queue.pending_len() == 0
    }

    pub(crate) fn shutdown(&self) {
        self.orchestrator.shutdown();
    }
}
