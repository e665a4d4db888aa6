//! The per-user orchestration actor.
//!
//! One tokio task owns each user's conversation state and serializes
//! every transition: merge-window debouncing, run spawning,
//! cancel-and-merge, buffering, and the buffered-message drain all
//! happen inside this loop, so there is no window in which two runs can
//! be active or a buffered message can be dropped between a drain and a
//! refill.

use std::sync::Arc;
use std::time::Duration;

use maestro_core::config::OrchestratorConfig;
use maestro_core::{Notifier, UserId};
use maestro_tasks::TaskManager;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentTurn, MainAgent, TurnPhase};
use crate::handle::OrchestratorHandle;

/// Where a user's conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing in flight.
    Idle,
    /// Collecting messages until the merge window closes.
    Merging,
    /// The main agent is running the merged message.
    Processing,
    /// The run finished but delegated tasks are still settling.
    WaitingSubAgents,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Merging => write!(f, "merging"),
            Phase::Processing => write!(f, "processing"),
            Phase::WaitingSubAgents => write!(f, "waiting_sub_agents"),
        }
    }
}

pub(crate) enum OrchestratorEvent {
    UserMessage(String),
    RunWaiting { message_id: Uuid },
    RunFinished { message_id: Uuid },
    Shutdown,
}

/// One in-flight message cycle.
struct Cycle {
    message_id: Uuid,
    text: String,
    /// Fires when the merge window closes and processing should begin.
    merge_deadline: tokio::time::Instant,
    /// Messages arriving before this instant restart the cycle
    /// (cancel-and-merge); later ones are buffered.
    window_expires_at: tokio::time::Instant,
    run_token: CancellationToken,
    run_handle: Option<JoinHandle<()>>,
}

impl Cycle {
    fn new(text: String, merge_window: Duration) -> Self {
        let now = tokio::time::Instant::now();
        Self {
            message_id: Uuid::new_v4(),
            text,
            merge_deadline: now + merge_window,
            window_expires_at: now + merge_window,
            run_token: CancellationToken::new(),
            run_handle: None,
        }
    }
}

/// The per-user message orchestrator.
///
/// Construct with [`MessageOrchestrator::spawn`], which starts the actor
/// task and returns a cloneable [`OrchestratorHandle`].
pub struct MessageOrchestrator {
    user_id: UserId,
    config: OrchestratorConfig,
    agent: Arc<dyn MainAgent>,
    tasks: TaskManager,
    notifier: Arc<dyn Notifier>,
    events_rx: mpsc::UnboundedReceiver<OrchestratorEvent>,
    events_tx: mpsc::UnboundedSender<OrchestratorEvent>,
    phase_tx: watch::Sender<Phase>,
    cycle: Option<Cycle>,
    buffer: Vec<String>,
}

impl MessageOrchestrator {
    /// Starts the actor for one user and returns its handle.
    pub fn spawn(
        user_id: UserId,
        config: OrchestratorConfig,
        agent: Arc<dyn MainAgent>,
        tasks: TaskManager,
        notifier: Arc<dyn Notifier>,
    ) -> OrchestratorHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);
        let actor = Self {
            user_id,
            config,
            agent,
            tasks,
            notifier,
            events_rx,
            events_tx: events_tx.clone(),
            phase_tx,
            cycle: None,
            buffer: Vec::new(),
        };
        tokio::spawn(actor.run());
        OrchestratorHandle::new(events_tx, phase_rx)
    }

    async fn run(mut self) {
        info!(user_id = %self.user_id, "orchestrator started");
        loop {
            let merge_deadline = match *self.phase_tx.borrow() {
                Phase::Merging => self.cycle.as_ref().map(|c| c.merge_deadline),
                _ => None,
            };
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(OrchestratorEvent::UserMessage(text)) => self.on_user_message(text).await,
                    Some(OrchestratorEvent::RunWaiting { message_id }) => self.on_run_waiting(message_id),
                    Some(OrchestratorEvent::RunFinished { message_id }) => self.on_run_finished(message_id),
                    Some(OrchestratorEvent::Shutdown) | None => break,
                },
                () = async {
                    match merge_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => self.on_merge_deadline(),
            }
        }
        if let Some(cycle) = &self.cycle {
            cycle.run_token.cancel();
        }
        info!(user_id = %self.user_id, "orchestrator stopped");
    }

    fn set_phase(&self, next: Phase) {
        let prev = *self.phase_tx.borrow();
        if prev != next {
            debug!(user_id = %self.user_id, from = %prev, to = %next, "phase change");
            let _ = self.phase_tx.send(next);
        }
    }

    fn phase(&self) -> Phase {
        *self.phase_tx.borrow()
    }

    async fn on_user_message(&mut self, text: String) {
        match self.phase() {
            Phase::Idle => {
                self.begin_merging(text);
            }
            Phase::Merging => {
                if let Some(cycle) = self.cycle.as_mut() {
                    cycle.text.push('\n');
                    cycle.text.push_str(&text);
                    cycle.merge_deadline =
                        tokio::time::Instant::now() + self.config.merge_window();
                    debug!(
                        user_id = %self.user_id,
                        message_id = %cycle.message_id,
                        "merged message, window restarted"
                    );
                }
            }
            Phase::Processing | Phase::WaitingSubAgents => {
                let within_window = self
                    .cycle
                    .as_ref()
                    .is_some_and(|c| tokio::time::Instant::now() < c.window_expires_at);
                if within_window {
                    self.cancel_and_merge(text).await;
                } else {
                    self.buffer.push(text);
                    debug!(
                        user_id = %self.user_id,
                        queued = self.buffer.len(),
                        "message buffered behind active run"
                    );
                    self.notify(
                        "I'm still working on your previous message. \
                         I've queued this one and will pick it up next.",
                    )
                    .await;
                }
            }
        }
    }

    /// A quick follow-up lands while the run is fresh: stop the run and
    /// its delegated tasks, then restart one cycle over the combined text.
    async fn cancel_and_merge(&mut self, text: String) {
        let Some(mut cycle) = self.cycle.take() else {
            self.begin_merging(text);
            return;
        };
        cycle.run_token.cancel();
        let cancelled = self.tasks.cancel_tasks_by_parent(cycle.message_id).await;
        info!(
            user_id = %self.user_id,
            message_id = %cycle.message_id,
            cancelled_tasks = cancelled,
            "cancel and merge"
        );
        self.notify("Got your follow-up, updating my approach to include it.")
            .await;
        if let Some(handle) = cycle.run_handle.take() {
            if tokio::time::timeout(self.config.cancel_grace(), handle)
                .await
                .is_err()
            {
                warn!(
                    user_id = %self.user_id,
                    message_id = %cycle.message_id,
                    "cancelled run did not settle within the grace period"
                );
            }
        }
        let merged = format!("{}\n{text}", cycle.text);
        self.begin_merging(merged);
    }

    fn begin_merging(&mut self, text: String) {
        let cycle = Cycle::new(text, self.config.merge_window());
        info!(
            user_id = %self.user_id,
            message_id = %cycle.message_id,
            "merge window opened"
        );
        self.cycle = Some(cycle);
        self.set_phase(Phase::Merging);
    }

    fn on_merge_deadline(&mut self) {
        let Some(cycle) = self.cycle.as_mut() else {
            return;
        };
        cycle.window_expires_at = tokio::time::Instant::now() + self.config.merge_window();
        let context = RunContext {
            user_id: self.user_id.clone(),
            agent: self.agent.clone(),
            tasks: self.tasks.clone(),
            notifier: self.notifier.clone(),
            events: self.events_tx.clone(),
            subagent_wait: self.config.subagent_wait(),
        };
        info!(
            user_id = %self.user_id,
            message_id = %cycle.message_id,
            chars = cycle.text.len(),
            "merge window closed, processing"
        );
        cycle.run_handle = Some(tokio::spawn(context.run(
            cycle.message_id,
            cycle.text.clone(),
            cycle.run_token.clone(),
        )));
        self.set_phase(Phase::Processing);
    }

    fn on_run_waiting(&mut self, message_id: Uuid) {
        if self.cycle.as_ref().is_some_and(|c| c.message_id == message_id) {
            self.set_phase(Phase::WaitingSubAgents);
        } else {
            debug!(user_id = %self.user_id, %message_id, "stale waiting event dropped");
        }
    }

    fn on_run_finished(&mut self, message_id: Uuid) {
        if !self.cycle.as_ref().is_some_and(|c| c.message_id == message_id) {
            debug!(user_id = %self.user_id, %message_id, "stale finish event dropped");
            return;
        }
        info!(user_id = %self.user_id, %message_id, "cycle finished");
        self.cycle = None;
        if self.buffer.is_empty() {
            self.set_phase(Phase::Idle);
        } else {
            // Drain happens here, inside the actor, so a message arriving
            // mid-drain is simply the next event this loop handles.
            let merged = self.buffer.join("\n");
            let queued = self.buffer.len();
            self.buffer.clear();
            info!(user_id = %self.user_id, queued, "starting cycle from queued messages");
            self.begin_merging(merged);
        }
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.notifier.notify(text).await {
            warn!(user_id = %self.user_id, error = %e, "notification failed");
        }
    }
}

/// Everything one run needs, cloned out of the actor so the run owns it.
struct RunContext {
    user_id: UserId,
    agent: Arc<dyn MainAgent>,
    tasks: TaskManager,
    notifier: Arc<dyn Notifier>,
    events: mpsc::UnboundedSender<OrchestratorEvent>,
    subagent_wait: Duration,
}

impl RunContext {
    async fn run(self, message_id: Uuid, text: String, cancellation: CancellationToken) {
        let turn = AgentTurn {
            user_id: self.user_id.clone(),
            message_id,
            text: text.clone(),
            phase: TurnPhase::User,
            cancellation: cancellation.clone(),
        };
        match self.agent.run(turn).await {
            Ok(Some(reply)) => self.notify(&reply).await,
            Ok(None) => {}
            Err(e) => {
                warn!(
                    user_id = %self.user_id,
                    %message_id,
                    error = %e,
                    "main agent turn failed"
                );
                if !cancellation.is_cancelled() {
                    self.notify("I ran into an error handling that message. Please try again.")
                        .await;
                }
            }
        }

        if !cancellation.is_cancelled() {
            let live = self.tasks.live_task_count(message_id).await;
            if live > 0 {
                let _ = self.events.send(OrchestratorEvent::RunWaiting { message_id });
                self.notify(&format!(
                    "Still working: {live} background task(s) running. \
                     I'll follow up when they finish."
                ))
                .await;
                let completed = self
                    .tasks
                    .wait_for_tasks(message_id, Some(self.subagent_wait))
                    .await;
                if !cancellation.is_cancelled() && !completed.is_empty() {
                    let turn = AgentTurn {
                        user_id: self.user_id.clone(),
                        message_id,
                        text,
                        phase: TurnPhase::Synthesis { completed },
                        cancellation: cancellation.clone(),
                    };
                    match self.agent.run(turn).await {
                        Ok(Some(reply)) => self.notify(&reply).await,
                        Ok(None) => {}
                        Err(e) => warn!(
                            user_id = %self.user_id,
                            %message_id,
                            error = %e,
                            "synthesis turn failed"
                        ),
                    }
                }
            }
        }

        let _ = self.events.send(OrchestratorEvent::RunFinished { message_id });
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.notifier.notify(text).await {
            warn!(user_id = %self.user_id, error = %e, "notification failed");
        }
    }
}
