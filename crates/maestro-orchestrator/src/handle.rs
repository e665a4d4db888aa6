//! The cloneable handle over a running orchestrator actor.

use maestro_core::{MaestroError, MaestroResult};
use tokio::sync::{mpsc, watch};

use crate::actor::{OrchestratorEvent, Phase};

/// Sends inbound messages to one user's orchestrator and observes its
/// phase. Cloning is cheap; all clones talk to the same actor.
#[derive(Clone)]
pub struct OrchestratorHandle {
    events: mpsc::UnboundedSender<OrchestratorEvent>,
    phase: watch::Receiver<Phase>,
}

impl OrchestratorHandle {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<OrchestratorEvent>,
        phase: watch::Receiver<Phase>,
    ) -> Self {
        Self { events, phase }
    }

    /// Delivers one inbound user message. Returns an error only when the
    /// actor has stopped.
    pub fn deliver(&self, text: impl Into<String>) -> MaestroResult<()> {
        self.events
            .send(OrchestratorEvent::UserMessage(text.into()))
            .map_err(|_| MaestroError::Orchestrator("orchestrator stopped".into()))
    }

    /// The phase at this instant.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Waits until the actor reaches `want`. Intermediate phases may be
    /// skipped; only the arrival at `want` is observed.
    pub async fn wait_for_phase(&self, want: Phase) -> MaestroResult<()> {
        let mut rx = self.phase.clone();
        rx.wait_for(|p| *p == want)
            .await
            .map(|_| ())
            .map_err(|_| MaestroError::Orchestrator("orchestrator stopped".into()))
    }

    /// Asks the actor to stop. In-flight work is cancelled, buffered
    /// messages are dropped.
    pub fn shutdown(&self) {
        let _ = self.events.send(OrchestratorEvent::Shutdown);
    }
}
