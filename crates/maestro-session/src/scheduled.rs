//! Bridges scheduler fires into per-user task execution.

use std::sync::Arc;

use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult, UserId};
use maestro_scheduler::ScheduledWorkRunner;
use tracing::debug;
use uuid::Uuid;

use crate::registry::SessionRegistry;

/// Runs a fired job's prompt inside the owning user's task manager, so
/// scheduled work shares the admission limits, documents, and delivery
/// path of delegated work.
pub struct SessionWorkRunner {
    registry: Arc<SessionRegistry>,
}

impl SessionWorkRunner {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ScheduledWorkRunner for SessionWorkRunner {
    async fn run_scheduled(
        &self,
        user_id: &UserId,
        job_id: &str,
        name: &str,
        prompt: &str,
    ) -> MaestroResult<()> {
        let session = self.registry.get_or_create(user_id);
        // Each fire is its own task group.
        let parent = Uuid::new_v4();
        let description = format!("Scheduled: {name}");
        match session
            .tasks()
            .create_task(parent, &description, prompt)
            .await
        {
            Some(task) => {
                debug!(
                    user_id = %user_id,
                    job_id = %job_id,
                    task_id = %task.task_id,
                    "scheduled job handed to the task manager"
                );
                Ok(())
            }
            None => {
                session.queue().send_message(&format!(
                    "Scheduled job '{name}' was skipped because all task slots \
                     are busy. It will run at its next scheduled time."
                ));
                Err(MaestroError::Scheduler(format!(
                    "user at task capacity, job '{job_id}' skipped"
                )))
            }
        }
    }
}
