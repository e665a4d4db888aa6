//! Per-user task pool: admission control, execution, the review loop,
//! group cancellation, and waiting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use maestro_core::config::TaskManagerConfig;
use maestro_core::{Notifier, UserId};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::{initial_document, DocumentOutcome, DocumentStore};
use crate::review::{compose_retry_prompt, ReviewVerdict, WorkExecutor, WorkRequest, WorkReviewer};
use crate::task::{RetryAttempt, Task, TaskStatus};

/// A completed task's contribution to the synthesis turn.
#[derive(Debug, Clone)]
pub struct CompletedWork {
    pub task_id: Uuid,
    pub description: String,
    pub result: String,
}

struct TaskEntry {
    task: Task,
    cancel: CancellationToken,
}

/// Owns one user's delegated tasks.
///
/// Admission is bounded: at most `max_sub_agents` tasks may be Pending or
/// Running at once, and delegations beyond that are rejected rather than
/// queued. Each admitted task runs in its own tokio task with its own
/// [`CancellationToken`]; cancellation is cooperative and grouped by
/// `parent_message_id`.
///
/// Cloning is cheap and shares all state; the spawned execution futures
/// hold clones.
#[derive(Clone)]
pub struct TaskManager {
    user_id: UserId,
    config: TaskManagerConfig,
    executor: Arc<dyn WorkExecutor>,
    reviewer: Arc<dyn WorkReviewer>,
    notifier: Arc<dyn Notifier>,
    documents: Arc<dyn DocumentStore>,
    tasks: Arc<RwLock<HashMap<Uuid, TaskEntry>>>,
}

impl TaskManager {
    /// Creates a task manager for one user. Dependencies are fixed for
    /// the life of the session.
    pub fn new(
        user_id: UserId,
        config: TaskManagerConfig,
        executor: Arc<dyn WorkExecutor>,
        reviewer: Arc<dyn WorkReviewer>,
        notifier: Arc<dyn Notifier>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            user_id,
            config,
            executor,
            reviewer,
            notifier,
            documents,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Whether the pool has room for another delegation.
    pub async fn can_create_task(&self) -> bool {
        self.active_count().await < self.config.max_sub_agents
    }

    /// Pending + Running tasks across all parents.
    pub async fn active_count(&self) -> usize {
        let tasks = self.tasks.read().await;
        tasks.values().filter(|e| e.task.status.is_live()).count()
    }

    /// Pending + Running tasks spawned by one message cycle.
    pub async fn live_task_count(&self, parent_message_id: Uuid) -> usize {
        let tasks = self.tasks.read().await;
        tasks
            .values()
            .filter(|e| {
                e.task.parent_message_id == parent_message_id && e.task.status.is_live()
            })
            .count()
    }

    /// Snapshot of one task, if it is still tracked.
    pub async fn task(&self, task_id: Uuid) -> Option<Task> {
        let tasks = self.tasks.read().await;
        tasks.get(&task_id).map(|e| e.task.clone())
    }

    /// Snapshots of every task spawned by one message cycle.
    pub async fn tasks_for_parent(&self, parent_message_id: Uuid) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut found: Vec<Task> = tasks
            .values()
            .filter(|e| e.task.parent_message_id == parent_message_id)
            .map(|e| e.task.clone())
            .collect();
        found.sort_by_key(|t| t.created_at);
        found
    }

    /// Delegates one unreviewed unit of work. Returns `None` when the
    /// pool is full; the caller decides how to tell the user.
    pub async fn create_task(
        &self,
        parent_message_id: Uuid,
        description: &str,
        prompt: &str,
    ) -> Option<Task> {
        let task = Task::new(self.user_id.clone(), parent_message_id, description, prompt);
        self.launch(task).await
    }

    /// Delegates one reviewed unit of work with a retry budget.
    /// `max_retries = None` takes the configured default. Returns `None`
    /// when the pool is full.
    pub async fn create_review_task(
        &self,
        parent_message_id: Uuid,
        description: &str,
        prompt: &str,
        criteria: &str,
        max_retries: Option<u32>,
    ) -> Option<Task> {
        let budget = max_retries
            .unwrap_or(self.config.default_max_retries)
            .max(1);
        let task = Task::new_reviewed(
            self.user_id.clone(),
            parent_message_id,
            description,
            prompt,
            criteria,
            budget,
        );
        self.launch(task).await
    }

    /// Signals every live task in one message cycle's group. Returns how
    /// many tasks were newly signalled; a repeat call returns 0.
    pub async fn cancel_tasks_by_parent(&self, parent_message_id: Uuid) -> usize {
        let mut signalled = 0;
        {
            let tasks = self.tasks.read().await;
            for entry in tasks.values() {
                if entry.task.parent_message_id == parent_message_id
                    && entry.task.status.is_live()
                    && !entry.cancel.is_cancelled()
                {
                    entry.cancel.cancel();
                    signalled += 1;
                }
            }
        }
        if signalled > 0 {
            info!(
                user_id = %self.user_id,
                parent_message_id = %parent_message_id,
                count = signalled,
                "cancelled task group"
            );
        }
        signalled
    }

    /// Blocks until every task in the group is terminal, or the timeout
    /// elapses. Never errors; returns the Completed results in creation
    /// order. `timeout = None` takes the configured default.
    pub async fn wait_for_tasks(
        &self,
        parent_message_id: Uuid,
        timeout: Option<Duration>,
    ) -> Vec<CompletedWork> {
        let timeout = timeout.unwrap_or_else(|| self.config.wait_timeout());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.live_task_count(parent_message_id).await == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    user_id = %self.user_id,
                    parent_message_id = %parent_message_id,
                    "timed out waiting for task group"
                );
                break;
            }
            tokio::time::sleep(self.config.wait_poll()).await;
        }

        let tasks = self.tasks.read().await;
        let mut completed: Vec<&TaskEntry> = tasks
            .values()
            .filter(|e| {
                e.task.parent_message_id == parent_message_id
                    && e.task.status == TaskStatus::Completed
            })
            .collect();
        completed.sort_by_key(|e| e.task.created_at);
        completed
            .into_iter()
            .map(|e| CompletedWork {
                task_id: e.task.task_id,
                description: e.task.description.clone(),
                result: e.task.result.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// Purges terminal tasks older than `max_age` from memory. On-disk
    /// documents have their own retention. Returns how many were purged.
    pub async fn cleanup_old_tasks(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::seconds(i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX));
        let cutoff = Utc::now() - max_age;
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, entry| {
            let finished = entry.task.completed_at.unwrap_or(entry.task.created_at);
            !(entry.task.status.is_terminal() && finished < cutoff)
        });
        let removed = before - tasks.len();
        if removed > 0 {
            debug!(user_id = %self.user_id, removed, "purged old terminal tasks");
        }
        removed
    }

    // --- Execution ---

    /// Admission check and insert happen under one write lock, so two
    /// concurrent delegations cannot both squeeze past the limit.
    async fn launch(&self, task: Task) -> Option<Task> {
        let cancel = CancellationToken::new();
        {
            let mut tasks = self.tasks.write().await;
            let live = tasks.values().filter(|e| e.task.status.is_live()).count();
            if live >= self.config.max_sub_agents {
                info!(
                    user_id = %self.user_id,
                    live,
                    limit = self.config.max_sub_agents,
                    "task pool full, delegation rejected"
                );
                return None;
            }
            tasks.insert(
                task.task_id,
                TaskEntry {
                    task: task.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        if let Err(e) = self
            .documents
            .write(&self.user_id, task.task_id, &initial_document(&task))
            .await
        {
            warn!(task_id = %task.task_id, error = %e, "failed to write task document");
        }
        info!(
            user_id = %self.user_id,
            task_id = %task.task_id,
            parent_message_id = %task.parent_message_id,
            reviewed = task.needs_review,
            "task admitted"
        );

        let manager = self.clone();
        let task_id = task.task_id;
        let reviewed = task.needs_review;
        tokio::spawn(async move {
            if reviewed {
                manager.run_reviewed(task_id, cancel).await;
            } else {
                manager.run_plain(task_id, cancel).await;
            }
        });
        Some(task)
    }

    async fn run_plain(&self, task_id: Uuid, cancel: CancellationToken) {
        if cancel.is_cancelled() {
            self.finish_cancelled(task_id).await;
            return;
        }
        let Some(request) = self.begin(task_id).await else {
            return;
        };
        let executed = tokio::select! {
            () = cancel.cancelled() => None,
            result = self.executor.run(request) => Some(result),
        };
        match executed {
            None => self.finish_cancelled(task_id).await,
            Some(_) if cancel.is_cancelled() => self.finish_cancelled(task_id).await,
            Some(Ok(result)) => self.finish_completed(task_id, result, 1).await,
            Some(Err(e)) => self.finish_failed(task_id, e.to_string()).await,
        }
    }

    async fn run_reviewed(&self, task_id: Uuid, cancel: CancellationToken) {
        if cancel.is_cancelled() {
            self.finish_cancelled(task_id).await;
            return;
        }
        let Some(base) = self.begin(task_id).await else {
            return;
        };
        let (criteria, max_retries) = {
            let tasks = self.tasks.read().await;
            let Some(entry) = tasks.get(&task_id) else {
                return;
            };
            (
                entry.task.review_criteria.clone().unwrap_or_default(),
                entry.task.max_retries,
            )
        };

        let mut prompt = base.prompt.clone();
        for attempt in 1..=max_retries {
            let request = WorkRequest {
                prompt: prompt.clone(),
                ..base.clone()
            };
            let executed = tokio::select! {
                () = cancel.cancelled() => None,
                result = self.executor.run(request) => Some(result),
            };
            let result = match executed {
                None => {
                    self.finish_cancelled(task_id).await;
                    return;
                }
                Some(Err(e)) => {
                    self.finish_failed(task_id, e.to_string()).await;
                    return;
                }
                Some(Ok(result)) => result,
            };
            if cancel.is_cancelled() {
                self.finish_cancelled(task_id).await;
                return;
            }

            // Every attempt's result is surfaced before review, so the
            // user sees partial progress even when review keeps rejecting.
            self.notify(&format!(
                "Progress on '{}' (attempt {attempt}/{max_retries}):\n{result}",
                base.description
            ))
            .await;

            let verdict = match self
                .reviewer
                .review(task_id, &base.description, &result, &criteria, attempt)
                .await
            {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "reviewer failed, accepting result");
                    ReviewVerdict::pass()
                }
            };
            if cancel.is_cancelled() {
                self.finish_cancelled(task_id).await;
                return;
            }

            if verdict.passed {
                self.finish_completed(task_id, result, attempt).await;
                return;
            }
            self.record_rejection(task_id, attempt, &result, &verdict.feedback)
                .await;
            if attempt == max_retries {
                self.notify(&format!(
                    "Review budget exhausted for '{}' after {max_retries} attempts; delivering the latest result.",
                    base.description
                ))
                .await;
                self.finish_completed(task_id, result, attempt).await;
                return;
            }
            self.notify(&format!(
                "Reviewer sent '{}' back (attempt {attempt}/{max_retries}): {}",
                base.description, verdict.feedback
            ))
            .await;
            prompt = compose_retry_prompt(&base.prompt, &result, &verdict.feedback);
        }
    }

    async fn begin(&self, task_id: Uuid) -> Option<WorkRequest> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(&task_id)?;
        if !entry.task.transition(TaskStatus::Running) {
            return None;
        }
        Some(WorkRequest {
            task_id,
            user_id: entry.task.user_id.clone(),
            description: entry.task.description.clone(),
            prompt: entry.task.original_prompt.clone(),
            cancellation: entry.cancel.clone(),
        })
    }

    async fn record_rejection(&self, task_id: Uuid, attempt: u32, result: &str, feedback: &str) {
        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get_mut(&task_id) {
            entry.task.retry_count += 1;
            entry.task.retry_history.push(RetryAttempt {
                attempt,
                result: result.to_string(),
                feedback: feedback.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    async fn finish_completed(&self, task_id: Uuid, result: String, attempts: u32) {
        let snapshot = {
            let mut tasks = self.tasks.write().await;
            let Some(entry) = tasks.get_mut(&task_id) else {
                return;
            };
            if !entry.task.transition(TaskStatus::Completed) {
                return;
            }
            entry.task.result = Some(result.clone());
            entry.task.completed_at = Some(Utc::now());
            entry.task.clone()
        };
        if let Err(e) = self
            .documents
            .finalize(&self.user_id, task_id, DocumentOutcome::Completed, Some(&result))
            .await
        {
            warn!(task_id = %task_id, error = %e, "failed to finalize task document");
        }
        info!(user_id = %self.user_id, task_id = %task_id, attempts, "task completed");
        self.notify(&format!(
            "Task finished: {}\n\n{result}",
            snapshot.description
        ))
        .await;
    }

    async fn finish_failed(&self, task_id: Uuid, error: String) {
        let snapshot = {
            let mut tasks = self.tasks.write().await;
            let Some(entry) = tasks.get_mut(&task_id) else {
                return;
            };
            if !entry.task.transition(TaskStatus::Failed) {
                return;
            }
            entry.task.error = Some(error.clone());
            entry.task.completed_at = Some(Utc::now());
            entry.task.clone()
        };
        if let Err(e) = self
            .documents
            .finalize(&self.user_id, task_id, DocumentOutcome::Failed, Some(&error))
            .await
        {
            warn!(task_id = %task_id, error = %e, "failed to finalize task document");
        }
        warn!(user_id = %self.user_id, task_id = %task_id, error = %error, "task failed");
        self.notify(&format!("Task failed: {}\n{error}", snapshot.description))
            .await;
    }

    async fn finish_cancelled(&self, task_id: Uuid) {
        {
            let mut tasks = self.tasks.write().await;
            let Some(entry) = tasks.get_mut(&task_id) else {
                return;
            };
            if !entry.task.transition(TaskStatus::Cancelled) {
                return;
            }
            entry.task.completed_at = Some(Utc::now());
        }
        if let Err(e) = self
            .documents
            .finalize(&self.user_id, task_id, DocumentOutcome::Cancelled, None)
            .await
        {
            warn!(task_id = %task_id, error = %e, "failed to finalize task document");
        }
        info!(user_id = %self.user_id, task_id = %task_id, "task cancelled");
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.notifier.notify(text).await {
            warn!(user_id = %self.user_id, error = %e, "notification failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::document::NullDocumentStore;
    use maestro_core::{MaestroError, MaestroResult};

    struct InstantExecutor;

    #[async_trait::async_trait]
    impl WorkExecutor for InstantExecutor {
        async fn run(&self, request: WorkRequest) -> MaestroResult<String> {
            Ok(format!("done: {}", request.description))
        }
    }

    /// Parks until its cancellation token fires.
    struct ParkedExecutor;

    #[async_trait::async_trait]
    impl WorkExecutor for ParkedExecutor {
        async fn run(&self, request: WorkRequest) -> MaestroResult<String> {
            request.cancellation.cancelled().await;
            Err(MaestroError::Task("interrupted".into()))
        }
    }

    struct PassReviewer;

    #[async_trait::async_trait]
    impl WorkReviewer for PassReviewer {
        async fn review(
            &self,
            _task_id: Uuid,
            _description: &str,
            _result: &str,
            _criteria: &str,
            _attempt: u32,
        ) -> MaestroResult<ReviewVerdict> {
            Ok(ReviewVerdict::pass())
        }
    }

    struct SilentNotifier;

    #[async_trait::async_trait]
    impl Notifier for SilentNotifier {
        async fn notify(&self, _text: &str) -> MaestroResult<()> {
            Ok(())
        }
    }

    fn fast_config() -> TaskManagerConfig {
        TaskManagerConfig {
            wait_poll_ms: 10,
            ..TaskManagerConfig::default()
        }
    }

    fn manager(executor: Arc<dyn WorkExecutor>) -> TaskManager {
        TaskManager::new(
            UserId::new("u1"),
            fast_config(),
            executor,
            Arc::new(PassReviewer),
            Arc::new(SilentNotifier),
            Arc::new(NullDocumentStore),
        )
    }

    #[tokio::test]
    async fn test_admission_rejects_the_eleventh_task() {
        let mgr = manager(Arc::new(ParkedExecutor));
        let parent = Uuid::new_v4();
        for i in 0..10 {
            assert!(
                mgr.create_task(parent, &format!("t{i}"), "p").await.is_some(),
                "task {i} should be admitted"
            );
        }
        assert!(!mgr.can_create_task().await);
        assert!(mgr.create_task(parent, "t10", "p").await.is_none());
        // The rejection left the existing pool untouched.
        assert_eq!(mgr.active_count().await, 10);
    }

    #[tokio::test]
    async fn test_capacity_returns_after_completion() {
        let mgr = manager(Arc::new(InstantExecutor));
        let parent = Uuid::new_v4();
        for i in 0..10 {
            assert!(mgr.create_task(parent, &format!("t{i}"), "p").await.is_some());
        }
        let done = mgr
            .wait_for_tasks(parent, Some(Duration::from_secs(5)))
            .await;
        assert_eq!(done.len(), 10);
        assert!(mgr.can_create_task().await);
    }

    #[tokio::test]
    async fn test_cancel_group_is_idempotent() {
        let mgr = manager(Arc::new(ParkedExecutor));
        let parent = Uuid::new_v4();
        for i in 0..3 {
            mgr.create_task(parent, &format!("t{i}"), "p").await.unwrap();
        }
        assert_eq!(mgr.cancel_tasks_by_parent(parent).await, 3);
        assert_eq!(mgr.cancel_tasks_by_parent(parent).await, 0);
        // The group settles to Cancelled, not Failed.
        let _ = mgr
            .wait_for_tasks(parent, Some(Duration::from_secs(5)))
            .await;
        for task in mgr.tasks_for_parent(parent).await {
            assert_eq!(task.status, TaskStatus::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_cancel_only_touches_the_named_group() {
        let mgr = manager(Arc::new(ParkedExecutor));
        let parent_a = Uuid::new_v4();
        let parent_b = Uuid::new_v4();
        mgr.create_task(parent_a, "a", "p").await.unwrap();
        mgr.create_task(parent_b, "b", "p").await.unwrap();
        assert_eq!(mgr.cancel_tasks_by_parent(parent_a).await, 1);
        assert_eq!(mgr.live_task_count(parent_b).await, 1);
        mgr.cancel_tasks_by_parent(parent_b).await;
    }

    #[tokio::test]
    async fn test_wait_for_tasks_returns_results_in_creation_order() {
        let mgr = manager(Arc::new(InstantExecutor));
        let parent = Uuid::new_v4();
        mgr.create_task(parent, "first", "p").await.unwrap();
        mgr.create_task(parent, "second", "p").await.unwrap();
        let done = mgr
            .wait_for_tasks(parent, Some(Duration::from_secs(5)))
            .await;
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].description, "first");
        assert_eq!(done[1].description, "second");
        assert_eq!(done[0].result, "done: first");
    }

    #[tokio::test]
    async fn test_wait_for_tasks_times_out_without_error() {
        let mgr = manager(Arc::new(ParkedExecutor));
        let parent = Uuid::new_v4();
        mgr.create_task(parent, "parked", "p").await.unwrap();
        let done = mgr
            .wait_for_tasks(parent, Some(Duration::from_millis(50)))
            .await;
        assert!(done.is_empty());
        assert_eq!(mgr.live_task_count(parent).await, 1);
        mgr.cancel_tasks_by_parent(parent).await;
    }

    #[tokio::test]
    async fn test_cleanup_purges_only_old_terminal_tasks() {
        let mgr = manager(Arc::new(InstantExecutor));
        let parent = Uuid::new_v4();
        let task = mgr.create_task(parent, "quick", "p").await.unwrap();
        mgr.wait_for_tasks(parent, Some(Duration::from_secs(5)))
            .await;

        // Too young for a 1 hour cutoff.
        assert_eq!(mgr.cleanup_old_tasks(Duration::from_secs(3_600)).await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mgr.cleanup_old_tasks(Duration::ZERO).await, 1);
        assert!(mgr.task(task.task_id).await.is_none());
    }
}
