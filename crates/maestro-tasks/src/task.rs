//! Task state: status lifecycle, retry bookkeeping, and the transition guard.

use chrono::{DateTime, Utc};
use maestro_core::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a delegated background task.
///
/// Transitions are monotonic: `Pending` may become `Running` or
/// `Cancelled`; `Running` may become `Completed`, `Failed`, or
/// `Cancelled`; terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Pending or Running.
    pub fn is_live(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Completed, Failed, or Cancelled.
    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One rejected attempt recorded by the review loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// The result the reviewer rejected.
    pub result: String,
    /// The reviewer's feedback for the next attempt.
    pub feedback: String,
    pub timestamp: DateTime<Utc>,
}

/// A delegated unit of background work owned by one user's task pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub user_id: UserId,
    /// The message cycle that spawned this task; cancellation groups on it.
    pub parent_message_id: Uuid,
    pub description: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether results pass through the reviewer before completion.
    pub needs_review: bool,
    pub review_criteria: Option<String>,
    /// Rejections so far. Never exceeds `max_retries`.
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub retry_history: Vec<RetryAttempt>,
    /// The prompt as originally submitted, before retry feedback is folded in.
    pub original_prompt: String,
}

impl Task {
    /// Creates a plain (unreviewed) task in `Pending`.
    pub fn new(
        user_id: UserId,
        parent_message_id: Uuid,
        description: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            user_id,
            parent_message_id,
            description: description.into(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            needs_review: false,
            review_criteria: None,
            retry_count: 0,
            max_retries: 0,
            retry_history: Vec::new(),
            original_prompt: prompt.into(),
        }
    }

    /// Creates a reviewed task in `Pending` with a retry budget.
    pub fn new_reviewed(
        user_id: UserId,
        parent_message_id: Uuid,
        description: impl Into<String>,
        prompt: impl Into<String>,
        criteria: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        let mut task = Self::new(user_id, parent_message_id, description, prompt);
        task.needs_review = true;
        task.review_criteria = Some(criteria.into());
        task.max_retries = max_retries;
        task
    }

    /// Applies a status transition if it is legal, returning whether it
    /// was applied. Illegal transitions (anything out of a terminal
    /// state, or skipping `Running` into `Completed`/`Failed`) are
    /// refused and logged.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        use TaskStatus::{Cancelled, Completed, Failed, Pending, Running};
        let legal = matches!(
            (self.status, next),
            (Pending, Running) | (Pending, Cancelled) | (Running, Completed | Failed | Cancelled)
        );
        if legal {
            self.status = next;
        } else {
            tracing::warn!(
                task_id = %self.task_id,
                from = %self.status,
                to = %next,
                "refused illegal task status transition"
            );
        }
        legal
    }
}
