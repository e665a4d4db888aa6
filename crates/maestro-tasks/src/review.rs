//! Seams to the generative backend: the executor that produces results
//! and the reviewer that gates them.

use maestro_core::{MaestroResult, UserId};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything an executor needs to produce one result.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub task_id: Uuid,
    pub user_id: UserId,
    pub description: String,
    /// The full prompt for this attempt. Retries carry prior feedback
    /// folded in; `Task::original_prompt` stays untouched.
    pub prompt: String,
    /// Executors observe this at their own suspension points and return
    /// early when it fires.
    pub cancellation: CancellationToken,
}

/// Runs one unit of delegated work to completion.
///
/// Implementations wrap the generative backend (an LLM call, a tool
/// pipeline). An `Err` is an infrastructure failure and fails the task;
/// quality problems belong to the reviewer.
#[async_trait::async_trait]
pub trait WorkExecutor: Send + Sync {
    /// Produces the textual result for the request.
    async fn run(&self, request: WorkRequest) -> MaestroResult<String>;
}

/// Verdict returned by a [`WorkReviewer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    /// Whether the result satisfies the stated criteria.
    pub passed: bool,
    /// Actionable feedback folded into the next attempt when rejected.
    pub feedback: String,
    /// Concrete suggestions, if the reviewer produced any.
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Criteria dimensions the result missed entirely.
    #[serde(default)]
    pub missing_dimensions: Vec<String>,
}

impl ReviewVerdict {
    /// An approving verdict with no feedback.
    pub fn pass() -> Self {
        Self {
            passed: true,
            feedback: String::new(),
            suggestions: Vec::new(),
            missing_dimensions: Vec::new(),
        }
    }

    /// A rejecting verdict carrying feedback for the retry.
    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            passed: false,
            feedback: feedback.into(),
            suggestions: Vec::new(),
            missing_dimensions: Vec::new(),
        }
    }
}

/// Judges whether a result satisfies the task's review criteria.
///
/// The review loop treats an `Err` as fail-open: the result is accepted
/// rather than blocking progress on a broken reviewer. Mapping raw
/// backend output onto a [`ReviewVerdict`] is the implementation's
/// concern; by the time a verdict reaches the loop it is unambiguous.
#[async_trait::async_trait]
pub trait WorkReviewer: Send + Sync {
    /// Reviews `result` against `criteria` for the given attempt.
    async fn review(
        &self,
        task_id: Uuid,
        description: &str,
        result: &str,
        criteria: &str,
        attempt: u32,
    ) -> MaestroResult<ReviewVerdict>;
}

/// Builds the prompt for a retry attempt from the original prompt, the
/// rejected result, and the reviewer's feedback.
pub(crate) fn compose_retry_prompt(
    original: &str,
    previous_result: &str,
    feedback: &str,
) -> String {
    format!(
        "{original}\n\n---\nYour previous attempt was reviewed and sent back.\n\
         Previous result:\n{previous_result}\n\nReviewer feedback:\n{feedback}\n\
         Produce an improved result that addresses the feedback."
    )
}
