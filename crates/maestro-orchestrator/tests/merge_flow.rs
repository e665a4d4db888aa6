//! Merge-window and cancel-and-merge behavior under a paused clock.
//!
//! Each test drives the actor with explicit time advances: messages
//! inside the window coalesce, quick follow-ups cancel and restart the
//! run, late messages queue and drain into exactly one follow-up cycle,
//! and delegated tasks are awaited and synthesized.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use maestro_core::config::{OrchestratorConfig, TaskManagerConfig};
use maestro_core::{MaestroError, MaestroResult, Notifier, UserId};
use maestro_orchestrator::{
    AgentTurn, MainAgent, MessageOrchestrator, OrchestratorHandle, Phase, TurnPhase,
};
use maestro_tasks::{
    NullDocumentStore, ReviewVerdict, TaskManager, TaskStatus, WorkExecutor, WorkRequest,
    WorkReviewer,
};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct TurnRecord {
    user_turn: bool,
    text: String,
    message_id: Uuid,
    completed: usize,
}

/// Scripted main agent: records every turn, optionally sleeps through
/// the first user turn (observing cancellation), optionally delegates
/// one background task per user turn.
struct TestAgent {
    turns: Arc<Mutex<Vec<TurnRecord>>>,
    first_turn_delay: Option<Duration>,
    first_turn_taken: AtomicBool,
    delegate_to: Option<TaskManager>,
}

impl TestAgent {
    fn new(first_turn_delay: Option<Duration>, delegate_to: Option<TaskManager>) -> Arc<Self> {
        Arc::new(Self {
            turns: Arc::new(Mutex::new(Vec::new())),
            first_turn_delay,
            first_turn_taken: AtomicBool::new(false),
            delegate_to,
        })
    }

    fn user_texts(&self) -> Vec<String> {
        self.turns
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.user_turn)
            .map(|t| t.text.clone())
            .collect()
    }

    fn user_message_ids(&self) -> Vec<Uuid> {
        self.turns
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.user_turn)
            .map(|t| t.message_id)
            .collect()
    }

    fn synthesis_results(&self) -> Vec<usize> {
        self.turns
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.user_turn)
            .map(|t| t.completed)
            .collect()
    }
}

#[async_trait]
impl MainAgent for TestAgent {
    async fn run(&self, turn: AgentTurn) -> MaestroResult<Option<String>> {
        let completed = match &turn.phase {
            TurnPhase::Synthesis { completed } => completed.len(),
            TurnPhase::User => 0,
        };
        self.turns.lock().unwrap().push(TurnRecord {
            user_turn: matches!(turn.phase, TurnPhase::User),
            text: turn.text.clone(),
            message_id: turn.message_id,
            completed,
        });

        match turn.phase {
            TurnPhase::User => {
                if let Some(tasks) = &self.delegate_to {
                    let _ = tasks
                        .create_task(turn.message_id, "background lookup", "look it up")
                        .await;
                }
                if let Some(delay) = self.first_turn_delay {
                    if !self.first_turn_taken.swap(true, Ordering::SeqCst) {
                        tokio::select! {
                            () = turn.cancellation.cancelled() => return Ok(None),
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                Ok(Some(format!("reply to: {}", turn.text)))
            }
            TurnPhase::Synthesis { completed } => {
                Ok(Some(format!("synthesis of {} results", completed.len())))
            }
        }
    }
}

/// Sleeps for a fixed virtual duration, bailing out on cancellation.
struct SleepyExecutor {
    duration: Duration,
}

#[async_trait]
impl WorkExecutor for SleepyExecutor {
    async fn run(&self, request: WorkRequest) -> MaestroResult<String> {
        tokio::select! {
            () = request.cancellation.cancelled() => Err(MaestroError::Task("interrupted".into())),
            () = tokio::time::sleep(self.duration) => Ok(format!("looked up: {}", request.description)),
        }
    }
}

struct PassReviewer;

#[async_trait]
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

#[derive(Default, Clone)]
struct RecordingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> MaestroResult<()> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

impl RecordingNotifier {
    fn count_containing(&self, needle: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.contains(needle))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn task_manager(executor_sleep: Duration, notifier: &RecordingNotifier) -> TaskManager {
    TaskManager::new(
        UserId::new("orchestrated"),
        TaskManagerConfig::default(),
        Arc::new(SleepyExecutor {
            duration: executor_sleep,
        }),
        Arc::new(PassReviewer),
        Arc::new(notifier.clone()),
        Arc::new(NullDocumentStore),
    )
}

fn orchestrator(
    agent: Arc<TestAgent>,
    tasks: TaskManager,
    notifier: &RecordingNotifier,
) -> OrchestratorHandle {
    MessageOrchestrator::spawn(
        UserId::new("orchestrated"),
        OrchestratorConfig::default(),
        agent,
        tasks,
        Arc::new(notifier.clone()),
    )
}

/// Lets the actor and any spawned runs catch up without moving the clock.
async fn breathe() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}

/// Advances virtual time in half-second steps until the condition holds.
async fn drive_until(label: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..1_200 {
        if cond() {
            return;
        }
        breathe().await;
        tokio::time::advance(Duration::from_millis(500)).await;
    }
    panic!("never reached: {label}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_messages_inside_the_window_merge_into_one_run() {
    let notifier = RecordingNotifier::default();
    let agent = TestAgent::new(None, None);
    let handle = orchestrator(
        agent.clone(),
        task_manager(Duration::from_secs(1), &notifier),
        &notifier,
    );

    handle.deliver("hello").unwrap();
    breathe().await;
    assert_eq!(handle.phase(), Phase::Merging);

    tokio::time::advance(Duration::from_secs(2)).await;
    handle.deliver("world").unwrap();
    breathe().await;

    drive_until("merged run finished", || {
        agent.user_texts() == ["hello\nworld"]
    })
    .await;
    drive_until("back to idle", || handle.phase() == Phase::Idle).await;

    assert_eq!(agent.user_texts(), ["hello\nworld"]);
    assert_eq!(notifier.count_containing("reply to: hello\nworld"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_message_after_the_window_is_queued() {
    let notifier = RecordingNotifier::default();
    let agent = TestAgent::new(Some(Duration::from_secs(60)), None);
    let handle = orchestrator(
        agent.clone(),
        task_manager(Duration::from_secs(1), &notifier),
        &notifier,
    );

    handle.deliver("first").unwrap();
    breathe().await;
    tokio::time::advance(Duration::from_secs(10)).await;
    breathe().await;
    assert_eq!(handle.phase(), Phase::Processing);

    // 15s into the run, well past the 10s follow-up window.
    tokio::time::advance(Duration::from_secs(15)).await;
    handle.deliver("second").unwrap();
    breathe().await;
    assert_eq!(handle.phase(), Phase::Processing);
    assert_eq!(notifier.count_containing("queued this one"), 1);

    drive_until("queued message ran", || agent.user_texts().len() == 2).await;
    drive_until("back to idle", || handle.phase() == Phase::Idle).await;
    assert_eq!(agent.user_texts(), ["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn test_quick_follow_up_cancels_the_run_and_merges() {
    let notifier = RecordingNotifier::default();
    let tasks = task_manager(Duration::from_secs(120), &notifier);
    let agent = TestAgent::new(Some(Duration::from_secs(60)), Some(tasks.clone()));
    let handle = orchestrator(agent.clone(), tasks.clone(), &notifier);

    handle.deliver("do A").unwrap();
    breathe().await;
    tokio::time::advance(Duration::from_secs(10)).await;
    breathe().await;
    assert_eq!(handle.phase(), Phase::Processing);
    let first_cycle = agent.user_message_ids()[0];
    assert_eq!(tasks.live_task_count(first_cycle).await, 1);

    // 5s into the run, inside the follow-up window.
    tokio::time::advance(Duration::from_secs(5)).await;
    handle.deliver("do B").unwrap();
    breathe().await;
    assert_eq!(notifier.count_containing("updating my approach"), 1);

    drive_until("merged rerun", || agent.user_texts().len() == 2).await;
    assert_eq!(agent.user_texts()[1], "do A\ndo B");

    // The first cycle's delegated task was cancelled, not completed.
    for _ in 0..100 {
        if tasks.live_task_count(first_cycle).await == 0 {
            break;
        }
        breathe().await;
    }
    let group = tasks.tasks_for_parent(first_cycle).await;
    assert_eq!(group.len(), 1);
    for task in group {
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    drive_until("back to idle", || handle.phase() == Phase::Idle).await;
}

#[tokio::test(start_paused = true)]
async fn test_delegated_tasks_are_awaited_then_synthesized() {
    let notifier = RecordingNotifier::default();
    let tasks = task_manager(Duration::from_secs(20), &notifier);
    let agent = TestAgent::new(None, Some(tasks.clone()));
    let handle = orchestrator(agent.clone(), tasks.clone(), &notifier);

    handle.deliver("research X").unwrap();
    breathe().await;
    tokio::time::advance(Duration::from_secs(10)).await;
    breathe().await;

    drive_until("waiting on sub-agents", || {
        handle.phase() == Phase::WaitingSubAgents
    })
    .await;
    assert_eq!(notifier.count_containing("background task"), 1);

    drive_until("synthesis ran", || agent.synthesis_results() == [1]).await;
    drive_until("back to idle", || handle.phase() == Phase::Idle).await;
    assert_eq!(notifier.count_containing("synthesis of 1 results"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_buffered_messages_drain_into_exactly_one_cycle() {
    let notifier = RecordingNotifier::default();
    let agent = TestAgent::new(Some(Duration::from_secs(60)), None);
    let handle = orchestrator(
        agent.clone(),
        task_manager(Duration::from_secs(1), &notifier),
        &notifier,
    );

    handle.deliver("first").unwrap();
    breathe().await;
    tokio::time::advance(Duration::from_secs(10)).await;
    breathe().await;
    tokio::time::advance(Duration::from_secs(15)).await;

    handle.deliver("second").unwrap();
    breathe().await;
    handle.deliver("third").unwrap();
    breathe().await;
    assert_eq!(notifier.count_containing("queued this one"), 2);

    drive_until("drained cycle ran", || agent.user_texts().len() == 2).await;
    assert_eq!(agent.user_texts(), ["first", "second\nthird"]);
    drive_until("back to idle", || handle.phase() == Phase::Idle).await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_the_actor() {
    let notifier = RecordingNotifier::default();
    let agent = TestAgent::new(None, None);
    let handle = orchestrator(
        agent.clone(),
        task_manager(Duration::from_secs(1), &notifier),
        &notifier,
    );

    handle.deliver("x").unwrap();
    breathe().await;
    handle.shutdown();
    breathe().await;
    assert!(handle.deliver("y").is_err());
}
