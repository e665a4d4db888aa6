//! Full-engine wiring through the session registry.
//!
//! Each test stands up real sessions over mock seams and checks that
//! inbound messages reach the transport through the orchestrator and
//! delivery queue, that eviction only touches quiescent sessions, and
//! that scheduled work shares the task manager's admission limits.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use maestro_core::config::EngineConfig;
use maestro_core::{MaestroError, MaestroResult, UserId};
use maestro_delivery::Transport;
use maestro_orchestrator::{AgentTurn, MainAgent, Phase, TurnPhase};
use maestro_scheduler::ScheduledWorkRunner;
use maestro_session::{EngineDeps, SessionRegistry, SessionWorkRunner};
use maestro_tasks::{NullDocumentStore, ReviewVerdict, WorkExecutor, WorkRequest, WorkReviewer};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

/// Echoes user turns, or stalls until cancelled when asked to.
struct TestAgent {
    stall: bool,
}

#[async_trait]
impl MainAgent for TestAgent {
    async fn run(&self, turn: AgentTurn) -> MaestroResult<Option<String>> {
        match turn.phase {
            TurnPhase::User => {
                if self.stall {
                    tokio::select! {
                        () = turn.cancellation.cancelled() => return Ok(None),
                        () = tokio::time::sleep(Duration::from_secs(360_000)) => {}
                    }
                }
                Ok(Some(format!("echo: {}", turn.text)))
            }
            TurnPhase::Synthesis { .. } => Ok(None),
        }
    }
}

/// Holds every task open until its token is cancelled.
struct ParkedExecutor;

#[async_trait]
impl WorkExecutor for ParkedExecutor {
    async fn run(&self, request: WorkRequest) -> MaestroResult<String> {
        request.cancellation.cancelled().await;
        Err(MaestroError::Task("interrupted".into()))
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

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, _user: &UserId, text: &str) -> MaestroResult<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_file(
        &self,
        _user: &UserId,
        _path: &Path,
        _caption: Option<&str>,
    ) -> MaestroResult<bool> {
        Ok(true)
    }
}

impl RecordingTransport {
    fn contains(&self, needle: &str) -> bool {
        self.sent.lock().unwrap().iter().any(|m| m.contains(needle))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Rig {
    registry: Arc<SessionRegistry>,
    transport: Arc<RecordingTransport>,
}

fn rig(stall: bool) -> Rig {
    let transport = Arc::new(RecordingTransport::default());
    let deps = Arc::new(EngineDeps {
        config: EngineConfig::default(),
        transport: transport.clone(),
        executor: Arc::new(ParkedExecutor),
        reviewer: Arc::new(PassReviewer),
        agent: Arc::new(TestAgent { stall }),
        documents: Arc::new(NullDocumentStore),
    });
    Rig {
        registry: Arc::new(SessionRegistry::new(deps)),
        transport,
    }
}

async fn breathe() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}

async fn drive_until(label: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..600 {
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
async fn test_message_flows_through_to_the_transport() {
    let rig = rig(false);
    let user = UserId::new("alice");
    let session = rig.registry.get_or_create(&user);

    session.deliver_message("hello").unwrap();
    breathe().await;
    tokio::time::advance(Duration::from_secs(2)).await;
    session.deliver_message("world").unwrap();

    drive_until("echo delivered", || {
        rig.transport.contains("echo: hello\nworld")
    })
    .await;
    drive_until("session settles", || {
        session.orchestrator().phase() == Phase::Idle
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_sessions_are_created_once_per_user() {
    let rig = rig(false);
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");

    let first = rig.registry.get_or_create(&alice);
    let second = rig.registry.get_or_create(&alice);
    assert!(Arc::ptr_eq(&first, &second));

    rig.registry.get_or_create(&bob);
    assert_eq!(rig.registry.len(), 2);
    assert!(rig.registry.get(&UserId::new("nobody")).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_eviction_spares_busy_sessions() {
    let rig = rig(true);
    let idle_user = UserId::new("quiet");
    let busy_user = UserId::new("busy");

    rig.registry.get_or_create(&idle_user);
    let busy = rig.registry.get_or_create(&busy_user);
    busy.deliver_message("long running request").unwrap();
    breathe().await;
    tokio::time::advance(Duration::from_secs(10)).await;
    breathe().await;
    assert_eq!(busy.orchestrator().phase(), Phase::Processing);

    // A day and an hour later, only the quiescent session goes.
    tokio::time::advance(Duration::from_secs(25 * 60 * 60)).await;
    let evicted = rig.registry.evict_idle(Duration::from_secs(24 * 60 * 60)).await;

    assert_eq!(evicted, 1);
    assert_eq!(rig.registry.len(), 1);
    assert!(rig.registry.get(&idle_user).is_none());
    assert!(rig.registry.get(&busy_user).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_work_lands_in_the_task_manager() {
    let rig = rig(false);
    let user = UserId::new("alice");
    let runner = SessionWorkRunner::new(rig.registry.clone());

    runner
        .run_scheduled(&user, "digest", "Daily digest", "summarize the day")
        .await
        .unwrap();

    let session = rig.registry.get(&user).expect("session created by the fire");
    assert_eq!(session.tasks().active_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_work_respects_task_capacity() {
    let rig = rig(false);
    let user = UserId::new("alice");
    let session = rig.registry.get_or_create(&user);
    let parent = Uuid::new_v4();
    for i in 0..10 {
        let created = session
            .tasks()
            .create_task(parent, &format!("filler {i}"), "park")
            .await;
        assert!(created.is_some());
    }

    let runner = SessionWorkRunner::new(rig.registry.clone());
    let err = runner
        .run_scheduled(&user, "digest", "Daily digest", "summarize the day")
        .await
        .unwrap_err();
    assert!(matches!(err, MaestroError::Scheduler(_)));
    assert_eq!(session.tasks().active_count().await, 10);

    drive_until("skip notice delivered", || {
        rig.transport.contains("was skipped")
    })
    .await;
}
