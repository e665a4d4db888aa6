//! Session registry and engine wiring.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use maestro_core::config::EngineConfig;
use maestro_core::UserId;
use maestro_delivery::Transport;
use maestro_orchestrator::MainAgent;
use maestro_tasks::{DocumentStore, WorkExecutor, WorkReviewer};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::UserSession;

/// The engine's external seams, constructed once and shared by every
/// session.
pub struct EngineDeps {
    pub config: EngineConfig,
    pub transport: Arc<dyn Transport>,
    pub executor: Arc<dyn WorkExecutor>,
    pub reviewer: Arc<dyn WorkReviewer>,
    pub agent: Arc<dyn MainAgent>,
    pub documents: Arc<dyn DocumentStore>,
}

/// All live sessions, keyed by user. Sessions are created lazily on
/// first contact and removed by [`evict_idle`](Self::evict_idle) once
/// they have been quiet long enough.
pub struct SessionRegistry {
    deps: Arc<EngineDeps>,
    sessions: RwLock<HashMap<UserId, Arc<UserSession>>>,
}

impl SessionRegistry {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self {
            deps,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The user's session, created if this is their first contact.
    pub fn get_or_create(&self, user_id: &UserId) -> Arc<UserSession> {
        if let Some(session) = self.sessions.read().get(user_id) {
            session.touch();
            return session.clone();
        }
        let session = self
            .sessions
            .write()
            .entry(user_id.clone())
            .or_insert_with(|| {
                info!(user_id = %user_id, "session opened");
                UserSession::open(user_id.clone(), &self.deps)
            })
            .clone();
        session.touch();
        session
    }

    pub fn get(&self, user_id: &UserId) -> Option<Arc<UserSession>> {
        self.sessions.read().get(user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Removes sessions idle past `max_idle`. Only quiescent sessions
    /// go; anything with a run, live tasks, or undelivered output is
    /// left alone and retried on the next sweep.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let candidates: Vec<Arc<UserSession>> =
            self.sessions.read().values().cloned().collect();
        let mut evicted = 0;
        for session in candidates {
            if session.idle_for() < max_idle || !session.is_quiescent().await {
                continue;
            }
            let mut sessions = self.sessions.write();
            let still_idle = sessions
                .get(session.user_id())
                .is_some_and(|current| Arc::ptr_eq(current, &session))
                && session.idle_for() >= max_idle;
            if still_idle {
                sessions.remove(session.user_id());
                session.shutdown();
                evicted += 1;
                info!(user_id = %session.user_id(), "idle session evicted");
            }
        }
        evicted
    }

    /// One maintenance sweep: purge old terminal tasks and completed
    /// documents, then evict idle sessions. Returns the eviction count.
    pub async fn maintain(&self) -> usize {
        let config = &self.deps.config;
        let sessions: Vec<Arc<UserSession>> =
            self.sessions.read().values().cloned().collect();
        for session in &sessions {
            let purged = session
                .tasks()
                .cleanup_old_tasks(config.tasks.task_retention())
                .await;
            if purged > 0 {
                debug!(user_id = %session.user_id(), purged, "old tasks purged");
            }
        }
        if let Err(e) = self
            .deps
            .documents
            .purge_completed(config.tasks.document_retention())
            .await
        {
            warn!(error = %e, "document purge failed");
        }
        self.evict_idle(config.session.max_idle()).await
    }

    /// Runs [`maintain`](Self::maintain) every sweep interval.
    pub fn spawn_maintenance_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let every = registry.deps.config.session.sweep_interval();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                let evicted = registry.maintain().await;
                if evicted > 0 {
                    info!(evicted, "maintenance sweep complete");
                }
            }
        })
    }
}
