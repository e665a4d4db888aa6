//! Engine configuration.
//!
//! Every limit the engine enforces is a field here with a serde default,
//! so embedders can ship a partial TOML file and only override what they
//! need. Durations are stored as plain integers (seconds or milliseconds)
//! and exposed as [`std::time::Duration`] accessors.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::{MaestroError, MaestroResult};

/// Top-level engine configuration, one section per subsystem.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Root directory for task documents, job files, and the operation log.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Task manager limits.
    #[serde(default)]
    pub tasks: TaskManagerConfig,
    /// Message orchestrator timing.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Recurring job scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Session registry and maintenance settings.
    #[serde(default)]
    pub session: SessionConfig,
}

impl EngineConfig {
    /// Parses a configuration from TOML text. Missing fields take their
    /// defaults; unknown fields are ignored.
    pub fn from_toml_str(text: &str) -> MaestroResult<Self> {
        toml::from_str(text).map_err(|e| MaestroError::Config(e.to_string()))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            tasks: TaskManagerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            scheduler: SchedulerConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Limits for the per-user task pool and review loop.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskManagerConfig {
    /// Maximum Pending + Running tasks per user. New delegations beyond
    /// this are rejected, not queued.
    #[serde(default = "default_max_sub_agents")]
    pub max_sub_agents: usize,
    /// Review retry budget when the caller does not pass one explicitly.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// How long `wait_for_tasks` blocks before giving up, in seconds.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    /// Poll interval inside `wait_for_tasks`, in milliseconds.
    #[serde(default = "default_wait_poll_ms")]
    pub wait_poll_ms: u64,
    /// Age after which terminal tasks are purged from memory, in seconds.
    #[serde(default = "default_task_retention_secs")]
    pub task_retention_secs: u64,
    /// Age after which completed task documents are purged, in seconds.
    #[serde(default = "default_document_retention_secs")]
    pub document_retention_secs: u64,
}

impl TaskManagerConfig {
    /// `wait_for_tasks` timeout as a duration.
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// `wait_for_tasks` poll interval as a duration.
    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms)
    }

    /// In-memory retention for terminal tasks as a duration.
    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }

    /// On-disk retention for completed documents as a duration.
    pub fn document_retention(&self) -> Duration {
        Duration::from_secs(self.document_retention_secs)
    }
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_sub_agents: default_max_sub_agents(),
            default_max_retries: default_max_retries(),
            wait_timeout_secs: default_wait_timeout_secs(),
            wait_poll_ms: default_wait_poll_ms(),
            task_retention_secs: default_task_retention_secs(),
            document_retention_secs: default_document_retention_secs(),
        }
    }
}

/// Timing knobs for the per-user message orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Debounce window during which consecutive messages merge, in seconds.
    #[serde(default = "default_merge_window_secs")]
    pub merge_window_secs: u64,
    /// How long a cancelled run is awaited before the replacement cycle
    /// starts, in seconds.
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
    /// How long a finished run waits for its delegated tasks before
    /// synthesizing, in seconds.
    #[serde(default = "default_subagent_wait_secs")]
    pub subagent_wait_secs: u64,
}

impl OrchestratorConfig {
    /// Merge window as a duration.
    pub fn merge_window(&self) -> Duration {
        Duration::from_secs(self.merge_window_secs)
    }

    /// Cancellation grace period as a duration.
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    /// Sub-agent wait budget as a duration.
    pub fn subagent_wait(&self) -> Duration {
        Duration::from_secs(self.subagent_wait_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            merge_window_secs: default_merge_window_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
            subagent_wait_secs: default_subagent_wait_secs(),
        }
    }
}

/// Recurring job scheduler settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// IANA timezone applied to users without an explicit override.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

/// Session registry and background maintenance settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Idle age after which a quiescent session is evicted, in seconds.
    #[serde(default = "default_session_max_idle_secs")]
    pub max_idle_secs: u64,
    /// Interval between maintenance sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl SessionConfig {
    /// Idle eviction threshold as a duration.
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    /// Maintenance sweep interval as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_idle_secs: default_session_max_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_max_sub_agents() -> usize {
    10
}
fn default_max_retries() -> u32 {
    10
}
fn default_wait_timeout_secs() -> u64 {
    300
}
fn default_wait_poll_ms() -> u64 {
    500
}
fn default_task_retention_secs() -> u64 {
    3_600
}
fn default_document_retention_secs() -> u64 {
    7 * 24 * 3_600
}
fn default_merge_window_secs() -> u64 {
    10
}
fn default_cancel_grace_secs() -> u64 {
    5
}
fn default_subagent_wait_secs() -> u64 {
    300
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_session_max_idle_secs() -> u64 {
    86_400
}
fn default_sweep_interval_secs() -> u64 {
    600
}
