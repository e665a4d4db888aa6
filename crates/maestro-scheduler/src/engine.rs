//! The scheduler engine.
//!
//! One engine serves every user. Jobs live in a per-user map guarded by
//! one `RwLock`; armed timers deliver [`TimerKey`]s into a tick channel
//! and `tick` re-checks enablement and the calendar predicate before
//! anything runs. A job's last permitted fire disables and unschedules
//! it before the work is handed to the runner, so a crash mid-execution
//! cannot produce a duplicate future fire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use maestro_core::config::SchedulerConfig;
use maestro_core::{MaestroError, MaestroResult, UserId};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::job::{JobDraft, JobPatch, ScheduleKind, ScheduledJob};
use crate::oplog::OperationLog;
use crate::store::JobStore;
use crate::timers::{TimerFacility, TimerGuard, TimerKey};
use crate::validate;

/// Executes the stored prompt of a fired job, routing it into the
/// user's task execution path.
#[async_trait]
pub trait ScheduledWorkRunner: Send + Sync {
    async fn run_scheduled(
        &self,
        user_id: &UserId,
        job_id: &str,
        name: &str,
        prompt: &str,
    ) -> MaestroResult<()>;
}

struct JobSlot {
    job: ScheduledJob,
    /// Live while the job is enabled; dropping it unschedules.
    timer: Option<TimerGuard>,
}

/// Multi-user recurring job scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    tz: Tz,
    timers: Arc<dyn TimerFacility>,
    store: Arc<dyn JobStore>,
    oplog: OperationLog,
    runner: Arc<dyn ScheduledWorkRunner>,
    jobs: RwLock<HashMap<UserId, HashMap<String, JobSlot>>>,
}

fn slot_mut<'a>(
    all: &'a mut HashMap<UserId, HashMap<String, JobSlot>>,
    user_id: &UserId,
    job_id: &str,
) -> MaestroResult<&'a mut JobSlot> {
    all.get_mut(user_id)
        .and_then(|jobs| jobs.get_mut(job_id))
        .ok_or_else(|| MaestroError::Scheduler(format!("no job '{job_id}' for this user")))
}

impl Scheduler {
    pub fn new(
        config: &SchedulerConfig,
        timers: Arc<dyn TimerFacility>,
        store: Arc<dyn JobStore>,
        oplog: OperationLog,
        runner: Arc<dyn ScheduledWorkRunner>,
    ) -> MaestroResult<Self> {
        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|_| MaestroError::Config(format!("unknown timezone '{}'", config.timezone)))?;
        Ok(Self {
            inner: Arc::new(Inner {
                tz,
                timers,
                store,
                oplog,
                runner,
                jobs: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Consumes timer fires until the channel closes.
    pub fn spawn_tick_loop(&self, mut ticks: mpsc::UnboundedReceiver<TimerKey>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(key) = ticks.recv().await {
                engine.tick(key).await;
            }
            debug!("scheduler tick channel closed");
        })
    }

    /// Restores persisted jobs, arms the enabled ones, and marks
    /// past-due once jobs elapsed instead of firing them retroactively.
    pub async fn load(&self) -> MaestroResult<usize> {
        let persisted = self.inner.store.load_all().await?;
        let now = Utc::now();
        let mut count = 0;
        let mut all = self.inner.jobs.write().await;
        for (user_id, jobs) in persisted {
            let slots = all.entry(user_id.clone()).or_default();
            for mut job in jobs {
                if job.enabled && matches!(job.kind, ScheduleKind::Once) {
                    let past_due = match job.once_fire_time(self.inner.tz) {
                        Some(when) => when <= now,
                        None => true,
                    };
                    if past_due {
                        job.enabled = false;
                        info!(
                            user_id = %user_id,
                            job_id = %job.id,
                            "once job past due at load, marked elapsed"
                        );
                        self.inner
                            .oplog
                            .record(&user_id, "elapse", &job.id, serde_json::json!({}));
                        if let Err(e) = self.inner.store.save(&user_id, &job).await {
                            warn!(
                                user_id = %user_id,
                                job_id = %job.id,
                                error = %e,
                                "failed to persist elapsed job"
                            );
                        }
                    }
                }
                let timer = self.arm(&user_id, &job);
                count += 1;
                slots.insert(job.id.clone(), JobSlot { job, timer });
            }
        }
        info!(jobs = count, "scheduler loaded");
        Ok(count)
    }

    /// Validates the draft and registers the job. A draft carrying a
    /// prompt starts enabled; one without stays disabled until
    /// [`set_prompt`](Self::set_prompt).
    pub async fn create_job(
        &self,
        user_id: &UserId,
        draft: JobDraft,
    ) -> MaestroResult<ScheduledJob> {
        let job = validate::build_job(&draft, Utc::now())?;
        let mut all = self.inner.jobs.write().await;
        let slots = all.entry(user_id.clone()).or_default();
        if slots.contains_key(&job.id) {
            return Err(MaestroError::Validation(format!(
                "job id '{}' is already in use",
                job.id
            )));
        }
        self.inner.store.save(user_id, &job).await?;
        let timer = self.arm(user_id, &job);
        slots.insert(
            job.id.clone(),
            JobSlot {
                job: job.clone(),
                timer,
            },
        );
        self.inner.oplog.record(
            user_id,
            "create",
            &job.id,
            serde_json::json!({ "kind": job.kind.to_string(), "enabled": job.enabled }),
        );
        info!(user_id = %user_id, job_id = %job.id, kind = %job.kind, "job created");
        Ok(job)
    }

    /// Supplies the prompt of a draft job, enabling it if its run
    /// budget allows.
    pub async fn set_prompt(
        &self,
        user_id: &UserId,
        job_id: &str,
        prompt: &str,
    ) -> MaestroResult<ScheduledJob> {
        let mut all = self.inner.jobs.write().await;
        let slot = slot_mut(&mut all, user_id, job_id)?;
        slot.job.prompt = Some(prompt.to_string());
        if !slot.job.enabled && !slot.job.limit_reached() {
            slot.job.enabled = true;
            slot.timer = self.arm(user_id, &slot.job);
        }
        let job = slot.job.clone();
        self.inner.store.save(user_id, &job).await?;
        self.inner.oplog.record(
            user_id,
            "set_prompt",
            job_id,
            serde_json::json!({ "enabled": job.enabled }),
        );
        Ok(job)
    }

    /// Applies a partial update, re-validating and rescheduling.
    pub async fn update_job(
        &self,
        user_id: &UserId,
        job_id: &str,
        patch: JobPatch,
    ) -> MaestroResult<ScheduledJob> {
        let mut all = self.inner.jobs.write().await;
        let slot = slot_mut(&mut all, user_id, job_id)?;
        let next = validate::apply_patch(&slot.job, &patch)?;
        slot.job = next.clone();
        slot.timer = self.arm(user_id, &slot.job);
        self.inner.store.save(user_id, &next).await?;
        self.inner.oplog.record(
            user_id,
            "update",
            job_id,
            serde_json::json!({ "kind": next.kind.to_string() }),
        );
        info!(user_id = %user_id, job_id = %job_id, "job updated");
        Ok(next)
    }

    /// Manual enable/disable. Enabling requires a prompt and remaining
    /// run budget.
    pub async fn set_enabled(
        &self,
        user_id: &UserId,
        job_id: &str,
        enabled: bool,
    ) -> MaestroResult<ScheduledJob> {
        let mut all = self.inner.jobs.write().await;
        let slot = slot_mut(&mut all, user_id, job_id)?;
        if enabled {
            if slot.job.prompt.is_none() {
                return Err(MaestroError::Validation(format!(
                    "job '{job_id}' has no prompt yet"
                )));
            }
            if slot.job.limit_reached() {
                return Err(MaestroError::Validation(format!(
                    "job '{job_id}' has reached its run limit"
                )));
            }
        }
        slot.job.enabled = enabled;
        slot.timer = if enabled {
            self.arm(user_id, &slot.job)
        } else {
            None
        };
        let job = slot.job.clone();
        self.inner.store.save(user_id, &job).await?;
        self.inner.oplog.record(
            user_id,
            if enabled { "enable" } else { "disable" },
            job_id,
            serde_json::json!({}),
        );
        Ok(job)
    }

    /// Unschedules and removes the job. The oplog entry embeds the full
    /// job, prompt included, so the delete is recoverable by inspection.
    pub async fn delete_job(&self, user_id: &UserId, job_id: &str) -> MaestroResult<()> {
        let mut all = self.inner.jobs.write().await;
        let removed = all
            .get_mut(user_id)
            .and_then(|jobs| jobs.remove(job_id))
            .ok_or_else(|| MaestroError::Scheduler(format!("no job '{job_id}' for this user")))?;
        self.inner.store.remove(user_id, job_id).await?;
        self.inner
            .oplog
            .record_with_snapshot(user_id, "delete", serde_json::json!({}), removed.job);
        info!(user_id = %user_id, job_id = %job_id, "job deleted");
        Ok(())
    }

    /// All of a user's jobs, oldest first.
    pub async fn list_jobs(&self, user_id: &UserId) -> Vec<ScheduledJob> {
        let all = self.inner.jobs.read().await;
        let mut jobs: Vec<ScheduledJob> = all
            .get(user_id)
            .map(|jobs| jobs.values().map(|slot| slot.job.clone()).collect())
            .unwrap_or_default();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        jobs
    }

    pub async fn job(&self, user_id: &UserId, job_id: &str) -> Option<ScheduledJob> {
        self.inner
            .jobs
            .read()
            .await
            .get(user_id)
            .and_then(|jobs| jobs.get(job_id))
            .map(|slot| slot.job.clone())
    }

    /// Handles one timer fire end to end.
    pub async fn tick(&self, key: TimerKey) {
        let fired = {
            let mut all = self.inner.jobs.write().await;
            let Some(slot) = all
                .get_mut(&key.user_id)
                .and_then(|jobs| jobs.get_mut(&key.job_id))
            else {
                debug!(user_id = %key.user_id, job_id = %key.job_id, "tick for unknown job dropped");
                return;
            };
            if !slot.job.enabled {
                debug!(user_id = %key.user_id, job_id = %key.job_id, "tick for disabled job dropped");
                self.inner.oplog.record(
                    &key.user_id,
                    "skip",
                    &key.job_id,
                    serde_json::json!({ "reason": "disabled" }),
                );
                return;
            }
            let today = self.today();
            if !slot.job.fires_on(today) {
                debug!(
                    user_id = %key.user_id,
                    job_id = %key.job_id,
                    date = %today,
                    "not due today"
                );
                self.inner.oplog.record(
                    &key.user_id,
                    "skip",
                    &key.job_id,
                    serde_json::json!({ "reason": "calendar", "date": today.to_string() }),
                );
                return;
            }
            slot.job.run_count += 1;
            slot.job.last_run = Some(Utc::now());
            if slot.job.limit_reached() {
                // Unschedule before the work runs.
                slot.job.enabled = false;
                slot.timer = None;
                info!(
                    user_id = %key.user_id,
                    job_id = %key.job_id,
                    runs = slot.job.run_count,
                    "job used its last permitted run, disabled"
                );
            }
            slot.job.clone()
        };

        if let Err(e) = self.inner.store.save(&key.user_id, &fired).await {
            warn!(
                user_id = %key.user_id,
                job_id = %fired.id,
                error = %e,
                "failed to persist fired job"
            );
        }
        self.inner.oplog.record(
            &key.user_id,
            "fire",
            &fired.id,
            serde_json::json!({ "run_count": fired.run_count, "enabled": fired.enabled }),
        );

        let Some(prompt) = fired.prompt.as_deref() else {
            warn!(user_id = %key.user_id, job_id = %fired.id, "fired job has no prompt, nothing to run");
            return;
        };
        info!(user_id = %key.user_id, job_id = %fired.id, run = fired.run_count, "job firing");
        if let Err(e) = self
            .inner
            .runner
            .run_scheduled(&key.user_id, &fired.id, &fired.name, prompt)
            .await
        {
            warn!(
                user_id = %key.user_id,
                job_id = %fired.id,
                error = %e,
                "scheduled work failed"
            );
            self.inner.oplog.record(
                &key.user_id,
                "fire_failed",
                &fired.id,
                serde_json::json!({ "error": e.to_string() }),
            );
        }
    }

    fn arm(&self, user_id: &UserId, job: &ScheduledJob) -> Option<TimerGuard> {
        if !job.enabled {
            return None;
        }
        let key = TimerKey {
            user_id: user_id.clone(),
            job_id: job.id.clone(),
        };
        match job.kind {
            ScheduleKind::Daily | ScheduleKind::Weekly | ScheduleKind::Monthly => Some(
                self.inner
                    .timers
                    .run_daily(job.hour, job.minute, self.inner.tz, key),
            ),
            ScheduleKind::Interval => {
                let minutes = job.interval_minutes.unwrap_or(1).max(1);
                let every = Duration::from_secs(u64::from(minutes) * 60);
                Some(self.inner.timers.run_repeating(every, job.start_time, key))
            }
            ScheduleKind::Once => match job.once_fire_time(self.inner.tz) {
                Some(when) => Some(self.inner.timers.run_once(when, key)),
                None => {
                    warn!(
                        user_id = %user_id,
                        job_id = %job.id,
                        "once job has no valid fire time, not armed"
                    );
                    None
                }
            },
        }
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.inner.tz).date_naive()
    }
}
