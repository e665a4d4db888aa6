//! Timer facility behind the scheduler.
//!
//! Timers never execute work themselves. Each fire delivers a
//! [`TimerKey`] into the scheduler's tick channel, and the scheduler
//! re-checks enablement and the calendar predicate before running
//! anything. Dropping a [`TimerGuard`] cancels the underlying timer, so
//! unscheduling is just dropping the guard.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use maestro_core::UserId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Identifies which job a timer fire belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub user_id: UserId,
    pub job_id: String,
}

/// Cancels its timer when dropped or cancelled explicitly.
#[derive(Debug)]
pub struct TimerGuard {
    token: CancellationToken,
}

impl TimerGuard {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Arms timers that deliver [`TimerKey`]s when they elapse.
pub trait TimerFacility: Send + Sync {
    /// One fire at `when`. Past instants fire immediately.
    fn run_once(&self, when: DateTime<Utc>, key: TimerKey) -> TimerGuard;

    /// Fires every day at `hour:minute` in `tz`.
    fn run_daily(&self, hour: u8, minute: u8, tz: Tz, key: TimerKey) -> TimerGuard;

    /// Fires every `every`, the first time at `first_run` when given
    /// (or after one full interval otherwise).
    fn run_repeating(
        &self,
        every: Duration,
        first_run: Option<DateTime<Utc>>,
        key: TimerKey,
    ) -> TimerGuard;
}

/// Production timers backed by tokio sleeps and a cron schedule for the
/// daily kind.
pub struct TokioTimers {
    ticks: mpsc::UnboundedSender<TimerKey>,
}

impl TokioTimers {
    /// Fires are sent into `ticks`; the scheduler consumes the other end.
    pub fn new(ticks: mpsc::UnboundedSender<TimerKey>) -> Self {
        Self { ticks }
    }
}

impl TimerFacility for TokioTimers {
    fn run_once(&self, when: DateTime<Utc>, key: TimerKey) -> TimerGuard {
        let token = CancellationToken::new();
        let guard = TimerGuard::new(token.clone());
        let ticks = self.ticks.clone();
        tokio::spawn(async move {
            let now = Utc::now();
            if when > now {
                let wait = (when - now).to_std().unwrap_or_default();
                debug!(job_id = %key.job_id, ?wait, "one-shot timer armed");
                tokio::select! {
                    () = token.cancelled() => return,
                    () = tokio::time::sleep(wait) => {}
                }
            }
            let _ = ticks.send(key);
        });
        guard
    }

    fn run_daily(&self, hour: u8, minute: u8, tz: Tz, key: TimerKey) -> TimerGuard {
        let token = CancellationToken::new();
        let guard = TimerGuard::new(token.clone());
        // 7-field cron format: sec min hour day-of-month month day-of-week year.
        let expr = format!("0 {minute} {hour} * * * *");
        let schedule = match Schedule::from_str(&expr) {
            Ok(s) => s,
            Err(e) => {
                warn!(job_id = %key.job_id, error = %e, "invalid daily schedule, timer not armed");
                return guard;
            }
        };
        let ticks = self.ticks.clone();
        tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(tz).next() else {
                    warn!(job_id = %key.job_id, "daily schedule has no upcoming fire time");
                    return;
                };
                let wait = (next.with_timezone(&Utc) - Utc::now())
                    .to_std()
                    .unwrap_or_default();
                debug!(job_id = %key.job_id, ?wait, "daily timer sleeping");
                tokio::select! {
                    () = token.cancelled() => return,
                    () = tokio::time::sleep(wait) => {}
                }
                if ticks.send(key.clone()).is_err() {
                    return;
                }
            }
        });
        guard
    }

    fn run_repeating(
        &self,
        every: Duration,
        first_run: Option<DateTime<Utc>>,
        key: TimerKey,
    ) -> TimerGuard {
        let token = CancellationToken::new();
        let guard = TimerGuard::new(token.clone());
        let ticks = self.ticks.clone();
        tokio::spawn(async move {
            let initial = match first_run {
                Some(first) => (first - Utc::now()).to_std().unwrap_or_default(),
                None => every,
            };
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(initial) => {}
            }
            loop {
                if ticks.send(key.clone()).is_err() {
                    return;
                }
                tokio::select! {
                    () = token.cancelled() => return,
                    () = tokio::time::sleep(every) => {}
                }
            }
        });
        guard
    }
}

/// How a timer was registered with [`ManualTimers`].
#[derive(Debug, Clone)]
pub enum TimerSpec {
    Once {
        when: DateTime<Utc>,
    },
    Daily {
        hour: u8,
        minute: u8,
        tz: Tz,
    },
    Repeating {
        every: Duration,
        first_run: Option<DateTime<Utc>>,
    },
}

struct Registration {
    key: TimerKey,
    spec: TimerSpec,
    token: CancellationToken,
}

/// Test facility that records registrations and never fires on its own;
/// tests deliver ticks to the scheduler directly.
#[derive(Default)]
pub struct ManualTimers {
    registrations: parking_lot::Mutex<Vec<Registration>>,
}

impl ManualTimers {
    fn register(&self, key: TimerKey, spec: TimerSpec) -> TimerGuard {
        let token = CancellationToken::new();
        self.registrations.lock().push(Registration {
            key,
            spec,
            token: token.clone(),
        });
        TimerGuard::new(token)
    }

    /// Keys of registrations whose guards are still alive.
    pub fn active_keys(&self) -> Vec<TimerKey> {
        self.registrations
            .lock()
            .iter()
            .filter(|r| !r.token.is_cancelled())
            .map(|r| r.key.clone())
            .collect()
    }

    /// Total registrations ever made, cancelled or not.
    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// The most recent live registration for a job, if any.
    pub fn last_spec_for(&self, job_id: &str) -> Option<TimerSpec> {
        self.registrations
            .lock()
            .iter()
            .rev()
            .find(|r| r.key.job_id == job_id && !r.token.is_cancelled())
            .map(|r| r.spec.clone())
    }
}

impl TimerFacility for ManualTimers {
    fn run_once(&self, when: DateTime<Utc>, key: TimerKey) -> TimerGuard {
        self.register(key, TimerSpec::Once { when })
    }

    fn run_daily(&self, hour: u8, minute: u8, tz: Tz, key: TimerKey) -> TimerGuard {
        self.register(key, TimerSpec::Daily { hour, minute, tz })
    }

    fn run_repeating(
        &self,
        every: Duration,
        first_run: Option<DateTime<Utc>>,
        key: TimerKey,
    ) -> TimerGuard {
        self.register(key, TimerSpec::Repeating { every, first_run })
    }
}
