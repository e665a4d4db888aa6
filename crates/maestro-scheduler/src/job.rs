//! Scheduled job definitions and trigger evaluation.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// The five supported schedule shapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Fires every day at `hour:minute`.
    #[default]
    Daily,
    /// Fires at `hour:minute` on the weekdays listed in `weekdays`.
    Weekly,
    /// Fires at `hour:minute` on `month_day` (clamped to the month's end).
    Monthly,
    /// Fires every `interval_minutes`, optionally starting at `start_time`.
    Interval,
    /// Fires exactly once at `run_date` `hour:minute`.
    Once,
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleKind::Daily => write!(f, "daily"),
            ScheduleKind::Weekly => write!(f, "weekly"),
            ScheduleKind::Monthly => write!(f, "monthly"),
            ScheduleKind::Interval => write!(f, "interval"),
            ScheduleKind::Once => write!(f, "once"),
        }
    }
}

/// A single recurring (or one-shot) job definition.
///
/// Jobs are persisted per user; `run_count`, `last_run`, and `enabled`
/// make up the mutable lifecycle state, everything else is the schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    pub kind: ScheduleKind,
    /// Hour of day, 0-23. Ignored for interval jobs.
    #[serde(default)]
    pub hour: u8,
    /// Minute of hour, 0-59. Ignored for interval jobs.
    #[serde(default)]
    pub minute: u8,
    /// Weekly only: 0 = Monday .. 6 = Sunday. Unset behaves as daily.
    #[serde(default)]
    pub weekdays: Option<Vec<u8>>,
    /// Monthly only: target day of month, 1-31.
    #[serde(default)]
    pub month_day: Option<u8>,
    /// Interval only: minutes between fires.
    #[serde(default)]
    pub interval_minutes: Option<u32>,
    /// Once only: the calendar date to fire on.
    #[serde(default)]
    pub run_date: Option<NaiveDate>,
    /// Interval only: suppress the first fire until this instant.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Auto-disable after this many fires. Unset means unlimited.
    #[serde(default)]
    pub max_runs: Option<u32>,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// The work handed to the runner on fire. A job with no prompt
    /// stays disabled until one is supplied.
    #[serde(default)]
    pub prompt: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl ScheduledJob {
    /// Should this job fire on `today`?
    ///
    /// Calendar kinds check the date; interval and once jobs are driven
    /// entirely by their timers, so a tick for them always qualifies.
    pub fn fires_on(&self, today: NaiveDate) -> bool {
        match self.kind {
            ScheduleKind::Daily => true,
            ScheduleKind::Weekly => match &self.weekdays {
                Some(days) if !days.is_empty() => {
                    let weekday = today.weekday().num_days_from_monday();
                    days.iter().any(|&d| u32::from(d) == weekday)
                }
                _ => true,
            },
            ScheduleKind::Monthly => {
                let Some(target) = self.month_day else {
                    return false;
                };
                let last = last_day_of_month(today.year(), today.month());
                today.day() == u32::from(target).min(last)
            }
            ScheduleKind::Interval | ScheduleKind::Once => true,
        }
    }

    /// The single UTC fire instant of a once job, or `None` when the
    /// date/time combination does not exist in the given timezone.
    pub fn once_fire_time(&self, tz: Tz) -> Option<DateTime<Utc>> {
        let date = self.run_date?;
        let naive = date.and_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)?;
        naive
            .and_local_timezone(tz)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }

    /// True once the job has used up its permitted fires. A once job is
    /// spent after any fire; otherwise `max_runs` bounds `run_count`.
    pub fn limit_reached(&self) -> bool {
        if matches!(self.kind, ScheduleKind::Once) && self.run_count > 0 {
            return true;
        }
        self.max_runs.is_some_and(|max| self.run_count >= max)
    }
}

/// Number of days in the given month.
pub(crate) fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}

/// Creation input for [`ScheduledJob`], carrying the raw user-facing
/// strings before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobDraft {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: ScheduleKind,
    /// `HH:MM`, required for every kind except interval.
    #[serde(default)]
    pub time: Option<String>,
    /// Comma-separated weekday names or 1-7 numerals, weekly only.
    #[serde(default)]
    pub weekdays: Option<String>,
    #[serde(default)]
    pub month_day: Option<u8>,
    /// `<int>[m|h|d]`, interval only.
    #[serde(default)]
    pub interval: Option<String>,
    /// `YYYY-MM-DD`, once only.
    #[serde(default)]
    pub run_date: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_runs: Option<u32>,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Partial update for an existing job. Unset fields keep their value;
/// the schedule kind itself cannot be patched.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub name: Option<String>,
    pub time: Option<String>,
    pub weekdays: Option<String>,
    pub month_day: Option<u8>,
    pub interval: Option<String>,
    pub run_date: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub max_runs: Option<u32>,
    pub prompt: Option<String>,
}
