//! Validation of user-supplied schedule fields.
//!
//! Every rule rejects synchronously with a specific reason before any
//! state is touched. Parsers accept the raw strings users type (time of
//! day, weekday lists, interval shorthand, dates) and produce the typed
//! fields stored on [`ScheduledJob`].

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use maestro_core::{MaestroError, MaestroResult};
use regex::Regex;

use crate::job::{JobDraft, JobPatch, ScheduleKind, ScheduledJob};

#[allow(clippy::expect_used)]
static JOB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,32}$").expect("hardcoded regex"));

#[allow(clippy::expect_used)]
static TIME_OF_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("hardcoded regex"));

#[allow(clippy::expect_used)]
static INTERVAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,5})([mhd])$").expect("hardcoded regex"));

fn invalid(reason: impl Into<String>) -> MaestroError {
    MaestroError::Validation(reason.into())
}

/// Job ids are 1-32 characters of `[A-Za-z0-9_]`.
pub fn job_id(id: &str) -> MaestroResult<()> {
    if JOB_ID.is_match(id) {
        Ok(())
    } else {
        Err(invalid(format!(
            "job id '{id}' must be 1-32 characters of letters, digits, or underscore"
        )))
    }
}

/// Parses `HH:MM` with 00-23 hours and 00-59 minutes.
pub fn time_of_day(s: &str) -> MaestroResult<(u8, u8)> {
    let caps = TIME_OF_DAY
        .captures(s)
        .ok_or_else(|| invalid(format!("time '{s}' must be HH:MM")))?;
    let hour: u8 = caps[1]
        .parse()
        .map_err(|_| invalid(format!("time '{s}' has an invalid hour")))?;
    let minute: u8 = caps[2]
        .parse()
        .map_err(|_| invalid(format!("time '{s}' has an invalid minute")))?;
    if hour > 23 {
        return Err(invalid(format!("hour {hour} is out of range (0-23)")));
    }
    if minute > 59 {
        return Err(invalid(format!("minute {minute} is out of range (0-59)")));
    }
    Ok((hour, minute))
}

/// Parses a comma-separated weekday list into 0=Monday..6=Sunday.
///
/// Tokens are case-insensitive names ("mon", "Monday"), or numerals 1-7
/// where 1 is Monday. The result is sorted and deduplicated.
pub fn weekday_set(s: &str) -> MaestroResult<Vec<u8>> {
    let mut days = Vec::new();
    for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        days.push(weekday_token(token)?);
    }
    if days.is_empty() {
        return Err(invalid("weekday list is empty"));
    }
    days.sort_unstable();
    days.dedup();
    Ok(days)
}

fn weekday_token(token: &str) -> MaestroResult<u8> {
    if let Ok(n) = token.parse::<u8>() {
        if (1..=7).contains(&n) {
            return Ok(n - 1);
        }
        return Err(invalid(format!("weekday {n} is out of range (1-7)")));
    }
    let day = match token.to_ascii_lowercase().as_str() {
        "mon" | "monday" => 0,
        "tue" | "tues" | "tuesday" => 1,
        "wed" | "wednesday" => 2,
        "thu" | "thur" | "thurs" | "thursday" => 3,
        "fri" | "friday" => 4,
        "sat" | "saturday" => 5,
        "sun" | "sunday" => 6,
        _ => return Err(invalid(format!("unknown weekday '{token}'"))),
    };
    Ok(day)
}

/// Day of month, 1-31.
pub fn month_day(day: u8) -> MaestroResult<u8> {
    if (1..=31).contains(&day) {
        Ok(day)
    } else {
        Err(invalid(format!("month day {day} is out of range (1-31)")))
    }
}

/// Parses interval shorthand `<int>[m|h|d]` into minutes.
pub fn interval_minutes(s: &str) -> MaestroResult<u32> {
    let caps = INTERVAL
        .captures(s)
        .ok_or_else(|| invalid(format!("interval '{s}' must be a number followed by m, h, or d")))?;
    let value: u32 = caps[1]
        .parse()
        .map_err(|_| invalid(format!("interval '{s}' has an invalid count")))?;
    let minutes = match &caps[2] {
        "m" => value,
        "h" => value.saturating_mul(60),
        _ => value.saturating_mul(60 * 24),
    };
    if minutes == 0 {
        return Err(invalid(format!("interval '{s}' must be at least one minute")));
    }
    Ok(minutes)
}

/// Parses `YYYY-MM-DD` into a calendar date.
pub fn run_date(s: &str) -> MaestroResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| invalid(format!("date '{s}' must be a valid YYYY-MM-DD")))
}

/// `max_runs` must be positive when set.
pub fn max_runs(n: u32) -> MaestroResult<u32> {
    if n == 0 {
        Err(invalid("max_runs must be a positive integer"))
    } else {
        Ok(n)
    }
}

/// Validates a draft and assembles the stored job.
///
/// Per-kind required fields: a time of day for everything but interval,
/// `month_day` for monthly, an interval for interval, a date for once.
/// A draft without a prompt is created disabled, awaiting one.
pub fn build_job(draft: &JobDraft, now: DateTime<Utc>) -> MaestroResult<ScheduledJob> {
    job_id(&draft.id)?;
    if draft.name.trim().is_empty() {
        return Err(invalid("job name must not be empty"));
    }

    let (hour, minute) = match (draft.kind, &draft.time) {
        (ScheduleKind::Interval, _) => (0, 0),
        (_, Some(time)) => time_of_day(time)?,
        (kind, None) => {
            return Err(invalid(format!("a {kind} job needs a time of day (HH:MM)")));
        }
    };

    let weekdays = match (draft.kind, &draft.weekdays) {
        (ScheduleKind::Weekly, Some(tokens)) => Some(weekday_set(tokens)?),
        _ => None,
    };

    let month_day = match (draft.kind, draft.month_day) {
        (ScheduleKind::Monthly, Some(day)) => Some(self::month_day(day)?),
        (ScheduleKind::Monthly, None) => {
            return Err(invalid("a monthly job needs a day of month"));
        }
        _ => None,
    };

    let interval = match (draft.kind, &draft.interval) {
        (ScheduleKind::Interval, Some(spec)) => Some(interval_minutes(spec)?),
        (ScheduleKind::Interval, None) => {
            return Err(invalid("an interval job needs an interval such as 30m, 2h, or 1d"));
        }
        _ => None,
    };

    let date = match (draft.kind, &draft.run_date) {
        (ScheduleKind::Once, Some(s)) => Some(run_date(s)?),
        (ScheduleKind::Once, None) => {
            return Err(invalid("a once job needs a run date (YYYY-MM-DD)"));
        }
        _ => None,
    };

    let max = draft.max_runs.map(max_runs).transpose()?;

    Ok(ScheduledJob {
        id: draft.id.clone(),
        name: draft.name.clone(),
        kind: draft.kind,
        hour,
        minute,
        weekdays,
        month_day,
        interval_minutes: interval,
        run_date: date,
        start_time: draft.start_time,
        enabled: draft.prompt.is_some(),
        max_runs: max,
        run_count: 0,
        last_run: None,
        created_at: now,
        prompt: draft.prompt.clone(),
    })
}

/// Applies a patch to a copy of the job, validating each changed field.
pub fn apply_patch(job: &ScheduledJob, patch: &JobPatch) -> MaestroResult<ScheduledJob> {
    let mut next = job.clone();
    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(invalid("job name must not be empty"));
        }
        next.name = name.clone();
    }
    if let Some(time) = &patch.time {
        let (hour, minute) = time_of_day(time)?;
        next.hour = hour;
        next.minute = minute;
    }
    if let Some(tokens) = &patch.weekdays {
        next.weekdays = Some(weekday_set(tokens)?);
    }
    if let Some(day) = patch.month_day {
        next.month_day = Some(month_day(day)?);
    }
    if let Some(spec) = &patch.interval {
        next.interval_minutes = Some(interval_minutes(spec)?);
    }
    if let Some(date) = &patch.run_date {
        next.run_date = Some(run_date(date)?);
    }
    if let Some(start) = patch.start_time {
        next.start_time = Some(start);
    }
    if let Some(max) = patch.max_runs {
        next.max_runs = Some(max_runs(max)?);
    }
    if let Some(prompt) = &patch.prompt {
        next.prompt = Some(prompt.clone());
    }
    Ok(next)
}
