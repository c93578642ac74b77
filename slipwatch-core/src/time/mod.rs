//! Run-time setup, time windows, and path/time token resolution.

pub mod files;
pub mod tokens;

use chrono::{DateTime, Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq)]
pub enum TimeError {
    #[error("invalid time window '{0}': expected {{count}}{{h|d}}")]
    InvalidWindow(String),

    #[error("time step must be positive, got {0} seconds")]
    NonPositiveStep(i64),

    #[error("time start {start} is after time end {end}")]
    StartAfterEnd {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("time start and time end must be set together")]
    HalfOpenRange,

    #[error("timestamp {0} is out of the representable range")]
    OutOfRange(NaiveDateTime),
}

/// How the run time and its range are derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindowSpec {
    /// Number of steps ending at the run time.
    pub period: u32,
    /// Step between range elements, e.g. `"1d"` or `"h"`.
    pub frequency: String,
    /// Unit the run time is floored to, e.g. `"h"`.
    pub rounding: String,
    /// Explicit range start; must come with `end`.
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl Default for TimeWindowSpec {
    fn default() -> Self {
        Self {
            period: 24,
            frequency: "h".into(),
            rounding: "h".into(),
            start: None,
            end: None,
        }
    }
}

/// The reference run time plus the range the orchestrator iterates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSetup {
    pub time_run: NaiveDateTime,
    /// Newest first.
    pub time_range: Vec<NaiveDateTime>,
}

impl TimeSetup {
    pub fn first(&self) -> Option<NaiveDateTime> {
        self.time_range.iter().min().copied()
    }

    pub fn last(&self) -> Option<NaiveDateTime> {
        self.time_range.iter().max().copied()
    }
}

/// Floor the run time and build the time range, newest first.
pub fn set_time(time_run: NaiveDateTime, spec: &TimeWindowSpec) -> Result<TimeSetup, TimeError> {
    let rounding = parse_time_window(&spec.rounding)?;
    let frequency = parse_time_window(&spec.frequency)?;
    let time_run = floor_to(time_run, rounding)?;

    let mut time_range = match (spec.start, spec.end) {
        (None, None) => {
            info!(%time_run, period = spec.period, "time range defined by run time");
            if spec.period == 0 {
                vec![time_run]
            } else {
                let span = frequency * (spec.period as i32 - 1);
                date_range(time_run - span, time_run, frequency)?
            }
        }
        (Some(start), Some(end)) => {
            let start = floor_to(start, rounding)?;
            let end = floor_to(end, rounding)?;
            if start > end {
                return Err(TimeError::StartAfterEnd { start, end });
            }
            info!(%start, %end, "time range defined by explicit bounds");
            date_range(start, end, frequency)?
        }
        _ => return Err(TimeError::HalfOpenRange),
    };
    time_range.reverse();

    Ok(TimeSetup {
        time_run,
        time_range,
    })
}

/// Split a `{count}{unit}` window. A missing count means 1.
pub fn split_time_window(window: &str) -> (u32, String) {
    let window = window.trim();
    let digits: String = window.chars().take_while(|c| c.is_ascii_digit()).collect();
    let unit = window[digits.len()..].to_string();
    let count = digits.parse().unwrap_or(1);
    (count, unit)
}

/// Parse `"3h"`, `"d"`, `"24H"` into a duration.
pub fn parse_time_window(window: &str) -> Result<Duration, TimeError> {
    let (count, unit) = split_time_window(&window.to_lowercase());
    match unit.as_str() {
        "h" => Ok(Duration::hours(i64::from(count))),
        "d" => Ok(Duration::days(i64::from(count))),
        _ => Err(TimeError::InvalidWindow(window.to_string())),
    }
}

/// Inclusive range from `start` to `end` at `step`.
pub fn date_range(
    start: NaiveDateTime,
    end: NaiveDateTime,
    step: Duration,
) -> Result<Vec<NaiveDateTime>, TimeError> {
    if step <= Duration::zero() {
        return Err(TimeError::NonPositiveStep(step.num_seconds()));
    }
    let mut out = Vec::new();
    let mut current = start;
    while current <= end {
        out.push(current);
        current = current
            .checked_add_signed(step)
            .ok_or(TimeError::OutOfRange(current))?;
    }
    Ok(out)
}

/// Floor a timestamp to a multiple of `step` since the epoch.
pub fn floor_to(t: NaiveDateTime, step: Duration) -> Result<NaiveDateTime, TimeError> {
    let step_secs = step.num_seconds();
    if step_secs <= 0 {
        return Err(TimeError::NonPositiveStep(step_secs));
    }
    let secs = t.and_utc().timestamp();
    let floored = secs - secs.rem_euclid(step_secs);
    DateTime::from_timestamp(floored, 0)
        .map(|d| d.naive_utc())
        .ok_or(TimeError::OutOfRange(t))
}
