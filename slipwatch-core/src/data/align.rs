//! Multi-source time alignment.
//!
//! Given the rain, soil-moisture and soil-slips accumulators, compute the
//! common overlap window across the enabled sources, the expected timeline
//! inside it, and per-source completeness against that timeline.

use chrono::{Duration, NaiveDateTime};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info};

use crate::table::{has_column, time_bounds, times, TableError};
use crate::time::{date_range, TimeError};

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("no overlap between the selected datasets: window start {start} is after end {end}")]
    NoOverlap {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Time(#[from] TimeError),
}

/// One source offered to the aligner.
#[derive(Debug, Clone, Copy)]
pub struct AlignInput<'a> {
    pub name: &'a str,
    pub frame: Option<&'a DataFrame>,
    /// Whether this source participates in the window computation.
    pub enabled: bool,
}

/// Completeness of one source against the expected timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub expected: usize,
    pub found: usize,
    pub percent: f64,
}

/// Result of an alignment pass. Recomputed every invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentSummary {
    pub time_run: NaiveDateTime,
    /// Bounds of the caller's time range.
    pub time_period_ref: Option<(NaiveDateTime, NaiveDateTime)>,
    /// Bounds of the computed common window.
    pub time_period_data: Option<(NaiveDateTime, NaiveDateTime)>,
    pub frequency_secs: Option<i64>,
    pub expected_range: Vec<NaiveDateTime>,
    pub missing: BTreeMap<String, Vec<NaiveDateTime>>,
    pub stats: BTreeMap<String, SourceStats>,
}

impl AlignmentSummary {
    pub fn frequency(&self) -> Option<Duration> {
        self.frequency_secs.map(Duration::seconds)
    }
}

/// Step between consecutive distinct times when it is regular. Needs at least three points.
pub fn infer_frequency(times: &[NaiveDateTime]) -> Option<Duration> {
    let distinct: Vec<NaiveDateTime> = times.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    if distinct.len() < 3 {
        return None;
    }
    let step = distinct[1] - distinct[0];
    distinct
        .windows(2)
        .all(|w| w[1] - w[0] == step)
        .then_some(step)
}

/// Align the given sources on their common window.
pub fn align(
    time_run: NaiveDateTime,
    time_range: &[NaiveDateTime],
    inputs: &[AlignInput<'_>],
    time_col: &str,
) -> Result<AlignmentSummary, AlignError> {
    let time_period_ref = time_range
        .iter()
        .min()
        .copied()
        .zip(time_range.iter().max().copied());

    let mut bounds = Vec::new();
    let mut reference: Option<Vec<NaiveDateTime>> = None;
    for input in inputs.iter().filter(|i| i.enabled) {
        let Some(frame) = input.frame.filter(|f| f.height() > 0) else {
            debug!(source = input.name, "enabled source is empty, excluded from window");
            continue;
        };
        if let Some(b) = time_bounds(frame, time_col)? {
            bounds.push(b);
            if reference.is_none() {
                reference = Some(times(frame, time_col)?);
            }
        }
    }

    let (window, frequency, expected_range) = if bounds.is_empty() {
        info!("no enabled source has data, falling back to the reference time range");
        match time_period_ref {
            None => (None, None, Vec::new()),
            Some(w) => {
                let mut range = time_range.to_vec();
                range.sort();
                range.dedup();
                (Some(w), infer_frequency(&range), range)
            }
        }
    } else {
        let start = bounds.iter().map(|b| b.0).max().unwrap_or(bounds[0].0);
        let end = bounds.iter().map(|b| b.1).min().unwrap_or(bounds[0].1);
        if start > end {
            return Err(AlignError::NoOverlap { start, end });
        }
        let step = reference
            .as_deref()
            .and_then(infer_frequency)
            .unwrap_or_else(|| Duration::days(1));
        let range = if start == end {
            vec![start]
        } else {
            date_range(start, end, step)?
        };
        (Some((start, end)), Some(step), range)
    };

    let expected_set: BTreeSet<NaiveDateTime> = expected_range.iter().copied().collect();
    let mut missing = BTreeMap::new();
    let mut stats = BTreeMap::new();
    for input in inputs {
        let present: BTreeSet<NaiveDateTime> = match input.frame {
            Some(f) if has_column(f, time_col) => times(f, time_col)?.into_iter().collect(),
            _ => BTreeSet::new(),
        };
        let found = match window {
            Some((s, e)) => present.range(s..=e).count(),
            None => 0,
        };
        let expected = expected_set.len();
        let percent = if expected == 0 {
            0.0
        } else {
            (found as f64 / expected as f64 * 10_000.0).round() / 100.0
        };
        missing.insert(
            input.name.to_string(),
            expected_set.difference(&present).copied().collect(),
        );
        stats.insert(
            input.name.to_string(),
            SourceStats {
                expected,
                found,
                percent,
            },
        );
    }

    Ok(AlignmentSummary {
        time_run,
        time_period_ref,
        time_period_data: window,
        frequency_secs: frequency.map(|f| f.num_seconds()),
        expected_range,
        missing,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{parse_time, time_column};

    fn day(n: u32) -> NaiveDateTime {
        parse_time(&format!("2024-01-{n:02}")).unwrap()
    }

    fn days(range: std::ops::RangeInclusive<u32>) -> DataFrame {
        let stamps: Vec<Option<NaiveDateTime>> = range.map(|d| Some(day(d))).collect();
        let ones = vec![1.0; stamps.len()];
        DataFrame::new(vec![
            time_column("time", &stamps).unwrap(),
            polars::prelude::Column::new("v".into(), ones),
        ])
        .unwrap()
    }

    #[test]
    fn infers_regular_frequency() {
        assert_eq!(infer_frequency(&[day(1), day(2), day(3)]), Some(Duration::days(1)));
        assert_eq!(infer_frequency(&[day(1), day(2)]), None);
        assert_eq!(infer_frequency(&[day(1), day(2), day(4)]), None);
    }

    #[test]
    fn single_point_window() {
        let a = days(1..=5);
        let b = days(5..=9);
        let s = align(
            day(10),
            &[],
            &[
                AlignInput { name: "rain", frame: Some(&a), enabled: true },
                AlignInput { name: "sm", frame: Some(&b), enabled: true },
            ],
            "time",
        )
        .unwrap();
        assert_eq!(s.expected_range, vec![day(5)]);
        assert_eq!(s.stats["rain"].percent, 100.0);
    }

    #[test]
    fn disabled_sources_do_not_shrink_window_but_get_stats() {
        let a = days(1..=6);
        let slips = days(3..=3);
        let s = align(
            day(10),
            &[],
            &[
                AlignInput { name: "rain", frame: Some(&a), enabled: true },
                AlignInput { name: "slips", frame: Some(&slips), enabled: false },
            ],
            "time",
        )
        .unwrap();
        assert_eq!(s.time_period_data, Some((day(1), day(6))));
        assert_eq!(s.stats["slips"].found, 1);
        assert_eq!(s.stats["slips"].percent, 16.67);
        assert_eq!(s.missing["slips"].len(), 5);
    }

    #[test]
    fn falls_back_to_reference_range() {
        let range = vec![day(3), day(2), day(1)];
        let s = align(
            day(3),
            &range,
            &[AlignInput { name: "rain", frame: None, enabled: true }],
            "time",
        )
        .unwrap();
        assert_eq!(s.expected_range, vec![day(1), day(2), day(3)]);
        assert_eq!(s.stats["rain"].found, 0);
        assert_eq!(s.missing["rain"].len(), 3);
    }

    #[test]
    fn empty_everything_is_an_empty_summary() {
        let s = align(day(3), &[], &[AlignInput { name: "rain", frame: None, enabled: true }], "time")
            .unwrap();
        assert!(s.expected_range.is_empty());
        assert_eq!(s.time_period_data, None);
        assert_eq!(s.stats["rain"].percent, 0.0);
    }
}
