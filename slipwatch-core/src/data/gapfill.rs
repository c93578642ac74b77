//! Synthesizes placeholder rows for calendar days missing from a frame.
//!
//! Only additive: existing rows are kept as they are, apart from the date
//! column, which is normalized to `YYYY-MM-DD` strings on output. Rows are
//! synthesized as a frame of the same schema, stacked and re-sorted by time.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

use crate::table::{
    coerce_time, column_times, is_numeric, null_column, sort_by_time, time_column, time_grid,
    time_values, times, TableError,
};

pub const DEFAULT_NUMERIC_SENTINEL: f64 = -9999.0;
pub const DEFAULT_STRING_SENTINEL: &str = "NA";

#[derive(Debug, Error)]
pub enum GapFillError {
    #[error("cannot infer gap-fill bounds: frame has no parsable dates in '{0}'")]
    NoBounds(String),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GapFillOptions {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub date_col: String,
    pub numeric_sentinel: f64,
    pub string_sentinel: String,
    /// Time of day written into `*_time_start` columns.
    pub start_time: NaiveTime,
    /// Time of day written into `*_time_end` columns; inferred per column when unset.
    pub end_time: Option<NaiveTime>,
    /// Explicit column families. `None` means detect by suffix.
    pub time_run_cols: Option<Vec<String>>,
    pub time_start_cols: Option<Vec<String>>,
    pub time_end_cols: Option<Vec<String>>,
}

impl Default for GapFillOptions {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            date_col: "time".into(),
            numeric_sentinel: DEFAULT_NUMERIC_SENTINEL,
            string_sentinel: DEFAULT_STRING_SENTINEL.into(),
            start_time: NaiveTime::from_hms_opt(1, 0, 0).unwrap_or(NaiveTime::MIN),
            end_time: None,
            time_run_cols: None,
            time_start_cols: None,
            time_end_cols: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Family {
    Date,
    TimeRun,
    TimeStart,
    TimeEnd(NaiveTime),
    Numeric,
    Text,
}

/// Add one sentinel row per calendar day absent from `frame`.
pub fn fill_missing_days(frame: &DataFrame, opts: &GapFillOptions) -> Result<DataFrame, GapFillError> {
    if opts.start_date.is_none() && opts.end_date.is_none() {
        return Ok(frame.clone());
    }
    let mut out = frame.clone();
    coerce_time(&mut out, &opts.date_col)?;
    numeric_nulls_as_floats(&mut out, &opts.date_col)?;

    let present: BTreeSet<NaiveDate> = times(&out, &opts.date_col)?
        .into_iter()
        .map(|t| t.date())
        .collect();
    let start = opts
        .start_date
        .or_else(|| present.first().copied())
        .or(opts.end_date)
        .ok_or_else(|| GapFillError::NoBounds(opts.date_col.clone()))?;
    let end = opts
        .end_date
        .or_else(|| present.last().copied())
        .or(opts.start_date)
        .ok_or_else(|| GapFillError::NoBounds(opts.date_col.clone()))?;

    let grid = time_grid(
        &opts.date_col,
        start.and_time(NaiveTime::MIN),
        end.and_time(NaiveTime::MIN),
        Duration::days(1),
    )?;
    let missing: Vec<NaiveDate> = column_times(&grid)?
        .into_iter()
        .flatten()
        .map(|t| t.date())
        .filter(|d| !present.contains(d))
        .collect();
    if !missing.is_empty() {
        let filler = out
            .get_columns()
            .iter()
            .map(|c| synth_column(c, &missing, opts))
            .collect::<Result<Vec<_>, _>>()?;
        out = out.vstack(&DataFrame::new(filler)?)?;
    }
    debug!(added = missing.len(), %start, %end, "gap-filled missing days");

    let mut out = sort_by_time(out.lazy(), &opts.date_col).collect()?;
    let labels: Vec<Option<String>> = time_values(&out, &opts.date_col)?
        .into_iter()
        .map(|t| t.map(|t| t.format("%Y-%m-%d").to_string()))
        .collect();
    out.with_column(Column::new(opts.date_col.as_str().into(), labels))?;
    Ok(out)
}

/// All-null text columns take numeric sentinels, so they become `Float64` first.
fn numeric_nulls_as_floats(frame: &mut DataFrame, date_col: &str) -> PolarsResult<()> {
    let casts: Vec<Column> = frame
        .get_columns()
        .iter()
        .filter(|c| c.name().as_str() != date_col && c.dtype() == &DataType::String && is_numeric(c))
        .map(|c| c.cast(&DataType::Float64))
        .collect::<PolarsResult<_>>()?;
    for c in casts {
        frame.with_column(c)?;
    }
    Ok(())
}

fn classify(column: &Column, opts: &GapFillOptions) -> Family {
    let name = column.name().as_str();
    let listed = |cols: &Option<Vec<String>>, suffix: &str| match cols {
        Some(list) => list.iter().any(|c| c == name),
        None => name.ends_with(suffix),
    };
    if name == opts.date_col {
        Family::Date
    } else if listed(&opts.time_run_cols, "_time_run") {
        Family::TimeRun
    } else if listed(&opts.time_start_cols, "_time_start") {
        Family::TimeStart
    } else if listed(&opts.time_end_cols, "_time_end") {
        let at = opts
            .end_time
            .unwrap_or_else(|| dominant_time_of_day(column).unwrap_or(NaiveTime::MIN));
        Family::TimeEnd(at)
    } else if is_numeric(column) {
        Family::Numeric
    } else {
        Family::Text
    }
}

/// Most frequent time of day among the parsable values of a column. Ties pick the earliest.
fn dominant_time_of_day(column: &Column) -> Option<NaiveTime> {
    let mut counts: BTreeMap<NaiveTime, usize> = BTreeMap::new();
    for t in column_times(column).ok()?.into_iter().flatten() {
        *counts.entry(t.time()).or_default() += 1;
    }
    let best = counts.values().copied().max()?;
    counts.into_iter().find(|(_, n)| *n == best).map(|(t, _)| t)
}

/// Sentinel values of one column for the missing `days`, in the column's dtype.
fn synth_column(column: &Column, days: &[NaiveDate], opts: &GapFillOptions) -> Result<Column, GapFillError> {
    let name = column.name().as_str();
    let n = days.len();
    let stamps = |at: &dyn Fn(NaiveDate) -> NaiveDateTime, layout: &str| -> PolarsResult<Column> {
        if matches!(column.dtype(), DataType::Datetime(_, _)) {
            let values: Vec<Option<NaiveDateTime>> = days.iter().map(|d| Some(at(*d))).collect();
            time_column(name, &values)?.cast(column.dtype())
        } else {
            let values: Vec<String> = days.iter().map(|d| at(*d).format(layout).to_string()).collect();
            Column::new(name.into(), values).cast(column.dtype())
        }
    };
    let out = match classify(column, opts) {
        Family::Date | Family::TimeRun => {
            stamps(&|d: NaiveDate| d.and_time(NaiveTime::MIN), "%Y-%m-%d")?
        }
        Family::TimeStart => stamps(&|d: NaiveDate| d.and_time(opts.start_time), "%Y-%m-%d %H:%M")?,
        Family::TimeEnd(at) => stamps(
            &|d: NaiveDate| (d + Duration::days(1)).and_time(at),
            "%Y-%m-%d %H:%M",
        )?,
        Family::Numeric => Column::new(name.into(), vec![opts.numeric_sentinel; n]).cast(column.dtype())?,
        Family::Text if column.dtype() == &DataType::String => {
            Column::new(name.into(), vec![opts.string_sentinel.as_str(); n])
        }
        Family::Text => null_column(name, n, column.dtype()),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sample() -> DataFrame {
        df!(
            "time" => &["2024-01-01", "2024-01-04"],
            "rain_value" => &[1.0, 4.0],
            "rain_time_run" => &["2024-01-01", "2024-01-04"],
            "rain_time_start" => &["2024-01-01 01:00", "2024-01-04 01:00"],
            "rain_time_end" => &["2024-01-02 06:00", "2024-01-05 06:00"],
            "rain_latest_from" => &["latest", "db"],
        )
        .unwrap()
    }

    fn text(df: &DataFrame, col: &str, row: usize) -> Option<String> {
        df.column(col).unwrap().str().unwrap().get(row).map(str::to_string)
    }

    fn num(df: &DataFrame, col: &str, row: usize) -> Option<f64> {
        df.column(col).unwrap().f64().unwrap().get(row)
    }

    #[test]
    fn no_bounds_is_a_no_op() {
        let f = sample();
        assert!(fill_missing_days(&f, &GapFillOptions::default()).unwrap().equals_missing(&f));
    }

    #[test]
    fn fills_interior_days_with_typed_sentinels() {
        let opts = GapFillOptions {
            start_date: Some(date("2024-01-01")),
            ..GapFillOptions::default()
        };
        let out = fill_missing_days(&sample(), &opts).unwrap();
        assert_eq!(out.height(), 4);

        assert_eq!(text(&out, "time", 1).as_deref(), Some("2024-01-02"));
        assert_eq!(num(&out, "rain_value", 1), Some(-9999.0));
        assert_eq!(text(&out, "rain_time_run", 1).as_deref(), Some("2024-01-02"));
        assert_eq!(text(&out, "rain_time_start", 1).as_deref(), Some("2024-01-02 01:00"));
        // end time inferred from the column's existing values
        assert_eq!(text(&out, "rain_time_end", 1).as_deref(), Some("2024-01-03 06:00"));
        assert_eq!(text(&out, "rain_latest_from", 2).as_deref(), Some("NA"));
        assert_eq!(num(&out, "rain_value", 3), Some(4.0));
    }

    #[test]
    fn datetime_columns_get_datetime_sentinels() {
        let mut frame = df!(
            "time" => &["2024-01-01"],
            "sm_time_start" => &["2024-01-01 01:00"],
        )
        .unwrap();
        coerce_time(&mut frame, "sm_time_start").unwrap();
        let opts = GapFillOptions {
            end_date: Some(date("2024-01-02")),
            start_time: NaiveTime::from_hms_opt(3, 0, 0).unwrap(),
            ..GapFillOptions::default()
        };
        let out = fill_missing_days(&frame, &opts).unwrap();
        let starts = time_values(&out, "sm_time_start").unwrap();
        assert_eq!(
            starts[1],
            Some(date("2024-01-02").and_hms_opt(3, 0, 0).unwrap())
        );
    }

    #[test]
    fn explicit_end_time_and_bounds() {
        let opts = GapFillOptions {
            start_date: Some(date("2023-12-31")),
            end_date: Some(date("2024-01-05")),
            end_time: Some(NaiveTime::from_hms_opt(0, 0, 0).unwrap()),
            ..GapFillOptions::default()
        };
        let out = fill_missing_days(&sample(), &opts).unwrap();
        assert_eq!(out.height(), 6);
        assert_eq!(text(&out, "time", 0).as_deref(), Some("2023-12-31"));
        assert_eq!(text(&out, "rain_time_end", 0).as_deref(), Some("2024-01-01 00:00"));
    }

    #[test]
    fn single_bound_on_empty_frame() {
        let f = DataFrame::new(vec![
            time_column("time", &[]).unwrap(),
            Column::new("v".into(), Vec::<f64>::new()),
        ])
        .unwrap();
        let opts = GapFillOptions {
            end_date: Some(date("2024-01-02")),
            ..GapFillOptions::default()
        };
        let out = fill_missing_days(&f, &opts).unwrap();
        assert_eq!(out.height(), 1);
        assert_eq!(num(&out, "v", 0), Some(-9999.0));
    }
}
