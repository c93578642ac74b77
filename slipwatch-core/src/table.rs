//! Polars helpers shared by the readers, merger, aligner and joiner.
//!
//! Every table is a `DataFrame`. Canonical time columns are
//! `Datetime(Milliseconds)`, value columns `Float64`, everything else `String`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use polars::prelude::*;
use thiserror::Error;

/// Timestamp layouts accepted when coercing text to datetimes.
pub const TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y%m%d%H%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

#[derive(Debug, Error)]
pub enum TableError {
    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("column '{0}' already exists")]
    DuplicateColumn(String),

    #[error("column '{column}' row {row}: cannot parse '{value}' as a timestamp")]
    BadTime {
        column: String,
        row: usize,
        value: String,
    },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Parse a timestamp from any of the accepted layouts. Bare dates map to midnight.
pub fn parse_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in TIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(t);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    None
}

/// Single-byte field separator, or `None` for non-ASCII characters.
pub fn ascii_delimiter(c: char) -> Option<u8> {
    u8::try_from(c).ok().filter(u8::is_ascii)
}

/// Dtype of canonical time columns.
pub fn time_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, None)
}

fn to_millis(t: NaiveDateTime) -> i64 {
    t.and_utc().timestamp_millis()
}

fn from_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|d| d.naive_utc())
}

/// Build a canonical time column.
pub fn time_column(name: &str, times: &[Option<NaiveDateTime>]) -> PolarsResult<Column> {
    let millis: Vec<Option<i64>> = times.iter().map(|t| t.map(to_millis)).collect();
    Column::new(name.into(), millis).cast(&time_dtype())
}

/// Regular time column from `start` to `end` inclusive, one row per `step`.
/// Empty when `start` is after `end`. `step` must be positive.
pub fn time_grid(
    name: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    step: chrono::Duration,
) -> PolarsResult<Column> {
    if start > end {
        return time_column(name, &[]);
    }
    let interval = Duration::parse(&format!("{}ms", step.num_milliseconds()));
    let grid = date_range(
        name.into(),
        start,
        end,
        interval,
        ClosedWindow::Both,
        TimeUnit::Milliseconds,
        None,
    )?;
    Ok(grid.into_series().into())
}

/// Column holding `value` on every row.
pub fn text_column(name: &str, value: &str, len: usize) -> Column {
    Column::new(name.into(), vec![value; len])
}

/// All-null column of the given dtype.
pub fn null_column(name: &str, len: usize, dtype: &DataType) -> Column {
    Series::full_null(name.into(), len, dtype).into()
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_columns().iter().map(|c| c.name().to_string()).collect()
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

pub fn require_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, TableError> {
    df.column(name)
        .map_err(|_| TableError::MissingColumn(name.to_string()))
}

/// Rename a column, refusing to shadow an existing one.
pub fn rename_column(df: &mut DataFrame, from: &str, to: &str) -> Result<(), TableError> {
    if from == to {
        return Ok(());
    }
    if has_column(df, to) {
        return Err(TableError::DuplicateColumn(to.to_string()));
    }
    require_column(df, from)?;
    df.rename(from, to.into())?;
    Ok(())
}

/// True for float/integer columns, and for columns holding nothing but nulls.
pub fn is_numeric(column: &Column) -> bool {
    match column.dtype() {
        DataType::Float64
        | DataType::Float32
        | DataType::Int64
        | DataType::Int32
        | DataType::UInt64
        | DataType::UInt32
        | DataType::Null => true,
        DataType::String => column.null_count() == column.len(),
        _ => false,
    }
}

/// Datetime view of a column, row by row. Text is parsed; other dtypes are null.
pub fn column_times(column: &Column) -> Result<Vec<Option<NaiveDateTime>>, TableError> {
    Ok(match column.dtype() {
        DataType::Datetime(_, _) | DataType::Date => {
            let millis = column.cast(&time_dtype())?.cast(&DataType::Int64)?;
            millis.i64()?.iter().map(|v| v.and_then(from_millis)).collect()
        }
        DataType::String => column.str()?.iter().map(|v| v.and_then(parse_time)).collect(),
        _ => vec![None; column.len()],
    })
}

pub fn time_values(df: &DataFrame, name: &str) -> Result<Vec<Option<NaiveDateTime>>, TableError> {
    column_times(require_column(df, name)?)
}

/// Non-null times of a column, in row order.
pub fn times(df: &DataFrame, name: &str) -> Result<Vec<NaiveDateTime>, TableError> {
    Ok(time_values(df, name)?.into_iter().flatten().collect())
}

/// `(min, max)` of a time column, or `None` when it holds no times.
pub fn time_bounds(
    df: &DataFrame,
    name: &str,
) -> Result<Option<(NaiveDateTime, NaiveDateTime)>, TableError> {
    let times = times(df, name)?;
    let min = times.iter().min().copied();
    let max = times.iter().max().copied();
    Ok(min.zip(max))
}

/// Convert a column to the canonical time dtype in place. Nulls stay null;
/// any other value that does not parse is an error and leaves `df` untouched.
pub fn coerce_time(df: &mut DataFrame, name: &str) -> Result<(), TableError> {
    let column = require_column(df, name)?;
    let bad = |row: usize, value: String| TableError::BadTime {
        column: name.to_string(),
        row,
        value,
    };
    let parsed: Vec<Option<NaiveDateTime>> = match column.dtype() {
        DataType::Datetime(TimeUnit::Milliseconds, None) => return Ok(()),
        DataType::Datetime(_, _) | DataType::Date => column_times(column)?,
        DataType::String => {
            let mut out = Vec::with_capacity(column.len());
            for (row, raw) in column.str()?.iter().enumerate() {
                match raw {
                    None => out.push(None),
                    Some(raw) => out.push(Some(parse_time(raw).ok_or_else(|| bad(row, raw.to_string()))?)),
                }
            }
            out
        }
        // compact numeric stamps such as 202401011200
        DataType::Float64 | DataType::Float32 | DataType::Int64 | DataType::Int32 | DataType::UInt64 => {
            let values = column.cast(&DataType::Float64)?;
            let mut out = Vec::with_capacity(column.len());
            for (row, v) in values.f64()?.iter().enumerate() {
                match v {
                    None => out.push(None),
                    Some(v) => {
                        let raw = format!("{v:.0}");
                        out.push(Some(parse_time(&raw).ok_or_else(|| bad(row, raw))?));
                    }
                }
            }
            out
        }
        other => return Err(bad(0, other.to_string())),
    };
    df.with_column(time_column(name, &parsed)?)?;
    Ok(())
}

/// Stable ascending sort on the time column, nulls last.
pub fn sort_by_time(df: LazyFrame, time_col: &str) -> LazyFrame {
    df.sort(
        [time_col],
        SortMultipleOptions::default()
            .with_maintain_order(true)
            .with_nulls_last(true),
    )
}

/// Sort by time and keep the first row per timestamp.
pub fn canonicalize(df: LazyFrame, time_col: &str) -> LazyFrame {
    sort_by_time(df, time_col).unique_stable(Some(vec![time_col.into()]), UniqueKeepStrategy::First)
}

/// Keep the rows whose flag is set.
pub fn filter_rows(df: &DataFrame, keep: &[bool]) -> PolarsResult<DataFrame> {
    df.filter(&BooleanChunked::from_slice("keep".into(), keep))
}

/// Stack `lower` under `upper`. The result carries the union of both column
/// sets in first-seen order; cells absent from a side are null.
pub fn stack(mut upper: DataFrame, mut lower: DataFrame) -> Result<DataFrame, TableError> {
    let only_lower: Vec<(String, DataType)> = lower
        .get_columns()
        .iter()
        .filter(|c| !has_column(&upper, c.name()))
        .map(|c| (c.name().to_string(), c.dtype().clone()))
        .collect();
    for (name, dtype) in only_lower {
        let height = upper.height();
        upper.with_column(null_column(&name, height, &dtype))?;
    }
    for c in upper.get_columns() {
        let name = c.name().as_str();
        let height = lower.height();
        match lower.column(name) {
            Err(_) => {
                lower.with_column(null_column(name, height, c.dtype()))?;
            }
            Ok(own) if own.dtype() != c.dtype() => {
                let cast = own.cast(c.dtype())?;
                lower.with_column(cast)?;
            }
            Ok(_) => {}
        }
    }
    let lower = lower.select(column_names(&upper))?;
    Ok(upper.vstack(&lower)?)
}

/// `(time, value)` pairs for one value column. Nulls and `nodata` map to `None`;
/// rows without a time are skipped.
pub fn numeric_series(
    df: &DataFrame,
    time_col: &str,
    value_col: &str,
    nodata: Option<f64>,
) -> Result<Vec<(NaiveDateTime, Option<f64>)>, TableError> {
    let times = time_values(df, time_col)?;
    let values = require_column(df, value_col)?.cast(&DataType::Float64)?;
    Ok(times
        .into_iter()
        .zip(values.f64()?.iter())
        .filter_map(|(t, v)| {
            let v = v.filter(|v| nodata.map_or(true, |nd| (v - nd).abs() > f64::EPSILON));
            Some((t?, v))
        })
        .collect())
}
