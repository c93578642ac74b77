//! Builds the per-area analysis table: rain, soil moisture and soil slips
//! left-joined, in that order, onto an expected time index.

use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

use crate::table::{
    coerce_time, column_names, has_column, null_column, rename_column, sort_by_time, time_column,
    time_grid, TableError,
};
use crate::time::TimeError;

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("mandatory source '{0}' is missing or empty")]
    MissingMandatory(String),

    #[error("source '{variable}' has no time column '{time_label}'")]
    MissingTime { variable: String, time_label: String },

    #[error("source '{variable}': column '{column}' collides even after prefixing")]
    ColumnCollision { variable: String, column: String },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Time(#[from] TimeError),
}

/// One source offered to the joiner.
#[derive(Debug, Clone, Copy)]
pub struct JoinInput<'a> {
    pub variable: &'a str,
    pub frame: Option<&'a DataFrame>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinOptions {
    pub time_label: String,
    pub domain_label: String,
    pub domain_value: String,
    pub frequency: Duration,
    /// Columns of the all-null block used when soil slips are absent.
    pub slips_placeholder_columns: Vec<String>,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            time_label: "time".into(),
            domain_label: "domain".into(),
            domain_value: String::new(),
            frequency: Duration::days(1),
            slips_placeholder_columns: Vec::new(),
        }
    }
}

/// Join the three sources onto `time_start..=time_end` at `opts.frequency`.
///
/// Rain and soil moisture are mandatory. Missing or empty soil slips are
/// replaced by an all-null block. Data columns already claimed by an earlier
/// source are renamed `{variable}_{column}`.
pub fn join_sources(
    time_start: NaiveDateTime,
    time_end: NaiveDateTime,
    rain: JoinInput<'_>,
    soil_moisture: JoinInput<'_>,
    soil_slips: JoinInput<'_>,
    opts: &JoinOptions,
) -> Result<DataFrame, JoinError> {
    let mut mandatory = Vec::with_capacity(2);
    for input in [&rain, &soil_moisture] {
        match input.frame {
            Some(f) if f.height() > 0 => mandatory.push((input.variable, f.clone())),
            _ => return Err(JoinError::MissingMandatory(input.variable.to_string())),
        }
    }

    let slips_frame = match soil_slips.frame {
        Some(f) if f.height() > 0 => f.clone(),
        _ => {
            warn!(
                variable = soil_slips.variable,
                "soil slips data not available, joining an empty block"
            );
            placeholder(opts)?
        }
    };

    if opts.frequency <= Duration::zero() {
        return Err(TimeError::NonPositiveStep(opts.frequency.num_seconds()).into());
    }
    let index = time_grid(&opts.time_label, time_start, time_end, opts.frequency)?;

    let mut claimed: HashSet<String> = [opts.time_label.clone(), opts.domain_label.clone()]
        .into_iter()
        .collect();
    let mut joined = DataFrame::new(vec![index])?.lazy();
    mandatory.push((soil_slips.variable, slips_frame));
    for (variable, frame) in mandatory {
        let prepared = prepare(variable, frame, &mut claimed, opts)?;
        joined = joined.join(
            prepared.lazy(),
            [col(opts.time_label.as_str())],
            [col(opts.time_label.as_str())],
            JoinArgs::new(JoinType::Left),
        );
    }

    let out = sort_by_time(joined, &opts.time_label)
        .with_column(lit(opts.domain_value.clone()).alias(opts.domain_label.as_str()))
        .collect()?;
    Ok(out)
}

/// Empty slips block: the time column plus all-null value columns.
fn placeholder(opts: &JoinOptions) -> PolarsResult<DataFrame> {
    let mut columns = vec![time_column(&opts.time_label, &[])?];
    columns.extend(
        opts.slips_placeholder_columns
            .iter()
            .map(|c| null_column(c, 0, &DataType::Float64)),
    );
    DataFrame::new(columns)
}

/// Normalize one source: canonical time column, collision-safe names, and
/// one row per timestamp.
fn prepare(
    variable: &str,
    mut frame: DataFrame,
    claimed: &mut HashSet<String>,
    opts: &JoinOptions,
) -> Result<DataFrame, JoinError> {
    let own_time = format!("{variable}_{}", opts.time_label);
    if !has_column(&frame, &opts.time_label) && has_column(&frame, &own_time) {
        rename_column(&mut frame, &own_time, &opts.time_label)?;
    }
    if !has_column(&frame, &opts.time_label) {
        return Err(JoinError::MissingTime {
            variable: variable.to_string(),
            time_label: opts.time_label.clone(),
        });
    }
    coerce_time(&mut frame, &opts.time_label)?;

    for name in column_names(&frame) {
        if name == opts.time_label {
            continue;
        }
        if claimed.contains(&name) {
            let renamed = format!("{variable}_{name}");
            if claimed.contains(&renamed) || has_column(&frame, &renamed) {
                return Err(JoinError::ColumnCollision {
                    variable: variable.to_string(),
                    column: name,
                });
            }
            rename_column(&mut frame, &name, &renamed)?;
            claimed.insert(renamed);
        } else {
            claimed.insert(name);
        }
    }

    let before = frame.height();
    let frame = frame
        .lazy()
        .filter(col(opts.time_label.as_str()).is_not_null())
        .unique_stable(Some(vec![opts.time_label.as_str().into()]), UniqueKeepStrategy::First)
        .collect()?;
    let duplicates = before - frame.height();
    if duplicates > 0 {
        warn!(variable, duplicates, "duplicate timestamps, joining the first occurrence");
    }
    Ok(frame)
}
