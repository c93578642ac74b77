//! Incremental per-area accumulation of time-step frames.
//!
//! The time range is walked newest first, so the accumulator always holds
//! the freshest rows seen so far. A step only contributes rows whose time is
//! not already present: on collision the accumulator row wins.

use polars::prelude::*;
use thiserror::Error;
use tracing::warn;

use crate::data::reader::PREFIX_PLACEHOLDER;
use crate::table::{
    canonicalize, coerce_time, column_names, has_column, rename_column, stack, text_column,
    TableError,
};

/// Provenance tag for rows of the first merge (the newest read).
pub const TAG_LATEST: &str = "latest";
/// Provenance tag for rows filled in from later (older) steps.
pub const TAG_DB: &str = "db";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("key column '{0}' uses a prefix placeholder but no prefix is set")]
    PlaceholderWithoutPrefix(String),

    #[error("step frame is missing key columns {0:?}")]
    MissingKeyColumns(Vec<String>),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    /// Extra key columns; `{:}` is replaced by the prefix. The time column is always a key.
    pub key_cols: Vec<String>,
    pub prefix: Option<String>,
    pub delimiter: String,
    pub time_col: String,
    pub tag_latest: String,
    pub tag_db: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            key_cols: Vec::new(),
            prefix: None,
            delimiter: "_".into(),
            time_col: "time".into(),
            tag_latest: TAG_LATEST.into(),
            tag_db: TAG_DB.into(),
        }
    }
}

impl MergeOptions {
    /// Name of the provenance column.
    pub fn provenance_column(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}_latest_from"),
            None => "latest_from".into(),
        }
    }

    /// Key columns with placeholders substituted, time column last.
    pub fn resolved_keys(&self) -> Result<Vec<String>, MergeError> {
        let mut keys = Vec::with_capacity(self.key_cols.len() + 1);
        for key in &self.key_cols {
            if key.contains(PREFIX_PLACEHOLDER) {
                let Some(p) = &self.prefix else {
                    return Err(MergeError::PlaceholderWithoutPrefix(key.clone()));
                };
                keys.push(key.replace(PREFIX_PLACEHOLDER, p));
            } else {
                keys.push(key.clone());
            }
        }
        if !keys.contains(&self.time_col) {
            keys.push(self.time_col.clone());
        }
        Ok(keys)
    }
}

/// Merge one step into the accumulator.
///
/// `None` or empty steps leave the accumulator untouched. An absent, empty or
/// key-less accumulator is replaced by the step with every row tagged latest.
pub fn merge_by_time(
    acc: Option<DataFrame>,
    step: Option<&DataFrame>,
    opts: &MergeOptions,
) -> Result<DataFrame, MergeError> {
    let acc = acc.unwrap_or_else(DataFrame::empty);
    let Some(step) = step.filter(|s| s.height() > 0) else {
        return Ok(acc);
    };

    let keys = opts.resolved_keys()?;
    let missing: Vec<String> = keys
        .iter()
        .filter(|k| !has_column(step, k))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(MergeError::MissingKeyColumns(missing));
    }

    let provenance = opts.provenance_column();
    let mut step = dedup_step(step.clone(), &opts.time_col)?;
    apply_prefix(&mut step, opts, &keys, &provenance)?;

    let first_merge = acc.height() == 0 || keys.iter().any(|k| !has_column(&acc, k));

    let stacked = if first_merge {
        tag(&mut step, &provenance, &opts.tag_latest)?;
        step
    } else {
        let mut acc = acc;
        if has_column(&acc, &provenance) {
            acc = acc
                .lazy()
                .with_column(col(provenance.as_str()).fill_null(lit(opts.tag_latest.as_str())))
                .collect()?;
        } else {
            tag(&mut acc, &provenance, &opts.tag_latest)?;
        }
        tag(&mut step, &provenance, &opts.tag_db)?;
        stack(acc, step)?
    };

    // accumulator rows come first, so the first row per timestamp is the old one
    let mut merged = canonicalize(stacked.lazy(), &opts.time_col).collect()?;
    apply_prefix(&mut merged, opts, &keys, &provenance)?;
    Ok(merged)
}

fn tag(frame: &mut DataFrame, column: &str, value: &str) -> PolarsResult<()> {
    let height = frame.height();
    frame.with_column(text_column(column, value, height))?;
    Ok(())
}

/// Coerce the step's time column and keep the first row per timestamp.
fn dedup_step(mut step: DataFrame, time_col: &str) -> Result<DataFrame, MergeError> {
    coerce_time(&mut step, time_col)?;
    let before = step.height();
    let step = step
        .lazy()
        .unique_stable(Some(vec![time_col.into()]), UniqueKeepStrategy::First)
        .collect()?;
    if step.height() != before {
        warn!(
            dropped = before - step.height(),
            "duplicate timestamps in step frame, keeping the first occurrence"
        );
    }
    Ok(step)
}

/// Prefix data columns that do not already carry `{prefix}{delimiter}`.
fn apply_prefix(
    frame: &mut DataFrame,
    opts: &MergeOptions,
    keys: &[String],
    provenance: &str,
) -> Result<(), TableError> {
    let Some(prefix) = &opts.prefix else {
        return Ok(());
    };
    let head = format!("{prefix}{}", opts.delimiter);
    let targets: Vec<String> = column_names(frame)
        .into_iter()
        .filter(|c| !keys.contains(c) && c.as_str() != provenance && !c.starts_with(&head))
        .collect();
    for column in targets {
        rename_column(frame, &column, &format!("{head}{column}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{parse_time, times};

    fn frame(rows: &[(&str, f64)]) -> DataFrame {
        let times: Vec<&str> = rows.iter().map(|(t, _)| *t).collect();
        let values: Vec<f64> = rows.iter().map(|(_, v)| *v).collect();
        df!("time" => times, "value" => values).unwrap()
    }

    fn values(f: &DataFrame) -> Vec<Option<f64>> {
        f.column("value").unwrap().f64().unwrap().iter().collect()
    }

    fn tags(f: &DataFrame, col: &str) -> Vec<Option<String>> {
        f.column(col)
            .unwrap()
            .str()
            .unwrap()
            .iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }

    #[test]
    fn none_step_returns_accumulator() {
        let acc = frame(&[("2024-01-01", 1.0)]);
        let out = merge_by_time(Some(acc.clone()), None, &MergeOptions::default()).unwrap();
        assert!(out.equals_missing(&acc));
        let out = merge_by_time(None, None, &MergeOptions::default()).unwrap();
        assert_eq!(out.height(), 0);
    }

    #[test]
    fn first_merge_tags_latest() {
        let step = frame(&[("2024-01-02", 2.0), ("2024-01-01", 1.0)]);
        let out = merge_by_time(None, Some(&step), &MergeOptions::default()).unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(
            tags(&out, "latest_from"),
            vec![Some("latest".to_string()), Some("latest".to_string())]
        );
        assert_eq!(values(&out), vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn accumulator_wins_on_collision() {
        let opts = MergeOptions::default();
        let acc = merge_by_time(None, Some(&frame(&[("2024-01-02", 20.0)])), &opts).unwrap();
        let step = frame(&[("2024-01-01", 1.0), ("2024-01-02", 2.0)]);
        let out = merge_by_time(Some(acc), Some(&step), &opts).unwrap();

        assert_eq!(out.height(), 2);
        assert_eq!(values(&out), vec![Some(1.0), Some(20.0)]);
        assert_eq!(
            tags(&out, "latest_from"),
            vec![Some("db".to_string()), Some("latest".to_string())]
        );
        assert_eq!(
            times(&out, "time").unwrap(),
            vec![parse_time("2024-01-01").unwrap(), parse_time("2024-01-02").unwrap()]
        );
    }

    #[test]
    fn step_columns_missing_from_accumulator_are_unioned() {
        let opts = MergeOptions::default();
        let acc = merge_by_time(None, Some(&frame(&[("2024-01-02", 2.0)])), &opts).unwrap();
        let step = df!(
            "time" => &["2024-01-01"],
            "value" => &[1.0],
            "quality" => &["good"],
        )
        .unwrap();
        let out = merge_by_time(Some(acc), Some(&step), &opts).unwrap();
        let quality = out.column("quality").unwrap().str().unwrap();
        assert_eq!(quality.get(0), Some("good"));
        assert_eq!(quality.get(1), None);
    }

    #[test]
    fn prefix_renames_data_columns_only() {
        let opts = MergeOptions {
            key_cols: vec!["{:}_time_start".into()],
            prefix: Some("rain".into()),
            ..MergeOptions::default()
        };
        let step = df!(
            "time" => &["2024-01-01"],
            "rain_time_start" => &["2024-01-01 01:00"],
            "value" => &[1.0],
            "rain_max" => &[3.0],
        )
        .unwrap();
        let out = merge_by_time(None, Some(&step), &opts).unwrap();
        assert_eq!(
            column_names(&out),
            vec!["time", "rain_time_start", "rain_value", "rain_max", "rain_latest_from"]
        );
    }

    #[test]
    fn placeholder_without_prefix_fails() {
        let opts = MergeOptions {
            key_cols: vec!["{:}_time_start".into()],
            ..MergeOptions::default()
        };
        let step = frame(&[("2024-01-01", 1.0)]);
        match merge_by_time(None, Some(&step), &opts) {
            Err(MergeError::PlaceholderWithoutPrefix(key)) => assert_eq!(key, "{:}_time_start"),
            other => panic!("expected PlaceholderWithoutPrefix, got {other:?}"),
        }
    }

    #[test]
    fn missing_key_column_fails_loudly() {
        let opts = MergeOptions {
            key_cols: vec!["time_end".into()],
            ..MergeOptions::default()
        };
        let step = frame(&[("2024-01-01", 1.0)]);
        match merge_by_time(None, Some(&step), &opts) {
            Err(MergeError::MissingKeyColumns(cols)) => assert_eq!(cols, vec!["time_end"]),
            other => panic!("expected MissingKeyColumns, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_step_times_keep_first() {
        let step = frame(&[("2024-01-01", 1.0), ("2024-01-01", 9.0)]);
        let out = merge_by_time(None, Some(&step), &MergeOptions::default()).unwrap();
        assert_eq!(values(&out), vec![Some(1.0)]);
    }
}
