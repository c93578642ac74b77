//! Normalizes one tabular source file into a `DataFrame` with a canonical time column.
//!
//! Absence is ordinary: a missing, empty or unparsable file yields `Ok(None)`
//! and a warning. Only configuration mistakes are errors.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::table::{ascii_delimiter, coerce_time, has_column, is_numeric, TableError};

/// Placeholder standing for the source prefix in field keys.
pub const PREFIX_PLACEHOLDER: &str = "{:}";

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("source '{variable}' has no field mapped to the time column '{time_col}'")]
    MissingTimeField { variable: String, time_col: String },

    #[error("source '{variable}': field key '{key}' must start with prefix '{prefix}'")]
    BadPrefix {
        variable: String,
        key: String,
        prefix: String,
    },

    #[error("source '{variable}': field key '{key}' uses a prefix placeholder but no prefix is set")]
    PlaceholderWithoutPrefix { variable: String, key: String },

    #[error("source '{variable}': none of the configured columns {columns:?} found in '{path}'")]
    NoColumns {
        variable: String,
        columns: Vec<String>,
        path: String,
    },

    #[error("source '{variable}': output column '{column}' is produced twice")]
    DuplicateColumn { variable: String, column: String },

    #[error("source '{variable}': delimiter '{delimiter}' is not a single ASCII character")]
    BadDelimiter { variable: String, delimiter: char },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Vector,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
}

/// Output column name and the input column it is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    /// `":"` means `<prefix><delim><column>`; `"{:}..."` substitutes the prefix.
    pub key: String,
    pub column: String,
}

/// How to read one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub variable: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: SourceKind,
    #[serde(default = "default_format")]
    pub format: SourceFormat,
    pub fields: Vec<FieldMap>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_prefix_delimiter")]
    pub prefix_delimiter: String,
}

fn default_kind() -> SourceKind {
    SourceKind::Vector
}

fn default_format() -> SourceFormat {
    SourceFormat::Csv
}

fn default_delimiter() -> char {
    ','
}

fn default_prefix_delimiter() -> String {
    "_".into()
}

impl SourceSpec {
    /// Resolve field keys into `(output, input)` pairs, validating them.
    pub fn resolved_fields(&self, time_col: &str) -> Result<Vec<(String, String)>, ReadError> {
        let mut out = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let output = if field.key == time_col {
                field.key.clone()
            } else if field.key == ":" {
                match &self.prefix {
                    Some(p) => format!("{p}{}{}", self.prefix_delimiter, field.column),
                    None => field.column.clone(),
                }
            } else if field.key.contains(PREFIX_PLACEHOLDER) {
                let Some(p) = &self.prefix else {
                    return Err(ReadError::PlaceholderWithoutPrefix {
                        variable: self.variable.clone(),
                        key: field.key.clone(),
                    });
                };
                field.key.replace(PREFIX_PLACEHOLDER, p)
            } else {
                if let Some(p) = &self.prefix {
                    if !field.key.starts_with(p.as_str()) {
                        return Err(ReadError::BadPrefix {
                            variable: self.variable.clone(),
                            key: field.key.clone(),
                            prefix: p.clone(),
                        });
                    }
                }
                field.key.clone()
            };
            out.push((output, field.column.clone()));
        }
        if !out.iter().any(|(o, _)| o == time_col) {
            return Err(ReadError::MissingTimeField {
                variable: self.variable.clone(),
                time_col: time_col.to_string(),
            });
        }
        Ok(out)
    }

    /// Output column names, excluding the time column.
    pub fn data_columns(&self, time_col: &str) -> Result<Vec<String>, ReadError> {
        Ok(self
            .resolved_fields(time_col)?
            .into_iter()
            .map(|(o, _)| o)
            .filter(|o| o != time_col)
            .collect())
    }
}

/// Read one source file. Constant `extra_fields` are appended as text columns.
pub fn read_source(
    path: &Path,
    spec: &SourceSpec,
    extra_fields: &BTreeMap<String, String>,
    time_col: &str,
) -> Result<Option<DataFrame>, ReadError> {
    let fields = spec.resolved_fields(time_col)?;
    let Some(separator) = ascii_delimiter(spec.delimiter) else {
        return Err(ReadError::BadDelimiter {
            variable: spec.variable.clone(),
            delimiter: spec.delimiter,
        });
    };

    if !path.exists() {
        warn!(variable = %spec.variable, path = %path.display(), "source file not found");
        return Ok(None);
    }

    let raw = match spec.format {
        SourceFormat::Csv => match ingest_csv(path, separator) {
            Ok(df) => df,
            Err(e) => {
                warn!(variable = %spec.variable, path = %path.display(), error = %e, "source file is malformed");
                return Ok(None);
            }
        },
    };
    if raw.height() == 0 {
        warn!(variable = %spec.variable, path = %path.display(), "source file is empty");
        return Ok(None);
    }

    let mut selected: Vec<(String, String)> = Vec::new();
    for (output, input) in &fields {
        if has_column(&raw, input) {
            selected.push((output.clone(), input.clone()));
        } else {
            debug!(variable = %spec.variable, column = %input, "configured column not in file");
        }
    }
    if selected.is_empty() {
        return Err(ReadError::NoColumns {
            variable: spec.variable.clone(),
            columns: fields.into_iter().map(|(_, i)| i).collect(),
            path: path.display().to_string(),
        });
    }
    if !selected.iter().any(|(o, _)| o == time_col) {
        warn!(variable = %spec.variable, path = %path.display(), "time column missing from file");
        return Ok(None);
    }

    let outputs: Vec<&String> = selected.iter().map(|(o, _)| o).chain(extra_fields.keys()).collect();
    for (i, c) in outputs.iter().enumerate() {
        if outputs[..i].contains(c) {
            return Err(ReadError::DuplicateColumn {
                variable: spec.variable.clone(),
                column: c.to_string(),
            });
        }
    }

    let mut exprs: Vec<Expr> = selected
        .iter()
        .map(|(output, input)| col(input.as_str()).alias(output.as_str()))
        .collect();
    exprs.extend(
        extra_fields
            .iter()
            .map(|(name, value)| lit(value.as_str()).alias(name.as_str())),
    );
    let mut frame = raw.lazy().select(exprs).collect()?;
    normalize_values(&mut frame, time_col)?;

    if let Err(e) = coerce_time(&mut frame, time_col) {
        warn!(variable = %spec.variable, path = %path.display(), error = %e, "time column is malformed");
        return Ok(None);
    }
    Ok(Some(frame))
}

fn ingest_csv(path: &Path, separator: u8) -> PolarsResult<DataFrame> {
    LazyCsvReader::new(path)
        .with_has_header(true)
        .with_separator(separator)
        .finish()?
        .collect()
}

/// Integer and all-null value columns become `Float64` so that every read of
/// a source stacks onto the same schema.
fn normalize_values(frame: &mut DataFrame, time_col: &str) -> PolarsResult<()> {
    let casts: Vec<Column> = frame
        .get_columns()
        .iter()
        .filter(|c| c.name().as_str() != time_col)
        .filter(|c| is_numeric(c) && c.dtype() != &DataType::Float64)
        .map(|c| c.cast(&DataType::Float64))
        .collect::<PolarsResult<_>>()?;
    for c in casts {
        frame.with_column(c)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(prefix: Option<&str>, fields: &[(&str, &str)]) -> SourceSpec {
        SourceSpec {
            variable: "rain".into(),
            kind: SourceKind::Vector,
            format: SourceFormat::Csv,
            fields: fields
                .iter()
                .map(|(k, c)| FieldMap {
                    key: k.to_string(),
                    column: c.to_string(),
                })
                .collect(),
            delimiter: ',',
            prefix: prefix.map(str::to_string),
            prefix_delimiter: "_".into(),
        }
    }

    #[test]
    fn field_keys_resolve_with_prefix() {
        let s = spec(
            Some("rain"),
            &[("time", "time"), (":", "avg"), ("{:}_time_start", "start"), ("rain_max", "max")],
        );
        let out = s.resolved_fields("time").unwrap();
        let names: Vec<_> = out.iter().map(|(o, _)| o.as_str()).collect();
        assert_eq!(names, vec!["time", "rain_avg", "rain_time_start", "rain_max"]);
    }

    #[test]
    fn field_key_prefix_is_enforced() {
        let s = spec(Some("rain"), &[("time", "time"), ("sm_avg", "avg")]);
        assert!(matches!(s.resolved_fields("time"), Err(ReadError::BadPrefix { .. })));
    }

    #[test]
    fn time_field_is_required() {
        let s = spec(None, &[(":", "avg")]);
        assert!(matches!(
            s.resolved_fields("time"),
            Err(ReadError::MissingTimeField { .. })
        ));
    }

    #[test]
    fn placeholder_needs_prefix() {
        let s = spec(None, &[("time", "time"), ("{:}_x", "x")]);
        assert!(matches!(
            s.resolved_fields("time"),
            Err(ReadError::PlaceholderWithoutPrefix { .. })
        ));
    }

    #[test]
    fn reads_and_prefixes_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rain.csv");
        std::fs::write(&path, "time,avg,unused\n2024-01-01,1.5,x\n2024-01-02,,y\n").unwrap();

        let extra = BTreeMap::from([("rain_area".to_string(), "alpha".to_string())]);
        let s = spec(Some("rain"), &[("time", "time"), (":", "avg")]);
        let frame = read_source(&path, &s, &extra, "time").unwrap().unwrap();

        let names: Vec<String> = frame.get_columns().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["time", "rain_avg", "rain_area"]);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.column("time").unwrap().dtype(), &crate::table::time_dtype());
        let avg = frame.column("rain_avg").unwrap().f64().unwrap();
        assert_eq!(avg.get(0), Some(1.5));
        assert_eq!(avg.get(1), None);
        assert_eq!(frame.column("rain_area").unwrap().str().unwrap().get(1), Some("alpha"));
    }

    #[test]
    fn integer_and_empty_columns_read_as_floats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slips.csv");
        std::fs::write(&path, "time;count;note\n2024-01-01;3;\n2024-01-02;4;\n").unwrap();

        let mut s = spec(None, &[("time", "time"), (":", "count"), (":", "note")]);
        s.delimiter = ';';
        let frame = read_source(&path, &s, &BTreeMap::new(), "time").unwrap().unwrap();
        assert_eq!(frame.column("count").unwrap().dtype(), &DataType::Float64);
        assert_eq!(frame.column("note").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn non_ascii_delimiter_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rain.csv");
        std::fs::write(&path, "time,avg\n2024-01-01,1\n").unwrap();
        let mut s = spec(None, &[("time", "time"), (":", "avg")]);
        s.delimiter = '§';
        assert!(matches!(
            read_source(&path, &s, &BTreeMap::new(), "time"),
            Err(ReadError::BadDelimiter { delimiter: '§', .. })
        ));
    }

    #[test]
    fn absent_and_empty_files_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let s = spec(None, &[("time", "time"), (":", "avg")]);
        let extra = BTreeMap::new();

        assert!(matches!(read_source(&dir.path().join("nope.csv"), &s, &extra, "time"), Ok(None)));

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, "time,avg\n").unwrap();
        assert!(matches!(read_source(&empty, &s, &extra, "time"), Ok(None)));

        let bad_time = dir.path().join("bad.csv");
        std::fs::write(&bad_time, "time,avg\nnot-a-date,1\n").unwrap();
        assert!(matches!(read_source(&bad_time, &s, &extra, "time"), Ok(None)));
    }

    #[test]
    fn no_configured_columns_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        let s = spec(None, &[("time", "time"), (":", "avg")]);
        assert!(matches!(
            read_source(&path, &s, &BTreeMap::new(), "time"),
            Err(ReadError::NoColumns { .. })
        ));
    }
}
