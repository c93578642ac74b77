//! CSV export of per-area analysis tables.

use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use slipwatch_core::table::ascii_delimiter;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export I/O on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("delimiter {0:?} is not a single-byte character")]
    Delimiter(char),

    #[error("csv write failed: {0}")]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub delimiter: char,
    /// Decimal places for numeric cells.
    pub precision: usize,
    pub time_format: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            precision: 3,
            time_format: "%Y-%m-%d %H:%M".into(),
        }
    }
}

/// Render a frame as CSV text: header row, then one line per row in column order.
/// Nulls are empty fields.
pub fn frame_to_csv(frame: &DataFrame, opts: &ExportOptions) -> Result<String, ExportError> {
    let separator = ascii_delimiter(opts.delimiter).ok_or(ExportError::Delimiter(opts.delimiter))?;
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf)
        .include_header(true)
        .with_separator(separator)
        .with_float_precision(Some(opts.precision))
        .with_datetime_format(Some(opts.time_format.clone()))
        .finish(&mut frame.clone())?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Write a frame to `path` atomically, creating parent folders.
pub fn write_frame_csv(frame: &DataFrame, path: &Path, opts: &ExportOptions) -> Result<(), ExportError> {
    let io = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let text = frame_to_csv(frame, opts)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, text).map_err(io)?;
    if let Err(source) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(io(source));
    }
    Ok(())
}
