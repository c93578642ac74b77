//! File-level time discovery inside a resolved source folder.

use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Default position of the timestamp in an `_`-separated file stem.
pub const DEFAULT_TIME_TOKEN_INDEX: usize = 2;

/// Default layout of the timestamp in a file stem.
pub const DEFAULT_FILE_TIME_FORMAT: &str = "%Y%m%d%H%M";

#[derive(Debug, Error)]
pub enum FilesError {
    #[error("folder '{0}' does not exist")]
    MissingFolder(PathBuf),

    #[error("failed to walk '{path}': {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Files under `folder` (recursively) whose name contains every tag, ignoring case.
pub fn files_with_tags(folder: &Path, tags: &[&str]) -> Result<Vec<PathBuf>, FilesError> {
    if !folder.is_dir() {
        return Err(FilesError::MissingFolder(folder.to_path_buf()));
    }
    let tags: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
    let mut out = Vec::new();
    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = entry.map_err(|source| FilesError::Walk {
            path: folder.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if tags.iter().all(|t| name.contains(t.as_str())) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

/// Timestamps encoded in file stems at `token_index`, keeping those at or
/// before `date_ref`. Sorted ascending; `None` when nothing qualifies.
pub fn filename_timestamps(
    files: &[PathBuf],
    date_ref: NaiveDateTime,
    token_index: usize,
    format: &str,
) -> Option<Vec<(NaiveDateTime, PathBuf)>> {
    let mut out: Vec<(NaiveDateTime, PathBuf)> = files
        .iter()
        .filter_map(|path| {
            let stem = path.file_stem()?.to_string_lossy().into_owned();
            let token = stem.split('_').nth(token_index)?;
            match NaiveDateTime::parse_from_str(token, format) {
                Ok(t) => Some((t, path.clone())),
                Err(_) => {
                    debug!(path = %path.display(), token, "file name token is not a timestamp");
                    None
                }
            }
        })
        .filter(|(t, _)| *t <= date_ref)
        .collect();
    out.sort_by_key(|(t, _)| *t);
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Timestamps present in both indices, newest first.
pub fn common_time_index(a: &[NaiveDateTime], b: &[NaiveDateTime]) -> Vec<NaiveDateTime> {
    let a: BTreeSet<_> = a.iter().copied().collect();
    let b: BTreeSet<_> = b.iter().copied().collect();
    let mut common: Vec<NaiveDateTime> = a.intersection(&b).copied().collect();
    common.reverse();
    common
}

/// A step is usable only when both its folder and file indices are non-empty.
pub fn validate_time_index(
    folder_index: Option<&[NaiveDateTime]>,
    file_index: Option<&[NaiveDateTime]>,
) -> bool {
    matches!((folder_index, file_index), (Some(f), Some(g)) if !f.is_empty() && !g.is_empty())
}
