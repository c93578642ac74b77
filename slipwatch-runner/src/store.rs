//! Ancillary object store: JSON documents and parquet tables under a root folder.
//!
//! Layout: `{root}/{relative path}` plus a `{file}.meta.json` sidecar.
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - blake3 hash of the payload in the sidecar
//! - Undecodable payloads are errors, never silently dropped

use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize artifact '{path}': {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt artifact '{path}': {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("parquet table '{path}': {source}")]
    Parquet {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },
}

/// Sidecar written next to every artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub data_hash: String,
    pub bytes: usize,
    pub written_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct AncillaryStore {
    root: PathBuf,
}

impl AncillaryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of an artifact. Absolute inputs are kept as they are.
    pub fn path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    fn meta_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".meta.json");
        path.with_file_name(name)
    }

    pub fn exists(&self, relative: &Path) -> bool {
        self.path(relative).is_file()
    }

    /// Read an artifact, `None` when absent.
    pub fn read<T: DeserializeOwned>(&self, relative: &Path) -> Result<Option<T>, StoreError> {
        let path = self.path(relative);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let value = serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "artifact loaded");
        Ok(Some(value))
    }

    /// Write an artifact atomically, then its sidecar.
    pub fn write<T: Serialize>(&self, relative: &Path, value: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
            path: self.path(relative),
            source,
        })?;
        self.write_bytes(relative, &payload)
    }

    /// Read a parquet table, `None` when absent.
    pub fn read_frame(&self, relative: &Path) -> Result<Option<DataFrame>, StoreError> {
        let path = self.path(relative);
        if !path.is_file() {
            return Ok(None);
        }
        let file = fs::File::open(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|source| StoreError::Parquet {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), rows = df.height(), "table loaded");
        Ok(Some(df))
    }

    /// Write a table as parquet, atomically, then its sidecar.
    pub fn write_frame(&self, relative: &Path, frame: &DataFrame) -> Result<(), StoreError> {
        let mut payload = Vec::new();
        ParquetWriter::new(&mut payload)
            .finish(&mut frame.clone())
            .map_err(|source| StoreError::Parquet {
                path: self.path(relative),
                source,
            })?;
        self.write_bytes(relative, &payload)
    }

    fn write_bytes(&self, relative: &Path, payload: &[u8]) -> Result<(), StoreError> {
        let path = self.path(relative);
        let io = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        fs::write(&tmp_path, payload).map_err(io)?;
        if let Err(source) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(io(source));
        }

        let meta = ArtifactMeta {
            data_hash: blake3::hash(payload).to_hex().to_string(),
            bytes: payload.len(),
            written_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta).map_err(|source| StoreError::Serialize {
            path: path.clone(),
            source,
        })?;
        fs::write(Self::meta_path(&path), meta_json).map_err(io)?;
        debug!(path = %path.display(), bytes = meta.bytes, "artifact written");
        Ok(())
    }

    /// Sidecar of an artifact, if present and readable.
    pub fn meta(&self, relative: &Path) -> Option<ArtifactMeta> {
        let text = fs::read_to_string(Self::meta_path(&self.path(relative))).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// True when the payload on disk still hashes to the sidecar value.
    pub fn verify(&self, relative: &Path) -> Result<bool, StoreError> {
        let path = self.path(relative);
        let Some(meta) = self.meta(relative) else {
            return Ok(false);
        };
        let payload = fs::read(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(blake3::hash(&payload).to_hex().as_str() == meta.data_hash)
    }

    /// Remove an artifact and its sidecar. Returns whether anything was removed.
    pub fn remove(&self, relative: &Path) -> Result<bool, StoreError> {
        let path = self.path(relative);
        let mut removed = false;
        for p in [Self::meta_path(&path), path.clone()] {
            if p.is_file() {
                fs::remove_file(&p).map_err(|source| StoreError::Io {
                    path: p.clone(),
                    source,
                })?;
                removed = true;
            }
        }
        Ok(removed)
    }
}
