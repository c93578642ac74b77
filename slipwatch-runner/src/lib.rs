//! Slipwatch Runner: scenario orchestration on top of `slipwatch-core`.
//!
//! This crate provides:
//! - Typed TOML scenario configuration with validation
//! - The ancillary object store (atomic JSON and parquet artifacts with hash sidecars)
//! - The per-area pipeline: discovery, merge, alignment, pivot barrier,
//!   analysis join and indicators
//! - CSV export of the per-area analysis tables

pub mod config;
pub mod export;
pub mod scenario;
pub mod store;

pub use config::{AreaConfig, ConfigError, ScenarioConfig};
pub use export::{frame_to_csv, write_frame_csv, ExportError, ExportOptions};
pub use scenario::{
    clean_scenario, reconcile_pivot, run_scenario, AreaDatasets, AreaIndicators, AreaReport,
    AreaStage, Scenario, ScenarioError, ScenarioReport, StepSummary,
};
pub use store::{AncillaryStore, ArtifactMeta, StoreError};
