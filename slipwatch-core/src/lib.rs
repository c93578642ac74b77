//! Slipwatch Core: time-indexed environmental tables for landslide monitoring.
//!
//! This crate holds everything that does not touch scenario orchestration:
//! - Polars table helpers: canonical time columns, coercion, sorting, stacking
//! - Run-time setup, time windows and path/time token resolution
//! - Path templates keyed by run, file and destination times
//! - Source readers, time-keyed merging with provenance, alignment,
//!   gap filling and the three-source joiner
//! - Indicator analytics (rolling windows, peaks, summary statistics)

pub mod analytics;
pub mod data;
pub mod table;
pub mod template;
pub mod time;

pub use table::{parse_time, TableError};
pub use template::{PathKey, PathTemplate, TemplateValue, TemplateValues};
pub use time::{set_time, TimeError, TimeSetup, TimeWindowSpec};
