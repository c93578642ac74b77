//! Indicator analytics over aligned series: rolling windows, peaks, statistics.

pub mod peaks;
pub mod rolling;
pub mod stats;

use thiserror::Error;

pub use peaks::{compute_peaks, GridSeries, PeakSummary};
pub use rolling::{rolling_accumulated, rolling_averaged, WindowDirection};
pub use stats::{compute_statistics, Metric};

#[derive(Debug, Error, PartialEq)]
pub enum AnalyticsError {
    #[error("window '{0}' has no samples")]
    EmptyWindow(String),

    #[error("grid has {times} time steps but {slices} value slices")]
    ShapeMismatch { times: usize, slices: usize },

    #[error("point '{point}' references cell {index} of a grid with {len} cells")]
    IndexOutOfBounds {
        point: String,
        index: usize,
        len: usize,
    },
}
