//! Peak values at buffered point locations over a time-stacked grid.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::AnalyticsError;

/// Flattened grid values per time step.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSeries {
    pub times: Vec<NaiveDateTime>,
    /// One flattened slice per time step, all of equal length.
    pub values: Vec<Vec<f64>>,
}

/// Per-point maxima plus overall peak statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakSummary {
    pub times: Vec<NaiveDateTime>,
    pub points: BTreeMap<String, Vec<f64>>,
    pub peak_max: Option<f64>,
    pub peak_mean: Option<f64>,
}

fn nan_max(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.filter(|v| !v.is_nan()).fold(None, |acc, v| match acc {
        Some(m) if m >= v => Some(m),
        _ => Some(v),
    })
}

/// For every time step and point, the NaN-ignoring max over the point's cell
/// indices. Time steps where every point is NaN are dropped.
pub fn compute_peaks(
    grid: &GridSeries,
    points: &BTreeMap<String, Vec<usize>>,
) -> Result<PeakSummary, AnalyticsError> {
    if grid.times.len() != grid.values.len() {
        return Err(AnalyticsError::ShapeMismatch {
            times: grid.times.len(),
            slices: grid.values.len(),
        });
    }

    let mut times = Vec::new();
    let mut columns: BTreeMap<String, Vec<f64>> =
        points.keys().map(|k| (k.clone(), Vec::new())).collect();

    for (t, slice) in grid.times.iter().zip(&grid.values) {
        let mut row = Vec::with_capacity(points.len());
        for (name, idxs) in points {
            let mut picked = Vec::with_capacity(idxs.len());
            for &i in idxs {
                let v = slice.get(i).ok_or_else(|| AnalyticsError::IndexOutOfBounds {
                    point: name.clone(),
                    index: i,
                    len: slice.len(),
                })?;
                picked.push(*v);
            }
            row.push(nan_max(picked.into_iter()).unwrap_or(f64::NAN));
        }
        if row.iter().all(|v| v.is_nan()) {
            continue;
        }
        times.push(*t);
        for ((_, col), v) in columns.iter_mut().zip(row) {
            col.push(v);
        }
    }

    let finite: Vec<f64> = columns
        .values()
        .flatten()
        .copied()
        .filter(|v| !v.is_nan())
        .collect();
    let peak_max = nan_max(finite.iter().copied());
    let peak_mean = if finite.is_empty() {
        None
    } else {
        Some(finite.iter().sum::<f64>() / finite.len() as f64)
    };

    Ok(PeakSummary {
        times,
        points: columns,
        peak_max,
        peak_mean,
    })
}
