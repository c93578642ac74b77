//! Directional rolling accumulation and averaging over count-based windows.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::AnalyticsError;
use crate::time::split_time_window;

/// Which edge of the window a value is labeled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowDirection {
    /// Labeled at the window's last element (trailing window).
    Right,
    /// Labeled at the window's first element (leading window).
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reduce {
    Sum,
    Mean,
}

/// Rolling sum over `window` (e.g. `"3h"`, `"24d"`; the count is the number of samples).
///
/// Windows touching a missing value or running off the series produce no
/// output. `reverse_output` emits newest first.
pub fn rolling_accumulated(
    series: &[(NaiveDateTime, Option<f64>)],
    window: &str,
    direction: WindowDirection,
    reverse_output: bool,
) -> Result<Vec<(NaiveDateTime, f64)>, AnalyticsError> {
    rolling(series, window, direction, reverse_output, Reduce::Sum)
}

/// Rolling mean; same window rules as [`rolling_accumulated`].
pub fn rolling_averaged(
    series: &[(NaiveDateTime, Option<f64>)],
    window: &str,
    direction: WindowDirection,
    reverse_output: bool,
) -> Result<Vec<(NaiveDateTime, f64)>, AnalyticsError> {
    rolling(series, window, direction, reverse_output, Reduce::Mean)
}

fn rolling(
    series: &[(NaiveDateTime, Option<f64>)],
    window: &str,
    direction: WindowDirection,
    reverse_output: bool,
    reduce: Reduce,
) -> Result<Vec<(NaiveDateTime, f64)>, AnalyticsError> {
    let (count, _) = split_time_window(window);
    let n = count as usize;
    if n == 0 {
        return Err(AnalyticsError::EmptyWindow(window.to_string()));
    }

    let mut sorted = series.to_vec();
    sorted.sort_by_key(|(t, _)| *t);

    let mut out = Vec::new();
    if sorted.len() >= n {
        for start in 0..=sorted.len() - n {
            let slice = &sorted[start..start + n];
            let values: Option<Vec<f64>> = slice.iter().map(|(_, v)| *v).collect();
            let Some(values) = values else { continue };
            let total: f64 = values.iter().sum();
            let value = match reduce {
                Reduce::Sum => total,
                Reduce::Mean => total / n as f64,
            };
            let label = match direction {
                WindowDirection::Right => slice[n - 1].0,
                WindowDirection::Left => slice[0].0,
            };
            out.push((label, value));
        }
    }
    if reverse_output {
        out.reverse();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::parse_time;

    fn series(values: &[Option<f64>]) -> Vec<(NaiveDateTime, Option<f64>)> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (parse_time(&format!("2024-01-{:02}", i + 1)).unwrap(), *v))
            .collect()
    }

    fn day(n: u32) -> NaiveDateTime {
        parse_time(&format!("2024-01-{n:02}")).unwrap()
    }

    #[test]
    fn trailing_sum() {
        let s = series(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        let out = rolling_accumulated(&s, "2d", WindowDirection::Right, false).unwrap();
        assert_eq!(out, vec![(day(2), 3.0), (day(3), 5.0), (day(4), 7.0)]);
    }

    #[test]
    fn leading_mean_reversed() {
        let s = series(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        let out = rolling_averaged(&s, "2d", WindowDirection::Left, true).unwrap();
        assert_eq!(out, vec![(day(3), 3.5), (day(2), 2.5), (day(1), 1.5)]);
    }

    #[test]
    fn gaps_drop_windows() {
        let s = series(&[Some(1.0), None, Some(3.0), Some(4.0)]);
        let out = rolling_accumulated(&s, "2h", WindowDirection::Right, false).unwrap();
        assert_eq!(out, vec![(day(4), 7.0)]);
    }

    #[test]
    fn window_longer_than_series_is_empty() {
        let s = series(&[Some(1.0)]);
        assert!(rolling_accumulated(&s, "3d", WindowDirection::Right, false)
            .unwrap()
            .is_empty());
        assert!(rolling_accumulated(&s, "0d", WindowDirection::Right, false).is_err());
    }
}
