//! Summary metrics over a time series.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Avg,
    Max,
    Min,
    First,
    Last,
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "avg" => Ok(Metric::Avg),
            "max" => Ok(Metric::Max),
            "min" => Ok(Metric::Min),
            "first" => Ok(Metric::First),
            "last" => Ok(Metric::Last),
            other => Err(other.to_string()),
        }
    }
}

/// Compute the named metrics. Unknown names are warned about and skipped;
/// missing values are ignored. `first`/`last` follow time order.
pub fn compute_statistics(
    series: &[(NaiveDateTime, Option<f64>)],
    metrics: &[&str],
) -> BTreeMap<Metric, f64> {
    let mut sorted: Vec<(NaiveDateTime, f64)> = series
        .iter()
        .filter_map(|(t, v)| v.map(|v| (*t, v)))
        .collect();
    sorted.sort_by_key(|(t, _)| *t);

    let mut out = BTreeMap::new();
    if sorted.is_empty() {
        return out;
    }
    for name in metrics {
        let metric = match name.parse::<Metric>() {
            Ok(m) => m,
            Err(other) => {
                warn!(metric = %other, "unsupported metric skipped");
                continue;
            }
        };
        let values = sorted.iter().map(|(_, v)| *v);
        let value = match metric {
            Metric::Avg => values.sum::<f64>() / sorted.len() as f64,
            Metric::Max => values.fold(f64::NEG_INFINITY, f64::max),
            Metric::Min => values.fold(f64::INFINITY, f64::min),
            Metric::First => sorted[0].1,
            Metric::Last => sorted[sorted.len() - 1].1,
        };
        out.insert(metric, value);
    }
    out
}
