//! Property tests for table invariants.
//!
//! Uses proptest to verify:
//! 1. Merge precedence: rows already accumulated win over later steps
//! 2. Merge idempotence: merging the same step twice changes nothing
//! 3. Gap-fill is additive: original rows survive, one row per calendar day
//! 4. Gap-fill without bounds is a no-op

use chrono::{Duration, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use slipwatch_core::data::{fill_missing_days, merge_by_time, GapFillOptions, MergeOptions};
use slipwatch_core::table::{time_column, time_values, times};

// ── Strategies (proptest) ────────────────────────────────────────────

fn base_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

fn at(offset: u32) -> NaiveDateTime {
    (base_day() + Duration::days(i64::from(offset))).and_hms_opt(0, 0, 0).unwrap()
}

/// Day offset -> integral value, so float comparisons stay exact.
fn arb_series() -> impl Strategy<Value = BTreeMap<u32, i32>> {
    prop::collection::btree_map(0u32..20, -500i32..500, 1..12)
}

fn to_frame(series: &BTreeMap<u32, i32>) -> DataFrame {
    let stamps: Vec<Option<NaiveDateTime>> = series.keys().map(|d| Some(at(*d))).collect();
    let values: Vec<f64> = series.values().map(|v| f64::from(*v)).collect();
    DataFrame::new(vec![
        time_column("time", &stamps).unwrap(),
        Column::new("value".into(), values),
    ])
    .unwrap()
}

/// Row index of the first row stamped `t`.
fn row_at(frame: &DataFrame, t: NaiveDateTime) -> Option<usize> {
    time_values(frame, "time").unwrap().iter().position(|r| *r == Some(t))
}

fn value_at(frame: &DataFrame, t: NaiveDateTime) -> Option<f64> {
    let row = row_at(frame, t)?;
    frame.column("value").ok()?.f64().ok()?.get(row)
}

// ── 1. Merge Precedence ──────────────────────────────────────────────

proptest! {
    /// Times present in the accumulator keep the accumulator's value; new
    /// times come from the step and are tagged `db`.
    #[test]
    fn accumulator_rows_win(a in arb_series(), b in arb_series()) {
        let opts = MergeOptions::default();
        let first = merge_by_time(None, Some(&to_frame(&a)), &opts).unwrap();
        let merged = merge_by_time(Some(first), Some(&to_frame(&b)), &opts).unwrap();

        let mut expected_days: Vec<u32> = a.keys().chain(b.keys()).copied().collect();
        expected_days.sort();
        expected_days.dedup();
        prop_assert_eq!(merged.height(), expected_days.len());

        for (d, v) in &a {
            prop_assert_eq!(value_at(&merged, at(*d)), Some(f64::from(*v)));
        }
        let tags = merged.column("latest_from").unwrap().str().unwrap().clone();
        for (d, v) in b.iter().filter(|(d, _)| !a.contains_key(d)) {
            prop_assert_eq!(value_at(&merged, at(*d)), Some(f64::from(*v)));
            let row = row_at(&merged, at(*d)).unwrap();
            prop_assert_eq!(tags.get(row), Some("db"));
        }
    }

    /// Output rows are sorted ascending by time.
    #[test]
    fn merge_output_is_sorted(a in arb_series(), b in arb_series()) {
        let opts = MergeOptions::default();
        let first = merge_by_time(None, Some(&to_frame(&a)), &opts).unwrap();
        let merged = merge_by_time(Some(first), Some(&to_frame(&b)), &opts).unwrap();
        let times = times(&merged, "time").unwrap();
        prop_assert!(times.windows(2).all(|w| w[0] < w[1]));
    }
}

// ── 2. Merge Idempotence ─────────────────────────────────────────────

proptest! {
    #[test]
    fn merging_a_step_twice_is_idempotent(a in arb_series(), b in arb_series()) {
        let opts = MergeOptions::default();
        let step = to_frame(&b);
        let first = merge_by_time(None, Some(&to_frame(&a)), &opts).unwrap();
        let once = merge_by_time(Some(first), Some(&step), &opts).unwrap();
        let twice = merge_by_time(Some(once.clone()), Some(&step), &opts).unwrap();
        prop_assert!(once.equals_missing(&twice));
    }
}

// ── 3. Gap-Fill Additivity ───────────────────────────────────────────

proptest! {
    #[test]
    fn gap_fill_only_adds_rows(a in arb_series()) {
        let opts = GapFillOptions {
            start_date: Some(base_day()),
            end_date: Some(base_day() + Duration::days(24)),
            ..GapFillOptions::default()
        };
        let out = fill_missing_days(&to_frame(&a), &opts).unwrap();
        prop_assert_eq!(out.height(), 25);

        let labels = out.column("time").unwrap().str().unwrap().clone();
        let values = out.column("value").unwrap().f64().unwrap().clone();
        for (d, v) in &a {
            let label = at(*d).format("%Y-%m-%d").to_string();
            let row = labels.iter().position(|l| l == Some(label.as_str())).unwrap();
            prop_assert_eq!(values.get(row), Some(f64::from(*v)));
        }
        let sentinels = values.iter().filter(|v| *v == Some(-9999.0)).count();
        prop_assert_eq!(sentinels, 25 - a.len());
    }
}

// ── 4. Gap-Fill No-Op ────────────────────────────────────────────────

proptest! {
    #[test]
    fn gap_fill_without_bounds_is_identity(a in arb_series()) {
        let frame = to_frame(&a);
        let out = fill_missing_days(&frame, &GapFillOptions::default()).unwrap();
        prop_assert!(out.equals_missing(&frame));
    }
}
