//! Integration tests for the three-source joiner.

use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use slipwatch_core::data::{join_sources, JoinError, JoinInput, JoinOptions};
use slipwatch_core::parse_time;
use slipwatch_core::table::{column_names, time_values};

fn t(s: &str) -> NaiveDateTime {
    parse_time(s).unwrap()
}

fn source(value_col: &str, rows: &[(&str, f64)]) -> DataFrame {
    let times: Vec<&str> = rows.iter().map(|(d, _)| *d).collect();
    let values: Vec<f64> = rows.iter().map(|(_, v)| *v).collect();
    DataFrame::new(vec![
        Column::new("time".into(), times),
        Column::new(value_col.into(), values),
    ])
    .unwrap()
}

fn value(df: &DataFrame, col: &str, row: usize) -> Option<f64> {
    df.column(col).unwrap().f64().unwrap().get(row)
}

fn opts() -> JoinOptions {
    JoinOptions {
        domain_value: "alpha".into(),
        slips_placeholder_columns: vec!["slips_count".into()],
        ..JoinOptions::default()
    }
}

#[test]
fn missing_rain_is_an_error() {
    let sm = source("sm_value", &[("2024-01-01", 0.2)]);
    let result = join_sources(
        t("2024-01-01"),
        t("2024-01-02"),
        JoinInput { variable: "rain", frame: None },
        JoinInput { variable: "soil_moisture", frame: Some(&sm) },
        JoinInput { variable: "soil_slips", frame: None },
        &opts(),
    );
    match result {
        Err(JoinError::MissingMandatory(v)) => assert_eq!(v, "rain"),
        other => panic!("expected MissingMandatory, got {other:?}"),
    }
}

#[test]
fn empty_soil_moisture_is_an_error() {
    let rain = source("rain_value", &[("2024-01-01", 1.0)]);
    let sm = source("sm_value", &[]);
    let result = join_sources(
        t("2024-01-01"),
        t("2024-01-02"),
        JoinInput { variable: "rain", frame: Some(&rain) },
        JoinInput { variable: "soil_moisture", frame: Some(&sm) },
        JoinInput { variable: "soil_slips", frame: None },
        &opts(),
    );
    assert!(matches!(result, Err(JoinError::MissingMandatory(v)) if v == "soil_moisture"));
}

#[test]
fn absent_slips_produce_a_null_block() {
    let rain = source("rain_value", &[("2024-01-01", 1.0), ("2024-01-03", 3.0)]);
    let sm = source("sm_value", &[("2024-01-02", 0.2)]);
    let out = join_sources(
        t("2024-01-01"),
        t("2024-01-03"),
        JoinInput { variable: "rain", frame: Some(&rain) },
        JoinInput { variable: "soil_moisture", frame: Some(&sm) },
        JoinInput { variable: "soil_slips", frame: None },
        &opts(),
    )
    .unwrap();

    assert_eq!(
        column_names(&out),
        vec!["time", "rain_value", "sm_value", "slips_count", "domain"]
    );
    assert_eq!(out.height(), 3);
    assert_eq!(time_values(&out, "time").unwrap()[0], Some(t("2024-01-01")));
    assert_eq!(value(&out, "rain_value", 1), None);
    assert_eq!(value(&out, "sm_value", 1), Some(0.2));
    let slips = out.column("slips_count").unwrap();
    assert_eq!(slips.null_count(), 3);
    let domain = out.column("domain").unwrap().str().unwrap();
    assert!(domain.iter().all(|d| d == Some("alpha")));
}

#[test]
fn empty_slips_frame_gets_placeholder_block() {
    let rain = source("rain_value", &[("2024-01-01", 1.0), ("2024-01-02", 2.0)]);
    let sm = source("sm_value", &[("2024-01-01", 0.2)]);
    let slips = DataFrame::empty();
    let out = join_sources(
        t("2024-01-01"),
        t("2024-01-02"),
        JoinInput { variable: "rain", frame: Some(&rain) },
        JoinInput { variable: "soil_moisture", frame: Some(&sm) },
        JoinInput { variable: "soil_slips", frame: Some(&slips) },
        &opts(),
    )
    .unwrap();

    assert_eq!(out.height(), 2);
    let slips = out.column("slips_count").unwrap();
    assert_eq!(slips.dtype(), &DataType::Float64);
    assert_eq!(slips.null_count(), 2);
}

#[test]
fn colliding_columns_are_renamed_per_variable() {
    let rain = source("value", &[("2024-01-01", 1.0)]);
    let sm = source("value", &[("2024-01-01", 0.4)]);
    let slips = source("count", &[("2024-01-01", 2.0)]);
    let out = join_sources(
        t("2024-01-01"),
        t("2024-01-01"),
        JoinInput { variable: "rain", frame: Some(&rain) },
        JoinInput { variable: "sm", frame: Some(&sm) },
        JoinInput { variable: "slips", frame: Some(&slips) },
        &opts(),
    )
    .unwrap();
    assert_eq!(value(&out, "value", 0), Some(1.0));
    assert_eq!(value(&out, "sm_value", 0), Some(0.4));
    assert_eq!(value(&out, "count", 0), Some(2.0));
}

#[test]
fn hourly_frequency_expands_the_index() {
    let rain = source("rain_value", &[("2024-01-01 01:00", 1.0)]);
    let sm = source("sm_value", &[("2024-01-01 02:00", 0.2)]);
    let out = join_sources(
        t("2024-01-01 00:00"),
        t("2024-01-01 03:00"),
        JoinInput { variable: "rain", frame: Some(&rain) },
        JoinInput { variable: "soil_moisture", frame: Some(&sm) },
        JoinInput { variable: "soil_slips", frame: None },
        &JoinOptions {
            frequency: Duration::hours(1),
            ..opts()
        },
    )
    .unwrap();
    assert_eq!(out.height(), 4);
    assert_eq!(value(&out, "rain_value", 1), Some(1.0));
    assert_eq!(value(&out, "sm_value", 2), Some(0.2));
}
