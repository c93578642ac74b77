//! Replaces nulls with typed no-data sentinels.

use polars::prelude::*;
use tracing::debug;

use crate::table::{coerce_time, column_names, is_numeric, TableError};

/// Coerce text `*time*` columns to datetimes where every value parses, then
/// fill nulls: numeric columns get `numeric_sentinel`, text columns
/// `string_sentinel`. Time columns keep their nulls.
pub fn fill_nodata(
    frame: &DataFrame,
    numeric_sentinel: f64,
    string_sentinel: &str,
) -> Result<DataFrame, TableError> {
    let mut out = frame.clone();
    let mut fills = Vec::new();
    for name in column_names(frame) {
        if name.contains("time") {
            if out.column(&name)?.dtype() == &DataType::String {
                if let Err(err) = coerce_time(&mut out, &name) {
                    debug!(column = %name, %err, "time column left as text");
                }
            }
            continue;
        }
        let column = out.column(&name)?;
        if is_numeric(column) {
            fills.push(
                col(name.as_str())
                    .cast(DataType::Float64)
                    .fill_null(lit(numeric_sentinel)),
            );
        } else if column.dtype() == &DataType::String {
            fills.push(col(name.as_str()).fill_null(lit(string_sentinel)));
        }
    }
    if fills.is_empty() {
        return Ok(out);
    }
    Ok(out.lazy().with_columns(fills).collect()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{parse_time, time_values};

    #[test]
    fn fills_by_column_type() {
        let f = df!(
            "time" => &["2024-01-01", "2024-01-02"],
            "rain_value" => &[None, Some(2.0)],
            "slips_note" => &[Some("ok"), None],
            "sm_time_end" => &[Some("2024-01-02 00:00"), None],
        )
        .unwrap();
        let out = fill_nodata(&f, -9999.0, "NA").unwrap();

        assert_eq!(
            time_values(&out, "time").unwrap()[0],
            parse_time("2024-01-01")
        );
        let rain = out.column("rain_value").unwrap().f64().unwrap();
        assert_eq!(rain.get(0), Some(-9999.0));
        let note = out.column("slips_note").unwrap().str().unwrap();
        assert_eq!(note.get(1), Some("NA"));
    }

    #[test]
    fn time_columns_keep_their_nulls() {
        let f = df!(
            "sm_time_end" => &[Some("2024-01-02 00:00"), None],
            "sm_time_run" => &[Some("not a time"), None],
        )
        .unwrap();
        let out = fill_nodata(&f, -9999.0, "NA").unwrap();

        let end = out.column("sm_time_end").unwrap();
        assert!(matches!(end.dtype(), DataType::Datetime(_, _)));
        assert_eq!(end.null_count(), 1);
        assert_eq!(
            time_values(&out, "sm_time_end").unwrap(),
            vec![parse_time("2024-01-02 00:00"), None]
        );
        // unparsable stays text, still without a sentinel
        let run = out.column("sm_time_run").unwrap().str().unwrap();
        assert_eq!(run.get(1), None);
    }

    #[test]
    fn all_null_column_counts_as_numeric() {
        let f = DataFrame::new(vec![Column::new("slips_n".into(), vec![None::<&str>])]).unwrap();
        let out = fill_nodata(&f, -9999.0, "NA").unwrap();
        let n = out.column("slips_n").unwrap().f64().unwrap();
        assert_eq!(n.get(0), Some(-9999.0));
    }
}
