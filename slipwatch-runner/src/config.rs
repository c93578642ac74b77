//! Typed scenario configuration, loaded from TOML and validated once.

use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use slipwatch_core::analytics::WindowDirection;
use slipwatch_core::data::{SourceSpec, DEFAULT_NUMERIC_SENTINEL, DEFAULT_STRING_SENTINEL};
use slipwatch_core::time::files::DEFAULT_TIME_TOKEN_INDEX;
use slipwatch_core::time::{parse_time_window, TimeError, TimeWindowSpec};
use slipwatch_core::{parse_time, PathTemplate};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid timestamp '{value}' for {field}")]
    BadTimestamp { field: String, value: String },

    #[error(transparent)]
    Time(#[from] TimeError),
}

/// `[time]`: run time and the window iterated before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeConfig {
    /// Overridden by the CLI `--time` flag; the current time when both are absent.
    #[serde(default)]
    pub time_run: Option<String>,
    #[serde(default = "default_period")]
    pub period: u32,
    #[serde(default = "default_frequency")]
    pub frequency: String,
    #[serde(default = "default_rounding")]
    pub rounding: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

fn default_period() -> u32 {
    24
}

fn default_frequency() -> String {
    "h".into()
}

fn default_rounding() -> String {
    "h".into()
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            time_run: None,
            period: default_period(),
            frequency: default_frequency(),
            rounding: default_rounding(),
            start: None,
            end: None,
        }
    }
}

impl TimeConfig {
    pub fn time_run(&self) -> Result<Option<NaiveDateTime>, ConfigError> {
        self.time_run
            .as_deref()
            .map(|raw| timestamp("time.time_run", raw))
            .transpose()
    }

    pub fn window_spec(&self) -> Result<TimeWindowSpec, ConfigError> {
        Ok(TimeWindowSpec {
            period: self.period,
            frequency: self.frequency.clone(),
            rounding: self.rounding.clone(),
            start: self.start.as_deref().map(|s| timestamp("time.start", s)).transpose()?,
            end: self.end.as_deref().map(|s| timestamp("time.end", s)).transpose()?,
        })
    }
}

fn timestamp(field: &str, raw: &str) -> Result<NaiveDateTime, ConfigError> {
    parse_time(raw).ok_or_else(|| ConfigError::BadTimestamp {
        field: field.to_string(),
        value: raw.to_string(),
    })
}

/// `[source.*]`: where one source lives and how to read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Folder template; rain and soil moisture carry one search placeholder.
    pub folder: String,
    /// File name template, joined onto the resolved folder.
    pub file: String,
    /// Position of the timestamp in the `_`-separated file stem.
    #[serde(default = "default_time_index")]
    pub file_time_index: usize,
    /// Merge keys besides time; `{:}` is replaced by the prefix.
    #[serde(default)]
    pub merge_keys: Vec<String>,
    #[serde(flatten)]
    pub spec: SourceSpec,
}

fn default_time_index() -> usize {
    DEFAULT_TIME_TOKEN_INDEX
}

impl SourceConfig {
    pub fn folder_template(&self) -> PathTemplate {
        PathTemplate::new(self.folder.clone())
    }

    pub fn file_template(&self) -> PathTemplate {
        PathTemplate::new(self.file.clone())
    }

    /// Folder and file joined, for sources read from a fixed location.
    pub fn path_template(&self) -> PathTemplate {
        PathTemplate::new(
            Path::new(&self.folder)
                .join(&self.file)
                .to_string_lossy()
                .into_owned(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sources {
    pub rain: SourceConfig,
    pub soil_moisture: SourceConfig,
    pub soil_slips: SourceConfig,
}

/// `[ancillary]`: root and per-artifact templates, relative to the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AncillaryConfig {
    pub folder: String,
    #[serde(default = "default_datasets")]
    pub datasets: String,
    #[serde(default = "default_analysis")]
    pub analysis: String,
}

fn default_datasets() -> String {
    "{alert_area_name}/datasets_{ancillary_datetime}.json".into()
}

fn default_analysis() -> String {
    "{alert_area_name}/analysis_{ancillary_datetime}.parquet".into()
}

/// `[destination]`: final CSV artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub folder: String,
    pub file: String,
    #[serde(default = "default_csv_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_precision")]
    pub precision: usize,
}

fn default_csv_delimiter() -> char {
    ','
}

fn default_precision() -> usize {
    3
}

impl DestinationConfig {
    pub fn path_template(&self) -> PathTemplate {
        PathTemplate::new(
            Path::new(&self.folder)
                .join(&self.file)
                .to_string_lossy()
                .into_owned(),
        )
    }
}

/// `[flags]`: force recomputation of a stage and everything downstream of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFlags {
    #[serde(default)]
    pub update_ancillary_datasets: bool,
    #[serde(default)]
    pub update_ancillary_analysis: bool,
    #[serde(default)]
    pub update_destination: bool,
}

/// `[alignment]`: which sources shape the common window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    #[serde(default = "yes")]
    pub use_rain: bool,
    #[serde(default = "yes")]
    pub use_soil_moisture: bool,
    #[serde(default)]
    pub use_soil_slips: bool,
}

fn yes() -> bool {
    true
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            use_rain: true,
            use_soil_moisture: true,
            use_soil_slips: false,
        }
    }
}

/// `[fill]`: no-data sentinels and synthesized times of day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillConfig {
    #[serde(default = "default_numeric_sentinel")]
    pub numeric_sentinel: f64,
    #[serde(default = "default_string_sentinel")]
    pub string_sentinel: String,
    /// `HH:MM` written into synthesized `*_time_start` cells.
    #[serde(default = "default_start_time")]
    pub start_time: String,
    /// `HH:MM` for `*_time_end` cells; inferred per column when unset.
    #[serde(default)]
    pub end_time: Option<String>,
}

fn default_numeric_sentinel() -> f64 {
    DEFAULT_NUMERIC_SENTINEL
}

fn default_string_sentinel() -> String {
    DEFAULT_STRING_SENTINEL.into()
}

fn default_start_time() -> String {
    "01:00".into()
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            numeric_sentinel: default_numeric_sentinel(),
            string_sentinel: default_string_sentinel(),
            start_time: default_start_time(),
            end_time: None,
        }
    }
}

/// `[[areas]]`: one alert area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaConfig {
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub catchments: Vec<String>,
}

/// `[indicators]`: optional rolling indicators over the analysis table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub rain_column: String,
    pub soil_moisture_column: String,
    #[serde(default = "default_windows")]
    pub windows: Vec<String>,
    #[serde(default = "default_direction")]
    pub direction: WindowDirection,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
}

fn default_windows() -> Vec<String> {
    vec!["1d".into(), "3d".into()]
}

fn default_direction() -> WindowDirection {
    WindowDirection::Right
}

fn default_metrics() -> Vec<String> {
    ["avg", "max", "min", "first", "last"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Full scenario configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub time: TimeConfig,
    /// Placeholder name -> strftime format.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub source: Sources,
    pub ancillary: AncillaryConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub flags: UpdateFlags,
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub fill: FillConfig,
    pub areas: Vec<AreaConfig>,
    #[serde(default)]
    pub indicators: Option<IndicatorConfig>,
    /// Process areas on the rayon pool.
    #[serde(default)]
    pub parallel: bool,
}

impl ScenarioConfig {
    /// Parse and validate.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ScenarioConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.areas.is_empty() {
            return Err(ConfigError::Invalid("at least one [[areas]] entry is required".into()));
        }
        let mut names = HashSet::new();
        for area in &self.areas {
            if area.name.trim().is_empty() {
                return Err(ConfigError::Invalid("area name must not be empty".into()));
            }
            if !names.insert(area.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate area '{}'", area.name)));
            }
        }

        for (name, fmt) in &self.tags {
            if StrftimeItems::new(fmt).any(|i| matches!(i, Item::Error)) {
                return Err(ConfigError::Invalid(format!("tag '{name}' has invalid format '{fmt}'")));
            }
        }

        parse_time_window(&self.time.frequency)?;
        parse_time_window(&self.time.rounding)?;
        self.time.time_run()?;
        self.time.window_spec()?;

        for (label, source) in [
            ("rain", &self.source.rain),
            ("soil_moisture", &self.source.soil_moisture),
        ] {
            let searched = source
                .folder_template()
                .placeholders()
                .iter()
                .filter(|p| self.tags.contains_key(p.as_str()))
                .count();
            if searched == 0 {
                return Err(ConfigError::Invalid(format!(
                    "source.{label}.folder needs a time placeholder listed in [tags]"
                )));
            }
        }

        for (field, delimiter) in [
            ("source.rain.delimiter", self.source.rain.spec.delimiter),
            ("source.soil_moisture.delimiter", self.source.soil_moisture.spec.delimiter),
            ("source.soil_slips.delimiter", self.source.soil_slips.spec.delimiter),
            ("destination.delimiter", self.destination.delimiter),
        ] {
            if !delimiter.is_ascii() {
                return Err(ConfigError::Invalid(format!(
                    "{field} {delimiter:?} must be a single ASCII character"
                )));
            }
        }

        if self.destination.precision > 12 {
            return Err(ConfigError::Invalid(format!(
                "destination.precision {} is out of range",
                self.destination.precision
            )));
        }
        if let Some(end) = &self.fill.end_time {
            hh_mm("fill.end_time", end)?;
        }
        hh_mm("fill.start_time", &self.fill.start_time)?;

        if let Some(ind) = &self.indicators {
            for w in &ind.windows {
                parse_time_window(w)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn hh_mm(field: &str, raw: &str) -> Result<chrono::NaiveTime, ConfigError> {
    chrono::NaiveTime::parse_from_str(raw, "%H:%M").map_err(|_| ConfigError::BadTimestamp {
        field: field.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
parallel = true

[time]
time_run = "2024-01-06 23:00"
period = 6
frequency = "d"

[tags]
search_sub_path_time = "%Y/%m/%d"
source_datetime_rain = "%Y%m%d%H%M"

[source.rain]
variable = "rain"
folder = "/data/rain/{search_sub_path_time}"
file = "rain_{alert_area_name}_{source_datetime_rain}.csv"
prefix = "rain"
merge_keys = ["{:}_time_start", "{:}_time_end"]
fields = [
    { key = "time", column = "time" },
    { key = ":", column = "value" },
]

[source.soil_moisture]
variable = "soil_moisture"
folder = "/data/sm/{search_sub_path_time}"
file = "sm_{alert_area_name}.csv"
delimiter = ";"
fields = [{ key = "time", column = "time" }]

[source.soil_slips]
variable = "soil_slips"
type = "point"
folder = "/data/slips"
file = "slips_{alert_area_name}.csv"
fields = [{ key = "time", column = "date" }]

[ancillary]
folder = "/tmp/anc"

[destination]
folder = "/tmp/out"
file = "{alert_area_name}_{destination_datetime}.csv"

[[areas]]
name = "alpha"
code = "A1"
"#;

    #[test]
    fn parses_full_sample() {
        let cfg = ScenarioConfig::from_toml(SAMPLE).unwrap();
        assert!(cfg.parallel);
        assert_eq!(cfg.time.period, 6);
        assert_eq!(cfg.source.rain.spec.prefix.as_deref(), Some("rain"));
        assert_eq!(cfg.source.rain.merge_keys.len(), 2);
        assert_eq!(cfg.source.soil_moisture.spec.delimiter, ';');
        assert_eq!(cfg.source.soil_slips.file_time_index, 2);
        assert_eq!(cfg.destination.precision, 3);
        assert!(cfg.alignment.use_rain && !cfg.alignment.use_soil_slips);
        assert_eq!(cfg.fill.numeric_sentinel, -9999.0);
        assert_eq!(
            cfg.time.time_run().unwrap(),
            parse_time("2024-01-06 23:00")
        );
    }

    #[test]
    fn rejects_duplicate_areas() {
        let text = format!("{SAMPLE}\n[[areas]]\nname = \"alpha\"\n");
        assert!(matches!(
            ScenarioConfig::from_toml(&text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_bad_frequency() {
        let text = SAMPLE.replace("frequency = \"d\"", "frequency = \"w\"");
        assert!(matches!(
            ScenarioConfig::from_toml(&text),
            Err(ConfigError::Time(TimeError::InvalidWindow(_)))
        ));
    }

    #[test]
    fn rejects_folder_without_search_token() {
        let text = SAMPLE.replace("/data/rain/{search_sub_path_time}", "/data/rain");
        assert!(matches!(
            ScenarioConfig::from_toml(&text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_non_ascii_delimiter() {
        let text = SAMPLE.replace("delimiter = \";\"", "delimiter = \"§\"");
        match ScenarioConfig::from_toml(&text) {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("soil_moisture.delimiter")),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn bad_timestamp_is_reported() {
        let text = SAMPLE.replace("2024-01-06 23:00", "yesterday");
        assert!(matches!(
            ScenarioConfig::from_toml(&text),
            Err(ConfigError::BadTimestamp { .. })
        ));
    }
}
