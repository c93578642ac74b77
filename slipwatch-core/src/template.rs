//! Typed path builder.
//!
//! Templates carry `{placeholder}` keys. A `PathKey` describes the run, the
//! search step, the file time and the area; it expands into the placeholder
//! values consumed by source, ancillary and destination templates. Time
//! values are formatted with the strftime format registered for their tag.

use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use tracing::warn;

use crate::time::tokens::placeholders;

/// One value to substitute for a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Time(NaiveDateTime),
    Text(String),
}

pub type TemplateValues = BTreeMap<String, TemplateValue>;

/// A path string with `{placeholder}` keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
}

impl PathTemplate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn placeholders(&self) -> Vec<String> {
        placeholders(&self.raw)
    }

    /// Substitute every placeholder that has a value. Time values need a tag
    /// format in `tags`; placeholders that cannot be filled are kept verbatim.
    pub fn render(&self, tags: &BTreeMap<String, String>, values: &TemplateValues) -> String {
        let mut out = self.raw.clone();
        for name in self.placeholders() {
            let replacement = match values.get(&name) {
                Some(TemplateValue::Text(s)) => Some(s.clone()),
                Some(TemplateValue::Time(t)) => match tags.get(&name) {
                    Some(fmt) if is_valid_format(fmt) => Some(t.format(fmt).to_string()),
                    Some(fmt) => {
                        warn!(placeholder = %name, format = %fmt, "invalid time format for placeholder");
                        None
                    }
                    None => {
                        warn!(placeholder = %name, "no tag format for time placeholder");
                        None
                    }
                },
                None => None,
            };
            if let Some(value) = replacement {
                out = out.replace(&format!("{{{name}}}"), &value);
            }
        }
        out
    }

    /// Placeholders `render` would leave in place.
    pub fn unresolved(&self, values: &TemplateValues) -> Vec<String> {
        self.placeholders()
            .into_iter()
            .filter(|p| !values.contains_key(p))
            .collect()
    }
}

fn is_valid_format(fmt: &str) -> bool {
    !StrftimeItems::new(fmt).any(|i| matches!(i, Item::Error))
}

/// Structured key a path is built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathKey {
    pub run: Option<NaiveDateTime>,
    pub search: Option<NaiveDateTime>,
    pub file: Option<NaiveDateTime>,
    pub destination: Option<NaiveDateTime>,
    pub area: Option<String>,
    pub variable: Option<String>,
}

impl PathKey {
    pub fn for_run(run: NaiveDateTime) -> Self {
        Self {
            run: Some(run),
            ..Self::default()
        }
    }

    pub fn area(mut self, area: &str) -> Self {
        self.area = Some(area.to_string());
        self
    }

    pub fn variable(mut self, variable: &str) -> Self {
        self.variable = Some(variable.to_string());
        self
    }

    pub fn search(mut self, time: NaiveDateTime) -> Self {
        self.search = Some(time);
        self
    }

    pub fn file(mut self, time: NaiveDateTime) -> Self {
        self.file = Some(time);
        self
    }

    pub fn destination(mut self, time: NaiveDateTime) -> Self {
        self.destination = Some(time);
        self
    }

    /// Expand into placeholder values.
    pub fn values(&self) -> TemplateValues {
        let mut v = TemplateValues::new();
        let mut put_time = |names: &[String], t: Option<NaiveDateTime>| {
            if let Some(t) = t {
                for n in names {
                    v.insert(n.clone(), TemplateValue::Time(t));
                }
            }
        };

        put_time(
            &[
                "run_sub_path_time".into(),
                "run_datetime".into(),
                "source_sub_path_time_run".into(),
                "source_datetime_run".into(),
                "ancillary_sub_path_time".into(),
                "ancillary_datetime".into(),
            ],
            self.run,
        );
        put_time(
            &["search_sub_path_time".into(), "search_datetime".into()],
            self.search,
        );
        if let Some(var) = &self.variable {
            put_time(
                &[
                    format!("source_sub_path_time_{var}"),
                    format!("source_datetime_{var}"),
                ],
                self.file,
            );
        }
        put_time(
            &[
                "destination_sub_path_time".into(),
                "destination_datetime".into(),
            ],
            self.destination,
        );

        if let Some(area) = &self.area {
            v.insert("alert_area_name".into(), TemplateValue::Text(area.clone()));
        }
        v
    }
}
