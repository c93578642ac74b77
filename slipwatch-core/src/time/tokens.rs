//! Time-token resolution for folder and file templates.
//!
//! Templates mix strftime tokens (`%Y`, `%m`, `%d`, `%H`, `%M`), `*` wildcards
//! and `{placeholder}` keys. Resolution turns a template plus a nominal time
//! into concrete paths on disk, each keyed by the timestamp it encodes.

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("unsupported time directive '%{0}' in '{1}'")]
    UnsupportedDirective(char, String),

    #[error("invalid time format '{0}'")]
    InvalidFormat(String),

    #[error("template '{template}' contains more than one time token: {found:?}")]
    AmbiguousToken {
        template: String,
        found: Vec<String>,
    },

    #[error("no value for placeholder '{{{0}}}'")]
    MissingToken(String),

    #[error("invalid token pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("failed to list '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Ordering of resolved candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Resolved paths keyed by the timestamp they encode, in the requested order.
pub type TimedPaths = Vec<(NaiveDateTime, PathBuf)>;

/// Convert a strftime path format into a regex with named groups `Y m d H M`.
///
/// Repeated directives only capture on their first occurrence. `*` matches any
/// run of characters and a trailing slash is optional.
pub fn format_to_regex(fmt: &str) -> Result<Regex, TokenError> {
    let mut pattern = String::new();
    let mut seen: HashSet<char> = HashSet::new();
    let mut chars = fmt.trim_end_matches('/').chars();

    while let Some(c) = chars.next() {
        match c {
            '%' => {
                let Some(d) = chars.next() else {
                    return Err(TokenError::InvalidFormat(fmt.to_string()));
                };
                let width = match d {
                    'Y' => 4,
                    'm' | 'd' | 'H' | 'M' => 2,
                    '%' => {
                        pattern.push('%');
                        continue;
                    }
                    other => return Err(TokenError::UnsupportedDirective(other, fmt.to_string())),
                };
                if seen.insert(d) {
                    pattern.push_str(&format!("(?P<{d}>\\d{{{width}}})"));
                } else {
                    pattern.push_str(&format!("\\d{{{width}}}"));
                }
            }
            '*' => pattern.push_str(".*?"),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push_str("/?");
    Ok(Regex::new(&pattern)?)
}

/// Replace each `*` with the date token implied by its path segment:
/// segment 0 is the year, 1 the month, 2 the day, anything deeper the hour.
pub fn fill_star_with_format(pattern: &str) -> String {
    pattern
        .split('/')
        .enumerate()
        .map(|(i, segment)| {
            let token = match i {
                0 => "%Y",
                1 => "%m",
                2 => "%d",
                _ => "%H",
            };
            segment.replace('*', token)
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Pull the timestamp a path encodes. Absent components default to 1900-01-01 00:00.
pub fn extract_timestamp(path: &str, fmt: &str) -> Result<Option<NaiveDateTime>, TokenError> {
    let re = format_to_regex(fmt)?;
    Ok(extract_with(&re, path))
}

fn extract_with(re: &Regex, path: &str) -> Option<NaiveDateTime> {
    let caps = re.captures(path)?;
    let part = |name: &str, default: u32| -> Option<u32> {
        match caps.name(name) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(default),
        }
    };
    let year = match caps.name("Y") {
        Some(m) => m.as_str().parse().ok()?,
        None => 1900,
    };
    NaiveDate::from_ymd_opt(year, part("m", 1)?, part("d", 1)?)?
        .and_hms_opt(part("H", 0)?, part("M", 0)?, 0)
}

/// strftime-format a template sub-path. `*` survives unchanged.
pub fn format_sub_path_by_time(template: &str, time: NaiveDateTime) -> Result<String, TokenError> {
    if StrftimeItems::new(template).any(|item| matches!(item, Item::Error)) {
        return Err(TokenError::InvalidFormat(template.to_string()));
    }
    Ok(time.format(template).to_string())
}

/// Find the single `{placeholder}` from `tags` used in `template`.
pub fn detect_token(
    template: &str,
    tags: &BTreeMap<String, String>,
) -> Result<Option<String>, TokenError> {
    let found: Vec<String> = tags
        .keys()
        .filter(|k| template.contains(&format!("{{{k}}}")))
        .cloned()
        .collect();
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.into_iter().next()),
        _ => Err(TokenError::AmbiguousToken {
            template: template.to_string(),
            found,
        }),
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Resolve a template into existing paths keyed by their encoded timestamp.
///
/// Each `{key}` in the template is replaced by the matching token format
/// rendered at `time`; a placeholder without a token is an error. Without
/// wildcards the result is the single resolved path (or `None` if it does
/// not exist). With wildcards the parent
/// directory of the first `*` is listed, sub-directories matching the literal
/// prefix are parsed with `path_format`, and the parsed candidates are returned
/// in `order`. Duplicate timestamps keep the first candidate seen.
pub fn resolve_paths(
    template: &str,
    tokens: &BTreeMap<String, String>,
    time: NaiveDateTime,
    path_format: &str,
    order: SortOrder,
) -> Result<Option<TimedPaths>, TokenError> {
    let mut resolved = template.to_string();
    for key in placeholders(template) {
        if let Some(fmt) = tokens.get(&key) {
            let value = format_sub_path_by_time(fmt, time)?;
            resolved = resolved.replace(&format!("{{{key}}}"), &value);
        } else {
            return Err(TokenError::MissingToken(key));
        }
    }
    let resolved = expand_home(&resolved);
    let resolved_str = resolved.to_string_lossy().into_owned();
    let re = format_to_regex(&fill_star_with_format(path_format))?;

    if !resolved_str.contains('*') {
        if !resolved.exists() {
            debug!(path = %resolved.display(), "resolved path does not exist");
            return Ok(None);
        }
        let stamp = extract_with(&re, &resolved_str).unwrap_or(time);
        return Ok(Some(vec![(stamp, resolved)]));
    }

    let mut candidates = wildcard_candidates(&resolved_str)?;
    candidates.sort();

    let mut parsed: Vec<(NaiveDateTime, PathBuf)> = candidates
        .into_iter()
        .filter_map(|p| {
            let stamp = extract_with(&re, &p.to_string_lossy());
            if stamp.is_none() {
                debug!(path = %p.display(), "candidate without a parsable timestamp");
            }
            stamp.map(|s| (s, p))
        })
        .collect();
    parsed.sort_by_key(|(t, _)| *t);

    let mut seen = HashSet::new();
    parsed.retain(|(t, p)| {
        let first = seen.insert(*t);
        if !first {
            warn!(path = %p.display(), time = %t, "duplicate timestamp, keeping the first candidate");
        }
        first
    });

    if parsed.is_empty() {
        return Ok(None);
    }
    if order == SortOrder::Descending {
        parsed.reverse();
    }
    Ok(Some(parsed))
}

/// `{name}` placeholders in first-seen order.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else { break };
        let name = &after[..close];
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
        rest = &after[close + 1..];
    }
    out
}

/// List directories matching the segment holding the first `*`. Any literal
/// remainder after that segment is appended and must exist.
fn wildcard_candidates(pattern: &str) -> Result<Vec<PathBuf>, TokenError> {
    let star = pattern.find('*').unwrap_or(pattern.len());
    let seg_start = pattern[..star].rfind('/').map_or(0, |i| i + 1);
    let seg_end = pattern[star..]
        .find('/')
        .map_or(pattern.len(), |i| star + i);

    let parent = if seg_start == 0 {
        Path::new(".")
    } else {
        Path::new(&pattern[..seg_start])
    };
    let segment = &pattern[seg_start..seg_end];
    let remainder = pattern[seg_end..].trim_start_matches('/');
    let prefix = &segment[..segment.find('*').unwrap_or(segment.len())];

    if !parent.is_dir() {
        debug!(path = %parent.display(), "wildcard parent does not exist");
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(parent).map_err(|source| TokenError::Io {
        path: parent.to_path_buf(),
        source,
    })?;

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| TokenError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(prefix) {
            continue;
        }
        let candidate = if remainder.is_empty() || remainder.contains('*') {
            path
        } else {
            path.join(remainder)
        };
        if candidate.exists() {
            out.push(candidate);
        }
    }
    Ok(out)
}
