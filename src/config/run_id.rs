//! Run identity: explicit or generated from the first source and the clock.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;

/// `[run.run_id_auto]` settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunIdAuto {
    /// Whether generation is enabled at all.
    pub enabled: bool,
    /// Leading digits of the `YYYYMMDDHHMMSS` timestamp (4 = year).
    pub prefix_digits: usize,
    /// Trailing digits of the timestamp (6 = `HHMMSS`).
    pub suffix_digits: usize,
    /// Whether to lead with the first source's name.
    pub include_input_name: bool,
    /// Separator between parts.
    pub separator: String,
}

impl Default for RunIdAuto {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix_digits: 4,
            suffix_digits: 6,
            include_input_name: true,
            separator: "_".to_string(),
        }
    }
}

/// Fallback when neither an explicit nor a generated id is available.
pub const DEFAULT_RUN_ID: &str = "run";

/// Generates a run id such as `wiki_2026_143015`.
///
/// # Example
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use corpusgate::config::{RunIdAuto, generate_run_id};
///
/// let at = Utc.with_ymd_and_hms(2026, 3, 1, 14, 30, 15).single().unwrap_or_default();
/// assert_eq!(generate_run_id(Some("wiki-en"), &RunIdAuto::default(), at), "wiki-en_2026_143015");
/// ```
#[must_use]
pub fn generate_run_id(first_source: Option<&str>, auto: &RunIdAuto, now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%d%H%M%S").to_string();
    let prefix: String = stamp.chars().take(auto.prefix_digits).collect();
    let skip = stamp.len().saturating_sub(auto.suffix_digits);
    let suffix: String = if auto.suffix_digits == 0 {
        String::new()
    } else {
        stamp.chars().skip(skip).collect()
    };

    let mut parts = Vec::with_capacity(3);
    if auto.include_input_name {
        parts.push(input_name(first_source));
    }
    parts.extend([prefix, suffix].into_iter().filter(|p| !p.is_empty()));
    if parts.is_empty() {
        DEFAULT_RUN_ID.to_string()
    } else {
        parts.join(&auto.separator)
    }
}

fn input_name(first_source: Option<&str>) -> String {
    let name: String = first_source
        .unwrap_or(DEFAULT_RUN_ID)
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if name.is_empty() { DEFAULT_RUN_ID.to_string() } else { name }
}

/// Explicit id if non-blank, else a generated one if enabled, else `run`.
#[must_use]
pub fn resolve_run_id(
    explicit: Option<&str>,
    auto: Option<&RunIdAuto>,
    first_source: Option<&str>,
) -> String {
    if let Some(id) = explicit.map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    match auto {
        Some(auto) if auto.enabled => generate_run_id(first_source, auto, Utc::now()),
        _ => DEFAULT_RUN_ID.to_string(),
    }
}

/// Substitutes the `{run_id}` placeholder in `out_dir`.
#[must_use]
pub fn resolve_out_dir(out_dir: &str, run_id: &str) -> PathBuf {
    PathBuf::from(out_dir.replace("{run_id}", run_id))
}
