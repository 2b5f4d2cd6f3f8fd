//! Structured logging configuration.

use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(crate::Error::Config(format!(
                "unknown log format '{other}' (expected pretty or json)"
            ))),
        }
    }
}

/// `[logging]` section of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `info` or `corpusgate=debug`.
    pub level: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Optional log file; stderr when unset.
    pub file: Option<String>,
}

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Event filter.
    pub filter: EnvFilter,
    /// Output format.
    pub format: LogFormat,
    /// Log file, if any.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds the configuration from environment variables only.
    #[must_use]
    pub fn from_env(verbose: bool) -> Self {
        Self::from_settings(None, verbose)
    }

    /// Builds the configuration from file settings with env overrides.
    ///
    /// The filter comes from `CORPUSGATE_LOG`, then `RUST_LOG`, then the file,
    /// then `debug` when verbose or `info` otherwise. `CORPUSGATE_LOG_FORMAT`
    /// and `CORPUSGATE_LOG_FILE` override the other two settings.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let default_level = if verbose { "debug" } else { "info" };
        let directive = env_var("CORPUSGATE_LOG")
            .or_else(|| env_var("RUST_LOG"))
            .or_else(|| settings.and_then(|s| s.level.clone()))
            .unwrap_or_else(|| default_level.to_string());
        let filter =
            EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(default_level));

        let format = env_var("CORPUSGATE_LOG_FORMAT")
            .or_else(|| settings.and_then(|s| s.format.clone()))
            .and_then(|f| f.parse().ok())
            .unwrap_or_default();
        let file = env_var("CORPUSGATE_LOG_FILE")
            .or_else(|| settings.and_then(|s| s.file.clone()))
            .map(PathBuf::from);

        Self {
            filter,
            format,
            file,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().ok(), Some(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>().ok(), Some(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
