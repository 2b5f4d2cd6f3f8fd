//! Prometheus metrics.

use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::sync::OnceLock;

/// `[metrics]` section of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Whether to install the Prometheus recorder.
    pub enabled: Option<bool>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsConfig {
    /// Whether metrics are recorded.
    pub enabled: bool,
}

impl MetricsConfig {
    /// Builds metrics configuration from config settings with env overrides.
    #[must_use]
    pub fn from_settings(settings: Option<&MetricsSettings>) -> Self {
        let mut enabled = settings.and_then(|s| s.enabled).unwrap_or(false);
        if let Some(v) = std::env::var("CORPUSGATE_METRICS_ENABLED")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            enabled = v;
        }
        Self { enabled }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

static GLOBAL_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder for the process.
///
/// Returns `None` when metrics are disabled. Installing twice returns the
/// handle of the first installation.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if another recorder is already installed.
pub fn install_prometheus(config: &MetricsConfig) -> Result<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }
    if let Some(handle) = GLOBAL_HANDLE.get() {
        return Ok(Some(handle.clone()));
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::operation("metrics_recorder_install", e))?;
    let _ = GLOBAL_HANDLE.set(handle.clone());
    Ok(Some(handle))
}

/// Renders the current metrics in Prometheus text format, if installed.
#[must_use]
pub fn render() -> Option<String> {
    GLOBAL_HANDLE.get().map(PrometheusHandle::render)
}
