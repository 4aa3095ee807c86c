pub mod exporters;

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use self::exporters::ExporterConfig;

/// Telemetry configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Service name for telemetry metadata
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// `tracing` filter directive, e.g. `info,muse_imagegen=debug`
    #[serde(default)]
    pub log_filter: Option<String>,
    /// Additional resource attributes
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
    /// Default exporter configuration (shared by tracing and metrics)
    #[serde(default)]
    pub exporter: Option<ExporterConfig>,
    /// Span export settings
    #[serde(default)]
    pub tracing: Option<TraceConfig>,
    /// Metric export settings
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

/// `[telemetry.tracing]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceConfig {
    /// Fraction of root spans kept, clamped to `0.0..=1.0`
    #[serde(default = "default_sample_ratio")]
    pub sample_ratio: f64,
    /// Follow the upstream span's sampling decision when there is one
    #[serde(default = "default_parent_based")]
    pub parent_based: bool,
    /// Span exporter, falls back to `telemetry.exporter`
    #[serde(default)]
    pub exporter: Option<ExporterConfig>,
}

/// `[telemetry.metrics]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Time between pushes of the `muse.*` instruments
    #[serde(default = "default_export_interval", deserialize_with = "crate::duration::deserialize")]
    pub export_interval: Duration,
    /// Metric exporter, falls back to `telemetry.exporter`
    #[serde(default)]
    pub exporter: Option<ExporterConfig>,
}

impl TelemetryConfig {
    /// Whether any OTLP exporter is configured
    pub fn has_exporter(&self) -> bool {
        self.exporter.is_some()
            || self.tracing.as_ref().is_some_and(|t| t.exporter.is_some())
            || self.metrics.as_ref().is_some_and(|m| m.exporter.is_some())
    }
}

fn default_service_name() -> String {
    "muse".to_string()
}

#[allow(clippy::missing_const_for_fn)]
fn default_sample_ratio() -> f64 {
    1.0
}

#[allow(clippy::missing_const_for_fn)]
fn default_parent_based() -> bool {
    true
}

#[allow(clippy::missing_const_for_fn)]
fn default_export_interval() -> Duration {
    Duration::from_secs(30)
}
