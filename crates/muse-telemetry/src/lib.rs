//! Telemetry for muse
//!
//! Structured logging via the `tracing` ecosystem, with optional
//! OpenTelemetry metrics and trace export over OTLP

mod metadata;
pub mod metrics;

use std::time::Duration;

use muse_config::TelemetryConfig;
use muse_config::telemetry::exporters::{ExportProtocol, ExporterConfig};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

pub use opentelemetry::KeyValue;

/// Metric push interval when `[telemetry.metrics]` is absent
const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Guard that ensures proper cleanup of telemetry resources on drop
pub struct TelemetryGuard {
    meter_provider: Option<SdkMeterProvider>,
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Force flush all pending metrics immediately
    ///
    /// # Errors
    ///
    /// Returns an error if the meter provider fails to flush
    pub fn force_flush(&self) -> anyhow::Result<()> {
        if let Some(ref provider) = self.meter_provider {
            provider
                .force_flush()
                .map_err(|e| anyhow::anyhow!("failed to flush metrics: {e}"))?;
        }
        Ok(())
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.meter_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("failed to shutdown meter provider: {e}");
        }
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("failed to shutdown tracer provider: {e}");
        }
    }
}

/// Initialize telemetry from configuration
///
/// Always installs a `fmt` layer filtered by `log_filter`. When an OTLP
/// exporter is configured, metrics and traces are exported as well. The
/// returned guard must be held for the lifetime of the application.
///
/// # Errors
///
/// Returns an error if OTLP exporter initialization fails
pub fn init(config: Option<&TelemetryConfig>, log_filter: &str) -> anyhow::Result<TelemetryGuard> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let mut guard = TelemetryGuard {
        meter_provider: None,
        tracer_provider: None,
    };

    let Some(telemetry_config) = config.filter(|c| c.has_exporter()) else {
        tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        return Ok(guard);
    };

    let resource = metadata::build_resource(telemetry_config);

    if let Some(exporter) = metrics_exporter_config(telemetry_config) {
        let interval = telemetry_config
            .metrics
            .as_ref()
            .map_or(DEFAULT_EXPORT_INTERVAL, |m| m.export_interval);
        let meter_provider = init_metrics(exporter, interval, resource.clone())?;
        global::set_meter_provider(meter_provider.clone());
        guard.meter_provider = Some(meter_provider);
    }

    let otel_layer = match trace_exporter_config(telemetry_config) {
        Some(exporter) => {
            let tracer_provider = init_tracer(telemetry_config, exporter, resource)?;
            let tracer = tracer_provider.tracer("muse");
            global::set_tracer_provider(tracer_provider.clone());
            guard.tracer_provider = Some(tracer_provider);
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    Ok(guard)
}

fn metrics_exporter_config(config: &TelemetryConfig) -> Option<&ExporterConfig> {
    config
        .metrics
        .as_ref()
        .and_then(|m| m.exporter.as_ref())
        .or(config.exporter.as_ref())
}

fn trace_exporter_config(config: &TelemetryConfig) -> Option<&ExporterConfig> {
    config
        .tracing
        .as_ref()
        .and_then(|t| t.exporter.as_ref())
        .or(config.exporter.as_ref())
}

/// Initialize OTLP metrics export
fn init_metrics(
    exporter_config: &ExporterConfig,
    interval: Duration,
    resource: opentelemetry_sdk::Resource,
) -> anyhow::Result<SdkMeterProvider> {
    use opentelemetry_otlp::MetricExporter;
    use opentelemetry_sdk::metrics::PeriodicReader;

    let exporter = match exporter_config.protocol {
        ExportProtocol::Grpc => MetricExporter::builder()
            .with_tonic()
            .with_endpoint(exporter_config.endpoint.as_str())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build gRPC metrics exporter: {e}"))?,
        ExportProtocol::HttpProto => MetricExporter::builder()
            .with_http()
            .with_endpoint(exporter_config.endpoint.as_str())
            .with_headers(exporter_config.headers.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP metrics exporter: {e}"))?,
    };

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

/// Initialize OTLP trace export
fn init_tracer(
    config: &TelemetryConfig,
    exporter_config: &ExporterConfig,
    resource: opentelemetry_sdk::Resource,
) -> anyhow::Result<SdkTracerProvider> {
    use opentelemetry_otlp::SpanExporter;
    use opentelemetry_sdk::trace::Sampler;

    let exporter = match exporter_config.protocol {
        ExportProtocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(exporter_config.endpoint.as_str())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build gRPC span exporter: {e}"))?,
        ExportProtocol::HttpProto => SpanExporter::builder()
            .with_http()
            .with_endpoint(exporter_config.endpoint.as_str())
            .with_headers(exporter_config.headers.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP span exporter: {e}"))?,
    };

    let ratio = config.tracing.as_ref().map_or(1.0, |t| t.sample_ratio);

    let sampler = if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    };

    let sampler = if config.tracing.as_ref().is_none_or(|t| t.parent_based) {
        Sampler::ParentBased(Box::new(sampler))
    } else {
        sampler
    };

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(sampler)
        .with_batch_exporter(exporter)
        .build())
}
