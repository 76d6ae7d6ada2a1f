use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime::Tokio, trace::Config as TraceConfig, trace::Tracer, Resource};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "ups-aggregator";
const DEFAULT_FILTER: &str = "info,ups_aggregator=info";

/// Installs the global subscriber: env filter plus fmt output, and an OTLP
/// span exporter when `otlp_endpoint` is set.
pub fn init_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);
    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    match otlp_endpoint.and_then(otlp_traces_endpoint) {
        Some(endpoint) => {
            let tracer = otlp_tracer(&endpoint)?;
            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
            tracing::info!(endpoint = %endpoint, "exporting spans over OTLP");
        }
        None => registry.try_init()?,
    }
    Ok(())
}

/// Flushes any spans still queued for export.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}

fn otlp_tracer(endpoint: &str) -> Result<Tracer> {
    let exporter = opentelemetry_otlp::new_exporter()
        .http()
        .with_endpoint(endpoint);
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            TraceConfig::default()
                .with_resource(Resource::new(vec![KeyValue::new("service.name", SERVICE_NAME)])),
        )
        .install_batch(Tokio)
        .with_context(|| format!("failed to install OTLP exporter for {endpoint}"))
}

/// The HTTP exporter posts to the full traces URL, so a bare collector base
/// such as `http://otel:4318` gains `/v1/traces`. Blank input disables export.
pub fn otlp_traces_endpoint(endpoint: &str) -> Option<String> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("/v1/traces") {
        return Some(trimmed.to_string());
    }
    Some(format!("{}/v1/traces", trimmed.trim_end_matches('/')))
}
