//! Logging, tracing and metrics for the sidecar.
//!
//! Events go to a fmt layer filtered by `RUST_LOG` (default `info`). Spans are
//! also exported over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` is set. Request
//! spans join the edge server's trace through W3C `traceparent` headers.
//! Metrics are rendered in Prometheus text format on a separate listener.
//!
//! Every initializer here is idempotent so tests may call it repeatedly.
use anyhow::Context;
use axum::Router;
use axum::http::HeaderMap;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{SdkTracerProvider, Tracer};
use std::net::SocketAddr;
use std::sync::{Once, OnceLock};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_LOG_FILTER: &str = "info";
const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

static PROPAGATOR: Once = Once::new();
static TRACING: Once = Once::new();
static METRICS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the tracing subscriber and the Prometheus recorder.
pub fn init_observability(service_name: &str) -> anyhow::Result<PrometheusHandle> {
    install_propagator();
    TRACING.call_once(|| init_tracing(service_name));
    metrics_handle()
}

fn install_propagator() {
    PROPAGATOR.call_once(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

fn init_tracing(service_name: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (otel_layer, otlp_error) = match otlp_tracer(service_name) {
        Ok(tracer) => (
            tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer)),
            None,
        ),
        Err(err) => (None, Some(err)),
    };
    // A subscriber installed earlier (by another test) stays in place.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .try_init();
    if let Some(err) = otlp_error {
        tracing::warn!(error = %format!("{err:#}"), "otlp span export disabled");
    }
}

fn otlp_tracer(service_name: &str) -> anyhow::Result<Option<Tracer>> {
    if std::env::var_os(OTLP_ENDPOINT_ENV).is_none() {
        return Ok(None);
    }
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .context("build otlp span exporter")?;
    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder_empty()
                .with_attributes(resource_attributes(service_name))
                .build(),
        )
        .build();
    let tracer = provider.tracer(service_name.to_string());
    global::set_tracer_provider(provider);
    Ok(Some(tracer))
}

fn resource_attributes(service_name: &str) -> Vec<KeyValue> {
    let instance = env_value("GATEKEEPER_INSTANCE_ID").or_else(|| env_value("HOSTNAME"));
    let environment = env_value("DEPLOYMENT_ENVIRONMENT");
    std::iter::once(KeyValue::new("service.name", service_name.to_string()))
        .chain(instance.map(|value| KeyValue::new("service.instance.id", value)))
        .chain(environment.map(|value| KeyValue::new("deployment.environment", value)))
        .collect()
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Parent context carried by the edge server's sub-request, if any.
pub fn trace_context_from_headers(headers: &HeaderMap) -> opentelemetry::Context {
    install_propagator();
    global::get_text_map_propagator(|propagator| propagator.extract(&SubRequestHeaders(headers)))
}

struct SubRequestHeaders<'a>(&'a HeaderMap);

impl Extractor for SubRequestHeaders<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.to_str().ok()
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Serve `GET /metrics` on `addr` until the task is aborted.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics listening");
    axum::serve(listener, metrics_router(handle).into_make_service()).await
}

fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    )
}

fn metrics_handle() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = METRICS.get() {
        return Ok(handle.clone());
    }
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    match metrics::set_global_recorder(recorder) {
        Ok(()) => {
            describe_metrics();
            Ok(METRICS.get_or_init(|| handle).clone())
        }
        // A concurrent caller may have won the race.
        Err(err) => METRICS
            .get()
            .cloned()
            .with_context(|| format!("install metrics recorder: {err}")),
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        "gatekeeper_decisions_total",
        "Authorization decisions by outcome and reason code"
    );
    metrics::describe_counter!(
        "gatekeeper_store_lookups_total",
        "Identity store membership lookups by result"
    );
    metrics::describe_histogram!(
        "gatekeeper_store_lookup_seconds",
        metrics::Unit::Seconds,
        "Identity store membership lookup latency"
    );
}
