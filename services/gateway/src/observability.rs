//! Tracing and metrics setup for the gateway process.
//!
//! Logs go through a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
//! An OTLP span exporter is attached when one can be built; otherwise logging stays local.
//! Metrics are recorded through the `metrics` facade into a Prometheus recorder that
//! [`serve_metrics`] exposes over HTTP next to liveness and readiness probes.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace as sdktrace;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global tracing subscriber and Prometheus recorder.
///
/// Returns the handle used to render the `/metrics` page.
pub fn init_observability(service_name: &str) -> Result<PrometheusHandle> {
    global::set_text_map_propagator(opentelemetry_sdk::propagation::TraceContextPropagator::new());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match build_tracer(service_name) {
        Some(tracer) => {
            init_subscriber(registry.with(tracing_opentelemetry::layer().with_tracer(tracer)))
        }
        None => init_subscriber(registry),
    }

    install_metrics_recorder()
}

// Best-effort: a missing collector must not keep the gateway from starting.
// The batch pipeline also registers its provider globally.
fn build_tracer(service_name: &str) -> Option<sdktrace::Tracer> {
    let resource = Resource::new(resource_attributes(service_name));
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(sdktrace::Config::default().with_resource(resource))
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .ok()
}

fn resource_attributes(service_name: &str) -> Vec<KeyValue> {
    let mut attrs = vec![KeyValue::new("service.name", service_name.to_string())];
    if let Ok(value) =
        std::env::var("SLUICE_SERVICE_INSTANCE_ID").or_else(|_| std::env::var("HOSTNAME"))
    {
        attrs.push(KeyValue::new("service.instance.id", value));
    }
    if let Ok(value) = std::env::var("SLUICE_CLUSTER") {
        attrs.push(KeyValue::new("sluice.cluster", value));
    }
    if let Ok(value) = std::env::var("DEPLOYMENT_ENVIRONMENT") {
        attrs.push(KeyValue::new("deployment.environment", value));
    }
    attrs
}

/// Serves `/metrics`, `/live` and `/ready` until the listener fails.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, metrics_router(handle).into_make_service()).await
}

fn metrics_router(handle: PrometheusHandle) -> axum::Router {
    axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/live", axum::routing::get(|| async { "ok" }))
        .route("/ready", axum::routing::get(|| async { "ok" }))
}

// The recorder is process-global; later calls reuse the first handle.
fn install_metrics_recorder() -> Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("install metrics recorder")?;
    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

fn init_subscriber<S>(subscriber: S)
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    // A subscriber may already be installed by an embedding process or another test.
    let _ = subscriber.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn unset(key: &'static str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => unsafe {
                    std::env::set_var(self.key, value);
                },
                None => unsafe {
                    std::env::remove_var(self.key);
                },
            }
        }
    }

    #[test]
    #[serial]
    fn resource_attributes_include_optional_env() {
        let _g1 = EnvGuard::set("SLUICE_SERVICE_INSTANCE_ID", "gw-1");
        let _g2 = EnvGuard::set("SLUICE_CLUSTER", "dc1");
        let _g3 = EnvGuard::set("DEPLOYMENT_ENVIRONMENT", "prod");
        let attrs = resource_attributes("svc");
        let keys: Vec<&str> = attrs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "service.name",
                "service.instance.id",
                "sluice.cluster",
                "deployment.environment"
            ]
        );
    }

    #[test]
    #[serial]
    fn resource_attributes_minimal_when_env_missing() {
        let _g1 = EnvGuard::unset("SLUICE_SERVICE_INSTANCE_ID");
        let _g2 = EnvGuard::unset("HOSTNAME");
        let _g3 = EnvGuard::unset("SLUICE_CLUSTER");
        let _g4 = EnvGuard::unset("DEPLOYMENT_ENVIRONMENT");
        let attrs = resource_attributes("svc");
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].key.as_str(), "service.name");
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn otlp_tracer_feeds_the_tracing_layer() {
        let tracer = build_tracer("sluice-gateway-test").expect("otlp pipeline");
        let subscriber =
            tracing_subscriber::registry().with(tracing_opentelemetry::layer().with_tracer(tracer));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info_span!("write_session", session_id = 1).in_scope(|| {
                tracing::info!("span recorded through the otlp layer");
            });
        });
    }

    #[tokio::test]
    #[serial]
    async fn metrics_endpoints_respond() {
        let handle = init_observability("sluice-gateway-test").expect("observability");
        metrics::counter!("sluice_observability_test_total").increment(1);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, metrics_router(handle).into_make_service()).await;
        });

        let body = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .expect("metrics")
            .text()
            .await
            .expect("body");
        assert!(body.contains("sluice_observability_test_total"));
        for path in ["live", "ready"] {
            let response = reqwest::get(format!("http://{addr}/{path}"))
                .await
                .expect("probe");
            assert_eq!(response.status(), 200);
            assert_eq!(response.text().await.expect("body"), "ok");
        }
    }
}
