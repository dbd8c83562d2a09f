// Telemetry Module
//
// Logging and tracing setup for processes embedding a kubecc component.
// Console output goes through tracing-subscriber with an EnvFilter; spans
// are exported over OTLP when the `otlp` feature is on and an endpoint is
// configured. Also holds the span names used on the execution paths.

use crate::context::Component;
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

// ============================================================================
// Span Names
// ============================================================================

/// Span names used across the execution paths
pub mod spans {
    /// Compile on the originating host
    pub const RUN_LOCAL: &str = "run-local";
    /// Preprocess locally and send to a remote agent
    pub const RUN_REMOTE: &str = "run-remote";
    /// Compile preprocessed source on behalf of a remote consumer
    pub const RUN_RECV: &str = "run-recv";
    /// Local preprocessing step of a remote run
    pub const PREPROCESS: &str = "preprocess";
}

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Logging and tracing settings for one kubecc component
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Reported as `service.name` on exported spans, e.g. `kubecc-consumerd`
    pub service_name: String,
    pub service_version: String,
    /// Collector endpoint; spans are only exported with the `otlp` feature
    pub otlp_endpoint: Option<String>,
    pub enable_console: bool,
    /// `EnvFilter` directives, e.g. `"info,kubecc_run=debug"`
    pub log_filter: String,
}

impl TelemetryConfig {
    pub fn for_component(component: Component) -> Self {
        Self {
            service_name: format!("kubecc-{component}"),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: None,
            enable_console: true,
            log_filter: "info".to_string(),
        }
    }

    /// Reads overrides from the process environment.
    ///
    /// - `KUBECC_LOG_LEVEL`, then `RUST_LOG`: log filter
    /// - `KUBECC_TRACING_ENDPOINT`, then `OTEL_EXPORTER_OTLP_ENDPOINT`: collector
    /// - `KUBECC_LOG_CONSOLE=false`: disables console output
    pub fn from_env(component: Component) -> Self {
        Self::from_lookup(component, |name| std::env::var(name).ok())
    }

    pub fn from_lookup(component: Component, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::for_component(component);
        if let Some(filter) = lookup("KUBECC_LOG_LEVEL").or_else(|| lookup("RUST_LOG")) {
            config.log_filter = filter;
        }
        config.otlp_endpoint = lookup("KUBECC_TRACING_ENDPOINT")
            .or_else(|| lookup("OTEL_EXPORTER_OTLP_ENDPOINT"))
            .filter(|endpoint| !endpoint.is_empty());
        if let Some(console) = lookup("KUBECC_LOG_CONSOLE") {
            config.enable_console = !matches!(console.trim(), "0" | "false" | "no");
        }
        config
    }

    pub fn with_otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log_filter).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Guard that shuts down the tracer provider when dropped
pub struct TelemetryGuard {
    #[cfg(feature = "otlp")]
    _provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

#[cfg(feature = "otlp")]
impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self._provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("kubecc: failed to flush spans: {e:?}");
            }
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global subscriber.
///
/// Keep the returned guard alive for the lifetime of the process; dropping
/// it flushes pending spans. Panics if a global subscriber is already set.
///
/// ```no_run
/// use kubecc_core::telemetry::{init_telemetry, TelemetryConfig};
/// use kubecc_core::Component;
///
/// let _telemetry = init_telemetry(TelemetryConfig::from_env(Component::Agent));
/// tracing::info!("agent starting");
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.enable_console {
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(config.env_filter())
                .boxed(),
        );
    }

    let (otel_layer, guard, otel_status) = otlp_layer(&config);
    layers.extend(otel_layer);

    tracing_subscriber::registry().with(layers).init();

    match otel_status {
        Some(Ok(endpoint)) => {
            tracing::info!(service = %config.service_name, %endpoint, "Exporting spans");
        }
        Some(Err(e)) => tracing::warn!(error = %e, "Span export disabled"),
        None => tracing::debug!(service = %config.service_name, "No tracing endpoint configured"),
    }

    guard
}

type OtlpStatus = Option<Result<String, String>>;

#[cfg(feature = "otlp")]
fn otlp_layer(config: &TelemetryConfig) -> (Option<BoxedLayer>, TelemetryGuard, OtlpStatus) {
    let Some(endpoint) = &config.otlp_endpoint else {
        return (None, TelemetryGuard { _provider: None }, None);
    };
    use opentelemetry::trace::TracerProvider as _;

    match otlp::build_provider(endpoint, config) {
        Ok(provider) => (
            Some(
                tracing_opentelemetry::layer()
                    .with_tracer(provider.tracer(config.service_name.clone()))
                    .boxed(),
            ),
            TelemetryGuard {
                _provider: Some(provider),
            },
            Some(Ok(endpoint.clone())),
        ),
        Err(e) => (
            None,
            TelemetryGuard { _provider: None },
            Some(Err(e.to_string())),
        ),
    }
}

#[cfg(not(feature = "otlp"))]
fn otlp_layer(config: &TelemetryConfig) -> (Option<BoxedLayer>, TelemetryGuard, OtlpStatus) {
    let status = config
        .otlp_endpoint
        .as_ref()
        .map(|_| Err("built without the `otlp` feature".to_string()));
    (None, TelemetryGuard {}, status)
}

#[cfg(feature = "otlp")]
mod otlp {
    use super::TelemetryConfig;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};
    use opentelemetry_sdk::{
        trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
        Resource,
    };
    use std::time::Duration;

    pub(super) fn build_provider(
        endpoint: &str,
        config: &TelemetryConfig,
    ) -> Result<SdkTracerProvider, Box<dyn std::error::Error + Send + Sync>> {
        let resource = Resource::builder()
            .with_attributes([
                KeyValue::new("service.name", config.service_name.clone()),
                KeyValue::new("service.version", config.service_version.clone()),
            ])
            .build();

        let exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(Duration::from_secs(10))
            .build()?;

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_sampler(Sampler::AlwaysOn)
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource)
            .build();

        Ok(provider)
    }
}
