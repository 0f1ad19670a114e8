//! OpenTelemetry observability bootstrap
//!
//! Sets up tracing, metrics and structured logs for a process that hosts an
//! rpcflow endpoint. The dispatch pipeline emits `tracing` spans and events and
//! records metrics on the global meter; this module decides where they go.
//!
//! Initialize once at startup, before building endpoints:
//!
//! ```rust,no_run
//! use rpcflow_core::ObservabilityConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ObservabilityConfig::new("orders-rpc")
//!         .with_endpoint("http://localhost:4317")
//!         .with_log_level("debug");
//!
//!     rpcflow_core::init_observability(config).expect("Failed to init observability");
//!
//!     // ... serve requests ...
//!
//!     rpcflow_core::shutdown_observability();
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector endpoint
//! - `RUST_LOG`: Log level filter (e.g., "info", "rpcflow_server=debug")

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, Tracer};
use opentelemetry_sdk::Resource;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Providers installed by [`init_observability`], kept for shutdown
static INSTALLED: Mutex<Option<Installed>> = Mutex::new(None);

struct Installed {
    tracer: Option<SdkTracerProvider>,
    meter: Option<SdkMeterProvider>,
}

/// Observability settings for a process hosting rpcflow endpoints
///
/// Defaults: service name "rpcflow", the crate version, the collector at
/// `$OTEL_EXPORTER_OTLP_ENDPOINT` (or "http://localhost:4317"), every
/// signal enabled with JSON log lines, all traces sampled, metrics exported
/// every 30 seconds, and `$RUST_LOG` (or "info") as the log filter.
///
/// ```rust
/// use rpcflow_core::ObservabilityConfig;
///
/// let custom = ObservabilityConfig::new("billing-rpc")
///     .with_endpoint("http://collector:4317")
///     .with_sample_ratio(0.25)
///     .with_metrics(false);
/// assert!(!custom.enable_metrics);
/// assert_eq!(custom.sample_ratio, 0.25);
/// ```
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub service_version: String,
    /// gRPC endpoint of the OTLP collector
    pub otlp_endpoint: String,
    pub enable_traces: bool,
    pub enable_metrics: bool,
    /// Emit local log lines
    pub enable_logs: bool,
    /// JSON rather than plain-text log lines
    pub json_logs: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Fraction of root spans exported, clamped to `0.0..=1.0`
    pub sample_ratio: f64,
    /// How often metrics are pushed to the collector
    pub metrics_interval: Duration,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "rpcflow".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_traces: true,
            enable_metrics: true,
            enable_logs: true,
            json_logs: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            sample_ratio: 1.0,
            metrics_interval: Duration::from_secs(30),
        }
    }
}

impl ObservabilityConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    pub fn with_logs(mut self, enable: bool) -> Self {
        self.enable_logs = enable;
        self
    }

    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Export only this fraction of new traces; children follow their parent
    pub fn with_sample_ratio(mut self, ratio: f64) -> Self {
        self.sample_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    fn sampler(&self) -> Sampler {
        if self.sample_ratio >= 1.0 {
            Sampler::AlwaysOn
        } else {
            Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(self.sample_ratio)))
        }
    }

    fn resource(&self) -> Resource {
        use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};

        Resource::builder_empty()
            .with_attributes([
                KeyValue::new(SERVICE_NAME, self.service_name.clone()),
                KeyValue::new(SERVICE_VERSION, self.service_version.clone()),
            ])
            .build()
    }
}

/// Installs the OTLP providers and the global `tracing` subscriber
///
/// Call this once per process. A second call fails because the global
/// subscriber is already installed.
///
/// # Errors
///
/// Returns an error when an exporter cannot be built, the log filter is
/// invalid, or a global subscriber is already set.
pub fn init_observability(config: ObservabilityConfig) -> Result<(), BoxError> {
    let tracer_provider = config
        .enable_traces
        .then(|| tracer_provider(&config))
        .transpose()?;
    let meter_provider = config
        .enable_metrics
        .then(|| meter_provider(&config))
        .transpose()?;

    let tracer = tracer_provider.as_ref().map(|provider| {
        use opentelemetry::trace::TracerProvider as _;
        provider.tracer(config.service_name.clone())
    });
    install_subscriber(&config, tracer)?;

    if let Some(provider) = &tracer_provider {
        global::set_tracer_provider(provider.clone());
    }
    if let Some(provider) = &meter_provider {
        global::set_meter_provider(provider.clone());
    }
    if let Ok(mut installed) = INSTALLED.lock() {
        *installed = Some(Installed {
            tracer: tracer_provider,
            meter: meter_provider,
        });
    }

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        sample_ratio = config.sample_ratio,
        metrics = config.enable_metrics,
        logs = config.enable_logs,
        "Observability initialized"
    );

    Ok(())
}

fn tracer_provider(config: &ObservabilityConfig) -> Result<SdkTracerProvider, BoxError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(config.sampler())
        .build())
}

fn meter_provider(config: &ObservabilityConfig) -> Result<SdkMeterProvider, BoxError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(config.metrics_interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build())
}

fn install_subscriber(config: &ObservabilityConfig, tracer: Option<Tracer>) -> Result<(), BoxError> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;
    let otel = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let logs = config.enable_logs;
    let json = (logs && config.json_logs).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .json()
    });
    let text = (logs && !config.json_logs).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(otel)
        .with(filter)
        .with(json)
        .with(text)
        .try_init()?;
    Ok(())
}

/// Flushes pending spans and metrics and shuts the providers down
///
/// Safe to call more than once, or without a prior [`init_observability`].
pub fn shutdown_observability() {
    let installed = match INSTALLED.lock() {
        Ok(mut guard) => guard.take(),
        Err(_) => None,
    };
    let Some(installed) = installed else {
        return;
    };

    if let Some(provider) = installed.tracer {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "Tracer provider shutdown failed");
        }
    }
    if let Some(provider) = installed.meter {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "Meter provider shutdown failed");
        }
    }
    tracing::info!("Observability shut down");
}
