//! Console logging plus optional OpenTelemetry export.
//!
//! - `tracing`: a span per dump cycle, exported when `stdout` is also on.
//! - `metrics`: per-phase durations, uploaded bytes and cycle counts.
//! - `stdout`: stdout exporter for whichever of the two is enabled.

#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics::SdkMeterProvider;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::KeyValue;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace::SdkTracerProvider;

const SERVICE: &str = "relaydump";

pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    tracer_provider: SdkTracerProvider,
    #[cfg(feature = "metrics")]
    meter_provider: SdkMeterProvider,
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true),
        );

    #[cfg(feature = "tracing")]
    let tracer_provider = {
        let builder = SdkTracerProvider::builder().with_resource(resource());
        #[cfg(feature = "stdout")]
        let builder = builder.with_batch_exporter(opentelemetry_stdout::SpanExporter::default());
        builder.build()
    };
    #[cfg(feature = "tracing")]
    let registry = registry.with(
        tracing_opentelemetry::layer()
            .with_tracer(tracer_provider.tracer(SERVICE))
            .with_error_records_to_exceptions(true),
    );

    #[cfg(feature = "metrics")]
    let meter_provider = {
        let builder = SdkMeterProvider::builder().with_resource(resource());
        #[cfg(feature = "stdout")]
        let builder = builder.with_reader(
            opentelemetry_sdk::metrics::PeriodicReader::builder(
                opentelemetry_stdout::MetricExporter::default(),
            )
            .with_interval(std::time::Duration::from_secs(5))
            .build(),
        );
        let provider = builder.build();
        opentelemetry::global::set_meter_provider(provider.clone());
        init_metric_handles();
        provider
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// Flushes and shuts down the exporters. Errors go to stderr because the
/// subscriber may already be gone.
pub fn shutdown_telemetry(_providers: TelemetryProviders) {
    #[cfg(feature = "tracing")]
    {
        if let Err(err) = _providers.tracer_provider.shutdown() {
            eprintln!("Error shutting down tracer: {err:#?}");
        }
    }

    #[cfg(feature = "metrics")]
    {
        if let Err(err) = _providers.meter_provider.shutdown() {
            eprintln!("Error shutting down meter: {err:#?}");
        }
    }
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> opentelemetry_sdk::Resource {
    opentelemetry_sdk::Resource::builder()
        .with_service_name(SERVICE)
        .with_attribute(KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ))
        .build()
}

#[cfg(feature = "metrics")]
static PHASE_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static UPLOADED_BYTES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CYCLES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CYCLE_FAILURES: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles() {
    let meter = opentelemetry::global::meter(SERVICE);
    let _ = PHASE_DURATION_MS.set(
        meter
            .f64_histogram("phase_duration")
            .with_unit("ms")
            .with_description("Wall time of one dump cycle phase on one rank")
            .build(),
    );
    let _ = UPLOADED_BYTES.set(
        meter
            .u64_counter("uploaded_bytes")
            .with_unit("By")
            .with_description("File image bytes accepted by the object store")
            .build(),
    );
    let _ = CYCLES.set(meter.u64_counter("cycles").build());
    let _ = CYCLE_FAILURES.set(meter.u64_counter("cycle_failures").build());
}

#[cfg(feature = "metrics")]
pub fn record_phase_duration(phase: &'static str, duration_ms: f64) {
    if let Some(histogram) = PHASE_DURATION_MS.get() {
        histogram.record(duration_ms, &[KeyValue::new("phase", phase)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_phase_duration(_phase: &'static str, _duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_uploaded_bytes(bytes: u64) {
    if let Some(counter) = UPLOADED_BYTES.get() {
        counter.add(bytes, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_uploaded_bytes(_bytes: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_cycles() {
    if let Some(counter) = CYCLES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_cycles() {}

#[cfg(feature = "metrics")]
pub fn increment_cycle_failures() {
    if let Some(counter) = CYCLE_FAILURES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_cycle_failures() {}
