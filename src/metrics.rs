use anyhow::{anyhow, Context, Result};
use opentelemetry::metrics::MeterProvider;
use opentelemetry::KeyValue;
use opentelemetry_sdk::{metrics::SdkMeterProvider, Resource};
use prometheus::Registry;
use std::sync::{Arc, OnceLock};

pub static METRICS: OnceLock<Arc<Metrics>> = OnceLock::new();

pub fn init_metrics(namespace: &str) -> Result<()> {
    let metrics = Arc::new(Metrics::new(namespace)?);

    METRICS
        .set(metrics)
        .map_err(|_| anyhow!("Metric client is already initialized"))?;

    Ok(())
}

pub fn get_metrics() -> Arc<Metrics> {
    let metrics = METRICS.get().expect("Metrics to be initialized");
    metrics.clone()
}

/// Like [`get_metrics`] but tolerant of metrics never being initialized
/// (init-only runs, tests).
pub fn try_get_metrics() -> Option<Arc<Metrics>> {
    METRICS.get().cloned()
}

#[derive(Debug)]
pub struct Metrics {
    pub registry: Registry,
    pub chains_tracked: opentelemetry::metrics::Gauge<u64>,
    pub chains_detected: opentelemetry::metrics::Counter<u64>,
    pub scan_cycles: opentelemetry::metrics::Counter<u64>,
    pub scan_failures: opentelemetry::metrics::Counter<u64>,
    #[allow(dead_code)]
    provider: SdkMeterProvider,
}

impl Metrics {
    pub fn new(service: &str) -> Result<Self> {
        let registry = Registry::new();

        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .context("Creating metrics exporter")?;

        let provider = SdkMeterProvider::builder()
            .with_reader(exporter)
            .with_resource(Resource::new(vec![KeyValue::new(
                "service.name",
                service.to_string(),
            )]))
            .build();

        let meter = provider.meter(service.to_string());

        Ok(Self {
            registry,
            provider,
            chains_tracked: meter
                .u64_gauge("chains_tracked")
                .with_description("Total number of chains currently stored in the database.")
                .init(),
            chains_detected: meter
                .u64_counter("chains_detected")
                .with_description("Number of new chains detected since startup.")
                .init(),
            scan_cycles: meter
                .u64_counter("scan_cycles")
                .with_description("Number of scan cycles started since startup.")
                .init(),
            scan_failures: meter
                .u64_counter("scan_failures")
                .with_description("Number of scan cycles that failed on fetch or storage.")
                .init(),
        })
    }
}
