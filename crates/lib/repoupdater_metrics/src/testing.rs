use crate::AnyMeterProvider;
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, data::ResourceMetrics};
use std::sync::Arc;

/// A test metrics environment that collects recorded instruments in memory
/// instead of shipping them anywhere, for assertions in unit tests.
pub struct TestMetrics {
    exporter: InMemoryMetricExporter,
    provider: AnyMeterProvider,
}

impl TestMetrics {
    pub fn new() -> Self {
        let metric_exporter = InMemoryMetricExporter::default();

        Self {
            exporter: metric_exporter.clone(),
            provider: Arc::new(
                opentelemetry_sdk::metrics::SdkMeterProvider::builder()
                    .with_reader(PeriodicReader::builder(metric_exporter.clone()).build())
                    .build(),
            ),
        }
    }

    pub fn collected_metrics(&self) -> Vec<ResourceMetrics> {
        self.provider.force_flush().unwrap();
        self.exporter.get_finished_metrics().unwrap()
    }

    pub fn provider(&self) -> &AnyMeterProvider {
        &self.provider
    }
}

impl Default for TestMetrics {
    fn default() -> Self {
        Self::new()
    }
}
