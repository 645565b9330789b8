mod config;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Config;

use opentelemetry::{
    InstrumentationScope,
    metrics::{InstrumentProvider, Meter, MeterProvider},
};
use opentelemetry_sdk::error::OTelSdkResult;
use std::sync::Arc;
use tracing::info;

/// Extends `MeterProvider` with `force_flush`, so tests can assert on
/// recorded values without waiting for a periodic export tick.
pub trait MeterProviderWithExt: MeterProvider {
    fn force_flush(&self) -> OTelSdkResult;
}

pub type AnyMeterProvider = Arc<dyn MeterProviderWithExt + Send + Sync>;

impl MeterProviderWithExt for opentelemetry_sdk::metrics::SdkMeterProvider {
    fn force_flush(&self) -> OTelSdkResult {
        self.force_flush()
    }
}

/// Builds the process-wide meter provider. When an OTLP endpoint is
/// configured we still record into an in-process aggregator (wiring an actual
/// OTLP exporter is an infrastructure concern outside this core); when none
/// is configured every instrument is a no-op.
pub fn get_meter_provider(config: &Config) -> anyhow::Result<AnyMeterProvider> {
    if let Some(endpoint) = &config.endpoint {
        info!(%endpoint, "metrics endpoint configured; recording into an in-process aggregator");
        Ok(Arc::new(
            opentelemetry_sdk::metrics::SdkMeterProvider::builder().build(),
        ))
    } else {
        Ok(Arc::new(NoopMeterProvider::new()))
    }
}

/// A no-op instance of a `MeterProvider`, so call sites can avoid
/// conditional logic based on whether metrics are configured.
#[derive(Debug, Default)]
pub struct NoopMeterProvider {
    _private: (),
}

impl NoopMeterProvider {
    pub fn new() -> Self {
        NoopMeterProvider { _private: () }
    }
}

impl MeterProvider for NoopMeterProvider {
    fn meter_with_scope(&self, _scope: InstrumentationScope) -> Meter {
        Meter::new(Arc::new(NoopMeter::new()))
    }
}

impl MeterProviderWithExt for NoopMeterProvider {
    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopMeter {
    _private: (),
}

impl NoopMeter {
    pub fn new() -> Self {
        NoopMeter { _private: () }
    }
}

impl InstrumentProvider for NoopMeter {}
