use repoupdater_metrics::AnyMeterProvider;
use opentelemetry::metrics::Counter;

/// Counters exported for the scheduler (spec.md §5: queue depth and
/// in-flight count are operationally visible state), grounded on the
/// teacher's `BuildQueueMetrics` shape: a handful of named counters built
/// once from the process meter provider, rather than ad hoc `tracing`
/// fields.
#[derive(Debug)]
pub struct SchedulerMetrics {
    pub(crate) scheduled_total: Counter<u64>,
    pub(crate) update_success_total: Counter<u64>,
    pub(crate) update_failure_total: Counter<u64>,
}

impl SchedulerMetrics {
    pub fn new(meter_provider: &AnyMeterProvider) -> Self {
        let meter = meter_provider.meter("repo_updater.scheduler");
        const PREFIX: &str = "repoupdater.scheduler";
        Self {
            scheduled_total: meter.u64_counter(format!("{PREFIX}.scheduled_total")).with_unit("1").build(),
            update_success_total: meter
                .u64_counter(format!("{PREFIX}.update_success_total"))
                .with_unit("1")
                .build(),
            update_failure_total: meter
                .u64_counter(format!("{PREFIX}.update_failure_total"))
                .with_unit("1")
                .build(),
        }
    }
}
