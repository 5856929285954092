//! Logging and metric registration for the folio binary.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the process-wide subscriber. `RUST_LOG` refines the configured
/// level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let output = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(output)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))
}

enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// Every metric folio emits, with its unit and help text.
const METRICS: &[(MetricKind, &str, Unit, &str)] = &[
    (
        MetricKind::Counter,
        "folio_cache_hit_total",
        Unit::Count,
        "Catalog cache hits, by family.",
    ),
    (
        MetricKind::Counter,
        "folio_cache_miss_total",
        Unit::Count,
        "Catalog cache misses (absent or expired), by family.",
    ),
    (
        MetricKind::Counter,
        "folio_cache_evict_total",
        Unit::Count,
        "Entries dropped to stay within family capacity, by family.",
    ),
    (
        MetricKind::Gauge,
        "folio_cache_event_queue_len",
        Unit::Count,
        "Invalidation events waiting for the fan-out consumer.",
    ),
    (
        MetricKind::Counter,
        "folio_cache_rewarm_total",
        Unit::Count,
        "Keys re-issued after a purge, by family.",
    ),
    (
        MetricKind::Histogram,
        "folio_cache_fanout_ms",
        Unit::Milliseconds,
        "Time to purge and rewarm one event batch, by policy.",
    ),
    (
        MetricKind::Counter,
        "folio_resize_total",
        Unit::Count,
        "Derived image requests, by outcome.",
    ),
];

/// Register metric descriptions with the installed recorder, once per process.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        for (kind, name, unit, help) in METRICS {
            match kind {
                MetricKind::Counter => describe_counter!(*name, *unit, *help),
                MetricKind::Gauge => describe_gauge!(*name, *unit, *help),
                MetricKind::Histogram => describe_histogram!(*name, *unit, *help),
            }
        }
    });
}
