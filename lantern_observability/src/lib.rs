//! Telemetry bootstrap for the lantern services.
//!
//! Provides the [`meter`] accessor used by every crate that records metrics,
//! a pull-based [`MetricsExporter`] that embedders (and tests) can collect
//! from, and [`init_observability`] to wire up logging and the global meter
//! provider in one call.

use std::sync::{Arc, Weak};
use std::time::Duration;

use opentelemetry::global;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::{
    InstrumentKind, ManualReader, MeterProviderBuilder, Pipeline, Temporality,
    data::ResourceMetrics, reader::MetricReader,
};
use snafu::{ResultExt, Snafu};
use tracing::Subscriber;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, prelude::*, registry::LookupSpan};

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter},
};

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum ObservabilityError {
    #[snafu(display("failed to install the tracing subscriber"))]
    Subscriber { source: TryInitError },
}

/// Returns a meter for the given instrumentation scope.
pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

/// Pull-based handle on the workspace's instruments.
///
/// Keep a clone of the exporter passed to [`init_observability`] and call
/// [`MetricsExporter::collect`] whenever a snapshot of the indexer's
/// counters and latency histograms is wanted; there is no background export
/// pipeline, the embedder owns the cadence.
#[derive(Clone, Debug)]
pub struct MetricsExporter {
    reader: Arc<ManualReader>,
}

impl Default for MetricsExporter {
    fn default() -> Self {
        Self {
            reader: Arc::new(ManualReader::builder().build()),
        }
    }
}

// The meter provider only accepts readers, so the pull handle has to wear
// the full trait; everything besides `collect` is plumbing on behalf of the
// SDK pipeline.
impl MetricReader for MetricsExporter {
    fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult {
        self.reader.collect(rm)
    }

    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        self.reader.register_pipeline(pipeline);
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.reader.force_flush()
    }

    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        self.reader.shutdown_with_timeout(timeout)
    }

    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        self.reader.temporality(kind)
    }
}

/// Installs the tracing subscriber and the global meter provider.
///
/// Logging goes to stdout, filtered by `RUST_LOG` (default `info`) and
/// formatted as JSON when `RUST_LOG_FORMAT=json`. Metrics are served through
/// the given exporter, which the embedder collects at its own cadence.
pub fn init_observability(metrics_exporter: MetricsExporter) -> Result<(), ObservabilityError> {
    tracing_subscriber::registry()
        .with(stdout())
        .try_init()
        .context(SubscriberSnafu)?;

    let meter_provider = MeterProviderBuilder::default()
        .with_resource(Resource::builder().build())
        .with_reader(metrics_exporter)
        .build();

    global::set_meter_provider(meter_provider);

    Ok(())
}

fn stdout<S>() -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let log_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_fmt = std::env::var("RUST_LOG_FORMAT")
        .map(|val| val == "json")
        .unwrap_or(false);

    if json_fmt {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(log_env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_filter(log_env_filter)
            .boxed()
    }
}
