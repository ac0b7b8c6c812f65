//! Reader side of the pipeline.
use std::{fmt, sync::Weak, time::Duration};

use crate::error::{OTelSdkError, OTelSdkResult};

use super::{
    aggregation::{Aggregation, DEFAULT_HISTOGRAM_BOUNDARIES},
    data::{ResourceMetrics, ScopeMetrics},
    pipeline::Pipeline,
    InstrumentKind, Temporality,
};

/// Pulls snapshots out of a meter provider.
///
/// The provider calls [register_pipeline](MetricReader::register_pipeline)
/// once at build time; from then on the reader decides when to
/// [collect](MetricReader::collect), while the provider drives
/// [force_flush](MetricReader::force_flush) and
/// [shutdown](MetricReader::shutdown).
///
/// Exporters that push on a schedule implement [`PushMetricExporter`] and run
/// inside a [`PeriodicReader`]. Pull based integrations implement this trait
/// directly.
///
/// [`PushMetricExporter`]: crate::metrics::exporter::PushMetricExporter
/// [`PeriodicReader`]: crate::metrics::PeriodicReader
pub trait MetricReader: fmt::Debug + Send + Sync + 'static {
    /// Attaches the pipeline this reader collects from. Only the first
    /// registration counts.
    fn register_pipeline(&self, pipeline: Weak<Pipeline>);

    /// Registers an external [MetricProducer] whose metrics are appended to
    /// every collection of this reader.
    fn register_producer(&self, producer: Box<dyn MetricProducer>);

    /// Runs callbacks and writes a snapshot of every stream into `rm`.
    ///
    /// Errors of several observable callbacks or producers are combined into
    /// one. An [`OTelSdkError::AlreadyShutdown`] is returned if this is called
    /// after shutdown.
    fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult;

    /// Delivers anything collected but not yet handed on.
    fn force_flush(&self) -> OTelSdkResult;

    /// Flushes and then releases the reader.
    ///
    /// After `shutdown` is called, calls to `collect`, `force_flush` and
    /// `shutdown` perform no operation and instead return
    /// [`OTelSdkError::AlreadyShutdown`].
    fn shutdown(&self) -> OTelSdkResult;

    /// Temporality of the streams created for instruments of `kind`.
    fn temporality(&self, kind: InstrumentKind) -> Temporality;

    /// The output aggregation, a function of instrument kind.
    ///
    /// Views that set their own aggregation take precedence.
    fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        default_aggregation_selector(kind)
    }
}

/// Snapshot source a reader holds on to.
pub(crate) trait SdkProducer: fmt::Debug + Send + Sync {
    /// Fills `rm` with one collection.
    ///
    /// With a `timeout`, callbacks still pending once it elapsed are skipped,
    /// no snapshot is taken and [`OTelSdkError::Timeout`] is returned.
    fn produce(&self, rm: &mut ResourceMetrics, timeout: Option<Duration>) -> OTelSdkResult;
}

/// Bridge for metrics that are not recorded through this SDK.
pub trait MetricProducer: fmt::Debug + Send + Sync {
    /// Current output of the bridged source.
    fn produce(&self) -> Result<ScopeMetrics, OTelSdkError>;
}

/// Maps instrument kinds to aggregations for streams no view configures.
///
/// Any `Fn(InstrumentKind) -> Aggregation` is a selector.
pub trait AggregationSelector: Send + Sync {
    /// Aggregation for instruments of `kind`.
    fn aggregation(&self, kind: InstrumentKind) -> Aggregation;
}

impl<T> AggregationSelector for T
where
    T: Fn(InstrumentKind) -> Aggregation + Send + Sync,
{
    fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        self(kind)
    }
}

/// Built-in aggregation per instrument kind.
///
/// Counters and up-down counters, observable or not, get [Aggregation::Sum].
/// Observable gauges get [Aggregation::LastValue]. Histograms get the default
/// bucket boundaries with min and max recorded.
pub fn default_aggregation_selector(kind: InstrumentKind) -> Aggregation {
    match kind {
        InstrumentKind::Counter
        | InstrumentKind::UpDownCounter
        | InstrumentKind::ObservableCounter
        | InstrumentKind::ObservableUpDownCounter => Aggregation::Sum,
        InstrumentKind::ObservableGauge => Aggregation::LastValue,
        InstrumentKind::Histogram => Aggregation::ExplicitBucketHistogram {
            boundaries: DEFAULT_HISTOGRAM_BOUNDARIES.to_vec(),
            record_min_max: true,
        },
    }
}

/// Selector wrapping [default_aggregation_selector].
#[derive(Clone, Default, Debug)]
pub struct DefaultAggregationSelector {
    pub(crate) _private: (),
}

impl DefaultAggregationSelector {
    /// Creates the selector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregationSelector for DefaultAggregationSelector {
    fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        default_aggregation_selector(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selection_is_compatible_with_every_kind() {
        for kind in [
            InstrumentKind::Counter,
            InstrumentKind::UpDownCounter,
            InstrumentKind::Histogram,
            InstrumentKind::ObservableCounter,
            InstrumentKind::ObservableUpDownCounter,
            InstrumentKind::ObservableGauge,
        ] {
            let aggregation = default_aggregation_selector(kind);
            assert!(aggregation.validate().is_ok());
            assert!(aggregation.is_compatible_with(kind).is_ok(), "{kind:?}");
        }
    }

    #[test]
    fn closures_select_aggregations() {
        let selector = |kind: InstrumentKind| match kind {
            InstrumentKind::Histogram => Aggregation::Drop,
            other => default_aggregation_selector(other),
        };
        assert_eq!(selector.aggregation(InstrumentKind::Histogram), Aggregation::Drop);
        assert_eq!(
            DefaultAggregationSelector::new().aggregation(InstrumentKind::Counter),
            Aggregation::Sum
        );
    }
}
