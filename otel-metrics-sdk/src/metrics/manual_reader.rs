use std::{
    fmt, mem,
    sync::{Mutex, Weak},
    time::Duration,
};

use otel_metrics::otel_debug;

use crate::error::{self, OTelSdkError, OTelSdkResult};

use super::{
    aggregation::Aggregation,
    data::{ResourceMetrics, Temporality},
    instrument::InstrumentKind,
    pipeline::Pipeline,
    reader::{
        AggregationSelector, DefaultAggregationSelector, MetricProducer, MetricReader,
        SdkProducer,
    },
};

/// Reader that collects only when asked to.
///
/// Nothing happens in the background: call [collect](MetricReader::collect)
/// to run callbacks and take a snapshot. Useful for pull based exporters and
/// tests.
///
/// ```
/// use otel_metrics_sdk::metrics::{ManualReader, Temporality};
///
/// let reader = ManualReader::builder()
///     .with_temporality(Temporality::Delta)
///     .build();
/// # drop(reader)
/// ```
pub struct ManualReader {
    state: Mutex<ReaderState>,
    temporality: Temporality,
    aggregation_selector: Box<dyn AggregationSelector>,
}

enum ReaderState {
    Running {
        pipeline: Option<Weak<dyn SdkProducer>>,
        producers: Vec<Box<dyn MetricProducer>>,
    },
    ShutDown,
}

impl Default for ReaderState {
    fn default() -> Self {
        ReaderState::Running {
            pipeline: None,
            producers: Vec::new(),
        }
    }
}

impl Default for ManualReader {
    fn default() -> Self {
        ManualReader::builder().build()
    }
}

impl fmt::Debug for ManualReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualReader")
            .field("temporality", &self.temporality)
            .finish_non_exhaustive()
    }
}

impl ManualReader {
    /// Starts a [ManualReaderBuilder] with cumulative temporality and the
    /// default aggregations.
    pub fn builder() -> ManualReaderBuilder {
        ManualReaderBuilder::default()
    }

    /// Like [collect](MetricReader::collect), but gives callbacks at most
    /// `timeout` in total.
    ///
    /// When the budget runs out no snapshot is taken and
    /// [OTelSdkError::Timeout] is returned. Delta state is left untouched, so
    /// the next collection still reports everything recorded.
    pub fn collect_with_timeout(&self, rm: &mut ResourceMetrics, timeout: Duration) -> OTelSdkResult {
        self.collect_within(rm, Some(timeout))
    }

    fn collect_within(&self, rm: &mut ResourceMetrics, timeout: Option<Duration>) -> OTelSdkResult {
        let state = self.state.lock()?;
        let ReaderState::Running { pipeline, producers } = &*state else {
            return Err(OTelSdkError::AlreadyShutdown);
        };
        let Some(pipeline) = pipeline.as_ref().and_then(Weak::upgrade) else {
            return Err(OTelSdkError::InternalFailure(
                "reader is not registered with a meter provider".into(),
            ));
        };

        let own = pipeline.produce(rm, timeout);
        if let Err(OTelSdkError::Timeout(_)) = own {
            return own;
        }

        let mut results = vec![own];
        for producer in producers {
            results.push(producer.produce().map(|scope| rm.scope_metrics.push(scope)));
        }
        error::combine(results)
    }
}

impl MetricReader for ManualReader {
    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match &mut *state {
            ReaderState::Running { pipeline: slot @ None, .. } => *slot = Some(pipeline),
            ReaderState::Running { .. } => {
                otel_debug!(name: "ManualReader.PipelineAlreadyRegistered");
            }
            ReaderState::ShutDown => {}
        }
    }

    fn register_producer(&self, producer: Box<dyn MetricProducer>) {
        if let Ok(mut state) = self.state.lock() {
            if let ReaderState::Running { producers, .. } = &mut *state {
                producers.push(producer);
            }
        }
    }

    /// Runs callbacks, snapshots the pipeline and appends the output of any
    /// registered external producers.
    fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult {
        self.collect_within(rm, None)
    }

    /// Nothing is buffered, so this only reports whether the reader is shut
    /// down.
    fn force_flush(&self) -> OTelSdkResult {
        match &*self.state.lock()? {
            ReaderState::Running { .. } => Ok(()),
            ReaderState::ShutDown => Err(OTelSdkError::AlreadyShutdown),
        }
    }

    /// Detaches the pipeline and producers. Later collections fail.
    fn shutdown(&self) -> OTelSdkResult {
        let mut state = self.state.lock()?;
        match mem::replace(&mut *state, ReaderState::ShutDown) {
            ReaderState::Running { .. } => Ok(()),
            ReaderState::ShutDown => Err(OTelSdkError::AlreadyShutdown),
        }
    }

    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        kind.temporality_preference(self.temporality)
    }

    fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        self.aggregation_selector.aggregation(kind)
    }
}

/// Options for a [ManualReader].
pub struct ManualReaderBuilder {
    temporality: Temporality,
    aggregation_selector: Box<dyn AggregationSelector>,
}

impl fmt::Debug for ManualReaderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualReaderBuilder")
            .field("temporality", &self.temporality)
            .finish_non_exhaustive()
    }
}

impl Default for ManualReaderBuilder {
    fn default() -> Self {
        ManualReaderBuilder {
            temporality: Temporality::Cumulative,
            aggregation_selector: Box::new(DefaultAggregationSelector::new()),
        }
    }
}

impl ManualReaderBuilder {
    /// Same as [ManualReader::builder].
    pub fn new() -> Self {
        Self::default()
    }

    /// Preferred temporality. Up-down counters stay cumulative when
    /// [Temporality::Delta] is chosen.
    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = temporality;
        self
    }

    /// Aggregation per instrument kind, used when no view sets one.
    pub fn with_aggregation_selector(
        mut self,
        aggregation_selector: impl AggregationSelector + 'static,
    ) -> Self {
        self.aggregation_selector = Box::new(aggregation_selector);
        self
    }

    /// Finishes the reader. It collects nothing until a provider registers it.
    pub fn build(self) -> ManualReader {
        ManualReader {
            state: Mutex::default(),
            temporality: self.temporality,
            aggregation_selector: self.aggregation_selector,
        }
    }
}
