use core::fmt;
use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
    time::{Duration, Instant},
};

use otel_metrics::{
    metrics::{MetricsError, Result},
    otel_debug, otel_warn, InstrumentationScope, KeyValue,
};

use crate::{
    error::{self, OTelSdkError, OTelSdkResult},
    metrics::{
        aggregation::Aggregation,
        data::{Metric, ResourceMetrics, ScopeMetrics},
        instrument::{Instrument, InstrumentKind, Stream, StreamId},
        internal::{self, AggregateBuilder, AggregateFns, Number, DEFAULT_CARDINALITY_LIMIT},
        reader::{default_aggregation_selector, MetricReader, SdkProducer},
        view::View,
    },
    Resource,
};

/// Connects all of the instruments created by a meter provider to a [MetricReader].
///
/// This is the object that will be registered when a meter provider is
/// created.
///
/// As instruments are created the instrument should be checked if it exists in
/// the views of a the reader, and if so each aggregate function should be added
/// to the pipeline.
#[doc(hidden)]
pub struct Pipeline {
    pub(crate) resource: Resource,
    reader: Box<dyn MetricReader>,
    views: Vec<Arc<dyn View>>,
    inner: Mutex<PipelineInner>,
    next_callback_id: AtomicU64,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pipeline")
    }
}

/// Single or multi-instrument callbacks
pub(crate) type GenericCallback = Arc<dyn Fn() -> Result<()> + Send + Sync>;

#[derive(Default)]
struct PipelineInner {
    /// Aggregations grouped by scope, in the order the scopes first appeared.
    aggregations: Vec<(InstrumentationScope, Vec<InstrumentSync>)>,
    /// Registered callbacks keyed by registration id.
    callbacks: BTreeMap<u64, GenericCallback>,
}

impl fmt::Debug for PipelineInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineInner")
            .field("aggregations", &self.aggregations)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Pipeline {
    /// Adds the [InstrumentSync] to pipeline with scope.
    ///
    /// This method is not idempotent. Duplicate calls will result in duplicate
    /// additions, it is the callers responsibility to ensure this is called with
    /// unique values.
    fn add_sync(&self, scope: &InstrumentationScope, i_sync: InstrumentSync) {
        let _ = self.inner.lock().map(|mut inner| {
            otel_debug!(
                name: "Pipeline.InstrumentCreated",
                instrument_name = i_sync.name.as_ref(),
            );
            match inner.aggregations.iter_mut().find(|(s, _)| *s == *scope) {
                Some((_, instruments)) => instruments.push(i_sync),
                None => inner.aggregations.push((scope.clone(), vec![i_sync])),
            }
        });
    }

    /// Registers a callback to be run when `produce` is called and returns its
    /// registration id.
    pub(crate) fn add_callback(&self, callback: GenericCallback) -> u64 {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.inner.lock().map(|mut inner| {
            inner.callbacks.insert(id, callback);
        });
        id
    }

    /// Removes the callback registered under `id`. Unknown ids are ignored.
    pub(crate) fn remove_callback(&self, id: u64) {
        let _ = self.inner.lock().map(|mut inner| {
            inner.callbacks.remove(&id);
        });
    }

    /// Send accumulated telemetry
    fn force_flush(&self) -> OTelSdkResult {
        self.reader.force_flush()
    }

    /// Shut down pipeline
    fn shutdown(&self) -> OTelSdkResult {
        self.reader.shutdown()
    }
}

impl SdkProducer for Pipeline {
    /// Returns aggregated metrics from a single collection.
    fn produce(&self, rm: &mut ResourceMetrics, timeout: Option<Duration>) -> OTelSdkResult {
        let deadline = timeout.map(|t| (Instant::now() + t, t));

        // Callbacks run without the lock so they may unregister themselves or
        // create instruments.
        let callbacks: Vec<GenericCallback> = {
            let inner = self.inner.lock()?;
            inner.callbacks.values().cloned().collect()
        };
        otel_debug!(
            name: "Pipeline.InvokingObservableCallbacks",
            count = callbacks.len(),
        );

        let mut errs = Vec::new();
        for cb in callbacks {
            if let Some((deadline, timeout)) = deadline {
                if Instant::now() >= deadline {
                    return Err(OTelSdkError::Timeout(timeout));
                }
            }
            if let Err(err) = cb() {
                errs.push(Err(OTelSdkError::InternalFailure(err.to_string())));
            }
        }
        if let Some((deadline, timeout)) = deadline {
            if Instant::now() >= deadline {
                return Err(OTelSdkError::Timeout(timeout));
            }
        }

        rm.resource = self.resource.clone();
        rm.scope_metrics.clear();

        let inner = self.inner.lock()?;
        for (scope, instruments) in &inner.aggregations {
            let metrics: Vec<Metric> = instruments
                .iter()
                .filter_map(|inst| {
                    let (len, data) = inst.comp_agg.call();
                    (len > 0).then(|| Metric {
                        name: inst.name.clone(),
                        description: inst.description.clone(),
                        unit: inst.unit.clone(),
                        data,
                    })
                })
                .collect();

            if !metrics.is_empty() {
                rm.scope_metrics.push(ScopeMetrics {
                    scope: scope.clone(),
                    metrics,
                });
            }
        }

        error::combine(errs)
    }
}

/// A synchronization point between a [Pipeline] and an instrument's aggregate function.
struct InstrumentSync {
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    unit: Cow<'static, str>,
    comp_agg: Arc<dyn internal::ComputeAggregation>,
}

impl fmt::Debug for InstrumentSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentSync")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("unit", &self.unit)
            .finish()
    }
}

/// Stream identities a meter has handed out, used to detect instruments that
/// reuse a name with a different kind, unit or number type.
///
/// Shared by every resolver of one meter. Each conflicting identity is only
/// logged once.
#[derive(Default)]
pub(crate) struct ConflictCache {
    inner: Mutex<ConflictCacheInner>,
}

#[derive(Default)]
struct ConflictCacheInner {
    /// First identity seen per lowercase stream name.
    first_seen: HashMap<String, StreamId>,
    reported: HashSet<StreamId>,
}

impl ConflictCache {
    /// Records `id` and returns `true` if it conflicts with an identity seen
    /// earlier under the same name.
    pub(crate) fn log_conflict(&self, id: &StreamId) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        let existing = match inner.first_seen.get(&id.name.to_ascii_lowercase()) {
            Some(existing) => existing.clone(),
            None => {
                inner
                    .first_seen
                    .insert(id.name.to_ascii_lowercase(), id.clone());
                return false;
            }
        };

        if existing.kind == id.kind && existing.unit == id.unit && existing.number == id.number {
            // Same stream; the first description is the one reported.
            if existing.description != id.description && inner.reported.insert(id.clone()) {
                otel_warn!(
                    name: "Instrument.DescriptionMismatch",
                    message = "instrument recreated with a different description, keeping the first one",
                    instrument_name = &*id.name,
                    kept = &*existing.description,
                    ignored = &*id.description,
                );
            }
            return false;
        }

        if inner.reported.insert(id.clone()) {
            otel_warn!(
                name: "Instrument.DuplicateMetricStreamDefinitions",
                message = "duplicate metric stream definitions",
                reason = format!(
                    "names: ({} and {}), kinds: ({:?} and {:?}), units: ({:?} and {:?}), and numbers: ({} and {})",
                    existing.name, id.name,
                    existing.kind, id.kind,
                    existing.unit, id.unit,
                    existing.number, id.number,
                ),
            );
        }
        true
    }
}

impl fmt::Debug for ConflictCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConflictCache")
    }
}

type Cache<T> = Mutex<HashMap<StreamId, Arc<dyn internal::Measure<T>>>>;

/// Facilitates inserting of new instruments from a single scope into a pipeline.
struct Inserter<T> {
    /// A cache that holds aggregate function inputs whose
    /// outputs have been inserted into the underlying reader pipeline.
    ///
    /// This cache ensures no duplicate aggregate functions are inserted into
    /// the reader pipeline and if a new request during an instrument creation
    /// asks for the same aggregate function input the same instance is
    /// returned.
    aggregators: Cache<T>,

    /// Identities of all the instruments the owning meter has created.
    conflicts: Arc<ConflictCache>,

    pipeline: Arc<Pipeline>,
}

impl<T> Inserter<T>
where
    T: Number,
{
    fn new(pipeline: Arc<Pipeline>, conflicts: Arc<ConflictCache>) -> Self {
        Inserter {
            aggregators: Default::default(),
            conflicts,
            pipeline,
        }
    }

    /// Inserts the provided instrument into a pipeline.
    ///
    /// All views the pipeline contains are matched against, in registration
    /// order, and any matching view that creates a unique aggregator will be
    /// inserted into the pipeline and included in the returned list. Without a
    /// matching view the reader's aggregation for the instrument kind is used.
    ///
    /// The returned aggregate functions are ensured to be deduplicated and unique.
    /// If the same stream was requested earlier through this inserter, that
    /// aggregate function's instance is returned.
    ///
    /// If the passed instrument would result in an incompatible aggregate function,
    /// an error is returned and that aggregate function is not inserted or
    /// returned.
    ///
    /// If an instrument is determined to use [Aggregation::Drop], that
    /// instrument is not inserted nor returned.
    fn instrument(&self, inst: &Instrument) -> Result<Vec<Arc<dyn internal::Measure<T>>>> {
        let kind = match inst.kind {
            Some(kind) => kind,
            None => return Err(MetricsError::Other("instrument must have a kind".into())),
        };

        let mut matched = false;
        let mut measures = vec![];
        let mut errs = vec![];
        // The cache returns the same aggregator for equal streams.
        let mut seen = HashSet::new();
        for v in &self.pipeline.views {
            let stream = match v.match_inst(inst) {
                Some(stream) => stream,
                None => continue,
            };
            matched = true;

            match self.cached_aggregator(inst, kind, stream) {
                Ok(Some((id, agg))) => {
                    if seen.insert(id) {
                        measures.push(agg);
                    }
                }
                Ok(None) => continue, // Drop aggregator.
                Err(err) => errs.push(err),
            }
        }

        if !matched {
            let stream = Stream {
                name: Some(inst.name.clone()),
                description: Some(inst.description.clone()),
                unit: Some(inst.unit.clone()),
                ..Default::default()
            };
            match self.cached_aggregator(inst, kind, stream) {
                Ok(Some((_, agg))) => measures.push(agg),
                Ok(None) => {}
                Err(err) => errs.push(err),
            }
        }

        error::combine(errs.into_iter().map(Err)).map(|()| measures)
    }

    /// Returns the appropriate aggregate function for an instrument
    /// configuration, along with the normalized identity of its stream.
    ///
    /// If the exact stream has been created within this inserter, that
    /// aggregate function instance will be returned. Otherwise, a new computed
    /// aggregate function will be cached and returned.
    ///
    /// If the stream conflicts with one that has already been created (e.g.
    /// unit, kind, data type) a warning is logged. A valid new aggregate
    /// function for the configuration is still returned without an error.
    ///
    /// If the stream defines an incompatible aggregation, an error is returned.
    fn cached_aggregator(
        &self,
        inst: &Instrument,
        kind: InstrumentKind,
        stream: Stream,
    ) -> Result<Option<(StreamId, Arc<dyn internal::Measure<T>>)>> {
        let mut agg = stream
            .aggregation
            .clone()
            .unwrap_or_else(|| self.pipeline.reader.aggregation(kind));

        // Apply default if stream or reader aggregation returns default
        if matches!(agg, Aggregation::Default) {
            agg = default_aggregation_selector(kind);
        }

        if let Err(err) = agg.is_compatible_with(kind) {
            return Err(MetricsError::Other(format!(
                "creating aggregator with instrumentKind: {:?}, aggregation {}: {}",
                kind, agg, err,
            )));
        }

        if agg == Aggregation::Drop {
            return Ok(None);
        }

        let temporality = self.pipeline.reader.temporality(kind);
        let mut id = StreamId {
            name: stream.name.clone().unwrap_or_else(|| inst.name.clone()),
            description: stream
                .description
                .clone()
                .unwrap_or_else(|| inst.description.clone()),
            kind,
            unit: stream.unit.clone().unwrap_or_else(|| inst.unit.clone()),
            aggregation: agg.to_string(),
            monotonic: kind.is_monotonic(),
            temporality,
            number: Cow::Borrowed(T::TYPE_NAME),
        };

        // A conflicting stream is still created; the conflict is only logged.
        self.conflicts.log_conflict(&id);

        // Requests for the same stream with different name casing or a
        // different description return the first-seen aggregator, so lookups
        // use the normalized identity.
        let name = id.name.clone();
        let description = id.description.clone();
        let unit = id.unit.clone();
        id.normalize();

        let mut cache = self.aggregators.lock()?;
        if let Some(existing) = cache.get(&id) {
            return Ok(Some((id, Arc::clone(existing))));
        }

        let filter = stream
            .allowed_attribute_keys
            .clone()
            .map(|allowed| Arc::new(move |kv: &KeyValue| allowed.contains(&kv.key)) as Arc<_>);

        let b = AggregateBuilder::new(
            temporality,
            filter,
            stream.cardinality_limit.unwrap_or(DEFAULT_CARDINALITY_LIMIT),
        );
        let AggregateFns { measure, collect } = match aggregate_fn(b, &agg, kind) {
            Some(fns) => fns,
            None => return Ok(None),
        };

        self.pipeline.add_sync(
            &inst.scope,
            InstrumentSync {
                name,
                description,
                unit,
                comp_agg: collect,
            },
        );
        cache.insert(id.clone(), Arc::clone(&measure));

        Ok(Some((id, measure)))
    }
}

/// Returns new aggregate functions for the given params.
///
/// Returns `None` for [Aggregation::Drop].
fn aggregate_fn<T: Number>(
    b: AggregateBuilder<T>,
    agg: &Aggregation,
    kind: InstrumentKind,
) -> Option<AggregateFns<T>> {
    match agg {
        Aggregation::Default => aggregate_fn(b, &default_aggregation_selector(kind), kind),
        Aggregation::Drop => None,
        Aggregation::LastValue => Some(b.last_value()),
        Aggregation::Sum => {
            let fns = match kind {
                // Observable counters report totals, not increments.
                InstrumentKind::ObservableCounter => b.precomputed_sum(true),
                InstrumentKind::ObservableUpDownCounter => b.precomputed_sum(false),
                InstrumentKind::Counter | InstrumentKind::Histogram => b.sum(true),
                _ => b.sum(false),
            };
            Some(fns)
        }
        Aggregation::ExplicitBucketHistogram {
            boundaries,
            record_min_max,
        } => Some(b.explicit_bucket_histogram(boundaries.to_vec(), *record_min_max)),
    }
}

/// The group of pipelines connecting Readers with instrument measurement.
#[derive(Clone, Debug)]
pub(crate) struct Pipelines(pub(crate) Vec<Arc<Pipeline>>);

impl Pipelines {
    pub(crate) fn new(
        res: Resource,
        readers: Vec<Box<dyn MetricReader>>,
        views: Vec<Arc<dyn View>>,
    ) -> Self {
        let mut pipes = Vec::with_capacity(readers.len());
        for r in readers {
            let p = Arc::new(Pipeline {
                resource: res.clone(),
                reader: r,
                views: views.clone(),
                inner: Default::default(),
                next_callback_id: AtomicU64::new(0),
            });
            otel_debug!(name: "Pipeline.ReaderRegistered", views = views.len());
            p.reader.register_pipeline(Arc::downgrade(&p));
            pipes.push(p);
        }

        Pipelines(pipes)
    }

    /// Registers `callback` with every pipeline and returns the registration
    /// id of each.
    pub(crate) fn register_callback(&self, callback: GenericCallback) -> Vec<(Weak<Pipeline>, u64)> {
        self.0
            .iter()
            .map(|pipe| (Arc::downgrade(pipe), pipe.add_callback(Arc::clone(&callback))))
            .collect()
    }

    /// Force flush all pipelines
    pub(crate) fn force_flush(&self) -> OTelSdkResult {
        error::combine(self.0.iter().map(|pipeline| pipeline.force_flush()).collect::<Vec<_>>())
    }

    /// Shut down all pipelines
    pub(crate) fn shutdown(&self) -> OTelSdkResult {
        error::combine(self.0.iter().map(|pipeline| pipeline.shutdown()).collect::<Vec<_>>())
    }
}

/// resolver facilitates resolving aggregate functions an instrument calls to
/// aggregate measurements with while updating all pipelines that need to pull from
/// those aggregations.
pub(crate) struct Resolver<T> {
    inserters: Vec<Inserter<T>>,
}

impl<T> Resolver<T>
where
    T: Number,
{
    pub(crate) fn new(pipelines: Arc<Pipelines>, conflicts: Arc<ConflictCache>) -> Self {
        let inserters = pipelines
            .0
            .iter()
            .map(|pipe| Inserter::new(Arc::clone(pipe), Arc::clone(&conflicts)))
            .collect();

        Resolver { inserters }
    }

    /// The measures that must be updated by the instrument defined by key.
    pub(crate) fn measures(&self, inst: &Instrument) -> Result<Vec<Arc<dyn internal::Measure<T>>>> {
        let (mut measures, mut errs) = (vec![], vec![]);

        for inserter in &self.inserters {
            match inserter.instrument(inst) {
                Ok(ms) => measures.extend(ms),
                Err(err) => errs.push(err),
            }
        }

        error::combine(errs.into_iter().map(Err))?;
        if measures.is_empty() {
            otel_debug!(
                name: "Instrument.MeasurementsDropped",
                instrument_name = inst.name.as_ref(),
            );
        }
        Ok(measures)
    }
}
