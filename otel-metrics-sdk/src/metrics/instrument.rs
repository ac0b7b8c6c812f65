use std::{any::Any, borrow::Cow, collections::HashSet, sync::Arc};

use otel_metrics::{
    metrics::{AsyncInstrument, MetricsError, Result, SyncInstrument},
    InstrumentationScope, Key, KeyValue,
};

use crate::metrics::{aggregation::Aggregation, internal::Measure};

use super::Temporality;

const NAME_MAX_LEN: usize = 255;
const NAME_SYMBOLS: [char; 4] = ['_', '.', '-', '/'];
const UNIT_MAX_LEN: usize = 63;

pub(crate) const INSTRUMENT_NAME_EMPTY: &str = "instrument name is empty";
pub(crate) const INSTRUMENT_NAME_LENGTH: &str = "instrument name is longer than 255 bytes";
pub(crate) const INSTRUMENT_NAME_FIRST_ALPHABETIC: &str =
    "instrument name does not start with an ASCII letter";
pub(crate) const INSTRUMENT_NAME_INVALID_CHAR: &str =
    "instrument name may only contain ASCII letters, digits, '_', '.', '-' and '/'";
pub(crate) const INSTRUMENT_UNIT_LENGTH: &str = "instrument unit is longer than 63 bytes";
pub(crate) const INSTRUMENT_UNIT_INVALID_CHAR: &str = "instrument unit contains non-ASCII text";

/// Returns the message of the first failed check, in order.
fn first_failure<const N: usize>(
    checks: [(bool, &'static str); N],
) -> std::result::Result<(), &'static str> {
    match checks.into_iter().find(|(passed, _)| !passed) {
        Some((_, message)) => Err(message),
        None => Ok(()),
    }
}

pub(crate) fn validate_instrument_name(name: &str) -> std::result::Result<(), &'static str> {
    let Some(first) = name.chars().next() else {
        return Err(INSTRUMENT_NAME_EMPTY);
    };
    first_failure([
        (name.len() <= NAME_MAX_LEN, INSTRUMENT_NAME_LENGTH),
        (first.is_ascii_alphabetic(), INSTRUMENT_NAME_FIRST_ALPHABETIC),
        (
            name.chars()
                .all(|c| c.is_ascii_alphanumeric() || NAME_SYMBOLS.contains(&c)),
            INSTRUMENT_NAME_INVALID_CHAR,
        ),
    ])
}

/// Units are optional; an empty unit is valid.
pub(crate) fn validate_instrument_unit(unit: &str) -> std::result::Result<(), &'static str> {
    first_failure([
        (unit.len() <= UNIT_MAX_LEN, INSTRUMENT_UNIT_LENGTH),
        (unit.is_ascii(), INSTRUMENT_UNIT_INVALID_CHAR),
    ])
}

/// Which of the six instrument kinds an instrument is.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum InstrumentKind {
    /// Synchronous, only increases.
    Counter,
    /// Synchronous, goes up and down.
    UpDownCounter,
    /// Synchronous, records a distribution.
    Histogram,
    /// Observed in a callback, only increases.
    ObservableCounter,
    /// Observed in a callback, goes up and down.
    ObservableUpDownCounter,
    /// Observed in a callback, reports the current value.
    ObservableGauge,
}

impl InstrumentKind {
    /// Temporality used for this kind by a reader preferring `temporality`.
    ///
    /// Up-down counters stay cumulative under a delta preference.
    pub(crate) fn temporality_preference(&self, temporality: Temporality) -> Temporality {
        let up_down = matches!(self, Self::UpDownCounter | Self::ObservableUpDownCounter);
        if up_down {
            Temporality::Cumulative
        } else {
            temporality
        }
    }

    pub(crate) fn is_monotonic(&self) -> bool {
        matches!(self, Self::Counter | Self::ObservableCounter | Self::Histogram)
    }
}

/// View criteria: the properties an instrument is matched on.
///
/// Every field left unset matches any instrument. A criteria with nothing set
/// is rejected by [new_view]. Views written as closures receive the created
/// instrument through the same type.
///
/// ```
/// use otel_metrics_sdk::metrics::{Instrument, Stream};
///
/// let cap_request_sizes = |i: &Instrument| {
///     (i.name() == "http.request.size")
///         .then(|| Stream::builder().with_cardinality_limit(100).build().ok())
///         .flatten()
/// };
/// # let _ = cap_request_sizes;
/// ```
///
/// [new_view]: crate::metrics::new_view
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct Instrument {
    pub(crate) name: Cow<'static, str>,
    pub(crate) description: Cow<'static, str>,
    pub(crate) kind: Option<InstrumentKind>,
    pub(crate) unit: Cow<'static, str>,
    pub(crate) scope: InstrumentationScope,
}

impl Instrument {
    /// Criteria that matches everything.
    pub fn new() -> Self {
        Instrument::default()
    }

    /// Exact name, or a pattern with `*` and `?` when used as view criteria.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Exact description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Exact unit.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Meter scope. Only the set parts of the scope are compared.
    pub fn with_scope(mut self, scope: InstrumentationScope) -> Self {
        self.scope = scope;
        self
    }

    /// Instrument kind.
    pub fn with_kind(mut self, kind: InstrumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Name, as given when the instrument was created.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description, empty if none was given.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Always set on instruments created by a meter.
    pub fn kind(&self) -> Option<InstrumentKind> {
        self.kind
    }

    /// Unit, empty if none was given.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Scope of the meter that created the instrument.
    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    pub(crate) fn is_empty(&self) -> bool {
        *self == Instrument::default()
    }

    pub(crate) fn matches_description(&self, other: &Instrument) -> bool {
        unset_or_equal(&self.description, &other.description)
    }

    pub(crate) fn matches_kind(&self, other: &Instrument) -> bool {
        self.kind.map_or(true, |kind| other.kind == Some(kind))
    }

    pub(crate) fn matches_unit(&self, other: &Instrument) -> bool {
        unset_or_equal(&self.unit, &other.unit)
    }

    pub(crate) fn matches_scope(&self, other: &Instrument) -> bool {
        let (want, got) = (&self.scope, &other.scope);
        unset_or_equal(want.name(), got.name())
            && want.version().map_or(true, |v| got.version() == Some(v))
            && want.schema_url().map_or(true, |s| got.schema_url() == Some(s))
    }
}

fn unset_or_equal(want: &str, got: &str) -> bool {
    want.is_empty() || want == got
}

/// Builds a [Stream], checking its settings.
///
/// ```
/// use otel_metrics_sdk::metrics::{Aggregation, Stream};
///
/// let stream = Stream::builder()
///     .with_name("http.server.duration")
///     .with_aggregation(Aggregation::ExplicitBucketHistogram {
///         boundaries: vec![0.05, 0.1, 0.5, 1.0],
///         record_min_max: false,
///     })
///     .build()
///     .unwrap();
/// # let _ = stream;
/// ```
#[derive(Default, Debug)]
pub struct StreamBuilder {
    stream: Stream,
}

impl StreamBuilder {
    pub(crate) fn new() -> Self {
        StreamBuilder::default()
    }

    /// Replaces the instrument name in the output.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.stream.name = Some(name.into());
        self
    }

    /// Replaces the instrument description in the output.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.stream.description = Some(description.into());
        self
    }

    /// Replaces the instrument unit in the output.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.stream.unit = Some(unit.into());
        self
    }

    /// Overrides the aggregation the reader would pick for the instrument
    /// kind. [Aggregation::Drop] discards the stream.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.stream.aggregation = Some(aggregation);
        self
    }

    /// Keeps only attributes with these keys; an empty set keeps none.
    /// Without this call every attribute is kept.
    pub fn with_allowed_attribute_keys(
        mut self,
        attribute_keys: impl IntoIterator<Item = Key>,
    ) -> Self {
        let keys: HashSet<Key> = attribute_keys.into_iter().collect();
        self.stream.allowed_attribute_keys = Some(Arc::new(keys));
        self
    }

    /// Maximum number of attribute sets tracked per collection cycle.
    pub fn with_cardinality_limit(mut self, limit: usize) -> Self {
        self.stream.cardinality_limit = Some(limit);
        self
    }

    /// Fails with [`MetricsError::Config`] on an invalid name or unit, a zero
    /// cardinality limit or unusable histogram boundaries.
    pub fn build(self) -> Result<Stream> {
        let stream = self.stream;
        let config = |message: &str| MetricsError::Config(message.to_string());

        if let Some(name) = stream.name.as_deref() {
            validate_instrument_name(name).map_err(config)?;
        }
        if let Some(unit) = stream.unit.as_deref() {
            validate_instrument_unit(unit).map_err(config)?;
        }
        if stream.cardinality_limit == Some(0) {
            return Err(config("cardinality limit must be positive"));
        }
        if let Some(aggregation) = &stream.aggregation {
            aggregation.validate()?;
        }
        Ok(stream)
    }
}

/// What a view changes about the output of the instruments it matches.
///
/// Unset fields keep the instrument's own values.
#[derive(Default, Debug, Clone)]
pub struct Stream {
    pub(crate) name: Option<Cow<'static, str>>,
    pub(crate) description: Option<Cow<'static, str>>,
    pub(crate) unit: Option<Cow<'static, str>>,
    pub(crate) aggregation: Option<Aggregation>,
    pub(crate) allowed_attribute_keys: Option<Arc<HashSet<Key>>>,
    pub(crate) cardinality_limit: Option<usize>,
}

impl Stream {
    /// Starts an empty [StreamBuilder].
    pub fn builder() -> StreamBuilder {
        StreamBuilder::new()
    }
}

/// Key under which a pipeline shares one aggregator between instruments.
///
/// Two instruments producing the same key feed the same output stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct StreamId {
    pub(crate) name: Cow<'static, str>,
    pub(crate) description: Cow<'static, str>,
    pub(crate) kind: InstrumentKind,
    pub(crate) unit: Cow<'static, str>,
    pub(crate) aggregation: String,
    pub(crate) monotonic: bool,
    pub(crate) temporality: Temporality,
    /// `u64`, `i64` or `f64`.
    pub(crate) number: Cow<'static, str>,
}

impl StreamId {
    /// Turns the identity into a cache key: the name is lowercased since
    /// names compare case-insensitively, and the description is cleared so
    /// that instruments differing only by description share one stream.
    pub(crate) fn normalize(&mut self) {
        if self.name.bytes().any(|b| b.is_ascii_uppercase()) {
            self.name = Cow::Owned(self.name.to_ascii_lowercase());
        }
        self.description = Cow::Borrowed("");
    }
}

/// Identity of an SDK observable instrument.
///
/// Observers only accept observations for the identities registered with
/// the running callback.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ObservableId {
    pub(crate) name: Cow<'static, str>,
    pub(crate) description: Cow<'static, str>,
    pub(crate) kind: InstrumentKind,
    pub(crate) unit: Cow<'static, str>,
    pub(crate) scope: InstrumentationScope,
}

pub(crate) struct ResolvedMeasures<T> {
    pub(crate) measures: Vec<Arc<dyn Measure<T>>>,
}

impl<T: Copy + 'static> SyncInstrument<T> for ResolvedMeasures<T> {
    fn measure(&self, val: T, attrs: &[KeyValue]) {
        for measure in &self.measures {
            measure.call(val, attrs)
        }
    }
}

/// The SDK side of an observable instrument.
///
/// Holds one measure per pipeline stream the instrument resolved to; an
/// instrument whose every stream was dropped holds none.
pub(crate) struct Observable<T> {
    pub(crate) id: ObservableId,
    measures: Arc<Vec<Arc<dyn Measure<T>>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Observable {
            id: self.id.clone(),
            measures: Arc::clone(&self.measures),
        }
    }
}

impl<T> Observable<T> {
    pub(crate) fn new(id: ObservableId, measures: Vec<Arc<dyn Measure<T>>>) -> Self {
        Self {
            id,
            measures: Arc::new(measures),
        }
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.measures.is_empty()
    }

    /// Checks the observable may be registered with a callback of the meter
    /// owning `scope`.
    ///
    /// Returns `Ok(false)` for an instrument whose streams were all dropped.
    pub(crate) fn registerable(&self, scope: &InstrumentationScope) -> Result<bool> {
        if self.is_dropped() {
            return Ok(false);
        }
        if &self.id.scope != scope {
            return Err(MetricsError::Config(format!(
                "invalid registration: observable \"{}\" from Meter \"{}\", registered with Meter \"{}\"",
                self.id.name,
                self.id.scope.name(),
                scope.name(),
            )));
        }
        Ok(true)
    }
}

impl<T: Copy + Send + Sync + 'static> AsyncInstrument<T> for Observable<T> {
    fn observe(&self, measurement: T, attrs: &[KeyValue]) {
        for measure in self.measures.iter() {
            measure.call(measurement, attrs)
        }
    }

    fn as_any(&self) -> Arc<dyn Any> {
        Arc::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("validateName", None)]
    #[case("_startWithNoneAlphabet", Some(INSTRUMENT_NAME_FIRST_ALPHABETIC))]
    #[case("utf8char锈", Some(INSTRUMENT_NAME_INVALID_CHAR))]
    #[case("a".repeat(255), None)]
    #[case("a".repeat(256), Some(INSTRUMENT_NAME_LENGTH))]
    #[case("invalid name", Some(INSTRUMENT_NAME_INVALID_CHAR))]
    #[case("allow/slash", None)]
    #[case("allow_under_score", None)]
    #[case("allow.dots.ok", None)]
    #[case("dash-ok", None)]
    #[case("", Some(INSTRUMENT_NAME_EMPTY))]
    #[case("Total $ Count", Some(INSTRUMENT_NAME_INVALID_CHAR))]
    #[case("/not / allowed", Some(INSTRUMENT_NAME_FIRST_ALPHABETIC))]
    fn instrument_name_validation(
        #[case] name: String,
        #[case] expected: Option<&'static str>,
    ) {
        assert_eq!(validate_instrument_name(&name).err(), expected);

        let stream = Stream::builder().with_name(name).build();
        match expected {
            None => assert!(stream.is_ok()),
            Some(msg) => match stream {
                Err(MetricsError::Config(err)) => assert_eq!(err, msg),
                other => panic!("unexpected result {other:?}"),
            },
        }
    }

    #[rstest]
    #[case("0123456789012345678901234567890123456789012345678901234567890123", Some(INSTRUMENT_UNIT_LENGTH))]
    #[case("utf8char锈", Some(INSTRUMENT_UNIT_INVALID_CHAR))]
    #[case("kb", None)]
    #[case("Kb/sec", None)]
    #[case("%", None)]
    #[case("", None)]
    fn instrument_unit_validation(#[case] unit: &'static str, #[case] expected: Option<&str>) {
        assert_eq!(validate_instrument_unit(unit).err(), expected);
        assert_eq!(
            Stream::builder().with_unit(unit).build().is_ok(),
            expected.is_none()
        );
    }

    #[test]
    fn stream_rejects_zero_cardinality_limit() {
        assert!(Stream::builder().with_cardinality_limit(0).build().is_err());
        assert!(Stream::builder().with_cardinality_limit(1).build().is_ok());
    }

    #[test]
    fn stream_rejects_invalid_histogram_boundaries() {
        for boundaries in [
            vec![1.0, 2.0, f64::NAN],
            vec![f64::NEG_INFINITY, 5.0],
            vec![1.0, 5.0, 2.0],
            vec![1.0, 5.0, 5.0],
        ] {
            let result = Stream::builder()
                .with_aggregation(Aggregation::ExplicitBucketHistogram {
                    boundaries: boundaries.clone(),
                    record_min_max: true,
                })
                .build();
            assert!(
                matches!(result, Err(MetricsError::Config(_))),
                "{boundaries:?} accepted"
            );
        }
    }

    #[test]
    fn empty_criteria_detection() {
        assert!(Instrument::new().is_empty());
        assert!(!Instrument::new().with_unit("ms").is_empty());
        assert!(!Instrument::new()
            .with_kind(InstrumentKind::Counter)
            .is_empty());
    }

    #[test]
    fn observable_from_other_meter_is_not_registerable() {
        let scope = InstrumentationScope::builder("a").build();
        let id = ObservableId {
            name: "gauge".into(),
            description: "".into(),
            kind: InstrumentKind::ObservableGauge,
            unit: "".into(),
            scope: scope.clone(),
        };

        let dropped = Observable::<u64>::new(id.clone(), vec![]);
        assert!(!dropped.registerable(&scope).unwrap());

        struct Ignore;
        impl Measure<u64> for Ignore {
            fn call(&self, _: u64, _: &[KeyValue]) {}
        }
        let live = Observable::<u64>::new(id, vec![Arc::new(Ignore)]);
        assert!(live.registerable(&scope).unwrap());

        let other = InstrumentationScope::builder("b").build();
        let err = live.registerable(&other).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Config error invalid registration: observable \"gauge\" from Meter \"a\", registered with Meter \"b\""
        );
    }
}
