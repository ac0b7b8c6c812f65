use std::{
    marker, mem,
    sync::{Arc, Mutex, PoisonError},
    time::SystemTime,
};

use otel_metrics::time::now;
use otel_metrics::KeyValue;

use crate::metrics::data::{AggregatedMetrics, Temporality};

use super::{
    histogram::Histogram, last_value::LastValue, precomputed_sum::PrecomputedSum, sum::Sum,
    Number,
};

/// Input side of an aggregator.
pub(crate) trait Measure<T>: Send + Sync + 'static {
    fn call(&self, measurement: T, attrs: &[KeyValue]);
}

/// Output side of an aggregator.
pub(crate) trait ComputeAggregation: Send + Sync + 'static {
    /// Returns the number of data points and the freshly built aggregation.
    ///
    /// Delta aggregates forget their state here, cumulative ones keep it.
    fn call(&self) -> (usize, AggregatedMetrics);
}

/// Both halves of one aggregator, sharing its state.
pub(crate) struct AggregateFns<T> {
    pub(crate) measure: Arc<dyn Measure<T>>,
    pub(crate) collect: Arc<dyn ComputeAggregation>,
}

impl<A, T> From<A> for AggregateFns<T>
where
    A: Measure<T> + ComputeAggregation,
{
    fn from(aggregator: A) -> Self {
        let shared = Arc::new(aggregator);
        Self {
            measure: Arc::clone(&shared) as Arc<dyn Measure<T>>,
            collect: shared,
        }
    }
}

/// Time range covered by one collected aggregation.
pub(crate) struct Window {
    pub(crate) start: SystemTime,
    pub(crate) end: SystemTime,
}

/// Remembers where the current aggregation window began.
pub(crate) struct CollectionClock(Mutex<SystemTime>);

impl CollectionClock {
    /// Ends the current window now and starts the next one.
    pub(crate) fn advance(&self) -> Window {
        let end = now();
        let mut start = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        Window {
            start: mem::replace(&mut *start, end),
            end,
        }
    }

    /// Window from creation until now, leaving the start in place.
    pub(crate) fn since_start(&self) -> Window {
        let end = now();
        let start = *self.0.lock().unwrap_or_else(PoisonError::into_inner);
        Window { start, end }
    }

    pub(crate) fn for_temporality(&self, temporality: Temporality) -> Window {
        match temporality {
            Temporality::Delta => self.advance(),
            Temporality::Cumulative => self.since_start(),
        }
    }
}

impl Default for CollectionClock {
    fn default() -> Self {
        Self(Mutex::new(now()))
    }
}

pub(crate) type Filter = Arc<dyn Fn(&KeyValue) -> bool + Send + Sync>;

/// Optional view attribute filter applied before a measurement is aggregated.
#[derive(Clone)]
pub(crate) struct AttributeFilter(Option<Filter>);

impl AttributeFilter {
    pub(crate) fn new(filter: Option<Filter>) -> Self {
        Self(filter)
    }

    /// Calls `run` with the attributes the filter keeps.
    pub(crate) fn apply(&self, attrs: &[KeyValue], run: impl FnOnce(&[KeyValue])) {
        match &self.0 {
            Some(keep) => {
                let kept: Vec<KeyValue> = attrs.iter().filter(|kv| keep(kv)).cloned().collect();
                run(&kept)
            }
            None => run(attrs),
        }
    }
}

/// Creates aggregators sharing one stream configuration.
pub(crate) struct AggregateBuilder<T> {
    temporality: Temporality,
    filter: AttributeFilter,

    /// Distinct attribute sets kept per collection cycle.
    cardinality_limit: usize,

    _marker: marker::PhantomData<T>,
}

impl<T: Number> AggregateBuilder<T> {
    pub(crate) fn new(
        temporality: Temporality,
        filter: Option<Filter>,
        cardinality_limit: usize,
    ) -> Self {
        AggregateBuilder {
            temporality,
            filter: AttributeFilter::new(filter),
            cardinality_limit,
            _marker: marker::PhantomData,
        }
    }

    /// Latest value per attribute set.
    pub(crate) fn last_value(&self) -> AggregateFns<T> {
        LastValue::new(
            self.temporality,
            self.filter.clone(),
            self.cardinality_limit,
        )
        .into()
    }

    /// Sum of totals reported by callbacks.
    pub(crate) fn precomputed_sum(&self, monotonic: bool) -> AggregateFns<T> {
        PrecomputedSum::new(
            self.temporality,
            self.filter.clone(),
            monotonic,
            self.cardinality_limit,
        )
        .into()
    }

    /// Running sum of increments.
    pub(crate) fn sum(&self, monotonic: bool) -> AggregateFns<T> {
        Sum::new(
            self.temporality,
            self.filter.clone(),
            monotonic,
            self.cardinality_limit,
        )
        .into()
    }

    /// Explicit bucket histogram.
    pub(crate) fn explicit_bucket_histogram(
        &self,
        boundaries: Vec<f64>,
        record_min_max: bool,
    ) -> AggregateFns<T> {
        Histogram::new(
            self.temporality,
            self.filter.clone(),
            boundaries,
            record_min_max,
            self.cardinality_limit,
        )
        .into()
    }
}

#[cfg(test)]
mod tests {
    use crate::metrics::data::{MetricData, SumDataPoint};
    use crate::metrics::internal::DEFAULT_CARDINALITY_LIMIT;

    use super::*;

    fn u64_data(collect: &Arc<dyn ComputeAggregation>) -> (usize, MetricData<u64>) {
        match collect.call() {
            (count, AggregatedMetrics::U64(data)) => (count, data),
            (_, other) => panic!("unexpected aggregation {other:?}"),
        }
    }

    #[test]
    fn last_value_aggregation() {
        let AggregateFns { measure, collect } =
            AggregateBuilder::<u64>::new(Temporality::Cumulative, None, DEFAULT_CARDINALITY_LIMIT)
                .last_value();
        measure.call(1, &[KeyValue::new("b", 2)]);
        measure.call(2, &[KeyValue::new("b", 2)]);

        let (count, data) = u64_data(&collect);
        assert_eq!(count, 1);
        let MetricData::Gauge(gauge) = data else {
            panic!("expected gauge");
        };
        assert_eq!(gauge.data_points[0].attributes, vec![KeyValue::new("b", 2)]);
        assert_eq!(gauge.data_points[0].value, 2);
        assert!(gauge.start_time.is_some());
    }

    #[test]
    fn sum_aggregation_reports_temporality() {
        for temporality in [Temporality::Delta, Temporality::Cumulative] {
            let AggregateFns { measure, collect } =
                AggregateBuilder::<u64>::new(temporality, None, DEFAULT_CARDINALITY_LIMIT)
                    .sum(true);
            measure.call(3, &[KeyValue::new("b", 2)]);

            let (count, data) = u64_data(&collect);
            assert_eq!(count, 1);
            let MetricData::Sum(sum) = data else {
                panic!("expected sum");
            };
            assert_eq!(sum.temporality, temporality);
            assert!(sum.is_monotonic);
            assert_eq!(
                sum.data_points,
                vec![SumDataPoint {
                    attributes: vec![KeyValue::new("b", 2)],
                    value: 3
                }]
            );
        }
    }

    #[test]
    fn filter_drops_disallowed_keys() {
        let filter: Filter = Arc::new(|kv: &KeyValue| kv.key.as_str() == "keep");
        let AggregateFns { measure, collect } =
            AggregateBuilder::<u64>::new(Temporality::Cumulative, Some(filter), 10).sum(true);
        measure.call(1, &[KeyValue::new("keep", 1), KeyValue::new("drop", 1)]);
        measure.call(1, &[KeyValue::new("keep", 1), KeyValue::new("drop", 2)]);

        let (_, data) = u64_data(&collect);
        let MetricData::Sum(sum) = data else {
            panic!("expected sum");
        };
        assert_eq!(sum.data_points.len(), 1);
        assert_eq!(sum.data_points[0].attributes, vec![KeyValue::new("keep", 1)]);
        assert_eq!(sum.data_points[0].value, 2);
    }

    #[test]
    fn explicit_bucket_histogram_aggregation() {
        for temporality in [Temporality::Delta, Temporality::Cumulative] {
            let AggregateFns { measure, collect } =
                AggregateBuilder::<u64>::new(temporality, None, DEFAULT_CARDINALITY_LIMIT)
                    .explicit_bucket_histogram(vec![1.0], true);
            measure.call(3, &[KeyValue::new("b", 2)]);

            let (count, data) = u64_data(&collect);
            assert_eq!(count, 1);
            let MetricData::Histogram(histogram) = data else {
                panic!("expected histogram");
            };
            assert_eq!(histogram.temporality, temporality);
            let point = &histogram.data_points[0];
            assert_eq!(point.count, 1);
            assert_eq!(point.bounds, vec![1.0]);
            assert_eq!(point.bucket_counts, vec![0, 1]);
            assert_eq!(point.min, Some(3));
            assert_eq!(point.max, Some(3));
            assert_eq!(point.sum, 3);
        }
    }

    #[test]
    fn delta_window_start_moves_forward() {
        let time = CollectionClock::default();
        let first = time.advance();
        let second = time.advance();
        assert_eq!(second.start, first.end);
        assert!(first.start <= first.end);

        let since = time.since_start();
        assert_eq!(since.start, second.end);
        assert_eq!(time.since_start().start, since.start);
    }
}
