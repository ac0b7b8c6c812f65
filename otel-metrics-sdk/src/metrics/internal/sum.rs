use otel_metrics::KeyValue;

use crate::metrics::data::{self, AggregatedMetrics, MetricData, SumDataPoint, Temporality};

use super::aggregate::{AttributeFilter, CollectionClock};
use super::{Aggregator, AtomicTracker, AtomicallyUpdate, ComputeAggregation, Measure, Number};
use super::ValueMap;

/// A running total.
pub(crate) struct Increment<T>
where
    T: AtomicallyUpdate<T>,
{
    pub(crate) value: T::AtomicTracker,
}

impl<T> Aggregator for Increment<T>
where
    T: Number,
{
    type InitConfig = ();
    type PreComputedValue = T;

    fn create(_init: &()) -> Self {
        Self {
            value: T::new_atomic_tracker(T::default()),
        }
    }

    fn update(&self, value: T) {
        self.value.add(value)
    }

    fn clone_and_reset(&self, _: &()) -> Self {
        Self {
            value: T::new_atomic_tracker(self.value.get_and_reset_value()),
        }
    }
}

/// Summarizes a set of measurements made as their arithmetic sum.
pub(crate) struct Sum<T: Number> {
    value_map: ValueMap<Increment<T>>,
    clock: CollectionClock,
    temporality: Temporality,
    filter: AttributeFilter,
    monotonic: bool,
}

impl<T: Number> Sum<T> {
    /// Returns an aggregator that summarizes a set of measurements as their
    /// arithmetic sum.
    ///
    /// Each sum is scoped by attributes and the aggregation cycle the measurements
    /// were made in.
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeFilter,
        monotonic: bool,
        cardinality_limit: usize,
    ) -> Self {
        Sum {
            value_map: ValueMap::new((), cardinality_limit),
            clock: CollectionClock::default(),
            temporality,
            filter,
            monotonic,
        }
    }

    pub(crate) fn delta(&self) -> data::Sum<T> {
        let time = self.clock.advance();
        let mut data_points = Vec::new();
        self.value_map
            .collect_and_reset(&mut data_points, |attributes, aggr| SumDataPoint {
                attributes,
                value: aggr.value.get_value(),
            });

        data::Sum {
            data_points,
            start_time: time.start,
            time: time.end,
            temporality: Temporality::Delta,
            is_monotonic: self.monotonic,
        }
    }

    pub(crate) fn cumulative(&self) -> data::Sum<T> {
        let time = self.clock.since_start();
        let mut data_points = Vec::new();
        // Series live as long as the stream; the cardinality limit bounds them.
        self.value_map
            .collect_readonly(&mut data_points, |attributes, aggr| SumDataPoint {
                attributes,
                value: aggr.value.get_value(),
            });

        data::Sum {
            data_points,
            start_time: time.start,
            time: time.end,
            temporality: Temporality::Cumulative,
            is_monotonic: self.monotonic,
        }
    }
}

impl<T> Measure<T> for Sum<T>
where
    T: Number,
{
    fn call(&self, measurement: T, attrs: &[KeyValue]) {
        self.filter.apply(attrs, |filtered| {
            self.value_map.measure(measurement, filtered);
        })
    }
}

impl<T> ComputeAggregation for Sum<T>
where
    T: Number,
{
    fn call(&self) -> (usize, AggregatedMetrics) {
        let sum = match self.temporality {
            Temporality::Delta => self.delta(),
            Temporality::Cumulative => self.cumulative(),
        };
        (
            sum.data_points.len(),
            T::make_aggregated_metrics(MetricData::Sum(sum)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::internal::DEFAULT_CARDINALITY_LIMIT;

    fn sum(temporality: Temporality) -> Sum<i64> {
        Sum::new(
            temporality,
            AttributeFilter::new(None),
            false,
            DEFAULT_CARDINALITY_LIMIT,
        )
    }

    #[test]
    fn cumulative_keeps_accumulating() {
        let sum = sum(Temporality::Cumulative);
        Measure::call(&sum, 5, &[KeyValue::new("k", "v")]);
        Measure::call(&sum, -2, &[KeyValue::new("k", "v")]);
        assert_eq!(sum.cumulative().data_points[0].value, 3);

        Measure::call(&sum, 4, &[KeyValue::new("k", "v")]);
        let second = sum.cumulative();
        assert_eq!(second.data_points[0].value, 7);
        assert!(!second.is_monotonic);
    }

    #[test]
    fn delta_partitions_measurements() {
        let sum = sum(Temporality::Delta);
        Measure::call(&sum, 5, &[KeyValue::new("k", "v")]);
        let first = sum.delta();
        assert_eq!(first.data_points[0].value, 5);

        assert!(sum.delta().data_points.is_empty());

        Measure::call(&sum, 2, &[KeyValue::new("k", "v")]);
        let third = sum.delta();
        assert_eq!(third.data_points[0].value, 2);
        assert!(third.start_time >= first.time);
    }
}
