use otel_metrics::KeyValue;
use rustc_hash::FxHashMap;
use std::sync::Mutex;

use crate::metrics::data::{self, AggregatedMetrics, MetricData, SumDataPoint, Temporality};

use super::aggregate::{AttributeFilter, CollectionClock};
use super::sum::Increment;
use super::{AtomicTracker, ComputeAggregation, Measure, Number, ValueMap};

/// Summarizes a set of pre-computed sums as their arithmetic sum.
///
/// Observations are totals, so state never outlives the collection cycle it
/// was observed in. Delta output is the change from the total reported for the
/// same attribute set in the previous cycle.
pub(crate) struct PrecomputedSum<T: Number> {
    value_map: ValueMap<Increment<T>>,
    clock: CollectionClock,
    temporality: Temporality,
    filter: AttributeFilter,
    monotonic: bool,
    reported: Mutex<FxHashMap<Vec<KeyValue>, T>>,
}

impl<T: Number> PrecomputedSum<T> {
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeFilter,
        monotonic: bool,
        cardinality_limit: usize,
    ) -> Self {
        PrecomputedSum {
            value_map: ValueMap::new((), cardinality_limit),
            clock: CollectionClock::default(),
            temporality,
            filter,
            monotonic,
            reported: Mutex::new(Default::default()),
        }
    }

    pub(crate) fn delta(&self) -> data::Sum<T> {
        let time = self.clock.advance();
        let mut data_points = Vec::new();

        let mut reported = match self.reported.lock() {
            Ok(r) => r,
            Err(_) => {
                return self.empty(time.start, time.end, Temporality::Delta);
            }
        };
        let mut new_reported = FxHashMap::default();

        self.value_map
            .collect_and_reset(&mut data_points, |attributes, aggr| {
                let curr_value = aggr.value.get_value();
                let prev_value = reported.get(&attributes).copied().unwrap_or_default();
                new_reported.insert(attributes.clone(), curr_value);
                SumDataPoint {
                    attributes,
                    value: curr_value.delta_from(prev_value),
                }
            });

        *reported = new_reported;
        drop(reported);

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
        self.value_map
            .collect_and_reset(&mut data_points, |attributes, aggr| SumDataPoint {
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

    fn empty(
        &self,
        start_time: std::time::SystemTime,
        time: std::time::SystemTime,
        temporality: Temporality,
    ) -> data::Sum<T> {
        data::Sum {
            data_points: Vec::new(),
            start_time,
            time,
            temporality,
            is_monotonic: self.monotonic,
        }
    }
}

impl<T> Measure<T> for PrecomputedSum<T>
where
    T: Number,
{
    fn call(&self, measurement: T, attrs: &[KeyValue]) {
        self.filter.apply(attrs, |filtered| {
            self.value_map.measure(measurement, filtered);
        })
    }
}

impl<T> ComputeAggregation for PrecomputedSum<T>
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

    fn precomputed(temporality: Temporality) -> PrecomputedSum<u64> {
        PrecomputedSum::new(
            temporality,
            AttributeFilter::new(None),
            true,
            DEFAULT_CARDINALITY_LIMIT,
        )
    }

    #[test]
    fn cumulative_reports_observed_total() {
        let sum = precomputed(Temporality::Cumulative);
        Measure::call(&sum, 10, &[KeyValue::new("cpu", 0)]);
        Measure::call(&sum, 5, &[KeyValue::new("cpu", 0)]);
        Measure::call(&sum, 7, &[KeyValue::new("cpu", 1)]);

        let mut points = sum.cumulative().data_points;
        points.sort_by_key(|p| p.value);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 7);
        assert_eq!(points[1].value, 15);

        // nothing observed this cycle means nothing reported
        assert!(sum.cumulative().data_points.is_empty());
    }

    #[test]
    fn delta_reports_change_since_last_cycle() {
        let sum = precomputed(Temporality::Delta);
        Measure::call(&sum, 10, &[KeyValue::new("cpu", 0)]);
        assert_eq!(sum.delta().data_points[0].value, 10);

        Measure::call(&sum, 25, &[KeyValue::new("cpu", 0)]);
        assert_eq!(sum.delta().data_points[0].value, 15);

        // a series that disappears starts over when it comes back
        assert!(sum.delta().data_points.is_empty());
        Measure::call(&sum, 30, &[KeyValue::new("cpu", 0)]);
        assert_eq!(sum.delta().data_points[0].value, 30);
    }
}
