use otel_metrics::KeyValue;

use crate::metrics::data::{self, AggregatedMetrics, GaugeDataPoint, MetricData, Temporality};

use super::aggregate::{AttributeFilter, CollectionClock};
use super::{Aggregator, AtomicTracker, AtomicallyUpdate, ComputeAggregation, Measure, Number};
use super::ValueMap;

/// The most recent value of one attribute set.
struct Assign<T>
where
    T: AtomicallyUpdate<T>,
{
    value: T::AtomicTracker,
}

impl<T> Aggregator for Assign<T>
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
        self.value.store(value)
    }

    fn clone_and_reset(&self, _: &()) -> Self {
        Self {
            value: T::new_atomic_tracker(self.value.get_and_reset_value()),
        }
    }
}

/// Summarizes a set of measurements as the last one made.
///
/// Only observable gauges use this aggregate, so every collection reports the
/// values observed during that cycle and then forgets them.
pub(crate) struct LastValue<T: Number> {
    value_map: ValueMap<Assign<T>>,
    clock: CollectionClock,
    temporality: Temporality,
    filter: AttributeFilter,
}

impl<T: Number> LastValue<T> {
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeFilter,
        cardinality_limit: usize,
    ) -> Self {
        LastValue {
            value_map: ValueMap::new((), cardinality_limit),
            clock: CollectionClock::default(),
            temporality,
            filter,
        }
    }

    fn gauge(&self) -> data::Gauge<T> {
        let time = self.clock.for_temporality(self.temporality);
        let mut data_points = Vec::new();
        self.value_map
            .collect_and_reset(&mut data_points, |attributes, aggr| GaugeDataPoint {
                attributes,
                value: aggr.value.get_value(),
            });

        data::Gauge {
            data_points,
            start_time: Some(time.start),
            time: time.end,
        }
    }
}

impl<T> Measure<T> for LastValue<T>
where
    T: Number,
{
    fn call(&self, measurement: T, attrs: &[KeyValue]) {
        self.filter.apply(attrs, |filtered| {
            self.value_map.measure(measurement, filtered);
        })
    }
}

impl<T> ComputeAggregation for LastValue<T>
where
    T: Number,
{
    fn call(&self) -> (usize, AggregatedMetrics) {
        let gauge = self.gauge();
        (
            gauge.data_points.len(),
            T::make_aggregated_metrics(MetricData::Gauge(gauge)),
        )
    }
}
