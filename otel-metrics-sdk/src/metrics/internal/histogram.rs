use std::mem::replace;
use std::ops::DerefMut;
use std::sync::Mutex;

use otel_metrics::KeyValue;

use crate::metrics::data::{self, AggregatedMetrics, HistogramDataPoint, MetricData, Temporality};

use super::aggregate::{AttributeFilter, CollectionClock};
use super::{Aggregator, ComputeAggregation, Measure, Number, ValueMap};

struct HistogramTracker<T> {
    buckets: Mutex<Buckets<T>>,
}

impl<T> Aggregator for HistogramTracker<T>
where
    T: Number,
{
    type InitConfig = usize;
    /// Value and bucket index
    type PreComputedValue = (T, usize);

    fn create(count: &usize) -> Self {
        HistogramTracker {
            buckets: Mutex::new(Buckets::<T>::new(*count)),
        }
    }

    fn update(&self, (value, index): (T, usize)) {
        let mut buckets = self.buckets.lock().unwrap_or_else(|err| err.into_inner());
        buckets.bin(index, value);
        buckets.sum(value);
    }

    fn clone_and_reset(&self, count: &usize) -> Self {
        let mut current = self.buckets.lock().unwrap_or_else(|err| err.into_inner());
        let cloned = replace(current.deref_mut(), Buckets::new(*count));
        Self {
            buckets: Mutex::new(cloned),
        }
    }
}

#[derive(Default)]
struct Buckets<T> {
    counts: Vec<u64>,
    count: u64,
    total: T,
    min: T,
    max: T,
}

impl<T: Number> Buckets<T> {
    /// returns buckets with `n` bins.
    fn new(n: usize) -> Buckets<T> {
        Buckets {
            counts: vec![0; n],
            min: T::max(),
            max: T::min(),
            ..Default::default()
        }
    }

    fn sum(&mut self, value: T) {
        self.total += value;
    }

    fn bin(&mut self, idx: usize, value: T) {
        self.counts[idx] += 1;
        self.count += 1;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value
        }
    }
}

/// Summarizes a set of measurements as a histogram with explicitly defined
/// buckets.
pub(crate) struct Histogram<T: Number> {
    value_map: ValueMap<HistogramTracker<T>>,
    clock: CollectionClock,
    temporality: Temporality,
    filter: AttributeFilter,
    bounds: Vec<f64>,
    record_min_max: bool,
}

impl<T: Number> Histogram<T> {
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeFilter,
        mut bounds: Vec<f64>,
        record_min_max: bool,
        cardinality_limit: usize,
    ) -> Self {
        bounds.retain(|v| v.is_finite());
        bounds.sort_by(|a, b| a.total_cmp(b));
        bounds.dedup();
        let buckets_count = bounds.len() + 1;

        Histogram {
            value_map: ValueMap::new(buckets_count, cardinality_limit),
            clock: CollectionClock::default(),
            temporality,
            filter,
            bounds,
            record_min_max,
        }
    }

    fn data_point(&self, attributes: Vec<KeyValue>, b: &Buckets<T>) -> HistogramDataPoint<T> {
        HistogramDataPoint {
            attributes,
            count: b.count,
            bounds: self.bounds.clone(),
            bucket_counts: b.counts.clone(),
            sum: b.total,
            min: self.record_min_max.then_some(b.min),
            max: self.record_min_max.then_some(b.max),
        }
    }

    fn delta(&self) -> data::Histogram<T> {
        let time = self.clock.advance();
        let mut data_points = Vec::new();
        self.value_map
            .collect_and_reset(&mut data_points, |attributes, aggr| {
                let b = aggr
                    .buckets
                    .into_inner()
                    .unwrap_or_else(|err| err.into_inner());
                self.data_point(attributes, &b)
            });

        data::Histogram {
            data_points,
            start_time: time.start,
            time: time.end,
            temporality: Temporality::Delta,
        }
    }

    fn cumulative(&self) -> data::Histogram<T> {
        let time = self.clock.since_start();
        let mut data_points = Vec::new();
        self.value_map
            .collect_readonly(&mut data_points, |attributes, aggr| {
                let b = aggr.buckets.lock().unwrap_or_else(|err| err.into_inner());
                self.data_point(attributes, &b)
            });

        data::Histogram {
            data_points,
            start_time: time.start,
            time: time.end,
            temporality: Temporality::Cumulative,
        }
    }
}

impl<T> Measure<T> for Histogram<T>
where
    T: Number,
{
    fn call(&self, measurement: T, attrs: &[KeyValue]) {
        let f = measurement.into_float();
        // NaN and infinities have no bucket
        if !f.is_finite() {
            return;
        }
        // This search will return an index in the range `[0, bounds.len()]`, where
        // it will return `bounds.len()` if value is greater than the last element
        // of `bounds`. This aligns with the buckets in that the length of buckets
        // is `bounds.len()+1`, with the last bucket representing:
        // `(bounds[bounds.len()-1], +∞)`.
        let index = self.bounds.partition_point(|&x| x < f);

        self.filter.apply(attrs, |filtered| {
            self.value_map.measure((measurement, index), filtered);
        })
    }
}

impl<T> ComputeAggregation for Histogram<T>
where
    T: Number,
{
    fn call(&self) -> (usize, AggregatedMetrics) {
        let histogram = match self.temporality {
            Temporality::Delta => self.delta(),
            Temporality::Cumulative => self.cumulative(),
        };
        (
            histogram.data_points.len(),
            T::make_aggregated_metrics(MetricData::Histogram(histogram)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::internal::DEFAULT_CARDINALITY_LIMIT;

    fn histogram(temporality: Temporality, bounds: Vec<f64>) -> Histogram<f64> {
        Histogram::new(
            temporality,
            AttributeFilter::new(None),
            bounds,
            true,
            DEFAULT_CARDINALITY_LIMIT,
        )
    }

    #[test]
    fn values_land_in_upper_inclusive_buckets() {
        let h = histogram(Temporality::Cumulative, vec![10.0, 0.0, 5.0, 5.0, f64::NAN]);
        for v in [0.0, 3.0, 5.0, 7.0, 10.0, 11.0, f64::INFINITY] {
            Measure::call(&h, v, &[]);
        }

        let data = h.cumulative();
        let point = &data.data_points[0];
        assert_eq!(point.bounds, vec![0.0, 5.0, 10.0]);
        assert_eq!(point.bucket_counts, vec![1, 2, 2, 1]);
        assert_eq!(point.count, 6);
        assert_eq!(point.sum, 36.0);
        assert_eq!(point.min, Some(0.0));
        assert_eq!(point.max, Some(11.0));
    }

    #[test]
    fn delta_resets_buckets() {
        let h = histogram(Temporality::Delta, vec![1.0]);
        Measure::call(&h, 0.5, &[KeyValue::new("k", 1)]);
        Measure::call(&h, 2.0, &[KeyValue::new("k", 1)]);
        assert_eq!(h.delta().data_points[0].bucket_counts, vec![1, 1]);

        Measure::call(&h, 2.0, &[KeyValue::new("k", 1)]);
        let second = h.delta();
        assert_eq!(second.data_points[0].bucket_counts, vec![0, 1]);
        assert_eq!(second.data_points[0].min, Some(2.0));
    }

    #[test]
    fn min_max_can_be_omitted() {
        let h = Histogram::<u64>::new(
            Temporality::Cumulative,
            AttributeFilter::new(None),
            vec![],
            false,
            DEFAULT_CARDINALITY_LIMIT,
        );
        Measure::call(&h, 4, &[]);
        let data = h.cumulative();
        let point = &data.data_points[0];
        assert_eq!(point.bucket_counts, vec![1]);
        assert_eq!(point.min, None);
        assert_eq!(point.sum, 4);
    }
}
