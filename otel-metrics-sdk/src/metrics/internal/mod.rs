mod aggregate;
mod histogram;
mod last_value;
mod precomputed_sum;
mod sum;

use core::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use otel_metrics::{otel_warn, KeyValue};
use rustc_hash::FxHashMap;

use crate::metrics::attribute_set::{is_canonical, sort_and_dedup};
use crate::metrics::data::{AggregatedMetrics, MetricData};

pub(crate) use aggregate::{AggregateBuilder, AggregateFns, ComputeAggregation, Measure};

/// Attribute key marking the point that absorbs measurements once a stream
/// reached its cardinality limit.
pub(crate) const OVERFLOW_ATTRIBUTE_KEY: &str = "otel.metric.overflow";

/// Default number of distinct attribute sets a stream keeps per collection.
pub(crate) const DEFAULT_CARDINALITY_LIMIT: usize = 2000;

pub(crate) fn overflow_attributes() -> Vec<KeyValue> {
    vec![KeyValue::new(OVERFLOW_ATTRIBUTE_KEY, true)]
}

/// Aggregator state kept for a single attribute set.
pub(crate) trait Aggregator: Send + Sync + 'static {
    /// Configuration shared by every tracker of one aggregate.
    type InitConfig: Send + Sync + 'static;

    /// The value handed to [`Aggregator::update`].
    type PreComputedValue;

    /// Creates a fresh tracker.
    fn create(init: &Self::InitConfig) -> Self;

    /// Merges a measurement into the tracker.
    fn update(&self, value: Self::PreComputedValue);

    /// Returns the accumulated state and leaves `self` as if just created.
    fn clone_and_reset(&self, init: &Self::InitConfig) -> Self;
}

struct Trackers<A> {
    /// Lookup table, keyed by every attribute order seen so far.
    all: FxHashMap<Vec<KeyValue>, Arc<A>>,
    /// One entry per series, keyed by canonical attributes.
    sorted: FxHashMap<Vec<KeyValue>, Arc<A>>,
    overflow: Option<Arc<A>>,
}

impl<A> Default for Trackers<A> {
    fn default() -> Self {
        Trackers {
            all: FxHashMap::default(),
            sorted: FxHashMap::default(),
            overflow: None,
        }
    }
}

/// Maps attribute sets to their aggregator state.
///
/// Updates only ever hold the read lock, so different attribute sets never
/// contend with each other. A collection that resets state takes the write
/// lock, which means every measurement lands either before or after the
/// reset, never in both windows and never in neither.
pub(crate) struct ValueMap<A: Aggregator> {
    trackers: RwLock<Trackers<A>>,
    config: A::InitConfig,
    cardinality_limit: usize,
    overflow_reported: AtomicBool,
}

impl<A: Aggregator> ValueMap<A> {
    pub(crate) fn new(config: A::InitConfig, cardinality_limit: usize) -> Self {
        ValueMap {
            trackers: RwLock::new(Trackers::default()),
            config,
            cardinality_limit: cardinality_limit.max(1),
            overflow_reported: AtomicBool::new(false),
        }
    }

    pub(crate) fn measure(&self, value: A::PreComputedValue, attributes: &[KeyValue]) {
        let Ok(trackers) = self.trackers.read() else {
            return;
        };
        if let Some(tracker) = trackers.all.get(attributes) {
            tracker.update(value);
            return;
        }
        drop(trackers);

        let Ok(mut trackers) = self.trackers.write() else {
            return;
        };

        // another writer may have inserted the set in the meantime
        if let Some(tracker) = trackers.all.get(attributes) {
            tracker.update(value);
            return;
        }

        let canonical = sort_and_dedup(attributes);
        if let Some(tracker) = trackers.sorted.get(&canonical).cloned() {
            tracker.update(value);
            trackers.all.insert(attributes.to_vec(), tracker);
            return;
        }

        if trackers.sorted.len() < self.cardinality_limit {
            let tracker = Arc::new(A::create(&self.config));
            tracker.update(value);
            if !is_canonical(attributes) {
                trackers.all.insert(attributes.to_vec(), Arc::clone(&tracker));
            }
            trackers.all.insert(canonical.clone(), Arc::clone(&tracker));
            trackers.sorted.insert(canonical, tracker);
            return;
        }

        let config = &self.config;
        trackers
            .overflow
            .get_or_insert_with(|| Arc::new(A::create(config)))
            .update(value);
        if !self.overflow_reported.swap(true, Ordering::Relaxed) {
            otel_warn!(
                name: "ValueMap.CardinalityLimitReached",
                message = "Maximum data points for metric stream exceeded. Entry added to overflow.",
                cardinality_limit = self.cardinality_limit as u64
            );
        }
    }

    /// Maps every series to a data point without changing any state.
    pub(crate) fn collect_readonly<Res, MapFn>(&self, dest: &mut Vec<Res>, mut map_fn: MapFn)
    where
        MapFn: FnMut(Vec<KeyValue>, &A) -> Res,
    {
        let Ok(trackers) = self.trackers.read() else {
            return;
        };
        dest.reserve(trackers.sorted.len() + 1);
        for (attrs, tracker) in trackers.sorted.iter() {
            dest.push(map_fn(attrs.clone(), tracker));
        }
        if let Some(overflow) = &trackers.overflow {
            dest.push(map_fn(overflow_attributes(), overflow));
        }
    }

    /// Maps every series to a data point and forgets all of them.
    pub(crate) fn collect_and_reset<Res, MapFn>(&self, dest: &mut Vec<Res>, mut map_fn: MapFn)
    where
        MapFn: FnMut(Vec<KeyValue>, A) -> Res,
    {
        let Ok(mut trackers) = self.trackers.write() else {
            return;
        };
        let Trackers {
            all,
            sorted,
            overflow,
        } = &mut *trackers;
        all.clear();
        dest.reserve(sorted.len() + 1);
        for (attrs, tracker) in sorted.drain() {
            dest.push(map_fn(attrs, tracker.clone_and_reset(&self.config)));
        }
        if let Some(overflow) = overflow.take() {
            dest.push(map_fn(
                overflow_attributes(),
                overflow.clone_and_reset(&self.config),
            ));
        }
    }

    #[cfg(test)]
    fn series_count(&self) -> usize {
        use std::collections::HashSet;

        self.trackers
            .read()
            .map(|trackers| {
                let mut seen = HashSet::new();
                trackers
                    .all
                    .values()
                    .filter(|tracker| seen.insert(Arc::as_ptr(tracker)))
                    .count()
            })
            .unwrap_or(0)
    }
}

/// Atomically updated numeric cell.
pub(crate) trait AtomicTracker<T>: Sync + Send + 'static {
    fn store(&self, value: T);
    fn add(&self, value: T);
    fn get_value(&self) -> T;
    fn get_and_reset_value(&self) -> T;
}

/// Marks a type that can have an atomic tracker generated for it.
pub(crate) trait AtomicallyUpdate<T> {
    type AtomicTracker: AtomicTracker<T>;
    fn new_atomic_tracker(init: T) -> Self::AtomicTracker;
}

/// The numeric types instruments record: `u64`, `i64` and `f64`.
pub(crate) trait Number:
    Add<Output = Self>
    + AddAssign
    + Sub<Output = Self>
    + PartialOrd
    + fmt::Debug
    + fmt::Display
    + Clone
    + Copy
    + PartialEq
    + Default
    + Send
    + Sync
    + 'static
    + AtomicallyUpdate<Self>
{
    /// Name used in diagnostics.
    const TYPE_NAME: &'static str;

    fn min() -> Self;
    fn max() -> Self;

    fn into_float(self) -> f64;

    /// The change from `previous` to `self`.
    ///
    /// For unsigned values a decrease means the observed total was reset, in
    /// which case the new total is the change.
    fn delta_from(self, previous: Self) -> Self;

    /// Wraps data of this number type into the type-erased metric payload.
    fn make_aggregated_metrics(data: MetricData<Self>) -> AggregatedMetrics;
}

impl Number for i64 {
    const TYPE_NAME: &'static str = "i64";

    fn min() -> Self {
        i64::MIN
    }

    fn max() -> Self {
        i64::MAX
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }

    fn delta_from(self, previous: Self) -> Self {
        self.wrapping_sub(previous)
    }

    fn make_aggregated_metrics(data: MetricData<Self>) -> AggregatedMetrics {
        AggregatedMetrics::I64(data)
    }
}

impl Number for u64 {
    const TYPE_NAME: &'static str = "u64";

    fn min() -> Self {
        u64::MIN
    }

    fn max() -> Self {
        u64::MAX
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }

    fn delta_from(self, previous: Self) -> Self {
        self.checked_sub(previous).unwrap_or(self)
    }

    fn make_aggregated_metrics(data: MetricData<Self>) -> AggregatedMetrics {
        AggregatedMetrics::U64(data)
    }
}

impl Number for f64 {
    const TYPE_NAME: &'static str = "f64";

    fn min() -> Self {
        f64::MIN
    }

    fn max() -> Self {
        f64::MAX
    }

    fn into_float(self) -> f64 {
        self
    }

    fn delta_from(self, previous: Self) -> Self {
        self - previous
    }

    fn make_aggregated_metrics(data: MetricData<Self>) -> AggregatedMetrics {
        AggregatedMetrics::F64(data)
    }
}

impl AtomicTracker<u64> for AtomicU64 {
    fn store(&self, value: u64) {
        self.store(value, Ordering::Relaxed);
    }

    fn add(&self, value: u64) {
        self.fetch_add(value, Ordering::Relaxed);
    }

    fn get_value(&self) -> u64 {
        self.load(Ordering::Relaxed)
    }

    fn get_and_reset_value(&self) -> u64 {
        self.swap(0, Ordering::Relaxed)
    }
}

impl AtomicallyUpdate<u64> for u64 {
    type AtomicTracker = AtomicU64;

    fn new_atomic_tracker(init: u64) -> Self::AtomicTracker {
        AtomicU64::new(init)
    }
}

impl AtomicTracker<i64> for AtomicI64 {
    fn store(&self, value: i64) {
        self.store(value, Ordering::Relaxed);
    }

    fn add(&self, value: i64) {
        self.fetch_add(value, Ordering::Relaxed);
    }

    fn get_value(&self) -> i64 {
        self.load(Ordering::Relaxed)
    }

    fn get_and_reset_value(&self) -> i64 {
        self.swap(0, Ordering::Relaxed)
    }
}

impl AtomicallyUpdate<i64> for i64 {
    type AtomicTracker = AtomicI64;

    fn new_atomic_tracker(init: i64) -> Self::AtomicTracker {
        AtomicI64::new(init)
    }
}

/// An `f64` stored as its bit pattern; additions retry until no other
/// writer raced them.
pub(crate) struct F64AtomicTracker {
    inner: AtomicU64,
}

impl F64AtomicTracker {
    fn new(init: f64) -> Self {
        F64AtomicTracker {
            inner: AtomicU64::new(init.to_bits()),
        }
    }
}

impl AtomicTracker<f64> for F64AtomicTracker {
    fn store(&self, value: f64) {
        self.inner.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, value: f64) {
        let mut current = self.inner.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self.inner.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn get_value(&self) -> f64 {
        f64::from_bits(self.inner.load(Ordering::Relaxed))
    }

    fn get_and_reset_value(&self) -> f64 {
        f64::from_bits(self.inner.swap(0.0_f64.to_bits(), Ordering::Relaxed))
    }
}

impl AtomicallyUpdate<f64> for f64 {
    type AtomicTracker = F64AtomicTracker;

    fn new_atomic_tracker(init: f64) -> Self::AtomicTracker {
        F64AtomicTracker::new(init)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        hits: AtomicUsize,
    }

    impl Aggregator for Counting {
        type InitConfig = ();
        type PreComputedValue = usize;

        fn create(_init: &()) -> Self {
            Counting {
                hits: AtomicUsize::new(0),
            }
        }

        fn update(&self, value: usize) {
            self.hits.fetch_add(value, Ordering::Relaxed);
        }

        fn clone_and_reset(&self, _init: &()) -> Self {
            Counting {
                hits: AtomicUsize::new(self.hits.swap(0, Ordering::Relaxed)),
            }
        }
    }

    fn collect(map: &ValueMap<Counting>) -> Vec<(Vec<KeyValue>, usize)> {
        let mut points = Vec::new();
        map.collect_readonly(&mut points, |attrs, tracker| {
            (attrs, tracker.hits.load(Ordering::Relaxed))
        });
        points.sort_by(|a, b| a.1.cmp(&b.1));
        points
    }

    #[test]
    fn attribute_order_collapses_to_one_series() {
        let map = ValueMap::<Counting>::new((), DEFAULT_CARDINALITY_LIMIT);
        map.measure(1, &[KeyValue::new("a", 1), KeyValue::new("b", 2)]);
        map.measure(2, &[KeyValue::new("b", 2), KeyValue::new("a", 1)]);
        map.measure(4, &[KeyValue::new("b", 2), KeyValue::new("a", 1)]);

        assert_eq!(map.series_count(), 1);
        assert_eq!(
            collect(&map),
            vec![(vec![KeyValue::new("a", 1), KeyValue::new("b", 2)], 7)]
        );
    }

    #[test]
    fn empty_attributes_are_a_regular_series() {
        let map = ValueMap::<Counting>::new((), DEFAULT_CARDINALITY_LIMIT);
        map.measure(3, &[]);
        map.measure(1, &[KeyValue::new("a", 1)]);

        assert_eq!(
            collect(&map),
            vec![(vec![KeyValue::new("a", 1)], 1), (vec![], 3)]
        );
    }

    #[test]
    fn new_sets_past_the_limit_fold_into_overflow() {
        let map = ValueMap::<Counting>::new((), 2);
        map.measure(1, &[KeyValue::new("k", 1)]);
        map.measure(1, &[KeyValue::new("k", 2)]);
        map.measure(5, &[KeyValue::new("k", 3)]);
        map.measure(5, &[KeyValue::new("k", 4)]);
        // known sets keep their own series
        map.measure(1, &[KeyValue::new("k", 1)]);

        let points = collect(&map);
        assert_eq!(points.len(), 3);
        assert_eq!(points[2], (overflow_attributes(), 10));
        assert!(points.contains(&(vec![KeyValue::new("k", 1)], 2)));
    }

    #[test]
    fn reset_starts_a_fresh_window() {
        let map = ValueMap::<Counting>::new((), 1);
        map.measure(1, &[KeyValue::new("k", 1)]);
        map.measure(1, &[KeyValue::new("k", 2)]);

        let mut first = Vec::new();
        map.collect_and_reset(&mut first, |attrs, tracker| {
            (attrs, tracker.hits.into_inner())
        });
        assert_eq!(first.len(), 2);
        assert_eq!(map.series_count(), 0);

        // the limit applies per window
        map.measure(7, &[KeyValue::new("k", 2)]);
        assert_eq!(collect(&map), vec![(vec![KeyValue::new("k", 2)], 7)]);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let map = Arc::new(ValueMap::<Counting>::new((), DEFAULT_CARDINALITY_LIMIT));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        map.measure(1, &[KeyValue::new("shared", true)]);
                        map.measure(1, &[KeyValue::new("thread", i as i64)]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let points = collect(&map);
        assert_eq!(points.len(), 5);
        assert_eq!(points[4], (vec![KeyValue::new("shared", true)], 4000));
    }

    #[test]
    fn f64_tracker_accumulates_and_resets() {
        let tracker = f64::new_atomic_tracker(0.0);
        tracker.add(15.3);
        tracker.add(10.4);
        assert!((tracker.get_value() - 25.7).abs() < 1e-9);
        assert!((tracker.get_and_reset_value() - 25.7).abs() < 1e-9);
        assert_eq!(tracker.get_value(), 0.0);
        tracker.store(-2.5);
        assert_eq!(tracker.get_value(), -2.5);
    }

    #[test]
    fn unsigned_delta_treats_decrease_as_reset() {
        assert_eq!(10u64.delta_from(4), 6);
        assert_eq!(3u64.delta_from(4), 3);
        assert_eq!(3i64.delta_from(4), -1);
        assert_eq!(1.5f64.delta_from(0.5), 1.0);
    }
}
