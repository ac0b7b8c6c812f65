//! Collected metric data as handed to readers and exporters.
//!
//! Every collection builds a fresh [ResourceMetrics]. Nothing in the pipeline
//! holds on to it afterwards, so a reader may keep or mutate what it receives.

use std::{borrow::Cow, time::SystemTime};

use otel_metrics::{InstrumentationScope, KeyValue};

use crate::Resource;

/// Whether reported values cover the last collection interval or everything
/// since the stream started.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Temporality {
    /// Values accumulate from a fixed start time and are never reset.
    #[default]
    Cumulative,
    /// Values cover only the interval since the previous collection.
    Delta,
}

/// Output of one collection: the resource plus one entry per meter scope.
#[derive(Debug, Clone)]
pub struct ResourceMetrics {
    /// Resource of the provider that produced the data.
    pub resource: Resource,
    /// Per scope output, ordered by first instrument registration.
    pub scope_metrics: Vec<ScopeMetrics>,
}

impl Default for ResourceMetrics {
    fn default() -> Self {
        ResourceMetrics {
            resource: Resource::empty(),
            scope_metrics: Vec::new(),
        }
    }
}

impl ResourceMetrics {
    /// All metrics across scopes, in output order.
    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.scope_metrics.iter().flat_map(|scope| scope.metrics.iter())
    }
}

/// Metrics recorded through meters sharing one [InstrumentationScope].
#[derive(Default, Debug, Clone)]
pub struct ScopeMetrics {
    /// Scope shared by the contributing meters.
    pub scope: InstrumentationScope,
    /// One entry per stream with at least one data point.
    pub metrics: Vec<Metric>,
}

/// A named stream and its data points.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Stream name, after any view renaming.
    pub name: Cow<'static, str>,
    /// Stream description.
    pub description: Cow<'static, str>,
    /// Unit of the reported values.
    pub unit: Cow<'static, str>,
    /// Aggregated points, typed by number kind.
    pub data: AggregatedMetrics,
}

/// Aggregated points tagged with the instrument's number kind.
#[derive(Debug, Clone)]
pub enum AggregatedMetrics {
    /// Floating point instruments.
    F64(MetricData<f64>),
    /// Unsigned integer instruments.
    U64(MetricData<u64>),
    /// Signed integer instruments.
    I64(MetricData<i64>),
}

/// Aggregated points for one number kind.
#[derive(Debug, Clone)]
pub enum MetricData<T> {
    /// Last value per attribute set.
    Gauge(Gauge<T>),
    /// Running or windowed totals.
    Sum(Sum<T>),
    /// Bucketed distributions.
    Histogram(Histogram<T>),
}

macro_rules! number_kind {
    ($($ty:ty => $variant:ident),*) => {
        $(impl From<MetricData<$ty>> for AggregatedMetrics {
            fn from(data: MetricData<$ty>) -> Self {
                AggregatedMetrics::$variant(data)
            }
        })*
    };
}

number_kind!(f64 => F64, u64 => U64, i64 => I64);

macro_rules! metric_data {
    ($($agg:ident),*) => {
        $(impl<T> From<$agg<T>> for MetricData<T> {
            fn from(data: $agg<T>) -> Self {
                MetricData::$agg(data)
            }
        })*
    };
}

metric_data!(Gauge, Sum, Histogram);

/// Latest observed value for one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeDataPoint<T> {
    /// Attribute set, sorted by key.
    pub attributes: Vec<KeyValue>,
    /// Aggregated value.
    pub value: T,
}

/// Gauge points with their collection window.
#[derive(Debug, Clone)]
pub struct Gauge<T> {
    /// One point per attribute set.
    pub data_points: Vec<GaugeDataPoint<T>>,
    /// Start of the window, when the aggregation tracks one.
    pub start_time: Option<SystemTime>,
    /// Collection time.
    pub time: SystemTime,
}

/// Total for one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct SumDataPoint<T> {
    /// Attribute set, sorted by key.
    pub attributes: Vec<KeyValue>,
    /// Aggregated value.
    pub value: T,
}

/// Sum points with their window and temporality.
#[derive(Debug, Clone)]
pub struct Sum<T> {
    /// One point per attribute set.
    pub data_points: Vec<SumDataPoint<T>>,
    /// Previous delta collection, or stream creation for cumulative output.
    pub start_time: SystemTime,
    /// Collection time.
    pub time: SystemTime,
    /// Window the values cover.
    pub temporality: Temporality,
    /// Set for counters, whose totals never decrease.
    pub is_monotonic: bool,
}

/// Histogram points with their window and temporality.
#[derive(Debug, Clone)]
pub struct Histogram<T> {
    /// One point per attribute set.
    pub data_points: Vec<HistogramDataPoint<T>>,
    /// Previous delta collection, or stream creation for cumulative output.
    pub start_time: SystemTime,
    /// Collection time.
    pub time: SystemTime,
    /// Window the values cover.
    pub temporality: Temporality,
}

/// Distribution of the measurements for one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramDataPoint<T> {
    /// Attribute set, sorted by key.
    pub attributes: Vec<KeyValue>,
    /// Number of measurements.
    pub count: u64,
    /// Ascending upper bucket bounds. The `+inf` bucket is implicit.
    pub bounds: Vec<f64>,
    /// `bounds.len() + 1` counts, summing to `count`.
    pub bucket_counts: Vec<u64>,
    /// Smallest measurement, if min/max recording is enabled.
    pub min: Option<T>,
    /// Largest measurement, if min/max recording is enabled.
    pub max: Option<T>,
    /// Sum of all measurements.
    pub sum: T,
}
