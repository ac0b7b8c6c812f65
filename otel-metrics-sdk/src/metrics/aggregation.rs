use std::fmt;

use otel_metrics::metrics::{MetricsError, Result};

use crate::metrics::InstrumentKind;

/// Bucket boundaries used by histograms that do not configure their own.
pub(crate) const DEFAULT_HISTOGRAM_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// How a stream turns measurements into data points.
///
/// Set per stream through a view, or per instrument kind through a reader's
/// [AggregationSelector](crate::metrics::reader::AggregationSelector).
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Aggregation {
    /// Discard every measurement. The stream produces no output.
    Drop,

    /// Defer to the reader's choice for the instrument kind, which is
    /// [default_aggregation_selector] unless the reader was configured
    /// otherwise.
    ///
    /// [default_aggregation_selector]: crate::metrics::reader::default_aggregation_selector
    Default,

    /// Running total of all measurements.
    Sum,

    /// Most recent measurement.
    LastValue,

    /// Count, sum and per-bucket counts of the measurements.
    ExplicitBucketHistogram {
        /// Strictly increasing, finite upper bounds.
        ///
        /// A value `v` lands in the first bucket whose bound is `>= v`; values
        /// above the last bound land in an extra overflow bucket. `[0.0, 10.0]`
        /// therefore yields the buckets `(-inf, 0]`, `(0, 10]` and `(10, +inf)`.
        /// An empty list keeps a single bucket holding every value.
        boundaries: Vec<f64>,

        /// Whether data points carry the smallest and largest value seen.
        record_min_max: bool,
    },
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Aggregation::Drop => "Drop",
            Aggregation::Default => "Default",
            Aggregation::Sum => "Sum",
            Aggregation::LastValue => "LastValue",
            Aggregation::ExplicitBucketHistogram { .. } => "ExplicitBucketHistogram",
        })
    }
}

impl Aggregation {
    /// Rejects histogram boundaries that are not finite or not strictly
    /// increasing. Every other aggregation is always valid.
    pub fn validate(&self) -> Result<()> {
        let Aggregation::ExplicitBucketHistogram { boundaries, .. } = self else {
            return Ok(());
        };
        if let Some(bad) = boundaries.iter().find(|b| !b.is_finite()) {
            return Err(MetricsError::Config(format!(
                "histogram boundary {bad} is not finite"
            )));
        }
        if boundaries.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(MetricsError::Config(format!(
                "histogram boundaries {boundaries:?} are not strictly increasing"
            )));
        }
        Ok(())
    }

    /// Checks that this aggregation can summarize measurements of `kind`.
    ///
    /// | Instrument Kind          | Drop | LastValue | Sum | Histogram |
    /// |--------------------------|------|-----------|-----|-----------|
    /// | Counter                  | ✓    |           | ✓   | ✓         |
    /// | UpDownCounter            | ✓    |           | ✓   |           |
    /// | Histogram                | ✓    |           | ✓   | ✓         |
    /// | Observable Counter       | ✓    |           | ✓   | ✓         |
    /// | Observable UpDownCounter | ✓    |           | ✓   |           |
    /// | Observable Gauge         | ✓    | ✓         |     |           |
    pub(crate) fn is_compatible_with(&self, kind: InstrumentKind) -> Result<()> {
        let compatible = match self {
            Aggregation::Drop | Aggregation::Default => true,
            Aggregation::Sum => kind != InstrumentKind::ObservableGauge,
            Aggregation::LastValue => kind == InstrumentKind::ObservableGauge,
            Aggregation::ExplicitBucketHistogram { .. } => matches!(
                kind,
                InstrumentKind::Counter
                    | InstrumentKind::Histogram
                    | InstrumentKind::ObservableCounter
            ),
        };

        if compatible {
            Ok(())
        } else {
            Err(MetricsError::Other(format!(
                "incompatible aggregation: {} is not valid for {:?} instruments",
                self, kind
            )))
        }
    }
}
