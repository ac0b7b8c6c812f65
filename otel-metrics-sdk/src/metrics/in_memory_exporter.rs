use crate::error::{OTelSdkError, OTelSdkResult};
use crate::metrics::data::ResourceMetrics;
use crate::metrics::exporter::PushMetricExporter;
use crate::metrics::Temporality;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Exporter that keeps every collection it receives, for tests.
///
/// Clones share storage, so a test can hand one clone to a
/// [PeriodicReader](crate::metrics::PeriodicReader) and inspect another.
///
/// ```
/// use otel_metrics::metrics::MeterProvider as _;
/// use otel_metrics_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
///
/// let exporter = InMemoryMetricExporter::default();
/// let provider = SdkMeterProvider::builder()
///     .with_reader(PeriodicReader::builder(exporter.clone()).build())
///     .build();
///
/// provider.meter("jobs").u64_counter("completed").init().add(1, &[]);
/// provider.force_flush().unwrap();
///
/// assert_eq!(exporter.get_finished_metrics().unwrap().len(), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryMetricExporter {
    store: Arc<Store>,
    temporality: Temporality,
}

#[derive(Default)]
struct Store {
    exports: Mutex<Vec<ResourceMetrics>>,
    failing: AtomicBool,
    shutdowns: AtomicUsize,
}

impl fmt::Debug for InMemoryMetricExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMetricExporter")
            .field("temporality", &self.temporality)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryMetricExporter {
    fn default() -> Self {
        InMemoryMetricExporterBuilder::new().build()
    }
}

/// Options for an [InMemoryMetricExporter].
///
/// ```
/// use otel_metrics_sdk::metrics::{InMemoryMetricExporterBuilder, Temporality};
///
/// let exporter = InMemoryMetricExporterBuilder::new()
///     .with_temporality(Temporality::Delta)
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct InMemoryMetricExporterBuilder {
    temporality: Temporality,
}

impl InMemoryMetricExporterBuilder {
    /// Builder for a cumulative exporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Temporality requested from the reader.
    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = temporality;
        self
    }

    /// Creates the exporter with empty storage.
    pub fn build(self) -> InMemoryMetricExporter {
        InMemoryMetricExporter {
            store: Arc::default(),
            temporality: self.temporality,
        }
    }
}

impl InMemoryMetricExporter {
    /// Copies of all stored exports, oldest first.
    pub fn get_finished_metrics(&self) -> Result<Vec<ResourceMetrics>, OTelSdkError> {
        Ok(self.store.exports.lock()?.clone())
    }

    /// Forgets all stored exports.
    pub fn reset(&self) {
        if let Ok(mut exports) = self.store.exports.lock() {
            exports.clear();
        }
    }

    /// While set, exports fail and store nothing.
    pub fn set_should_fail(&self, should_fail: bool) {
        self.store.failing.store(should_fail, Ordering::SeqCst);
    }

    /// How often the exporter was shut down.
    pub fn shutdown_count(&self) -> usize {
        self.store.shutdowns.load(Ordering::SeqCst)
    }
}

impl PushMetricExporter for InMemoryMetricExporter {
    async fn export(&self, metrics: &ResourceMetrics) -> OTelSdkResult {
        if self.store.failing.load(Ordering::SeqCst) {
            return Err(OTelSdkError::InternalFailure(
                "in-memory exporter configured to fail".into(),
            ));
        }
        self.store.exports.lock()?.push(metrics.clone());
        Ok(())
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        self.store.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn temporality(&self) -> Temporality {
        self.temporality
    }
}
