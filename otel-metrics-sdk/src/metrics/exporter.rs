//! Push side of the pipeline.

use std::{future::Future, time::Duration};

use crate::error::OTelSdkResult;

use super::{data::ResourceMetrics, Temporality};

/// Destination for collections gathered by a [PeriodicReader].
///
/// The reader never retries. An error returned from [export] is logged and
/// surfaced to whoever triggered the collection.
///
/// [PeriodicReader]: crate::metrics::PeriodicReader
/// [export]: PushMetricExporter::export
pub trait PushMetricExporter: Send + Sync + 'static {
    /// Delivers one collection. Empty collections are never passed in.
    fn export(&self, metrics: &ResourceMetrics) -> impl Future<Output = OTelSdkResult> + Send;

    /// Delivers anything buffered by the exporter itself.
    fn force_flush(&self) -> OTelSdkResult;

    /// Releases the exporter. Later exports should fail with
    /// [AlreadyShutdown](crate::error::OTelSdkError::AlreadyShutdown).
    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult;

    /// [shutdown_with_timeout](PushMetricExporter::shutdown_with_timeout) with
    /// a five second budget.
    fn shutdown(&self) -> OTelSdkResult {
        self.shutdown_with_timeout(Duration::from_secs(5))
    }

    /// Temporality requested for every instrument kind.
    fn temporality(&self) -> Temporality;
}
