use core::fmt;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use otel_metrics::{
    metrics::{Meter, MeterProvider},
    otel_debug, otel_error, otel_info, otel_warn, InstrumentationScope,
};

use crate::error::{OTelSdkError, OTelSdkResult};
use crate::Resource;

use super::{
    exporter::PushMetricExporter, meter::SdkMeter, pipeline::Pipelines, reader::MetricReader,
    view::View, PeriodicReader,
};

/// Entry point of the SDK: owns one pipeline per reader and hands out meters.
///
/// Every meter shares the provider's [Resource], views and readers. The type
/// is a handle; clones refer to the same provider. Dropping the last handle
/// shuts the provider down unless [shutdown](SdkMeterProvider::shutdown) was
/// already called.
///
/// ```
/// use otel_metrics::metrics::MeterProvider as _;
/// use otel_metrics_sdk::metrics::{ManualReader, SdkMeterProvider};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = SdkMeterProvider::builder()
///     .with_reader(ManualReader::builder().build())
///     .build();
/// provider.meter("checkout").u64_counter("orders").init().add(1, &[]);
///
/// provider.force_flush()?;
/// provider.shutdown()?;
/// assert!(provider.shutdown().is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct SdkMeterProvider {
    inner: Arc<ProviderState>,
}

#[derive(Debug)]
struct ProviderState {
    pipelines: Arc<Pipelines>,
    meters: Mutex<HashMap<InstrumentationScope, Arc<SdkMeter>>>,
    is_shutdown: AtomicBool,
}

impl ProviderState {
    fn ensure_running(&self) -> OTelSdkResult {
        if self.is_shutdown.load(Ordering::Acquire) {
            Err(OTelSdkError::AlreadyShutdown)
        } else {
            Ok(())
        }
    }

    fn shutdown(&self) -> OTelSdkResult {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        self.pipelines.shutdown()
    }

    fn meter(&self, scope: InstrumentationScope) -> Arc<SdkMeter> {
        let mut meters = self.meters.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(meters.entry(scope).or_insert_with_key(|scope| {
            otel_debug!(name: "MeterProvider.MeterCreated", meter_name = scope.name());
            Arc::new(SdkMeter::new(scope.clone(), Arc::clone(&self.pipelines)))
        }))
    }
}

impl Drop for ProviderState {
    fn drop(&mut self) {
        if self.is_shutdown.load(Ordering::Acquire) {
            return;
        }
        otel_debug!(name: "MeterProvider.ShutdownOnDrop");
        if let Err(err) = self.shutdown() {
            otel_error!(
                name: "MeterProvider.ShutdownOnDropFailed",
                error = format!("{err}")
            );
        }
    }
}

impl Default for SdkMeterProvider {
    fn default() -> Self {
        SdkMeterProvider::builder().build()
    }
}

impl SdkMeterProvider {
    /// Starts an empty [MeterProviderBuilder].
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::default()
    }

    /// Flushes every reader.
    ///
    /// All readers are flushed even when some fail. A single failure is
    /// returned as is; several are merged into one error.
    pub fn force_flush(&self) -> OTelSdkResult {
        self.inner.ensure_running()?;
        self.inner.pipelines.force_flush()
    }

    /// Shuts every reader down.
    ///
    /// Only the first call has an effect; later calls return
    /// [OTelSdkError::AlreadyShutdown]. Meters and instruments stay usable
    /// afterwards but nothing they record is collected any more.
    pub fn shutdown(&self) -> OTelSdkResult {
        otel_info!(name: "MeterProvider.ShutdownRequested");
        self.inner.shutdown()
    }
}

impl MeterProvider for SdkMeterProvider {
    fn meter_with_scope(&self, scope: InstrumentationScope) -> Meter {
        if scope.name().is_empty() {
            otel_warn!(
                name: "MeterProvider.EmptyMeterName",
                message = "meter created with an empty name; the name is used as given"
            );
        }
        Meter::new(self.inner.meter(scope))
    }
}

/// Collects the resource, readers and views of a [SdkMeterProvider].
#[derive(Default)]
pub struct MeterProviderBuilder {
    resource: Option<Resource>,
    readers: Vec<Box<dyn MetricReader>>,
    views: Vec<Arc<dyn View>>,
}

impl MeterProviderBuilder {
    /// Resource attached to everything the provider collects. Defaults to
    /// [Resource::default].
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Adds a reader. Each reader gets its own pipeline; a provider without
    /// readers records nothing.
    pub fn with_reader<T: MetricReader>(mut self, reader: T) -> Self {
        self.readers.push(Box::new(reader));
        self
    }

    /// Adds a [PeriodicReader] for `exporter` with the default interval, or
    /// the one from `OTEL_METRIC_EXPORT_INTERVAL`.
    pub fn with_periodic_exporter<T>(self, exporter: T) -> Self
    where
        T: PushMetricExporter,
    {
        self.with_reader(PeriodicReader::builder(exporter).build())
    }

    /// Adds a view. Views are tried in the order they were added and apply to
    /// every reader.
    pub fn with_view<T: View>(mut self, view: T) -> Self {
        self.views.push(Arc::new(view));
        self
    }

    /// Builds the provider and registers a pipeline with each reader.
    pub fn build(self) -> SdkMeterProvider {
        otel_debug!(
            name: "MeterProvider.Build",
            readers = self.readers.len(),
            views = self.views.len(),
        );
        let pipelines = Pipelines::new(self.resource.unwrap_or_default(), self.readers, self.views);
        SdkMeterProvider {
            inner: Arc::new(ProviderState {
                pipelines: Arc::new(pipelines),
                meters: Mutex::default(),
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}

impl fmt::Debug for MeterProviderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterProviderBuilder")
            .field("resource", &self.resource)
            .field("readers", &self.readers.len())
            .field("views", &self.views.len())
            .finish()
    }
}
