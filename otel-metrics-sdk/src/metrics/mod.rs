//! The in-process metrics pipeline.
//!
//! ## Configuration
//!
//! The pipeline configuration is stored with each [SdkMeterProvider].
//! Configuration for [Resource]s, [View]s, and [ManualReader] or
//! [PeriodicReader] instances can be specified.
//!
//! ### Example
//!
//! ```
//! use otel_metrics::metrics::MeterProvider;
//! use otel_metrics::KeyValue;
//! use otel_metrics_sdk::metrics::{reader::MetricReader, ManualReader, SdkMeterProvider};
//! use otel_metrics_sdk::Resource;
//! # use std::sync::{Arc, Weak};
//! # use otel_metrics_sdk::metrics::{data::ResourceMetrics, Pipeline, InstrumentKind, Temporality};
//! # use otel_metrics_sdk::metrics::reader::MetricProducer;
//! # use otel_metrics_sdk::error::OTelSdkResult;
//! # #[derive(Debug, Clone)]
//! # struct Shared(Arc<ManualReader>);
//! # impl MetricReader for Shared {
//! #     fn register_pipeline(&self, p: Weak<Pipeline>) { self.0.register_pipeline(p) }
//! #     fn register_producer(&self, p: Box<dyn MetricProducer>) { self.0.register_producer(p) }
//! #     fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult { self.0.collect(rm) }
//! #     fn force_flush(&self) -> OTelSdkResult { self.0.force_flush() }
//! #     fn shutdown(&self) -> OTelSdkResult { self.0.shutdown() }
//! #     fn temporality(&self, kind: InstrumentKind) -> Temporality { self.0.temporality(kind) }
//! # }
//!
//! // Describe the entity producing the telemetry
//! let resource = Resource::builder().with_service_name("my_app").build();
//!
//! // Create a meter provider with a reader that collects on demand
//! let reader = Shared(Arc::new(ManualReader::builder().build()));
//! let meter_provider = SdkMeterProvider::builder()
//!     .with_resource(resource)
//!     .with_reader(reader.clone())
//!     .build();
//!
//! // Use the meter provider to create meter instances
//! let meter = meter_provider.meter("my_app");
//!
//! // Create instruments scoped to the meter
//! let counter = meter
//!     .u64_counter("power_consumption")
//!     .with_unit("kWh")
//!     .init();
//!
//! // use instruments to record measurements
//! counter.add(10, &[KeyValue::new("rate", "standard")]);
//!
//! let mut rm = ResourceMetrics::default();
//! reader.collect(&mut rm).unwrap();
//! assert_eq!(rm.metrics().count(), 1);
//!
//! // shutdown the provider at the end of the application to ensure any metrics not yet
//! // exported are flushed.
//! meter_provider.shutdown().unwrap();
//! ```
//!
//! [Resource]: crate::Resource

pub(crate) mod aggregation;
pub(crate) mod attribute_set;
pub mod data;
pub mod exporter;
pub(crate) mod instrument;
pub(crate) mod internal;
pub(crate) mod manual_reader;
pub(crate) mod meter;
mod meter_provider;
pub(crate) mod periodic_reader;
pub(crate) mod pipeline;
pub mod reader;
pub(crate) mod view;

/// In-Memory metric exporter for testing purpose.
#[cfg(any(feature = "testing", test))]
#[cfg_attr(docsrs, doc(cfg(any(feature = "testing", test))))]
pub mod in_memory_exporter;
#[cfg(any(feature = "testing", test))]
#[cfg_attr(docsrs, doc(cfg(any(feature = "testing", test))))]
pub use in_memory_exporter::{InMemoryMetricExporter, InMemoryMetricExporterBuilder};

pub use aggregation::Aggregation;
pub use data::Temporality;
pub use instrument::{Instrument, InstrumentKind, Stream, StreamBuilder};
pub use manual_reader::{ManualReader, ManualReaderBuilder};
pub use meter_provider::{MeterProviderBuilder, SdkMeterProvider};
pub use periodic_reader::{PeriodicReader, PeriodicReaderBuilder};
pub use pipeline::Pipeline;
pub use view::{new_view, View};
