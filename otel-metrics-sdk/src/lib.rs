//! # otel-metrics SDK
//!
//! This crate implements the in-process metrics pipeline behind the
//! `otel-metrics` API. Instruments record measurements into aggregators
//! chosen by views, readers collect the aggregated state into snapshots,
//! and push exporters receive those snapshots from a periodic reader.
//!
//! ## Getting started
//!
//! ```
//! use otel_metrics::metrics::MeterProvider;
//! use otel_metrics::KeyValue;
//! use otel_metrics_sdk::metrics::{ManualReader, SdkMeterProvider};
//!
//! let provider = SdkMeterProvider::builder()
//!     .with_reader(ManualReader::builder().build())
//!     .build();
//!
//! let meter = provider.meter("my-service");
//! let counter = meter.u64_counter("requests").with_unit("1").init();
//! counter.add(1, &[KeyValue::new("status", "ok")]);
//!
//! provider.shutdown().unwrap();
//! ```
//!
//! See the [`metrics`] module for configuration of views, readers and
//! exporters.
//!
//! ## Crate Feature Flags
//!
//! * `internal-logs`: forwards diagnostics of the pipeline to `tracing`.
//!   Enabled by default.
//! * `testing`: exposes the in-memory exporter used to inspect exported
//!   snapshots in tests.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![allow(clippy::needless_doctest_main)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod error;
pub mod metrics;
pub mod resource;

pub use resource::Resource;
