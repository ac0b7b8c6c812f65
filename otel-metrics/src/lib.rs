//! Instrumentation API for the `otel-metrics` collection pipeline.
//!
//! This crate defines the types instrumented code depends on: attributes,
//! instrumentation scopes, meters, and the counter, up-down counter, histogram
//! and observable instruments created from them. It contains no aggregation
//! logic of its own. Without an SDK every instrument is a no-op; the
//! [`otel_metrics_sdk`] crate provides the implementation that aggregates
//! measurements and hands snapshots to readers.
//!
//! Libraries should depend on this crate alone and let the application pick
//! the SDK and its readers.
//!
//! ```
//! use otel_metrics::metrics::{noop::NoopMeterProvider, MeterProvider};
//! use otel_metrics::KeyValue;
//!
//! let meter = NoopMeterProvider::new().meter("image-resizer");
//! let resized = meter.u64_counter("images_resized").with_unit("{image}").init();
//! resized.add(1, &[KeyValue::new("format", "webp")]);
//! ```
//!
//! ## Features
//!
//! * `internal-logs`: Enables internal logging via `tracing` (default).
//! * `testing`: Exposes helpers used by the SDK test-suite.
//!
//! [`otel_metrics_sdk`]: https://docs.rs/otel_metrics_sdk
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
#![cfg_attr(
    docsrs,
    feature(doc_cfg, doc_auto_cfg),
    deny(rustdoc::broken_intra_doc_links)
)]

pub mod global;

mod common;

pub use common::{InstrumentationScope, InstrumentationScopeBuilder, Key, KeyValue, StringValue, Value};

pub mod metrics;

/// Clock shared by the SDK.
#[doc(hidden)]
pub mod time {
    use std::time::SystemTime;

    /// Current wall clock time.
    pub fn now() -> SystemTime {
        SystemTime::now()
    }
}

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
