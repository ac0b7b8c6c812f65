//! # Metrics API
//!
//! Instrumented code obtains a [`Meter`] from a [`MeterProvider`] and creates
//! instruments from it:
//!
//! * synchronous instruments ([`Counter`], [`UpDownCounter`], [`Histogram`])
//!   record measurements as they happen,
//! * asynchronous instruments ([`ObservableCounter`],
//!   [`ObservableUpDownCounter`], [`ObservableGauge`]) are observed by
//!   callbacks once per collection. A callback is either bound to a single
//!   instrument when it is built, or registered for several instruments at
//!   once with [`Meter::register_callback`].

use std::any::Any;
use std::result;
use std::sync::{Arc, PoisonError};
use thiserror::Error;

mod instruments;
mod meter;
pub mod noop;

pub use instruments::{
    AsyncInstrument, AsyncInstrumentBuilder, Callback, Counter, Histogram, InstrumentBuilder,
    ObservableCounter, ObservableGauge, ObservableUpDownCounter, SyncInstrument, UpDownCounter,
};
pub use meter::{
    CallbackRegistration, Meter, MeterProvider, MultiInstrumentCallback, Observer,
};

/// Result of metrics API calls.
pub type Result<T> = result::Result<T, MetricsError>;

/// Failures reported by the metrics API and SDK.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetricsError {
    /// Any failure without a dedicated variant, including callback errors.
    #[error("Metrics error: {0}")]
    Other(String),
    /// Rejected provider, view or reader configuration.
    #[error("Config error {0}")]
    Config(String),
    /// Instrument name, unit or description failed validation.
    #[error("Invalid instrument configuration: {0}")]
    InvalidInstrumentConfiguration(&'static str),
}

impl<T> From<PoisonError<T>> for MetricsError {
    fn from(err: PoisonError<T>) -> Self {
        MetricsError::Other(format!("lock poisoned: {err}"))
    }
}

/// Default methods returning inert synchronous instruments.
macro_rules! noop_sync_methods {
    ($($method:ident -> $handle:ident<$num:ty>;)*) => {
        $(
            #[doc = concat!("Creates a `", stringify!($handle), "<", stringify!($num), ">`.")]
            fn $method(
                &self,
                _builder: InstrumentBuilder<'_, $handle<$num>>,
            ) -> Result<$handle<$num>> {
                Ok($handle::new(Arc::new(noop::NoopSyncInstrument::new())))
            }
        )*
    };
}

/// Default methods returning observable instruments that are never observed.
macro_rules! noop_async_methods {
    ($($method:ident -> $handle:ident<$num:ty>;)*) => {
        $(
            #[doc = concat!("Creates an `", stringify!($handle), "<", stringify!($num), ">`.")]
            fn $method(
                &self,
                _builder: AsyncInstrumentBuilder<'_, $handle<$num>, $num>,
            ) -> Result<$handle<$num>> {
                Ok($handle::new(Arc::new(noop::NoopAsyncInstrument::new())))
            }
        )*
    };
}

/// Instrument factory behind a [Meter], implemented by SDKs.
///
/// Every method defaults to an inert instrument, so an implementation only
/// overrides what it supports.
pub trait InstrumentProvider {
    noop_sync_methods! {
        u64_counter -> Counter<u64>;
        f64_counter -> Counter<f64>;
        i64_up_down_counter -> UpDownCounter<i64>;
        f64_up_down_counter -> UpDownCounter<f64>;
        u64_histogram -> Histogram<u64>;
        f64_histogram -> Histogram<f64>;
    }

    noop_async_methods! {
        u64_observable_counter -> ObservableCounter<u64>;
        f64_observable_counter -> ObservableCounter<f64>;
        i64_observable_up_down_counter -> ObservableUpDownCounter<i64>;
        f64_observable_up_down_counter -> ObservableUpDownCounter<f64>;
        u64_observable_gauge -> ObservableGauge<u64>;
        i64_observable_gauge -> ObservableGauge<i64>;
        f64_observable_gauge -> ObservableGauge<f64>;
    }

    /// Registers `callback` to observe `instruments` on every collection.
    ///
    /// Instruments are identified by [ObservableCounter::as_any] and friends.
    fn register_callback(
        &self,
        _instruments: &[Arc<dyn Any>],
        _callback: Box<MultiInstrumentCallback>,
    ) -> Result<Box<dyn CallbackRegistration>> {
        Ok(Box::new(noop::NoopRegistration::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::noop::NoopMeterProvider;
    use super::*;
    use crate::KeyValue;

    #[test]
    fn noop_instruments_accept_measurements() {
        let meter = NoopMeterProvider::new().meter("noop");

        let counter = meter.u64_counter("requests").with_unit("1").init();
        counter.add(1, &[KeyValue::new("route", "/")]);

        let histogram = meter.f64_histogram("latency").with_unit("ms").init();
        histogram.record(1.5, &[]);

        let gauge = meter
            .i64_observable_gauge("queue_depth")
            .with_callback(|inst| inst.observe(3, &[]))
            .try_init()
            .unwrap();
        let registration = meter
            .register_callback(&[gauge.as_any()], |_| Ok(()))
            .unwrap();
        assert!(registration.unregister().is_ok());
        assert!(registration.unregister().is_ok());
    }

    #[test]
    fn builder_carries_configuration() {
        let meter = NoopMeterProvider::new().meter("noop");
        let builder = meter
            .f64_up_down_counter("balance")
            .with_description("account balance")
            .with_unit("USD");

        assert_eq!(builder.name, "balance");
        assert_eq!(builder.description.as_deref(), Some("account balance"));
        assert_eq!(builder.unit.as_deref(), Some("USD"));
    }
}
