use core::fmt;
use std::any::Any;
use std::borrow::Cow;
use std::sync::Arc;

use crate::metrics::{
    AsyncInstrument, AsyncInstrumentBuilder, Counter, Histogram, InstrumentBuilder,
    InstrumentProvider, ObservableCounter, ObservableGauge, ObservableUpDownCounter, Result,
    UpDownCounter,
};
use crate::{InstrumentationScope, KeyValue};

macro_rules! sync_builders {
    ($($method:ident -> $handle:ident<$num:ty>;)*) => {
        $(
            #[doc = concat!("Starts building a `", stringify!($handle), "<", stringify!($num), ">`.")]
            pub fn $method(
                &self,
                name: impl Into<Cow<'static, str>>,
            ) -> InstrumentBuilder<'_, $handle<$num>> {
                InstrumentBuilder::new(self.instrument_provider.as_ref(), name.into())
            }
        )*
    };
}

macro_rules! async_builders {
    ($($method:ident -> $handle:ident<$num:ty>;)*) => {
        $(
            #[doc = concat!("Starts building an `", stringify!($handle), "<", stringify!($num), ">`.")]
            pub fn $method(
                &self,
                name: impl Into<Cow<'static, str>>,
            ) -> AsyncInstrumentBuilder<'_, $handle<$num>, $num> {
                AsyncInstrumentBuilder::new(self.instrument_provider.as_ref(), name.into())
            }
        )*
    };
}

/// Hands out [Meter]s, one per instrumentation scope.
pub trait MeterProvider {
    /// Meter for a scope with only a name.
    ///
    /// ```
    /// use otel_metrics::metrics::{noop::NoopMeterProvider, MeterProvider};
    ///
    /// let meter = NoopMeterProvider::new().meter("checkout");
    /// ```
    fn meter(&self, name: &'static str) -> Meter {
        let scope = InstrumentationScope::builder(name).build();
        self.meter_with_scope(scope)
    }

    /// Meter for a fully described scope. Requests for an equal scope return
    /// a meter backed by the same state.
    ///
    /// ```
    /// use otel_metrics::metrics::{noop::NoopMeterProvider, MeterProvider};
    /// use otel_metrics::InstrumentationScope;
    ///
    /// let scope = InstrumentationScope::builder("payments-client")
    ///     .with_version("3.2.0")
    ///     .build();
    /// let meter = NoopMeterProvider::new().meter_with_scope(scope);
    /// ```
    fn meter_with_scope(&self, scope: InstrumentationScope) -> Meter;
}

/// Records observations for any of the instruments a multi-instrument
/// callback was registered with.
///
/// An observer only accepts instruments that were passed to
/// [`Meter::register_callback`] together with the running callback. Other
/// observations are dropped and reported through the global error handler.
pub trait Observer {
    /// Observes an unsigned integer instrument.
    fn observe_u64(&self, inst: &dyn AsyncInstrument<u64>, measurement: u64, attrs: &[KeyValue]);

    /// Observes a signed integer instrument.
    fn observe_i64(&self, inst: &dyn AsyncInstrument<i64>, measurement: i64, attrs: &[KeyValue]);

    /// Observes a floating point instrument.
    fn observe_f64(&self, inst: &dyn AsyncInstrument<f64>, measurement: f64, attrs: &[KeyValue]);
}

/// Handle for a callback registered with [Meter::register_callback].
pub trait CallbackRegistration: Send + Sync {
    /// Stops future collections from running the callback.
    ///
    /// Calling this more than once, or concurrently, is a harmless success.
    /// A callback that is already running finishes normally; it is simply not
    /// invoked by later collections.
    fn unregister(&self) -> Result<()>;
}

/// A function that observes several instruments in one go.
///
/// Errors returned by the function are reported to the reader collecting the
/// metrics; they never prevent sibling callbacks from running.
pub type MultiInstrumentCallback = dyn Fn(&dyn Observer) -> Result<()> + Send + Sync;

/// Creates instruments for one instrumentation scope.
///
/// ```
/// use otel_metrics::metrics::{noop::NoopMeterProvider, MeterProvider};
/// use otel_metrics::KeyValue;
///
/// let meter = NoopMeterProvider::new().meter("inventory");
/// let route = [KeyValue::new("route", "/items")];
///
/// meter.u64_counter("requests").init().add(1, &route);
/// meter.i64_up_down_counter("in_flight").init().add(-1, &route);
/// meter.f64_histogram("latency").with_unit("ms").init().record(12.5, &route);
///
/// let _stock = meter
///     .i64_observable_gauge("stock_level")
///     .with_description("Units on hand")
///     .with_callback(|gauge| gauge.observe(42, &[KeyValue::new("warehouse", "north")]))
///     .init();
/// ```
#[derive(Clone)]
#[non_exhaustive]
pub struct Meter {
    pub(crate) instrument_provider: Arc<dyn InstrumentProvider + Send + Sync>,
}

impl Meter {
    /// Wraps an SDK's instrument provider.
    #[doc(hidden)]
    pub fn new(instrument_provider: Arc<dyn InstrumentProvider + Send + Sync>) -> Self {
        Meter {
            instrument_provider,
        }
    }

    sync_builders! {
        u64_counter -> Counter<u64>;
        f64_counter -> Counter<f64>;
        i64_up_down_counter -> UpDownCounter<i64>;
        f64_up_down_counter -> UpDownCounter<f64>;
        u64_histogram -> Histogram<u64>;
        f64_histogram -> Histogram<f64>;
    }

    async_builders! {
        u64_observable_counter -> ObservableCounter<u64>;
        f64_observable_counter -> ObservableCounter<f64>;
        i64_observable_up_down_counter -> ObservableUpDownCounter<i64>;
        f64_observable_up_down_counter -> ObservableUpDownCounter<f64>;
        u64_observable_gauge -> ObservableGauge<u64>;
        i64_observable_gauge -> ObservableGauge<i64>;
        f64_observable_gauge -> ObservableGauge<f64>;
    }

    /// Registers a callback that observes several instruments at once.
    ///
    /// `instruments` lists every observable the callback may report on, as
    /// returned by their `as_any` methods. The callback runs once per
    /// collection until the returned registration is unregistered.
    ///
    /// ```
    /// use otel_metrics::metrics::{noop::NoopMeterProvider, MeterProvider};
    /// use otel_metrics::KeyValue;
    ///
    /// let meter = NoopMeterProvider::new().meter("my-meter");
    /// let hits = meter.u64_observable_counter("cache_hits").init();
    /// let size = meter.i64_observable_gauge("cache_size").init();
    ///
    /// let observed = [hits.as_any(), size.as_any()];
    /// let registration = meter
    ///     .register_callback(&observed, move |observer| {
    ///         observer.observe_u64(&hits, 42, &[KeyValue::new("cache", "users")]);
    ///         observer.observe_i64(&size, 7, &[]);
    ///         Ok(())
    ///     })
    ///     .unwrap();
    ///
    /// registration.unregister().unwrap();
    /// ```
    pub fn register_callback<F>(
        &self,
        instruments: &[Arc<dyn Any>],
        callback: F,
    ) -> Result<Box<dyn CallbackRegistration>>
    where
        F: Fn(&dyn Observer) -> Result<()> + Send + Sync + 'static,
    {
        self.instrument_provider
            .register_callback(instruments, Box::new(callback))
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Meter")
    }
}
