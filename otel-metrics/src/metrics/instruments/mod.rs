use crate::global;
use crate::metrics::{noop, InstrumentProvider, Result};
use crate::KeyValue;
use core::fmt;
use std::any::Any;
use std::borrow::Cow;
use std::marker;
use std::sync::Arc;


/// An SDK implemented instrument that records measurements synchronously.
pub trait SyncInstrument<T>: Send + Sync {
    /// Records a measurement synchronously.
    fn measure(&self, measurement: T, attributes: &[KeyValue]);
}

/// An SDK implemented instrument that records measurements via callback.
pub trait AsyncInstrument<T>: Send + Sync {
    /// Observes the state of the instrument.
    ///
    /// It is only valid to call this within a callback.
    fn observe(&self, measurement: T, attributes: &[KeyValue]);

    /// Returns the concrete instrument behind this handle.
    ///
    /// SDKs downcast the returned value to recognise their own instruments.
    /// Wrappers must return the identity of the instrument they forward to,
    /// never themselves, once such an instrument exists.
    fn as_any(&self) -> Arc<dyn Any>;
}

macro_rules! sync_handle {
    ($(#[$doc:meta])* $handle:ident, $method:ident) => {
        $(#[$doc])*
        ///
        /// Handles are cheap to clone and every clone feeds the same stream.
        #[derive(Clone)]
        #[non_exhaustive]
        pub struct $handle<T>(Arc<dyn SyncInstrument<T> + Send + Sync>);

        impl<T> $handle<T> {
            /// Wraps an SDK instrument.
            pub fn new(inner: Arc<dyn SyncInstrument<T> + Send + Sync>) -> Self {
                $handle(inner)
            }

            /// Records `value` for the given attributes.
            pub fn $method(&self, value: T, attributes: &[KeyValue]) {
                self.0.measure(value, attributes)
            }
        }

        impl<T> fmt::Debug for $handle<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}<{}>", stringify!($handle), std::any::type_name::<T>())
            }
        }
    };
}

sync_handle!(
    /// Monotonic sum of non-negative increments.
    Counter, add
);
sync_handle!(
    /// Sum of increments that may be negative.
    UpDownCounter, add
);
sync_handle!(
    /// Distribution of recorded values.
    Histogram, record
);

macro_rules! async_handle {
    ($(#[$doc:meta])* $handle:ident) => {
        $(#[$doc])*
        ///
        /// Values are only reported from callbacks run during collection.
        #[derive(Clone)]
        #[non_exhaustive]
        pub struct $handle<T>(Arc<dyn AsyncInstrument<T>>);

        impl<T> $handle<T> {
            /// Wraps an SDK instrument.
            pub fn new(inner: Arc<dyn AsyncInstrument<T>>) -> Self {
                $handle(inner)
            }

            /// Identity of the underlying SDK instrument.
            pub fn as_any(&self) -> Arc<dyn Any> {
                self.0.as_any()
            }
        }

        impl<T> AsyncInstrument<T> for $handle<T> {
            fn observe(&self, measurement: T, attributes: &[KeyValue]) {
                self.0.observe(measurement, attributes)
            }

            fn as_any(&self) -> Arc<dyn Any> {
                self.0.as_any()
            }
        }

        impl<T> fmt::Debug for $handle<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}<{}>", stringify!($handle), std::any::type_name::<T>())
            }
        }
    };
}

async_handle!(
    /// Observed monotonic totals, reported as precomputed sums.
    ObservableCounter
);
async_handle!(
    /// Observed totals that may go down.
    ObservableUpDownCounter
);
async_handle!(
    /// Observed current values.
    ObservableGauge
);

/// Configuration for building a sync instrument.
#[non_exhaustive]
pub struct InstrumentBuilder<'a, T> {
    /// Instrument provider is used to create the instrument.
    pub instrument_provider: &'a dyn InstrumentProvider,

    /// Name of the instrument.
    pub name: Cow<'static, str>,

    /// Description of the instrument.
    pub description: Option<Cow<'static, str>>,

    /// Unit of the instrument.
    pub unit: Option<Cow<'static, str>>,

    _marker: marker::PhantomData<T>,
}

impl<'a, T> InstrumentBuilder<'a, T> {
    /// Create a new instrument builder
    pub(crate) fn new(meter: &'a dyn InstrumentProvider, name: Cow<'static, str>) -> Self {
        InstrumentBuilder {
            instrument_provider: meter,
            name,
            description: None,
            unit: None,
            _marker: marker::PhantomData,
        }
    }

    /// Set the description for this instrument
    pub fn with_description<S: Into<Cow<'static, str>>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the unit for this instrument.
    ///
    /// Unit is case sensitive(`kb` is not the same as `kB`).
    ///
    /// Unit must be:
    /// - ASCII string
    /// - No longer than 63 characters
    pub fn with_unit<S: Into<Cow<'static, str>>>(mut self, unit: S) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

impl<T> fmt::Debug for InstrumentBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentBuilder")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("unit", &self.unit)
            .field("kind", &std::any::type_name::<T>())
            .finish()
    }
}

/// A function registered with a [Meter] that makes observations for the
/// instrument it is registered with.
///
/// The async instrument parameter is used to record measurement observations
/// for this instrument.
///
/// The function needs to complete in a finite amount of time.
///
/// [Meter]: crate::metrics::Meter
pub type Callback<T> = Box<dyn Fn(&dyn AsyncInstrument<T>) + Send + Sync>;

/// Configuration for building an async instrument.
#[non_exhaustive]
pub struct AsyncInstrumentBuilder<'a, I, M> {
    /// Instrument provider is used to create the instrument.
    pub instrument_provider: &'a dyn InstrumentProvider,

    /// Name of the instrument.
    pub name: Cow<'static, str>,

    /// Description of the instrument.
    pub description: Option<Cow<'static, str>>,

    /// Unit of the instrument.
    pub unit: Option<Cow<'static, str>>,

    /// Callbacks invoked on every collection to observe the instrument.
    pub callbacks: Vec<Callback<M>>,

    _inst: marker::PhantomData<I>,
}

impl<'a, I, M> AsyncInstrumentBuilder<'a, I, M> {
    /// Create a new instrument builder
    pub(crate) fn new(meter: &'a dyn InstrumentProvider, name: Cow<'static, str>) -> Self {
        AsyncInstrumentBuilder {
            instrument_provider: meter,
            name,
            description: None,
            unit: None,
            callbacks: Vec::new(),
            _inst: marker::PhantomData,
        }
    }

    /// Set the description for this instrument
    pub fn with_description<S: Into<Cow<'static, str>>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the unit for this instrument.
    ///
    /// Unit is case sensitive(`kb` is not the same as `kB`).
    pub fn with_unit<S: Into<Cow<'static, str>>>(mut self, unit: S) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the callback to be called for this instrument.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&dyn AsyncInstrument<M>) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }
}

impl<I, M> fmt::Debug for AsyncInstrumentBuilder<'_, I, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncInstrumentBuilder")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("unit", &self.unit)
            .field("kind", &std::any::type_name::<I>())
            .field("callbacks_len", &self.callbacks.len())
            .finish()
    }
}

macro_rules! build_instrument {
    ($name:ident, $inst:ty) => {
        impl<'a> InstrumentBuilder<'a, $inst> {
            #[doc = concat!("Validates the instrument configuration and creates a new `", stringify!($inst), "`.")]
            pub fn try_init(self) -> Result<$inst> {
                let provider = self.instrument_provider;
                provider.$name(self)
            }

            #[doc = concat!("Creates a new `", stringify!($inst), "`.")]
            ///
            /// An invalid configuration is reported through the global error
            /// handler and yields an instrument that ignores measurements.
            pub fn init(self) -> $inst {
                self.try_init().unwrap_or_else(|err| {
                    global::handle_error(err);
                    <$inst>::new(Arc::new(noop::NoopSyncInstrument::new()))
                })
            }
        }
    };
}

build_instrument!(u64_counter, Counter<u64>);
build_instrument!(f64_counter, Counter<f64>);
build_instrument!(i64_up_down_counter, UpDownCounter<i64>);
build_instrument!(f64_up_down_counter, UpDownCounter<f64>);
build_instrument!(u64_histogram, Histogram<u64>);
build_instrument!(f64_histogram, Histogram<f64>);

macro_rules! build_async_instrument {
    ($name:ident, $inst:ty, $measurement:ty) => {
        impl<'a> AsyncInstrumentBuilder<'a, $inst, $measurement> {
            #[doc = concat!("Validates the instrument configuration and creates a new `", stringify!($inst), "`.")]
            pub fn try_init(self) -> Result<$inst> {
                let provider = self.instrument_provider;
                provider.$name(self)
            }

            #[doc = concat!("Creates a new `", stringify!($inst), "`.")]
            ///
            /// An invalid configuration is reported through the global error
            /// handler and yields an instrument that is never observed.
            pub fn init(self) -> $inst {
                self.try_init().unwrap_or_else(|err| {
                    global::handle_error(err);
                    <$inst>::new(Arc::new(noop::NoopAsyncInstrument::new()))
                })
            }
        }
    };
}

build_async_instrument!(u64_observable_counter, ObservableCounter<u64>, u64);
build_async_instrument!(f64_observable_counter, ObservableCounter<f64>, f64);
build_async_instrument!(i64_observable_up_down_counter, ObservableUpDownCounter<i64>, i64);
build_async_instrument!(f64_observable_up_down_counter, ObservableUpDownCounter<f64>, f64);
build_async_instrument!(u64_observable_gauge, ObservableGauge<u64>, u64);
build_async_instrument!(i64_observable_gauge, ObservableGauge<i64>, i64);
build_async_instrument!(f64_observable_gauge, ObservableGauge<f64>, f64);
