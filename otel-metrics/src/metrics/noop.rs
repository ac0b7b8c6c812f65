//! Inert implementations of the metrics API.
//!
//! These back the global provider until an SDK is installed, and stand in for
//! instruments whose configuration was rejected.
use crate::{
    metrics::{
        AsyncInstrument, CallbackRegistration, InstrumentProvider, Meter, MeterProvider, Result,
        SyncInstrument,
    },
    InstrumentationScope, KeyValue,
};
use std::any::Any;
use std::sync::Arc;

macro_rules! noop_type {
    ($($(#[$doc:meta])* $name:ident;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Default, Clone)]
            pub struct $name {
                _private: (),
            }

            impl $name {
                #[doc = concat!("Creates a `", stringify!($name), "`.")]
                pub fn new() -> Self {
                    Self::default()
                }
            }
        )*
    };
}

noop_type! {
    /// Provider whose meters create inert instruments.
    NoopMeterProvider;
    /// Meter that creates inert instruments.
    NoopMeter;
    /// Synchronous instrument that drops every measurement.
    NoopSyncInstrument;
    /// Observable instrument that drops every observation.
    NoopAsyncInstrument;
    /// Registration that is not attached to any callback.
    NoopRegistration;
}

impl MeterProvider for NoopMeterProvider {
    fn meter_with_scope(&self, _scope: InstrumentationScope) -> Meter {
        Meter::new(Arc::new(NoopMeter::new()))
    }
}

impl InstrumentProvider for NoopMeter {}

impl<T> SyncInstrument<T> for NoopSyncInstrument {
    fn measure(&self, _value: T, _attributes: &[KeyValue]) {}
}

impl<T> AsyncInstrument<T> for NoopAsyncInstrument {
    fn observe(&self, _value: T, _attributes: &[KeyValue]) {}

    fn as_any(&self) -> Arc<dyn Any> {
        Arc::new(self.clone())
    }
}

impl CallbackRegistration for NoopRegistration {
    fn unregister(&self) -> Result<()> {
        Ok(())
    }
}
