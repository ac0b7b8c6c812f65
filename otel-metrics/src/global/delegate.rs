use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::metrics::AsyncInstrument;
use crate::KeyValue;

/// An observable handle whose concrete instrument is installed later.
///
/// Observations made before a delegate is installed are dropped. Once
/// [`set_delegate`] is called, observations are forwarded and [`as_any`]
/// unwraps to the delegate, so SDKs that compare instrument identity see the
/// concrete instrument rather than this wrapper.
///
/// ```
/// use std::sync::Arc;
/// use otel_metrics::global::DelegatedObservable;
/// use otel_metrics::metrics::ObservableCounter;
///
/// let delegated = DelegatedObservable::<u64>::new();
/// let handle = ObservableCounter::new(Arc::new(delegated.clone()));
/// assert!(!delegated.is_bound());
/// # drop(handle);
/// ```
///
/// [`set_delegate`]: DelegatedObservable::set_delegate
/// [`as_any`]: AsyncInstrument::as_any
pub struct DelegatedObservable<T> {
    delegate: Arc<RwLock<Option<Arc<dyn AsyncInstrument<T>>>>>,
}

impl<T> Clone for DelegatedObservable<T> {
    fn clone(&self) -> Self {
        DelegatedObservable {
            delegate: Arc::clone(&self.delegate),
        }
    }
}

impl<T> Default for DelegatedObservable<T> {
    fn default() -> Self {
        DelegatedObservable {
            delegate: Arc::new(RwLock::new(None)),
        }
    }
}

impl<T> fmt::Debug for DelegatedObservable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedObservable")
            .field("kind", &std::any::type_name::<T>())
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl<T> DelegatedObservable<T> {
    /// Create an unbound delegation wrapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the concrete instrument all clones of this wrapper forward to.
    ///
    /// Replaces any previously installed delegate.
    pub fn set_delegate<I>(&self, instrument: I)
    where
        I: AsyncInstrument<T> + 'static,
    {
        if let Ok(mut delegate) = self.delegate.write() {
            *delegate = Some(Arc::new(instrument));
        }
    }

    /// Returns `true` once a delegate has been installed.
    pub fn is_bound(&self) -> bool {
        self.delegate
            .read()
            .map(|delegate| delegate.is_some())
            .unwrap_or(false)
    }
}

impl<T: 'static> AsyncInstrument<T> for DelegatedObservable<T> {
    fn observe(&self, measurement: T, attributes: &[KeyValue]) {
        if let Ok(delegate) = self.delegate.read() {
            if let Some(inst) = delegate.as_ref() {
                inst.observe(measurement, attributes);
            }
        }
    }

    fn as_any(&self) -> Arc<dyn Any> {
        let bound = self
            .delegate
            .read()
            .ok()
            .and_then(|delegate| delegate.as_ref().map(|inst| inst.as_any()));
        match bound {
            Some(concrete) => concrete,
            None => Arc::new(self.clone()),
        }
    }
}
