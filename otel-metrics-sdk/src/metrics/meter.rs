use core::fmt;
use std::{
    any::Any,
    borrow::Cow,
    collections::HashSet,
    sync::{Arc, Mutex, Weak},
};

use otel_metrics::{
    global,
    metrics::{
        noop::NoopRegistration, AsyncInstrument, AsyncInstrumentBuilder, Callback,
        CallbackRegistration, Counter, Histogram, InstrumentBuilder, InstrumentProvider,
        MetricsError, MultiInstrumentCallback, ObservableCounter, ObservableGauge,
        ObservableUpDownCounter, Observer, Result, UpDownCounter,
    },
    otel_debug, otel_warn, InstrumentationScope, KeyValue,
};

use crate::error;
use crate::metrics::{
    instrument::{
        validate_instrument_name, validate_instrument_unit, Instrument, InstrumentKind,
        Observable, ObservableId, ResolvedMeasures,
    },
    internal::Number,
    pipeline::{ConflictCache, Pipeline, Pipelines, Resolver},
};

/// Handles the creation and coordination of all metric instruments.
///
/// A meter represents a single instrumentation scope; all metric telemetry
/// produced by an instrumentation scope will use metric instruments from a
/// single meter.
///
/// The three resolvers share one conflict cache, so a name reused with a
/// different kind, unit or number type is reported once for the meter.
///
/// See the [Meter API] docs for usage.
///
/// [Meter API]: otel_metrics::metrics::Meter
pub(crate) struct SdkMeter {
    scope: InstrumentationScope,
    pipes: Arc<Pipelines>,
    u64_resolver: Resolver<u64>,
    i64_resolver: Resolver<i64>,
    f64_resolver: Resolver<f64>,
}

impl SdkMeter {
    pub(crate) fn new(scope: InstrumentationScope, pipes: Arc<Pipelines>) -> Self {
        let conflicts = Arc::new(ConflictCache::default());

        SdkMeter {
            scope,
            pipes: Arc::clone(&pipes),
            u64_resolver: Resolver::new(Arc::clone(&pipes), Arc::clone(&conflicts)),
            i64_resolver: Resolver::new(Arc::clone(&pipes), Arc::clone(&conflicts)),
            f64_resolver: Resolver::new(pipes, conflicts),
        }
    }

    /// Validates the builder values and turns them into an [Instrument] of
    /// this meter's scope.
    fn instrument(
        &self,
        kind: InstrumentKind,
        name: Cow<'static, str>,
        description: Option<Cow<'static, str>>,
        unit: Option<Cow<'static, str>>,
    ) -> Result<Instrument> {
        let validation = validate_instrument_name(&name)
            .and_then(|_| unit.as_deref().map_or(Ok(()), validate_instrument_unit));
        if let Err(reason) = validation {
            otel_warn!(
                name: "Instrument.InvalidConfiguration",
                meter_name = self.scope.name(),
                instrument_name = name.as_ref(),
                reason = reason,
            );
            return Err(MetricsError::InvalidInstrumentConfiguration(reason));
        }

        Ok(Instrument {
            name,
            description: description.unwrap_or_default(),
            unit: unit.unwrap_or_default(),
            kind: Some(kind),
            scope: self.scope.clone(),
        })
    }

    fn create_sync<T: Number>(
        &self,
        resolver: &Resolver<T>,
        kind: InstrumentKind,
        name: Cow<'static, str>,
        description: Option<Cow<'static, str>>,
        unit: Option<Cow<'static, str>>,
    ) -> Result<Arc<ResolvedMeasures<T>>> {
        let inst = self.instrument(kind, name, description, unit)?;
        let measures = resolver.measures(&inst)?;
        Ok(Arc::new(ResolvedMeasures { measures }))
    }

    fn create_observable<T: Number>(
        &self,
        resolver: &Resolver<T>,
        kind: InstrumentKind,
        name: Cow<'static, str>,
        description: Option<Cow<'static, str>>,
        unit: Option<Cow<'static, str>>,
        callbacks: Vec<Callback<T>>,
    ) -> Result<Arc<Observable<T>>> {
        let inst = self.instrument(kind, name, description, unit)?;
        let measures = resolver.measures(&inst)?;
        let id = ObservableId {
            name: inst.name,
            description: inst.description,
            kind,
            unit: inst.unit,
            scope: inst.scope,
        };
        let observable = Arc::new(Observable::new(id, measures));

        // Nothing would read what a dropped instrument's callbacks observe.
        if !observable.is_dropped() {
            for callback in callbacks {
                let cb_inst = Arc::clone(&observable);
                let _ = self.pipes.register_callback(Arc::new(move || -> Result<()> {
                    callback(cb_inst.as_ref());
                    Ok(())
                }));
            }
        }

        Ok(observable)
    }
}

#[doc(hidden)]
impl InstrumentProvider for SdkMeter {
    fn u64_counter(&self, builder: InstrumentBuilder<'_, Counter<u64>>) -> Result<Counter<u64>> {
        self.create_sync(
            &self.u64_resolver,
            InstrumentKind::Counter,
            builder.name,
            builder.description,
            builder.unit,
        )
        .map(|inst| Counter::new(inst))
    }

    fn f64_counter(&self, builder: InstrumentBuilder<'_, Counter<f64>>) -> Result<Counter<f64>> {
        self.create_sync(
            &self.f64_resolver,
            InstrumentKind::Counter,
            builder.name,
            builder.description,
            builder.unit,
        )
        .map(|inst| Counter::new(inst))
    }

    fn u64_observable_counter(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableCounter<u64>, u64>,
    ) -> Result<ObservableCounter<u64>> {
        self.create_observable(
            &self.u64_resolver,
            InstrumentKind::ObservableCounter,
            builder.name,
            builder.description,
            builder.unit,
            builder.callbacks,
        )
        .map(|inst| ObservableCounter::new(inst))
    }

    fn f64_observable_counter(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableCounter<f64>, f64>,
    ) -> Result<ObservableCounter<f64>> {
        self.create_observable(
            &self.f64_resolver,
            InstrumentKind::ObservableCounter,
            builder.name,
            builder.description,
            builder.unit,
            builder.callbacks,
        )
        .map(|inst| ObservableCounter::new(inst))
    }

    fn i64_up_down_counter(
        &self,
        builder: InstrumentBuilder<'_, UpDownCounter<i64>>,
    ) -> Result<UpDownCounter<i64>> {
        self.create_sync(
            &self.i64_resolver,
            InstrumentKind::UpDownCounter,
            builder.name,
            builder.description,
            builder.unit,
        )
        .map(|inst| UpDownCounter::new(inst))
    }

    fn f64_up_down_counter(
        &self,
        builder: InstrumentBuilder<'_, UpDownCounter<f64>>,
    ) -> Result<UpDownCounter<f64>> {
        self.create_sync(
            &self.f64_resolver,
            InstrumentKind::UpDownCounter,
            builder.name,
            builder.description,
            builder.unit,
        )
        .map(|inst| UpDownCounter::new(inst))
    }

    fn i64_observable_up_down_counter(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableUpDownCounter<i64>, i64>,
    ) -> Result<ObservableUpDownCounter<i64>> {
        self.create_observable(
            &self.i64_resolver,
            InstrumentKind::ObservableUpDownCounter,
            builder.name,
            builder.description,
            builder.unit,
            builder.callbacks,
        )
        .map(|inst| ObservableUpDownCounter::new(inst))
    }

    fn f64_observable_up_down_counter(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableUpDownCounter<f64>, f64>,
    ) -> Result<ObservableUpDownCounter<f64>> {
        self.create_observable(
            &self.f64_resolver,
            InstrumentKind::ObservableUpDownCounter,
            builder.name,
            builder.description,
            builder.unit,
            builder.callbacks,
        )
        .map(|inst| ObservableUpDownCounter::new(inst))
    }

    fn u64_observable_gauge(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableGauge<u64>, u64>,
    ) -> Result<ObservableGauge<u64>> {
        self.create_observable(
            &self.u64_resolver,
            InstrumentKind::ObservableGauge,
            builder.name,
            builder.description,
            builder.unit,
            builder.callbacks,
        )
        .map(|inst| ObservableGauge::new(inst))
    }

    fn i64_observable_gauge(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableGauge<i64>, i64>,
    ) -> Result<ObservableGauge<i64>> {
        self.create_observable(
            &self.i64_resolver,
            InstrumentKind::ObservableGauge,
            builder.name,
            builder.description,
            builder.unit,
            builder.callbacks,
        )
        .map(|inst| ObservableGauge::new(inst))
    }

    fn f64_observable_gauge(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableGauge<f64>, f64>,
    ) -> Result<ObservableGauge<f64>> {
        self.create_observable(
            &self.f64_resolver,
            InstrumentKind::ObservableGauge,
            builder.name,
            builder.description,
            builder.unit,
            builder.callbacks,
        )
        .map(|inst| ObservableGauge::new(inst))
    }

    fn f64_histogram(
        &self,
        builder: InstrumentBuilder<'_, Histogram<f64>>,
    ) -> Result<Histogram<f64>> {
        self.create_sync(
            &self.f64_resolver,
            InstrumentKind::Histogram,
            builder.name,
            builder.description,
            builder.unit,
        )
        .map(|inst| Histogram::new(inst))
    }

    fn u64_histogram(
        &self,
        builder: InstrumentBuilder<'_, Histogram<u64>>,
    ) -> Result<Histogram<u64>> {
        self.create_sync(
            &self.u64_resolver,
            InstrumentKind::Histogram,
            builder.name,
            builder.description,
            builder.unit,
        )
        .map(|inst| Histogram::new(inst))
    }

    fn register_callback(
        &self,
        insts: &[Arc<dyn Any>],
        callback: Box<MultiInstrumentCallback>,
    ) -> Result<Box<dyn CallbackRegistration>> {
        if insts.is_empty() {
            // Nothing to observe, the callback is never run.
            return Ok(Box::new(NoopRegistration::new()));
        }

        let mut reg = CallbackObserver::default();
        let mut errs = vec![];
        for inst in insts {
            if let Some(o) = inst.downcast_ref::<Observable<u64>>() {
                track(&mut reg.u64s, o, &self.scope, &mut errs);
            } else if let Some(o) = inst.downcast_ref::<Observable<i64>>() {
                track(&mut reg.i64s, o, &self.scope, &mut errs);
            } else if let Some(o) = inst.downcast_ref::<Observable<f64>>() {
                track(&mut reg.f64s, o, &self.scope, &mut errs);
            } else {
                errs.push(MetricsError::Other(
                    "invalid observable: from different implementation".into(),
                ));
            }
        }

        error::combine(errs.into_iter().map(Err))?;

        if reg.is_empty() {
            otel_debug!(
                name: "Meter.CallbackSkipped",
                meter_name = self.scope.name(),
                reason = "every instrument of the registration was dropped",
            );
            return Ok(Box::new(NoopRegistration::new()));
        }

        let reg = Arc::new(reg);
        let registrations = self
            .pipes
            .register_callback(Arc::new(move || callback(reg.as_ref())));

        Ok(Box::new(SdkCallbackRegistration {
            registrations: Mutex::new(registrations),
        }))
    }
}

impl fmt::Debug for SdkMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meter").field("scope", &self.scope).finish()
    }
}

/// Adds a registerable observable to `set`, collecting why it is not.
fn track<T>(
    set: &mut HashSet<ObservableId>,
    observable: &Observable<T>,
    scope: &InstrumentationScope,
    errs: &mut Vec<MetricsError>,
) {
    match observable.registerable(scope) {
        Ok(true) => {
            set.insert(observable.id.clone());
        }
        Ok(false) => {}
        Err(err) => errs.push(err),
    }
}

/// The identities a multi-instrument callback may observe, one set per
/// number type.
#[derive(Default)]
struct CallbackObserver {
    u64s: HashSet<ObservableId>,
    i64s: HashSet<ObservableId>,
    f64s: HashSet<ObservableId>,
}

impl CallbackObserver {
    fn is_empty(&self) -> bool {
        self.u64s.is_empty() && self.i64s.is_empty() && self.f64s.is_empty()
    }

    fn observe<T: Number>(
        registered: &HashSet<ObservableId>,
        inst: &dyn AsyncInstrument<T>,
        measurement: T,
        attrs: &[KeyValue],
    ) {
        let any = inst.as_any();
        let Some(oi) = any.downcast_ref::<Observable<T>>() else {
            report_rejected_observation::<T>("unknown observable instrument", None);
            return;
        };

        if registered.contains(&oi.id) {
            oi.observe(measurement, attrs);
        } else if !oi.is_dropped() {
            report_rejected_observation::<T>(
                "observable instrument not registered for callback",
                Some(&oi.id),
            );
        }
    }
}

fn report_rejected_observation<T: Number>(reason: &str, id: Option<&ObservableId>) {
    let (name, description, unit) = id
        .map(|id| (id.name.as_ref(), id.description.as_ref(), id.unit.as_ref()))
        .unwrap_or_default();
    otel_debug!(
        name: "Observer.ObservationDropped",
        instrument_name = name,
        reason = reason,
    );
    global::handle_error(MetricsError::Other(format!(
        "{reason}: name={name}, description={description}, unit={unit}, number={}",
        T::TYPE_NAME
    )));
}

impl Observer for CallbackObserver {
    fn observe_u64(&self, inst: &dyn AsyncInstrument<u64>, measurement: u64, attrs: &[KeyValue]) {
        Self::observe(&self.u64s, inst, measurement, attrs)
    }

    fn observe_i64(&self, inst: &dyn AsyncInstrument<i64>, measurement: i64, attrs: &[KeyValue]) {
        Self::observe(&self.i64s, inst, measurement, attrs)
    }

    fn observe_f64(&self, inst: &dyn AsyncInstrument<f64>, measurement: f64, attrs: &[KeyValue]) {
        Self::observe(&self.f64s, inst, measurement, attrs)
    }
}

/// The handle to a multi-instrument callback registered with every pipeline.
struct SdkCallbackRegistration {
    registrations: Mutex<Vec<(Weak<Pipeline>, u64)>>,
}

impl CallbackRegistration for SdkCallbackRegistration {
    fn unregister(&self) -> Result<()> {
        // Taking the ids makes later calls no-ops.
        let registrations = std::mem::take(&mut *self.registrations.lock()?);
        for (pipe, id) in registrations {
            if let Some(pipe) = pipe.upgrade() {
                pipe.remove_callback(id);
            }
        }
        Ok(())
    }
}
