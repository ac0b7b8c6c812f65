use std::{
    env, fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
        Arc, Mutex, Weak,
    },
    thread,
    time::{Duration, Instant},
};

use otel_metrics::{otel_debug, otel_error, otel_info, otel_warn};

use crate::error::{self, OTelSdkError, OTelSdkResult};

use super::{
    data::{ResourceMetrics, Temporality},
    exporter::PushMetricExporter,
    instrument::InstrumentKind,
    pipeline::Pipeline,
    reader::{MetricProducer, MetricReader, SdkProducer},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

const METRIC_EXPORT_INTERVAL_NAME: &str = "OTEL_METRIC_EXPORT_INTERVAL";
const METRIC_EXPORT_TIMEOUT_NAME: &str = "OTEL_METRIC_EXPORT_TIMEOUT";

/// Reads a positive number of milliseconds from the environment.
fn duration_from_env(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// Options for a [PeriodicReader].
///
/// Starts from `OTEL_METRIC_EXPORT_INTERVAL` and `OTEL_METRIC_EXPORT_TIMEOUT`
/// (milliseconds) when they hold a positive integer, otherwise from 60 and 30
/// seconds.
#[derive(Debug)]
pub struct PeriodicReaderBuilder<E> {
    interval: Duration,
    timeout: Duration,
    exporter: E,
}

impl<E> PeriodicReaderBuilder<E>
where
    E: PushMetricExporter,
{
    fn new(exporter: E) -> Self {
        PeriodicReaderBuilder {
            interval: duration_from_env(METRIC_EXPORT_INTERVAL_NAME).unwrap_or(DEFAULT_INTERVAL),
            timeout: duration_from_env(METRIC_EXPORT_TIMEOUT_NAME).unwrap_or(DEFAULT_TIMEOUT),
            exporter,
        }
    }

    /// Time between the start of one scheduled export and the next. Zero
    /// keeps the current value.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    /// Upper bound for flush and shutdown replies and for the callbacks of a
    /// single collection. Zero keeps the current value.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    /// Spawns the export thread and returns the reader.
    pub fn build(self) -> PeriodicReader<E> {
        PeriodicReader::spawn(self.exporter, self.interval, self.timeout)
    }
}

/// Reader that pushes a collection to an exporter on a fixed schedule.
///
/// A dedicated thread owns the schedule. [`force_flush`] and [`shutdown`]
/// are handed to that thread and the caller waits for the reply, giving up
/// with [`OTelSdkError::Timeout`] after the configured timeout. Shutdown does
/// a final export before shutting the exporter down. Collections that
/// produce no scopes are not exported.
///
/// [`collect`] can still be called directly; its result goes to the caller,
/// not to the exporter.
///
/// [`force_flush`]: MetricReader::force_flush
/// [`shutdown`]: MetricReader::shutdown
/// [`collect`]: MetricReader::collect
///
/// ```no_run
/// use otel_metrics_sdk::metrics::PeriodicReader;
/// use std::time::Duration;
/// # fn example<E>(exporter: E)
/// # where
/// #     E: otel_metrics_sdk::metrics::exporter::PushMetricExporter,
/// # {
///
/// let reader = PeriodicReader::builder(exporter)
///     .with_interval(Duration::from_secs(10))
///     .build();
/// # drop(reader);
/// # }
/// ```
pub struct PeriodicReader<E> {
    shared: Arc<Shared<E>>,
    commands: Arc<Mutex<Sender<Command>>>,
    timeout: Duration,
}

impl<E> Clone for PeriodicReader<E> {
    fn clone(&self) -> Self {
        PeriodicReader {
            shared: Arc::clone(&self.shared),
            commands: Arc::clone(&self.commands),
            timeout: self.timeout,
        }
    }
}

impl<E> fmt::Debug for PeriodicReader<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicReader")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Requests answered by the export thread.
#[derive(Debug)]
enum Command {
    Flush(Sender<OTelSdkResult>),
    Shutdown(Sender<OTelSdkResult>),
}

/// State reachable from both the handles and the export thread.
struct Shared<E> {
    exporter: E,
    pipeline: Mutex<Option<Weak<dyn SdkProducer>>>,
    producers: Mutex<Vec<Box<dyn MetricProducer>>>,
    shut_down: AtomicBool,
}

impl<E: PushMetricExporter> PeriodicReader<E> {
    /// Starts a [PeriodicReaderBuilder] for `exporter`.
    pub fn builder(exporter: E) -> PeriodicReaderBuilder<E> {
        PeriodicReaderBuilder::new(exporter)
    }

    fn spawn(exporter: E, interval: Duration, timeout: Duration) -> Self {
        let shared = Arc::new(Shared {
            exporter,
            pipeline: Mutex::new(None),
            producers: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        });
        let (commands, inbox) = mpsc::channel();
        let worker = Worker {
            shared: Arc::clone(&shared),
            interval,
            timeout,
        };

        let spawned = thread::Builder::new()
            .name("otel-metrics-periodic-reader".to_string())
            .spawn(move || worker.run(inbox));
        if let Err(err) = spawned {
            otel_error!(
                name: "PeriodicReader.ThreadSpawnFailed",
                error = format!("{err}")
            );
        }

        PeriodicReader {
            shared,
            commands: Arc::new(Mutex::new(commands)),
            timeout,
        }
    }

    /// Hands a command to the export thread and waits for the reply.
    fn ask(&self, command: impl FnOnce(Sender<OTelSdkResult>) -> Command) -> OTelSdkResult {
        let (reply, answer) = mpsc::channel();
        if self.commands.lock()?.send(command(reply)).is_err() {
            return Err(OTelSdkError::InternalFailure(
                "export thread is not running".into(),
            ));
        }

        answer.recv_timeout(self.timeout).unwrap_or_else(|err| match err {
            RecvTimeoutError::Timeout => Err(OTelSdkError::Timeout(self.timeout)),
            RecvTimeoutError::Disconnected => Err(OTelSdkError::InternalFailure(
                "export thread stopped without replying".into(),
            )),
        })
    }
}

impl<E: PushMetricExporter> Shared<E> {
    /// Fills `rm` from the pipeline, then from external producers.
    ///
    /// A callback timeout ends the collection early. Other failures are
    /// combined and returned after everything that could be gathered is in
    /// `rm`.
    fn gather(&self, rm: &mut ResourceMetrics, timeout: Option<Duration>) -> OTelSdkResult {
        let Some(pipeline) = self.pipeline.lock()?.as_ref().and_then(Weak::upgrade) else {
            return Err(OTelSdkError::InternalFailure(
                "reader is not registered with a meter provider".into(),
            ));
        };

        let sdk = pipeline.produce(rm, timeout);
        if let Err(OTelSdkError::Timeout(_)) = sdk {
            return sdk;
        }

        let mut results = vec![sdk];
        for producer in self.producers.lock()?.iter() {
            results.push(producer.produce().map(|scope| rm.scope_metrics.push(scope)));
        }
        error::combine(results)
    }

    /// One collection pushed to the exporter.
    fn export_once(&self, timeout: Duration) -> OTelSdkResult {
        let mut rm = ResourceMetrics::default();
        let gathered = self.gather(&mut rm, Some(timeout));

        if let Err(err) = &gathered {
            otel_warn!(
                name: "PeriodicReader.CollectFailed",
                error = format!("{err}")
            );
            // Partial output from the scopes that did collect is still sent.
            if matches!(err, OTelSdkError::Timeout(_)) || rm.scope_metrics.is_empty() {
                return gathered;
            }
        } else if rm.scope_metrics.is_empty() {
            otel_debug!(name: "PeriodicReader.NothingToExport");
            return Ok(());
        }

        let exported = futures_executor::block_on(self.exporter.export(&rm));
        if let Err(err) = &exported {
            otel_error!(
                name: "PeriodicReader.ExportFailed",
                error = format!("{err}")
            );
        }
        exported
    }
}

/// Owns the schedule on the export thread.
struct Worker<E> {
    shared: Arc<Shared<E>>,
    interval: Duration,
    timeout: Duration,
}

impl<E: PushMetricExporter> Worker<E> {
    fn run(self, inbox: mpsc::Receiver<Command>) {
        otel_info!(
            name: "PeriodicReader.Started",
            interval_ms = self.interval.as_millis(),
            timeout_ms = self.timeout.as_millis()
        );

        // Scheduled exports are spaced from start to start, so time spent
        // exporting shortens the next wait. Flushes leave the schedule alone.
        let mut next_export = Instant::now() + self.interval;
        loop {
            let wait = next_export.saturating_duration_since(Instant::now());
            match inbox.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {
                    let started = Instant::now();
                    otel_debug!(name: "PeriodicReader.ScheduledExport");
                    // failures are already logged
                    let _ = self.shared.export_once(self.timeout);
                    next_export = started + self.interval;
                }
                Ok(Command::Flush(reply)) => {
                    otel_debug!(name: "PeriodicReader.FlushExport");
                    let result = error::combine([
                        self.shared.export_once(self.timeout),
                        self.shared.exporter.force_flush(),
                    ]);
                    // the caller may have stopped waiting
                    let _ = reply.send(result);
                }
                Ok(Command::Shutdown(reply)) => {
                    otel_debug!(name: "PeriodicReader.ShutdownExport");
                    let result = error::combine([
                        self.shared.export_once(self.timeout),
                        self.shared.exporter.shutdown_with_timeout(self.timeout),
                    ]);
                    let _ = reply.send(result);
                    break;
                }
                // every handle was dropped
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        otel_info!(name: "PeriodicReader.Stopped");
    }
}

impl<E: PushMetricExporter> MetricReader for PeriodicReader<E> {
    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        let Ok(mut slot) = self.shared.pipeline.lock() else {
            return;
        };
        if slot.is_some() {
            otel_debug!(name: "PeriodicReader.PipelineAlreadyRegistered");
            return;
        }
        *slot = Some(pipeline);
    }

    fn register_producer(&self, producer: Box<dyn MetricProducer>) {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return;
        }
        if let Ok(mut producers) = self.shared.producers.lock() {
            producers.push(producer);
        }
    }

    fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        self.shared.gather(rm, None)
    }

    fn force_flush(&self) -> OTelSdkResult {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        self.ask(Command::Flush)
    }

    fn shutdown(&self) -> OTelSdkResult {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        self.ask(Command::Shutdown)
    }

    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        kind.temporality_preference(self.shared.exporter.temporality())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{InMemoryMetricExporter, InMemoryMetricExporterBuilder, SdkMeterProvider};
    use otel_metrics::metrics::MeterProvider;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;

    /// Rejects its first export and accepts the rest.
    #[derive(Debug, Clone, Default)]
    struct FlakyExporter {
        attempts: Arc<AtomicUsize>,
    }

    impl PushMetricExporter for FlakyExporter {
        async fn export(&self, _metrics: &ResourceMetrics) -> OTelSdkResult {
            match self.attempts.fetch_add(1, Ordering::SeqCst) {
                0 => Err(OTelSdkError::InternalFailure("collector unreachable".into())),
                _ => Ok(()),
            }
        }

        fn force_flush(&self) -> OTelSdkResult {
            Ok(())
        }

        fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
            Ok(())
        }

        fn temporality(&self) -> Temporality {
            Temporality::Cumulative
        }
    }

    /// Holds each export until the test sends a token.
    #[derive(Debug)]
    struct GatedExporter {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl PushMetricExporter for GatedExporter {
        async fn export(&self, _metrics: &ResourceMetrics) -> OTelSdkResult {
            let _ = self.gate.lock().map(|gate| gate.recv());
            Ok(())
        }

        fn force_flush(&self) -> OTelSdkResult {
            Ok(())
        }

        fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
            Ok(())
        }

        fn temporality(&self) -> Temporality {
            Temporality::Cumulative
        }
    }

    fn provider_with(reader: PeriodicReader<impl PushMetricExporter>) -> SdkMeterProvider {
        SdkMeterProvider::builder().with_reader(reader).build()
    }

    fn fast_reader(exporter: &InMemoryMetricExporter) -> PeriodicReader<InMemoryMetricExporter> {
        PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_millis(10))
            .build()
    }

    #[test]
    fn callbacks_run_on_every_tick() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ticks);
        let reader = PeriodicReader::builder(InMemoryMetricExporter::default())
            .with_interval(Duration::from_millis(1))
            .build();
        let provider = provider_with(reader);
        let _gauge = provider
            .meter("worker")
            .u64_observable_gauge("queue_depth")
            .with_callback(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .init();

        // generous for slow machines
        thread::sleep(Duration::from_millis(100));

        assert!(ticks.load(Ordering::SeqCst) >= 5);
    }

    #[test]
    fn second_shutdown_does_not_reach_exporter() {
        let exporter = InMemoryMetricExporter::default();
        let provider = provider_with(fast_reader(&exporter));

        provider.shutdown().unwrap();
        assert_eq!(exporter.shutdown_count(), 1);

        for _ in 0..2 {
            assert!(matches!(provider.shutdown(), Err(OTelSdkError::AlreadyShutdown)));
        }
        assert_eq!(exporter.shutdown_count(), 1);
    }

    #[test]
    fn flush_succeeds_until_shutdown() {
        let provider = provider_with(fast_reader(&InMemoryMetricExporter::default()));

        provider.force_flush().unwrap();
        provider.force_flush().unwrap();
        provider.shutdown().unwrap();
        assert!(provider.force_flush().is_err());
    }

    #[test]
    fn empty_collections_are_not_exported() {
        let exporter = InMemoryMetricExporter::default();
        let provider = provider_with(fast_reader(&exporter));

        provider.force_flush().unwrap();

        assert!(exporter.get_finished_metrics().unwrap().is_empty());
    }

    #[test]
    fn collect_needs_a_registered_pipeline() {
        let reader = PeriodicReader::builder(InMemoryMetricExporter::default())
            .with_interval(Duration::from_secs(60))
            .build();
        let mut rm = ResourceMetrics::default();

        assert!(matches!(
            reader.collect(&mut rm),
            Err(OTelSdkError::InternalFailure(_))
        ));

        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();
        reader.collect(&mut rm).unwrap();
        provider.force_flush().unwrap();
    }

    #[test]
    fn export_failure_is_reported_by_flush() {
        let exporter = FlakyExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_secs(3600))
            .build();
        let provider = provider_with(reader);
        provider.meter("jobs").u64_counter("started").init().add(1, &[]);

        assert!(provider.force_flush().is_err());
        provider.force_flush().unwrap();
        assert_eq!(exporter.attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn schedule_survives_export_failure() {
        let exporter = FlakyExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_millis(10))
            .build();
        let provider = provider_with(reader);
        provider.meter("jobs").u64_counter("started").init().add(1, &[]);

        thread::sleep(Duration::from_millis(500));

        assert!(exporter.attempts.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn slow_export_makes_flush_time_out() {
        let (open, gate) = mpsc::channel();
        let reader = PeriodicReader::builder(GatedExporter {
            gate: Mutex::new(gate),
        })
        .with_interval(Duration::from_secs(3600))
        .with_timeout(Duration::from_millis(50))
        .build();
        let provider = provider_with(reader);
        provider.meter("jobs").u64_counter("started").init().add(1, &[]);

        let result = provider.force_flush();
        assert!(
            matches!(result, Err(OTelSdkError::Timeout(t)) if t == Duration::from_millis(50)),
            "{result:?}"
        );

        // let the pending and final exports through
        for _ in 0..4 {
            let _ = open.send(());
        }
        drop(open);
        let _ = provider.shutdown();
    }

    #[test]
    fn delta_exporter_keeps_up_down_counters_cumulative() {
        let exporter = InMemoryMetricExporterBuilder::new()
            .with_temporality(Temporality::Delta)
            .build();
        let reader = PeriodicReader::builder(exporter).build();

        assert_eq!(reader.temporality(InstrumentKind::Histogram), Temporality::Delta);
        assert_eq!(
            reader.temporality(InstrumentKind::UpDownCounter),
            Temporality::Cumulative
        );
    }

    #[rstest]
    #[case(None, None, DEFAULT_INTERVAL, DEFAULT_TIMEOUT)]
    #[case(Some("1500"), Some("250"), Duration::from_millis(1500), Duration::from_millis(250))]
    #[case(Some("0"), Some("-5"), DEFAULT_INTERVAL, DEFAULT_TIMEOUT)]
    #[case(Some("soon"), Some(""), DEFAULT_INTERVAL, DEFAULT_TIMEOUT)]
    fn configuration_from_environment(
        #[case] interval: Option<&str>,
        #[case] timeout: Option<&str>,
        #[case] expected_interval: Duration,
        #[case] expected_timeout: Duration,
    ) {
        temp_env::with_vars(
            [
                (METRIC_EXPORT_INTERVAL_NAME, interval),
                (METRIC_EXPORT_TIMEOUT_NAME, timeout),
            ],
            || {
                let builder = PeriodicReader::builder(InMemoryMetricExporter::default());
                assert_eq!(builder.interval, expected_interval);
                assert_eq!(builder.timeout, expected_timeout);
            },
        );
    }

    #[test]
    fn builder_overrides_environment() {
        temp_env::with_vars(
            [
                (METRIC_EXPORT_INTERVAL_NAME, Some("1500")),
                (METRIC_EXPORT_TIMEOUT_NAME, Some("250")),
            ],
            || {
                let builder = PeriodicReader::builder(InMemoryMetricExporter::default())
                    .with_interval(Duration::from_secs(5))
                    .with_timeout(Duration::ZERO);
                assert_eq!(builder.interval, Duration::from_secs(5));
                assert_eq!(builder.timeout, Duration::from_millis(250));
            },
        );
    }

    #[derive(Clone, Copy, Debug)]
    enum Trigger {
        Timer,
        Flush,
        Shutdown,
    }

    impl Trigger {
        fn fire(self, provider: &SdkMeterProvider) {
            match self {
                Trigger::Timer => thread::sleep(Duration::from_millis(500)),
                Trigger::Flush => provider.force_flush().unwrap(),
                Trigger::Shutdown => provider.shutdown().unwrap(),
            }
        }
    }

    fn assert_exported_after(trigger: Trigger) {
        let exporter = InMemoryMetricExporter::default();
        let provider = provider_with(fast_reader(&exporter));
        let (observed, calls) = mpsc::channel();
        let observed = Mutex::new(observed);
        let _counter = provider
            .meter("worker")
            .u64_observable_counter("jobs_done")
            .with_callback(move |observer| {
                observer.observe(1, &[]);
                let _ = observed.lock().map(|tx| tx.send(()));
            })
            .init();

        trigger.fire(&provider);

        assert!(calls.try_recv().is_ok(), "{trigger:?} ran no callback");
        assert!(
            !exporter.get_finished_metrics().unwrap().is_empty(),
            "{trigger:?} exported nothing"
        );
    }

    #[rstest]
    #[case(Trigger::Timer)]
    #[case(Trigger::Flush)]
    #[case(Trigger::Shutdown)]
    fn exports_from_plain_thread(#[case] trigger: Trigger) {
        assert_exported_after(trigger);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn exports_inside_multi_thread_runtime() {
        for trigger in [Trigger::Timer, Trigger::Flush, Trigger::Shutdown] {
            assert_exported_after(trigger);
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn exports_inside_current_thread_runtime() {
        for trigger in [Trigger::Timer, Trigger::Flush, Trigger::Shutdown] {
            assert_exported_after(trigger);
        }
    }
}
