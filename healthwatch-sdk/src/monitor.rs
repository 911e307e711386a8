//! The Monitor: periodic sampling of registered metrics.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use healthwatch_types::Metrics;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::metric::{Metric, MonitorOptions};
use crate::observer::{Observer, Subject, Subscription};

struct Running {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct MonitorInner {
    options: MonitorOptions,
    next_metric_id: AtomicU64,
    metrics: RwLock<Vec<(u64, Arc<dyn Metric>)>>,
    subject: Subject<Metrics>,
    running: Mutex<Option<Running>>,
    active: AtomicBool,
    // Held for the whole of a tick; `stop()` takes it so no metric callback
    // runs once it returns. Reentrant so a subscriber may stop its monitor.
    tick_lock: ReentrantMutex<()>,
}

impl MonitorInner {
    fn metrics(&self) -> Vec<Arc<dyn Metric>> {
        self.metrics
            .read()
            .iter()
            .map(|(_, metric)| metric.clone())
            .collect()
    }

    fn tick(&self) -> Metrics {
        let _guard = self.tick_lock.lock();
        let options = &self.options;
        let metrics = self.metrics();

        for metric in &metrics {
            metric.before_measure(options);
        }

        let mut merged = Metrics::new();
        for metric in &metrics {
            merged.merge(metric.measure(options));
        }

        self.subject.publish(&merged);

        for metric in &metrics {
            metric.after_measure(options);
        }

        debug!("Monitor tick published {} metric fragments", metrics.len());
        merged
    }

    fn scheduled_tick(&self) {
        let _guard = self.tick_lock.lock();
        if self.active.load(Ordering::SeqCst) {
            self.tick();
        }
    }
}

/// Runs a set of [`Metric`]s on a fixed interval and publishes the merged
/// fragment of every tick to its subscribers.
///
/// Ticks never overlap: when a tick overruns the interval, the missed ticks
/// are skipped. Clones share the same registrations and timer.
///
/// # Example
///
/// ```rust,no_run
/// use healthwatch_sdk::{History, HistoryOptions, Monitor, RequestMetric};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> healthwatch_sdk::Result<()> {
///     let requests = RequestMetric::new();
///     let history = History::new(HistoryOptions::default());
///
///     let monitor = Monitor::builder()
///         .interval(Duration::from_secs(1))
///         .metric(requests.clone())
///         .build();
///     monitor.subscribe(Arc::new(history.clone()));
///
///     monitor.start()?;
///     tokio::time::sleep(Duration::from_secs(5)).await;
///     monitor.stop();
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Monitor {
    pub fn new(options: MonitorOptions) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                options,
                next_metric_id: AtomicU64::new(0),
                metrics: RwLock::new(Vec::new()),
                subject: Subject::new(),
                running: Mutex::new(None),
                active: AtomicBool::new(false),
                tick_lock: ReentrantMutex::new(()),
            }),
        }
    }

    pub fn builder() -> MonitorBuilder {
        MonitorBuilder::new()
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.inner.options
    }

    /// Register a metric. Fragments merge in registration order, so a later
    /// metric wins when two report the same group.
    pub fn add<M: Metric + 'static>(&self, metric: M) -> MetricRegistration {
        self.add_shared(Arc::new(metric))
    }

    pub fn add_shared(&self, metric: Arc<dyn Metric>) -> MetricRegistration {
        let id = self.inner.next_metric_id.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.write().push((id, metric));
        MetricRegistration {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    pub fn metric_count(&self) -> usize {
        self.inner.metrics.read().len()
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer<Metrics>>) -> Subscription {
        self.inner.subject.subscribe(observer)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Start every metric, then tick every interval on the current tokio
    /// runtime. Calling `start` on a running monitor does nothing.
    ///
    /// A metric whose `start` fails is logged and keeps taking part in ticks.
    /// The background task holds no strong reference to the monitor and
    /// exits once every handle is dropped.
    pub fn start(&self) -> Result<()> {
        let period = self.inner.options.interval();
        if period.is_zero() {
            return Err(Error::InvalidConfig(
                "monitor interval must be greater than zero".to_string(),
            ));
        }

        let runtime = Handle::try_current().map_err(|_| Error::RuntimeUnavailable)?;

        let mut running = self.inner.running.lock();
        if running.is_some() {
            return Ok(());
        }

        for metric in self.inner.metrics() {
            if let Err(e) = metric.start(&self.inner.options) {
                warn!("Metric failed to start, reporting without it: {}", e);
            }
        }

        self.inner.active.store(true, Ordering::SeqCst);

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = runtime.spawn(run(Arc::downgrade(&self.inner), period, stop_rx));
        *running = Some(Running { stop_tx, task });

        info!("Monitor started with {:?} interval", period);
        Ok(())
    }

    /// Stop ticking, stop every metric and signal completion to subscribers.
    ///
    /// No metric callback runs after this returns. Stopping a monitor that is
    /// not running does nothing.
    pub fn stop(&self) {
        let Some(running) = self.inner.running.lock().take() else {
            return;
        };

        self.inner.active.store(false, Ordering::SeqCst);
        let _ = running.stop_tx.send(true);
        running.task.abort();

        let _guard = self.inner.tick_lock.lock();
        for metric in self.inner.metrics() {
            metric.stop(&self.inner.options);
        }
        self.inner.subject.complete();

        info!("Monitor stopped");
    }

    /// Run one full tick immediately and return the published fragment.
    pub fn tick(&self) -> Metrics {
        self.inner.tick()
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(MonitorOptions::default())
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("options", &self.inner.options)
            .field("metrics", &self.metric_count())
            .field("subscribers", &self.inner.subject.len())
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run(monitor: Weak<MonitorInner>, period: Duration, mut stop_rx: watch::Receiver<bool>) {
    let mut interval_timer = tokio::time::interval_at(Instant::now() + period, period);
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.scheduled_tick();
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// Handle returned by [`Monitor::add`].
#[derive(Debug)]
pub struct MetricRegistration {
    id: u64,
    monitor: Weak<MonitorInner>,
}

impl MetricRegistration {
    /// Unregister the metric. Returns `false` if it was already removed or
    /// the monitor is gone.
    pub fn remove(self) -> bool {
        let Some(monitor) = self.monitor.upgrade() else {
            return false;
        };

        let mut metrics = monitor.metrics.write();
        let before = metrics.len();
        metrics.retain(|(id, _)| *id != self.id);
        metrics.len() != before
    }
}

impl fmt::Debug for MonitorInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorInner")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`Monitor`].
#[derive(Default)]
pub struct MonitorBuilder {
    options: MonitorOptions,
    metrics: Vec<Arc<dyn Metric>>,
}

impl MonitorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tick interval. Defaults to 1 second.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.options = MonitorOptions::with_interval(interval);
        self
    }

    pub fn options(mut self, options: MonitorOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a metric; see [`Monitor::add`].
    pub fn metric<M: Metric + 'static>(mut self, metric: M) -> Self {
        self.metrics.push(Arc::new(metric));
        self
    }

    pub fn build(self) -> Monitor {
        let monitor = Monitor::new(self.options);
        for metric in self.metrics {
            monitor.add_shared(metric);
        }
        monitor
    }
}

impl fmt::Debug for MonitorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorBuilder")
            .field("options", &self.options)
            .field("metrics", &self.metrics.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObserverError;
    use crate::observer::from_fn;
    use healthwatch_types::{CpuUsage, MetricField};

    /// Records every lifecycle call it receives.
    #[derive(Default)]
    struct Probe {
        calls: Mutex<Vec<&'static str>>,
        fail_start: bool,
        value: f64,
    }

    impl Probe {
        fn reporting(value: f64) -> Arc<Self> {
            Arc::new(Self {
                value,
                ..Self::default()
            })
        }

        fn count(&self, call: &str) -> usize {
            self.calls.lock().iter().filter(|c| **c == call).count()
        }
    }

    impl Metric for Probe {
        fn start(&self, _: &MonitorOptions) -> Result<()> {
            self.calls.lock().push("start");
            if self.fail_start {
                return Err(Error::InstrumentationUnavailable("probe".into()));
            }
            Ok(())
        }

        fn before_measure(&self, _: &MonitorOptions) {
            self.calls.lock().push("before");
        }

        fn measure(&self, _: &MonitorOptions) -> Metrics {
            self.calls.lock().push("measure");
            Metrics::builder()
                .cpu_usage(CpuUsage {
                    user: 0,
                    system: 0,
                    percent: self.value,
                })
                .custom(format!("probe{}", self.value), self.value)
                .build()
        }

        fn after_measure(&self, _: &MonitorOptions) {
            self.calls.lock().push("after");
        }

        fn stop(&self, _: &MonitorOptions) {
            self.calls.lock().push("stop");
        }
    }

    struct Failing;

    impl Observer<Metrics> for Failing {
        fn next(&self, _: &Metrics) -> std::result::Result<(), ObserverError> {
            panic!("subscriber bug");
        }
    }

    #[test]
    fn tick_runs_phases_in_order() {
        let monitor = Monitor::default();
        let probe = Probe::reporting(1.0);
        monitor.add_shared(probe.clone());

        monitor.tick();

        assert_eq!(*probe.calls.lock(), vec!["before", "measure", "after"]);
    }

    #[test]
    fn later_metrics_win_collisions() {
        let monitor = Monitor::default();
        monitor.add_shared(Probe::reporting(1.0));
        monitor.add_shared(Probe::reporting(2.0));

        let merged = monitor.tick();

        assert_eq!(MetricField::CpuPercent.read(&merged), Some(2.0));
        assert_eq!(merged.custom.len(), 2);
    }

    #[test]
    fn failing_subscriber_does_not_abort_tick() {
        let monitor = Monitor::default();
        let probe = Probe::reporting(1.0);
        monitor.add_shared(probe.clone());

        let received = Arc::new(Mutex::new(0));
        let counter = received.clone();
        monitor.subscribe(Arc::new(Failing));
        monitor.subscribe(from_fn(move |_: &Metrics| *counter.lock() += 1));

        monitor.tick();

        assert_eq!(*received.lock(), 1);
        assert_eq!(probe.count("after"), 1);
    }

    #[test]
    fn removed_metric_is_not_measured() {
        let monitor = Monitor::default();
        let probe = Probe::reporting(1.0);
        let registration = monitor.add_shared(probe.clone());

        assert!(registration.remove());
        monitor.tick();

        assert_eq!(probe.count("measure"), 0);
        assert_eq!(monitor.metric_count(), 0);
    }

    #[test]
    fn start_requires_runtime() {
        let monitor = Monitor::default();
        assert!(matches!(monitor.start(), Err(Error::RuntimeUnavailable)));
        assert!(!monitor.is_running());
    }

    #[test]
    fn stop_before_start_is_noop() {
        let monitor = Monitor::default();
        let probe = Probe::reporting(1.0);
        monitor.add_shared(probe.clone());

        monitor.stop();

        assert_eq!(probe.count("stop"), 0);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let monitor = Monitor::new(MonitorOptions { interval_ms: 0 });
        assert!(matches!(monitor.start(), Err(Error::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_every_interval_until_stopped() {
        let monitor = Monitor::builder()
            .interval(Duration::from_millis(100))
            .build();
        let probe = Probe::reporting(1.0);
        monitor.add_shared(probe.clone());

        let completed = Arc::new(Mutex::new(false));
        struct Completion(Arc<Mutex<bool>>);
        impl Observer<Metrics> for Completion {
            fn next(&self, _: &Metrics) -> std::result::Result<(), ObserverError> {
                Ok(())
            }
            fn complete(&self) {
                *self.0.lock() = true;
            }
        }
        monitor.subscribe(Arc::new(Completion(completed.clone())));

        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(probe.count("measure"), 3);

        monitor.stop();
        assert!(*completed.lock());
        assert_eq!(probe.count("stop"), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(probe.count("measure"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let monitor = Monitor::builder()
            .interval(Duration::from_millis(100))
            .build();
        let probe = Probe::reporting(1.0);
        monitor.add_shared(probe.clone());

        monitor.start().unwrap();
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(probe.count("start"), 1);
        assert_eq!(probe.count("measure"), 2);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_metric_start_is_tolerated() {
        let monitor = Monitor::builder()
            .interval(Duration::from_millis(100))
            .build();
        let probe = Arc::new(Probe {
            fail_start: true,
            ..Probe::default()
        });
        monitor.add_shared(probe.clone());

        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(probe.count("measure"), 1);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop() {
        let monitor = Monitor::builder()
            .interval(Duration::from_millis(100))
            .build();
        let probe = Probe::reporting(1.0);
        monitor.add_shared(probe.clone());

        monitor.start().unwrap();
        monitor.stop();
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(probe.count("start"), 2);
        assert_eq!(probe.count("measure"), 1);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_monitor_ends_background_task() {
        let probe = Probe::reporting(1.0);
        {
            let monitor = Monitor::builder()
                .interval(Duration::from_millis(100))
                .build();
            monitor.add_shared(probe.clone());
            monitor.start().unwrap();
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(probe.count("measure"), 0);
    }
}
