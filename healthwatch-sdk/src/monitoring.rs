//! Ready-made wiring of two monitors, their histories and the severity scorer.

use std::fmt;
use std::sync::Arc;

use crate::clock::{self, Clock};
use crate::config::MonitoringConfig;
use crate::error::Result;
use crate::history::History;
use crate::metric::Metric;
use crate::monitor::{MetricRegistration, Monitor};
use crate::request::{RequestMetric, TrackedRequest};
use crate::severity::{Severity, SeverityCalculation};

/// A complete health engine.
///
/// The long monitor samples at `monitor.interval_ms` into the long history and
/// recalculates severity after each tick. The short monitor samples request
/// bursts into the short history. Both monitors own their own
/// [`RequestMetric`], and [`Monitoring::track_request`] feeds both.
///
/// Collectors for CPU, memory or event-loop statistics are plugged in with
/// [`Monitoring::add_metric`] and [`Monitoring::add_short_metric`].
///
/// # Example
///
/// ```rust,no_run
/// use healthwatch_sdk::{Monitoring, MonitoringConfig, SeverityLevel};
///
/// #[tokio::main]
/// async fn main() -> healthwatch_sdk::Result<()> {
///     let monitoring = Monitoring::new(MonitoringConfig::default())?;
///     monitoring.start()?;
///
///     let request = monitoring.track_request();
///     // ... handle the request ...
///     request.finish(200);
///
///     if monitoring.threats().is_at_least(SeverityLevel::High) {
///         // shed load
///     }
///
///     monitoring.stop();
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Monitoring {
    config: MonitoringConfig,
    monitor: Monitor,
    history: History,
    requests: RequestMetric,
    short_monitor: Monitor,
    short_history: History,
    short_requests: RequestMetric,
    severity: Severity,
}

impl Monitoring {
    /// Validate `config` and wire the engine on the system clock.
    pub fn new(config: MonitoringConfig) -> Result<Self> {
        Self::with_clock(config, clock::system())
    }

    /// Like [`Monitoring::new`], timestamping snapshots with `clock`.
    pub fn with_clock(config: MonitoringConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let history = History::with_clock(config.history, clock.clone());
        let short_history = History::with_clock(config.short_history, clock.clone());
        let requests = RequestMetric::new();
        let short_requests = RequestMetric::new();

        let severity = Severity::builder()
            .history(history.clone())
            .short_history(short_history.clone())
            .requests(requests.clone())
            .short_requests(short_requests.clone())
            .options(config.severity)
            .clock(clock)
            .build()?;

        let monitor = Monitor::new(config.monitor);
        monitor.add(requests.clone());
        // History first: severity reads the snapshot appended by this tick.
        monitor.subscribe(Arc::new(history.clone()));
        monitor.subscribe(Arc::new(severity.clone()));

        let short_monitor = Monitor::new(config.short_monitor);
        short_monitor.add(short_requests.clone());
        short_monitor.subscribe(Arc::new(short_history.clone()));

        Ok(Self {
            config,
            monitor,
            history,
            requests,
            short_monitor,
            short_history,
            short_requests,
            severity,
        })
    }

    /// Start both monitors on the current tokio runtime.
    pub fn start(&self) -> Result<()> {
        self.monitor.start()?;
        if let Err(e) = self.short_monitor.start() {
            self.monitor.stop();
            return Err(e);
        }
        Ok(())
    }

    /// Stop both monitors. Histories are cleared as their monitors complete.
    pub fn stop(&self) {
        self.monitor.stop();
        self.short_monitor.stop();
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running() && self.short_monitor.is_running()
    }

    /// The current verdict. See [`Severity::threats`].
    pub fn threats(&self) -> SeverityCalculation {
        self.severity.threats()
    }

    /// Track one inbound request in both request windows.
    pub fn track_request(&self) -> TrackedRequest {
        TrackedRequest::start(&[self.requests.clone(), self.short_requests.clone()])
    }

    /// Count an accepted connection in both request windows.
    pub fn connection_accepted(&self) {
        self.requests.connection_accepted();
        self.short_requests.connection_accepted();
    }

    /// Add a collector to the long monitor.
    pub fn add_metric<M: Metric + 'static>(&self, metric: M) -> MetricRegistration {
        self.monitor.add(metric)
    }

    /// Add a collector to the short monitor.
    pub fn add_short_metric<M: Metric + 'static>(&self, metric: M) -> MetricRegistration {
        self.short_monitor.add(metric)
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn requests(&self) -> &RequestMetric {
        &self.requests
    }

    pub fn short_monitor(&self) -> &Monitor {
        &self.short_monitor
    }

    pub fn short_history(&self) -> &History {
        &self.short_history
    }

    pub fn short_requests(&self) -> &RequestMetric {
        &self.short_requests
    }

    pub fn severity(&self) -> &Severity {
        &self.severity
    }
}

impl fmt::Debug for Monitoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitoring")
            .field("config", &self.config)
            .field("monitor", &self.monitor)
            .field("short_monitor", &self.short_monitor)
            .field("severity", &self.severity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Error;
    use crate::history::HistoryOptions;
    use crate::severity::{SeverityLevel, ThreatReason};
    use healthwatch_types::MetricField;

    fn monitoring() -> (Monitoring, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let monitoring =
            Monitoring::with_clock(MonitoringConfig::default(), Arc::new(clock.clone())).unwrap();
        (monitoring, clock)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = MonitoringConfig {
            short_history: HistoryOptions::with_limit(0),
            ..MonitoringConfig::default()
        };

        assert!(matches!(Monitoring::new(config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn manual_ticks_feed_histories_and_severity() {
        let (monitoring, _) = monitoring();

        let request = monitoring.track_request();
        monitoring.monitor().tick();
        monitoring.short_monitor().tick();

        assert_eq!(monitoring.history().len(), 1);
        assert_eq!(monitoring.short_history().len(), 1);
        assert_eq!(
            monitoring.history().values_of(&MetricField::RequestActive),
            vec![Some(1.0)]
        );
        assert!(monitoring.severity().current_score().is_some());

        request.finish(200);
        assert_eq!(monitoring.requests().active(), 0);
        assert_eq!(monitoring.short_requests().active(), 0);
    }

    #[test]
    fn request_burst_is_reported() {
        let (monitoring, _) = monitoring();

        for _ in 0..12 {
            monitoring.track_request().finish(200);
        }

        let threats = monitoring.threats();
        assert_eq!(threats.level, SeverityLevel::Critical);
        assert!(threats.has(ThreatReason::DenialOfServiceDetected));
    }

    #[test]
    fn connections_count_in_both_windows() {
        let (monitoring, _) = monitoring();

        monitoring.connection_accepted();

        assert_eq!(monitoring.requests().sample().count.connections, 1);
        assert_eq!(monitoring.short_requests().sample().count.connections, 1);
    }

    #[test]
    fn start_requires_runtime() {
        let (monitoring, _) = monitoring();

        assert!(matches!(monitoring.start(), Err(Error::RuntimeUnavailable)));
        assert!(!monitoring.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_both_monitors() {
        let (monitoring, _) = monitoring();

        monitoring.start().unwrap();
        assert!(monitoring.is_running());

        tokio::time::sleep(std::time::Duration::from_millis(55)).await;
        assert_eq!(monitoring.short_history().len(), 5);

        monitoring.stop();
        assert!(!monitoring.monitor().is_running());
        assert!(!monitoring.short_monitor().is_running());
    }
}
