//! Threat scoring: fuses history statistics and live request counts into a
//! graded severity verdict.
//!
//! The score is recalculated on every tick of the long monitor (and lazily on
//! the first query). Each query may then amend it from fresh request samples
//! and overlays [`SeverityLevel::Fatal`] when data went stale or a critical
//! streak keeps getting worse.

use std::fmt;
use std::sync::Arc;

use healthwatch_types::{MetricField, Metrics};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{self, Clock};
use crate::error::{Error, ObserverError, Result};
use crate::history::{History, StatisticKey};
use crate::observer::Observer;
use crate::pipe;
use crate::pipeline::{avg, defined, first, last, median_noise_reduction, or, take_last};
use crate::request::RequestMetric;
use crate::stats::{self, Regression};

/// How long a CRITICAL streak must last before trends can escalate to FATAL.
pub const CRITICAL_TO_FATAL_TIME_MS: u64 = 5000;

/// Scores at or above this skip on-demand amendments.
pub const HARD_TRIP_SCORE: f64 = 80.0;

const MAX_SCORE: f64 = 100.0;
const MAX_DECREASE_PER_TICK: f64 = 5.0;
const MAX_RECORDS: usize = 20;
const TREND_SAMPLES: i64 = (CRITICAL_TO_FATAL_TIME_MS / 1000) as i64;

/// Graded verdict, ordered from healthy to unrecoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Normal,
    Low,
    Medium,
    High,
    Critical,
    /// Only ever reported by [`Severity::threats`], never stored.
    Fatal,
}

impl SeverityLevel {
    /// Level for a score: 80 critical, 65 high, 50 medium, 30 low.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Critical
        } else if score >= 65.0 {
            Self::High
        } else if score >= 50.0 {
            Self::Medium
        } else if score >= 30.0 {
            Self::Low
        } else {
            Self::Normal
        }
    }

    pub fn is_at_least(self, min: SeverityLevel) -> bool {
        self >= min
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Why a record contributed to the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThreatReason {
    InsufficientMetricsHistory,
    UtilizationSpike,
    CriticalUtilization,
    VeryHighUtilization,
    HighUtilization,
    ElevatedUtilization,
    ModerateUtilization,
    CriticalMemoryUsage,
    HighMemoryUsage,
    ElevatedMemoryUsage,
    ModerateMemoryUsage,
    EventLoopDelaySpike,
    DecreasingSeverity,
    DenialOfServiceDetected,
    DistributedDenialOfServiceDetected,
    DeadlockDetected,
}

impl ThreatReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientMetricsHistory => "insufficientMetricsHistory",
            Self::UtilizationSpike => "utilizationSpike",
            Self::CriticalUtilization => "criticalUtilization",
            Self::VeryHighUtilization => "veryHighUtilization",
            Self::HighUtilization => "highUtilization",
            Self::ElevatedUtilization => "elevatedUtilization",
            Self::ModerateUtilization => "moderateUtilization",
            Self::CriticalMemoryUsage => "criticalMemoryUsage",
            Self::HighMemoryUsage => "highMemoryUsage",
            Self::ElevatedMemoryUsage => "elevatedMemoryUsage",
            Self::ModerateMemoryUsage => "moderateMemoryUsage",
            Self::EventLoopDelaySpike => "eventLoopDelaySpike",
            Self::DecreasingSeverity => "decreasingSeverity",
            Self::DenialOfServiceDetected => "denialOfServiceDetected",
            Self::DistributedDenialOfServiceDetected => "distributedDenialOfServiceDetected",
            Self::DeadlockDetected => "deadlockDetected",
        }
    }
}

impl fmt::Display for ThreatReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One contribution to a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityRecord {
    pub score: f64,
    pub reason: ThreatReason,
}

impl SeverityRecord {
    pub fn new(score: f64, reason: ThreatReason) -> Self {
        Self { score, reason }
    }
}

/// A score, its level and the records that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityCalculation {
    pub score: f64,
    pub level: SeverityLevel,
    pub records: Vec<SeverityRecord>,
}

impl SeverityCalculation {
    pub fn is_at_least(&self, min: SeverityLevel) -> bool {
        self.level.is_at_least(min)
    }

    /// Whether any record carries `reason`.
    pub fn has(&self, reason: ThreatReason) -> bool {
        self.records.iter().any(|record| record.reason == reason)
    }

    fn bump(&mut self, record: SeverityRecord) {
        self.score = (self.score + 75.0).min(MAX_SCORE);
        self.level = SeverityLevel::from_score(self.score);
        self.records.push(record);
    }
}

/// Request thresholds and staleness limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    /// Short-window request total above which a denial of service is assumed.
    pub denial_of_service: u64,
    pub distributed_denial_of_service: u64,
    /// Long-window active requests above which the server is assumed stuck.
    pub deadlock: u64,
    /// Age of the latest long snapshot at which the verdict becomes FATAL.
    pub old_data_to_fatal_time_ms: u64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            denial_of_service: 10,
            distributed_denial_of_service: 20,
            deadlock: 10,
            old_data_to_fatal_time_ms: 4000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ExperimentalOptions {
    /// Score memory pressure. Off by default: the signal is noisy around GC.
    pub evaluate_memory_usage: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct SeverityOptions {
    pub threshold: SeverityThresholds,
    pub experimental: ExperimentalOptions,
}

struct Statistics {
    current_utilization: StatisticKey<(), f64>,
    average_utilization: StatisticKey<(), f64>,
    current_memory_percent: StatisticKey<(), f64>,
    average_memory_percent: StatisticKey<(), f64>,
    current_event_loop_delay: StatisticKey<(), f64>,
    average_event_loop_delay: StatisticKey<(), f64>,
}

impl Statistics {
    fn register(history: &History) -> Result<Self> {
        Ok(Self {
            current_utilization: register(
                history,
                "currentUtilization",
                MetricField::EventLoopUtilization,
                pipe!(
                    take_last::<Option<f64>>(5),
                    defined(),
                    median_noise_reduction(5),
                    last(),
                    or(0.0)
                ),
            )?,
            average_utilization: register(
                history,
                "averageUtilization",
                MetricField::EventLoopUtilization,
                pipe!(take_last::<Option<f64>>(15), defined(), avg(), or(0.0)),
            )?,
            current_memory_percent: register(
                history,
                "currentMemoryPercent",
                MetricField::MemoryPercent,
                pipe!(take_last::<Option<f64>>(1), defined(), last(), or(0.0)),
            )?,
            average_memory_percent: register(
                history,
                "averageMemoryPercent",
                MetricField::MemoryPercent,
                pipe!(take_last::<Option<f64>>(15), defined(), avg(), or(0.0)),
            )?,
            current_event_loop_delay: register(
                history,
                "currentEventLoopDelay",
                MetricField::EventLoopDelayP80,
                pipe!(take_last::<Option<f64>>(1), defined(), first(), or(0.0)),
            )?,
            average_event_loop_delay: register(
                history,
                "averageEventLoopDelay",
                MetricField::EventLoopDelayP80,
                pipe!(take_last::<Option<f64>>(15), defined(), avg(), or(0.0)),
            )?,
        })
    }
}

fn register<F>(
    history: &History,
    name: &str,
    field: MetricField,
    reduce: F,
) -> Result<StatisticKey<(), f64>>
where
    F: Fn(Vec<Option<f64>>) -> f64 + Send + Sync + 'static,
{
    history.register_statistic(format!("severity.{name}"), move |window, _: &()| {
        reduce(window.values_of(&field))
    })
}

#[derive(Default)]
struct SeverityState {
    current: Option<Arc<SeverityCalculation>>,
    critical_since: Option<u64>,
}

struct SeverityInner {
    history: History,
    short_history: History,
    requests: RequestMetric,
    short_requests: RequestMetric,
    options: SeverityOptions,
    clock: Arc<dyn Clock>,
    statistics: Statistics,
    state: Mutex<SeverityState>,
}

/// Stateful threat scorer.
///
/// Reads the long history (statistics and staleness), the size of the short
/// history, and on each query one sample of the long and short request
/// metrics. Subscribe it to the long monitor after the long history so every
/// tick recalculates against the fresh snapshot.
///
/// # Example
///
/// ```rust
/// use healthwatch_sdk::{
///     History, HistoryOptions, RequestMetric, Severity, SeverityLevel, ThreatReason,
/// };
///
/// let severity = Severity::builder()
///     .history(History::new(HistoryOptions::default()))
///     .short_history(History::new(HistoryOptions::with_limit(100)))
///     .requests(RequestMetric::new())
///     .short_requests(RequestMetric::new())
///     .build()
///     .unwrap();
///
/// let threats = severity.threats();
/// assert_eq!(threats.level, SeverityLevel::Low);
/// assert!(threats.has(ThreatReason::InsufficientMetricsHistory));
/// ```
#[derive(Clone)]
pub struct Severity {
    inner: Arc<SeverityInner>,
}

impl Severity {
    pub fn builder() -> SeverityBuilder {
        SeverityBuilder::default()
    }

    pub fn options(&self) -> &SeverityOptions {
        &self.inner.options
    }

    /// Recompute the stored calculation from the histories.
    ///
    /// The returned calculation carries no FATAL overlay and no amendments.
    pub fn recalculate(&self) -> Arc<SeverityCalculation> {
        let mut state = self.inner.state.lock();
        self.inner.recalculate(&mut state)
    }

    /// The current verdict.
    ///
    /// Computes the first calculation if no tick happened yet, amends it from
    /// fresh request samples while the score is below [`HARD_TRIP_SCORE`],
    /// and reports [`SeverityLevel::Fatal`] when the long history went stale
    /// or a CRITICAL streak of at least [`CRITICAL_TO_FATAL_TIME_MS`] shows
    /// rising active requests and durations. Calculations returned earlier
    /// are never modified.
    pub fn threats(&self) -> SeverityCalculation {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let stored = state.current.clone();
        let mut current = match stored {
            Some(current) => current,
            None => inner.recalculate(&mut state),
        };

        if let Some(amended) = inner.amend(&current) {
            current = Arc::new(amended);
            state.current = Some(current.clone());
        }

        let mut threats = (*current).clone();
        if inner.is_fatal(&state) {
            threats.level = SeverityLevel::Fatal;
        }

        debug!("Severity threats: {} ({})", threats.level, threats.score);
        threats
    }

    /// Score of the stored calculation, without amendments or overlay.
    pub fn current_score(&self) -> Option<f64> {
        self.inner.state.lock().current.as_ref().map(|current| current.score)
    }

    /// Start of the current CRITICAL streak, if any.
    pub fn critical_since(&self) -> Option<u64> {
        self.inner.state.lock().critical_since
    }
}

impl SeverityInner {
    fn recalculate(&self, state: &mut SeverityState) -> Arc<SeverityCalculation> {
        let previous = state.current.take();
        let calculation = Arc::new(self.calculate(previous.as_deref(), &mut state.critical_since));
        state.current = Some(calculation.clone());

        debug!(
            "Severity recalculated: {} ({}) from {} records",
            calculation.level,
            calculation.score,
            calculation.records.len()
        );
        calculation
    }

    fn calculate(
        &self,
        previous: Option<&SeverityCalculation>,
        critical_since: &mut Option<u64>,
    ) -> SeverityCalculation {
        let mut records = Vec::new();

        self.evaluate_insufficient_history(&mut records);
        self.evaluate_utilization(&mut records);
        self.evaluate_event_loop_delay(&mut records);
        if self.options.experimental.evaluate_memory_usage {
            self.evaluate_memory_usage(&mut records);
        }

        let mut score = records
            .iter()
            .map(|record| record.score)
            .sum::<f64>()
            .min(MAX_SCORE);

        if let Some(previous) = previous {
            if score < previous.score - MAX_DECREASE_PER_TICK {
                score = previous.score - MAX_DECREASE_PER_TICK;
                records.extend_from_slice(&previous.records);
                records.push(SeverityRecord::new(
                    -MAX_DECREASE_PER_TICK,
                    ThreatReason::DecreasingSeverity,
                ));

                if records.len() > MAX_RECORDS {
                    records.drain(..records.len() - MAX_RECORDS);
                }
            }
        }

        let level = SeverityLevel::from_score(score);
        if level == SeverityLevel::Critical {
            critical_since.get_or_insert_with(|| self.clock.now_ms());
        } else {
            *critical_since = None;
        }

        SeverityCalculation {
            score,
            level,
            records,
        }
    }

    fn statistic(&self, key: &StatisticKey<(), f64>) -> f64 {
        self.history.statistic(key, &()).unwrap_or(0.0)
    }

    fn evaluate_insufficient_history(&self, records: &mut Vec<SeverityRecord>) {
        if self.short_history.len() < 50 || self.history.len() < 5 {
            records.push(SeverityRecord::new(30.0, ThreatReason::InsufficientMetricsHistory));
        }
    }

    fn evaluate_utilization(&self, records: &mut Vec<SeverityRecord>) {
        let average = self.statistic(&self.statistics.average_utilization);
        let current = self.statistic(&self.statistics.current_utilization);

        if average < 0.3 {
            return;
        }

        if current > average * 2.0 {
            records.push(SeverityRecord::new(
                20.0 + (current / average) * 5.0,
                ThreatReason::UtilizationSpike,
            ));
        }

        let band = if average >= 0.9 {
            Some((80.0, ThreatReason::CriticalUtilization))
        } else if average >= 0.8 {
            Some((65.0, ThreatReason::VeryHighUtilization))
        } else if average >= 0.7 {
            Some((50.0, ThreatReason::HighUtilization))
        } else if average >= 0.6 {
            Some((35.0, ThreatReason::ElevatedUtilization))
        } else if average >= 0.5 {
            Some((15.0, ThreatReason::ModerateUtilization))
        } else {
            None
        };

        if let Some((score, reason)) = band {
            records.push(SeverityRecord::new(score, reason));
        }
    }

    fn evaluate_memory_usage(&self, records: &mut Vec<SeverityRecord>) {
        let current = self.statistic(&self.statistics.current_memory_percent);
        let average = self.statistic(&self.statistics.average_memory_percent);

        // A sharp drop below the recent average is a collection, not pressure.
        if current * 1.5 < average {
            return;
        }

        let band = if current >= 90.0 {
            Some((65.0, ThreatReason::CriticalMemoryUsage))
        } else if current >= 80.0 {
            Some((50.0, ThreatReason::HighMemoryUsage))
        } else if current >= 70.0 {
            Some((40.0, ThreatReason::ElevatedMemoryUsage))
        } else if current >= 60.0 {
            Some((25.0, ThreatReason::ModerateMemoryUsage))
        } else {
            None
        };

        if let Some((score, reason)) = band {
            records.push(SeverityRecord::new(score, reason));
        }
    }

    fn evaluate_event_loop_delay(&self, records: &mut Vec<SeverityRecord>) {
        let average = self.statistic(&self.statistics.average_event_loop_delay);
        let current = self.statistic(&self.statistics.current_event_loop_delay);

        let ratio = current / if average != 0.0 { average } else { 1.0 };
        let weight = (self.history.len() as f64 / 15.0).min(1.0);

        if ratio >= 2.0 {
            records.push(SeverityRecord::new(
                5.0 + 10.0 * weight,
                ThreatReason::EventLoopDelaySpike,
            ));
        }
    }

    /// Apply request-based amendments, in order, until the score trips.
    fn amend(&self, current: &SeverityCalculation) -> Option<SeverityCalculation> {
        if current.score >= HARD_TRIP_SCORE {
            return None;
        }

        let long = self.requests.sample();
        let short = self.short_requests.sample();
        let threshold = &self.options.threshold;
        let mut amended = current.clone();

        if amended.score < HARD_TRIP_SCORE && short.count.total > threshold.denial_of_service {
            amended.bump(SeverityRecord::new(80.0, ThreatReason::DenialOfServiceDetected));
        }

        if amended.score < HARD_TRIP_SCORE
            && short.count.total > threshold.distributed_denial_of_service
        {
            amended.score = MAX_SCORE;
            amended.level = SeverityLevel::from_score(amended.score);
            amended.records.push(SeverityRecord::new(
                100.0,
                ThreatReason::DistributedDenialOfServiceDetected,
            ));
        }

        if amended.score < HARD_TRIP_SCORE && long.count.active > threshold.deadlock {
            amended.bump(SeverityRecord::new(80.0, ThreatReason::DeadlockDetected));
        }

        (amended != *current).then_some(amended)
    }

    fn is_fatal(&self, state: &SeverityState) -> bool {
        let now = self.clock.now_ms();

        if let Some(latest) = self.history.latest() {
            if latest.age_ms(now) >= self.options.threshold.old_data_to_fatal_time_ms {
                return true;
            }
        }

        match state.critical_since {
            Some(since) if now.saturating_sub(since) >= CRITICAL_TO_FATAL_TIME_MS => {
                self.trend(&MetricField::RequestActive).slope > 0.0
                    && self.trend(&MetricField::RequestDurationAverage).slope > 0.0
            }
            _ => false,
        }
    }

    /// Fit over the last raw samples; a missing sample keeps its slot on x.
    fn trend(&self, field: &MetricField) -> Regression {
        let values = self.history.values_of(field);
        let points = stats::take_last(&values, TREND_SAMPLES)
            .iter()
            .enumerate()
            .filter_map(|(index, value)| value.map(|y| (index as f64 + 1.0, y)));

        stats::linear_regression_points(points)
    }
}

impl fmt::Debug for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Severity")
            .field("options", &self.inner.options)
            .field("current", &state.current)
            .field("critical_since", &state.critical_since)
            .finish()
    }
}

impl Observer<Metrics> for Severity {
    fn next(&self, _: &Metrics) -> std::result::Result<(), ObserverError> {
        self.recalculate();
        Ok(())
    }
}

/// Builder for a [`Severity`].
#[derive(Default)]
pub struct SeverityBuilder {
    history: Option<History>,
    short_history: Option<History>,
    requests: Option<RequestMetric>,
    short_requests: Option<RequestMetric>,
    options: SeverityOptions,
    clock: Option<Arc<dyn Clock>>,
}

impl SeverityBuilder {
    /// History fed by the long monitor. Required.
    pub fn history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    /// History fed by the short monitor. Required.
    pub fn short_history(mut self, history: History) -> Self {
        self.short_history = Some(history);
        self
    }

    /// Request metric measured by the long monitor.
    pub fn requests(mut self, requests: RequestMetric) -> Self {
        self.requests = Some(requests);
        self
    }

    /// Request metric measured by the short monitor.
    pub fn short_requests(mut self, requests: RequestMetric) -> Self {
        self.short_requests = Some(requests);
        self
    }

    pub fn options(mut self, options: SeverityOptions) -> Self {
        self.options = options;
        self
    }

    /// Clock for staleness and CRITICAL streaks. Use the histories' clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the scorer and register its statistics on the long history.
    ///
    /// Fails if a history is missing or already carries these statistics.
    pub fn build(self) -> Result<Severity> {
        let history = self
            .history
            .ok_or_else(|| Error::InvalidConfig("severity requires a long history".to_string()))?;
        let short_history = self
            .short_history
            .ok_or_else(|| Error::InvalidConfig("severity requires a short history".to_string()))?;

        let statistics = Statistics::register(&history)?;

        Ok(Severity {
            inner: Arc::new(SeverityInner {
                history,
                short_history,
                requests: self.requests.unwrap_or_default(),
                short_requests: self.short_requests.unwrap_or_default(),
                options: self.options,
                clock: self.clock.unwrap_or_else(clock::system),
                statistics,
                state: Mutex::new(SeverityState::default()),
            }),
        })
    }
}

impl fmt::Debug for SeverityBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeverityBuilder")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::history::HistoryOptions;
    use healthwatch_types::{
        DurationBucket, DurationHistogram, EventLoopDelay, EventLoopUtilization, MemoryUsage,
        RequestCounts, RequestData,
    };

    const START: u64 = 1_700_000_000_000;

    struct Fixture {
        clock: ManualClock,
        history: History,
        short_history: History,
        requests: RequestMetric,
        short_requests: RequestMetric,
        severity: Severity,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_options(SeverityOptions::default())
        }

        fn with_options(options: SeverityOptions) -> Self {
            let clock = ManualClock::new(START);
            let shared: Arc<dyn Clock> = Arc::new(clock.clone());
            let history = History::with_clock(HistoryOptions::default(), shared.clone());
            let short_history =
                History::with_clock(HistoryOptions::with_limit(100), shared.clone());
            let requests = RequestMetric::new();
            let short_requests = RequestMetric::new();

            let severity = Severity::builder()
                .history(history.clone())
                .short_history(short_history.clone())
                .requests(requests.clone())
                .short_requests(short_requests.clone())
                .options(options)
                .clock(shared)
                .build()
                .unwrap();

            Self {
                clock,
                history,
                short_history,
                requests,
                short_requests,
                severity,
            }
        }

        /// Enough history on both sides to silence the insufficient-data factor.
        fn warmed_up(self, long: impl Fn(usize) -> Metrics) -> Self {
            for _ in 0..100 {
                self.short_history.append(Metrics::new());
            }
            for i in 0..100 {
                self.history.append(long(i));
            }
            self
        }

        fn start_short_requests(&self, count: usize) {
            for _ in 0..count {
                let id = self.short_requests.request_started();
                self.short_requests.response_finished(id, 200);
            }
        }
    }

    fn utilization(value: f64) -> Metrics {
        Metrics::builder()
            .event_loop_utilization(EventLoopUtilization {
                idle: 1.0 - value,
                active: value,
                utilization: value,
            })
            .build()
    }

    fn memory(percent: f64) -> Metrics {
        Metrics::builder()
            .memory_usage(MemoryUsage {
                percent,
                ..MemoryUsage::default()
            })
            .build()
    }

    fn delay(p80: f64) -> EventLoopDelay {
        EventLoopDelay {
            percentile80: p80,
            ..EventLoopDelay::default()
        }
    }

    fn tick_metrics(p80: f64, active: u64, bucket: DurationBucket) -> Metrics {
        let mut duration = DurationHistogram::new();
        duration.add(bucket, 5);

        let mut metrics = utilization(0.8);
        metrics.event_loop_delay = Some(delay(p80));
        metrics.request = Some(RequestData {
            count: RequestCounts {
                total: 5,
                active,
                ..RequestCounts::default()
            },
            duration,
            error_rate: 0.0,
        });
        metrics
    }

    fn reasons(calculation: &SeverityCalculation) -> Vec<ThreatReason> {
        calculation.records.iter().map(|record| record.reason).collect()
    }

    #[test]
    fn levels_follow_score_bands() {
        assert_eq!(SeverityLevel::from_score(0.0), SeverityLevel::Normal);
        assert_eq!(SeverityLevel::from_score(29.9), SeverityLevel::Normal);
        assert_eq!(SeverityLevel::from_score(30.0), SeverityLevel::Low);
        assert_eq!(SeverityLevel::from_score(50.0), SeverityLevel::Medium);
        assert_eq!(SeverityLevel::from_score(65.0), SeverityLevel::High);
        assert_eq!(SeverityLevel::from_score(80.0), SeverityLevel::Critical);
        assert_eq!(SeverityLevel::from_score(100.0), SeverityLevel::Critical);
    }

    #[test]
    fn level_ordering() {
        assert!(SeverityLevel::Fatal.is_at_least(SeverityLevel::Critical));
        assert!(SeverityLevel::High.is_at_least(SeverityLevel::High));
        assert!(!SeverityLevel::Low.is_at_least(SeverityLevel::Medium));
        assert_eq!(SeverityLevel::Critical.to_string(), "critical");
        assert_eq!(
            serde_json::to_string(&ThreatReason::DistributedDenialOfServiceDetected).unwrap(),
            "\"distributedDenialOfServiceDetected\""
        );
    }

    #[test]
    fn fresh_history_is_low() {
        let fixture = Fixture::new();

        let threats = fixture.severity.threats();

        assert_eq!(threats.score, 30.0);
        assert_eq!(threats.level, SeverityLevel::Low);
        assert_eq!(reasons(&threats), vec![ThreatReason::InsufficientMetricsHistory]);
    }

    #[test]
    fn very_high_utilization() {
        let fixture = Fixture::new().warmed_up(|_| utilization(0.8));

        let threats = fixture.severity.threats();

        assert_eq!(threats.score, 65.0);
        assert_eq!(threats.level, SeverityLevel::High);
        assert_eq!(reasons(&threats), vec![ThreatReason::VeryHighUtilization]);
    }

    #[test]
    fn utilization_spike_scales_with_ratio() {
        let fixture = Fixture::new().warmed_up(|i| utilization(if i < 95 { 0.0 } else { 1.0 }));

        let threats = fixture.severity.threats();

        assert_eq!(reasons(&threats), vec![ThreatReason::UtilizationSpike]);
        assert!((threats.score - 35.0).abs() < 1e-9);
        assert_eq!(threats.level, SeverityLevel::Low);
    }

    #[test]
    fn event_loop_delay_spike() {
        let fixture = Fixture::new().warmed_up(|i| {
            Metrics::builder()
                .event_loop_delay(delay(if i == 99 { 50.0 } else { 1.0 }))
                .build()
        });

        let threats = fixture.severity.threats();

        assert_eq!(reasons(&threats), vec![ThreatReason::EventLoopDelaySpike]);
        assert_eq!(threats.score, 15.0);
        assert_eq!(threats.level, SeverityLevel::Normal);
    }

    #[test]
    fn memory_usage_only_when_enabled() {
        let disabled = Fixture::new().warmed_up(|_| memory(85.0));
        assert!(disabled.severity.threats().records.is_empty());

        let options = SeverityOptions {
            experimental: ExperimentalOptions {
                evaluate_memory_usage: true,
            },
            ..SeverityOptions::default()
        };
        let enabled = Fixture::with_options(options).warmed_up(|_| memory(85.0));
        let threats = enabled.severity.threats();

        assert_eq!(reasons(&threats), vec![ThreatReason::HighMemoryUsage]);
        assert_eq!(threats.level, SeverityLevel::Medium);
    }

    #[test]
    fn memory_drop_after_collection_is_ignored() {
        let options = SeverityOptions {
            experimental: ExperimentalOptions {
                evaluate_memory_usage: true,
            },
            ..SeverityOptions::default()
        };
        let fixture =
            Fixture::with_options(options).warmed_up(|i| memory(if i == 99 { 50.0 } else { 95.0 }));

        let threats = fixture.severity.threats();

        assert_eq!(threats.score, 0.0);
        assert_eq!(threats.level, SeverityLevel::Normal);
    }

    #[test]
    fn denial_of_service() {
        let fixture = Fixture::new().warmed_up(|_| Metrics::new());
        fixture.start_short_requests(15);

        let threats = fixture.severity.threats();

        assert_eq!(threats.score, 75.0);
        assert_eq!(threats.level, SeverityLevel::High);
        assert_eq!(reasons(&threats), vec![ThreatReason::DenialOfServiceDetected]);
    }

    #[test]
    fn distributed_denial_of_service() {
        let fixture = Fixture::new().warmed_up(|_| Metrics::new());
        fixture.start_short_requests(25);

        let threats = fixture.severity.threats();

        assert_eq!(threats.score, 100.0);
        assert_eq!(threats.level, SeverityLevel::Critical);
        assert!(threats.has(ThreatReason::DenialOfServiceDetected));
        assert!(threats.has(ThreatReason::DistributedDenialOfServiceDetected));
    }

    #[test]
    fn deadlock_from_long_active_requests() {
        let fixture = Fixture::new().warmed_up(|_| Metrics::new());
        for _ in 0..11 {
            let _ = fixture.requests.request_started();
        }

        let threats = fixture.severity.threats();

        assert_eq!(threats.score, 75.0);
        assert_eq!(reasons(&threats), vec![ThreatReason::DeadlockDetected]);
    }

    #[test]
    fn amendments_skip_when_already_tripped() {
        let fixture = Fixture::new().warmed_up(|_| utilization(0.95));
        fixture.start_short_requests(25);

        let threats = fixture.severity.threats();

        assert_eq!(threats.score, 80.0);
        assert_eq!(reasons(&threats), vec![ThreatReason::CriticalUtilization]);
    }

    #[test]
    fn returned_calculation_is_not_amended_later() {
        let fixture = Fixture::new();
        let before = fixture.severity.threats();

        fixture.start_short_requests(15);
        let after = fixture.severity.threats();

        assert_eq!(before.score, 30.0);
        assert_eq!(before.records.len(), 1);
        assert_eq!(after.score, 100.0);
        assert_eq!(
            reasons(&after),
            vec![
                ThreatReason::InsufficientMetricsHistory,
                ThreatReason::DenialOfServiceDetected
            ]
        );
    }

    #[test]
    fn score_decays_at_most_five_per_tick() {
        let fixture = Fixture::new().warmed_up(|_| utilization(0.95));
        assert_eq!(fixture.severity.recalculate().score, 80.0);

        for _ in 0..15 {
            fixture.history.append(utilization(0.2));
        }

        let first = fixture.severity.recalculate();
        assert_eq!(first.score, 75.0);
        assert_eq!(first.level, SeverityLevel::High);
        assert_eq!(
            reasons(&first),
            vec![ThreatReason::CriticalUtilization, ThreatReason::DecreasingSeverity]
        );
        assert_eq!(fixture.severity.critical_since(), None);

        let second = fixture.severity.recalculate();
        assert_eq!(second.score, 70.0);
        assert_eq!(second.records.len(), 3);
    }

    #[test]
    fn carried_records_are_trimmed() {
        let options = SeverityOptions {
            experimental: ExperimentalOptions {
                evaluate_memory_usage: true,
            },
            ..SeverityOptions::default()
        };
        let fixture = Fixture::with_options(options).warmed_up(|i| {
            let mut metrics = utilization(0.95);
            metrics.memory_usage = memory(95.0).memory_usage;
            metrics.event_loop_delay = Some(delay(if i == 99 { 50.0 } else { 1.0 }));
            metrics
        });

        let peak = fixture.severity.recalculate();
        assert_eq!(peak.score, 100.0);
        assert_eq!(peak.records.len(), 3);

        for _ in 0..15 {
            fixture.history.append(utilization(0.2));
        }

        let mut last = fixture.severity.recalculate();
        for _ in 0..18 {
            last = fixture.severity.recalculate();
        }

        assert_eq!(last.score, 5.0);
        assert_eq!(last.records.len(), MAX_RECORDS);
        assert_eq!(
            last.records.last().map(|record| record.reason),
            Some(ThreatReason::DecreasingSeverity)
        );
        assert_eq!(last.records[0].reason, ThreatReason::CriticalMemoryUsage);
        assert!(!last.has(ThreatReason::CriticalUtilization));
    }

    #[test]
    fn stale_history_is_fatal() {
        let fixture = Fixture::new().warmed_up(|_| Metrics::new());
        let latest = fixture.history.latest().unwrap().timestamp_ms;

        fixture.clock.set(latest + 3_999);
        assert_eq!(fixture.severity.threats().level, SeverityLevel::Normal);

        fixture.clock.set(latest + 4_000);
        let threats = fixture.severity.threats();
        assert_eq!(threats.level, SeverityLevel::Fatal);
        assert_eq!(threats.score, 0.0);
    }

    #[test]
    fn empty_history_is_not_stale() {
        let fixture = Fixture::new();
        fixture.clock.advance(60_000);

        assert_eq!(fixture.severity.threats().level, SeverityLevel::Low);
    }

    #[test]
    fn sustained_critical_with_rising_trends_is_fatal() {
        let fixture = Fixture::new();
        for _ in 0..100 {
            fixture.short_history.append(Metrics::new());
        }
        for _ in 0..20 {
            fixture.clock.advance(1_000);
            let mut metrics = utilization(0.8);
            metrics.event_loop_delay = Some(delay(1.0));
            fixture.history.append(metrics);
        }

        let actives = [0, 1, 2, 3, 4, 6];
        for (tick, active) in actives.into_iter().enumerate() {
            fixture.clock.advance(1_000);
            let bucket = if tick < 5 { DurationBucket::Le10 } else { DurationBucket::Le25 };
            fixture.history.append(tick_metrics(100.0, active, bucket));
            let calculation = fixture.severity.recalculate();
            assert_eq!(calculation.level, SeverityLevel::Critical, "tick {tick}");

            if tick == 4 {
                assert_eq!(fixture.severity.threats().level, SeverityLevel::Critical);
            }
        }

        let critical_since = fixture.severity.critical_since().unwrap();
        assert_eq!(fixture.clock.now_ms() - critical_since, 5_000);
        assert_eq!(fixture.severity.threats().level, SeverityLevel::Fatal);

        // Dropping out of CRITICAL resets the streak.
        fixture.clock.advance(1_000);
        fixture.history.append(tick_metrics(1.0, 7, DurationBucket::Le50));
        let calmer = fixture.severity.recalculate();
        assert_eq!(calmer.score, 75.0);
        assert_eq!(calmer.level, SeverityLevel::High);
        assert_eq!(calmer.records.len(), 4);
        assert_eq!(fixture.severity.critical_since(), None);

        // Re-entering CRITICAL starts a new streak, so trends alone are not FATAL.
        fixture.clock.advance(1_000);
        fixture.history.append(tick_metrics(100.0, 8, DurationBucket::Le100));
        assert_eq!(fixture.severity.recalculate().level, SeverityLevel::Critical);
        assert_eq!(fixture.severity.threats().level, SeverityLevel::Critical);
    }

    #[test]
    fn flat_trends_do_not_escalate() {
        let fixture = Fixture::new();
        for _ in 0..100 {
            fixture.short_history.append(Metrics::new());
        }
        for _ in 0..20 {
            fixture.clock.advance(1_000);
            fixture.history.append(utilization(0.95));
        }

        for _ in 0..6 {
            fixture.clock.advance(1_000);
            let mut metrics = tick_metrics(1.0, 3, DurationBucket::Le10);
            metrics.event_loop_utilization = utilization(0.95).event_loop_utilization;
            fixture.history.append(metrics);
            fixture.severity.recalculate();
        }

        let critical_since = fixture.severity.critical_since().unwrap();
        assert_eq!(fixture.clock.now_ms() - critical_since, 5_000);
        assert_eq!(fixture.severity.threats().level, SeverityLevel::Critical);
    }

    #[test]
    fn trend_keeps_gaps_on_the_x_axis() {
        let fixture = Fixture::new();
        fixture.history.append(tick_metrics(1.0, 100, DurationBucket::Le10));
        for active in [Some(0), None, Some(5), Some(6), Some(7)] {
            let metrics = match active {
                Some(active) => tick_metrics(1.0, active, DurationBucket::Le10),
                None => utilization(0.8),
            };
            fixture.history.append(metrics);
        }

        let trend = fixture.severity.inner.trend(&MetricField::RequestActive);

        let spaced =
            stats::linear_regression_points([(1.0, 0.0), (3.0, 5.0), (4.0, 6.0), (5.0, 7.0)]);
        let packed = stats::linear_regression(&[0.0, 5.0, 6.0, 7.0]);
        assert_eq!(trend.len(), 4);
        assert_eq!(trend.slope, spaced.slope);
        assert_ne!(trend.slope, packed.slope);
    }

    #[test]
    fn statistics_are_registered_once_per_history() {
        let fixture = Fixture::new();

        let error = Severity::builder()
            .history(fixture.history.clone())
            .short_history(fixture.short_history.clone())
            .build()
            .unwrap_err();

        assert!(matches!(error, Error::DuplicateStatistic(_)));
    }

    #[test]
    fn histories_are_required() {
        let error = Severity::builder().build().unwrap_err();
        assert!(matches!(error, Error::InvalidConfig(_)));
    }

    #[test]
    fn severity_recalculates_on_each_observed_tick() {
        let fixture = Fixture::new().warmed_up(|_| utilization(0.8));

        Observer::next(&fixture.severity, &Metrics::new()).unwrap();

        let threats = fixture.severity.threats();
        assert_eq!(threats.level, SeverityLevel::High);
        assert_eq!(fixture.severity.current_score(), Some(65.0));
    }
}
