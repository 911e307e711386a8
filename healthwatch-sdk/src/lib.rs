//! # healthwatch-sdk
//!
//! Embedded health and threat monitoring for services.
//!
//! This crate samples a process periodically, keeps a bounded history of the
//! samples, derives memoized statistics from it, and fuses them with live
//! request counts into a severity verdict the host can use for load shedding
//! or alerting.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use healthwatch_sdk::{Monitoring, MonitoringConfig, SeverityLevel};
//!
//! #[tokio::main]
//! async fn main() -> healthwatch_sdk::Result<()> {
//!     // One long monitor (1s) and one short monitor (10ms) with their histories
//!     let monitoring = Monitoring::new(MonitoringConfig::default())?;
//!     monitoring.start()?;
//!
//!     // Track every inbound request
//!     let request = monitoring.track_request();
//!     request.finish(200);
//!
//!     // Ask for the current verdict whenever a decision is needed
//!     let threats = monitoring.threats();
//!     if threats.is_at_least(SeverityLevel::Critical) {
//!         println!("shedding load: {:?}", threats.records);
//!     }
//!
//!     monitoring.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Building blocks
//!
//! - [`Monitor`]: drives [`Metric`] collaborators on a fixed interval and
//!   publishes one merged [`Metrics`] fragment per tick
//! - [`History`]: bounded snapshot buffer with memoized custom statistics
//! - [`RequestMetric`]: request counters, duration histogram and zombie detection
//! - [`Severity`]: scores the history and request counters into a [`SeverityLevel`]
//! - [`stats`], [`pipeline`] and [`memo`]: the statistics toolkit used by the above
//!
//! ## Features
//!
//! - **Runtime-friendly**: ticks run on the caller's tokio runtime
//! - **Thread-safe**: every handle is cheap to clone and usable from any thread
//! - **Deterministic tests**: inject a [`ManualClock`] and use paused tokio time

mod clock;
mod config;
mod error;
mod history;
mod metric;
mod monitor;
mod monitoring;
mod observer;
mod request;
mod severity;

pub mod memo;
pub mod pipeline;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MonitoringConfig, SHORT_HISTORY_LIMIT, SHORT_INTERVAL_MS};
pub use error::{Error, ObserverError, Result};
pub use history::{History, HistoryOptions, StatisticKey, Window};
pub use memo::{memo, MemoKey, Memoized};
pub use metric::{Metric, MonitorOptions};
pub use monitor::{MetricRegistration, Monitor, MonitorBuilder};
pub use monitoring::Monitoring;
pub use observer::{from_fn, Observer, Subject, Subscription};
pub use request::{RequestId, RequestMetric, TrackedRequest, ZOMBIE_TIMEOUT};
pub use severity::{
    ExperimentalOptions, Severity, SeverityBuilder, SeverityCalculation, SeverityLevel,
    SeverityOptions, SeverityRecord, SeverityThresholds, ThreatReason, CRITICAL_TO_FATAL_TIME_MS,
    HARD_TRIP_SCORE,
};

// Re-export types for convenience
pub use healthwatch_types::{
    DurationBucket, DurationHistogram, EventLoopDelay, EventLoopUtilization, MemoryUsage,
    MetricField, Metrics, MetricsBuilder, RequestCounts, RequestData, Snapshot,
};
