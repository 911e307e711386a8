//! The collaborator contract driven by a [`Monitor`](crate::Monitor).

use std::time::Duration;

use healthwatch_types::Metrics;
use serde::Deserialize;

use crate::error::Result;

/// Options handed to every collaborator callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorOptions {
    /// Tick period in milliseconds.
    pub interval_ms: u64,
}

impl MonitorOptions {
    pub const DEFAULT_INTERVAL_MS: u64 = 1000;

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            interval_ms: Self::DEFAULT_INTERVAL_MS,
        }
    }
}

/// A source of one metric fragment per tick.
///
/// Every phase is optional. A tick runs `before_measure` on every metric,
/// then `measure` on every metric (fragments are merged in registration
/// order, later metrics winning), publishes the merged fragment, and finally
/// runs `after_measure` on every metric.
///
/// ```rust
/// use healthwatch_sdk::{Metric, Metrics, MonitorOptions};
///
/// struct QueueDepth;
///
/// impl Metric for QueueDepth {
///     fn measure(&self, _: &MonitorOptions) -> Metrics {
///         Metrics::builder().custom("queueDepth", 3.0).build()
///     }
/// }
/// ```
pub trait Metric: Send + Sync {
    /// Called once when the monitor starts. An error is logged and the metric
    /// keeps taking part in ticks, typically reporting empty fragments.
    fn start(&self, _options: &MonitorOptions) -> Result<()> {
        Ok(())
    }

    fn before_measure(&self, _options: &MonitorOptions) {}

    fn measure(&self, _options: &MonitorOptions) -> Metrics {
        Metrics::new()
    }

    fn after_measure(&self, _options: &MonitorOptions) {}

    fn stop(&self, _options: &MonitorOptions) {}
}
