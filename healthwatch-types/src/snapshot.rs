//! Snapshot - one timestamped sampling tick.

use crate::{MetricField, Metrics, SchemaVersion};

/// An immutable, timestamped record of one monitor tick.
///
/// The monitor produces a merged [`Metrics`] fragment every interval; the
/// history stamps it with its creation time and stores it as a snapshot.
///
/// # Example
///
/// ```rust
/// use healthwatch_types::{MetricField, Metrics, Snapshot};
///
/// let snapshot = Snapshot::new(1703160000000, Metrics::builder().custom("jobs", 3.0).build());
///
/// assert_eq!(snapshot.value(&MetricField::Custom("jobs".into())), Some(3.0));
/// assert_eq!(snapshot.value(&MetricField::CpuPercent), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Snapshot {
    /// Schema version for forward compatibility.
    #[cfg_attr(feature = "serde", serde(default))]
    pub version: SchemaVersion,

    /// Unix timestamp in milliseconds when this snapshot was taken.
    pub timestamp_ms: u64,

    /// The merged metric fragment for this tick.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub metrics: Metrics,
}

impl Snapshot {
    /// Create a snapshot with a specific timestamp.
    pub fn new(timestamp_ms: u64, metrics: Metrics) -> Self {
        Self {
            version: SchemaVersion::current(),
            timestamp_ms,
            metrics,
        }
    }

    /// Create a snapshot stamped with the current wall-clock time.
    #[cfg(feature = "std")]
    pub fn now(metrics: Metrics) -> Self {
        Self::new(current_timestamp_ms(), metrics)
    }

    /// Read one numeric field.
    pub fn value(&self, field: &MetricField) -> Option<f64> {
        field.read(&self.metrics)
    }

    /// Milliseconds elapsed between this snapshot and `now_ms`.
    ///
    /// Saturates at zero when the snapshot is newer than `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
#[cfg(feature = "std")]
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
