//! Metric fragments produced by collectors.
//!
//! Every collector contributes one group (CPU, memory, event loop, requests...)
//! to a [`Metrics`] fragment. The monitor merges the fragments of all its
//! collectors into one value per tick.

use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::DurationHistogram;

/// CPU time consumed by the process during the last interval.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CpuUsage {
    /// User CPU time in microseconds.
    pub user: u64,
    /// System CPU time in microseconds.
    pub system: u64,
    /// Share of the interval spent on CPU, in percent.
    pub percent: f64,
}

/// Memory footprint of the process. Sizes are in megabytes.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct MemoryUsage {
    /// Resident set size relative to the heap limit, in percent.
    pub percent: f64,
    pub rss: f64,
    pub heap_total: f64,
    pub heap_used: f64,
    pub external: f64,
    pub array_buffers: f64,
}

/// Event-loop (scheduler) delay statistics, normalized by the sampling interval.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventLoopDelay {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    /// 80th percentile of the observed delay.
    pub percentile80: f64,
}

/// Share of wall time the event loop spent doing work.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventLoopUtilization {
    pub idle: f64,
    pub active: f64,
    /// `active / (idle + active)`, in `0.0..=1.0`.
    pub utilization: f64,
}

/// System load averages.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoadAverage {
    pub minute1: f64,
    pub minute5: f64,
    pub minute15: f64,
}

/// Identity of the monitored process.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessInfo {
    pub pid: u32,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub ppid: Option<u32>,
    pub platform: String,
    /// Seconds since the process started.
    pub uptime: f64,
    pub version: String,
}

/// Request counters for one measurement window.
///
/// `active` is a live gauge; every other counter covers only the window
/// since the previous measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct RequestCounts {
    pub total: u64,
    pub active: u64,
    pub zombie: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub connections: u64,
}

/// Inbound request activity for one measurement window.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct RequestData {
    pub count: RequestCounts,
    pub duration: DurationHistogram,
    /// Percentage of requests that ended with a 4xx or 5xx status.
    pub error_rate: f64,
}

/// One tick's worth of merged metric fragments.
///
/// Groups a collector did not report are `None`. Merging is shallow: a group
/// present in the later fragment replaces the whole group of the earlier one.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct Metrics {
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub cpu_usage: Option<CpuUsage>,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub memory_usage: Option<MemoryUsage>,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub event_loop_delay: Option<EventLoopDelay>,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub event_loop_utilization: Option<EventLoopUtilization>,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub load_average: Option<LoadAverage>,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub process: Option<ProcessInfo>,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub request: Option<RequestData>,

    /// Free-form numeric values from application-specific collectors.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "BTreeMap::is_empty"))]
    pub custom: BTreeMap<String, f64>,
}

impl Metrics {
    /// Create an empty fragment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for a fragment.
    pub fn builder() -> MetricsBuilder {
        MetricsBuilder::new()
    }

    /// Returns true if no group and no custom value is set.
    pub fn is_empty(&self) -> bool {
        self.cpu_usage.is_none()
            && self.memory_usage.is_none()
            && self.event_loop_delay.is_none()
            && self.event_loop_utilization.is_none()
            && self.load_average.is_none()
            && self.process.is_none()
            && self.request.is_none()
            && self.custom.is_empty()
    }

    /// Merge `other` into `self`; groups set in `other` win.
    pub fn merge(&mut self, other: Metrics) {
        if other.cpu_usage.is_some() {
            self.cpu_usage = other.cpu_usage;
        }
        if other.memory_usage.is_some() {
            self.memory_usage = other.memory_usage;
        }
        if other.event_loop_delay.is_some() {
            self.event_loop_delay = other.event_loop_delay;
        }
        if other.event_loop_utilization.is_some() {
            self.event_loop_utilization = other.event_loop_utilization;
        }
        if other.load_average.is_some() {
            self.load_average = other.load_average;
        }
        if other.process.is_some() {
            self.process = other.process;
        }
        if other.request.is_some() {
            self.request = other.request;
        }
        self.custom.extend(other.custom);
    }
}

/// Builder for constructing [`Metrics`] fragments.
#[derive(Debug, Default)]
pub struct MetricsBuilder {
    metrics: Metrics,
}

impl MetricsBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cpu_usage(mut self, cpu: CpuUsage) -> Self {
        self.metrics.cpu_usage = Some(cpu);
        self
    }

    pub fn memory_usage(mut self, memory: MemoryUsage) -> Self {
        self.metrics.memory_usage = Some(memory);
        self
    }

    pub fn event_loop_delay(mut self, delay: EventLoopDelay) -> Self {
        self.metrics.event_loop_delay = Some(delay);
        self
    }

    pub fn event_loop_utilization(mut self, utilization: EventLoopUtilization) -> Self {
        self.metrics.event_loop_utilization = Some(utilization);
        self
    }

    pub fn load_average(mut self, load: LoadAverage) -> Self {
        self.metrics.load_average = Some(load);
        self
    }

    pub fn process(mut self, process: ProcessInfo) -> Self {
        self.metrics.process = Some(process);
        self
    }

    pub fn request(mut self, request: RequestData) -> Self {
        self.metrics.request = Some(request);
        self
    }

    /// Add an application-specific value.
    pub fn custom(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.custom.insert(name.into(), value);
        self
    }

    /// Build the fragment.
    pub fn build(self) -> Metrics {
        self.metrics
    }
}
