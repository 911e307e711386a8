//! Typed accessors for numeric values inside a [`Metrics`] fragment.

use alloc::string::{String, ToString};
use core::fmt;
use core::str::FromStr;

use crate::Metrics;

/// A numeric field of a metrics fragment.
///
/// Fields parse from and display as dotted paths
/// (`"eventLoopUtilization.utilization"`, `"request.count.active"`,
/// `"custom.<name>"`), so configuration can name them while code reading
/// history stays typed. Unknown paths fail to parse instead of silently
/// producing empty series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricField {
    CpuUser,
    CpuSystem,
    CpuPercent,
    MemoryPercent,
    MemoryRss,
    MemoryHeapTotal,
    MemoryHeapUsed,
    MemoryExternal,
    MemoryArrayBuffers,
    EventLoopDelayMin,
    EventLoopDelayMax,
    EventLoopDelayMean,
    EventLoopDelayStddev,
    EventLoopDelayP80,
    EventLoopIdle,
    EventLoopActive,
    EventLoopUtilization,
    LoadAverage1,
    LoadAverage5,
    LoadAverage15,
    ProcessUptime,
    RequestTotal,
    RequestActive,
    RequestZombie,
    RequestClientErrors,
    RequestServerErrors,
    RequestConnections,
    RequestErrorRate,
    /// Weighted average of the request duration histogram.
    RequestDurationAverage,
    /// A value from [`Metrics::custom`].
    Custom(String),
}

const PATHS: [(&str, MetricField); 29] = [
    ("cpuUsage.user", MetricField::CpuUser),
    ("cpuUsage.system", MetricField::CpuSystem),
    ("cpuUsage.percent", MetricField::CpuPercent),
    ("memoryUsage.percent", MetricField::MemoryPercent),
    ("memoryUsage.rss", MetricField::MemoryRss),
    ("memoryUsage.heapTotal", MetricField::MemoryHeapTotal),
    ("memoryUsage.heapUsed", MetricField::MemoryHeapUsed),
    ("memoryUsage.external", MetricField::MemoryExternal),
    ("memoryUsage.arrayBuffers", MetricField::MemoryArrayBuffers),
    ("eventLoopDelay.min", MetricField::EventLoopDelayMin),
    ("eventLoopDelay.max", MetricField::EventLoopDelayMax),
    ("eventLoopDelay.mean", MetricField::EventLoopDelayMean),
    ("eventLoopDelay.stddev", MetricField::EventLoopDelayStddev),
    ("eventLoopDelay.percentile80", MetricField::EventLoopDelayP80),
    ("eventLoopUtilization.idle", MetricField::EventLoopIdle),
    ("eventLoopUtilization.active", MetricField::EventLoopActive),
    ("eventLoopUtilization.utilization", MetricField::EventLoopUtilization),
    ("loadAverage.minute1", MetricField::LoadAverage1),
    ("loadAverage.minute5", MetricField::LoadAverage5),
    ("loadAverage.minute15", MetricField::LoadAverage15),
    ("process.uptime", MetricField::ProcessUptime),
    ("request.count.total", MetricField::RequestTotal),
    ("request.count.active", MetricField::RequestActive),
    ("request.count.zombie", MetricField::RequestZombie),
    ("request.count.clientErrors", MetricField::RequestClientErrors),
    ("request.count.serverErrors", MetricField::RequestServerErrors),
    ("request.count.connections", MetricField::RequestConnections),
    ("request.errorRate", MetricField::RequestErrorRate),
    ("request.duration.average", MetricField::RequestDurationAverage),
];

const CUSTOM_PREFIX: &str = "custom.";

impl MetricField {
    /// Read this field from a fragment. `None` if the group is absent.
    pub fn read(&self, metrics: &Metrics) -> Option<f64> {
        use MetricField::*;

        match self {
            CpuUser => metrics.cpu_usage.as_ref().map(|c| c.user as f64),
            CpuSystem => metrics.cpu_usage.as_ref().map(|c| c.system as f64),
            CpuPercent => metrics.cpu_usage.as_ref().map(|c| c.percent),
            MemoryPercent => metrics.memory_usage.as_ref().map(|m| m.percent),
            MemoryRss => metrics.memory_usage.as_ref().map(|m| m.rss),
            MemoryHeapTotal => metrics.memory_usage.as_ref().map(|m| m.heap_total),
            MemoryHeapUsed => metrics.memory_usage.as_ref().map(|m| m.heap_used),
            MemoryExternal => metrics.memory_usage.as_ref().map(|m| m.external),
            MemoryArrayBuffers => metrics.memory_usage.as_ref().map(|m| m.array_buffers),
            EventLoopDelayMin => metrics.event_loop_delay.as_ref().map(|d| d.min),
            EventLoopDelayMax => metrics.event_loop_delay.as_ref().map(|d| d.max),
            EventLoopDelayMean => metrics.event_loop_delay.as_ref().map(|d| d.mean),
            EventLoopDelayStddev => metrics.event_loop_delay.as_ref().map(|d| d.stddev),
            EventLoopDelayP80 => metrics.event_loop_delay.as_ref().map(|d| d.percentile80),
            EventLoopIdle => metrics.event_loop_utilization.as_ref().map(|u| u.idle),
            EventLoopActive => metrics.event_loop_utilization.as_ref().map(|u| u.active),
            EventLoopUtilization => metrics
                .event_loop_utilization
                .as_ref()
                .map(|u| u.utilization),
            LoadAverage1 => metrics.load_average.as_ref().map(|l| l.minute1),
            LoadAverage5 => metrics.load_average.as_ref().map(|l| l.minute5),
            LoadAverage15 => metrics.load_average.as_ref().map(|l| l.minute15),
            ProcessUptime => metrics.process.as_ref().map(|p| p.uptime),
            RequestTotal => metrics.request.as_ref().map(|r| r.count.total as f64),
            RequestActive => metrics.request.as_ref().map(|r| r.count.active as f64),
            RequestZombie => metrics.request.as_ref().map(|r| r.count.zombie as f64),
            RequestClientErrors => metrics
                .request
                .as_ref()
                .map(|r| r.count.client_errors as f64),
            RequestServerErrors => metrics
                .request
                .as_ref()
                .map(|r| r.count.server_errors as f64),
            RequestConnections => metrics
                .request
                .as_ref()
                .map(|r| r.count.connections as f64),
            RequestErrorRate => metrics.request.as_ref().map(|r| r.error_rate),
            RequestDurationAverage => metrics
                .request
                .as_ref()
                .map(|r| r.duration.weighted_average()),
            Custom(name) => metrics.custom.get(name).copied(),
        }
    }

    /// The dotted path of this field.
    pub fn path(&self) -> String {
        match self {
            MetricField::Custom(name) => {
                let mut path = String::from(CUSTOM_PREFIX);
                path.push_str(name);
                path
            }
            field => PATHS
                .iter()
                .find(|(_, candidate)| candidate == field)
                .map(|(path, _)| (*path).to_string())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

impl FromStr for MetricField {
    type Err = ParseFieldError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        if let Some(name) = path.strip_prefix(CUSTOM_PREFIX) {
            if !name.is_empty() {
                return Ok(MetricField::Custom(name.to_string()));
            }
        }

        PATHS
            .iter()
            .find(|(candidate, _)| *candidate == path)
            .map(|(_, field)| field.clone())
            .ok_or_else(|| ParseFieldError {
                path: path.to_string(),
            })
    }
}

/// Error returned when a dotted path names no known metric field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFieldError {
    path: String,
}

impl ParseFieldError {
    /// The path that failed to parse.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for ParseFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown metric field \"{}\"", self.path)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseFieldError {}
