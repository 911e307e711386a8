//! Layered configuration for a [`Monitoring`](crate::Monitoring) engine.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::history::HistoryOptions;
use crate::metric::MonitorOptions;
use crate::severity::SeverityOptions;

/// Interval of the short monitor, which samples request bursts.
pub const SHORT_INTERVAL_MS: u64 = 10;

/// Snapshots kept by the short history.
pub const SHORT_HISTORY_LIMIT: usize = 100;

/// Settings for both monitor/history pairs and the severity scorer.
///
/// Every section is optional; missing values fall back to the defaults.
///
/// ```toml
/// [monitor]
/// interval_ms = 1000
///
/// [short_history]
/// limit = 100
///
/// [severity.threshold]
/// denial_of_service = 50
///
/// [severity.experimental]
/// evaluate_memory_usage = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub monitor: MonitorOptions,
    pub history: HistoryOptions,
    pub short_monitor: MonitorOptions,
    pub short_history: HistoryOptions,
    pub severity: SeverityOptions,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorOptions::default(),
            history: HistoryOptions::default(),
            short_monitor: MonitorOptions::with_interval(Duration::from_millis(SHORT_INTERVAL_MS)),
            short_history: HistoryOptions::with_limit(SHORT_HISTORY_LIMIT),
            severity: SeverityOptions::default(),
        }
    }
}

impl MonitoringConfig {
    /// Load from a file, overridden by `HEALTHWATCH__<SECTION>__<KEY>`
    /// environment variables, e.g. `HEALTHWATCH__MONITOR__INTERVAL_MS=500`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("HEALTHWATCH")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let monitors = [
            ("monitor", &self.monitor),
            ("short_monitor", &self.short_monitor),
        ];
        for (section, options) in monitors {
            if options.interval_ms == 0 {
                return Err(Error::InvalidConfig(format!(
                    "{section}.interval_ms must be greater than zero"
                )));
            }
        }

        let histories = [
            ("history", &self.history),
            ("short_history", &self.short_history),
        ];
        for (section, options) in histories {
            if options.limit == 0 {
                return Err(Error::InvalidConfig(format!(
                    "{section}.limit must be greater than zero"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults() {
        let config = MonitoringConfig::default();

        assert_eq!(config.monitor.interval_ms, 1000);
        assert_eq!(config.history.limit, 60);
        assert_eq!(config.short_monitor.interval_ms, 10);
        assert_eq!(config.short_history.limit, 100);
        assert_eq!(config.severity.threshold.denial_of_service, 10);
        assert_eq!(config.severity.threshold.distributed_denial_of_service, 20);
        assert_eq!(config.severity.threshold.deadlock, 10);
        assert_eq!(config.severity.threshold.old_data_to_fatal_time_ms, 4000);
        assert!(!config.severity.experimental.evaluate_memory_usage);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_config(
            r#"
[monitor]
interval_ms = 500

[severity.threshold]
deadlock = 3

[severity.experimental]
evaluate_memory_usage = true
"#,
        );

        let config = MonitoringConfig::load(file.path()).unwrap();

        assert_eq!(config.monitor.interval_ms, 500);
        assert_eq!(config.short_monitor.interval_ms, 10);
        assert_eq!(config.history.limit, 60);
        assert_eq!(config.severity.threshold.deadlock, 3);
        assert_eq!(config.severity.threshold.denial_of_service, 10);
        assert!(config.severity.experimental.evaluate_memory_usage);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let file = write_config("[short_monitor]\ninterval_ms = 0\n");

        let error = MonitoringConfig::load(file.path()).unwrap_err();

        assert!(
            matches!(error, Error::InvalidConfig(message) if message.contains("short_monitor"))
        );
    }

    #[test]
    fn zero_limit_is_rejected() {
        let config = MonitoringConfig {
            history: HistoryOptions::with_limit(0),
            ..MonitoringConfig::default()
        };

        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();

        let error = MonitoringConfig::load(dir.path().join("absent.toml")).unwrap_err();

        assert!(matches!(error, Error::Config(_)));
    }
}
