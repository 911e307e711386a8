//! Example: Watching a service under simulated load
//!
//! This example wires a `Monitoring` engine with a synthetic utilization
//! collector, ramps the load up, fires a burst of requests, and prints the
//! verdict every second.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=healthwatch_sdk=debug cargo run --example simulated_load
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use healthwatch_sdk::{
    EventLoopUtilization, Metric, Metrics, Monitoring, MonitoringConfig, MonitorOptions,
};
use tracing_subscriber::EnvFilter;

/// Utilization collector driven by the simulation.
#[derive(Clone, Default)]
struct SyntheticLoad(Arc<AtomicU64>);

impl SyntheticLoad {
    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Metric for SyntheticLoad {
    fn measure(&self, _: &MonitorOptions) -> Metrics {
        let utilization = f64::from_bits(self.0.load(Ordering::Relaxed));
        Metrics::builder()
            .event_loop_utilization(EventLoopUtilization {
                idle: 1.0 - utilization,
                active: utilization,
                utilization,
            })
            .build()
    }
}

#[tokio::main]
async fn main() -> healthwatch_sdk::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let monitoring = Monitoring::new(MonitoringConfig::default())?;
    let load = SyntheticLoad::default();
    monitoring.add_metric(load.clone());
    monitoring.start()?;

    println!("Simulated load example");
    println!("Ramping utilization, then sending a request burst...\n");

    for second in 0..20u32 {
        let utilization = (f64::from(second) * 0.05).min(0.95);
        load.set(utilization);

        if second == 15 {
            for _ in 0..25 {
                monitoring.track_request().finish(200);
            }
        }

        tokio::time::sleep(Duration::from_secs(1)).await;

        let threats = monitoring.threats();
        let reasons: Vec<_> = threats.records.iter().map(|r| r.reason.as_str()).collect();
        println!(
            "t={:>2}s utilization={:.2} severity={:<8} score={:>5.1} reasons={:?}",
            second + 1,
            utilization,
            threats.level,
            threats.score,
            reasons
        );
    }

    monitoring.stop();
    Ok(())
}
