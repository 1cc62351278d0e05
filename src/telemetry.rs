//! Logging and metrics bootstrap for the worker binary.
//!
//! `RUST_LOG` wins over `telemetry.log_level` when both are set. Metric
//! descriptions are registered whether or not an exporter is compiled in,
//! so any recorder installed later by an embedding process sees them.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;
use crate::metrics;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Install the tracing subscriber, then the metrics exporter if configured.
pub fn init(config: &TelemetryConfig) -> Result<(), BoxError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    match config.prometheus_addr {
        #[cfg(feature = "prometheus")]
        Some(addr) => {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()?;
            tracing::info!(%addr, "serving prometheus metrics");
        }
        #[cfg(not(feature = "prometheus"))]
        Some(addr) => {
            tracing::warn!(%addr, "prometheus_addr ignored: built without the prometheus feature");
        }
        None => {}
    }

    metrics::describe();
    Ok(())
}
