//! Configuration types for zone-manager.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::Error;
use crate::transaction::TransactionConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker identity and task selection.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Transaction and retry settings.
    #[serde(default)]
    pub storage: TransactionConfig,

    /// Per-task settings.
    #[serde(default)]
    pub tasks: TasksConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.service.worker_id.trim().is_empty() {
            return Err(Error::Config("service.worker_id must not be empty".into()));
        }
        if !self.service.members.is_empty()
            && !self.service.members.contains(&self.service.worker_id)
        {
            return Err(Error::Config(format!(
                "service.members does not include worker {}",
                self.service.worker_id
            )));
        }

        let tasks = &self.tasks;
        for (name, interval, batch_size) in [
            ("zone_purge", tasks.zone_purge.interval, tasks.zone_purge.batch_size),
            (
                "delayed_notify",
                tasks.delayed_notify.interval,
                tasks.delayed_notify.batch_size,
            ),
            (
                "flatten_alias",
                tasks.flatten_alias.interval,
                tasks.flatten_alias.batch_size,
            ),
        ] {
            if interval == 0 {
                return Err(Error::Config(format!("tasks.{name}.interval must be > 0")));
            }
            if batch_size == 0 {
                return Err(Error::Config(format!("tasks.{name}.batch_size must be > 0")));
            }
        }

        Ok(())
    }
}

/// Worker identity and task selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// This worker's identity in the membership view.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Tasks to run. Empty or absent runs every task.
    #[serde(default)]
    pub enabled_tasks: Option<Vec<String>>,

    /// Static membership view. Empty means this worker alone.
    #[serde(default)]
    pub members: Vec<String>,

    /// Render zone exports in-process. When false every export fails.
    #[serde(default = "default_true")]
    pub export_synchronous: bool,

    /// Largest zone, in recordsets, exported synchronously.
    #[serde(default = "default_export_size_limit")]
    pub export_size_limit: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            enabled_tasks: None,
            members: Vec::new(),
            export_synchronous: true,
            export_size_limit: default_export_size_limit(),
        }
    }
}

impl ServiceConfig {
    /// Membership view to start from.
    pub fn initial_members(&self) -> Vec<String> {
        if self.members.is_empty() {
            vec![self.worker_id.clone()]
        } else {
            self.members.clone()
        }
    }
}

fn default_worker_id() -> String {
    "zone-manager-0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_export_size_limit() -> usize {
    1000
}

/// Per-task settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Purge of soft-deleted zones.
    #[serde(default)]
    pub zone_purge: ZonePurgeConfig,

    /// Coalesced zone propagation.
    #[serde(default)]
    pub delayed_notify: DelayedNotifyConfig,

    /// ALIAS flattening sweep.
    #[serde(default)]
    pub flatten_alias: FlattenAliasConfig,
}

/// Delayed notify task settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedNotifyConfig {
    /// Seconds between ticks.
    #[serde(default = "default_notify_interval")]
    pub interval: u64,

    /// Maximum zones propagated per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for DelayedNotifyConfig {
    fn default() -> Self {
        Self {
            interval: default_notify_interval(),
            batch_size: default_batch_size(),
        }
    }
}

/// ALIAS flattening task settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenAliasConfig {
    /// Seconds between ticks.
    #[serde(default = "default_flatten_interval")]
    pub interval: u64,

    /// Maximum ALIAS recordsets flattened per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for FlattenAliasConfig {
    fn default() -> Self {
        Self {
            interval: default_flatten_interval(),
            batch_size: default_batch_size(),
        }
    }
}

/// Purge task settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZonePurgeConfig {
    /// Seconds between ticks.
    #[serde(default = "default_purge_interval")]
    pub interval: u64,

    /// Maximum zones purged per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds a zone stays soft-deleted before it may be purged.
    #[serde(default = "default_time_threshold")]
    pub time_threshold: u64,
}

impl Default for ZonePurgeConfig {
    fn default() -> Self {
        Self {
            interval: default_purge_interval(),
            batch_size: default_batch_size(),
            time_threshold: default_time_threshold(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_purge_interval() -> u64 {
    3600
}

fn default_notify_interval() -> u64 {
    5
}

fn default_flatten_interval() -> u64 {
    600
}

fn default_time_threshold() -> u64 {
    604800
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "zone_manager=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = load("");
        assert_eq!(config.service.worker_id, "zone-manager-0");
        assert_eq!(config.storage.retries, 50);
        assert_eq!(config.storage.delay_ms, 150);
        assert_eq!(config.tasks.zone_purge.interval, 3600);
        assert_eq!(config.tasks.zone_purge.time_threshold, 604800);
        assert_eq!(config.tasks.delayed_notify.interval, 5);
        assert_eq!(config.tasks.flatten_alias.interval, 600);
        assert_eq!(config.tasks.flatten_alias.batch_size, 100);
        assert_eq!(config.telemetry.log_level, "info");
        assert!(config.service.export_synchronous);
        assert_eq!(config.service.export_size_limit, 1000);
        config.validate().unwrap();
    }

    #[test]
    fn test_overrides() {
        let config = load(
            r#"
            [service]
            worker_id = "w2"
            enabled_tasks = ["zone_purge"]
            members = ["w1", "w2"]
            export_synchronous = false

            [storage]
            retries = 5
            enable_retries = false

            [tasks.delayed_notify]
            interval = 1
            batch_size = 5
            "#,
        );
        assert_eq!(config.service.initial_members(), vec!["w1", "w2"]);
        assert!(!config.service.export_synchronous);
        assert_eq!(
            config.service.enabled_tasks.as_deref(),
            Some(&["zone_purge".to_string()][..])
        );
        assert_eq!(config.storage.retries, 5);
        assert!(!config.storage.enable_retries);
        assert!(config.storage.enable_transaction);
        assert_eq!(config.tasks.delayed_notify.batch_size, 5);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_foreign_member_list() {
        let mut config = Config::default();
        config.service.members = vec!["w1".into(), "w2".into()];
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = Config::default();
        config.tasks.zone_purge.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_lone_worker_is_its_own_membership() {
        let config = Config::default();
        assert_eq!(config.service.initial_members(), vec!["zone-manager-0"]);
    }
}
