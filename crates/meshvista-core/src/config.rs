use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_API_BASE_URL: &str = "https://api-user.e2ro.com";
pub const DEFAULT_DEVICE_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_NETWORK_INTERVAL_SECS: u64 = 60;
/// Reservations and forwards change rarely; the routing collector runs hourly.
pub const ROUTING_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_ALERT_EVERY: u32 = 5;
pub const DEFAULT_WORKER_POOL_SIZE: usize = 8;
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Top-level config (meshvista.toml + MESHVISTA_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshvistaConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub dns: DnsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Upstream mesh API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Session cookie. When unset the token stored in the `config` table is used.
    pub session_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            session_token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Collector cadence and failure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_device_interval")]
    pub device_interval_secs: u64,
    /// Shared by the network and speedtest collectors.
    #[serde(default = "default_network_interval")]
    pub network_interval_secs: u64,
    /// Hard deadline for a single collector run.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cadence of repeated alerts once a collector is past twice the threshold.
    #[serde(default = "default_alert_every")]
    pub alert_every: u32,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            device_interval_secs: DEFAULT_DEVICE_INTERVAL_SECS,
            network_interval_secs: DEFAULT_NETWORK_INTERVAL_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            alert_every: DEFAULT_ALERT_EVERY,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
        }
    }
}

/// Raw time-series retention and the daily cleanup time (UTC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub days: u32,
    #[serde(default = "default_cleanup_hour")]
    pub cleanup_hour: u8,
    #[serde(default)]
    pub cleanup_minute: u8,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: DEFAULT_RETENTION_DAYS,
            cleanup_hour: default_cleanup_hour(),
            cleanup_minute: 0,
        }
    }
}

/// dnsmasq-style hosts file regenerated after each device collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_hosts_path")]
    pub hosts_path: String,
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hosts_path: default_hosts_path(),
            domain: default_domain(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_device_interval() -> u64 {
    DEFAULT_DEVICE_INTERVAL_SECS
}
fn default_network_interval() -> u64 {
    DEFAULT_NETWORK_INTERVAL_SECS
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}
fn default_alert_every() -> u32 {
    DEFAULT_ALERT_EVERY
}
fn default_worker_pool_size() -> usize {
    DEFAULT_WORKER_POOL_SIZE
}
fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}
fn default_cleanup_hour() -> u8 {
    3
}
fn default_hosts_path() -> String {
    "/etc/dnsmasq.d/meshvista.hosts".to_string()
}
fn default_domain() -> String {
    "mesh.local".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.meshvista/meshvista.db", home)
}

impl MeshvistaConfig {
    /// Load config from a TOML file with MESHVISTA_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `MESHVISTA_COLLECTION__DEVICE_INTERVAL_SECS=15`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: MeshvistaConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MESHVISTA_").split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        let c = &self.collection;
        if c.device_interval_secs == 0 || c.network_interval_secs == 0 {
            return Err(CoreError::Config(
                "collection intervals must be at least 1 second".to_string(),
            ));
        }
        if c.timeout_secs == 0 {
            return Err(CoreError::Config(
                "collection.timeout_secs must be at least 1".to_string(),
            ));
        }
        if c.failure_threshold == 0 || c.alert_every == 0 {
            return Err(CoreError::Config(
                "failure_threshold and alert_every must be positive".to_string(),
            ));
        }
        if self.retention.cleanup_hour > 23 || self.retention.cleanup_minute > 59 {
            return Err(CoreError::Config(format!(
                "invalid cleanup time {:02}:{:02}",
                self.retention.cleanup_hour, self.retention.cleanup_minute
            )));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.meshvista/meshvista.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_reference_cadence() {
        let config = MeshvistaConfig::default();
        assert_eq!(config.collection.device_interval_secs, 30);
        assert_eq!(config.collection.network_interval_secs, 60);
        assert_eq!(config.collection.timeout_secs, 60);
        assert_eq!(config.collection.failure_threshold, 3);
        assert_eq!(config.retention.days, 30);
        assert!(!config.dns.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_and_env_are_merged() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "meshvista.toml",
                r#"
                [collection]
                device_interval_secs = 15

                [retention]
                days = 7
                "#,
            )?;
            jail.set_env("MESHVISTA_COLLECTION__TIMEOUT_SECS", "20");

            let config = MeshvistaConfig::load(Some("meshvista.toml")).expect("load");
            assert_eq!(config.collection.device_interval_secs, 15);
            assert_eq!(config.collection.network_interval_secs, 60);
            assert_eq!(config.collection.timeout_secs, 20);
            assert_eq!(config.retention.days, 7);
            Ok(())
        });
    }

    #[test]
    fn zero_interval_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "meshvista.toml",
                "[collection]\nnetwork_interval_secs = 0\n",
            )?;
            let err = MeshvistaConfig::load(Some("meshvista.toml")).unwrap_err();
            assert!(err.to_string().contains("intervals"));
            Ok(())
        });
    }

    #[test]
    fn bad_cleanup_time_is_rejected() {
        let mut config = MeshvistaConfig::default();
        config.retention.cleanup_hour = 24;
        assert!(config.validate().is_err());
    }
}
