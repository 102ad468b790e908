//! Configuration surface.
//!
//! Mirrors the platform's usual split: named constants for environment
//! variables, one accessor function per setting with a typed default, and a
//! `serde`-deserializable struct for the blocks §6 names so the composition
//! root can also load from a config file.

use serde::{Deserialize, Serialize};

/// Environment variable names.
pub mod env_vars {
    pub const BROKER_ENABLED: &str = "SDHOME_BROKER_ENABLED";
    pub const BROKER_HOST: &str = "SDHOME_BROKER_HOST";
    pub const BROKER_PORT: &str = "SDHOME_BROKER_PORT";
    pub const BROKER_TOPIC_FILTER: &str = "SDHOME_BROKER_TOPIC_FILTER";
    pub const BROKER_BASE_TOPIC: &str = "SDHOME_BROKER_BASE_TOPIC";
    pub const DB_PATH: &str = "SDHOME_DB_PATH";
    pub const WEBHOOK_MAIN: &str = "SDHOME_WEBHOOK_MAIN";
    pub const WEBHOOK_TEST: &str = "SDHOME_WEBHOOK_TEST";
    pub const STATE_SYNC_POLL_INTERVAL_SECS: &str = "SDHOME_STATE_SYNC_POLL_INTERVAL_SECS";
    pub const LOCATION_LATITUDE: &str = "SDHOME_LATITUDE";
    pub const LOCATION_LONGITUDE: &str = "SDHOME_LONGITUDE";
}

pub mod defaults {
    pub const BROKER_HOST: &str = "localhost";
    pub const BROKER_PORT: u16 = 1883;
    pub const BROKER_TOPIC_FILTER: &str = "sdhome/#";
    pub const BROKER_BASE_TOPIC: &str = "sdhome";
    pub const DB_PATH: &str = "./data/sdhome.redb";
    pub const STATE_SYNC_POLL_INTERVAL_SECS: u64 = 30;
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// `{enabled, host, port, topicFilter, baseTopic}` per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_topic_filter")]
    pub topic_filter: String,
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
}

fn default_true() -> bool {
    true
}
fn default_host() -> String {
    defaults::BROKER_HOST.to_string()
}
fn default_port() -> u16 {
    defaults::BROKER_PORT
}
fn default_topic_filter() -> String {
    defaults::BROKER_TOPIC_FILTER.to_string()
}
fn default_base_topic() -> String {
    defaults::BROKER_BASE_TOPIC.to_string()
}

impl BrokerConfig {
    /// Build from environment variables, falling back to the documented
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            enabled: env_or(env_vars::BROKER_ENABLED, true),
            host: env_string_or(env_vars::BROKER_HOST, defaults::BROKER_HOST),
            port: env_or(env_vars::BROKER_PORT, defaults::BROKER_PORT),
            topic_filter: env_string_or(env_vars::BROKER_TOPIC_FILTER, defaults::BROKER_TOPIC_FILTER),
            base_topic: env_string_or(env_vars::BROKER_BASE_TOPIC, defaults::BROKER_BASE_TOPIC),
        }
    }

    pub fn device_topic(&self, device_id: &str) -> String {
        format!("{}/{}", self.base_topic, device_id)
    }

    pub fn set_topic(&self, device_id: &str) -> String {
        format!("{}/{}/set", self.base_topic, device_id)
    }

    pub fn get_topic(&self, device_id: &str) -> String {
        format!("{}/{}/get", self.base_topic, device_id)
    }

    pub fn bridge_event_topic(&self) -> String {
        format!("{}/bridge/event", self.base_topic)
    }

    pub fn bridge_permit_join_response_topic(&self) -> String {
        format!("{}/bridge/response/permit_join", self.base_topic)
    }

    pub fn bridge_permit_join_request_topic(&self) -> String {
        format!("{}/bridge/request/permit_join", self.base_topic)
    }

    /// The single-level wildcard the state-sync worker subscribes on.
    pub fn device_wildcard_topic(&self) -> String {
        format!("{}/+", self.base_topic)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            topic_filter: default_topic_filter(),
            base_topic: default_base_topic(),
        }
    }
}

/// `{main?, test?}` per §6.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhooksConfig {
    pub main: Option<String>,
    pub test: Option<String>,
}

impl WebhooksConfig {
    pub fn from_env() -> Self {
        Self {
            main: std::env::var(env_vars::WEBHOOK_MAIN).ok(),
            test: std::env::var(env_vars::WEBHOOK_TEST).ok(),
        }
    }
}

/// `{pollIntervalSeconds}` per §6; 0 disables polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSyncConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

fn default_poll_interval() -> u64 {
    defaults::STATE_SYNC_POLL_INTERVAL_SECS
}

impl StateSyncConfig {
    pub fn from_env() -> Self {
        Self {
            poll_interval_seconds: env_or(
                env_vars::STATE_SYNC_POLL_INTERVAL_SECS,
                defaults::STATE_SYNC_POLL_INTERVAL_SECS,
            ),
        }
    }
}

impl Default for StateSyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

/// Latitude/longitude for sunrise/sunset trigger resolution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationConfig {
    pub fn from_env() -> Option<Self> {
        let lat: Option<f64> = std::env::var(env_vars::LOCATION_LATITUDE)
            .ok()
            .and_then(|s| s.parse().ok());
        let lon: Option<f64> = std::env::var(env_vars::LOCATION_LONGITUDE)
            .ok()
            .and_then(|s| s.parse().ok());
        match (lat, lon) {
            (Some(latitude), Some(longitude)) => Some(Self { latitude, longitude }),
            _ => None,
        }
    }
}

/// Top-level application configuration, loadable from a config file via
/// `serde` or assembled from the environment via [`AppConfig::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub state_sync: StateSyncConfig,
    pub location: Option<LocationConfig>,
}

fn default_db_path() -> String {
    defaults::DB_PATH.to_string()
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            broker: BrokerConfig::from_env(),
            db_path: env_string_or(env_vars::DB_PATH, defaults::DB_PATH),
            webhooks: WebhooksConfig::from_env(),
            state_sync: StateSyncConfig::from_env(),
            location: LocationConfig::from_env(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            db_path: default_db_path(),
            webhooks: WebhooksConfig::default(),
            state_sync: StateSyncConfig::default(),
            location: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_config_defaults() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.base_topic, "sdhome");
        assert_eq!(cfg.topic_filter, "sdhome/#");
        assert!(cfg.enabled);
    }

    #[test]
    fn broker_config_topic_builders() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.set_topic("hallway_light"), "sdhome/hallway_light/set");
        assert_eq!(cfg.get_topic("hallway_light"), "sdhome/hallway_light/get");
        assert_eq!(cfg.bridge_event_topic(), "sdhome/bridge/event");
    }

    #[test]
    fn state_sync_default_interval() {
        assert_eq!(StateSyncConfig::default().poll_interval_seconds, 30);
    }

    #[test]
    fn app_config_default_roundtrips_through_json() {
        let cfg = AppConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.broker.base_topic, cfg.broker.base_topic);
    }
}
