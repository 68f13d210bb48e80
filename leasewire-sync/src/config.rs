//! Configuration loading for the leasewire sync daemon.
//!
//! Endpoints, auth and the request timeout are required. Tuning sections
//! (`[cache]`, `[refresh]`, `[reconnect]`, `[alerts]`, `[log]`) fall back to
//! the built-in defaults when omitted.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use leasewire_core::{AlertKind, CacheKey, Topic, Ttl};
use leasewire_events::AlertDispatcher;
use leasewire_realtime::{Credentials, ReconnectConfig};
use leasewire_storage::CacheConfig;
use serde::Deserialize;

use crate::alerts::DEFAULT_ACK_MEMORY;
use crate::refresh::{RefreshConfig, Resource};

pub const CONFIG_ENV: &str = "LEASEWIRE_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub ws_endpoint: String,
    pub auth: Credentials,
    pub request_timeout_ms: u64,
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub refresh: RefreshSection,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub alerts: AlertsSection,
    #[serde(default)]
    pub log: LogSection,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

fn default_topics() -> Vec<String> {
    vec![
        Topic::PAYMENTS.to_string(),
        Topic::MAINTENANCE_REQUESTS.to_string(),
        Topic::MESSAGES.to_string(),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurableBackend {
    #[default]
    Lmdb,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    pub memory_ttl_secs: u64,
    pub default_ttl_secs: u64,
    pub stale_retention_secs: u64,
    pub durable: DurableBackend,
    pub lmdb_path: PathBuf,
    pub lmdb_max_size_mb: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            memory_ttl_secs: 30,
            default_ttl_secs: 600,
            stale_retention_secs: 24 * 60 * 60,
            durable: DurableBackend::Lmdb,
            lmdb_path: PathBuf::from("leasewire-cache"),
            lmdb_max_size_mb: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshSection {
    pub min_staleness_secs: u64,
    pub tick_interval_secs: u64,
    pub critical_interval_secs: u64,
}

impl Default for RefreshSection {
    fn default() -> Self {
        Self {
            min_staleness_secs: 120,
            tick_interval_secs: 60,
            critical_interval_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertsSection {
    pub surfaced: Vec<AlertKind>,
    pub ack_memory: usize,
    pub queue_capacity: usize,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            surfaced: AlertDispatcher::default().surfaced_kinds().collect(),
            ack_memory: DEFAULT_ACK_MEMORY,
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    /// `EnvFilter` directive, used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    pub key: String,
    /// Falls back to `cache.default_ttl_secs`.
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub critical: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or LEASEWIRE_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

impl SyncConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate TOML text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(invalid("api_base_url", "must not be empty"));
        }
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(invalid("api_base_url", "must be an http:// or https:// URL"));
        }
        if self.ws_endpoint.trim().is_empty() {
            return Err(invalid("ws_endpoint", "must not be empty"));
        }
        if !(self.ws_endpoint.starts_with("ws://") || self.ws_endpoint.starts_with("wss://")) {
            return Err(invalid("ws_endpoint", "must be a ws:// or wss:// URL"));
        }
        if self.auth.is_empty() {
            return Err(invalid("auth", "api_key or bearer_token must be provided"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }

        if self.topics.is_empty() {
            return Err(invalid("topics", "at least one topic is required"));
        }
        let mut seen = BTreeSet::new();
        for topic in &self.topics {
            if topic.trim().is_empty() {
                return Err(invalid("topics", "topic names must not be empty"));
            }
            if !seen.insert(topic.as_str()) {
                return Err(invalid("topics", format!("duplicate topic {}", topic)));
            }
        }

        if self.cache.memory_ttl_secs == 0 {
            return Err(invalid("cache.memory_ttl_secs", "must be > 0"));
        }
        if self.cache.default_ttl_secs == 0 {
            return Err(invalid("cache.default_ttl_secs", "must be > 0"));
        }
        if self.cache.durable == DurableBackend::Lmdb {
            if self.cache.lmdb_path.as_os_str().is_empty() {
                return Err(invalid("cache.lmdb_path", "must not be empty"));
            }
            if self.cache.lmdb_max_size_mb == 0 {
                return Err(invalid("cache.lmdb_max_size_mb", "must be > 0"));
            }
        }

        if self.refresh.tick_interval_secs == 0 {
            return Err(invalid("refresh.tick_interval_secs", "must be > 0"));
        }
        if self.refresh.critical_interval_secs == 0 {
            return Err(invalid("refresh.critical_interval_secs", "must be > 0"));
        }

        if self.reconnect.initial_ms == 0 {
            return Err(invalid("reconnect.initial_ms", "must be > 0"));
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(invalid("reconnect.max_ms", "must be >= initial_ms"));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(invalid("reconnect.multiplier", "must be >= 1.0"));
        }

        if self.alerts.ack_memory == 0 {
            return Err(invalid("alerts.ack_memory", "must be > 0"));
        }
        if self.alerts.queue_capacity == 0 {
            return Err(invalid("alerts.queue_capacity", "must be > 0"));
        }
        if self.log.filter.trim().is_empty() {
            return Err(invalid("log.filter", "must not be empty"));
        }

        let mut keys = BTreeSet::new();
        for resource in &self.resources {
            if resource.key.trim().is_empty() {
                return Err(invalid("resources.key", "must not be empty"));
            }
            if resource.ttl_secs == Some(0) {
                return Err(invalid("resources.ttl_secs", format!("must be > 0 for {}", resource.key)));
            }
            if !keys.insert(resource.key.as_str()) {
                return Err(invalid("resources.key", format!("duplicate resource {}", resource.key)));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.topics.iter().map(Topic::new).collect()
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_memory_ttl(Ttl::seconds(self.cache.memory_ttl_secs))
            .with_default_ttl(Ttl::seconds(self.cache.default_ttl_secs))
            .with_stale_retention(Duration::from_secs(self.cache.stale_retention_secs))
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            min_staleness: Duration::from_secs(self.refresh.min_staleness_secs),
            tick_interval: Duration::from_secs(self.refresh.tick_interval_secs),
            critical_interval: Duration::from_secs(self.refresh.critical_interval_secs),
        }
    }

    /// Configured resources with their TTLs resolved.
    pub fn resources(&self) -> Vec<Resource> {
        self.resources
            .iter()
            .map(|resource| {
                let ttl = Ttl::seconds(resource.ttl_secs.unwrap_or(self.cache.default_ttl_secs));
                let tracked = Resource::new(CacheKey::new(resource.key.as_str()), ttl);
                if resource.critical {
                    tracked.critical()
                } else {
                    tracked
                }
            })
            .collect()
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        api_base_url = "https://api.example.test"
        ws_endpoint = "wss://api.example.test/realtime"
        request_timeout_ms = 5000

        [auth]
        bearer_token = "secret"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = SyncConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.topics(), vec![Topic::payments(), Topic::maintenance_requests(), Topic::messages()]);
        assert_eq!(config.cache_config(), CacheConfig::default());
        assert_eq!(config.refresh_config(), RefreshConfig::default());
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.cache.durable, DurableBackend::Lmdb);
        assert!(!config.alerts.surfaced.contains(&AlertKind::PaymentReceived));
        assert!(config.alerts.surfaced.contains(&AlertKind::PaymentOverdue));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert!(config.resources().is_empty());
    }

    #[test]
    fn test_full_config() {
        let text = format!(
            "{}\n{}",
            MINIMAL.replace("[auth]", "topics = [\"payments\"]\n[auth]"),
            r#"
            [cache]
            memory_ttl_secs = 10
            durable = "memory"

            [refresh]
            min_staleness_secs = 30

            [reconnect]
            initial_ms = 100
            max_ms = 1000

            [alerts]
            surfaced = ["payment_overdue", "payment_received"]

            [log]
            filter = "leasewire=debug"
            json = true

            [[resources]]
            key = "payments:overdue"
            critical = true

            [[resources]]
            key = "messages:unread"
            ttl_secs = 60
            "#
        );
        let config = SyncConfig::parse(&text).unwrap();

        assert_eq!(config.topics(), vec![Topic::payments()]);
        assert_eq!(config.cache_config().memory_ttl, Ttl::seconds(10));
        assert_eq!(config.cache.durable, DurableBackend::Memory);
        assert_eq!(config.refresh_config().min_staleness, Duration::from_secs(30));
        assert_eq!(config.reconnect.max_ms, 1000);
        assert_eq!(config.reconnect.multiplier, 2.0);
        assert_eq!(config.alerts.surfaced, vec![AlertKind::PaymentOverdue, AlertKind::PaymentReceived]);
        assert!(config.log.json);

        let resources = config.resources();
        assert_eq!(resources[0], Resource::new("payments:overdue", Ttl::seconds(600)).critical());
        assert_eq!(resources[1], Resource::new("messages:unread", Ttl::seconds(60)));
    }

    #[test]
    fn test_invalid_values_name_their_field() {
        let cases = [
            (MINIMAL.replace("5000", "0"), "request_timeout_ms"),
            (MINIMAL.replace("wss://", "https://"), "ws_endpoint"),
            (MINIMAL.replace("bearer_token = \"secret\"", ""), "auth"),
            (format!("{}\n[reconnect]\ninitial_ms = 500\nmax_ms = 10", MINIMAL), "reconnect.max_ms"),
            (format!("{}\n[alerts]\nack_memory = 0", MINIMAL), "alerts.ack_memory"),
            (
                format!("{}\n[[resources]]\nkey = \"a:b\"\n[[resources]]\nkey = \"a:b\"", MINIMAL),
                "resources.key",
            ),
        ];
        for (text, expected) in cases {
            match SyncConfig::parse(&text) {
                Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected invalid {}, got {:?}", expected, other),
            }
        }
    }

    #[test]
    fn test_unknown_fields_and_kinds_are_rejected() {
        let typo = format!("{}\n[cache]\nmemory_ttl = 5", MINIMAL);
        assert!(matches!(SyncConfig::parse(&typo), Err(ConfigError::Parse(_))));

        let bad_kind = format!("{}\n[alerts]\nsurfaced = [\"rent_due\"]", MINIMAL);
        assert!(matches!(SyncConfig::parse(&bad_kind), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leasewire.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        assert!(SyncConfig::from_path(&path).is_ok());

        let missing = dir.path().join("missing.toml");
        assert!(matches!(SyncConfig::from_path(&missing), Err(ConfigError::Io(_))));
    }
}
