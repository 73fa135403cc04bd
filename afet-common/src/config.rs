//! Configuration loading
//!
//! Resolution priority, highest first:
//! 1. Command-line argument (applied by the binary)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default

use crate::masking::MaskingPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "AFET_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma separated bootstrap servers
    pub brokers: String,
    pub group_id: String,
    pub location_topic: String,
    pub intent_topic: String,
    pub session_timeout_ms: u64,
    pub publish_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "feeds_location_consumer".to_string(),
            location_topic: "topic.feeds.location".to_string(),
            intent_topic: "topic.feeds.intent".to_string(),
            session_timeout_ms: 10_000,
            publish_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://afet.db?mode=rwc".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub url: String,
    pub index: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index: "locations".to_string(),
        }
    }
}

/// One resolver HTTP endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub intent: Endpoint,
    pub needs: Endpoint,
    pub duplicate: Endpoint,
    /// Labels scoring at or above this are kept
    pub accept_threshold: f64,
    /// The irrelevant label at or above this rejects the whole feed
    pub reject_threshold: f64,
    pub irrelevant_label: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            intent: Endpoint::default(),
            needs: Endpoint::default(),
            duplicate: Endpoint::default(),
            accept_threshold: 0.4,
            reject_threshold: 0.7,
            irrelevant_label: "Alakasiz".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Deadline for each store, index or resolver call
    pub operation_timeout_ms: u64,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 5_000,
            retry_initial_backoff_ms: 100,
            retry_max_backoff_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address of the health and metrics listener
    pub health_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            health_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub kafka: KafkaConfig,
    pub database: DatabaseConfig,
    pub search: SearchConfig,
    pub resolvers: ResolverConfig,
    pub pipeline: PipelineConfig,
    pub masking: MaskingPolicy,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// A config path was named but no file exists there
    Missing(PathBuf),
    Defaults,
}

impl ConfigSource {
    /// Report the source once logging is up
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("Loaded configuration from {}", path.display()),
            ConfigSource::Missing(path) => {
                warn!("Config file {} not found, using defaults", path.display())
            }
            ConfigSource::Defaults => info!("No config file, using defaults"),
        }
    }
}

impl ServiceConfig {
    /// Load from an optional TOML file, then apply process environment overrides.
    ///
    /// A missing file is not an error: defaults are used with a warning.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config, source) = Self::resolve(path)?;
        source.log();
        Ok(config)
    }

    /// Same as [`ServiceConfig::load`] but hands back the source instead of
    /// logging it, for callers that load before the subscriber exists.
    pub fn resolve(path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .or_else(default_config_path);

        let (mut config, source) = match path {
            Some(path) if path.exists() => (Self::from_toml_file(&path)?, ConfigSource::File(path)),
            Some(path) => (Self::default(), ConfigSource::Missing(path)),
            None => (Self::default(), ConfigSource::Defaults),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok((config, source))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *target = value;
            }
        };

        set(&mut self.kafka.brokers, "KAFKA_BROKERS");
        set(&mut self.kafka.group_id, "KAFKA_GROUP_ID");
        set(&mut self.database.url, "DB_CONN_STR");
        set(&mut self.search.url, "ELASTIC_CONN_STR");
        set(&mut self.resolvers.intent.url, "INTENT_RESOLVER_API_URL");
        set(&mut self.resolvers.intent.api_key, "INTENT_RESOLVER_API_KEY");
        set(&mut self.resolvers.needs.url, "NEEDS_RESOLVER_API_URL");
        set(&mut self.resolvers.needs.api_key, "NEEDS_RESOLVER_API_KEY");
        set(&mut self.resolvers.duplicate.url, "DUPLICATION_API_URL");
        set(&mut self.resolvers.duplicate.api_key, "DUPLICATION_API_KEY");
        set(&mut self.http.health_addr, "AFET_HEALTH_ADDR");
        set(&mut self.logging.level, "AFET_LOG_LEVEL");
    }

    /// Reject configurations the consumer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.kafka.brokers.trim().is_empty() {
            return Err(Error::Config("kafka.brokers must be set".to_string()));
        }
        if self.kafka.group_id.trim().is_empty() {
            return Err(Error::Config("kafka.group_id must be set".to_string()));
        }
        for (name, endpoint) in [
            ("intent", &self.resolvers.intent),
            ("needs", &self.resolvers.needs),
            ("duplicate", &self.resolvers.duplicate),
        ] {
            if endpoint.url.trim().is_empty() {
                return Err(Error::Config(format!("resolvers.{}.url must be set", name)));
            }
        }

        let r = &self.resolvers;
        if !(0.0..=1.0).contains(&r.accept_threshold) || !(0.0..=1.0).contains(&r.reject_threshold) {
            return Err(Error::Config(
                "resolver thresholds must be within [0, 1]".to_string(),
            ));
        }
        if r.accept_threshold > r.reject_threshold {
            return Err(Error::Config(format!(
                "accept_threshold {} exceeds reject_threshold {}",
                r.accept_threshold, r.reject_threshold
            )));
        }
        if self.pipeline.operation_timeout_ms == 0 {
            return Err(Error::Config(
                "pipeline.operation_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// `~/.config/afet/consumer.toml`, falling back to `/etc/afet/consumer.toml`
fn default_config_path() -> Option<PathBuf> {
    let user = dirs::config_dir().map(|d| d.join("afet").join("consumer.toml"));
    if let Some(path) = user.filter(|p| p.exists()) {
        return Some(path);
    }
    let system = PathBuf::from("/etc/afet/consumer.toml");
    system.exists().then_some(system)
}
