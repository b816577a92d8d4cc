//! Application configuration.
//!
//! Loaded from YAML files and `HUBCAST__*` environment variables, then
//! validated into runtime options. Node bootstrap settings are strict: a
//! missing pool size or an unknown load-balance strategy stops startup.

use std::time::Duration;

use serde::Deserialize;

use crate::balance::{LoadBalanceKind, UnknownStrategy};
use crate::gateway::GatewaySettings;
use crate::model::NodeAddress;
use crate::publisher::PublisherOptions;
use crate::runtime::{BufferOptions, HubOptions, SiloOptions};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "hubcast.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "HUBCAST_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "HUBCAST";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "HUBCAST_LOG";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing node.pool_size")]
    MissingPoolSize,

    #[error("node.pool_size must be at least 1")]
    InvalidPoolSize,

    #[error("Missing node.load_balance")]
    MissingStrategy,

    #[error(transparent)]
    UnknownStrategy(#[from] UnknownStrategy),

    #[error("Invalid node address '{0}'")]
    InvalidAddress(String),

    #[error("publisher.min_period_ms must not exceed publisher.max_period_ms")]
    InvalidPublisherPeriod,

    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Node bootstrap configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Number of buffer actors per node.
    pub pool_size: Option<usize>,
    /// `RoundRobin` or `Random`.
    pub load_balance: Option<String>,
}

/// Buffer actor timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub flush_interval_ms: u64,
    /// `0` disables keep-alive; buffers then deactivate after the idle timeout.
    pub keep_alive_secs: u64,
    /// Batch size above which a flush logs a warning.
    pub warn_batch_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1000,
            keep_alive_secs: 12 * 60 * 60,
            warn_batch_size: 10_000,
        }
    }
}

/// Actor hosting timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    pub idle_timeout_secs: u64,
    pub activation_timeout_ms: u64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 2 * 60 * 60,
            activation_timeout_ms: 5000,
        }
    }
}

/// Hub fan-out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Upper bound on one observer's receive call.
    pub delivery_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 5000,
        }
    }
}

/// Subscription client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub resubscribe_interval_secs: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            resubscribe_interval_secs: 120,
        }
    }
}

/// Load-generation harness.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Number of publishers to spawn across the cluster.
    pub count: usize,
    pub min_period_ms: u64,
    pub max_period_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            count: 0,
            min_period_ms: 500,
            max_period_ms: 1500,
        }
    }
}

/// Nodes hosted by this process.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub nodes: Vec<String>,
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub buffer: BufferConfig,
    pub actor: ActorConfig,
    pub hub: HubConfig,
    pub observer: ObserverConfig,
    pub publisher: PublisherConfig,
    pub cluster: ClusterConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `hubcast.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate node bootstrap settings.
    pub fn node_settings(&self) -> Result<GatewaySettings, ConfigError> {
        let pool_size = self.node.pool_size.ok_or(ConfigError::MissingPoolSize)?;
        if pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize);
        }

        let strategy: LoadBalanceKind = self
            .node
            .load_balance
            .as_deref()
            .ok_or(ConfigError::MissingStrategy)?
            .parse()?;

        Ok(GatewaySettings {
            pool_size,
            strategy,
        })
    }

    pub fn silo_options(&self) -> SiloOptions {
        SiloOptions {
            idle_timeout: Duration::from_secs(self.actor.idle_timeout_secs),
            activation_timeout: Duration::from_millis(self.actor.activation_timeout_ms),
            buffer: BufferOptions {
                flush_interval: Duration::from_millis(self.buffer.flush_interval_ms),
                keep_alive: Duration::from_secs(self.buffer.keep_alive_secs),
                warn_batch_size: self.buffer.warn_batch_size,
            },
            hub: HubOptions {
                delivery_timeout: Duration::from_millis(self.hub.delivery_timeout_ms),
            },
        }
    }

    pub fn publisher_options(&self) -> Result<PublisherOptions, ConfigError> {
        if self.publisher.min_period_ms > self.publisher.max_period_ms {
            return Err(ConfigError::InvalidPublisherPeriod);
        }
        Ok(PublisherOptions {
            min_period: Duration::from_millis(self.publisher.min_period_ms),
            max_period: Duration::from_millis(self.publisher.max_period_ms),
        })
    }

    pub fn resubscribe_interval(&self) -> Duration {
        Duration::from_secs(self.observer.resubscribe_interval_secs)
    }

    /// Parse `cluster.nodes`. Any bad entry is fatal.
    pub fn cluster_nodes(&self) -> Result<Vec<NodeAddress>, ConfigError> {
        self.cluster
            .nodes
            .iter()
            .map(|raw| {
                raw.parse::<NodeAddress>()
                    .map_err(|_| ConfigError::InvalidAddress(raw.clone()))
            })
            .collect()
    }
}
