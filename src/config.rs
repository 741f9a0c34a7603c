/// Configuration for every component of the resilience layer
///
/// Values come from, in increasing priority: built-in defaults, an optional
/// TOML file, and `RECOVERY__<SECTION>__<KEY>` environment variables
/// (e.g. `RECOVERY__QUEUE__MAX_QUEUE_SIZE=50`).
use crate::recovery::RetryConfig;
use crate::{RecoveryError, RecoveryResult};
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "RECOVERY";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub queue: QueueConfig,
    pub connection: ConnectionConfig,
    pub components: ComponentHealthConfig,
    pub orchestrator: OrchestratorConfig,
    pub logging: LoggingConfig,
}

/// Retry queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Items held at once; enqueue beyond this is rejected
    pub max_queue_size: usize,

    /// Retry settings for operations enqueued without their own
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            retry: RetryConfig::default(),
        }
    }
}

/// Connection health monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub auto_reconnect: bool,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,

    /// Stop scheduling reconnects after this many cycles (unlimited if unset)
    pub max_reconnect_attempts: Option<u32>,

    /// State transitions kept for inspection
    pub history_limit: usize,
}

impl ConnectionConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn validate(&self) -> RecoveryResult<()> {
        if self.ping_interval_ms == 0 || self.ping_timeout_ms == 0 || self.handshake_timeout_ms == 0 {
            return Err(invalid(
                "connection ping interval, ping timeout and handshake timeout must be non-zero",
            ));
        }
        if self.reconnect_base_delay_ms > self.reconnect_max_delay_ms {
            return Err(invalid(
                "connection.reconnect_base_delay_ms must not exceed reconnect_max_delay_ms",
            ));
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            ping_interval_ms: 5000,
            ping_timeout_ms: 5000,
            handshake_timeout_ms: 10_000,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: None,
            history_limit: 50,
        }
    }
}

/// Component health probe settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentHealthConfig {
    /// Share of the probe timeout above which a response counts as degraded
    pub degraded_latency_ratio: f64,

    /// Share of the probe timeout above which a response counts as critical
    pub critical_latency_ratio: f64,

    /// Consecutive probe failures that make a component critical
    pub critical_after_failures: u32,

    /// Consecutive probe failures that take a component offline
    pub offline_after_failures: u32,
}

impl Default for ComponentHealthConfig {
    fn default() -> Self {
        Self {
            degraded_latency_ratio: 0.7,
            critical_latency_ratio: 0.9,
            critical_after_failures: 3,
            offline_after_failures: 5,
        }
    }
}

/// Recovery orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub detection_interval_ms: u64,
    pub auto_recovery: bool,

    /// Pause before an automated strategy runs, to let transient blips pass
    pub auto_recovery_delay_ms: u64,

    /// Recovery attempts kept in history
    pub history_limit: usize,
}

impl OrchestratorConfig {
    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    pub fn auto_recovery_delay(&self) -> Duration {
        Duration::from_millis(self.auto_recovery_delay_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            detection_interval_ms: 10_000,
            auto_recovery: true,
            auto_recovery_delay_ms: 2000,
            history_limit: 100,
        }
    }
}

/// Logging output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,

    /// Write daily-rolling files here instead of stderr
    pub directory: Option<PathBuf>,

    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
            file_prefix: "recovery-core".to_string(),
        }
    }
}

impl ResilienceConfig {
    /// Load configuration from `path` (or the per-user default location when
    /// `None`) and environment overrides, then validate it.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> RecoveryResult<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    builder = builder.add_source(File::from(default_path).required(false));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: ResilienceConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(?path, "Configuration loaded");
        Ok(config)
    }

    /// Reject settings the components cannot run with
    pub fn validate(&self) -> RecoveryResult<()> {
        self.queue.retry.validate()?;
        if self.queue.max_queue_size == 0 {
            return Err(invalid("queue.max_queue_size must be at least 1"));
        }

        self.connection.validate()?;

        let components = &self.components;
        if !(0.0 < components.degraded_latency_ratio
            && components.degraded_latency_ratio < components.critical_latency_ratio
            && components.critical_latency_ratio <= 1.0)
        {
            return Err(invalid(
                "components latency ratios must satisfy 0 < degraded < critical <= 1",
            ));
        }
        if components.critical_after_failures == 0
            || components.offline_after_failures < components.critical_after_failures
        {
            return Err(invalid(
                "components failure thresholds must satisfy 0 < critical <= offline",
            ));
        }

        if self.orchestrator.detection_interval_ms == 0 {
            return Err(invalid("orchestrator.detection_interval_ms must be non-zero"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> RecoveryError {
    RecoveryError::Config(message.to_string())
}

/// Per-user configuration file location, e.g. `~/.config/recovery-core/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "recovery-core")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
