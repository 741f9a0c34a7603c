// Allow complex types where needed for boxed operation futures and callbacks
#![allow(clippy::type_complexity)]

pub mod config;
pub mod monitoring;
pub mod recovery;
pub mod signals;
pub mod telemetry;
pub mod timer;

// Re-export the main entry points for convenience
pub use crate::config::ResilienceConfig;
pub use monitoring::{
    ComponentHealthMonitor, ComponentSpec, ComponentStatus, ConnectionMonitor, ConnectionQuality,
    ConnectionState, ConnectionTransport, HealthProbe, TransportEvent,
};
pub use recovery::{
    ErrorCategory, ErrorClassifier, ExponentialBackoff, Incident, IncidentSeverity,
    QueuedOperation, RecoveryOrchestrator, RecoveryStrategy, RetryConfig, RetryQueue,
    StrategyId, StrategyRegistry,
};
pub use signals::{RecoverySignal, SignalBus};

use thiserror::Error;

/// Errors surfaced by the resilience layer itself.
///
/// Failures of caller-supplied operations, probes and transports travel as
/// `anyhow::Error` and are classified, never wrapped in this type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecoveryError {
    #[error("Retry queue is full ({capacity} items)")]
    QueueFull { capacity: usize },

    #[error("Queue item not found: {0}")]
    ItemNotFound(String),

    #[error("Incident not found: {0}")]
    IncidentNotFound(String),

    #[error("Unknown recovery strategy: {0}")]
    UnknownStrategy(String),

    #[error("Strategy {strategy} does not apply to {category} incidents")]
    StrategyNotApplicable { strategy: String, category: String },

    #[error("Recovery already in progress for incident {0}")]
    RecoveryInProgress(String),

    #[error("Invalid connection state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("No connection monitor attached")]
    NoConnection,

    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("Failure persists after recovery: {0}")]
    StillFailing(String),

    #[error("Recovery signal not delivered: {0}")]
    SignalUndelivered(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl From<::config::ConfigError> for RecoveryError {
    fn from(err: ::config::ConfigError) -> Self {
        RecoveryError::Config(err.to_string())
    }
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Lock a std mutex, taking the guard back from a poisoned lock.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
