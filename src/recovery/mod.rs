/// Failure recovery for outbound operations and live connections
///
/// This module provides:
/// - Exponential backoff policy
/// - Rule-based error classification
/// - A static catalog of recovery strategies per error category
/// - A bounded retry queue
/// - The recovery orchestrator, which turns failures into incidents and
///   drives strategies against them
///
/// # Architecture
///
/// ```text
/// ┌──────────────────────────────────────────┐
/// │     Recovery Orchestrator (incidents)     │
/// └──────┬──────────────┬─────────────┬──────┘
///        │              │             │
///        ↓              ↓             ↓
/// ┌────────────┐ ┌─────────────┐ ┌──────────────┐
/// │ Retry Queue│ │ Classifier & │ │ Monitors &   │
/// │  + Backoff │ │  Strategies  │ │  Signal Bus  │
/// └────────────┘ └─────────────┘ └──────────────┘
/// ```
///
/// # Usage Example
///
/// ```rust,ignore
/// use recovery_core::{RecoveryOrchestrator, ResilienceConfig, RetryQueue, SignalBus};
/// use recovery_core::recovery::QueuedOperation;
///
/// let config = ResilienceConfig::default();
/// let queue = RetryQueue::new(&config.queue);
/// let orchestrator = RecoveryOrchestrator::new(&config.orchestrator, queue.clone(), SignalBus::new());
/// orchestrator.start();
///
/// queue.enqueue_default(QueuedOperation::new("save_draft", || async {
///     api.save_draft().await
/// }))?;
/// ```
pub mod backoff;
pub mod classification;
pub mod incident;
pub mod orchestrator;
pub mod retry_queue;
pub mod strategies;

pub use backoff::{ExponentialBackoff, RetryConfig};
pub use classification::{ErrorCategory, ErrorClassifier, FailureSignal};
pub use incident::{
    AttemptId, AttemptStatus, Incident, IncidentId, IncidentReport, IncidentSeverity,
    IncidentSource, IncidentStatus, RecoveryAttempt,
};
pub use orchestrator::{OrchestratorSnapshot, RecoveryEvent, RecoveryOrchestrator};
pub use retry_queue::{
    ItemId, ItemStatus, QueueItemSnapshot, QueueStatus, QueuedOperation, RetryQueue,
};
pub use strategies::{RecoveryStrategy, StrategyAction, StrategyId, StrategyRegistry};
