/// Recovery orchestrator - turns failures into incidents and drives recovery
///
/// This module provides the orchestration layer that:
/// - Sweeps the retry queue, connection monitor and component monitor for failures
/// - Classifies each failure and opens one incident per failing source
/// - Runs the first automated strategy for eligible categories after a short delay
/// - Executes strategies on request and keeps a bounded attempt history
/// - Resolves incidents whose source has recovered on its own
use super::classification::{ErrorCategory, ErrorClassifier, FailureSignal};
use super::incident::{
    AttemptId, AttemptStatus, Incident, IncidentId, IncidentReport, IncidentSeverity,
    IncidentSource, IncidentStatus, RecoveryAttempt,
};
use super::retry_queue::{ItemId, QueueStatus, RetryQueue};
use super::strategies::{RecoveryStrategy, StrategyAction, StrategyId, StrategyRegistry};
use crate::config::OrchestratorConfig;
use crate::monitoring::{
    ComponentHealth, ComponentHealthMonitor, ComponentStatus, ConnectionMonitor,
    ConnectionSnapshot, ConnectionState,
};
use crate::signals::SignalBus;
use crate::timer::{TimerHandle, TimerSet};
use crate::{lock, RecoveryError, RecoveryResult};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Change in the incident set, for presentation layers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryEvent {
    IncidentOpened { incident: Incident },
    IncidentResolved { incident_id: IncidentId },
    IncidentDismissed { incident_id: IncidentId },
    RecoveryStarted { attempt: RecoveryAttempt },
    RecoveryFinished { attempt: RecoveryAttempt },
}

/// Everything a dashboard needs in one serializable value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorSnapshot {
    pub taken_at: DateTime<Utc>,
    pub running: bool,
    pub auto_recovery: bool,
    pub incidents: Vec<Incident>,
    pub queue: QueueStatus,
    pub connection: Option<ConnectionSnapshot>,
    pub components: Vec<ComponentHealth>,
    pub recent_attempts: Vec<RecoveryAttempt>,
}

/// Failure observed during a sweep, before deduplication
struct DetectedFailure {
    source: IncidentSource,
    title: String,
    message: String,
    category: ErrorCategory,
    severity: IncidentSeverity,
    affected_components: Vec<String>,
}

/// What the sources looked like during one sweep
struct Observations {
    failed_items: HashSet<ItemId>,
    connection: Option<ConnectionSnapshot>,
    components: HashMap<String, ComponentStatus>,
}

impl Observations {
    fn source_recovered(&self, source: &IncidentSource) -> bool {
        match source {
            IncidentSource::QueueItem(id) => !self.failed_items.contains(id),
            IncidentSource::Connection(name) => match &self.connection {
                Some(snapshot) if &snapshot.name == name => !connection_failing(snapshot),
                _ => true,
            },
            IncidentSource::Component(name) => self
                .components
                .get(name)
                .map_or(true, |status| !status.is_failing()),
            IncidentSource::External(_) => false,
        }
    }
}

fn connection_failing(snapshot: &ConnectionSnapshot) -> bool {
    match snapshot.state {
        ConnectionState::Error => true,
        ConnectionState::Disconnected => !snapshot.closed_by_user,
        _ => false,
    }
}

struct OrchestratorState {
    /// Open incidents in creation order
    incidents: Vec<Incident>,

    /// Sources not re-reported until they recover
    suppressed: HashSet<IncidentSource>,

    /// Sources that already had their automatic attempt; cleared when the
    /// source recovers
    auto_attempted: HashSet<IncidentSource>,

    history: VecDeque<RecoveryAttempt>,
    in_progress: HashSet<IncidentId>,
    auto_recovery: bool,
    running: bool,
    connection: Option<ConnectionMonitor>,
    components: Option<ComponentHealthMonitor>,
    detection_timer: Option<TimerHandle>,
    auto_timers: HashMap<IncidentId, TimerHandle>,
}

impl OrchestratorState {
    fn incident(&self, id: IncidentId) -> Option<&Incident> {
        self.incidents.iter().find(|incident| incident.id == id)
    }

    fn incident_mut(&mut self, id: IncidentId) -> Option<&mut Incident> {
        self.incidents.iter_mut().find(|incident| incident.id == id)
    }

    fn take_incident(&mut self, id: IncidentId) -> Option<Incident> {
        let index = self.incidents.iter().position(|incident| incident.id == id)?;
        Some(self.incidents.remove(index))
    }

    fn cancel_auto_recovery(&mut self, id: IncidentId) {
        if let Some(timer) = self.auto_timers.remove(&id) {
            timer.cancel();
        }
    }
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    classifier: ErrorClassifier,
    registry: &'static StrategyRegistry,
    queue: RetryQueue,
    signals: SignalBus,
    state: Mutex<OrchestratorState>,
    events: broadcast::Sender<RecoveryEvent>,
    timers: TimerSet,
}

/// Recovery orchestrator. Cloning shares the orchestrator.
#[derive(Clone)]
pub struct RecoveryOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl RecoveryOrchestrator {
    pub fn new(config: &OrchestratorConfig, queue: RetryQueue, signals: SignalBus) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(OrchestratorInner {
                config: config.clone(),
                classifier: ErrorClassifier::new(),
                registry: StrategyRegistry::standard(),
                queue,
                signals,
                state: Mutex::new(OrchestratorState {
                    incidents: Vec::new(),
                    suppressed: HashSet::new(),
                    auto_attempted: HashSet::new(),
                    history: VecDeque::new(),
                    in_progress: HashSet::new(),
                    auto_recovery: config.auto_recovery,
                    running: false,
                    connection: None,
                    components: None,
                    detection_timer: None,
                    auto_timers: HashMap::new(),
                }),
                events,
                timers: TimerSet::new("recovery_orchestrator"),
            }),
        }
    }

    /// Watch a connection monitor for failures
    pub fn with_connection(self, monitor: ConnectionMonitor) -> Self {
        lock(&self.inner.state).connection = Some(monitor);
        self
    }

    /// Watch a component health monitor for failures
    pub fn with_components(self, monitor: ComponentHealthMonitor) -> Self {
        lock(&self.inner.state).components = Some(monitor);
        self
    }

    fn from_weak(weak: &Weak<OrchestratorInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn sources(&self) -> (Option<ConnectionMonitor>, Option<ComponentHealthMonitor>) {
        let state = lock(&self.inner.state);
        (state.connection.clone(), state.components.clone())
    }

    fn emit(&self, event: RecoveryEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }

    /// Run one detection sweep now, then every detection interval
    pub fn start(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.running {
                return;
            }
            state.running = true;

            let weak = Arc::downgrade(&self.inner);
            state.detection_timer = Some(self.inner.timers.schedule_interval(
                self.inner.config.detection_interval(),
                move || {
                    let orchestrator = RecoveryOrchestrator::from_weak(&weak);
                    async move {
                        if let Some(orchestrator) = orchestrator {
                            orchestrator.detect_failures();
                        }
                    }
                },
            ));
        }

        tracing::info!(
            interval = %humantime::format_duration(self.inner.config.detection_interval()),
            auto_recovery = self.auto_recovery_enabled(),
            "Recovery orchestrator started"
        );
        self.detect_failures();
    }

    /// Cancel the detection sweep and every pending auto-recovery
    pub fn stop(&self) {
        let mut state = lock(&self.inner.state);
        state.running = false;
        state.detection_timer = None;
        state.auto_timers.clear();
        self.inner.timers.cancel_all();
        tracing::info!("Recovery orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.state).running
    }

    /// Sweep every failure source once.
    ///
    /// Resolves incidents whose source has recovered, then opens an incident
    /// for each new failure. Returns the ids of the incidents opened.
    pub fn detect_failures(&self) -> Vec<IncidentId> {
        let (connection, components) = self.sources();
        let failed_items = self.inner.queue.failed_items();
        let connection = connection.map(|monitor| monitor.snapshot());
        let component_health = components
            .as_ref()
            .map(|monitor| monitor.statuses())
            .unwrap_or_default();

        let mut failures = Vec::new();

        for item in &failed_items {
            let category = self.inner.classifier.classify(item.last_error.as_deref());
            failures.push(DetectedFailure {
                source: IncidentSource::QueueItem(item.id),
                title: format!("{}: {}", category.title(), item.name),
                message: item
                    .last_error
                    .clone()
                    .unwrap_or_else(|| format!("{} failed", item.name)),
                category,
                severity: IncidentSeverity::for_category(
                    IncidentSeverity::for_attempts(item.attempt_count),
                    category,
                ),
                affected_components: Vec::new(),
            });
        }

        if let Some(snapshot) = connection.as_ref().filter(|s| connection_failing(s)) {
            let category = self.inner.classifier.classify(snapshot.last_error.as_deref());
            let base = if snapshot.state == ConnectionState::Error {
                IncidentSeverity::High
            } else {
                IncidentSeverity::Medium
            };
            failures.push(DetectedFailure {
                source: IncidentSource::Connection(snapshot.name.clone()),
                title: format!("{}: {}", category.title(), snapshot.name),
                message: snapshot
                    .last_error
                    .clone()
                    .unwrap_or_else(|| format!("connection {} is {}", snapshot.name, snapshot.state)),
                category,
                severity: IncidentSeverity::for_category(base, category),
                affected_components: Vec::new(),
            });
        }

        for health in component_health.iter().filter(|h| h.status.is_failing()) {
            // A slow but answering component has no error message
            let category = match &health.last_error {
                Some(error) => self.inner.classifier.classify(Some(error)),
                None => ErrorCategory::Performance,
            };
            let base = if health.status == ComponentStatus::Offline {
                IncidentSeverity::Critical
            } else {
                IncidentSeverity::High
            };
            let affected = components
                .as_ref()
                .map(|monitor| monitor.affected_components(&health.name))
                .unwrap_or_default();
            failures.push(DetectedFailure {
                source: IncidentSource::Component(health.name.clone()),
                title: format!("{}: {}", category.title(), health.name),
                message: health
                    .last_error
                    .clone()
                    .unwrap_or_else(|| format!("component {} is {}", health.name, health.status)),
                category,
                severity: IncidentSeverity::for_category(base, category),
                affected_components: affected,
            });
        }

        let observations = Observations {
            failed_items: failed_items.iter().map(|item| item.id).collect(),
            connection,
            components: component_health
                .iter()
                .map(|h| (h.name.clone(), h.status))
                .collect(),
        };

        let mut state = lock(&self.inner.state);
        self.resolve_recovered(&mut state, &observations);

        let mut opened = Vec::new();
        for failure in failures {
            if state.suppressed.contains(&failure.source)
                || state.incidents.iter().any(|i| i.source == failure.source)
            {
                continue;
            }
            let id = self.open_incident(&mut state, failure);
            opened.push(id);
        }

        if !opened.is_empty() {
            tracing::debug!(count = opened.len(), "Detection sweep opened incidents");
        }
        opened
    }

    fn resolve_recovered(&self, state: &mut OrchestratorState, observations: &Observations) {
        // A re-queued item looks recovered while it waits to run; the
        // running attempt settles its own incident
        let busy: HashSet<IncidentSource> = state
            .incidents
            .iter()
            .filter(|incident| state.in_progress.contains(&incident.id))
            .map(|incident| incident.source.clone())
            .collect();

        let recovered: Vec<IncidentId> = state
            .incidents
            .iter()
            .filter(|incident| !busy.contains(&incident.source))
            .filter(|incident| observations.source_recovered(&incident.source))
            .map(|incident| incident.id)
            .collect();

        for id in recovered {
            if let Some(incident) = state.take_incident(id) {
                state.cancel_auto_recovery(id);
                tracing::info!(
                    incident = %id,
                    source = %incident.source,
                    "Incident source recovered, resolving"
                );
                self.emit(RecoveryEvent::IncidentResolved { incident_id: id });
            }
        }

        let settled = |source: &IncidentSource| {
            !busy.contains(source) && observations.source_recovered(source)
        };
        state.suppressed.retain(|source| !settled(source));
        state.auto_attempted.retain(|source| !settled(source));
    }

    fn open_incident(&self, state: &mut OrchestratorState, failure: DetectedFailure) -> IncidentId {
        let incident = Incident {
            id: IncidentId::new(),
            source: failure.source,
            title: failure.title,
            message: failure.message,
            category: failure.category,
            severity: failure.severity,
            created_at: Utc::now(),
            affected_components: failure.affected_components,
            status: IncidentStatus::Active,
        };
        let id = incident.id;

        tracing::warn!(
            incident = %id,
            source = %incident.source,
            category = %incident.category,
            severity = %incident.severity,
            message = %incident.message,
            "Incident opened"
        );

        self.schedule_auto_recovery(state, &incident);
        state.incidents.push(incident.clone());
        self.emit(RecoveryEvent::IncidentOpened { incident });
        id
    }

    /// One automatic attempt per source; after that the incident waits for
    /// a person
    fn schedule_auto_recovery(&self, state: &mut OrchestratorState, incident: &Incident) {
        if !state.auto_recovery || !incident.category.auto_recovery_eligible() {
            return;
        }
        let Some(strategy) = self.inner.registry.first_automated(incident.category) else {
            return;
        };
        if !state.auto_attempted.insert(incident.source.clone()) {
            tracing::debug!(
                incident = %incident.id,
                source = %incident.source,
                "Automatic recovery already tried for this source, leaving it to the user"
            );
            return;
        }

        let delay = self.inner.config.auto_recovery_delay();
        tracing::debug!(
            incident = %incident.id,
            strategy = %strategy.id,
            delay = %humantime::format_duration(delay),
            "Scheduling automatic recovery"
        );

        let task = self.auto_recover(incident.id, strategy.id);
        let timer = self.inner.timers.schedule_once(delay, task);
        state.auto_timers.insert(incident.id, timer);
    }

    fn auto_recover(&self, incident_id: IncidentId, strategy_id: StrategyId) -> BoxFuture<'static, ()> {
        let weak = Arc::downgrade(&self.inner);
        Box::pin(async move {
            let Some(orchestrator) = RecoveryOrchestrator::from_weak(&weak) else {
                return;
            };
            {
                let mut state = lock(&orchestrator.inner.state);
                state.auto_timers.remove(&incident_id);
                if !state.auto_recovery {
                    return;
                }
            }

            match orchestrator.run_attempt(incident_id, strategy_id, true).await {
                Ok(attempt) => tracing::info!(
                    incident = %incident_id,
                    strategy = %strategy_id,
                    status = ?attempt.status,
                    "Automatic recovery finished"
                ),
                Err(error) => tracing::debug!(
                    incident = %incident_id,
                    %error,
                    "Automatic recovery skipped"
                ),
            }
        })
    }

    /// Report a failure observed outside the monitored sources.
    ///
    /// Reports with the signature of an open incident return that incident.
    pub fn report_incident(&self, report: IncidentReport) -> IncidentId {
        let source = IncidentSource::External(report.signature.clone());
        let mut state = lock(&self.inner.state);

        if let Some(existing) = state.incidents.iter().find(|i| i.source == source) {
            tracing::debug!(incident = %existing.id, "Duplicate report, incident already open");
            return existing.id;
        }

        let signal = FailureSignal {
            message: Some(report.message.clone()),
            status: report.status,
        };
        let category = self.inner.classifier.classify_signal(&signal);
        let title = if report.title.is_empty() {
            category.title().to_string()
        } else {
            report.title
        };

        self.open_incident(
            &mut state,
            DetectedFailure {
                source,
                title,
                message: report.message,
                category,
                severity: IncidentSeverity::for_category(report.severity, category),
                affected_components: report.affected_components,
            },
        )
    }

    /// Run a strategy against an open incident.
    ///
    /// Returns the finished attempt; a strategy that ran and failed is an
    /// `Ok` attempt with status `Failed` and leaves the incident open.
    pub async fn execute_recovery(
        &self,
        incident_id: IncidentId,
        strategy_id: StrategyId,
    ) -> RecoveryResult<RecoveryAttempt> {
        self.run_attempt(incident_id, strategy_id, false).await
    }

    async fn run_attempt(
        &self,
        incident_id: IncidentId,
        strategy_id: StrategyId,
        automatic: bool,
    ) -> RecoveryResult<RecoveryAttempt> {
        let (incident, attempt) = {
            let mut state = lock(&self.inner.state);
            let incident = state
                .incident(incident_id)
                .cloned()
                .ok_or_else(|| RecoveryError::IncidentNotFound(incident_id.to_string()))?;

            if state.in_progress.contains(&incident_id) {
                return Err(RecoveryError::RecoveryInProgress(incident_id.to_string()));
            }
            if !self.inner.registry.applies_to(strategy_id, incident.category) {
                return Err(RecoveryError::StrategyNotApplicable {
                    strategy: strategy_id.to_string(),
                    category: incident.category.to_string(),
                });
            }

            state.in_progress.insert(incident_id);
            state.cancel_auto_recovery(incident_id);
            if let Some(open) = state.incident_mut(incident_id) {
                open.status = IncidentStatus::Recovering;
            }

            let attempt = RecoveryAttempt {
                id: AttemptId::new(),
                incident_id,
                strategy_id,
                automatic,
                started_at: Utc::now(),
                completed_at: None,
                status: AttemptStatus::InProgress,
                error: None,
            };
            if state.history.len() >= self.inner.config.history_limit {
                state.history.pop_front();
            }
            state.history.push_back(attempt.clone());
            (incident, attempt)
        };

        tracing::info!(
            incident = %incident_id,
            strategy = %strategy_id,
            automatic,
            "Recovery attempt started"
        );
        self.emit(RecoveryEvent::RecoveryStarted {
            attempt: attempt.clone(),
        });

        let result = self.perform(&incident, strategy_id).await;

        let mut finished = attempt;
        finished.completed_at = Some(Utc::now());
        match &result {
            Ok(()) => finished.status = AttemptStatus::Completed,
            Err(error) => {
                finished.status = AttemptStatus::Failed;
                finished.error = Some(error.to_string());
            }
        }

        let mut state = lock(&self.inner.state);
        state.in_progress.remove(&incident_id);
        if let Some(recorded) = state.history.iter_mut().find(|a| a.id == finished.id) {
            *recorded = finished.clone();
        }

        match result {
            Ok(()) => {
                tracing::info!(
                    incident = %incident_id,
                    strategy = %strategy_id,
                    "Recovery succeeded, incident resolved"
                );
                self.emit(RecoveryEvent::RecoveryFinished {
                    attempt: finished.clone(),
                });
                if state.take_incident(incident_id).is_some() {
                    // A signal only asks someone else to act; the source itself
                    // has not been re-checked yet
                    if matches!(strategy_id.action(), StrategyAction::Signal(_))
                        && !matches!(incident.source, IncidentSource::External(_))
                    {
                        state.suppressed.insert(incident.source.clone());
                    }
                    self.emit(RecoveryEvent::IncidentResolved { incident_id });
                }
            }
            Err(error) => {
                tracing::warn!(
                    incident = %incident_id,
                    strategy = %strategy_id,
                    %error,
                    "Recovery attempt failed"
                );
                if let Some(open) = state.incident_mut(incident_id) {
                    open.status = IncidentStatus::Active;
                }
                self.emit(RecoveryEvent::RecoveryFinished {
                    attempt: finished.clone(),
                });
            }
        }

        Ok(finished)
    }

    async fn perform(&self, incident: &Incident, strategy_id: StrategyId) -> RecoveryResult<()> {
        let (connection, components) = self.sources();
        let queue = &self.inner.queue;

        match (strategy_id.action(), &incident.source) {
            (StrategyAction::Signal(signal), _) => self.inner.signals.publish(signal).map(|_| ()),

            (_, IncidentSource::Component(name)) => reprobe(components, name).await,

            (StrategyAction::Reconnect, IncidentSource::QueueItem(id)) => {
                if let Some(connection) = connection {
                    connection.reconnect_now().await?;
                }
                queue.retry_item(*id)?;
                queue.wait_settled(*id).await
            }
            (StrategyAction::Reconnect, _) => {
                connection
                    .ok_or(RecoveryError::NoConnection)?
                    .reconnect_now()
                    .await
            }

            (StrategyAction::RetryOperation, IncidentSource::QueueItem(id)) => {
                queue.retry_item(*id)?;
                queue.wait_settled(*id).await
            }
            (StrategyAction::RetryOperation, IncidentSource::Connection(_)) => {
                connection
                    .ok_or(RecoveryError::NoConnection)?
                    .reconnect_now()
                    .await
            }
            (StrategyAction::RetryOperation, IncidentSource::External(_)) => {
                queue.retry_failed();
                Ok(())
            }
        }
    }

    /// Close an incident without recovering it. Its source is not reported
    /// again until it recovers. Returns whether the incident was open.
    pub fn dismiss_incident(&self, incident_id: IncidentId) -> bool {
        let mut state = lock(&self.inner.state);
        let Some(mut incident) = state.take_incident(incident_id) else {
            return false;
        };
        incident.status = IncidentStatus::Dismissed;
        state.cancel_auto_recovery(incident_id);
        if !matches!(incident.source, IncidentSource::External(_)) {
            state.suppressed.insert(incident.source.clone());
        }

        tracing::info!(incident = %incident_id, source = %incident.source, "Incident dismissed");
        self.emit(RecoveryEvent::IncidentDismissed { incident_id });
        true
    }

    /// Turning auto-recovery off cancels every pending automatic attempt
    pub fn set_auto_recovery(&self, enabled: bool) {
        let mut state = lock(&self.inner.state);
        state.auto_recovery = enabled;
        if !enabled {
            for (_, timer) in state.auto_timers.drain() {
                timer.cancel();
            }
        }
        tracing::info!(enabled, "Auto-recovery toggled");
    }

    pub fn auto_recovery_enabled(&self) -> bool {
        lock(&self.inner.state).auto_recovery
    }

    /// Strategies applicable to an open incident, best first
    pub fn available_strategies(
        &self,
        incident_id: IncidentId,
    ) -> RecoveryResult<Vec<RecoveryStrategy>> {
        let state = lock(&self.inner.state);
        let incident = state
            .incident(incident_id)
            .ok_or_else(|| RecoveryError::IncidentNotFound(incident_id.to_string()))?;
        Ok(self.inner.registry.strategies_for(incident.category).to_vec())
    }

    pub fn active_incidents(&self) -> Vec<Incident> {
        lock(&self.inner.state).incidents.clone()
    }

    pub fn incident(&self, incident_id: IncidentId) -> Option<Incident> {
        lock(&self.inner.state).incident(incident_id).cloned()
    }

    /// Recovery attempts, oldest first
    pub fn recovery_history(&self) -> Vec<RecoveryAttempt> {
        lock(&self.inner.state).history.iter().cloned().collect()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.inner.queue.status_summary()
    }

    pub fn connection_status(&self) -> Option<ConnectionSnapshot> {
        self.sources().0.map(|monitor| monitor.snapshot())
    }

    pub fn component_health(&self) -> Vec<ComponentHealth> {
        self.sources()
            .1
            .map(|monitor| monitor.statuses())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        let (running, auto_recovery, incidents, recent_attempts) = {
            let state = lock(&self.inner.state);
            (
                state.running,
                state.auto_recovery,
                state.incidents.clone(),
                state.history.iter().cloned().collect(),
            )
        };

        OrchestratorSnapshot {
            taken_at: Utc::now(),
            running,
            auto_recovery,
            incidents,
            queue: self.queue_status(),
            connection: self.connection_status(),
            components: self.component_health(),
            recent_attempts,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.inner.events.subscribe()
    }
}

impl fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("RecoveryOrchestrator")
            .field("running", &state.running)
            .field("auto_recovery", &state.auto_recovery)
            .field("incidents", &state.incidents.len())
            .finish()
    }
}

async fn reprobe(components: Option<ComponentHealthMonitor>, name: &str) -> RecoveryResult<()> {
    let monitor = components.ok_or_else(|| RecoveryError::UnknownComponent(name.to_string()))?;
    let health = monitor.check_now(name).await?;
    if health.status.is_failing() {
        Err(RecoveryError::StillFailing(format!(
            "component {} is {}",
            name, health.status
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::recovery::{QueuedOperation, RetryConfig};
    use crate::signals::RecoverySignal;
    use std::time::Duration;

    fn orchestrator(auto_recovery: bool) -> (RecoveryOrchestrator, RetryQueue, SignalBus) {
        let queue = RetryQueue::new(&QueueConfig::default());
        let signals = SignalBus::new();
        let config = OrchestratorConfig {
            auto_recovery,
            ..OrchestratorConfig::default()
        };
        let orchestrator = RecoveryOrchestrator::new(&config, queue.clone(), signals.clone());
        (orchestrator, queue, signals)
    }

    fn always_failing(message: &'static str) -> QueuedOperation {
        QueuedOperation::new("sync", move || async move {
            Err::<(), _>(anyhow::anyhow!(message))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_queue_item_opens_one_incident() {
        let (orchestrator, queue, _signals) = orchestrator(false);
        queue
            .enqueue(always_failing("503 service unavailable"), RetryConfig::new(3))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let opened = orchestrator.detect_failures();
        assert_eq!(opened.len(), 1);
        assert!(orchestrator.detect_failures().is_empty());

        let incidents = orchestrator.active_incidents();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].category, ErrorCategory::ServerError);
        assert_eq!(incidents[0].severity, IncidentSeverity::High);
        assert_eq!(incidents[0].status, IncidentStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_incident_is_critical_and_not_automated() {
        let (orchestrator, queue, signals) = orchestrator(true);
        let mut received = signals.subscribe();
        queue
            .enqueue(always_failing("401 unauthorized"), RetryConfig::new(1))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        orchestrator.detect_failures();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let incidents = orchestrator.active_incidents();
        assert_eq!(incidents[0].category, ErrorCategory::Authentication);
        assert_eq!(incidents[0].severity, IncidentSeverity::Critical);
        assert!(orchestrator.recovery_history().is_empty());
        assert!(received.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_signal_strategy_resolves_incident() {
        let (orchestrator, _queue, signals) = orchestrator(false);
        let mut received = signals.subscribe();
        let id = orchestrator.report_incident(IncidentReport::new("session", "token expired"));

        let attempt = orchestrator
            .execute_recovery(id, StrategyId::RefreshToken)
            .await
            .unwrap();

        assert_eq!(attempt.status, AttemptStatus::Completed);
        assert!(!attempt.automatic);
        assert_eq!(received.try_recv().unwrap(), RecoverySignal::RefreshToken);
        assert!(orchestrator.active_incidents().is_empty());
        assert_eq!(orchestrator.recovery_history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undelivered_signal_fails_attempt() {
        let (orchestrator, _queue, _signals) = orchestrator(false);
        let id = orchestrator.report_incident(IncidentReport::new("session", "token expired"));

        let attempt = orchestrator
            .execute_recovery(id, StrategyId::RefreshToken)
            .await
            .unwrap();

        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert!(attempt.error.unwrap().contains("refreshToken"));
        let incident = orchestrator.incident(id).unwrap();
        assert_eq!(incident.status, IncidentStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategy_must_apply_to_category() {
        let (orchestrator, _queue, _signals) = orchestrator(false);
        let id = orchestrator.report_incident(IncidentReport::new("session", "token expired"));

        let result = orchestrator
            .execute_recovery(id, StrategyId::ReduceRequestRate)
            .await;
        assert!(matches!(
            result,
            Err(RecoveryError::StrategyNotApplicable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_incident() {
        let (orchestrator, _queue, _signals) = orchestrator(false);
        let id = orchestrator.report_incident(IncidentReport::new("x", "network down"));
        assert!(orchestrator.dismiss_incident(id));

        let result = orchestrator
            .execute_recovery(id, StrategyId::RetryConnection)
            .await;
        assert!(matches!(result, Err(RecoveryError::IncidentNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_is_idempotent() {
        let (orchestrator, _queue, _signals) = orchestrator(false);
        let mut events = orchestrator.subscribe();
        let id = orchestrator.report_incident(IncidentReport::new("x", "network down"));

        assert!(orchestrator.dismiss_incident(id));
        assert!(!orchestrator.dismiss_incident(id));
        assert!(orchestrator.active_incidents().is_empty());

        assert!(matches!(
            events.try_recv().unwrap(),
            RecoveryEvent::IncidentOpened { .. }
        ));
        assert_eq!(
            events.try_recv().unwrap(),
            RecoveryEvent::IncidentDismissed { incident_id: id }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_reports_share_incident() {
        let (orchestrator, _queue, _signals) = orchestrator(false);
        let first = orchestrator.report_incident(IncidentReport::new("checkout", "500 error"));
        let second = orchestrator.report_incident(IncidentReport::new("checkout", "502 again"));
        assert_eq!(first, second);
        assert_eq!(orchestrator.active_incidents().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_status_code_wins_over_message() {
        let (orchestrator, _queue, _signals) = orchestrator(false);
        let id = orchestrator.report_incident(
            IncidentReport::new("profile", "request failed").with_status(429),
        );
        let incident = orchestrator.incident(id).unwrap();
        assert_eq!(incident.category, ErrorCategory::RateLimiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismissed_queue_failure_stays_suppressed() {
        let (orchestrator, queue, _signals) = orchestrator(false);
        queue
            .enqueue(always_failing("timeout"), RetryConfig::new(1))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let id = orchestrator.detect_failures()[0];
        orchestrator.dismiss_incident(id);
        assert!(orchestrator.detect_failures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incident_resolves_when_item_cleared() {
        let (orchestrator, queue, _signals) = orchestrator(false);
        let mut events = orchestrator.subscribe();
        queue
            .enqueue(always_failing("timeout"), RetryConfig::new(1))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let id = orchestrator.detect_failures()[0];

        queue.clear_failed();
        orchestrator.detect_failures();

        assert!(orchestrator.active_incidents().is_empty());
        let _opened = events.try_recv().unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            RecoveryEvent::IncidentResolved { incident_id: id }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let queue = RetryQueue::default();
        let signals = SignalBus::new();
        let _receiver = signals.subscribe();
        let config = OrchestratorConfig {
            auto_recovery: false,
            history_limit: 3,
            ..OrchestratorConfig::default()
        };
        let orchestrator = RecoveryOrchestrator::new(&config, queue, signals);

        for n in 0..5 {
            let id = orchestrator.report_incident(IncidentReport::new(
                format!("perf-{}", n),
                "app is slow",
            ));
            orchestrator
                .execute_recovery(id, StrategyId::ClearCache)
                .await
                .unwrap();
        }

        assert_eq!(orchestrator.recovery_history().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_auto_recovery() {
        let (orchestrator, _queue, signals) = orchestrator(true);
        let mut received = signals.subscribe();
        orchestrator.start();
        orchestrator.report_incident(IncidentReport::new("render", "ui is slow"));

        orchestrator.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(received.try_recv().is_err());
        assert!(orchestrator.recovery_history().is_empty());
        assert!(!orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_serializes() {
        let (orchestrator, _queue, _signals) = orchestrator(false);
        orchestrator.report_incident(IncidentReport::new("x", "network down"));

        let json = serde_json::to_value(orchestrator.snapshot()).unwrap();
        assert_eq!(json["incidents"][0]["category"], "network");
        assert_eq!(json["incidents"][0]["source"]["kind"], "external");
        assert_eq!(json["queue"]["total"], 0);
        assert!(json["connection"].is_null());
    }
}
