/// Periodic health probes of named components
///
/// Each registered [`ComponentSpec`] is probed on its own interval through a
/// shared [`HealthProbe`]. A probe's latency relative to its timeout and the
/// run of consecutive failures decide the component's status.
use crate::config::ComponentHealthConfig;
use crate::timer::{TimerHandle, TimerSet};
use crate::{lock, RecoveryError, RecoveryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Issues one health request
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Check the component at `path`. The monitor enforces `timeout` as well.
    async fn check(&self, path: &str, timeout: Duration) -> anyhow::Result<()>;
}

/// Component to probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub path: String,
    #[serde(with = "duration_text")]
    pub timeout: Duration,
    #[serde(with = "duration_text")]
    pub check_interval: Duration,

    /// Components this one needs to work
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(30),
            dependencies: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// A component needs a non-zero probe timeout and check interval
    pub fn validate(&self) -> RecoveryResult<()> {
        if self.timeout.is_zero() || self.check_interval.is_zero() {
            return Err(RecoveryError::Config(format!(
                "component {}: timeout and check_interval must be non-zero",
                self.name
            )));
        }
        Ok(())
    }
}

/// Durations in component specs are written like `"5s"` or `"250ms"`
mod duration_text {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Critical,
    Offline,
    Unknown,
}

impl ComponentStatus {
    /// Critical and offline components are failures worth an incident
    pub fn is_failing(&self) -> bool {
        matches!(self, ComponentStatus::Critical | ComponentStatus::Offline)
    }

    fn rank(&self) -> u8 {
        match self {
            ComponentStatus::Healthy => 0,
            ComponentStatus::Unknown => 1,
            ComponentStatus::Degraded => 2,
            ComponentStatus::Critical => 3,
            ComponentStatus::Offline => 4,
        }
    }

    /// Status from a successful probe's latency
    pub fn from_latency(
        latency: Duration,
        timeout: Duration,
        config: &ComponentHealthConfig,
    ) -> ComponentStatus {
        let ratio = latency.as_secs_f64() / timeout.as_secs_f64().max(f64::EPSILON);
        if ratio > config.critical_latency_ratio {
            ComponentStatus::Critical
        } else if ratio > config.degraded_latency_ratio {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }

    /// Status after `consecutive_failures` failed probes in a row
    pub fn from_failures(consecutive_failures: u32, config: &ComponentHealthConfig) -> ComponentStatus {
        if consecutive_failures >= config.offline_after_failures {
            ComponentStatus::Offline
        } else if consecutive_failures >= config.critical_after_failures {
            ComponentStatus::Critical
        } else {
            ComponentStatus::Degraded
        }
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Critical => "critical",
            ComponentStatus::Offline => "offline",
            ComponentStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Latest health of one component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: ComponentStatus,
    pub latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub dependencies: Vec<String>,
}

struct ComponentEntry {
    spec: ComponentSpec,
    health: ComponentHealth,
    timer: Option<TimerHandle>,
}

struct ComponentsState {
    /// Registration order
    entries: Vec<ComponentEntry>,
    running: bool,
}

impl ComponentsState {
    fn find(&self, name: &str) -> Option<&ComponentEntry> {
        self.entries.iter().find(|entry| entry.spec.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut ComponentEntry> {
        self.entries.iter_mut().find(|entry| entry.spec.name == name)
    }
}

struct ComponentsInner {
    probe: Arc<dyn HealthProbe>,
    config: ComponentHealthConfig,
    state: Mutex<ComponentsState>,
    events: broadcast::Sender<ComponentHealth>,
    timers: TimerSet,
}

/// Health monitor for a set of components. Cloning shares the monitor.
#[derive(Clone)]
pub struct ComponentHealthMonitor {
    inner: Arc<ComponentsInner>,
}

impl ComponentHealthMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>, config: &ComponentHealthConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ComponentsInner {
                probe,
                config: config.clone(),
                state: Mutex::new(ComponentsState {
                    entries: Vec::new(),
                    running: false,
                }),
                events,
                timers: TimerSet::new("component_health"),
            }),
        }
    }

    /// Add a component, replacing any registration with the same name.
    /// Starts probing it right away if the monitor is running.
    pub fn register(&self, spec: ComponentSpec) -> RecoveryResult<()> {
        spec.validate()?;
        let mut state = lock(&self.inner.state);
        let health = ComponentHealth {
            name: spec.name.clone(),
            status: ComponentStatus::Unknown,
            latency_ms: None,
            consecutive_failures: 0,
            last_checked_at: None,
            last_error: None,
            dependencies: spec.dependencies.clone(),
        };

        let timer = state.running.then(|| self.schedule_checks(&spec));

        if let Some(entry) = state.find_mut(&spec.name) {
            if let Some(old) = entry.timer.take() {
                old.cancel();
            }
            tracing::debug!(component = %spec.name, "Component re-registered");
            *entry = ComponentEntry { spec, health, timer };
        } else {
            tracing::debug!(component = %spec.name, path = %spec.path, "Component registered");
            state.entries.push(ComponentEntry { spec, health, timer });
        }
        Ok(())
    }

    /// Stop probing and forget a component. Returns whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let mut state = lock(&self.inner.state);
        let Some(index) = state.entries.iter().position(|e| e.spec.name == name) else {
            return false;
        };
        let entry = state.entries.remove(index);
        if let Some(timer) = entry.timer {
            timer.cancel();
        }
        true
    }

    /// Begin periodic probing of every registered component
    pub fn start(&self) {
        let mut state = lock(&self.inner.state);
        if state.running {
            return;
        }
        state.running = true;
        for entry in state.entries.iter_mut() {
            entry.timer = Some(self.schedule_checks(&entry.spec));
        }
        tracing::info!(components = state.entries.len(), "Component health monitor started");
    }

    fn schedule_checks(&self, spec: &ComponentSpec) -> TimerHandle {
        let weak: Weak<ComponentsInner> = Arc::downgrade(&self.inner);
        let name = spec.name.clone();
        self.inner
            .timers
            .schedule_interval(spec.check_interval, move || {
                let monitor = weak.upgrade().map(|inner| ComponentHealthMonitor { inner });
                let name = name.clone();
                async move {
                    if let Some(monitor) = monitor {
                        if let Err(error) = monitor.check_now(&name).await {
                            tracing::debug!(component = %name, %error, "Scheduled check skipped");
                        }
                    }
                }
            })
    }

    /// Probe one component immediately
    pub async fn check_now(&self, name: &str) -> RecoveryResult<ComponentHealth> {
        let spec = lock(&self.inner.state)
            .find(name)
            .map(|entry| entry.spec.clone())
            .ok_or_else(|| RecoveryError::UnknownComponent(name.to_string()))?;

        let started = Instant::now();
        let result = timeout(spec.timeout, self.inner.probe.check(&spec.path, spec.timeout)).await;
        let latency = started.elapsed();

        let mut state = lock(&self.inner.state);
        let entry = state
            .find_mut(name)
            .ok_or_else(|| RecoveryError::UnknownComponent(name.to_string()))?;
        let health = &mut entry.health;
        let previous = health.status;

        health.last_checked_at = Some(Utc::now());
        match result {
            Ok(Ok(())) => {
                health.consecutive_failures = 0;
                health.latency_ms = Some(latency.as_millis() as u64);
                health.last_error = None;
                health.status = ComponentStatus::from_latency(latency, spec.timeout, &self.inner.config);
            }
            Ok(Err(error)) => {
                health.consecutive_failures += 1;
                health.last_error = Some(format!("{:#}", error));
                health.status =
                    ComponentStatus::from_failures(health.consecutive_failures, &self.inner.config);
            }
            Err(_) => {
                health.consecutive_failures += 1;
                health.last_error = Some(format!(
                    "health check timed out after {}",
                    humantime::format_duration(spec.timeout)
                ));
                health.status =
                    ComponentStatus::from_failures(health.consecutive_failures, &self.inner.config);
            }
        }

        let health = health.clone();
        if health.status != previous {
            if health.status.is_failing() {
                tracing::warn!(
                    component = %name,
                    from = %previous,
                    to = %health.status,
                    failures = health.consecutive_failures,
                    "Component health changed"
                );
            } else {
                tracing::info!(
                    component = %name,
                    from = %previous,
                    to = %health.status,
                    "Component health changed"
                );
            }
            let _ = self.inner.events.send(health.clone());
        }

        Ok(health)
    }

    /// Probe every component once, in registration order
    pub async fn check_all(&self) -> Vec<ComponentHealth> {
        let names: Vec<String> = lock(&self.inner.state)
            .entries
            .iter()
            .map(|entry| entry.spec.name.clone())
            .collect();

        let mut results = Vec::with_capacity(names.len());
        for name in names {
            if let Ok(health) = self.check_now(&name).await {
                results.push(health);
            }
        }
        results
    }

    /// `name` followed by every component that depends on it, directly or
    /// transitively, in registration order
    pub fn affected_components(&self, name: &str) -> Vec<String> {
        let state = lock(&self.inner.state);
        let mut affected: HashSet<&str> = HashSet::new();
        affected.insert(name);

        loop {
            let before = affected.len();
            for entry in &state.entries {
                if entry
                    .spec
                    .dependencies
                    .iter()
                    .any(|dep| affected.contains(dep.as_str()))
                {
                    affected.insert(entry.spec.name.as_str());
                }
            }
            if affected.len() == before {
                break;
            }
        }

        let mut ordered = vec![name.to_string()];
        ordered.extend(
            state
                .entries
                .iter()
                .map(|entry| entry.spec.name.as_str())
                .filter(|n| *n != name && affected.contains(n))
                .map(str::to_string),
        );
        ordered
    }

    pub fn get(&self, name: &str) -> Option<ComponentHealth> {
        lock(&self.inner.state).find(name).map(|entry| entry.health.clone())
    }

    /// Health of every component in registration order
    pub fn statuses(&self) -> Vec<ComponentHealth> {
        lock(&self.inner.state)
            .entries
            .iter()
            .map(|entry| entry.health.clone())
            .collect()
    }

    /// Worst status across all components; healthy when none are registered
    pub fn overall_status(&self) -> ComponentStatus {
        lock(&self.inner.state)
            .entries
            .iter()
            .map(|entry| entry.health.status)
            .max_by_key(ComponentStatus::rank)
            .unwrap_or(ComponentStatus::Healthy)
    }

    /// Status changes
    pub fn subscribe(&self) -> broadcast::Receiver<ComponentHealth> {
        self.inner.events.subscribe()
    }

    pub fn shutdown(&self) {
        let mut state = lock(&self.inner.state);
        state.running = false;
        for entry in state.entries.iter_mut() {
            entry.timer = None;
        }
        self.inner.timers.cancel_all();
        tracing::debug!("Component health monitor shut down");
    }
}

impl fmt::Debug for ComponentHealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHealthMonitor")
            .field("components", &lock(&self.inner.state).entries.len())
            .finish()
    }
}
