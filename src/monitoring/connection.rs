/// Connection health monitoring with auto-reconnect
///
/// One [`ConnectionMonitor`] watches one logical connection. The owner of the
/// underlying socket reports what it observes through
/// [`ConnectionMonitor::handle_event`]; the monitor runs the handshake,
/// periodic liveness probes and reconnect cycles through the
/// [`ConnectionTransport`] it was given.
///
/// ```text
///              ┌───────────── fault (any state) ─────────────┐
///              ↓                                              │
///   Connecting ──ok──> Connected ──clean close──> Disconnected
///       ↑                  │
///       │           unexpected close
///       │                  ↓
///       └──backoff── Reconnecting / Error
/// ```
use crate::config::ConnectionConfig;
use crate::recovery::ExponentialBackoff;
use crate::timer::{TimerHandle, TimerSet};
use crate::{lock, RecoveryError, RecoveryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};

/// Consecutive failed liveness probes treated as a transport fault
const MAX_MISSED_PROBES: u32 = 2;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Transport driven by the monitor
#[async_trait]
pub trait ConnectionTransport: Send + Sync {
    /// Open the connection and complete the handshake
    async fn connect(&self) -> anyhow::Result<()>;

    /// Round-trip a liveness probe
    async fn ping(&self) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Observation reported by the connection owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection closed; `clean` when the close was negotiated
    Closed { clean: bool },

    /// Transport-level error
    Fault(String),

    /// Application message received
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    /// Whether the state machine has an edge from `self` to `next`
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (current, Error) => *current != Error,
            (Connecting, Connected) | (Connecting, Disconnected) => true,
            (Connected, Disconnected) | (Connected, Reconnecting) => true,
            (Reconnecting, Connecting) | (Reconnecting, Disconnected) => true,
            (Error, Connecting) | (Error, Disconnected) => true,
            (Disconnected, Connecting) => true,
            _ => false,
        }
    }

    /// Checked transition
    pub fn transition(self, next: ConnectionState) -> RecoveryResult<ConnectionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(RecoveryError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// States in which a reconnect timer may be pending
    fn awaits_reconnect(&self) -> bool {
        matches!(self, ConnectionState::Reconnecting | ConnectionState::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Good,
    Fair,
    Poor,
}

impl ConnectionQuality {
    pub fn assess(latency: Option<Duration>, error_rate: f64) -> ConnectionQuality {
        let latency_ms = latency.map(|l| l.as_millis()).unwrap_or(0);

        if latency_ms > 1000 || error_rate > 0.10 {
            ConnectionQuality::Poor
        } else if latency_ms > 500 || error_rate > 0.05 {
            ConnectionQuality::Fair
        } else {
            ConnectionQuality::Good
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionMetrics {
    /// Last measured probe round-trip
    pub latency_ms: Option<u64>,
    pub message_count: u64,
    pub probe_count: u64,
    pub error_count: u64,
    pub reconnect_attempts: u32,
    pub quality: ConnectionQuality,
    pub connected_at: Option<DateTime<Utc>>,
}

impl ConnectionMetrics {
    /// Errors over all observed exchanges
    pub fn error_rate(&self) -> f64 {
        let total = self.message_count + self.probe_count + self.error_count;
        if total == 0 {
            0.0
        } else {
            self.error_count as f64 / total as f64
        }
    }

    fn refresh_quality(&mut self) {
        let latency = self.latency_ms.map(Duration::from_millis);
        self.quality = ConnectionQuality::assess(latency, self.error_rate());
    }
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self {
            latency_ms: None,
            message_count: 0,
            probe_count: 0,
            error_count: 0,
            reconnect_attempts: 0,
            quality: ConnectionQuality::Good,
            connected_at: None,
        }
    }
}

/// Recorded state transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub connection: String,
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of a monitored connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub name: String,
    pub state: ConnectionState,
    pub auto_reconnect: bool,
    /// The connection was closed on request and should not be treated as a failure
    pub closed_by_user: bool,
    pub last_error: Option<String>,
    pub metrics: ConnectionMetrics,
}

struct ConnectionData {
    state: ConnectionState,
    auto_reconnect: bool,
    closed_by_user: bool,
    last_error: Option<String>,
    metrics: ConnectionMetrics,
    missed_probes: u32,
    history: VecDeque<StateChange>,
    /// Bumped whenever in-flight work must be discarded
    generation: u64,
    reconnect_timer: Option<TimerHandle>,
    probe_timer: Option<TimerHandle>,
}

impl ConnectionData {
    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
    }

    fn cancel_probes(&mut self) {
        if let Some(timer) = self.probe_timer.take() {
            timer.cancel();
        }
    }
}

struct ConnectionInner {
    name: String,
    transport: Arc<dyn ConnectionTransport>,
    config: ConnectionConfig,
    backoff: ExponentialBackoff,
    data: Mutex<ConnectionData>,
    events: broadcast::Sender<StateChange>,
    timers: TimerSet,
}

/// Health monitor for one logical connection. Cloning shares the monitor.
#[derive(Clone)]
pub struct ConnectionMonitor {
    inner: Arc<ConnectionInner>,
}

impl ConnectionMonitor {
    /// Fails with `RecoveryError::Config` when `config` has a zero interval
    /// or timeout
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn ConnectionTransport>,
        config: &ConnectionConfig,
    ) -> RecoveryResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let backoff =
            ExponentialBackoff::new(config.reconnect_base_delay(), config.reconnect_max_delay());

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                name: name.into(),
                transport,
                config: config.clone(),
                backoff,
                data: Mutex::new(ConnectionData {
                    state: ConnectionState::Connecting,
                    auto_reconnect: config.auto_reconnect,
                    closed_by_user: false,
                    last_error: None,
                    metrics: ConnectionMetrics::default(),
                    missed_probes: 0,
                    history: VecDeque::new(),
                    generation: 0,
                    reconnect_timer: None,
                    probe_timer: None,
                }),
                events,
                timers: TimerSet::new("connection_monitor"),
            }),
        })
    }

    fn from_weak(weak: &Weak<ConnectionInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run the initial handshake. The monitor starts in `Connecting`.
    pub async fn start(&self) {
        tracing::info!(connection = %self.inner.name, "Starting connection monitor");
        self.connect_cycle().await;
    }

    /// One handshake attempt from the `Connecting` state
    fn connect_cycle(&self) -> BoxFuture<'static, ()> {
        let monitor = self.clone();
        Box::pin(async move {
            let generation = {
                let data = lock(&monitor.inner.data);
                if data.state != ConnectionState::Connecting {
                    return;
                }
                data.generation
            };

            let handshake_timeout = monitor.inner.config.handshake_timeout();
            let result = timeout(handshake_timeout, monitor.inner.transport.connect()).await;

            let mut data = lock(&monitor.inner.data);
            if data.generation != generation || data.state != ConnectionState::Connecting {
                tracing::debug!(
                    connection = %monitor.inner.name,
                    "Handshake result discarded, connection changed meanwhile"
                );
                return;
            }

            match result {
                Ok(Ok(())) => monitor.on_connected(&mut data),
                Ok(Err(error)) => monitor.on_fault(&mut data, format!("{:#}", error)),
                Err(_) => monitor.on_fault(
                    &mut data,
                    format!(
                        "handshake timed out after {}",
                        humantime::format_duration(handshake_timeout)
                    ),
                ),
            }
        })
    }

    fn on_connected(&self, data: &mut ConnectionData) {
        data.metrics.reconnect_attempts = 0;
        data.metrics.error_count = 0;
        data.metrics.connected_at = Some(Utc::now());
        data.metrics.refresh_quality();
        data.missed_probes = 0;
        data.last_error = None;
        self.transition(data, ConnectionState::Connected, "handshake completed");

        data.cancel_probes();
        let weak = Arc::downgrade(&self.inner);
        let generation = data.generation;
        data.probe_timer = Some(self.inner.timers.schedule_interval(
            self.inner.config.ping_interval(),
            move || {
                let monitor = ConnectionMonitor::from_weak(&weak);
                async move {
                    if let Some(monitor) = monitor {
                        monitor.probe_liveness(generation).await;
                    }
                }
            },
        ));
    }

    /// Transport fault: move to `Error` and schedule a reconnect if allowed
    fn on_fault(&self, data: &mut ConnectionData, message: String) {
        data.metrics.error_count += 1;
        data.metrics.refresh_quality();
        data.cancel_probes();

        tracing::error!(
            connection = %self.inner.name,
            error = %message,
            "Connection fault"
        );
        data.last_error = Some(message.clone());
        self.transition(data, ConnectionState::Error, &message);

        if data.auto_reconnect {
            self.schedule_reconnect(data);
        }
    }

    fn schedule_reconnect(&self, data: &mut ConnectionData) {
        let attempts = data.metrics.reconnect_attempts;
        if let Some(max) = self.inner.config.max_reconnect_attempts {
            if attempts >= max {
                tracing::warn!(
                    connection = %self.inner.name,
                    attempts,
                    "Reconnect attempts exhausted, giving up"
                );
                return;
            }
        }

        let delay = self.inner.backoff.delay_for(attempts);
        data.metrics.reconnect_attempts = attempts + 1;

        tracing::info!(
            connection = %self.inner.name,
            attempt = attempts + 1,
            delay = %humantime::format_duration(delay),
            "Scheduling reconnect"
        );

        data.cancel_reconnect();
        let task = self.reconnect_when_due(data.generation);
        data.reconnect_timer = Some(self.inner.timers.schedule_once(delay, task));
    }

    fn reconnect_when_due(&self, generation: u64) -> BoxFuture<'static, ()> {
        let weak = Arc::downgrade(&self.inner);
        Box::pin(async move {
            let Some(monitor) = ConnectionMonitor::from_weak(&weak) else {
                return;
            };
            {
                let mut data = lock(&monitor.inner.data);
                if data.generation != generation || !data.state.awaits_reconnect() {
                    return;
                }
                data.reconnect_timer = None;
                monitor.transition(&mut data, ConnectionState::Connecting, "reconnect delay elapsed");
            }
            monitor.connect_cycle().await;
        })
    }

    async fn probe_liveness(&self, generation: u64) {
        {
            let data = lock(&self.inner.data);
            if data.generation != generation || data.state != ConnectionState::Connected {
                return;
            }
        }

        let probe_timeout = self.inner.config.ping_timeout();
        let started = Instant::now();
        let result = timeout(probe_timeout, self.inner.transport.ping()).await;
        let latency = started.elapsed();

        let mut data = lock(&self.inner.data);
        if data.generation != generation || data.state != ConnectionState::Connected {
            return;
        }

        let failure = match result {
            Ok(Ok(())) => {
                data.missed_probes = 0;
                data.metrics.probe_count += 1;
                data.metrics.latency_ms = Some(latency.as_millis() as u64);
                data.metrics.refresh_quality();
                tracing::trace!(
                    connection = %self.inner.name,
                    latency_ms = latency.as_millis() as u64,
                    "Liveness probe succeeded"
                );
                return;
            }
            Ok(Err(error)) => format!("liveness probe failed: {:#}", error),
            Err(_) => format!(
                "liveness probe timed out after {}",
                humantime::format_duration(probe_timeout)
            ),
        };

        data.missed_probes += 1;
        if data.missed_probes >= MAX_MISSED_PROBES {
            self.on_fault(&mut data, failure);
        } else {
            data.metrics.error_count += 1;
            data.metrics.refresh_quality();
            tracing::warn!(
                connection = %self.inner.name,
                missed = data.missed_probes,
                error = %failure,
                "Liveness probe missed"
            );
        }
    }

    /// Apply an observation from the connection owner
    pub fn handle_event(&self, event: TransportEvent) {
        let mut data = lock(&self.inner.data);
        if data.closed_by_user {
            tracing::debug!(
                connection = %self.inner.name,
                ?event,
                "Ignoring event on closed connection"
            );
            return;
        }

        match event {
            TransportEvent::Message => {
                data.metrics.message_count += 1;
                data.metrics.refresh_quality();
            }
            TransportEvent::Fault(message) => self.on_fault(&mut data, message),
            TransportEvent::Closed { clean } => {
                if data.state != ConnectionState::Connected {
                    return;
                }
                data.cancel_probes();
                data.generation += 1;

                if clean {
                    self.transition(&mut data, ConnectionState::Disconnected, "closed cleanly");
                } else if data.auto_reconnect {
                    self.transition(&mut data, ConnectionState::Reconnecting, "closed unexpectedly");
                    self.schedule_reconnect(&mut data);
                } else {
                    data.last_error = Some("connection closed unexpectedly".to_string());
                    self.transition(&mut data, ConnectionState::Disconnected, "closed unexpectedly");
                }
            }
        }
    }

    /// Close the connection on request. Cancels any pending reconnect.
    pub async fn disconnect(&self) {
        {
            let mut data = lock(&self.inner.data);
            data.cancel_reconnect();
            data.cancel_probes();
            data.generation += 1;
            data.closed_by_user = true;
            self.transition(&mut data, ConnectionState::Disconnected, "disconnect requested");
        }

        if let Err(error) = self.inner.transport.close().await {
            tracing::warn!(
                connection = %self.inner.name,
                error = %format!("{:#}", error),
                "Transport close failed"
            );
        }
    }

    /// Turning auto-reconnect off cancels a pending reconnect
    pub fn set_auto_reconnect(&self, enabled: bool) {
        let mut data = lock(&self.inner.data);
        data.auto_reconnect = enabled;
        tracing::info!(connection = %self.inner.name, enabled, "Auto-reconnect toggled");

        if !enabled {
            data.cancel_reconnect();
            if data.state == ConnectionState::Reconnecting {
                self.transition(
                    &mut data,
                    ConnectionState::Disconnected,
                    "auto-reconnect disabled",
                );
            }
        }
    }

    /// Reconnect immediately, skipping any backoff delay.
    ///
    /// Succeeds when the connection ends up connected.
    pub async fn reconnect_now(&self) -> RecoveryResult<()> {
        {
            let mut data = lock(&self.inner.data);
            if data.state == ConnectionState::Connected {
                return Ok(());
            }
            data.cancel_reconnect();
            data.closed_by_user = false;
            data.generation += 1;
            if data.state != ConnectionState::Connecting {
                self.transition(&mut data, ConnectionState::Connecting, "manual reconnect");
            }
        }

        tracing::info!(connection = %self.inner.name, "Reconnecting now");
        self.connect_cycle().await;

        let data = lock(&self.inner.data);
        if data.state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(RecoveryError::ConnectionFailed(
                data.last_error
                    .clone()
                    .unwrap_or_else(|| format!("connection is {}", data.state)),
            ))
        }
    }

    fn transition(&self, data: &mut ConnectionData, to: ConnectionState, reason: &str) {
        let from = data.state;
        if from == to {
            return;
        }
        if let Err(error) = from.transition(to) {
            tracing::warn!(connection = %self.inner.name, %error, "Transition rejected");
            return;
        }

        data.state = to;
        tracing::info!(
            connection = %self.inner.name,
            %from,
            %to,
            reason,
            "Connection state changed"
        );

        let change = StateChange {
            connection: self.inner.name.clone(),
            from,
            to,
            reason: reason.to_string(),
            at: Utc::now(),
        };
        if data.history.len() >= self.inner.config.history_limit {
            data.history.pop_front();
        }
        data.history.push_back(change.clone());

        // No receivers is fine
        let _ = self.inner.events.send(change);
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.data).state
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let data = lock(&self.inner.data);
        ConnectionSnapshot {
            name: self.inner.name.clone(),
            state: data.state,
            auto_reconnect: data.auto_reconnect,
            closed_by_user: data.closed_by_user,
            last_error: data.last_error.clone(),
            metrics: data.metrics.clone(),
        }
    }

    /// Recent transitions, oldest first
    pub fn history(&self) -> Vec<StateChange> {
        lock(&self.inner.data).history.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.inner.events.subscribe()
    }

    /// Stop probing and reconnecting. The state is left as is.
    pub fn shutdown(&self) {
        let mut data = lock(&self.inner.data);
        data.reconnect_timer = None;
        data.probe_timer = None;
        data.generation += 1;
        self.inner.timers.cancel_all();
        tracing::debug!(connection = %self.inner.name, "Connection monitor shut down");
    }
}

impl fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport whose handshakes follow a script; unscripted ones succeed
    #[derive(Default)]
    struct ScriptedTransport {
        connect_results: Mutex<VecDeque<bool>>,
        connects: AtomicU32,
        ping_delay: Mutex<Duration>,
    }

    impl ScriptedTransport {
        fn with_connects(results: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                connect_results: Mutex::new(results.iter().copied().collect()),
                ..Self::default()
            })
        }

        fn connects(&self) -> u32 {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConnectionTransport for ScriptedTransport {
        async fn connect(&self) -> anyhow::Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let ok = self
                .connect_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(true);
            if ok {
                Ok(())
            } else {
                anyhow::bail!("connection refused")
            }
        }

        async fn ping(&self) -> anyhow::Result<()> {
            let delay = *self.ping_delay.lock().unwrap();
            tokio::time::sleep(delay).await;
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn monitor(transport: Arc<ScriptedTransport>) -> ConnectionMonitor {
        ConnectionMonitor::new("push", transport, &ConnectionConfig::default()).unwrap()
    }

    #[test]
    fn test_state_edges() {
        use ConnectionState::*;

        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connecting));
        assert!(Disconnected.can_transition_to(Error));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Error.can_transition_to(Error));
        assert!(matches!(
            Disconnected.transition(Connected),
            Err(RecoveryError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_quality_thresholds() {
        let ms = Duration::from_millis;
        assert_eq!(ConnectionQuality::assess(Some(ms(100)), 0.0), ConnectionQuality::Good);
        assert_eq!(ConnectionQuality::assess(Some(ms(501)), 0.0), ConnectionQuality::Fair);
        assert_eq!(ConnectionQuality::assess(Some(ms(1001)), 0.0), ConnectionQuality::Poor);
        assert_eq!(ConnectionQuality::assess(None, 0.06), ConnectionQuality::Fair);
        assert_eq!(ConnectionQuality::assess(None, 0.11), ConnectionQuality::Poor);
        assert_eq!(ConnectionQuality::assess(Some(ms(500)), 0.05), ConnectionQuality::Good);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_connects() {
        let transport = ScriptedTransport::with_connects(&[]);
        let monitor = monitor(Arc::clone(&transport));
        assert_eq!(monitor.state(), ConnectionState::Connecting);

        monitor.start().await;

        assert_eq!(monitor.state(), ConnectionState::Connected);
        assert!(monitor.snapshot().metrics.connected_at.is_some());
        let history = monitor.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from, ConnectionState::Connecting);
        assert_eq!(history[0].to, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_close_reconnects_with_backoff() {
        let transport = ScriptedTransport::with_connects(&[true, false, false, true]);
        let monitor = monitor(Arc::clone(&transport));
        monitor.start().await;

        monitor.handle_event(TransportEvent::Closed { clean: false });
        assert_eq!(monitor.state(), ConnectionState::Reconnecting);

        // 1s, then 2s, then 4s
        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(transport.connects(), 1);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(transport.connects(), 2);
        assert_eq!(monitor.state(), ConnectionState::Error);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(transport.connects(), 3);
        assert_eq!(monitor.snapshot().metrics.reconnect_attempts, 3);

        tokio::time::sleep(Duration::from_millis(3990)).await;
        assert_eq!(transport.connects(), 3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.connects(), 4);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Connected);
        assert_eq!(snapshot.metrics.reconnect_attempts, 0);
        assert_eq!(snapshot.metrics.error_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_close_does_not_reconnect() {
        let transport = ScriptedTransport::with_connects(&[]);
        let monitor = monitor(Arc::clone(&transport));
        monitor.start().await;

        monitor.handle_event(TransportEvent::Closed { clean: true });
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let transport = ScriptedTransport::with_connects(&[]);
        let monitor = monitor(Arc::clone(&transport));
        monitor.start().await;

        monitor.handle_event(TransportEvent::Closed { clean: false });
        tokio::time::sleep(Duration::from_millis(500)).await;
        monitor.disconnect().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        assert_eq!(transport.connects(), 1);
        assert!(monitor.snapshot().closed_by_user);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_auto_reconnect_cancels_pending_reconnect() {
        let transport = ScriptedTransport::with_connects(&[]);
        let monitor = monitor(Arc::clone(&transport));
        monitor.start().await;

        monitor.handle_event(TransportEvent::Closed { clean: false });
        monitor.set_auto_reconnect(false);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_without_auto_reconnect_stays_in_error() {
        let transport = ScriptedTransport::with_connects(&[]);
        let monitor = monitor(Arc::clone(&transport));
        monitor.set_auto_reconnect(false);
        monitor.start().await;

        monitor.handle_event(TransportEvent::Fault("stream reset".to_string()));
        tokio::time::sleep(Duration::from_secs(60)).await;

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Error);
        assert_eq!(snapshot.last_error.as_deref(), Some("stream reset"));
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_now_skips_backoff() {
        let transport = ScriptedTransport::with_connects(&[]);
        let monitor = monitor(Arc::clone(&transport));
        monitor.start().await;
        monitor.disconnect().await;

        monitor.reconnect_now().await.unwrap();

        assert_eq!(monitor.state(), ConnectionState::Connected);
        assert!(!monitor.snapshot().closed_by_user);
        assert_eq!(transport.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_now_reports_failure() {
        let transport = ScriptedTransport::with_connects(&[true, false]);
        let monitor = monitor(Arc::clone(&transport));
        monitor.set_auto_reconnect(false);
        monitor.start().await;
        monitor.handle_event(TransportEvent::Closed { clean: false });

        let result = monitor.reconnect_now().await;
        assert!(matches!(result, Err(RecoveryError::ConnectionFailed(ref m)) if m.contains("refused")));
        assert_eq!(monitor.state(), ConnectionState::Error);
    }

    #[test]
    fn test_zero_ping_interval_is_rejected() {
        let config = ConnectionConfig {
            ping_interval_ms: 0,
            ..ConnectionConfig::default()
        };
        let result = ConnectionMonitor::new("push", ScriptedTransport::with_connects(&[]), &config);
        assert!(matches!(result, Err(RecoveryError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_reconnect_attempts() {
        let transport = ScriptedTransport::with_connects(&[false, false, false, false]);
        let config = ConnectionConfig {
            max_reconnect_attempts: Some(2),
            ..ConnectionConfig::default()
        };
        let monitor = ConnectionMonitor::new("push", transport.clone(), &config).unwrap();
        monitor.start().await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        // initial handshake plus two reconnect cycles
        assert_eq!(transport.connects(), 3);
        assert_eq!(monitor.state(), ConnectionState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_measure_latency() {
        let transport = ScriptedTransport::with_connects(&[]);
        *transport.ping_delay.lock().unwrap() = Duration::from_millis(600);
        let monitor = monitor(Arc::clone(&transport));
        monitor.start().await;

        tokio::time::sleep(Duration::from_millis(5700)).await;

        let metrics = monitor.snapshot().metrics;
        assert_eq!(metrics.probe_count, 1);
        assert_eq!(metrics.latency_ms, Some(600));
        assert_eq!(metrics.quality, ConnectionQuality::Fair);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_probes_fault_the_connection() {
        let transport = ScriptedTransport::with_connects(&[]);
        *transport.ping_delay.lock().unwrap() = Duration::from_secs(30);
        let monitor = monitor(Arc::clone(&transport));
        monitor.set_auto_reconnect(false);
        monitor.start().await;

        // probes at 5s and 10s each time out after 5s
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(monitor.state(), ConnectionState::Connected);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(monitor.state(), ConnectionState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_transitions() {
        let transport = ScriptedTransport::with_connects(&[]);
        let monitor = monitor(transport);
        let mut events = monitor.subscribe();

        monitor.start().await;
        monitor.disconnect().await;

        let first = events.recv().await.unwrap();
        assert_eq!(first.to, ConnectionState::Connected);
        let second = events.recv().await.unwrap();
        assert_eq!(second.to, ConnectionState::Disconnected);
    }
}
