/// Bounded retry queue with exponential backoff
///
/// Operations are executed by sweeps. A sweep runs immediately on enqueue and
/// again whenever a failed item's backoff delay elapses; each failing item
/// schedules its own re-sweep timer, so a slow item never holds back the
/// others. Within a sweep, items run in insertion order.
///
/// Item lifecycle:
///
/// ```text
///   enqueue ──> Pending ──> Retrying ──ok──> Completed (removed)
///                  ^            │
///                  └──backoff───┤ attempts < max_retries
///                               └──────────> Failed (on_failure, terminal)
/// ```
use super::backoff::RetryConfig;
use crate::config::QueueConfig;
use crate::timer::TimerSet;
use crate::{lock, RecoveryError, RecoveryResult};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

type OperationFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type SuccessCallback = Arc<dyn Fn() + Send + Sync>;
type FailureCallback = Arc<dyn Fn(u32, &str) + Send + Sync>;

/// Opaque queue item identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation submitted to the queue: an async invocable plus optional
/// completion callbacks
#[derive(Clone)]
pub struct QueuedOperation {
    name: String,
    execute: OperationFn,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

impl QueuedOperation {
    /// Wrap an async closure. It is invoked once per attempt.
    pub fn new<F, Fut>(name: impl Into<String>, operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            execute: Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(operation())
            }),
            on_success: None,
            on_failure: None,
        }
    }

    /// Called once when an attempt succeeds
    pub fn on_success(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Called with the attempt count and last error when retries are exhausted
    pub fn on_failure(mut self, callback: impl Fn(u32, &str) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for QueuedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedOperation")
            .field("name", &self.name)
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

/// Queue item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Retrying,
    Failed,
    Completed,
}

#[derive(Debug)]
struct QueueItem {
    id: ItemId,
    operation: QueuedOperation,
    config: RetryConfig,
    attempt_count: u32,
    created_at: DateTime<Utc>,
    last_attempt_at: Option<DateTime<Utc>>,
    /// Earliest time the next attempt may start
    next_attempt_at: Instant,
    status: ItemStatus,
    last_error: Option<String>,
}

impl QueueItem {
    fn is_eligible(&self, now: Instant) -> bool {
        self.status == ItemStatus::Pending
            && self.config.allows_attempt(self.attempt_count)
            && self.next_attempt_at <= now
    }

    fn snapshot(&self) -> QueueItemSnapshot {
        QueueItemSnapshot {
            id: self.id,
            name: self.operation.name.clone(),
            attempt_count: self.attempt_count,
            max_retries: self.config.max_retries,
            status: self.status,
            created_at: self.created_at,
            last_attempt_at: self.last_attempt_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only view of a queue item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItemSnapshot {
    pub id: ItemId,
    pub name: String,
    pub attempt_count: u32,
    pub max_retries: u32,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Aggregate queue status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total: usize,
    pub pending: usize,
    pub retrying: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Insertion order
    items: Vec<QueueItem>,

    /// A sweep is running
    sweeping: bool,

    /// Another sweep was requested while one was running
    rerun_requested: bool,
}

impl QueueState {
    fn find_mut(&mut self, id: ItemId) -> Option<&mut QueueItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    max_size: usize,
    default_retry: RetryConfig,
    timers: TimerSet,

    /// Woken after every attempt outcome and removal
    settled: Notify,
}

/// Clears the sweeping flag if a sweep exits without finishing (panic or
/// cancellation of the awaiting task)
struct SweepGuard<'a> {
    inner: &'a QueueInner,
    armed: bool,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(&self.inner.state).sweeping = false;
        }
    }
}

enum AttemptOutcome {
    Succeeded(Option<SuccessCallback>),
    Retrying { attempt: u32, delay: Duration },
    Exhausted {
        attempt: u32,
        error: String,
        callback: Option<FailureCallback>,
    },
    /// Item was removed while its attempt ran
    Gone,
}

/// Bounded retry queue. Cloning shares the queue.
#[derive(Clone)]
pub struct RetryQueue {
    inner: Arc<QueueInner>,
}

impl RetryQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                max_size: config.max_queue_size,
                default_retry: config.retry,
                timers: TimerSet::new("retry_queue"),
                settled: Notify::new(),
            }),
        }
    }

    /// Add an operation and trigger a sweep. Never waits for execution.
    ///
    /// Rejects a `config` that would never run the operation. Must be called
    /// from within a tokio runtime.
    pub fn enqueue(
        &self,
        operation: QueuedOperation,
        config: RetryConfig,
    ) -> RecoveryResult<ItemId> {
        config.validate()?;
        let id = ItemId::new();
        {
            let mut state = lock(&self.inner.state);
            if state.items.len() >= self.inner.max_size {
                tracing::warn!(
                    operation = operation.name(),
                    capacity = self.inner.max_size,
                    "Retry queue full, rejecting operation"
                );
                return Err(RecoveryError::QueueFull {
                    capacity: self.inner.max_size,
                });
            }

            tracing::debug!(
                item = %id,
                operation = operation.name(),
                max_retries = config.max_retries,
                "Operation enqueued"
            );

            state.items.push(QueueItem {
                id,
                operation,
                config,
                attempt_count: 0,
                created_at: Utc::now(),
                last_attempt_at: None,
                next_attempt_at: Instant::now(),
                status: ItemStatus::Pending,
                last_error: None,
            });
        }

        self.schedule_sweep(Duration::ZERO);
        Ok(id)
    }

    /// Enqueue with the queue's default retry settings
    pub fn enqueue_default(&self, operation: QueuedOperation) -> RecoveryResult<ItemId> {
        self.enqueue(operation, self.inner.default_retry)
    }

    /// Run every eligible item once, in insertion order.
    ///
    /// Safe to call at any time: if a sweep is already running this returns
    /// at once and the running sweep makes one more pass when it finishes.
    pub fn process_all(&self) -> BoxFuture<'static, ()> {
        let queue = self.clone();
        Box::pin(async move { queue.sweep().await })
    }

    async fn sweep(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.sweeping {
                state.rerun_requested = true;
                tracing::trace!("Sweep already running, requesting another pass");
                return;
            }
            state.sweeping = true;
        }
        let mut guard = SweepGuard {
            inner: &self.inner,
            armed: true,
        };

        loop {
            let eligible: Vec<ItemId> = {
                let mut state = lock(&self.inner.state);
                state.rerun_requested = false;
                let now = Instant::now();
                state
                    .items
                    .iter()
                    .filter(|item| item.is_eligible(now))
                    .map(|item| item.id)
                    .collect()
            };

            if !eligible.is_empty() {
                tracing::debug!(count = eligible.len(), "Processing retry queue");
            }

            for id in eligible {
                self.execute_item(id).await;
            }

            let mut state = lock(&self.inner.state);
            if !state.rerun_requested {
                state.sweeping = false;
                guard.armed = false;
                break;
            }
        }
    }

    async fn execute_item(&self, id: ItemId) {
        let (execute, name) = {
            let mut state = lock(&self.inner.state);
            let Some(item) = state.find_mut(id) else {
                return;
            };
            // Re-check: the item may have changed since the sweep selected it
            if !item.is_eligible(Instant::now()) {
                return;
            }
            item.status = ItemStatus::Retrying;
            item.last_attempt_at = Some(Utc::now());
            (
                Arc::clone(&item.operation.execute),
                item.operation.name.clone(),
            )
        };

        let result = execute().await;

        let outcome = {
            let mut state = lock(&self.inner.state);
            match state.find_mut(id) {
                None => AttemptOutcome::Gone,
                Some(item) => match result {
                    Ok(()) => {
                        item.status = ItemStatus::Completed;
                        let callback = item.operation.on_success.clone();
                        state.items.retain(|item| item.id != id);
                        AttemptOutcome::Succeeded(callback)
                    }
                    Err(error) => {
                        item.attempt_count += 1;
                        let message = format!("{:#}", error);
                        item.last_error = Some(message.clone());

                        if item.attempt_count >= item.config.max_retries {
                            item.status = ItemStatus::Failed;
                            AttemptOutcome::Exhausted {
                                attempt: item.attempt_count,
                                error: message,
                                callback: item.operation.on_failure.clone(),
                            }
                        } else {
                            let delay = item.config.backoff().retry_delay(item.attempt_count);
                            item.status = ItemStatus::Pending;
                            item.next_attempt_at = Instant::now() + delay;
                            AttemptOutcome::Retrying {
                                attempt: item.attempt_count,
                                delay,
                            }
                        }
                    }
                },
            }
        };
        self.inner.settled.notify_waiters();

        match outcome {
            AttemptOutcome::Succeeded(callback) => {
                tracing::info!(item = %id, operation = %name, "Queued operation succeeded");
                if let Some(callback) = callback {
                    callback();
                }
            }
            AttemptOutcome::Retrying { attempt, delay } => {
                tracing::warn!(
                    item = %id,
                    operation = %name,
                    attempt,
                    delay = %humantime::format_duration(delay),
                    "Queued operation failed, retrying after delay"
                );
                self.schedule_sweep(delay);
            }
            AttemptOutcome::Exhausted {
                attempt,
                error,
                callback,
            } => {
                tracing::error!(
                    item = %id,
                    operation = %name,
                    attempts = attempt,
                    error = %error,
                    "Queued operation failed permanently"
                );
                if let Some(callback) = callback {
                    callback(attempt, &error);
                }
            }
            AttemptOutcome::Gone => {
                tracing::debug!(item = %id, "Item removed during execution, discarding result");
            }
        }
    }

    fn schedule_sweep(&self, delay: Duration) {
        let sweep = self.process_all();
        self.inner.timers.schedule_once(delay, sweep);
    }

    /// Remove an item. Returns whether it was present.
    pub fn remove(&self, id: ItemId) -> bool {
        let mut state = lock(&self.inner.state);
        let before = state.items.len();
        state.items.retain(|item| item.id != id);
        let removed = state.items.len() != before;
        if removed {
            tracing::debug!(item = %id, "Item removed from retry queue");
            self.inner.settled.notify_waiters();
        }
        removed
    }

    pub fn status_summary(&self) -> QueueStatus {
        let state = lock(&self.inner.state);
        let mut status = QueueStatus {
            total: state.items.len(),
            ..QueueStatus::default()
        };
        for item in &state.items {
            match item.status {
                ItemStatus::Pending => status.pending += 1,
                ItemStatus::Retrying => status.retrying += 1,
                ItemStatus::Failed => status.failed += 1,
                ItemStatus::Completed => {}
            }
        }
        status
    }

    /// Reset every failed item to pending with zero attempts. Returns how
    /// many were reset.
    pub fn retry_failed(&self) -> usize {
        let count = {
            let mut state = lock(&self.inner.state);
            let now = Instant::now();
            state
                .items
                .iter_mut()
                .filter(|item| item.status == ItemStatus::Failed)
                .map(|item| reset_item(item, now))
                .count()
        };

        if count > 0 {
            tracing::info!(count, "Retrying failed operations");
            self.schedule_sweep(Duration::ZERO);
        }
        count
    }

    /// Reset a single failed item. A pending or running item is left alone.
    pub fn retry_item(&self, id: ItemId) -> RecoveryResult<()> {
        let reset = {
            let mut state = lock(&self.inner.state);
            let item = state
                .find_mut(id)
                .ok_or_else(|| RecoveryError::ItemNotFound(id.to_string()))?;
            if item.status == ItemStatus::Failed {
                reset_item(item, Instant::now());
                true
            } else {
                false
            }
        };

        if reset {
            tracing::info!(item = %id, "Retrying failed operation");
            self.schedule_sweep(Duration::ZERO);
        }
        Ok(())
    }

    /// Wait until an item has either left the queue or failed permanently.
    ///
    /// Returns `Ok` once the item is gone (it succeeded or was removed) and
    /// `StillFailing` if it is marked failed. A pending item is waited on
    /// through all of its remaining retries.
    pub async fn wait_settled(&self, id: ItemId) -> RecoveryResult<()> {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = lock(&self.inner.state);
                match state.items.iter().find(|item| item.id == id) {
                    None => return Ok(()),
                    Some(item) if item.status == ItemStatus::Failed => {
                        return Err(RecoveryError::StillFailing(format!(
                            "{} failed after {} attempts: {}",
                            item.operation.name,
                            item.attempt_count,
                            item.last_error.as_deref().unwrap_or("unknown error")
                        )));
                    }
                    Some(_) => {}
                }
            }

            notified.await;
        }
    }

    /// Drop every failed item. Returns how many were dropped.
    pub fn clear_failed(&self) -> usize {
        let mut state = lock(&self.inner.state);
        let before = state.items.len();
        state
            .items
            .retain(|item| item.status != ItemStatus::Failed);
        let cleared = before - state.items.len();
        if cleared > 0 {
            tracing::info!(count = cleared, "Cleared failed operations");
            self.inner.settled.notify_waiters();
        }
        cleared
    }

    pub fn items(&self) -> Vec<QueueItemSnapshot> {
        lock(&self.inner.state)
            .items
            .iter()
            .map(QueueItem::snapshot)
            .collect()
    }

    pub fn failed_items(&self) -> Vec<QueueItemSnapshot> {
        lock(&self.inner.state)
            .items
            .iter()
            .filter(|item| item.status == ItemStatus::Failed)
            .map(QueueItem::snapshot)
            .collect()
    }

    pub fn get(&self, id: ItemId) -> Option<QueueItemSnapshot> {
        lock(&self.inner.state)
            .items
            .iter()
            .find(|item| item.id == id)
            .map(QueueItem::snapshot)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every scheduled sweep. Items stay queued; a later enqueue or
    /// `process_all` resumes processing.
    pub fn shutdown(&self) {
        self.inner.timers.cancel_all();
        tracing::debug!("Retry queue timers cancelled");
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new(&QueueConfig::default())
    }
}

impl fmt::Debug for RetryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryQueue")
            .field("max_size", &self.inner.max_size)
            .field("status", &self.status_summary())
            .finish()
    }
}

fn reset_item(item: &mut QueueItem, now: Instant) {
    item.status = ItemStatus::Pending;
    item.attempt_count = 0;
    item.next_attempt_at = now;
}
