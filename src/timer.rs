/// Scheduled tasks with explicit cancellation
///
/// Every timer in the crate is created through a [`TimerSet`] owned by the
/// component that needs it. Each timer gets a child of the set's root
/// `CancellationToken`, so a component can cancel one timer through its
/// [`TimerHandle`] or all of them at once on its shutdown path. Dropping the
/// set cancels everything it still owns.
///
/// Timers run on the tokio clock, so tests driven by a paused runtime
/// (`#[tokio::test(start_paused = true)]`) advance them deterministically.
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Handle to one scheduled task
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    /// Cancel the timer. A one-shot that has not fired yet never fires;
    /// an interval stops before its next tick.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Decrements the live-timer count when a timer task exits for any reason
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Set of timers owned by one component
#[derive(Debug)]
pub struct TimerSet {
    name: &'static str,
    root: Mutex<CancellationToken>,
    active: Arc<AtomicUsize>,
}

impl TimerSet {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            root: Mutex::new(CancellationToken::new()),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn child_token(&self) -> CancellationToken {
        crate::lock(&self.root).child_token()
    }

    fn track(&self) -> ActiveGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(Arc::clone(&self.active))
    }

    /// Run `task` once after `delay` unless cancelled first.
    ///
    /// Cancellation only races the delay: once the task has started it runs
    /// to completion, and tasks re-check their owner's state themselves.
    pub fn schedule_once<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.child_token();
        let guard = self.track();
        let task_token = token.clone();
        let name = self.name;

        tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                _ = task_token.cancelled() => {
                    tracing::trace!(timer_set = name, "One-shot timer cancelled");
                    return;
                }
                _ = time::sleep(delay) => {}
            }
            task.await;
        });

        TimerHandle { token }
    }

    /// Run `tick` every `period`, first after one full period, until cancelled.
    ///
    /// A zero period never ticks: the returned handle is already cancelled.
    pub fn schedule_interval<F, Fut>(&self, period: Duration, mut tick: F) -> TimerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.child_token();
        if period.is_zero() {
            tracing::warn!(timer_set = self.name, "Refusing interval timer with zero period");
            token.cancel();
            return TimerHandle { token };
        }
        let guard = self.track();
        let task_token = token.clone();
        let name = self.name;

        tokio::spawn(async move {
            let _guard = guard;
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => {
                        if task_token.is_cancelled() {
                            break;
                        }
                        tick().await;
                    }
                }
            }

            tracing::trace!(timer_set = name, "Interval timer stopped");
        });

        TimerHandle { token }
    }

    /// Cancel every timer created so far. The set stays usable afterwards.
    pub fn cancel_all(&self) {
        let mut root = crate::lock(&self.root);
        root.cancel();
        *root = CancellationToken::new();
        tracing::debug!(timer_set = self.name, "All timers cancelled");
    }

    /// Number of timer tasks that have not exited yet
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        crate::lock(&self.root).cancel();
    }
}
