/// Common test helper functions
use recovery_core::recovery::QueuedOperation;
use recovery_core::ResilienceConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Operation failing `failures` times with `message`, then succeeding.
/// Returns the operation and its call counter.
pub fn flaky_operation(
    name: &str,
    failures: u32,
    message: &'static str,
) -> (QueuedOperation, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let operation = QueuedOperation::new(name, move || {
        let counter = Arc::clone(&counter);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                Err(anyhow::anyhow!(message))
            } else {
                Ok(())
            }
        }
    });
    (operation, calls)
}

/// Operation that never succeeds
pub fn failing_operation(name: &str, message: &'static str) -> (QueuedOperation, Arc<AtomicU32>) {
    flaky_operation(name, u32::MAX, message)
}

/// Records every `on_failure` invocation
#[derive(Clone, Default)]
pub struct FailureLog(Arc<Mutex<Vec<(u32, String)>>>);

impl FailureLog {
    pub fn attach(&self, operation: QueuedOperation) -> QueuedOperation {
        let log = Arc::clone(&self.0);
        operation.on_failure(move |attempts, error| {
            log.lock().unwrap().push((attempts, error.to_string()));
        })
    }

    pub fn entries(&self) -> Vec<(u32, String)> {
        self.0.lock().unwrap().clone()
    }
}

/// Default configuration with auto-recovery off
pub fn manual_config() -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.orchestrator.auto_recovery = false;
    config
}

/// Advance the paused tokio clock
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
