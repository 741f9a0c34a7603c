/// Integration tests for the retry queue
///
/// Tests the public queue API end to end on a paused clock
mod common;

use common::test_helpers::{advance, failing_operation, flaky_operation, FailureLog};
use recovery_core::config::QueueConfig;
use recovery_core::recovery::{ItemStatus, QueueStatus};
use recovery_core::{RecoveryError, RetryConfig, RetryQueue};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_operation_failing_past_max_retries_fails_once() {
    let queue = RetryQueue::default();
    let failures = FailureLog::default();

    let (operation, calls) = flaky_operation("save_draft", 4, "connection reset");
    let id = queue
        .enqueue(failures.attach(operation), RetryConfig::new(3))
        .unwrap();

    advance(Duration::from_secs(120)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(failures.entries(), vec![(3, "connection reset".to_string())]);

    let item = queue.get(id).unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.attempt_count, 3);
    assert_eq!(item.last_error.as_deref(), Some("connection reset"));
}

#[tokio::test(start_paused = true)]
async fn test_attempts_never_exceed_max_retries() {
    let queue = RetryQueue::default();
    let (operation, calls) = failing_operation("upload", "timeout");
    let id = queue.enqueue(operation, RetryConfig::new(4)).unwrap();

    for _ in 0..10 {
        advance(Duration::from_secs(30)).await;
        queue.process_all().await;
        assert!(queue.get(id).unwrap().attempt_count <= 4);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delay_is_capped() {
    let queue = RetryQueue::default();
    let config = RetryConfig::new(10).with_delays(Duration::from_secs(1), Duration::from_secs(4));
    let (operation, calls) = failing_operation("poll", "timeout");
    queue.enqueue(operation, config).unwrap();

    // attempts at 0, 1, 3, 7, 11, 15 (capped at 4s)
    advance(Duration::from_millis(7500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    advance(Duration::from_secs(4)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    advance(Duration::from_secs(4)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn test_status_summary_tracks_items() {
    let queue = RetryQueue::default();
    let (failing, _) = failing_operation("a", "500 internal server error");
    let (pending, _) = failing_operation("b", "timeout");
    queue.enqueue(failing, RetryConfig::new(1)).unwrap();
    queue.enqueue(pending, RetryConfig::new(5)).unwrap();

    advance(Duration::from_millis(100)).await;

    assert_eq!(
        queue.status_summary(),
        QueueStatus {
            total: 2,
            pending: 1,
            retrying: 0,
            failed: 1,
        }
    );
    assert_eq!(queue.failed_items().len(), 1);
    assert_eq!(queue.failed_items()[0].name, "a");
}

#[tokio::test(start_paused = true)]
async fn test_retry_failed_runs_items_again() {
    let queue = RetryQueue::default();
    let (operation, calls) = flaky_operation("sync", 2, "timeout");
    let id = queue.enqueue(operation, RetryConfig::new(2)).unwrap();

    advance(Duration::from_secs(10)).await;
    assert_eq!(queue.get(id).unwrap().status, ItemStatus::Failed);

    assert_eq!(queue.retry_failed(), 1);
    advance(Duration::from_millis(10)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_remove_is_idempotent() {
    let queue = RetryQueue::default();
    let (operation, _) = failing_operation("a", "timeout");
    let id = queue.enqueue(operation, RetryConfig::new(5)).unwrap();

    assert!(queue.remove(id));
    assert!(!queue.remove(id));
    assert!(queue.get(id).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_rejects_until_space_frees() {
    let queue = RetryQueue::new(&QueueConfig {
        max_queue_size: 1,
        ..QueueConfig::default()
    });
    let (first, _) = failing_operation("first", "timeout");
    queue.enqueue(first, RetryConfig::new(1)).unwrap();

    let (second, _) = failing_operation("second", "timeout");
    assert_eq!(
        queue.enqueue(second.clone(), RetryConfig::new(1)),
        Err(RecoveryError::QueueFull { capacity: 1 })
    );

    advance(Duration::from_millis(10)).await;
    assert_eq!(queue.clear_failed(), 1);
    assert!(queue.enqueue(second, RetryConfig::new(1)).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_success_callback_runs_once() {
    let queue = RetryQueue::default();
    let successes = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter = std::sync::Arc::clone(&successes);

    let (operation, _) = flaky_operation("save", 1, "timeout");
    let operation = operation.on_success(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    queue.enqueue(operation, RetryConfig::default()).unwrap();

    advance(Duration::from_secs(10)).await;
    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert!(queue.is_empty());
}
