/// Recovery signal bus
///
/// Recovery actions that need cooperation from outside this crate (token
/// refresh, offline mode, cache invalidation, ...) are published here as
/// typed [`RecoverySignal`]s. Collaborators subscribe and react on their own;
/// the bus is the only coupling point to the rest of the application.
use crate::{RecoveryError, RecoveryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Default number of undelivered signals a slow subscriber may lag behind
const DEFAULT_CAPACITY: usize = 64;

/// Cross-cutting recovery signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoverySignal {
    /// Refresh the session/auth token
    RefreshToken,

    /// Switch the application to offline operation
    EnableOfflineMode,

    /// Disable non-essential features to reduce load
    EnableDegradedMode,

    /// Drop cached data so it is refetched
    InvalidateCache,

    /// Slow down outbound request rate
    ThrottleRequests,

    /// Ask the user to sign in again
    RequestReauthentication,

    /// Re-download authoritative data from the server
    ResyncData,

    /// Reload the whole application
    ReloadApplication,

    /// Open the support channel
    ContactSupport,
}

impl RecoverySignal {
    /// Wire name of the signal
    pub fn name(&self) -> &'static str {
        match self {
            RecoverySignal::RefreshToken => "refreshToken",
            RecoverySignal::EnableOfflineMode => "enableOfflineMode",
            RecoverySignal::EnableDegradedMode => "enableDegradedMode",
            RecoverySignal::InvalidateCache => "invalidateCache",
            RecoverySignal::ThrottleRequests => "throttleRequests",
            RecoverySignal::RequestReauthentication => "requestReauthentication",
            RecoverySignal::ResyncData => "resyncData",
            RecoverySignal::ReloadApplication => "reloadApplication",
            RecoverySignal::ContactSupport => "contactSupport",
        }
    }
}

impl fmt::Display for RecoverySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Process-wide publish/subscribe channel for recovery signals.
///
/// Cloning the bus shares the underlying channel.
#[derive(Debug, Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<RecoverySignal>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to every signal published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<RecoverySignal> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish a signal.
    ///
    /// Returns the number of subscribers it reached. A signal nobody listens
    /// to is an error: the recovery it stands for cannot happen.
    pub fn publish(&self, signal: RecoverySignal) -> RecoveryResult<usize> {
        match self.sender.send(signal) {
            Ok(receivers) => {
                tracing::info!(signal = %signal, receivers, "Recovery signal published");
                Ok(receivers)
            }
            Err(_) => {
                tracing::warn!(signal = %signal, "Recovery signal has no subscribers");
                Err(RecoveryError::SignalUndelivered(signal.name().to_string()))
            }
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = SignalBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.publish(RecoverySignal::RefreshToken).unwrap(), 2);
        assert_eq!(first.recv().await.unwrap(), RecoverySignal::RefreshToken);
        assert_eq!(second.recv().await.unwrap(), RecoverySignal::RefreshToken);
    }

    #[test]
    fn test_publish_without_subscribers_fails() {
        let bus = SignalBus::new();
        let result = bus.publish(RecoverySignal::EnableOfflineMode);
        assert_eq!(
            result,
            Err(RecoveryError::SignalUndelivered("enableOfflineMode".to_string()))
        );
    }

    #[test]
    fn test_signal_names_match_serde() {
        for signal in [
            RecoverySignal::RefreshToken,
            RecoverySignal::EnableDegradedMode,
            RecoverySignal::InvalidateCache,
        ] {
            let json = serde_json::to_string(&signal).unwrap();
            assert_eq!(json, format!("\"{}\"", signal.name()));
        }
    }

    #[test]
    fn test_cloned_bus_shares_channel() {
        let bus = SignalBus::new();
        let clone = bus.clone();
        let _rx = bus.subscribe();
        assert_eq!(clone.subscriber_count(), 1);
        assert!(clone.publish(RecoverySignal::ResyncData).is_ok());
    }
}
