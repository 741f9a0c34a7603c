/// Recovery strategy catalog
///
/// Every strategy is registered once, globally, and referenced by
/// [`StrategyId`] from the categories in
/// [`ErrorCategory::strategy_ids`](super::ErrorCategory::strategy_ids).
/// The catalog is read-only at runtime; changing it is a deployment concern.
use super::classification::ErrorCategory;
use crate::signals::RecoverySignal;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Identifier of a registered strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    RetryConnection,
    EnableOfflineMode,
    CheckNetworkSettings,
    RefreshToken,
    Reauthenticate,
    RetryWithBackoff,
    EnableDegradedMode,
    ContactSupport,
    ClearCache,
    ResyncData,
    WaitAndRetry,
    ReduceRequestRate,
    ReloadApplication,
}

impl StrategyId {
    pub const ALL: [StrategyId; 13] = [
        StrategyId::RetryConnection,
        StrategyId::EnableOfflineMode,
        StrategyId::CheckNetworkSettings,
        StrategyId::RefreshToken,
        StrategyId::Reauthenticate,
        StrategyId::RetryWithBackoff,
        StrategyId::EnableDegradedMode,
        StrategyId::ContactSupport,
        StrategyId::ClearCache,
        StrategyId::ResyncData,
        StrategyId::WaitAndRetry,
        StrategyId::ReduceRequestRate,
        StrategyId::ReloadApplication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::RetryConnection => "retry_connection",
            StrategyId::EnableOfflineMode => "enable_offline_mode",
            StrategyId::CheckNetworkSettings => "check_network_settings",
            StrategyId::RefreshToken => "refresh_token",
            StrategyId::Reauthenticate => "reauthenticate",
            StrategyId::RetryWithBackoff => "retry_with_backoff",
            StrategyId::EnableDegradedMode => "enable_degraded_mode",
            StrategyId::ContactSupport => "contact_support",
            StrategyId::ClearCache => "clear_cache",
            StrategyId::ResyncData => "resync_data",
            StrategyId::WaitAndRetry => "wait_and_retry",
            StrategyId::ReduceRequestRate => "reduce_request_rate",
            StrategyId::ReloadApplication => "reload_application",
        }
    }

    /// What executing the strategy actually does
    pub fn action(&self) -> StrategyAction {
        match self {
            StrategyId::RetryConnection | StrategyId::CheckNetworkSettings => {
                StrategyAction::Reconnect
            }
            StrategyId::RetryWithBackoff | StrategyId::WaitAndRetry => {
                StrategyAction::RetryOperation
            }
            StrategyId::EnableOfflineMode => {
                StrategyAction::Signal(RecoverySignal::EnableOfflineMode)
            }
            StrategyId::RefreshToken => StrategyAction::Signal(RecoverySignal::RefreshToken),
            StrategyId::Reauthenticate => {
                StrategyAction::Signal(RecoverySignal::RequestReauthentication)
            }
            StrategyId::EnableDegradedMode => {
                StrategyAction::Signal(RecoverySignal::EnableDegradedMode)
            }
            StrategyId::ContactSupport => StrategyAction::Signal(RecoverySignal::ContactSupport),
            StrategyId::ClearCache => StrategyAction::Signal(RecoverySignal::InvalidateCache),
            StrategyId::ResyncData => StrategyAction::Signal(RecoverySignal::ResyncData),
            StrategyId::ReduceRequestRate => {
                StrategyAction::Signal(RecoverySignal::ThrottleRequests)
            }
            StrategyId::ReloadApplication => {
                StrategyAction::Signal(RecoverySignal::ReloadApplication)
            }
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = crate::RecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| crate::RecoveryError::UnknownStrategy(s.to_string()))
    }
}

/// Effect of a strategy, carried out by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyAction {
    /// Probe the monitored connection by reconnecting it
    Reconnect,

    /// Put the failed operation(s) back on the retry queue and wait for
    /// the outcome
    RetryOperation,

    /// Broadcast a signal for an outside collaborator
    Signal(RecoverySignal),
}

/// Catalogued recovery strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStrategy {
    pub id: StrategyId,
    pub name: &'static str,
    pub description: &'static str,

    /// Can run without user confirmation
    pub automated: bool,

    pub estimated_duration_seconds: u32,

    /// Fraction of past executions that resolved the incident (0.0 - 1.0)
    pub historical_success_rate: f64,
}

impl RecoveryStrategy {
    pub fn estimated_duration(&self) -> Duration {
        Duration::from_secs(self.estimated_duration_seconds as u64)
    }
}

fn strategy(
    id: StrategyId,
    name: &'static str,
    description: &'static str,
    automated: bool,
    estimated_duration_seconds: u32,
    historical_success_rate: f64,
) -> RecoveryStrategy {
    RecoveryStrategy {
        id,
        name,
        description,
        automated,
        estimated_duration_seconds,
        historical_success_rate,
    }
}

/// Every strategy, in registration order
fn catalog() -> Vec<RecoveryStrategy> {
    vec![
        strategy(
            StrategyId::RetryConnection,
            "Retry connection",
            "Reconnect to the server",
            true,
            5,
            0.85,
        ),
        strategy(
            StrategyId::EnableOfflineMode,
            "Work offline",
            "Keep working with local data until the connection returns",
            true,
            1,
            0.95,
        ),
        strategy(
            StrategyId::CheckNetworkSettings,
            "Check network settings",
            "Verify your network connection, then reconnect",
            false,
            60,
            0.60,
        ),
        strategy(
            StrategyId::RefreshToken,
            "Refresh session",
            "Request a fresh session token",
            true,
            3,
            0.90,
        ),
        strategy(
            StrategyId::Reauthenticate,
            "Sign in again",
            "Sign in to restore your session",
            false,
            30,
            0.98,
        ),
        strategy(
            StrategyId::RetryWithBackoff,
            "Retry request",
            "Retry the failed request with increasing delays",
            true,
            10,
            0.70,
        ),
        strategy(
            StrategyId::EnableDegradedMode,
            "Reduce features",
            "Temporarily disable non-essential features",
            true,
            2,
            0.90,
        ),
        strategy(
            StrategyId::ContactSupport,
            "Contact support",
            "Get help from the support team",
            false,
            300,
            0.50,
        ),
        strategy(
            StrategyId::ClearCache,
            "Clear cache",
            "Discard cached data and fetch it again",
            true,
            5,
            0.80,
        ),
        strategy(
            StrategyId::ResyncData,
            "Resynchronize data",
            "Download a fresh copy of your data from the server",
            false,
            30,
            0.85,
        ),
        strategy(
            StrategyId::WaitAndRetry,
            "Wait and retry",
            "Pause, then retry the request",
            true,
            30,
            0.95,
        ),
        strategy(
            StrategyId::ReduceRequestRate,
            "Slow down requests",
            "Lower the request rate to stay within limits",
            true,
            1,
            0.85,
        ),
        strategy(
            StrategyId::ReloadApplication,
            "Reload application",
            "Reload to release resources",
            false,
            10,
            0.90,
        ),
    ]
}

lazy_static! {
    static ref STANDARD_REGISTRY: StrategyRegistry = StrategyRegistry::build();
}

/// Read-only category → strategies lookup
#[derive(Debug)]
pub struct StrategyRegistry {
    by_id: HashMap<StrategyId, RecoveryStrategy>,
    by_category: HashMap<ErrorCategory, Vec<RecoveryStrategy>>,
}

impl StrategyRegistry {
    /// The process-wide catalog
    pub fn standard() -> &'static StrategyRegistry {
        &STANDARD_REGISTRY
    }

    fn build() -> Self {
        let by_id: HashMap<_, _> = catalog().into_iter().map(|s| (s.id, s)).collect();

        let by_category = ErrorCategory::ALL
            .into_iter()
            .map(|category| {
                let strategies = category
                    .strategy_ids()
                    .iter()
                    .filter_map(|id| by_id.get(id).cloned())
                    .collect();
                (category, strategies)
            })
            .collect();

        Self { by_id, by_category }
    }

    /// Strategies for a category in registration order
    pub fn strategies_for(&self, category: ErrorCategory) -> &[RecoveryStrategy] {
        self.by_category
            .get(&category)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// First automated strategy for a category, if any
    pub fn first_automated(&self, category: ErrorCategory) -> Option<&RecoveryStrategy> {
        self.strategies_for(category).iter().find(|s| s.automated)
    }

    pub fn get(&self, id: StrategyId) -> Option<&RecoveryStrategy> {
        self.by_id.get(&id)
    }

    /// Whether `id` is registered for `category`
    pub fn applies_to(&self, id: StrategyId, category: ErrorCategory) -> bool {
        self.strategies_for(category).iter().any(|s| s.id == id)
    }
}
