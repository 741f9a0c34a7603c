/// Error classification for recovery strategy selection
///
/// A raw failure signal (message and/or HTTP-like status code) is mapped to
/// one of six [`ErrorCategory`] values. Message matching is a case-insensitive
/// substring search over an ordered rule table; the first rule that matches
/// wins, so a message mentioning both "network" and "503" is `Network`.
/// Anything unmatched (or no message at all) defaults to `Network`.
use super::strategies::StrategyId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure category driving recovery strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connectivity problems: timeouts, refused/reset connections, offline
    Network,

    /// Expired or rejected credentials
    Authentication,

    /// 5xx responses and server-side faults
    ServerError,

    /// Invalid, corrupt or inconsistent data
    DataCorruption,

    /// 429 / quota exhaustion
    RateLimiting,

    /// Slowness, memory pressure
    Performance,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 6] = [
        ErrorCategory::Network,
        ErrorCategory::Authentication,
        ErrorCategory::ServerError,
        ErrorCategory::DataCorruption,
        ErrorCategory::RateLimiting,
        ErrorCategory::Performance,
    ];

    /// Short user-facing title
    pub fn title(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Connection problem",
            ErrorCategory::Authentication => "Sign-in required",
            ErrorCategory::ServerError => "Server problem",
            ErrorCategory::DataCorruption => "Data problem",
            ErrorCategory::RateLimiting => "Too many requests",
            ErrorCategory::Performance => "Running slowly",
        }
    }

    /// Plain-language description
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "The network connection was lost or is unreliable",
            ErrorCategory::Authentication => "Your session has expired or was rejected",
            ErrorCategory::ServerError => "The server failed to handle the request",
            ErrorCategory::DataCorruption => "Some data could not be read or failed validation",
            ErrorCategory::RateLimiting => "Requests are being sent faster than allowed",
            ErrorCategory::Performance => "The application is responding slower than expected",
        }
    }

    /// Whether incidents of this category may be recovered without user
    /// confirmation
    pub fn auto_recovery_eligible(&self) -> bool {
        match self {
            ErrorCategory::Network
            | ErrorCategory::ServerError
            | ErrorCategory::RateLimiting
            | ErrorCategory::Performance => true,
            // Needs the user or risks data integrity
            ErrorCategory::Authentication | ErrorCategory::DataCorruption => false,
        }
    }

    /// Strategies applicable to this category, best first
    pub fn strategy_ids(&self) -> &'static [StrategyId] {
        match self {
            ErrorCategory::Network => &[
                StrategyId::RetryConnection,
                StrategyId::EnableOfflineMode,
                StrategyId::CheckNetworkSettings,
            ],
            ErrorCategory::Authentication => {
                &[StrategyId::RefreshToken, StrategyId::Reauthenticate]
            }
            ErrorCategory::ServerError => &[
                StrategyId::RetryWithBackoff,
                StrategyId::EnableDegradedMode,
                StrategyId::ContactSupport,
            ],
            ErrorCategory::DataCorruption => &[
                StrategyId::ClearCache,
                StrategyId::ResyncData,
                StrategyId::ContactSupport,
            ],
            ErrorCategory::RateLimiting => {
                &[StrategyId::WaitAndRetry, StrategyId::ReduceRequestRate]
            }
            ErrorCategory::Performance => &[
                StrategyId::ClearCache,
                StrategyId::EnableDegradedMode,
                StrategyId::ReloadApplication,
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::DataCorruption => "data_corruption",
            ErrorCategory::RateLimiting => "rate_limiting",
            ErrorCategory::Performance => "performance",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the classification table
#[derive(Debug, Clone, Copy)]
pub struct ClassificationRule {
    pub category: ErrorCategory,
    /// Lower-case substrings, any of which selects `category`
    pub tokens: &'static [&'static str],
}

/// Ordered rule table. Order is the tie-break.
pub const RULES: &[ClassificationRule] = &[
    ClassificationRule {
        category: ErrorCategory::Network,
        tokens: &[
            "network",
            "timeout",
            "timed out",
            "fetch",
            "connection",
            "offline",
            "unreachable",
            "econnrefused",
            "econnreset",
            "dns",
            "socket",
        ],
    },
    ClassificationRule {
        category: ErrorCategory::Authentication,
        tokens: &[
            "unauthorized",
            "unauthenticated",
            "authentication",
            "auth",
            "token",
            "forbidden",
            "session expired",
            "401",
            "403",
        ],
    },
    ClassificationRule {
        category: ErrorCategory::ServerError,
        tokens: &[
            "internal server",
            "server error",
            "service unavailable",
            "bad gateway",
            "500",
            "502",
            "503",
            "504",
        ],
    },
    ClassificationRule {
        category: ErrorCategory::RateLimiting,
        tokens: &["rate limit", "too many requests", "quota", "throttl", "429"],
    },
    ClassificationRule {
        category: ErrorCategory::DataCorruption,
        tokens: &[
            "corrupt",
            "validation",
            "invalid data",
            "checksum",
            "malformed",
            "parse error",
            "data",
        ],
    },
    ClassificationRule {
        category: ErrorCategory::Performance,
        tokens: &["slow", "performance", "memory", "latency", "lag"],
    },
];

/// Category used when no rule matches
pub const DEFAULT_CATEGORY: ErrorCategory = ErrorCategory::Network;

/// Raw failure signal from an operation, probe or transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSignal {
    pub message: Option<String>,
    pub status: Option<u16>,
}

impl FailureSignal {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Stateless classifier over the rule table
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a failure message. `None`, empty or unmatched → `Network`.
    pub fn classify(&self, message: Option<&str>) -> ErrorCategory {
        let Some(message) = message else {
            return DEFAULT_CATEGORY;
        };

        let lowered = message.to_lowercase();
        RULES
            .iter()
            .find(|rule| rule.tokens.iter().any(|token| lowered.contains(token)))
            .map(|rule| rule.category)
            .unwrap_or(DEFAULT_CATEGORY)
    }

    /// Map a status code on its own, if it is meaningful
    pub fn classify_status(&self, status: u16) -> Option<ErrorCategory> {
        match status {
            401 | 403 => Some(ErrorCategory::Authentication),
            408 => Some(ErrorCategory::Network),
            429 => Some(ErrorCategory::RateLimiting),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => None,
        }
    }

    /// Classify a full signal: a mapped status code wins over the message
    pub fn classify_signal(&self, signal: &FailureSignal) -> ErrorCategory {
        signal
            .status
            .and_then(|status| self.classify_status(status))
            .unwrap_or_else(|| self.classify(signal.message.as_deref()))
    }
}
