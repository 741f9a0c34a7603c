/// Incident and recovery attempt records
use super::classification::ErrorCategory;
use super::retry_queue::ItemId;
use super::strategies::StrategyId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(Uuid);

impl IncidentId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(Uuid);

impl AttemptId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a failure came from. Two failures with the same source are the
/// same incident.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum IncidentSource {
    /// Queue item whose retries were exhausted
    QueueItem(ItemId),

    /// Monitored connection, by name
    Connection(String),

    /// Health-probed component, by name
    Component(String),

    /// Reported by the application; the string is its failure signature
    External(String),
}

impl fmt::Display for IncidentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentSource::QueueItem(id) => write!(f, "queue:{}", id),
            IncidentSource::Connection(name) => write!(f, "connection:{}", name),
            IncidentSource::Component(name) => write!(f, "component:{}", name),
            IncidentSource::External(signature) => write!(f, "external:{}", signature),
        }
    }
}

/// Incident severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IncidentSeverity {
    /// Raise `base` to the floor the category demands: categories that
    /// cannot be recovered automatically are always critical.
    pub fn for_category(base: IncidentSeverity, category: ErrorCategory) -> IncidentSeverity {
        match category {
            ErrorCategory::Authentication | ErrorCategory::DataCorruption => {
                base.max(IncidentSeverity::Critical)
            }
            _ => base,
        }
    }

    /// Base severity of an exhausted queue item
    pub fn for_attempts(attempt_count: u32) -> IncidentSeverity {
        if attempt_count >= 3 {
            IncidentSeverity::High
        } else {
            IncidentSeverity::Medium
        }
    }
}

impl fmt::Display for IncidentSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentSeverity::Low => write!(f, "low"),
            IncidentSeverity::Medium => write!(f, "medium"),
            IncidentSeverity::High => write!(f, "high"),
            IncidentSeverity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Active,
    Recovering,
    Resolved,
    Dismissed,
}

/// Tracked, deduplicated failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub id: IncidentId,
    pub source: IncidentSource,
    pub title: String,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: IncidentSeverity,
    pub created_at: DateTime<Utc>,
    pub affected_components: Vec<String>,
    pub status: IncidentStatus,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            IncidentStatus::Active | IncidentStatus::Recovering
        )
    }
}

/// Failure reported from outside the monitored sources
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentReport {
    /// Deduplication key
    pub signature: String,
    pub title: String,
    pub message: String,
    /// HTTP-like status code, preferred over the message for classification
    pub status: Option<u16>,
    pub severity: IncidentSeverity,
    pub affected_components: Vec<String>,
}

impl IncidentReport {
    pub fn new(signature: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            title: String::new(),
            message: message.into(),
            status: None,
            severity: IncidentSeverity::Medium,
            affected_components: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_severity(mut self, severity: IncidentSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.affected_components.push(component.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Failed,
}

/// One execution of a strategy against an incident
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryAttempt {
    pub id: AttemptId,
    pub incident_id: IncidentId,
    pub strategy_id: StrategyId,
    /// Triggered by auto-recovery rather than the user
    pub automatic: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
    pub error: Option<String>,
}
