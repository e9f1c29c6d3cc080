//! Queue item state machine and step vocabulary.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be claimed by the dispatcher.
    Pending,
    /// Claimed; owned exclusively by one item processor.
    Processing,
    /// Handled. Never revisited.
    Completed,
    /// Failed this attempt. The retry agent may revive it.
    Failed,
}

impl QueueStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: QueueStatus) -> bool {
        use QueueStatus::*;

        matches!(
            (self, target),
            // Claim
            (Pending, Processing) |
            // Processor outcome
            (Processing, Completed) | (Processing, Failed) |
            // Retry agent
            (Failed, Pending)
        )
    }

    /// Terminal for the current attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a status string from the DB. Unknown values read as pending.
    pub fn from_db(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why an item ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unroutable payload. Never retried.
    Malformed,
    /// Dependency failure (AI timeout or error, crash). Retried up to the cap.
    Transient,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Transient => "transient",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "malformed" => Some(Self::Malformed),
            "transient" => Some(Self::Transient),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome recorded on a processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
    Stopped,
    Skipped,
    Processing,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Skipped => "skipped",
            Self::Processing => "processing",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "error" => Self::Error,
            "stopped" => Self::Stopped,
            "skipped" => Self::Skipped,
            _ => Self::Processing,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named pipeline stage written to the step log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStep {
    Start,
    Extract,
    TypeCheck,
    IdentifyUser,
    LeadRule,
    BlockRule,
    AiProcess,
    Timeout,
    AiError,
    Response,
    Delivery,
    Error,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Extract => "EXTRACT",
            Self::TypeCheck => "TYPE_CHECK",
            Self::IdentifyUser => "IDENTIFY_USER",
            Self::LeadRule => "LEAD_RULE",
            Self::BlockRule => "BLOCK_RULE",
            Self::AiProcess => "AI_PROCESS",
            Self::Timeout => "TIMEOUT",
            Self::AiError => "AI_ERROR",
            Self::Response => "RESPONSE",
            Self::Delivery => "DELIVERY",
            Self::Error => "ERROR",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        let step = match s {
            "START" => Self::Start,
            "EXTRACT" => Self::Extract,
            "TYPE_CHECK" => Self::TypeCheck,
            "IDENTIFY_USER" => Self::IdentifyUser,
            "LEAD_RULE" => Self::LeadRule,
            "BLOCK_RULE" => Self::BlockRule,
            "AI_PROCESS" => Self::AiProcess,
            "TIMEOUT" => Self::Timeout,
            "AI_ERROR" => Self::AiError,
            "RESPONSE" => Self::Response,
            "DELIVERY" => Self::Delivery,
            "ERROR" => Self::Error,
            _ => return None,
        };
        Some(step)
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
