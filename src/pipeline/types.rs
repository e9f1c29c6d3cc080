//! Shared types for the item pipeline.

use serde::{Deserialize, Serialize};

// ── Message kind ────────────────────────────────────────────────────

/// Kind of an inbound WhatsApp message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Audio,
    /// Anything else, carrying the transport's own type name (e.g. `videoMessage`).
    Other(String),
}

impl MessageKind {
    /// Only text and audio go past the type check.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Text | Self::Audio)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Other(name) => name,
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "text" => Self::Text,
            "audio" => Self::Audio,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Extracted message ───────────────────────────────────────────────

/// Typed view of the fields the pipeline routes on.
///
/// Produced by [`crate::pipeline::extract::extract_message`]; every field
/// except `phone` and `kind` is optional in the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMessage {
    /// Sender phone number, without the `@s.whatsapp.net` suffix.
    pub phone: String,
    /// Display name supplied by the sender (`pushName`).
    pub name: Option<String>,
    pub kind: MessageKind,
    /// Message text. Audio without a caption carries a fixed placeholder.
    pub text: String,
    /// Base64 media payload (audio).
    pub media: Option<String>,
    /// Transport message id.
    pub message_id: Option<String>,
}

// ── Processor outcome ───────────────────────────────────────────────

/// How the pipeline finished for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// AI reply generated and handed to the transport.
    Replied,
    /// Pipeline ended early on a handled condition (policy gate, unsupported
    /// kind, blank text). Item is `completed`.
    Stopped { step: crate::worker::state::PipelineStep },
    /// Item is `failed`.
    Failed { kind: crate::worker::state::FailureKind },
}
