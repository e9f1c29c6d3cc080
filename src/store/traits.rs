//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::pipeline::types::MessageKind;
use crate::worker::state::{FailureKind, PipelineStep, QueueStatus, StepStatus};

/// A unit of inbound work.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: i64,
    /// Raw webhook event. Never modified after insert.
    pub payload: serde_json::Value,
    pub status: QueueStatus,
    pub attempts: u32,
    pub failure_kind: Option<FailureKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit record for one pipeline stage of one item.
#[derive(Debug, Clone)]
pub struct ProcessingStep {
    pub id: i64,
    pub queue_item_id: i64,
    /// Stage name as stored (see [`PipelineStep::as_str`]).
    pub step: String,
    pub status: StepStatus,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

impl ProcessingStep {
    pub fn pipeline_step(&self) -> Option<PipelineStep> {
        PipelineStep::from_db(&self.step)
    }
}

/// A WhatsApp contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub phone: String,
    pub name: Option<String>,
    pub is_client: bool,
    pub is_blocked: bool,
    /// Only `Some(true)` counts as compliant.
    pub is_compliant: Option<bool>,
    pub is_canceled: Option<bool>,
}

/// Back-office account flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFlags {
    pub is_client: bool,
    pub is_blocked: bool,
    pub is_compliant: Option<bool>,
    pub is_canceled: Option<bool>,
}

/// One message exchanged with a user.
#[derive(Debug, Clone)]
pub struct ChatLogEntry {
    pub id: i64,
    pub user_id: i64,
    /// Text the user sent (inbound rows).
    pub message_text: Option<String>,
    /// Text the AI replied (outbound rows).
    pub response_text: Option<String>,
    pub sent_by_user: bool,
    pub kind: MessageKind,
    pub media: Option<String>,
    pub external_id: Option<String>,
    /// Queue item that produced this row, if any.
    pub queue_item_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`ChatLogEntry`].
#[derive(Debug, Clone)]
pub struct NewChatLog {
    pub user_id: i64,
    pub message_text: Option<String>,
    pub response_text: Option<String>,
    pub sent_by_user: bool,
    pub kind: MessageKind,
    pub media: Option<String>,
    pub external_id: Option<String>,
    pub queue_item_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl NewChatLog {
    /// Row for a message the user sent.
    pub fn inbound(
        user_id: i64,
        text: &str,
        kind: MessageKind,
        media: Option<String>,
        external_id: Option<String>,
    ) -> Self {
        Self {
            user_id,
            message_text: Some(text.to_string()),
            response_text: None,
            sent_by_user: true,
            kind,
            media,
            external_id,
            queue_item_id: None,
            created_at: Utc::now(),
        }
    }

    /// Row for an AI reply sent to the user.
    pub fn reply(user_id: i64, text: &str) -> Self {
        Self {
            user_id,
            message_text: None,
            response_text: Some(text.to_string()),
            sent_by_user: false,
            kind: MessageKind::Text,
            media: None,
            external_id: None,
            queue_item_id: None,
            created_at: Utc::now(),
        }
    }

    /// Tie the row to the queue item being processed.
    pub fn for_item(mut self, queue_item_id: i64) -> Self {
        self.queue_item_id = Some(queue_item_id);
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Backend-agnostic database trait covering the queue, step log, users,
/// and chat history.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Queue ───────────────────────────────────────────────────────

    /// Insert a `pending` item. Returns its id.
    async fn enqueue(&self, payload: &serde_json::Value) -> Result<i64, DatabaseError>;

    /// Insert every payload as `pending` in one statement: all rows land or
    /// none do. Returns ids in payload order.
    async fn enqueue_batch(&self, payloads: &[serde_json::Value]) -> Result<Vec<i64>, DatabaseError>;

    /// Atomically flip up to `max` pending items (oldest first) to
    /// `processing` and return them in claim order. No item is ever
    /// returned to two callers.
    async fn claim_batch(&self, max: usize) -> Result<Vec<QueueItem>, DatabaseError>;

    async fn get_queue_item(&self, id: i64) -> Result<Option<QueueItem>, DatabaseError>;

    /// `processing` → `completed`. Returns false if the item was not processing.
    async fn mark_completed(&self, id: i64) -> Result<bool, DatabaseError>;

    /// `processing` → `failed`. Returns false if the item was not processing.
    async fn mark_failed(&self, id: i64, kind: FailureKind) -> Result<bool, DatabaseError>;

    /// `failed` → `pending`, incrementing `attempts`. Returns false if the
    /// item was not failed.
    async fn requeue(&self, id: i64) -> Result<bool, DatabaseError>;

    /// Re-queue every transient failure with `attempts < max_attempts` in one
    /// statement. Returns the re-queued ids.
    async fn requeue_failed(&self, max_attempts: u32) -> Result<Vec<i64>, DatabaseError>;

    /// Move items stranded in `processing` by a previous process to
    /// `failed`/transient. Returns how many were moved.
    async fn recover_orphaned(&self) -> Result<usize, DatabaseError>;

    // ── Processing steps ────────────────────────────────────────────

    async fn log_step(
        &self,
        queue_item_id: i64,
        step: PipelineStep,
        status: StepStatus,
        details: &str,
    ) -> Result<i64, DatabaseError>;

    /// Steps for one item, in insertion order.
    async fn list_steps(&self, queue_item_id: i64) -> Result<Vec<ProcessingStep>, DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    async fn get_user_by_phone(&self, phone: &str) -> Result<Option<User>, DatabaseError>;

    /// Create a user with default flags, or return the existing row if the
    /// phone is already known.
    async fn create_user(&self, phone: &str, name: Option<&str>) -> Result<User, DatabaseError>;

    async fn update_user_name(&self, user_id: i64, name: &str) -> Result<(), DatabaseError>;

    async fn update_user_flags(&self, user_id: i64, flags: &UserFlags)
    -> Result<(), DatabaseError>;

    // ── Chat logs ───────────────────────────────────────────────────

    async fn insert_chat_log(&self, entry: &NewChatLog) -> Result<i64, DatabaseError>;

    /// Id of the inbound row already logged for this queue item. A retried
    /// item reuses it instead of logging the message again.
    async fn find_inbound_for_item(&self, queue_item_id: i64)
    -> Result<Option<i64>, DatabaseError>;

    /// Number of AI replies ever sent to this user.
    async fn count_bot_replies(&self, user_id: i64) -> Result<u32, DatabaseError>;

    /// Entries for this user created at or after `since`, excluding
    /// `exclude_id`, oldest first.
    async fn chat_logs_since(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
        exclude_id: i64,
    ) -> Result<Vec<ChatLogEntry>, DatabaseError>;
}
