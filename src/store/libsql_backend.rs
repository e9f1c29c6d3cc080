//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width UTC RFC 3339 with microseconds so that text order is time order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::pipeline::types::MessageKind;
use crate::store::migrations;
use crate::store::traits::{
    ChatLogEntry, Database, NewChatLog, ProcessingStep, QueueItem, User, UserFlags,
};
use crate::worker::state::{FailureKind, PipelineStep, QueueStatus, StepStatus};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Pool(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Log why a guarded status update touched no row.
    async fn explain_rejected(&self, id: i64, target: QueueStatus, op: &str) {
        match self.get_queue_item(id).await {
            Ok(Some(item)) if !item.status.can_transition_to(target) => warn!(
                item_id = id,
                from = %item.status,
                to = %target,
                "{op}: transition not allowed"
            ),
            Ok(Some(item)) => warn!(
                item_id = id,
                status = %item.status,
                "{op}: item changed underneath the update"
            ),
            Ok(None) => warn!(item_id = id, "{op}: no such item"),
            Err(e) => warn!(item_id = id, error = %e, "{op}: status lookup failed"),
        }
    }

    /// Fetch a user by primary key.
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_user(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_user row: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp encoding: `2026-01-02T03:04:05.123456Z`.
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now_ts() -> String {
    fmt_ts(Utc::now())
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_bool(b: Option<bool>) -> libsql::Value {
    match b {
        Some(b) => libsql::Value::Integer(b as i64),
        None => libsql::Value::Null,
    }
}

/// Read a nullable INTEGER column as a tri-state bool.
fn get_opt_bool(row: &libsql::Row, idx: i32) -> Result<Option<bool>, libsql::Error> {
    match row.get_value(idx)? {
        libsql::Value::Integer(v) => Ok(Some(v != 0)),
        _ => Ok(None),
    }
}

fn get_opt_i64(row: &libsql::Row, idx: i32) -> Result<Option<i64>, libsql::Error> {
    match row.get_value(idx)? {
        libsql::Value::Integer(v) => Ok(Some(v)),
        _ => Ok(None),
    }
}

fn get_opt_text(row: &libsql::Row, idx: i32) -> Result<Option<String>, libsql::Error> {
    match row.get_value(idx)? {
        libsql::Value::Text(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

/// Column order matches QUEUE_COLUMNS:
/// 0:id, 1:payload, 2:status, 3:attempts, 4:failure_kind, 5:created_at, 6:updated_at
fn row_to_queue_item(row: &libsql::Row) -> Result<QueueItem, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("queue item row: {e}"));

    let payload_str: String = row.get(1).map_err(read)?;
    let payload = serde_json::from_str(&payload_str)
        .map_err(|e| DatabaseError::Serialization(format!("queue item payload: {e}")))?;
    let status_str: String = row.get(2).map_err(read)?;
    let attempts: i64 = row.get(3).map_err(read)?;
    let failure_kind = get_opt_text(row, 4)
        .map_err(read)?
        .and_then(|s| FailureKind::from_db(&s));
    let created_str: String = row.get(5).map_err(read)?;
    let updated_str: String = row.get(6).map_err(read)?;

    Ok(QueueItem {
        id: row.get(0).map_err(read)?,
        payload,
        status: QueueStatus::from_db(&status_str),
        attempts: attempts.max(0) as u32,
        failure_kind,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_step(row: &libsql::Row) -> Result<ProcessingStep, libsql::Error> {
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(5)?;
    Ok(ProcessingStep {
        id: row.get(0)?,
        queue_item_id: row.get(1)?,
        step: row.get(2)?,
        status: StepStatus::from_db(&status_str),
        details: row.get(4)?,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_user(row: &libsql::Row) -> Result<User, libsql::Error> {
    Ok(User {
        id: row.get(0)?,
        phone: row.get(1)?,
        name: get_opt_text(row, 2)?,
        is_client: row.get::<i64>(3)? != 0,
        is_blocked: row.get::<i64>(4)? != 0,
        is_compliant: get_opt_bool(row, 5)?,
        is_canceled: get_opt_bool(row, 6)?,
    })
}

fn row_to_chat_log(row: &libsql::Row) -> Result<ChatLogEntry, libsql::Error> {
    let kind_str: String = row.get(5)?;
    let created_str: String = row.get(9)?;
    Ok(ChatLogEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message_text: get_opt_text(row, 2)?,
        response_text: get_opt_text(row, 3)?,
        sent_by_user: row.get::<i64>(4)? != 0,
        kind: MessageKind::from_db(&kind_str),
        media: get_opt_text(row, 6)?,
        external_id: get_opt_text(row, 7)?,
        queue_item_id: get_opt_i64(row, 8)?,
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const QUEUE_COLUMNS: &str = "id, payload, status, attempts, failure_kind, created_at, updated_at";

const STEP_COLUMNS: &str = "id, queue_item_id, step, status, details, created_at";

const USER_COLUMNS: &str = "id, phone, name, is_client, is_blocked, is_compliant, is_canceled";

const CHAT_LOG_COLUMNS: &str =
    "id, user_id, message_text, response_text, sent_by_user, kind, media, external_id, queue_item_id, created_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Queue ───────────────────────────────────────────────────────

    async fn enqueue(&self, payload: &serde_json::Value) -> Result<i64, DatabaseError> {
        let now = now_ts();
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO queue_items (payload, status, attempts, created_at, updated_at)
                 VALUES (?1, 'pending', 0, ?2, ?2) RETURNING id",
                params![payload.to_string(), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("enqueue: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("enqueue: {e}")))?
            .ok_or_else(|| DatabaseError::Query("enqueue: no id returned".into()))?;
        let id: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("enqueue id: {e}")))?;

        debug!(item_id = id, "Queue item enqueued");
        Ok(id)
    }

    async fn enqueue_batch(
        &self,
        payloads: &[serde_json::Value],
    ) -> Result<Vec<i64>, DatabaseError> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let now = now_ts();
        let placeholders = (0..payloads.len())
            .map(|i| format!("(?{}, 'pending', 0, ?1, ?1)", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let mut values = vec![libsql::Value::Text(now)];
        values.extend(payloads.iter().map(|p| libsql::Value::Text(p.to_string())));

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO queue_items (payload, status, attempts, created_at, updated_at)
                     VALUES {placeholders} RETURNING id"
                ),
                libsql::params_from_iter(values),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("enqueue_batch: {e}")))?;

        let mut ids = Vec::with_capacity(payloads.len());
        loop {
            match rows.next().await {
                Ok(Some(row)) => ids.push(
                    row.get::<i64>(0)
                        .map_err(|e| DatabaseError::Query(format!("enqueue_batch id: {e}")))?,
                ),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("enqueue_batch: {e}"))),
            }
        }

        // RETURNING order is unspecified; ids follow VALUES order.
        ids.sort_unstable();
        debug!(count = ids.len(), "Queue items enqueued");
        Ok(ids)
    }

    async fn claim_batch(&self, max: usize) -> Result<Vec<QueueItem>, DatabaseError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        // One statement: selection and status flip happen under the same
        // write lock, so concurrent claimers can never see the same row as pending.
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE queue_items SET status = 'processing', updated_at = ?1
                     WHERE id IN (
                         SELECT id FROM queue_items
                         WHERE status = 'pending'
                         ORDER BY created_at ASC, id ASC
                         LIMIT ?2
                     ) AND status = 'pending'
                     RETURNING {QUEUE_COLUMNS}"
                ),
                params![now_ts(), max as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_batch: {e}")))?;

        let mut items = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => items.push(row_to_queue_item(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("claim_batch: {e}"))),
            }
        }

        // RETURNING order is unspecified.
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn get_queue_item(&self, id: i64) -> Result<Option<QueueItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {QUEUE_COLUMNS} FROM queue_items WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_queue_item: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_queue_item(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_queue_item: {e}"))),
        }
    }

    async fn mark_completed(&self, id: i64) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE queue_items SET status = 'completed', failure_kind = NULL, updated_at = ?2
                 WHERE id = ?1 AND status = 'processing'",
                params![id, now_ts()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_completed: {e}")))?;

        if changed == 0 {
            self.explain_rejected(id, QueueStatus::Completed, "mark_completed")
                .await;
        }
        Ok(changed > 0)
    }

    async fn mark_failed(&self, id: i64, kind: FailureKind) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE queue_items SET status = 'failed', failure_kind = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'processing'",
                params![id, kind.as_str(), now_ts()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_failed: {e}")))?;

        if changed == 0 {
            self.explain_rejected(id, QueueStatus::Failed, "mark_failed")
                .await;
        }
        Ok(changed > 0)
    }

    async fn requeue(&self, id: i64) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE queue_items
                 SET status = 'pending', attempts = attempts + 1, updated_at = ?2
                 WHERE id = ?1 AND status = 'failed'",
                params![id, now_ts()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("requeue: {e}")))?;
        if changed == 0 {
            self.explain_rejected(id, QueueStatus::Pending, "requeue").await;
        }
        Ok(changed > 0)
    }

    async fn requeue_failed(&self, max_attempts: u32) -> Result<Vec<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "UPDATE queue_items
                 SET status = 'pending', attempts = attempts + 1, updated_at = ?2
                 WHERE status = 'failed'
                   AND failure_kind = 'transient'
                   AND attempts < ?1
                 RETURNING id",
                params![max_attempts as i64, now_ts()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("requeue_failed: {e}")))?;

        let mut ids = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: i64 = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("requeue_failed row: {e}")))?;
            ids.push(id);
        }
        ids.sort_unstable();
        Ok(ids)
    }

    async fn recover_orphaned(&self) -> Result<usize, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE queue_items SET status = 'failed', failure_kind = 'transient', updated_at = ?1
                 WHERE status = 'processing'",
                params![now_ts()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recover_orphaned: {e}")))?;

        if changed > 0 {
            info!(count = changed, "Recovered items stranded in processing");
        }
        Ok(changed as usize)
    }

    // ── Processing steps ────────────────────────────────────────────

    async fn log_step(
        &self,
        queue_item_id: i64,
        step: PipelineStep,
        status: StepStatus,
        details: &str,
    ) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO processing_steps (queue_item_id, step, status, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
                params![queue_item_id, step.as_str(), status.as_str(), details, now_ts()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("log_step: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("log_step: {e}")))?
            .ok_or_else(|| DatabaseError::Query("log_step: no id returned".into()))?;
        row.get(0)
            .map_err(|e| DatabaseError::Query(format!("log_step id: {e}")))
    }

    async fn list_steps(&self, queue_item_id: i64) -> Result<Vec<ProcessingStep>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {STEP_COLUMNS} FROM processing_steps
                     WHERE queue_item_id = ?1 ORDER BY id ASC"
                ),
                params![queue_item_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_steps: {e}")))?;

        let mut steps = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            steps.push(
                row_to_step(&row).map_err(|e| DatabaseError::Query(format!("list_steps row: {e}")))?,
            );
        }
        Ok(steps)
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn get_user_by_phone(&self, phone: &str) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE phone = ?1"),
                params![phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user_by_phone: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_user(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_user_by_phone row: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user_by_phone: {e}"))),
        }
    }

    async fn create_user(&self, phone: &str, name: Option<&str>) -> Result<User, DatabaseError> {
        let now = now_ts();
        self.conn()
            .execute(
                "INSERT INTO users (phone, name, is_client, is_blocked, is_compliant, is_canceled, created_at, updated_at)
                 VALUES (?1, ?2, 0, 0, 1, 0, ?3, ?3)
                 ON CONFLICT(phone) DO NOTHING",
                params![phone, opt_text(name), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_user: {e}")))?;

        self.get_user_by_phone(phone)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "user".into(),
                id: phone.to_string(),
            })
    }

    async fn update_user_name(&self, user_id: i64, name: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE users SET name = ?2, updated_at = ?3 WHERE id = ?1",
                params![user_id, name, now_ts()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_user_name: {e}")))?;
        Ok(())
    }

    async fn update_user_flags(
        &self,
        user_id: i64,
        flags: &UserFlags,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE users
                 SET is_client = ?2, is_blocked = ?3, is_compliant = ?4, is_canceled = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    user_id,
                    flags.is_client as i64,
                    flags.is_blocked as i64,
                    opt_bool(flags.is_compliant),
                    opt_bool(flags.is_canceled),
                    now_ts()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_user_flags: {e}")))?;

        if changed == 0 && self.get_user(user_id).await?.is_none() {
            return Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: user_id.to_string(),
            });
        }
        Ok(())
    }

    // ── Chat logs ───────────────────────────────────────────────────

    async fn insert_chat_log(&self, entry: &NewChatLog) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO chat_logs (user_id, message_text, response_text, sent_by_user, kind, media, external_id, queue_item_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) RETURNING id",
                params![
                    entry.user_id,
                    opt_text(entry.message_text.as_deref()),
                    opt_text(entry.response_text.as_deref()),
                    entry.sent_by_user as i64,
                    entry.kind.as_str(),
                    opt_text(entry.media.as_deref()),
                    opt_text(entry.external_id.as_deref()),
                    entry
                        .queue_item_id
                        .map_or(libsql::Value::Null, libsql::Value::Integer),
                    fmt_ts(entry.created_at)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_chat_log: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_chat_log: {e}")))?
            .ok_or_else(|| DatabaseError::Query("insert_chat_log: no id returned".into()))?;
        row.get(0)
            .map_err(|e| DatabaseError::Query(format!("insert_chat_log id: {e}")))
    }

    async fn count_bot_replies(&self, user_id: i64) -> Result<u32, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM chat_logs WHERE user_id = ?1 AND sent_by_user = 0",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_bot_replies: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_bot_replies row: {e}")))?;
                u32::try_from(count)
                    .map_err(|e| DatabaseError::Query(format!("count_bot_replies: {e}")))
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_bot_replies: {e}"))),
        }
    }

    async fn find_inbound_for_item(
        &self,
        queue_item_id: i64,
    ) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM chat_logs WHERE queue_item_id = ?1 AND sent_by_user = 1",
                params![queue_item_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_inbound_for_item: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("find_inbound_for_item row: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_inbound_for_item: {e}"))),
        }
    }

    async fn chat_logs_since(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
        exclude_id: i64,
    ) -> Result<Vec<ChatLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CHAT_LOG_COLUMNS} FROM chat_logs
                     WHERE user_id = ?1 AND created_at >= ?2 AND id != ?3
                     ORDER BY created_at ASC, id ASC"
                ),
                params![user_id, fmt_ts(since), exclude_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("chat_logs_since: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            entries.push(
                row_to_chat_log(&row)
                    .map_err(|e| DatabaseError::Query(format!("chat_logs_since row: {e}")))?,
            );
        }
        Ok(entries)
    }
}
