//! In-crate fakes for the store, the messaging transport and the AI workflow.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::channels::Messenger;
use crate::error::{DatabaseError, MessagingError, WorkflowError};
use crate::store::{
    ChatLogEntry, Database, LibSqlBackend, NewChatLog, ProcessingStep, QueueItem, User, UserFlags,
};
use crate::worker::state::{FailureKind, PipelineStep, StepStatus};
use crate::workflow::{AiWorkflow, WorkflowRequest};

/// In-memory store whose queue writes (`enqueue`, `enqueue_batch`,
/// `claim_batch`, `requeue_failed`) can be switched to fail.
pub struct FlakyStore {
    inner: Arc<LibSqlBackend>,
    down: AtomicBool,
    failed_calls: AtomicUsize,
}

impl FlakyStore {
    pub async fn new() -> Self {
        Self {
            inner: Arc::new(LibSqlBackend::new_memory().await.unwrap()),
            down: AtomicBool::new(false),
            failed_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Calls rejected while down.
    pub fn failed_calls(&self) -> usize {
        self.failed_calls.load(Ordering::SeqCst)
    }

    fn check(&self, op: &str) -> Result<(), DatabaseError> {
        if self.down.load(Ordering::SeqCst) {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            return Err(DatabaseError::Query(format!("{op}: store unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for FlakyStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }

    async fn enqueue(&self, payload: &serde_json::Value) -> Result<i64, DatabaseError> {
        self.check("enqueue")?;
        self.inner.enqueue(payload).await
    }

    async fn enqueue_batch(
        &self,
        payloads: &[serde_json::Value],
    ) -> Result<Vec<i64>, DatabaseError> {
        self.check("enqueue_batch")?;
        self.inner.enqueue_batch(payloads).await
    }

    async fn claim_batch(&self, max: usize) -> Result<Vec<QueueItem>, DatabaseError> {
        self.check("claim_batch")?;
        self.inner.claim_batch(max).await
    }

    async fn get_queue_item(&self, id: i64) -> Result<Option<QueueItem>, DatabaseError> {
        self.inner.get_queue_item(id).await
    }

    async fn mark_completed(&self, id: i64) -> Result<bool, DatabaseError> {
        self.inner.mark_completed(id).await
    }

    async fn mark_failed(&self, id: i64, kind: FailureKind) -> Result<bool, DatabaseError> {
        self.inner.mark_failed(id, kind).await
    }

    async fn requeue(&self, id: i64) -> Result<bool, DatabaseError> {
        self.inner.requeue(id).await
    }

    async fn requeue_failed(&self, max_attempts: u32) -> Result<Vec<i64>, DatabaseError> {
        self.check("requeue_failed")?;
        self.inner.requeue_failed(max_attempts).await
    }

    async fn recover_orphaned(&self) -> Result<usize, DatabaseError> {
        self.inner.recover_orphaned().await
    }

    async fn log_step(
        &self,
        queue_item_id: i64,
        step: PipelineStep,
        status: StepStatus,
        details: &str,
    ) -> Result<i64, DatabaseError> {
        self.inner.log_step(queue_item_id, step, status, details).await
    }

    async fn list_steps(&self, queue_item_id: i64) -> Result<Vec<ProcessingStep>, DatabaseError> {
        self.inner.list_steps(queue_item_id).await
    }

    async fn get_user_by_phone(&self, phone: &str) -> Result<Option<User>, DatabaseError> {
        self.inner.get_user_by_phone(phone).await
    }

    async fn create_user(&self, phone: &str, name: Option<&str>) -> Result<User, DatabaseError> {
        self.inner.create_user(phone, name).await
    }

    async fn update_user_name(&self, user_id: i64, name: &str) -> Result<(), DatabaseError> {
        self.inner.update_user_name(user_id, name).await
    }

    async fn update_user_flags(
        &self,
        user_id: i64,
        flags: &UserFlags,
    ) -> Result<(), DatabaseError> {
        self.inner.update_user_flags(user_id, flags).await
    }

    async fn insert_chat_log(&self, entry: &NewChatLog) -> Result<i64, DatabaseError> {
        self.inner.insert_chat_log(entry).await
    }

    async fn find_inbound_for_item(
        &self,
        queue_item_id: i64,
    ) -> Result<Option<i64>, DatabaseError> {
        self.inner.find_inbound_for_item(queue_item_id).await
    }

    async fn count_bot_replies(&self, user_id: i64) -> Result<u32, DatabaseError> {
        self.inner.count_bot_replies(user_id).await
    }

    async fn chat_logs_since(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
        exclude_id: i64,
    ) -> Result<Vec<ChatLogEntry>, DatabaseError> {
        self.inner.chat_logs_since(user_id, since, exclude_id).await
    }
}

/// Records every send.
#[derive(Default)]
pub struct FakeMessenger {
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl FakeMessenger {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), MessagingError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MessagingError::SendFailed {
                transport: "fake".into(),
                reason: "configured to fail".into(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}

/// Answers every request the same way, optionally after a delay.
pub struct FakeWorkflow {
    reply: Result<String, fn() -> WorkflowError>,
    delay: Duration,
    requests: Mutex<Vec<WorkflowRequest>>,
}

impl FakeWorkflow {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: fn() -> WorkflowError) -> Self {
        Self {
            reply: Err(error),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<WorkflowRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiWorkflow for FakeWorkflow {
    async fn invoke(&self, request: &WorkflowRequest) -> Result<String, WorkflowError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(make) => Err(make()),
        }
    }
}

/// A `messages.upsert` text event.
pub fn text_payload(phone: &str, name: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "event": "messages.upsert",
        "data": {
            "key": {
                "remoteJid": format!("{phone}@s.whatsapp.net"),
                "fromMe": false,
                "id": format!("MSG-{phone}-{}", text.len())
            },
            "pushName": name,
            "message": { "conversation": text },
            "messageType": "conversation"
        }
    })
}
