//! Item processor: runs one claimed queue item through the pipeline.
//!
//! Flow:
//! 1. Extract routing fields (missing sender ⇒ `failed`, not retried)
//! 2. Type check (unsupported ⇒ notice, `completed`)
//! 3. Identify or create the user
//! 4. Log the inbound message
//! 5. Lead quota (non-clients only)
//! 6. Account gates: canceled, blocked, not compliant
//! 7. Context from the trailing window
//! 8. AI call ⇒ reply, or `failed` for the retry agent
//!
//! Steps 3–8 hold the sender's [`UserLocks`] entry. Every path writes at
//! least one processing step and leaves the item `completed` or `failed`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::channels::Messenger;
use crate::config::FlowConfig;
use crate::error::{PipelineError, WorkflowError};
use crate::pipeline::context::{render_context, window_start};
use crate::pipeline::extract::extract_message;
use crate::pipeline::locks::UserLocks;
use crate::pipeline::rules::{StopReason, check_eligibility, check_lead_quota};
use crate::pipeline::types::{ExtractedMessage, ItemOutcome, MessageKind};
use crate::store::{Database, NewChatLog, QueueItem, User};
use crate::worker::state::{FailureKind, PipelineStep, StepStatus};
use crate::workflow::{AiWorkflow, WorkflowRequest};

/// Runs the per-item pipeline. Owns every status transition of the item it
/// is handed.
pub struct ItemProcessor {
    db: Arc<dyn Database>,
    messenger: Arc<dyn Messenger>,
    workflow: Arc<dyn AiWorkflow>,
    flow: FlowConfig,
    workflow_timeout: Duration,
    locks: UserLocks,
}

impl ItemProcessor {
    pub fn new(
        db: Arc<dyn Database>,
        messenger: Arc<dyn Messenger>,
        workflow: Arc<dyn AiWorkflow>,
        flow: FlowConfig,
        workflow_timeout: Duration,
    ) -> Self {
        Self {
            db,
            messenger,
            workflow,
            flow,
            workflow_timeout,
            locks: UserLocks::new(),
        }
    }

    /// Process one claimed item. Never fails: every error is recorded on the
    /// item itself.
    pub async fn process(&self, item: &QueueItem) -> ItemOutcome {
        info!(item_id = item.id, attempts = item.attempts, "Processing queue item");

        match self.run(item).await {
            Ok(outcome) => {
                debug!(item_id = item.id, ?outcome, "Queue item finished");
                outcome
            }
            Err(e) => {
                error!(item_id = item.id, error = %e, "Queue item failed");
                if let Err(log_err) = self
                    .db
                    .log_step(item.id, PipelineStep::Error, StepStatus::Error, &e.to_string())
                    .await
                {
                    warn!(item_id = item.id, error = %log_err, "Failed to record error step");
                }
                self.fail(item.id, FailureKind::Transient).await
            }
        }
    }

    async fn run(&self, item: &QueueItem) -> Result<ItemOutcome, PipelineError> {
        self.step(item.id, PipelineStep::Start, StepStatus::Success, "processing started")
            .await?;

        // 1. Extract
        let msg = match extract_message(&item.payload) {
            Ok(msg) => msg,
            Err(PipelineError::MalformedPayload(reason)) => {
                warn!(item_id = item.id, %reason, "Unroutable payload");
                self.step(item.id, PipelineStep::Extract, StepStatus::Error, &reason)
                    .await?;
                return Ok(self.fail(item.id, FailureKind::Malformed).await);
            }
            Err(e) => return Err(e),
        };

        // 2. Type check
        if !msg.kind.is_supported() {
            info!(item_id = item.id, kind = %msg.kind, "Unsupported message kind");
            self.notify(&msg.phone, &self.flow.notices.unsupported_type)
                .await;
            self.step(
                item.id,
                PipelineStep::TypeCheck,
                StepStatus::Stopped,
                &format!("unsupported type: {}", msg.kind),
            )
            .await?;
            return self.complete_stopped(item.id, PipelineStep::TypeCheck).await;
        }
        if msg.kind == MessageKind::Text && msg.text.trim().is_empty() {
            self.step(item.id, PipelineStep::Extract, StepStatus::Skipped, "message has no text")
                .await?;
            return self.complete_stopped(item.id, PipelineStep::Extract).await;
        }

        let _guard = self.locks.acquire(&msg.phone).await;

        // 3. Identify
        let user = self.identify_user(&msg).await?;
        self.step(
            item.id,
            PipelineStep::IdentifyUser,
            StepStatus::Success,
            &format!("user {} ({})", user.id, user.phone),
        )
        .await?;

        // 4. Inbound log, once per queue item across attempts
        let inbound_id = match self.db.find_inbound_for_item(item.id).await? {
            Some(id) => {
                debug!(item_id = item.id, chat_log_id = id, "Inbound message already logged");
                id
            }
            None => {
                self.db
                    .insert_chat_log(
                        &NewChatLog::inbound(
                            user.id,
                            &msg.text,
                            msg.kind.clone(),
                            msg.media.clone(),
                            msg.message_id.clone(),
                        )
                        .for_item(item.id),
                    )
                    .await?
            }
        };

        // 5. Lead quota
        if !user.is_client {
            let replies = self.db.count_bot_replies(user.id).await?;
            if let Some(reason) = check_lead_quota(&user, replies, self.flow.lead_reply_limit) {
                return self.stop(item.id, &user, reason).await;
            }
        }

        // 6. Account gates
        if let Some(reason) = check_eligibility(&user) {
            return self.stop(item.id, &user, reason).await;
        }

        // 7. Context
        let since = window_start(Utc::now(), self.flow.context_window);
        let history = self.db.chat_logs_since(user.id, since, inbound_id).await?;
        let request = WorkflowRequest {
            context: render_context(&history),
            message: msg.text.clone(),
            phone: msg.phone.clone(),
            name: msg.name.clone().or_else(|| user.name.clone()),
            kind: msg.kind.clone(),
            media: msg.media.clone(),
            message_id: msg.message_id.clone(),
        };

        // 8. AI call
        self.step(
            item.id,
            PipelineStep::AiProcess,
            StepStatus::Processing,
            &format!("sending to workflow ({} context entries)", history.len()),
        )
        .await?;

        let result = match tokio::time::timeout(self.workflow_timeout, self.workflow.invoke(&request))
            .await
        {
            Ok(Ok(reply)) if reply.trim().is_empty() => Err(WorkflowError::EmptyResponse),
            Ok(result) => result,
            Err(_) => Err(WorkflowError::Timeout {
                timeout: self.workflow_timeout,
            }),
        };

        match result {
            Ok(reply) => self.deliver_reply(item.id, &user, &reply).await,
            Err(e) if e.is_timeout() => {
                warn!(item_id = item.id, error = %e, "Workflow timed out");
                self.step(item.id, PipelineStep::Timeout, StepStatus::Error, &e.to_string())
                    .await?;
                Ok(self.fail(item.id, FailureKind::Transient).await)
            }
            Err(e) => {
                warn!(item_id = item.id, error = %e, "Workflow call failed");
                self.step(item.id, PipelineStep::AiError, StepStatus::Error, &e.to_string())
                    .await?;
                Ok(self.fail(item.id, FailureKind::Transient).await)
            }
        }
    }

    /// Look up the sender, creating them on first contact and refreshing a
    /// changed display name.
    async fn identify_user(&self, msg: &ExtractedMessage) -> Result<User, PipelineError> {
        let user = match self.db.get_user_by_phone(&msg.phone).await? {
            Some(user) => user,
            None => {
                info!(phone = %msg.phone, "New contact");
                return Ok(self.db.create_user(&msg.phone, msg.name.as_deref()).await?);
            }
        };

        match msg.name.as_deref() {
            Some(name) if user.name.as_deref() != Some(name) => {
                self.db.update_user_name(user.id, name).await?;
                Ok(User {
                    name: Some(name.to_string()),
                    ..user
                })
            }
            _ => Ok(user),
        }
    }

    async fn deliver_reply(
        &self,
        item_id: i64,
        user: &User,
        reply: &str,
    ) -> Result<ItemOutcome, PipelineError> {
        self.db
            .insert_chat_log(&NewChatLog::reply(user.id, reply).for_item(item_id))
            .await?;

        let details = match self.messenger.send_text(&user.phone, reply).await {
            Ok(()) => "reply sent".to_string(),
            Err(e) => {
                warn!(item_id, phone = %user.phone, error = %e, "Reply delivery failed");
                self.step(item_id, PipelineStep::Delivery, StepStatus::Error, &e.to_string())
                    .await?;
                "reply generated; delivery failed".to_string()
            }
        };

        self.step(item_id, PipelineStep::Response, StepStatus::Success, &details)
            .await?;
        self.db.mark_completed(item_id).await?;
        info!(item_id, phone = %user.phone, "Reply delivered");
        Ok(ItemOutcome::Replied)
    }

    /// End the pipeline on a policy gate.
    async fn stop(
        &self,
        item_id: i64,
        user: &User,
        reason: StopReason,
    ) -> Result<ItemOutcome, PipelineError> {
        info!(item_id, phone = %user.phone, ?reason, "Pipeline stopped by policy");
        self.notify(&user.phone, reason.notice(&self.flow.notices))
            .await;
        self.step(item_id, reason.step(), StepStatus::Stopped, reason.details())
            .await?;
        self.complete_stopped(item_id, reason.step()).await
    }

    async fn complete_stopped(
        &self,
        item_id: i64,
        step: PipelineStep,
    ) -> Result<ItemOutcome, PipelineError> {
        self.db.mark_completed(item_id).await?;
        Ok(ItemOutcome::Stopped { step })
    }

    async fn fail(&self, item_id: i64, kind: FailureKind) -> ItemOutcome {
        if let Err(e) = self.db.mark_failed(item_id, kind).await {
            error!(item_id, error = %e, "Failed to mark item failed");
        }
        ItemOutcome::Failed { kind }
    }

    /// Send a fixed notice. Delivery failures are logged and ignored.
    async fn notify(&self, phone: &str, text: &str) {
        if let Err(e) = self.messenger.send_text(phone, text).await {
            warn!(phone, transport = self.messenger.name(), error = %e, "Notice delivery failed");
        }
    }

    async fn step(
        &self,
        item_id: i64,
        step: PipelineStep,
        status: StepStatus,
        details: &str,
    ) -> Result<(), PipelineError> {
        self.db.log_step(item_id, step, status, details).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{FakeMessenger, FakeWorkflow, text_payload};
    use crate::store::{LibSqlBackend, UserFlags};
    use crate::worker::state::QueueStatus;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    struct Harness {
        db: Arc<LibSqlBackend>,
        messenger: Arc<FakeMessenger>,
        workflow: Arc<FakeWorkflow>,
        processor: ItemProcessor,
    }

    async fn harness(workflow: FakeWorkflow) -> Harness {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let messenger = Arc::new(FakeMessenger::default());
        let workflow = Arc::new(workflow);
        let processor = ItemProcessor::new(
            db.clone(),
            messenger.clone(),
            workflow.clone(),
            FlowConfig::default(),
            Duration::from_millis(200),
        );
        Harness {
            db,
            messenger,
            workflow,
            processor,
        }
    }

    async fn claim_one(db: &LibSqlBackend, payload: serde_json::Value) -> QueueItem {
        db.enqueue(&payload).await.unwrap();
        db.claim_batch(1).await.unwrap().remove(0)
    }

    async fn steps(db: &LibSqlBackend, id: i64) -> Vec<(String, StepStatus)> {
        db.list_steps(id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.step, s.status))
            .collect()
    }

    async fn status(db: &LibSqlBackend, id: i64) -> QueueStatus {
        db.get_queue_item(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn happy_path_replies_and_completes() {
        let h = harness(FakeWorkflow::replying("Olá, Ana!")).await;
        let item = claim_one(&h.db, text_payload("5511999990000", "Ana", "oi")).await;

        let outcome = h.processor.process(&item).await;
        assert_eq!(outcome, ItemOutcome::Replied);
        assert_eq!(status(&h.db, item.id).await, QueueStatus::Completed);

        let sent = h.messenger.sent();
        assert_eq!(sent, vec![("5511999990000".to_string(), "Olá, Ana!".to_string())]);

        let user = h.db.get_user_by_phone("5511999990000").await.unwrap().unwrap();
        assert_eq!(user.name.as_deref(), Some("Ana"));
        assert_eq!(h.db.count_bot_replies(user.id).await.unwrap(), 1);

        let recorded = steps(&h.db, item.id).await;
        assert_eq!(recorded.first().unwrap().0, "START");
        assert_eq!(
            recorded.last().unwrap(),
            &("RESPONSE".to_string(), StepStatus::Success)
        );

        let requests = h.workflow.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message, "oi");
        assert_eq!(requests[0].context, "");
    }

    #[tokio::test]
    async fn missing_sender_fails_without_retry() {
        let h = harness(FakeWorkflow::replying("unused")).await;
        let item = claim_one(&h.db, json!({ "data": { "message": { "conversation": "oi" } } })).await;

        let outcome = h.processor.process(&item).await;
        assert_eq!(
            outcome,
            ItemOutcome::Failed {
                kind: FailureKind::Malformed
            }
        );
        assert!(steps(&h.db, item.id)
            .await
            .contains(&("EXTRACT".to_string(), StepStatus::Error)));
        assert!(h.db.requeue_failed(3).await.unwrap().is_empty());
        assert!(h.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn unsupported_kind_sends_notice_and_logs_nothing() {
        let h = harness(FakeWorkflow::replying("unused")).await;
        let payload = json!({
            "data": {
                "key": { "remoteJid": "5511999990000@s.whatsapp.net" },
                "message": { "videoMessage": {} },
                "messageType": "videoMessage"
            }
        });
        let item = claim_one(&h.db, payload).await;

        let outcome = h.processor.process(&item).await;
        assert_eq!(
            outcome,
            ItemOutcome::Stopped {
                step: PipelineStep::TypeCheck
            }
        );
        assert_eq!(status(&h.db, item.id).await, QueueStatus::Completed);
        assert!(steps(&h.db, item.id)
            .await
            .contains(&("TYPE_CHECK".to_string(), StepStatus::Stopped)));
        assert_eq!(
            h.messenger.sent()[0].1,
            FlowConfig::default().notices.unsupported_type
        );
        // No user row means no chat log.
        assert!(h.db.get_user_by_phone("5511999990000").await.unwrap().is_none());
        assert!(h.workflow.requests().is_empty());
    }

    #[tokio::test]
    async fn blank_text_is_skipped() {
        let h = harness(FakeWorkflow::replying("unused")).await;
        let item = claim_one(&h.db, text_payload("5511999990000", "Ana", "   ")).await;

        let outcome = h.processor.process(&item).await;
        assert_eq!(
            outcome,
            ItemOutcome::Stopped {
                step: PipelineStep::Extract
            }
        );
        assert_eq!(status(&h.db, item.id).await, QueueStatus::Completed);
        assert!(h.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn lead_quota_stops_fourth_message() {
        let h = harness(FakeWorkflow::replying("resposta")).await;
        let user = h.db.create_user("5511999990000", None).await.unwrap();
        for _ in 0..3 {
            h.db.insert_chat_log(&NewChatLog::reply(user.id, "antes"))
                .await
                .unwrap();
        }
        let item = claim_one(&h.db, text_payload("5511999990000", "Ana", "mais uma")).await;

        let outcome = h.processor.process(&item).await;
        assert_eq!(
            outcome,
            ItemOutcome::Stopped {
                step: PipelineStep::LeadRule
            }
        );
        assert!(h.workflow.requests().is_empty());
        assert_eq!(h.messenger.sent()[0].1, FlowConfig::default().notices.lead_limit);
        assert_eq!(h.db.count_bot_replies(user.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn lead_with_two_replies_proceeds() {
        let h = harness(FakeWorkflow::replying("terceira")).await;
        let user = h.db.create_user("5511999990000", None).await.unwrap();
        for _ in 0..2 {
            h.db.insert_chat_log(&NewChatLog::reply(user.id, "antes"))
                .await
                .unwrap();
        }
        let item = claim_one(&h.db, text_payload("5511999990000", "Ana", "oi")).await;

        assert_eq!(h.processor.process(&item).await, ItemOutcome::Replied);
        assert_eq!(h.workflow.requests().len(), 1);
    }

    #[tokio::test]
    async fn unset_compliance_blocks_client() {
        let h = harness(FakeWorkflow::replying("unused")).await;
        let user = h.db.create_user("5511999990000", None).await.unwrap();
        h.db.update_user_flags(
            user.id,
            &UserFlags {
                is_client: true,
                is_blocked: false,
                is_compliant: None,
                is_canceled: None,
            },
        )
        .await
        .unwrap();
        let item = claim_one(&h.db, text_payload("5511999990000", "Ana", "oi")).await;

        let outcome = h.processor.process(&item).await;
        assert_eq!(
            outcome,
            ItemOutcome::Stopped {
                step: PipelineStep::BlockRule
            }
        );
        assert_eq!(status(&h.db, item.id).await, QueueStatus::Completed);
        assert_eq!(
            h.messenger.sent()[0].1,
            FlowConfig::default().notices.non_compliant
        );
        assert!(h.workflow.requests().is_empty());
    }

    #[tokio::test]
    async fn timeout_marks_failed_transient() {
        let h = harness(FakeWorkflow::replying("late").with_delay(Duration::from_secs(5))).await;
        let item = claim_one(&h.db, text_payload("5511999990000", "Ana", "oi")).await;

        let outcome = h.processor.process(&item).await;
        assert_eq!(
            outcome,
            ItemOutcome::Failed {
                kind: FailureKind::Transient
            }
        );
        assert_eq!(status(&h.db, item.id).await, QueueStatus::Failed);
        assert!(steps(&h.db, item.id)
            .await
            .contains(&("TIMEOUT".to_string(), StepStatus::Error)));
        assert!(h.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn empty_reply_is_ai_error() {
        let h = harness(FakeWorkflow::failing(|| WorkflowError::EmptyResponse)).await;
        let item = claim_one(&h.db, text_payload("5511999990000", "Ana", "oi")).await;

        let outcome = h.processor.process(&item).await;
        assert_eq!(
            outcome,
            ItemOutcome::Failed {
                kind: FailureKind::Transient
            }
        );
        assert!(steps(&h.db, item.id)
            .await
            .contains(&("AI_ERROR".to_string(), StepStatus::Error)));
    }

    #[tokio::test]
    async fn blank_reply_is_ai_error_and_sends_nothing() {
        for reply in ["", "  \n "] {
            let h = harness(FakeWorkflow::replying(reply)).await;
            let item = claim_one(&h.db, text_payload("5511999990000", "Ana", "oi")).await;

            let outcome = h.processor.process(&item).await;
            assert_eq!(
                outcome,
                ItemOutcome::Failed {
                    kind: FailureKind::Transient
                }
            );
            assert_eq!(status(&h.db, item.id).await, QueueStatus::Failed);
            assert!(steps(&h.db, item.id)
                .await
                .contains(&("AI_ERROR".to_string(), StepStatus::Error)));
            assert!(h.messenger.sent().is_empty());

            let user = h.db.get_user_by_phone("5511999990000").await.unwrap().unwrap();
            assert_eq!(h.db.count_bot_replies(user.id).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn retried_item_logs_inbound_once() {
        let slow = harness(FakeWorkflow::replying("late").with_delay(Duration::from_secs(5))).await;
        let item = claim_one(&slow.db, text_payload("5511999990000", "Ana", "oi")).await;
        assert_eq!(
            slow.processor.process(&item).await,
            ItemOutcome::Failed {
                kind: FailureKind::Transient
            }
        );
        assert_eq!(slow.db.requeue_failed(3).await.unwrap(), vec![item.id]);

        let workflow = Arc::new(FakeWorkflow::replying("olá"));
        let processor = ItemProcessor::new(
            slow.db.clone(),
            Arc::new(FakeMessenger::default()),
            workflow.clone(),
            FlowConfig::default(),
            Duration::from_millis(200),
        );
        let retried = slow.db.claim_batch(1).await.unwrap().remove(0);
        assert_eq!(retried.attempts, 1);
        assert_eq!(processor.process(&retried).await, ItemOutcome::Replied);

        let requests = workflow.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].context, "");

        let user = slow.db.get_user_by_phone("5511999990000").await.unwrap().unwrap();
        let rows = slow
            .db
            .chat_logs_since(user.id, Utc::now() - ChronoDuration::minutes(5), 0)
            .await
            .unwrap();
        let inbound: Vec<_> = rows.iter().filter(|r| r.sent_by_user).collect();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].queue_item_id, Some(item.id));
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn delivery_failure_still_completes() {
        let h = harness(FakeWorkflow::replying("olá")).await;
        h.messenger.fail_sends(true);
        let item = claim_one(&h.db, text_payload("5511999990000", "Ana", "oi")).await;

        assert_eq!(h.processor.process(&item).await, ItemOutcome::Replied);
        assert_eq!(status(&h.db, item.id).await, QueueStatus::Completed);
        assert!(steps(&h.db, item.id)
            .await
            .contains(&("DELIVERY".to_string(), StepStatus::Error)));
    }

    #[tokio::test]
    async fn context_uses_window_and_excludes_current() {
        let h = harness(FakeWorkflow::replying("ok")).await;
        let user = h.db.create_user("5511999990000", Some("Ana")).await.unwrap();
        let now = Utc::now();
        h.db.insert_chat_log(
            &NewChatLog::inbound(user.id, "antiga", MessageKind::Text, None, None)
                .at(now - ChronoDuration::minutes(40)),
        )
        .await
        .unwrap();
        h.db.insert_chat_log(
            &NewChatLog::inbound(user.id, "recente", MessageKind::Text, None, None)
                .at(now - ChronoDuration::minutes(20)),
        )
        .await
        .unwrap();
        let item = claim_one(&h.db, text_payload("5511999990000", "Ana", "atual")).await;

        h.processor.process(&item).await;
        let requests = h.workflow.requests();
        assert_eq!(requests[0].context, "Usuário: recente\n");
        assert_eq!(requests[0].message, "atual");
    }

    #[tokio::test]
    async fn name_is_refreshed_on_later_contact() {
        let h = harness(FakeWorkflow::replying("ok")).await;
        h.db.create_user("5511999990000", Some("Old")).await.unwrap();
        let item = claim_one(&h.db, text_payload("5511999990000", "New", "oi")).await;

        h.processor.process(&item).await;
        let user = h.db.get_user_by_phone("5511999990000").await.unwrap().unwrap();
        assert_eq!(user.name.as_deref(), Some("New"));
    }
}
