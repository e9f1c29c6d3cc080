//! AI workflow client.

pub mod n8n;

use async_trait::async_trait;

use crate::error::WorkflowError;
use crate::pipeline::types::MessageKind;

pub use n8n::N8nClient;

/// Everything the workflow needs to answer one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRequest {
    /// Rendered recent conversation, oldest first.
    pub context: String,
    pub message: String,
    pub phone: String,
    pub name: Option<String>,
    pub kind: MessageKind,
    pub media: Option<String>,
    pub message_id: Option<String>,
}

/// External AI workflow.
///
/// Implementations return the reply text, or an error. A blank reply must be
/// reported as [`WorkflowError::EmptyResponse`].
#[async_trait]
pub trait AiWorkflow: Send + Sync {
    async fn invoke(&self, request: &WorkflowRequest) -> Result<String, WorkflowError>;
}
