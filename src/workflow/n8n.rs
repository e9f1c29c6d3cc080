//! n8n webhook client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::workflow::{AiWorkflow, WorkflowRequest};

/// Calls an n8n webhook and reads the reply from its JSON output.
pub struct N8nClient {
    webhook_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

/// Wire body posted to the webhook.
#[derive(Debug, Serialize)]
struct N8nPayload<'a> {
    #[serde(rename = "log-de-conversas")]
    context: &'a str,
    #[serde(rename = "pergunta-do-usuario-atual")]
    message: &'a str,
    #[serde(rename = "telefone")]
    phone: &'a str,
    #[serde(rename = "nome", skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(rename = "tipo-de-mensagem")]
    kind: &'a str,
    #[serde(rename = "midia-base64", skip_serializing_if = "Option::is_none")]
    media: Option<&'a str>,
    #[serde(rename = "id-da-mensagem", skip_serializing_if = "Option::is_none")]
    message_id: Option<&'a str>,
}

impl<'a> From<&'a WorkflowRequest> for N8nPayload<'a> {
    fn from(req: &'a WorkflowRequest) -> Self {
        Self {
            context: &req.context,
            message: &req.message,
            phone: &req.phone,
            name: req.name.as_deref(),
            kind: req.kind.as_str(),
            media: req.media.as_deref(),
            message_id: req.message_id.as_deref(),
        }
    }
}

impl N8nClient {
    pub fn new(config: &WorkflowConfig) -> Self {
        Self {
            webhook_url: config.webhook_url.clone(),
            timeout: config.timeout,
            client: reqwest::Client::new(),
        }
    }
}

/// Pull the reply out of a webhook response body.
///
/// Tries `output`, `text`, then `resposta` on a JSON object (or the first
/// element of a JSON array). Non-JSON bodies are used verbatim.
pub fn parse_reply(body: &str) -> Result<String, WorkflowError> {
    let reply = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Array(items)) => items
            .first()
            .and_then(reply_field)
            .unwrap_or_else(|| body.to_string()),
        Ok(value @ serde_json::Value::Object(_)) => {
            reply_field(&value).unwrap_or_else(|| body.to_string())
        }
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Null) => String::new(),
        _ => body.to_string(),
    };

    let reply = reply.trim();
    if reply.is_empty() {
        return Err(WorkflowError::EmptyResponse);
    }
    Ok(reply.to_string())
}

fn reply_field(value: &serde_json::Value) -> Option<String> {
    ["output", "text", "resposta"].iter().find_map(|key| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    })
}

#[async_trait]
impl AiWorkflow for N8nClient {
    async fn invoke(&self, request: &WorkflowRequest) -> Result<String, WorkflowError> {
        tracing::info!(phone = %request.phone, kind = %request.kind, "Sending message to n8n");

        let resp = self
            .client
            .post(&self.webhook_url)
            .timeout(self.timeout)
            .json(&N8nPayload::from(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WorkflowError::Timeout {
                        timeout: self.timeout,
                    }
                } else {
                    WorkflowError::RequestFailed {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                WorkflowError::Timeout {
                    timeout: self.timeout,
                }
            } else {
                WorkflowError::RequestFailed {
                    reason: e.to_string(),
                }
            }
        })?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "n8n returned an error status");
            return Err(WorkflowError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        parse_reply(&body)
    }
}
