//! Evolution API client: sends WhatsApp text messages.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::channels::Messenger;
use crate::config::EvolutionConfig;
use crate::error::MessagingError;

/// Typing delay the transport shows before delivering, in milliseconds.
const PRESENCE_DELAY_MS: u64 = 1200;

/// Evolution API transport.
pub struct EvolutionClient {
    base_url: String,
    api_key: SecretString,
    instance: String,
    timeout: std::time::Duration,
    client: reqwest::Client,
}

impl EvolutionClient {
    pub fn new(config: &EvolutionConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            instance: config.instance.clone(),
            timeout: config.timeout,
            client: reqwest::Client::new(),
        }
    }

    fn send_text_url(&self) -> String {
        format!("{}/message/sendText/{}", self.base_url, self.instance)
    }
}

/// JSON body for `sendText`.
fn send_text_body(recipient: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "number": recipient,
        "options": {
            "delay": PRESENCE_DELAY_MS,
            "presence": "composing",
            "linkPreview": false
        },
        "textMessage": { "text": text }
    })
}

#[async_trait]
impl Messenger for EvolutionClient {
    fn name(&self) -> &str {
        "evolution"
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), MessagingError> {
        let resp = self
            .client
            .post(self.send_text_url())
            .header("apikey", self.api_key.expose_secret())
            .timeout(self.timeout)
            .json(&send_text_body(recipient, text))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MessagingError::Timeout {
                        transport: "evolution".into(),
                        timeout: self.timeout,
                    }
                } else {
                    MessagingError::SendFailed {
                        transport: "evolution".into(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MessagingError::SendFailed {
                transport: "evolution".into(),
                reason: format!("sendText returned {status}: {body}"),
            });
        }

        tracing::debug!(recipient, "Evolution sendText delivered");
        Ok(())
    }
}
