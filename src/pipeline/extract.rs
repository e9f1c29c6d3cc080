//! Tolerant decoder for Evolution API webhook events.
//!
//! Every "which key holds what" question about the payload is answered here
//! and nowhere else.

use serde_json::Value;

use crate::error::PipelineError;
use crate::pipeline::types::{ExtractedMessage, MessageKind};

/// Text recorded for an audio message that has no caption.
pub const AUDIO_PLACEHOLDER: &str = "[ÁUDIO RECEBIDO]";

/// Event name of an inbound message.
pub const MESSAGES_UPSERT: &str = "messages.upsert";

/// The `data` object of an event: `body.data` when wrapped, else `data`.
fn event_data(payload: &Value) -> Option<&Value> {
    payload
        .get("body")
        .and_then(|b| b.get("data"))
        .filter(|d| d.is_object())
        .or_else(|| payload.get("data").filter(|d| d.is_object()))
}

/// Event name, top-level or under `body`.
pub fn event_name(payload: &Value) -> Option<&str> {
    payload
        .get("event")
        .and_then(Value::as_str)
        .or_else(|| payload.get("body")?.get("event")?.as_str())
}

/// Whether the event echoes a message the bot itself sent.
pub fn is_from_me(payload: &Value) -> bool {
    event_data(payload)
        .and_then(|d| d.get("key")?.get("fromMe")?.as_bool())
        .unwrap_or(false)
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(Value::as_str)
}

/// Decode the routing fields of an inbound message.
///
/// Fails only when the sender cannot be identified.
pub fn extract_message(payload: &Value) -> Result<ExtractedMessage, PipelineError> {
    let empty = Value::Null;
    let data = event_data(payload).unwrap_or(&empty);

    let remote_jid = str_at(data, &["key", "remoteJid"])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::MalformedPayload("remoteJid not found".into()))?;

    // 5511999990000:12@s.whatsapp.net → 5511999990000
    let phone = remote_jid
        .split('@')
        .next()
        .unwrap_or(remote_jid)
        .split(':')
        .next()
        .unwrap_or_default()
        .to_string();
    if phone.is_empty() {
        return Err(PipelineError::MalformedPayload(format!(
            "remoteJid has no phone: {remote_jid}"
        )));
    }

    let name = str_at(data, &["pushName"])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let message_id = str_at(data, &["key", "id"]).map(str::to_string);

    let message = data.get("message").unwrap_or(&empty);
    let has = |key: &str| message.get(key).is_some_and(|v| !v.is_null());

    let text = str_at(message, &["conversation"])
        .filter(|s| !s.is_empty())
        .or_else(|| str_at(message, &["extendedTextMessage", "text"]))
        .unwrap_or_default()
        .to_string();

    let kind = if has("conversation") || has("extendedTextMessage") {
        MessageKind::Text
    } else if has("audioMessage") {
        MessageKind::Audio
    } else {
        let type_name = str_at(data, &["messageType"])
            .map(str::to_string)
            .or_else(|| message.as_object()?.keys().next().cloned())
            .unwrap_or_else(|| "unknown".to_string());
        MessageKind::Other(type_name)
    };

    let (text, media) = match kind {
        MessageKind::Audio => {
            let media = str_at(message, &["audioMessage", "base64"])
                .or_else(|| str_at(message, &["base64"]))
                .map(str::to_string);
            if media.is_none() {
                tracing::warn!(phone = %phone, "Audio message without base64 payload");
            }
            let text = if text.trim().is_empty() {
                AUDIO_PLACEHOLDER.to_string()
            } else {
                text
            };
            (text, media)
        }
        _ => (text, None),
    };

    Ok(ExtractedMessage {
        phone,
        name,
        kind,
        text,
        media,
        message_id,
    })
}
