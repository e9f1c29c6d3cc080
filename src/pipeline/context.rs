//! Prompt context assembly from recent chat history.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::store::ChatLogEntry;

/// Start of the context window ending at `now`.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
    now - window
}

/// Render entries (already windowed, oldest first) as alternating
/// user/AI lines.
pub fn render_context(entries: &[ChatLogEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        if let Some(text) = entry.message_text.as_deref().filter(|t| !t.is_empty()) {
            out.push_str("Usuário: ");
            out.push_str(text);
            out.push('\n');
        }
        if let Some(reply) = entry.response_text.as_deref().filter(|t| !t.is_empty()) {
            out.push_str("Resposta da IA: ");
            out.push_str(reply);
            out.push_str("\n\n");
        }
    }
    out
}
