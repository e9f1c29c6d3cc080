//! Outbound messaging transport.

pub mod evolution;

use async_trait::async_trait;

use crate::error::MessagingError;

pub use evolution::EvolutionClient;

/// Sends text to a WhatsApp recipient.
///
/// Delivery is best-effort within one attempt; callers log failures and
/// never retry.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Send `text` to `recipient` (bare phone number).
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), MessagingError>;
}
