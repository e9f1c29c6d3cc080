//! WhatsApp relay: durable queue between an Evolution API webhook and an
//! n8n AI workflow.

pub mod channels;
pub mod config;
pub mod error;
pub mod intake;
pub mod pipeline;
pub mod store;
pub mod worker;
pub mod workflow;

pub use config::RelayConfig;
pub use error::{Error, Result};
