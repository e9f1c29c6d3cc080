//! Error types for the WhatsApp relay.

use std::time::Duration;

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Outbound messaging transport errors.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("Failed to send message via {transport}: {reason}")]
    SendFailed { transport: String, reason: String },

    #[error("{transport} timed out after {timeout:?}")]
    Timeout {
        transport: String,
        timeout: Duration,
    },
}

/// AI workflow call errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow did not respond within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Workflow request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Workflow returned HTTP {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Workflow returned an empty response")]
    EmptyResponse,
}

impl WorkflowError {
    /// Whether this failure is the timeout case (logged under its own step).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Item pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
