//! Persistence layer: libSQL-backed queue, step log, users, and chat history.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    ChatLogEntry, Database, NewChatLog, ProcessingStep, QueueItem, User, UserFlags,
};
