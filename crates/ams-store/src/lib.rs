//! Message Store
//!
//! Durable record of outbound message state. The dispatcher reads pending
//! batches and records delivery outcomes; the API inserts and lists.

use ams_common::{Message, MessageFilter, MessagePage, MessageStatus, NewMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod seed;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryMessageStore;
pub use seed::seed_messages;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteMessageStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresMessageStore;

/// Name of the table holding messages in the SQL backends
pub const MESSAGES_TABLE: &str = "messages";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Message not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid stored row: {0}")]
    InvalidRow(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence for outbound messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a new message in `pending` state with a freshly generated id.
    async fn insert(&self, new: &NewMessage) -> Result<Message>;

    /// Up to `limit` pending messages, oldest first.
    async fn fetch_pending(&self, limit: u32) -> Result<Vec<Message>>;

    /// Associate the external correlation id with a local message.
    ///
    /// Fails with [`StoreError::NotFound`] when `id` is unknown.
    async fn update_external_id(&self, id: Uuid, external_id: &str) -> Result<()>;

    /// Set status and sent timestamp on every message carrying `external_id`.
    ///
    /// Matching zero rows is not an error.
    async fn update_status(
        &self,
        external_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Message>>;

    /// Filtered, paginated listing ordered by `sent_at` descending.
    async fn list(&self, filter: &MessageFilter) -> Result<MessagePage>;

    /// Total number of stored messages regardless of status
    async fn count(&self) -> Result<u64>;

    /// Connectivity check used by health reporting
    async fn ping(&self) -> Result<()>;

    /// Create tables and indexes if they do not exist
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }
}

/// Millisecond timestamp helpers shared by the SQL backends.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) mod codec {
    use super::{Result, StoreError};
    use ams_common::MessageStatus;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    pub fn millis(at: DateTime<Utc>) -> i64 {
        at.timestamp_millis()
    }

    pub fn timestamp(column: &str, value: i64) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp_millis(value)
            .ok_or_else(|| StoreError::InvalidRow(format!("{} out of range: {}", column, value)))
    }

    pub fn uuid(value: &str) -> Result<Uuid> {
        Uuid::parse_str(value).map_err(|e| StoreError::InvalidRow(format!("id '{}': {}", value, e)))
    }

    pub fn status(value: &str) -> Result<MessageStatus> {
        value
            .parse()
            .map_err(|e: ams_common::UnknownStatus| StoreError::InvalidRow(e.to_string()))
    }
}
