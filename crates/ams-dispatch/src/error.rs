//! Error types for message dispatch

use ams_store::StoreError;
use thiserror::Error;

/// Failure of a single delivery attempt through a channel
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Webhook URL is not configured")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid webhook response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis operation error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid cached value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Why one message did not reach `sent`
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Delivery failed: {0}")]
    Send(#[source] ChannelError),

    #[error("Delivered as {external_id} but recording the external id failed: {source}")]
    PersistExternalId {
        external_id: String,
        source: StoreError,
    },

    #[error("Delivered as {external_id} but recording the sent status failed: {source}")]
    PersistStatus {
        external_id: String,
        source: StoreError,
    },
}

impl DeliveryError {
    /// External id of a message that reached the webhook, if it did
    pub fn external_id(&self) -> Option<&str> {
        match self {
            DeliveryError::Send(_) => None,
            DeliveryError::PersistExternalId { external_id, .. }
            | DeliveryError::PersistStatus { external_id, .. } => Some(external_id),
        }
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to fetch pending messages: {0}")]
    Fetch(#[from] StoreError),

    #[error("Dispatch loop terminated abnormally: {0}")]
    LoopAborted(String),

    #[error("Dispatcher loop is running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, DispatchError>;
