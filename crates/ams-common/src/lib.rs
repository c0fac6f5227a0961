use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

pub mod logging;

/// Maximum message content length accepted at submission time.
pub const MAX_CONTENT_LENGTH: usize = 160;

/// Maximum page size accepted by [`MessageFilter`].
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default page size when the caller does not supply one.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

// ============================================================================
// Message Types
// ============================================================================

/// Lifecycle status of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 3] = [Self::Pending, Self::Sent, Self::Failed];

    /// Storage representation, also used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }
}

impl Default for MessageStatus {
    fn default() -> Self {
        MessageStatus::Pending
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown message status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for MessageStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A stored outbound message.
///
/// `external_id` and `sent_at` are only populated once the webhook accepted the
/// message and the dispatcher moved it to [`MessageStatus::Sent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: Uuid,
    pub to: String,
    pub content: String,
    pub status: MessageStatus,
    #[serde(rename = "message_id", skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Build a fresh pending message with a newly generated id.
    pub fn pending(new: &NewMessage) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            to: new.to.clone(),
            content: new.content.clone(),
            status: MessageStatus::Pending,
            external_id: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }
}

/// Submission payload for a new message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewMessage {
    pub to: String,
    pub content: String,
}

impl NewMessage {
    pub fn new(to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            content: content.into(),
        }
    }
}

// ============================================================================
// Listing
// ============================================================================

/// Listing filter for stored messages.
///
/// When `status` is absent only sent messages are listed. Date bounds apply to
/// `sent_at`; `end_date` is inclusive through the end of that day (UTC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFilter {
    pub status: Option<MessageStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self {
            status: None,
            start_date: None,
            end_date: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MessageFilter {
    pub fn effective_status(&self) -> MessageStatus {
        self.status.unwrap_or(MessageStatus::Sent)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    /// Inclusive lower bound on `sent_at`.
    pub fn sent_from(&self) -> Option<DateTime<Utc>> {
        self.start_date
            .map(|d| d.and_time(NaiveTime::MIN).and_utc())
    }

    /// Exclusive upper bound on `sent_at`.
    pub fn sent_until(&self) -> Option<DateTime<Utc>> {
        self.end_date
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .map(|d| d.and_time(NaiveTime::MIN).and_utc())
    }

    /// Whether a message satisfies the status and date conditions (ignores paging).
    pub fn matches(&self, message: &Message) -> bool {
        if message.status != self.effective_status() {
            return false;
        }
        if let Some(from) = self.sent_from() {
            match message.sent_at {
                Some(at) if at >= from => {}
                _ => return false,
            }
        }
        if let Some(until) = self.sent_until() {
            match message.sent_at {
                Some(at) if at < until => {}
                _ => return false,
            }
        }
        true
    }
}

/// One page of a filtered listing.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePage {
    pub items: Vec<Message>,
    /// Number of messages matching the filter across all pages
    pub total: u64,
}

impl MessagePage {
    pub fn total_pages(&self, page_size: u32) -> u64 {
        if page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(page_size))
    }
}
