//! Request and response bodies

use ams_common::{Message, MessageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Request to queue a new message
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CreateMessageRequest {
    /// Destination phone number, `+` followed by digits
    #[serde(default)]
    #[schema(example = "+905551111111")]
    pub to: Option<String>,
    /// Message text, at most 160 characters
    #[serde(default)]
    #[schema(example = "Insider - Project")]
    pub content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateMessageResponse {
    pub message: String,
    #[serde(rename = "messageId")]
    pub message_id: Uuid,
}

/// Listing query. Values are validated by hand so bad input yields a 400 with a reason.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListMessagesQuery {
    /// pending, sent or failed (default: sent)
    pub status: Option<String>,
    /// Earliest sent date, YYYY-MM-DD
    pub start_date: Option<String>,
    /// Latest sent date inclusive, YYYY-MM-DD
    pub end_date: Option<String>,
    /// Page number (default: 1)
    pub page: Option<String>,
    /// Page size, 1 to 100 (default: 10)
    pub page_size: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageItem {
    pub id: Uuid,
    pub to: String,
    pub content: String,
    pub status: MessageStatus,
    /// External id assigned by the webhook
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl From<Message> for MessageItem {
    fn from(msg: Message) -> Self {
        Self {
            id: msg.id,
            to: msg.to,
            content: msg.content,
            status: msg.status,
            message_id: msg.external_id,
            sent_at: msg.sent_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageListResponse {
    pub messages: Vec<MessageItem>,
    /// Matching messages across all pages
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SuccessResponse {
    pub message: String,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DispatcherStatusResponse {
    pub running: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
