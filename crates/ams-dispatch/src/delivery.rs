//! Per-message delivery protocol
//!
//! send -> record external id -> mark sent -> mirror into the side cache.
//! The first three steps decide the outcome; the cache write never does.

use crate::cache::SideCache;
use crate::channel::DeliveryChannel;
use crate::error::DeliveryError;
use ams_common::{Message, MessageStatus};
use ams_store::MessageStore;
use chrono::{DateTime, SubsecRound, Utc};
use tracing::{info, warn};
use uuid::Uuid;

/// A message that reached `sent`
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub message_id: Uuid,
    pub external_id: String,
    pub sent_at: DateTime<Utc>,
    /// False when the side cache write failed
    pub cached: bool,
}

/// A message left `pending` by this tick
#[derive(Debug)]
pub struct DeliveryFailure {
    pub message_id: Uuid,
    pub error: DeliveryError,
}

/// Outcome of one poll-and-deliver cycle
#[derive(Debug, Default)]
pub struct TickReport {
    /// Messages returned by the pending fetch
    pub fetched: usize,
    pub delivered: Vec<Delivered>,
    pub failed: Vec<DeliveryFailure>,
    /// Messages not attempted because a stop was requested mid-batch
    pub skipped: usize,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.fetched == 0
    }
}

pub(crate) async fn deliver(
    store: &dyn MessageStore,
    channel: &dyn DeliveryChannel,
    cache: &dyn SideCache,
    message: &Message,
) -> Result<Delivered, DeliveryError> {
    let external_id = channel.send(message).await.map_err(DeliveryError::Send)?;
    // Millisecond precision is what the SQL stores and the cache keep
    let sent_at = Utc::now().trunc_subsecs(3);

    store
        .update_external_id(message.id, &external_id)
        .await
        .map_err(|source| DeliveryError::PersistExternalId {
            external_id: external_id.clone(),
            source,
        })?;

    store
        .update_status(&external_id, MessageStatus::Sent, sent_at)
        .await
        .map_err(|source| DeliveryError::PersistStatus {
            external_id: external_id.clone(),
            source,
        })?;

    let cached = match cache.put(&external_id, sent_at).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                message_id = %message.id,
                external_id = %external_id,
                error = %e,
                "Failed to cache message sent time"
            );
            false
        }
    };

    info!(message_id = %message.id, external_id = %external_id, "Message sent");

    Ok(Delivered {
        message_id: message.id,
        external_id,
        sent_at,
        cached,
    })
}
