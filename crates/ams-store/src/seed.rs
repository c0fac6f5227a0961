//! Sample data for development databases.

use crate::{MessageStore, Result};
use ams_common::{MessageStatus, NewMessage};
use chrono::{Duration, Utc};
use tracing::info;

const PENDING: [(&str, &str); 3] = [
    ("+905551111111", "Test message 1"),
    ("+905552222222", "Test message 2"),
    ("+905553333333", "Test message 3"),
];

/// recipient, content, external id, hours since delivery
const SENT: [(&str, &str, &str, i64); 2] = [
    ("+905554444444", "Test message 4", "test-message-id-1", 24),
    ("+905555555555", "Test message 5", "test-message-id-2", 12),
];

/// Populate an empty store with three pending and two sent messages.
///
/// Returns the number of messages inserted; a non-empty store is left untouched.
pub async fn seed_messages(store: &dyn MessageStore) -> Result<usize> {
    if store.count().await? > 0 {
        info!("Message store already populated, skipping seed");
        return Ok(0);
    }

    for (to, content) in PENDING {
        store.insert(&NewMessage::new(to, content)).await?;
    }

    let now = Utc::now();
    for (to, content, external_id, hours) in SENT {
        let message = store.insert(&NewMessage::new(to, content)).await?;
        store.update_external_id(message.id, external_id).await?;
        store
            .update_status(external_id, MessageStatus::Sent, now - Duration::hours(hours))
            .await?;
    }

    let inserted = PENDING.len() + SENT.len();
    info!(count = inserted, "Seeded message store");
    Ok(inserted)
}
