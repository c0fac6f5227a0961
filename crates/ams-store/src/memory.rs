//! In-memory message store for development and tests.

use crate::{MessageStore, Result, StoreError};
use ams_common::{Message, MessageFilter, MessagePage, MessageStatus, NewMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

/// Messages held in a vector in insertion order.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed message, replacing any message with the same id
    pub fn put(&self, message: Message) {
        let mut messages = self.messages.write();
        messages.retain(|m| m.id != message.id);
        messages.push(message);
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.read().clone()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, new: &NewMessage) -> Result<Message> {
        let message = Message::pending(new);
        self.messages.write().push(message.clone());
        Ok(message)
    }

    async fn fetch_pending(&self, limit: u32) -> Result<Vec<Message>> {
        let mut pending: Vec<Message> = self
            .messages
            .read()
            .iter()
            .filter(|m| m.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.created_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn update_external_id(&self, id: Uuid, external_id: &str) -> Result<()> {
        let mut messages = self.messages.write();
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::NotFound(id))?;
        message.external_id = Some(external_id.to_string());
        message.updated_at = Utc::now();
        Ok(())
    }

    async fn update_status(
        &self,
        external_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let now = Utc::now();
        for message in self
            .messages
            .write()
            .iter_mut()
            .filter(|m| m.external_id.as_deref() == Some(external_id))
        {
            message.status = status;
            message.sent_at = Some(at);
            message.updated_at = now;
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.messages.read().iter().find(|m| m.id == id).cloned())
    }

    async fn list(&self, filter: &MessageFilter) -> Result<MessagePage> {
        let mut matching: Vec<Message> = self
            .messages
            .read()
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        // Newest sent first, unsent last
        matching.sort_by(|a, b| {
            b.sent_at
                .cmp(&a.sent_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.page_size as usize)
            .collect();

        Ok(MessagePage { items, total })
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.messages.read().len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
