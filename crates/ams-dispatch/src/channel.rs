//! Delivery channels
//!
//! A channel hands one message to an external system and returns the
//! correlation id that system assigned to it.

use crate::error::ChannelError;
use ams_common::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Deliver `message`, returning the non-empty external id on success.
    async fn send(&self, message: &Message) -> Result<String, ChannelError>;
}

/// Webhook channel configuration
#[derive(Debug, Clone)]
pub struct WebhookChannelConfig {
    /// Endpoint receiving one POST per message; empty means unconfigured
    pub url: String,
    pub timeout: Duration,
    /// Header carrying `auth_key`, when one is set
    pub auth_key_name: String,
    pub auth_key: Option<String>,
}

impl Default for WebhookChannelConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(10),
            auth_key_name: "x-ins-auth-key".to_string(),
            auth_key: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookRequest<'a> {
    to: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookResponse {
    message_id: String,
}

/// Delivers messages as JSON POSTs to a webhook endpoint
pub struct WebhookChannel {
    config: WebhookChannelConfig,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookChannelConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &WebhookChannelConfig {
        &self.config
    }
}

#[async_trait]
impl DeliveryChannel for WebhookChannel {
    async fn send(&self, message: &Message) -> Result<String, ChannelError> {
        if self.config.url.is_empty() {
            return Err(ChannelError::NotConfigured);
        }

        let body = WebhookRequest {
            to: &message.to,
            content: &message.content,
        };

        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(ref key) = self.config.auth_key {
            request = request.header(self.config.auth_key_name.as_str(), key);
        }

        let started = Instant::now();
        let response = request.send().await?;
        let status = response.status();

        debug!(
            message_id = %message.id,
            status = status.as_u16(),
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Webhook response received"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: WebhookResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;

        if parsed.message_id.trim().is_empty() {
            return Err(ChannelError::InvalidResponse("empty messageId".to_string()));
        }

        Ok(parsed.message_id)
    }
}
