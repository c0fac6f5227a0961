//! Side cache
//!
//! Best-effort mirror of external id to sent timestamp. Callers log failures
//! and carry on.

use crate::error::CacheError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::debug;

#[async_trait]
pub trait SideCache: Send + Sync {
    /// Record when the message with `external_id` was sent. No expiry.
    async fn put(&self, external_id: &str, sent_at: DateTime<Utc>) -> Result<(), CacheError>;

    async fn sent_at(&self, external_id: &str) -> Result<Option<DateTime<Utc>>, CacheError>;
}

/// Cache key for an external id
pub fn cache_key(external_id: &str) -> String {
    format!("message:{}", external_id)
}

/// Wire form of a cached sent time: RFC3339, milliseconds, `Z` suffix
pub fn format_sent_at(sent_at: DateTime<Utc>) -> String {
    sent_at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_sent_at(key: &str, value: String) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| CacheError::InvalidValue {
            key: key.to_string(),
            value,
        })
}

/// Redis backed side cache.
///
/// The connection is opened on first use and reused afterwards, so a Redis
/// outage at startup does not prevent the server from booting.
pub struct RedisSideCache {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisSideCache {
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                debug!("Opening Redis connection");
                ConnectionManager::new(self.client.clone()).await
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl SideCache for RedisSideCache {
    async fn put(&self, external_id: &str, sent_at: DateTime<Utc>) -> Result<(), CacheError> {
        let key = cache_key(external_id);
        let value = format_sent_at(sent_at);
        let mut conn = self.connection().await?;
        let _: () = conn.set(&key, &value).await?;
        debug!(key = %key, sent_at = %value, "Cached message sent time");
        Ok(())
    }

    async fn sent_at(&self, external_id: &str) -> Result<Option<DateTime<Utc>>, CacheError> {
        let key = cache_key(external_id);
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(&key).await?;
        value.map(|v| parse_sent_at(&key, v)).transpose()
    }
}

/// Side cache that stores nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSideCache;

#[async_trait]
impl SideCache for NoopSideCache {
    async fn put(&self, _external_id: &str, _sent_at: DateTime<Utc>) -> Result<(), CacheError> {
        Ok(())
    }

    async fn sent_at(&self, _external_id: &str) -> Result<Option<DateTime<Utc>>, CacheError> {
        Ok(None)
    }
}
