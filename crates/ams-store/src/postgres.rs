//! PostgreSQL Message Store

use crate::codec;
use crate::{MessageStore, Result, StoreError, MESSAGES_TABLE};
use ams_common::{Message, MessageFilter, MessagePage, MessageStatus, NewMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

const COLUMNS: &str = "id, recipient, content, status, external_id, sent_at, created_at, updated_at";

/// PostgreSQL implementation of MessageStore
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn parse_row(row: &PgRow) -> Result<Message> {
        let sent_at: Option<i64> = row.try_get("sent_at")?;
        Ok(Message {
            id: codec::uuid(row.try_get("id")?)?,
            to: row.try_get("recipient")?,
            content: row.try_get("content")?,
            status: codec::status(row.try_get("status")?)?,
            external_id: row.try_get("external_id")?,
            sent_at: sent_at.map(|v| codec::timestamp("sent_at", v)).transpose()?,
            created_at: codec::timestamp("created_at", row.try_get("created_at")?)?,
            updated_at: codec::timestamp("updated_at", row.try_get("updated_at")?)?,
        })
    }

    /// WHERE clause for a listing filter plus the next free placeholder index.
    fn filter_clause(filter: &MessageFilter) -> (String, usize) {
        let mut clause = String::from("WHERE status = $1");
        let mut next = 2;
        if filter.sent_from().is_some() {
            clause.push_str(&format!(" AND sent_at >= ${}", next));
            next += 1;
        }
        if filter.sent_until().is_some() {
            clause.push_str(&format!(" AND sent_at < ${}", next));
            next += 1;
        }
        (clause, next)
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn insert(&self, new: &NewMessage) -> Result<Message> {
        let message = Message::pending(new);
        let query = format!(
            "INSERT INTO {} (id, recipient, content, status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6)",
            MESSAGES_TABLE
        );
        sqlx::query(&query)
            .bind(message.id.to_string())
            .bind(&message.to)
            .bind(&message.content)
            .bind(message.status.as_str())
            .bind(codec::millis(message.created_at))
            .bind(codec::millis(message.updated_at))
            .execute(&self.pool)
            .await?;

        debug!(message_id = %message.id, "Inserted message");
        Ok(message)
    }

    async fn fetch_pending(&self, limit: u32) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT {} FROM {} WHERE status = $1 ORDER BY created_at ASC LIMIT $2",
            COLUMNS, MESSAGES_TABLE
        );
        let rows = sqlx::query(&query)
            .bind(MessageStatus::Pending.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        let messages = rows.iter().map(Self::parse_row).collect::<Result<Vec<_>>>()?;
        debug!(count = messages.len(), "Fetched pending messages");
        Ok(messages)
    }

    async fn update_external_id(&self, id: Uuid, external_id: &str) -> Result<()> {
        let query = format!(
            "UPDATE {} SET external_id = $1, updated_at = $2 WHERE id = $3",
            MESSAGES_TABLE
        );
        let result = sqlx::query(&query)
            .bind(external_id)
            .bind(codec::millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        external_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let query = format!(
            "UPDATE {} SET status = $1, sent_at = $2, updated_at = $3 WHERE external_id = $4",
            MESSAGES_TABLE
        );
        let result = sqlx::query(&query)
            .bind(status.as_str())
            .bind(codec::millis(at))
            .bind(codec::millis(Utc::now()))
            .bind(external_id)
            .execute(&self.pool)
            .await?;

        debug!(external_id, status = %status, rows = result.rows_affected(), "Updated message status");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>> {
        let query = format!("SELECT {} FROM {} WHERE id = $1", COLUMNS, MESSAGES_TABLE);
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn list(&self, filter: &MessageFilter) -> Result<MessagePage> {
        let (clause, next) = Self::filter_clause(filter);
        let status = filter.effective_status();
        let from = filter.sent_from().map(codec::millis);
        let until = filter.sent_until().map(codec::millis);

        let count_query = format!("SELECT COUNT(*) FROM {} {}", MESSAGES_TABLE, clause);
        let mut count = sqlx::query_scalar::<_, i64>(&count_query).bind(status.as_str());
        if let Some(from) = from {
            count = count.bind(from);
        }
        if let Some(until) = until {
            count = count.bind(until);
        }
        let total = count.fetch_one(&self.pool).await?;

        let select_query = format!(
            "SELECT {} FROM {} {} ORDER BY sent_at DESC NULLS LAST, created_at DESC LIMIT ${} OFFSET ${}",
            COLUMNS,
            MESSAGES_TABLE,
            clause,
            next,
            next + 1
        );
        let mut select = sqlx::query(&select_query).bind(status.as_str());
        if let Some(from) = from {
            select = select.bind(from);
        }
        if let Some(until) = until {
            select = select.bind(until);
        }
        let rows = select
            .bind(i64::from(filter.page_size))
            .bind(filter.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let items = rows.iter().map(Self::parse_row).collect::<Result<Vec<_>>>()?;
        Ok(MessagePage { items, total: total.max(0) as u64 })
    }

    async fn count(&self) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM {}", MESSAGES_TABLE);
        let total: i64 = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
        Ok(total.max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<()> {
        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    recipient TEXT NOT NULL,
                    content VARCHAR(160) NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    external_id TEXT,
                    sent_at BIGINT,
                    created_at BIGINT NOT NULL,
                    updated_at BIGINT NOT NULL
                )
                "#,
                MESSAGES_TABLE
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_status_created_at ON {0}(status, created_at)",
                MESSAGES_TABLE
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_external_id ON {0}(external_id)",
                MESSAGES_TABLE
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_sent_at ON {0}(sent_at)",
                MESSAGES_TABLE
            ),
        ];

        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!(table = MESSAGES_TABLE, "PostgreSQL message schema initialized");
        Ok(())
    }
}
