use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::common::WebhookEventId;

/// WebhookEvent - a provider callback exactly as it arrived.
///
/// The webhook handler persists the raw payload and returns 2xx immediately;
/// all interpretation happens later in the reconciliation loop, which flips
/// `processed` exactly once. Rows are retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEvent {
    pub id: WebhookEventId,
    pub provider: String,
    /// Our payment reference, when it could be extracted on receipt.
    pub reference: Option<String>,
    pub payload: JsonValue,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl WebhookEvent {
    pub async fn insert(
        provider: &str,
        reference: Option<&str>,
        payload: &JsonValue,
        pool: &PgPool,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, WebhookEvent>(
            "INSERT INTO webhook_events (id, provider, reference, payload)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(WebhookEventId::new())
        .bind(provider)
        .bind(reference)
        .bind(payload)
        .fetch_one(pool)
        .await
    }

    /// Unprocessed events after `since`, oldest first.
    pub async fn find_unprocessed(
        since: DateTime<Utc>,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, WebhookEvent>(
            "SELECT * FROM webhook_events
             WHERE processed = FALSE AND received_at > $1
             ORDER BY received_at
             LIMIT $2",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn count_unprocessed(
        since: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM webhook_events
             WHERE processed = FALSE AND received_at > $1",
        )
        .bind(since)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    pub async fn mark_processed(
        id: WebhookEventId,
        pool: &PgPool,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE webhook_events
             SET processed = TRUE, processed_at = now(), error = NULL
             WHERE id = $1 AND processed = FALSE",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Keep the failure on the row; the event stays unprocessed so the next
    /// run retries it and operators can see the backlog.
    pub async fn record_error(
        id: WebhookEventId,
        error: &str,
        pool: &PgPool,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE webhook_events
             SET error = $2
             WHERE id = $1 AND processed = FALSE",
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Recent events for the operator backlog view.
    pub async fn list_recent(
        include_processed: bool,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, WebhookEvent>(
            "SELECT * FROM webhook_events
             WHERE ($1 OR processed = FALSE)
             ORDER BY received_at DESC
             LIMIT $2",
        )
        .bind(include_processed)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
