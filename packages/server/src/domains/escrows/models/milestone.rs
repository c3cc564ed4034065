use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

use crate::common::{EscrowId, MilestoneId};

/// Milestone - a sub-amount of an escrow tied to a discrete deliverable,
/// releasable independently. Milestone amounts sum to the escrow amount.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Milestone {
    pub id: MilestoneId,
    pub escrow_id: EscrowId,
    pub position: i32,
    pub title: String,
    pub amount: Decimal,
    pub status: String, // 'pending', 'completed', 'released'
    pub completed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Milestone status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    Completed,
    Released,
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MilestoneStatus::Pending => write!(f, "pending"),
            MilestoneStatus::Completed => write!(f, "completed"),
            MilestoneStatus::Released => write!(f, "released"),
        }
    }
}

impl std::str::FromStr for MilestoneStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(MilestoneStatus::Pending),
            "completed" => Ok(MilestoneStatus::Completed),
            "released" => Ok(MilestoneStatus::Released),
            _ => Err(anyhow::anyhow!("Invalid milestone status: {}", s)),
        }
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Milestone {
    pub async fn insert(
        escrow_id: EscrowId,
        position: i32,
        title: &str,
        amount: Decimal,
        conn: &mut PgConnection,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Milestone>(
            "INSERT INTO milestones (id, escrow_id, position, title, amount)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(MilestoneId::new())
        .bind(escrow_id)
        .bind(position)
        .bind(title)
        .bind(amount)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id(
        id: MilestoneId,
        pool: &PgPool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Milestone>("SELECT * FROM milestones WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_for_escrow(
        escrow_id: EscrowId,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Milestone>(
            "SELECT * FROM milestones WHERE escrow_id = $1 ORDER BY position",
        )
        .bind(escrow_id)
        .fetch_all(pool)
        .await
    }

    /// Highest position so far, for appending.
    pub async fn max_position(
        escrow_id: EscrowId,
        conn: &mut PgConnection,
    ) -> Result<i32, sqlx::Error> {
        let row: (Option<i32>,) =
            sqlx::query_as("SELECT MAX(position) FROM milestones WHERE escrow_id = $1")
                .bind(escrow_id)
                .fetch_one(conn)
                .await?;
        Ok(row.0.unwrap_or(0))
    }

    /// pending -> completed (worker marks the deliverable done).
    pub async fn try_complete(
        id: MilestoneId,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE milestones
             SET status = 'completed', completed_at = now()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// completed -> released.
    pub async fn try_release(
        id: MilestoneId,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE milestones
             SET status = 'released', released_at = now()
             WHERE id = $1 AND status = 'completed'",
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }
}
