use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

use crate::common::{DisputeId, EscrowId, UserId};

/// Dispute - a contested escrow awaiting resolution.
///
/// At most one active dispute per escrow (partial unique index). While a
/// dispute references an escrow, that escrow sits in 'disputed' and its
/// release/refund operations are frozen.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Dispute {
    pub id: DisputeId,
    pub escrow_id: EscrowId,
    pub initiator_id: UserId,
    pub respondent_id: UserId,
    pub moderator_id: Option<UserId>,
    pub reason: String,
    // 'pending', 'in_review', 'resolved', 'cancelled', 'escalated', 'expired'
    pub status: String,
    // 'hirer_favor', 'worker_favor', 'split', 'no_action_required'
    pub outcome: Option<String>,
    pub hirer_amount: Option<Decimal>,
    pub worker_amount: Option<Decimal>,
    /// When the respondent should have answered.
    pub response_due_at: DateTime<Utc>,
    /// Unattended past this point, the dispute expires as no_action_required.
    pub auto_resolve_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Dispute status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Pending,
    InReview,
    Resolved,
    Cancelled,
    Escalated,
    Expired,
}

impl DisputeStatus {
    /// Evidence and comments are accepted only while the dispute is open to
    /// argument.
    pub fn accepts_evidence(&self) -> bool {
        matches!(self, DisputeStatus::Pending | DisputeStatus::InReview)
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisputeStatus::Pending => write!(f, "pending"),
            DisputeStatus::InReview => write!(f, "in_review"),
            DisputeStatus::Resolved => write!(f, "resolved"),
            DisputeStatus::Cancelled => write!(f, "cancelled"),
            DisputeStatus::Escalated => write!(f, "escalated"),
            DisputeStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for DisputeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(DisputeStatus::Pending),
            "in_review" => Ok(DisputeStatus::InReview),
            "resolved" => Ok(DisputeStatus::Resolved),
            "cancelled" => Ok(DisputeStatus::Cancelled),
            "escalated" => Ok(DisputeStatus::Escalated),
            "expired" => Ok(DisputeStatus::Expired),
            _ => Err(anyhow::anyhow!("Invalid dispute status: {}", s)),
        }
    }
}

/// Dispute outcome enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    HirerFavor,
    WorkerFavor,
    Split,
    NoActionRequired,
}

impl std::fmt::Display for DisputeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisputeOutcome::HirerFavor => write!(f, "hirer_favor"),
            DisputeOutcome::WorkerFavor => write!(f, "worker_favor"),
            DisputeOutcome::Split => write!(f, "split"),
            DisputeOutcome::NoActionRequired => write!(f, "no_action_required"),
        }
    }
}

impl std::str::FromStr for DisputeOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hirer_favor" => Ok(DisputeOutcome::HirerFavor),
            "worker_favor" => Ok(DisputeOutcome::WorkerFavor),
            "split" => Ok(DisputeOutcome::Split),
            "no_action_required" => Ok(DisputeOutcome::NoActionRequired),
            _ => Err(anyhow::anyhow!("Invalid dispute outcome: {}", s)),
        }
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Dispute {
    pub fn status_enum(&self) -> DisputeStatus {
        self.status.parse().unwrap_or(DisputeStatus::Pending)
    }

    pub fn is_party(&self, user_id: UserId) -> bool {
        self.initiator_id == user_id || self.respondent_id == user_id
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        id: DisputeId,
        escrow_id: EscrowId,
        initiator_id: UserId,
        respondent_id: UserId,
        reason: &str,
        response_due_at: DateTime<Utc>,
        auto_resolve_at: DateTime<Utc>,
        conn: &mut PgConnection,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Dispute>(
            "INSERT INTO disputes
                 (id, escrow_id, initiator_id, respondent_id, reason,
                  response_due_at, auto_resolve_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(id)
        .bind(escrow_id)
        .bind(initiator_id)
        .bind(respondent_id)
        .bind(reason)
        .bind(response_due_at)
        .bind(auto_resolve_at)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id(id: DisputeId, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Dispute>("SELECT * FROM disputes WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// pending -> in_review, claiming the dispute for a moderator.
    pub async fn try_accept(
        id: DisputeId,
        moderator_id: UserId,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE disputes
             SET status = 'in_review', moderator_id = $2, updated_at = now()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(moderator_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// in_review -> escalated (admin queue).
    pub async fn try_escalate(
        id: DisputeId,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE disputes
             SET status = 'escalated', updated_at = now()
             WHERE id = $1 AND status = 'in_review'",
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// in_review|escalated -> resolved with the decided outcome and split.
    pub async fn try_resolve(
        id: DisputeId,
        outcome: DisputeOutcome,
        hirer_amount: Decimal,
        worker_amount: Decimal,
        moderator_id: UserId,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE disputes
             SET status = 'resolved',
                 outcome = $2,
                 hirer_amount = $3,
                 worker_amount = $4,
                 moderator_id = $5,
                 resolved_at = now(),
                 updated_at = now()
             WHERE id = $1 AND status IN ('in_review', 'escalated')",
        )
        .bind(id)
        .bind(outcome.to_string())
        .bind(hirer_amount)
        .bind(worker_amount)
        .bind(moderator_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// pending -> cancelled (initiator withdrew the dispute).
    pub async fn try_cancel(id: DisputeId, conn: &mut PgConnection) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE disputes
             SET status = 'cancelled', resolved_at = now(), updated_at = now()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// pending -> expired as no_action_required (nobody acted in time).
    pub async fn try_expire(id: DisputeId, conn: &mut PgConnection) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE disputes
             SET status = 'expired',
                 outcome = 'no_action_required',
                 resolved_at = now(),
                 updated_at = now()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Unattended pending disputes past their auto-resolve deadline.
    pub async fn find_due_for_expiry(
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Dispute>(
            "SELECT * FROM disputes
             WHERE status = 'pending' AND auto_resolve_at <= now()
             ORDER BY auto_resolve_at
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
