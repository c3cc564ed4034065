use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

use crate::common::{DisputeId, EscrowId, UserId, WalletId};

/// Escrow - funds committed by a hirer for a job, owed to a worker.
///
/// `released_amount + remaining_amount == amount` at every committed state;
/// the migration carries the matching CHECK. Status changes only happen
/// through the guarded conditional UPDATEs below.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Escrow {
    pub id: EscrowId,
    pub contract_ref: Option<String>,
    pub hirer_id: UserId,
    pub worker_id: UserId,
    pub hirer_wallet_id: WalletId,
    pub worker_wallet_id: WalletId,
    pub amount: Decimal,
    pub released_amount: Decimal,
    pub remaining_amount: Decimal,
    pub currency: String,
    // 'pending', 'funded', 'partial_release', 'disputed', 'released',
    // 'refunded', 'cancelled', 'expired'
    pub status: String,
    pub funding_source: String, // 'wallet', 'external'
    pub funded_at: Option<DateTime<Utc>>,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub dispute_id: Option<DisputeId>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Escrow status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Funded,
    PartialRelease,
    Disputed,
    Released,
    Refunded,
    Cancelled,
    Expired,
}

impl EscrowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Released
                | EscrowStatus::Refunded
                | EscrowStatus::Cancelled
                | EscrowStatus::Expired
        )
    }

    /// States a release may start from (outside dispute resolution).
    pub fn releasable(&self) -> bool {
        matches!(self, EscrowStatus::Funded | EscrowStatus::PartialRelease)
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscrowStatus::Pending => write!(f, "pending"),
            EscrowStatus::Funded => write!(f, "funded"),
            EscrowStatus::PartialRelease => write!(f, "partial_release"),
            EscrowStatus::Disputed => write!(f, "disputed"),
            EscrowStatus::Released => write!(f, "released"),
            EscrowStatus::Refunded => write!(f, "refunded"),
            EscrowStatus::Cancelled => write!(f, "cancelled"),
            EscrowStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for EscrowStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(EscrowStatus::Pending),
            "funded" => Ok(EscrowStatus::Funded),
            "partial_release" => Ok(EscrowStatus::PartialRelease),
            "disputed" => Ok(EscrowStatus::Disputed),
            "released" => Ok(EscrowStatus::Released),
            "refunded" => Ok(EscrowStatus::Refunded),
            "cancelled" => Ok(EscrowStatus::Cancelled),
            "expired" => Ok(EscrowStatus::Expired),
            _ => Err(anyhow::anyhow!("Invalid escrow status: {}", s)),
        }
    }
}

/// Funding source enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FundingSource {
    Wallet,
    External,
}

impl std::fmt::Display for FundingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FundingSource::Wallet => write!(f, "wallet"),
            FundingSource::External => write!(f, "external"),
        }
    }
}

impl std::str::FromStr for FundingSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "wallet" => Ok(FundingSource::Wallet),
            "external" => Ok(FundingSource::External),
            _ => Err(anyhow::anyhow!("Invalid funding source: {}", s)),
        }
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Escrow {
    pub fn status_enum(&self) -> EscrowStatus {
        self.status.parse().unwrap_or(EscrowStatus::Pending)
    }

    pub fn is_party(&self, user_id: UserId) -> bool {
        self.hirer_id == user_id || self.worker_id == user_id
    }

    pub async fn find_by_id(id: EscrowId, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Escrow>(
            "SELECT * FROM escrows WHERE id = $1 AND archived_at IS NULL",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id_in(
        id: EscrowId,
        conn: &mut PgConnection,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Escrow>(
            "SELECT * FROM escrows WHERE id = $1 AND archived_at IS NULL",
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        id: EscrowId,
        contract_ref: Option<&str>,
        hirer_id: UserId,
        worker_id: UserId,
        hirer_wallet_id: WalletId,
        worker_wallet_id: WalletId,
        amount: Decimal,
        currency: &str,
        funding_source: FundingSource,
        auto_release_at: Option<DateTime<Utc>>,
        conn: &mut PgConnection,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Escrow>(
            "INSERT INTO escrows
                 (id, contract_ref, hirer_id, worker_id, hirer_wallet_id, worker_wallet_id,
                  amount, released_amount, remaining_amount, currency, funding_source,
                  auto_release_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $7, $8, $9, $10)
             RETURNING *",
        )
        .bind(id)
        .bind(contract_ref)
        .bind(hirer_id)
        .bind(worker_id)
        .bind(hirer_wallet_id)
        .bind(worker_wallet_id)
        .bind(amount)
        .bind(currency)
        .bind(funding_source.to_string())
        .bind(auto_release_at)
        .fetch_one(conn)
        .await
    }

    /// pending -> funded. Zero rows when the escrow already left 'pending'.
    pub async fn try_mark_funded(
        id: EscrowId,
        auto_release_at: DateTime<Utc>,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE escrows
             SET status = 'funded',
                 funded_at = now(),
                 auto_release_at = COALESCE(auto_release_at, $2),
                 updated_at = now()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(auto_release_at)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Apply an outflow of `amount` from one of `allowed_states`.
    /// `released_amount` counts every unit that left escrow custody, to the
    /// worker or back to the hirer, so the conservation equation holds in one
    /// statement: columns and resulting status move together or not at all.
    /// When the remaining amount hits zero the escrow lands in
    /// `final_status` ('released' or 'refunded'); otherwise it sits in
    /// 'partial_release'. Zero rows means a guard failed or a concurrent
    /// writer won.
    pub async fn try_apply_outflow(
        id: EscrowId,
        amount: Decimal,
        allowed_states: &[&str],
        final_status: EscrowStatus,
        conn: &mut PgConnection,
    ) -> Result<Option<Self>, sqlx::Error> {
        let states: Vec<String> = allowed_states.iter().map(|s| s.to_string()).collect();
        sqlx::query_as::<_, Escrow>(
            "UPDATE escrows
             SET released_amount = released_amount + $2,
                 remaining_amount = remaining_amount - $2,
                 status = CASE WHEN remaining_amount - $2 = 0
                               THEN $4 ELSE 'partial_release' END,
                 dispute_id = CASE WHEN remaining_amount - $2 = 0
                                   THEN NULL ELSE dispute_id END,
                 updated_at = now()
             WHERE id = $1 AND status = ANY($3) AND remaining_amount >= $2 AND $2 > 0
             RETURNING *",
        )
        .bind(id)
        .bind(amount)
        .bind(states)
        .bind(final_status.to_string())
        .fetch_optional(conn)
        .await
    }

    /// pending -> cancelled (never funded).
    pub async fn try_cancel(id: EscrowId, conn: &mut PgConnection) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE escrows
             SET status = 'cancelled', updated_at = now()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// funded|partial_release -> disputed, recording the dispute link.
    pub async fn try_open_dispute(
        id: EscrowId,
        dispute_id: DisputeId,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE escrows
             SET status = 'disputed', dispute_id = $2, updated_at = now()
             WHERE id = $1 AND status IN ('funded', 'partial_release')",
        )
        .bind(id)
        .bind(dispute_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// disputed -> funded/partial_release, clearing the dispute link
    /// (dispute cancelled or expired with no action).
    pub async fn try_return_from_dispute(
        id: EscrowId,
        dispute_id: DisputeId,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE escrows
             SET status = CASE WHEN released_amount > 0
                               THEN 'partial_release' ELSE 'funded' END,
                 dispute_id = NULL,
                 updated_at = now()
             WHERE id = $1 AND status = 'disputed' AND dispute_id = $2",
        )
        .bind(id)
        .bind(dispute_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Escrows ready for the auto-release sweep: funded past their deadline
    /// with no open dispute.
    pub async fn find_due_for_auto_release(
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Escrow>(
            "SELECT * FROM escrows
             WHERE status IN ('funded', 'partial_release')
               AND auto_release_at IS NOT NULL
               AND auto_release_at <= now()
               AND dispute_id IS NULL
               AND archived_at IS NULL
             ORDER BY auto_release_at
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Expire pending escrows that were never funded. Returns how many.
    pub async fn expire_stale_pending(
        cutoff: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE escrows
             SET status = 'expired', updated_at = now()
             WHERE status = 'pending' AND created_at < $1 AND archived_at IS NULL",
        )
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Soft-delete a terminal escrow for archival.
    pub async fn archive(id: EscrowId, pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE escrows
             SET archived_at = now()
             WHERE id = $1
               AND status IN ('released', 'refunded', 'cancelled', 'expired')
               AND archived_at IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
