use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

use crate::common::{UserId, WalletId};

/// Wallet - a user's internal balance record, the unit of atomic mutation.
///
/// `balance` is spendable money; `escrow_amount` is reserved for open escrows;
/// `pending_withdrawals` is in flight to an external provider. Every mutation
/// goes through the conditional UPDATEs below so the row itself serializes
/// concurrent writers: a losing writer sees zero rows affected.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub currency: String,
    pub balance: Decimal,
    pub escrow_amount: Decimal,
    pub pending_withdrawals: Decimal,
    pub status: String, // 'active', 'frozen', 'suspended'
    pub daily_out_total: Decimal,
    pub daily_out_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wallet status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Frozen,
    Suspended,
}

impl std::fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletStatus::Active => write!(f, "active"),
            WalletStatus::Frozen => write!(f, "frozen"),
            WalletStatus::Suspended => write!(f, "suspended"),
        }
    }
}

impl std::str::FromStr for WalletStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(WalletStatus::Active),
            "frozen" => Ok(WalletStatus::Frozen),
            "suspended" => Ok(WalletStatus::Suspended),
            _ => Err(anyhow::anyhow!("Invalid wallet status: {}", s)),
        }
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Wallet {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    /// Find wallet by ID
    pub async fn find_by_id(id: WalletId, pool: &PgPool) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
    }

    /// Find wallet by owning user
    pub async fn find_by_user(user_id: UserId, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Re-read inside an open transaction (used to classify a failed
    /// conditional update).
    pub async fn find_by_id_in(
        id: WalletId,
        conn: &mut PgConnection,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE id = $1")
            .bind(id)
            .fetch_one(conn)
            .await
    }

    /// Create a wallet for a user. Idempotent per user via the unique index.
    pub async fn create(user_id: UserId, currency: &str, pool: &PgPool) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Wallet>(
            "INSERT INTO wallets (id, user_id, currency)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id) DO UPDATE SET updated_at = now()
             RETURNING *",
        )
        .bind(WalletId::new())
        .bind(user_id)
        .bind(currency)
        .fetch_one(pool)
        .await
    }

    // -------------------------------------------------------------------------
    // Conditional updates. Each returns rows_affected: 1 on success, 0 when
    // the guard failed (insufficient funds, wrong status, lost race).
    // -------------------------------------------------------------------------

    /// balance -= amount
    pub async fn try_debit(
        id: WalletId,
        amount: Decimal,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE wallets
             SET balance = balance - $2, updated_at = now()
             WHERE id = $1 AND status = 'active' AND balance >= $2",
        )
        .bind(id)
        .bind(amount)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// balance += amount. Unconditional on status: money coming back to a
    /// wallet must always land, even when the wallet is frozen.
    pub async fn try_credit(
        id: WalletId,
        amount: Decimal,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE wallets
             SET balance = balance + $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(amount)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// balance -= amount, escrow_amount += amount. Total is conserved.
    pub async fn try_reserve(
        id: WalletId,
        amount: Decimal,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE wallets
             SET balance = balance - $2,
                 escrow_amount = escrow_amount + $2,
                 updated_at = now()
             WHERE id = $1 AND status = 'active' AND balance >= $2",
        )
        .bind(id)
        .bind(amount)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// escrow_amount -= amount, balance += amount (reservation reversal)
    pub async fn try_release_reservation(
        id: WalletId,
        amount: Decimal,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE wallets
             SET escrow_amount = escrow_amount - $2,
                 balance = balance + $2,
                 updated_at = now()
             WHERE id = $1 AND escrow_amount >= $2",
        )
        .bind(id)
        .bind(amount)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// escrow_amount -= amount; the money leaves this wallet (escrow release).
    pub async fn try_settle_reservation(
        id: WalletId,
        amount: Decimal,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE wallets
             SET escrow_amount = escrow_amount - $2, updated_at = now()
             WHERE id = $1 AND escrow_amount >= $2",
        )
        .bind(id)
        .bind(amount)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// balance -= amount, pending_withdrawals += amount, with the per-day
    /// outflow cap folded into the predicate. The CASE resets the running
    /// total when the stored date is stale.
    pub async fn try_start_withdrawal(
        id: WalletId,
        amount: Decimal,
        daily_limit: Decimal,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE wallets
             SET balance = balance - $2,
                 pending_withdrawals = pending_withdrawals + $2,
                 daily_out_total = CASE WHEN daily_out_date = CURRENT_DATE
                                        THEN daily_out_total + $2 ELSE $2 END,
                 daily_out_date = CURRENT_DATE,
                 updated_at = now()
             WHERE id = $1
               AND status = 'active'
               AND balance >= $2
               AND (CASE WHEN daily_out_date = CURRENT_DATE
                         THEN daily_out_total ELSE 0 END) + $2 <= $3",
        )
        .bind(id)
        .bind(amount)
        .bind(daily_limit)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// pending_withdrawals -= amount (provider confirmed the payout)
    pub async fn try_finish_withdrawal(
        id: WalletId,
        amount: Decimal,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE wallets
             SET pending_withdrawals = pending_withdrawals - $2, updated_at = now()
             WHERE id = $1 AND pending_withdrawals >= $2",
        )
        .bind(id)
        .bind(amount)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// pending_withdrawals -= amount, balance += amount (payout failed,
    /// money returns to spendable)
    pub async fn try_cancel_withdrawal(
        id: WalletId,
        amount: Decimal,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE wallets
             SET pending_withdrawals = pending_withdrawals - $2,
                 balance = balance + $2,
                 daily_out_total = GREATEST(daily_out_total - $2, 0),
                 updated_at = now()
             WHERE id = $1 AND pending_withdrawals >= $2",
        )
        .bind(id)
        .bind(amount)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }
}
