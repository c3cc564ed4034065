use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

use crate::common::{DisputeId, EscrowId, PaymentId, TransactionId, WalletId};

/// Transaction - immutable record of a single funds movement.
///
/// Never mutated once 'completed'; a correction is a new compensating row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub counterparty_wallet_id: Option<WalletId>,
    pub tx_type: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String, // 'pending', 'processing', 'completed', 'failed'
    /// Unique idempotency key; also what providers echo back in webhooks.
    pub reference: String,
    pub escrow_id: Option<EscrowId>,
    pub dispute_id: Option<DisputeId>,
    pub payment_id: Option<PaymentId>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Transaction type enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Deposit,
    Withdrawal,
    EscrowFund,
    EscrowRelease,
    Refund,
    DisputeResolution,
}

impl std::fmt::Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxType::Deposit => write!(f, "deposit"),
            TxType::Withdrawal => write!(f, "withdrawal"),
            TxType::EscrowFund => write!(f, "escrow_fund"),
            TxType::EscrowRelease => write!(f, "escrow_release"),
            TxType::Refund => write!(f, "refund"),
            TxType::DisputeResolution => write!(f, "dispute_resolution"),
        }
    }
}

impl std::str::FromStr for TxType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deposit" => Ok(TxType::Deposit),
            "withdrawal" => Ok(TxType::Withdrawal),
            "escrow_fund" => Ok(TxType::EscrowFund),
            "escrow_release" => Ok(TxType::EscrowRelease),
            "refund" => Ok(TxType::Refund),
            "dispute_resolution" => Ok(TxType::DisputeResolution),
            _ => Err(anyhow::anyhow!("Invalid transaction type: {}", s)),
        }
    }
}

/// Transaction status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxStatus::Pending => write!(f, "pending"),
            TxStatus::Processing => write!(f, "processing"),
            TxStatus::Completed => write!(f, "completed"),
            TxStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TxStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "processing" => Ok(TxStatus::Processing),
            "completed" => Ok(TxStatus::Completed),
            "failed" => Ok(TxStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid transaction status: {}", s)),
        }
    }
}

/// Column values for a new ledger row, written inside the same database
/// transaction as the balance mutation it records.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub wallet_id: WalletId,
    pub counterparty_wallet_id: Option<WalletId>,
    pub tx_type: TxType,
    pub amount: Decimal,
    pub currency: String,
    pub status: TxStatus,
    pub reference: String,
    pub escrow_id: Option<EscrowId>,
    pub dispute_id: Option<DisputeId>,
    pub payment_id: Option<PaymentId>,
    pub note: Option<String>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Transaction {
    pub async fn insert(new: NewTransaction, conn: &mut PgConnection) -> Result<Self, sqlx::Error> {
        let completed_at = matches!(new.status, TxStatus::Completed).then(Utc::now);
        sqlx::query_as::<_, Transaction>(
            "INSERT INTO transactions
                 (id, wallet_id, counterparty_wallet_id, tx_type, amount, currency,
                  status, reference, escrow_id, dispute_id, payment_id, note, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             RETURNING *",
        )
        .bind(TransactionId::new())
        .bind(new.wallet_id)
        .bind(new.counterparty_wallet_id)
        .bind(new.tx_type.to_string())
        .bind(new.amount)
        .bind(new.currency)
        .bind(new.status.to_string())
        .bind(new.reference)
        .bind(new.escrow_id)
        .bind(new.dispute_id)
        .bind(new.payment_id)
        .bind(new.note)
        .bind(completed_at)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id(id: TransactionId, pool: &PgPool) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_reference(
        reference: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE reference = $1")
            .bind(reference)
            .fetch_optional(pool)
            .await
    }

    /// Wallet statement, newest first
    pub async fn list_for_wallet(
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions
             WHERE wallet_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(wallet_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    /// pending/processing -> completed. Completed rows are immutable, so the
    /// predicate refuses to touch them; returns rows_affected.
    pub async fn try_complete(
        id: TransactionId,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE transactions
             SET status = 'completed', completed_at = now()
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// pending/processing -> failed, with the reason kept in note.
    pub async fn try_fail(
        id: TransactionId,
        reason: &str,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE transactions
             SET status = 'failed', note = $2
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .bind(reason)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }
}
