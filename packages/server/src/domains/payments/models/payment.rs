use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::common::{EscrowId, PaymentId, TransactionId, WalletId};
use crate::kernel::gateway::{GatewayStatus, PaymentChannel, PaymentDirection, Provider};

/// Payment - one row per external money movement through a provider.
///
/// `reference` is the idempotency key shared with the provider: it goes out
/// on the initiation call and comes back in webhooks and status checks.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: PaymentId,
    pub direction: String, // 'collection', 'disbursement'
    pub provider: String,
    pub channel: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String, // normalized GatewayStatus vocabulary
    pub reference: String,
    pub provider_ref: Option<String>,
    pub escrow_id: Option<EscrowId>,
    pub wallet_id: Option<WalletId>,
    pub transaction_id: Option<TransactionId>,
    pub payer_ref: Option<String>,
    pub payee_ref: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub direction: PaymentDirection,
    pub provider: Provider,
    pub channel: PaymentChannel,
    pub amount: Decimal,
    pub currency: String,
    pub status: GatewayStatus,
    pub reference: Uuid,
    pub escrow_id: Option<EscrowId>,
    pub wallet_id: Option<WalletId>,
    pub transaction_id: Option<TransactionId>,
    pub payer_ref: Option<String>,
    pub payee_ref: Option<String>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Payment {
    pub fn status_enum(&self) -> GatewayStatus {
        self.status.parse().unwrap_or(GatewayStatus::Pending)
    }

    pub fn direction_enum(&self) -> PaymentDirection {
        self.direction.parse().unwrap_or(PaymentDirection::Collection)
    }

    pub fn provider_enum(&self) -> Option<Provider> {
        self.provider.parse().ok()
    }

    pub fn reference_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.reference).ok()
    }

    pub async fn insert(new: NewPayment, conn: &mut PgConnection) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            "INSERT INTO payments
                 (id, direction, provider, channel, amount, currency, status, reference,
                  escrow_id, wallet_id, transaction_id, payer_ref, payee_ref)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             RETURNING *",
        )
        .bind(PaymentId::new())
        .bind(new.direction.to_string())
        .bind(new.provider.to_string())
        .bind(new.channel.to_string())
        .bind(new.amount)
        .bind(new.currency)
        .bind(new.status.to_string())
        .bind(new.reference.to_string())
        .bind(new.escrow_id)
        .bind(new.wallet_id)
        .bind(new.transaction_id)
        .bind(new.payer_ref)
        .bind(new.payee_ref)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_reference(
        reference: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE reference = $1")
            .bind(reference)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_reference_in(
        reference: &str,
        conn: &mut PgConnection,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE reference = $1")
            .bind(reference)
            .fetch_optional(conn)
            .await
    }

    /// Move a non-terminal payment to a new status; zero rows when the
    /// payment already reached a terminal state (idempotent replay).
    pub async fn try_transition(
        id: PaymentId,
        to: GatewayStatus,
        provider_ref: Option<&str>,
        error: Option<&str>,
        conn: &mut PgConnection,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE payments
             SET status = $2,
                 provider_ref = COALESCE($3, provider_ref),
                 error = $4,
                 updated_at = now()
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .bind(to.to_string())
        .bind(provider_ref)
        .bind(error)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Payments still awaiting settlement, oldest first (status-check sweep).
    pub async fn find_unsettled(
        older_than: DateTime<Utc>,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments
             WHERE status IN ('pending', 'processing') AND created_at < $1
             ORDER BY created_at
             LIMIT $2",
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
