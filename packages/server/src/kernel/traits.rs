// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic. The gateway
// router and the services talk to providers exclusively through these, so
// tests can inject mocks and production wires the real clients.
//
// Naming convention: Base* for trait names (e.g., BaseMomoClient)

use anyhow::Result;
use async_trait::async_trait;
use momo::models::MomoTransaction;
use momo::MomoNetwork;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::common::UserId;
use crate::kernel::notifications::Notification;

// =============================================================================
// Mobile money (MTN MoMo / Telecel Cash / AT Money)
// =============================================================================

#[async_trait]
pub trait BaseMomoClient: Send + Sync {
    fn network(&self) -> MomoNetwork;

    /// Ask the payer's wallet for a debit approval. Settles asynchronously.
    async fn request_to_pay(
        &self,
        reference: Uuid,
        amount: Decimal,
        currency: &str,
        payer_msisdn: &str,
        note: &str,
    ) -> Result<()>;

    /// Push money to a wallet (disbursement). Settles asynchronously.
    async fn transfer(
        &self,
        reference: Uuid,
        amount: Decimal,
        currency: &str,
        payee_msisdn: &str,
        note: &str,
    ) -> Result<()>;

    async fn collection_status(&self, reference: Uuid) -> Result<MomoTransaction>;

    async fn disbursement_status(&self, reference: Uuid) -> Result<MomoTransaction>;
}

// =============================================================================
// Card/bank processor
// =============================================================================

/// Result of initializing a hosted card charge.
#[derive(Debug, Clone)]
pub struct ProcessorCharge {
    pub status: String,
    /// Where the payer completes the charge (hosted checkout).
    pub authorization_url: Option<String>,
}

/// Provider-side view of a transaction, used for status checks.
#[derive(Debug, Clone)]
pub struct ProcessorTransaction {
    pub status: String,
    pub amount_minor: i64,
    pub currency: String,
    pub failure_reason: Option<String>,
}

#[async_trait]
pub trait BaseCardProcessor: Send + Sync {
    async fn initialize_charge(
        &self,
        reference: Uuid,
        amount: Decimal,
        currency: &str,
        customer_email: &str,
    ) -> Result<ProcessorCharge>;

    async fn create_transfer(
        &self,
        reference: Uuid,
        amount: Decimal,
        currency: &str,
        recipient_code: &str,
        note: &str,
    ) -> Result<()>;

    async fn verify(&self, reference: Uuid) -> Result<ProcessorTransaction>;
}

// =============================================================================
// Notifications (fire-and-forget; failures never block money movement)
// =============================================================================

#[async_trait]
pub trait BaseNotificationService: Send + Sync {
    async fn notify(&self, user_id: UserId, notification: Notification) -> Result<()>;
}
