//! Typed ID definitions for all domain entities.
//!
//! Each entity gets a marker type and an `Id<T>` alias, so the compiler
//! rejects a `WalletId` where an `EscrowId` belongs. Markers live in their
//! own module so they never shadow the model structs of the same name.

pub use super::id::Id;

/// Entity marker types. Only the aliases below are used directly.
pub mod markers {
    pub struct User;
    pub struct Wallet;
    pub struct Transaction;
    pub struct Escrow;
    pub struct Milestone;
    pub struct Dispute;
    pub struct DisputeEvidence;
    pub struct Payment;
    pub struct WebhookEvent;
}

/// Typed ID for platform users (hirers, workers, moderators).
pub type UserId = Id<markers::User>;

/// Typed ID for Wallet entities.
pub type WalletId = Id<markers::Wallet>;

/// Typed ID for ledger Transaction entities.
pub type TransactionId = Id<markers::Transaction>;

/// Typed ID for Escrow entities.
pub type EscrowId = Id<markers::Escrow>;

/// Typed ID for escrow Milestone entities.
pub type MilestoneId = Id<markers::Milestone>;

/// Typed ID for Dispute entities.
pub type DisputeId = Id<markers::Dispute>;

/// Typed ID for dispute evidence/comment rows.
pub type EvidenceId = Id<markers::DisputeEvidence>;

/// Typed ID for external Payment entities.
pub type PaymentId = Id<markers::Payment>;

/// Typed ID for WebhookEvent entities.
pub type WebhookEventId = Id<markers::WebhookEvent>;
