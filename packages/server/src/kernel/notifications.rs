//! Outbound user notifications.
//!
//! The payments core only *emits* notifications; delivery (push, SMS, email)
//! belongs to a separate service. The default implementation logs the event
//! and succeeds, and callers always treat a notify failure as non-fatal.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::common::{DisputeId, EscrowId, UserId};
use crate::kernel::traits::BaseNotificationService;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    EscrowFunded { escrow_id: EscrowId, amount: Decimal },
    EscrowReleased { escrow_id: EscrowId, amount: Decimal },
    EscrowRefunded { escrow_id: EscrowId, amount: Decimal },
    DisputeOpened { dispute_id: DisputeId, escrow_id: EscrowId },
    DisputeResolved { dispute_id: DisputeId, outcome: String },
    DepositConfirmed { amount: Decimal },
    WithdrawalPaid { amount: Decimal },
    WithdrawalFailed { amount: Decimal },
}

/// Default notifier: structured log line, nothing else.
pub struct LoggingNotificationService;

#[async_trait]
impl BaseNotificationService for LoggingNotificationService {
    async fn notify(&self, user_id: UserId, notification: Notification) -> Result<()> {
        tracing::info!(
            user_id = %user_id,
            notification = ?notification,
            "notification emitted"
        );
        Ok(())
    }
}

/// Send a notification without letting a delivery failure surface.
pub async fn notify_best_effort(
    notifier: &dyn BaseNotificationService,
    user_id: UserId,
    notification: Notification,
) {
    if let Err(e) = notifier.notify(user_id, notification).await {
        tracing::warn!(user_id = %user_id, error = %e, "notification delivery failed");
    }
}
