//! Webhook reconciliation.
//!
//! The only component allowed to resolve payment ambiguity after the fact.
//! Providers call back asynchronously (or not at all); this loop drains
//! unprocessed webhook events, re-derives each payment's normalized status,
//! and applies the minimal transition to converge. Replaying an event that
//! was already applied is a no-op: every transition predicate refuses
//! terminal rows. A failing event records its error and stays unprocessed;
//! it never aborts the batch.

use chrono::{DateTime, Utc};
use momo::models::MomoStatus;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::common::{CoreError, CoreResult};
use crate::domains::escrows::EscrowEngine;
use crate::domains::payments::models::{Payment, WebhookEvent};
use crate::domains::wallets::models::TxType;
use crate::domains::wallets::TxSpec;
use crate::kernel::deps::ServerDeps;
use crate::kernel::gateway::{GatewayStatus, PaymentDirection, Provider};
use crate::kernel::notifications::{notify_best_effort, Notification};

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub processed: usize,
    pub remaining: i64,
}

/// What a webhook payload told us about a payment.
#[derive(Debug, Clone)]
struct ParsedEvent {
    reference: String,
    status: Option<GatewayStatus>,
    provider_ref: Option<String>,
    failure: Option<String>,
}

/// Extract reference and normalized status from a provider payload.
///
/// Mobile-money callbacks mirror the status-lookup body (`externalId`,
/// `status`); the card processor wraps its object in `{event, data}`.
fn parse_payload(provider: Provider, payload: &JsonValue) -> CoreResult<ParsedEvent> {
    match provider {
        Provider::MtnMomo | Provider::TelecelCash | Provider::AtMoney => {
            let reference = payload
                .get("externalId")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CoreError::validation("momo payload missing externalId"))?
                .to_string();
            let status = payload
                .get("status")
                .and_then(|v| v.as_str())
                .and_then(|s| {
                    serde_json::from_value::<MomoStatus>(JsonValue::String(s.to_string())).ok()
                })
                .map(GatewayStatus::from_momo);
            Ok(ParsedEvent {
                reference,
                status,
                provider_ref: payload
                    .get("financialTransactionId")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                failure: payload
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            })
        }
        Provider::Paystack => {
            let data = payload
                .get("data")
                .ok_or_else(|| CoreError::validation("processor payload missing data"))?;
            let reference = data
                .get("reference")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CoreError::validation("processor payload missing reference"))?
                .to_string();
            let status = data
                .get("status")
                .and_then(|v| v.as_str())
                .map(GatewayStatus::from_processor);
            Ok(ParsedEvent {
                reference,
                status,
                provider_ref: data
                    .get("id")
                    .and_then(|v| v.as_i64())
                    .map(|id| id.to_string()),
                failure: data
                    .get("gateway_response")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            })
        }
    }
}

/// Apply a provider-reported status to a payment. Returns true when this
/// call changed state, false when the payment had already converged.
pub async fn settle_payment(
    deps: &ServerDeps,
    engine: &EscrowEngine,
    payment: &Payment,
    status: GatewayStatus,
    provider_ref: Option<&str>,
    failure: Option<&str>,
) -> CoreResult<bool> {
    if payment.status_enum().is_terminal() {
        return Ok(false);
    }
    if !status.is_terminal() {
        // Still settling provider-side; at most bump pending -> processing.
        if status == GatewayStatus::Processing {
            let mut db_tx = deps.db_pool.begin().await?;
            Payment::try_transition(payment.id, status, provider_ref, None, &mut db_tx)
                .await?;
            db_tx.commit().await?;
        }
        return Ok(false);
    }

    let mut db_tx = deps.db_pool.begin().await?;
    let advanced =
        Payment::try_transition(payment.id, status, provider_ref, failure, &mut db_tx).await?;
    if advanced == 0 {
        // Lost the race to another settle; nothing more to do.
        db_tx.commit().await?;
        return Ok(false);
    }

    match (payment.direction_enum(), status) {
        (PaymentDirection::Collection, GatewayStatus::Completed) => {
            if let Some(escrow_id) = payment.escrow_id {
                engine.confirm_external_funding_in(escrow_id, &mut db_tx).await?;
            }
            if let (Some(wallet_id), None) = (payment.wallet_id, payment.escrow_id) {
                // Wallet deposit: money enters the ledger now.
                deps.ledger
                    .credit_in(
                        wallet_id,
                        payment.amount,
                        TxSpec::new(TxType::Deposit, format!("deposit-{}", payment.reference))
                            .payment(payment.id),
                        &mut db_tx,
                    )
                    .await?;
            }
        }
        (PaymentDirection::Collection, _) => {
            // Failed or cancelled collection: no money ever entered the
            // ledger, the payment row records the outcome.
        }
        (PaymentDirection::Disbursement, GatewayStatus::Completed) => {
            if let (Some(wallet_id), Some(tx_id)) = (payment.wallet_id, payment.transaction_id)
            {
                deps.ledger
                    .finish_withdrawal_in(wallet_id, payment.amount, tx_id, &mut db_tx)
                    .await?;
            }
        }
        (PaymentDirection::Disbursement, _) => {
            // Payout failed: compensate by returning the money to spendable.
            if let (Some(wallet_id), Some(tx_id)) = (payment.wallet_id, payment.transaction_id)
            {
                deps.ledger
                    .cancel_withdrawal_in(
                        wallet_id,
                        payment.amount,
                        tx_id,
                        failure.unwrap_or("payout failed"),
                        &mut db_tx,
                    )
                    .await?;
            }
        }
    }
    db_tx.commit().await?;

    notify_settlement(deps, payment, status).await;
    Ok(true)
}

async fn notify_settlement(deps: &ServerDeps, payment: &Payment, status: GatewayStatus) {
    let Some(wallet_id) = payment.wallet_id else {
        return;
    };
    let wallet = match crate::domains::wallets::models::Wallet::find_by_id(
        wallet_id,
        &deps.db_pool,
    )
    .await
    {
        Ok(w) => w,
        Err(_) => return,
    };
    let notification = match (payment.direction_enum(), status) {
        (PaymentDirection::Collection, GatewayStatus::Completed) => {
            Notification::DepositConfirmed {
                amount: payment.amount,
            }
        }
        (PaymentDirection::Disbursement, GatewayStatus::Completed) => {
            Notification::WithdrawalPaid {
                amount: payment.amount,
            }
        }
        (PaymentDirection::Disbursement, _) => Notification::WithdrawalFailed {
            amount: payment.amount,
        },
        _ => return,
    };
    notify_best_effort(deps.notifier.as_ref(), wallet.user_id, notification).await;
}

/// Process one webhook event end to end.
async fn process_event(
    deps: &ServerDeps,
    engine: &EscrowEngine,
    event: &WebhookEvent,
) -> CoreResult<()> {
    let provider: Provider = event
        .provider
        .parse()
        .map_err(|_| CoreError::validation(format!("unknown provider: {}", event.provider)))?;
    let parsed = parse_payload(provider, &event.payload)?;

    let payment = Payment::find_by_reference(&parsed.reference, &deps.db_pool)
        .await?
        .ok_or_else(|| {
            CoreError::validation(format!("no payment for reference {}", parsed.reference))
        })?;

    // Prefer the payload's status; fall back to asking the provider when the
    // callback carried none.
    let status = match parsed.status {
        Some(status) => status,
        None => {
            let reference = payment.reference_uuid().ok_or_else(|| {
                CoreError::validation(format!("malformed reference {}", payment.reference))
            })?;
            deps.gateway
                .check_status(provider, payment.direction_enum(), reference)
                .await?
        }
    };

    settle_payment(
        deps,
        engine,
        &payment,
        status,
        parsed.provider_ref.as_deref(),
        parsed.failure.as_deref(),
    )
    .await?;
    Ok(())
}

/// Drain unprocessed webhook events created after `since`, bounded by
/// `limit`. Returns how many were applied and how many still wait.
pub async fn reconcile(
    deps: &ServerDeps,
    engine: &EscrowEngine,
    since: DateTime<Utc>,
    limit: i64,
) -> CoreResult<ReconcileReport> {
    let events = WebhookEvent::find_unprocessed(since, limit, &deps.db_pool).await?;
    let mut processed = 0;

    for event in &events {
        match process_event(deps, engine, event).await {
            Ok(()) => {
                WebhookEvent::mark_processed(event.id, &deps.db_pool).await?;
                processed += 1;
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    provider = %event.provider,
                    error = %e,
                    "webhook event failed to reconcile"
                );
                WebhookEvent::record_error(event.id, &e.to_string(), &deps.db_pool).await?;
            }
        }
    }

    let remaining = WebhookEvent::count_unprocessed(since, &deps.db_pool).await?;
    tracing::info!(processed, remaining, "reconciliation pass finished");
    Ok(ReconcileReport {
        processed,
        remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_momo_callback() {
        let payload = json!({
            "externalId": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
            "amount": "100.00",
            "currency": "GHS",
            "status": "SUCCESSFUL",
            "financialTransactionId": "1308412839"
        });
        let parsed = parse_payload(Provider::MtnMomo, &payload).unwrap();
        assert_eq!(parsed.reference, "3fa85f64-5717-4562-b3fc-2c963f66afa6");
        assert_eq!(parsed.status, Some(GatewayStatus::Completed));
        assert_eq!(parsed.provider_ref.as_deref(), Some("1308412839"));
    }

    #[test]
    fn parses_momo_failure_with_reason() {
        let payload = json!({
            "externalId": "ref-77",
            "status": "FAILED",
            "reason": "PAYER_LIMIT_REACHED"
        });
        let parsed = parse_payload(Provider::AtMoney, &payload).unwrap();
        assert_eq!(parsed.status, Some(GatewayStatus::Failed));
        assert_eq!(parsed.failure.as_deref(), Some("PAYER_LIMIT_REACHED"));
    }

    #[test]
    fn parses_processor_event_envelope() {
        let payload = json!({
            "event": "charge.success",
            "data": {
                "id": 302961,
                "reference": "7f0af4c9-0a4b-45e2-8bd3-d1ca4c07c748",
                "status": "success",
                "gateway_response": "Approved"
            }
        });
        let parsed = parse_payload(Provider::Paystack, &payload).unwrap();
        assert_eq!(parsed.status, Some(GatewayStatus::Completed));
        assert_eq!(parsed.provider_ref.as_deref(), Some("302961"));
    }

    #[test]
    fn unknown_momo_status_falls_back_to_lookup() {
        // A payload with a status string outside the momo vocabulary parses
        // with status None, which makes the loop ask the provider instead.
        let payload = json!({
            "externalId": "ref-1",
            "status": "SOMETHING_NEW"
        });
        let parsed = parse_payload(Provider::MtnMomo, &payload).unwrap();
        assert_eq!(parsed.status, None);
    }

    #[test]
    fn missing_reference_is_a_validation_error() {
        let payload = json!({"status": "SUCCESSFUL"});
        assert!(parse_payload(Provider::MtnMomo, &payload).is_err());
    }
}
