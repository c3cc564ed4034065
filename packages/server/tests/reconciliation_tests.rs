//! Reconciliation loop scenarios: webhook-driven settlement, idempotent
//! replay, and failure compensation.

mod common;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use common::{create_user_with_balance, reload_wallet, setup, TestCtx};
use payments_core::common::Role;
use payments_core::domains::escrows::models::FundingSource;
use payments_core::domains::escrows::NewEscrow;
use payments_core::domains::payments::models::{NewPayment, Payment, WebhookEvent};
use payments_core::domains::payments::reconciliation::reconcile;
use payments_core::domains::wallets::models::TxType;
use payments_core::domains::wallets::TxSpec;
use payments_core::kernel::gateway::{
    GatewayStatus, PaymentChannel, PaymentDirection, Provider,
};

fn ghs(n: i64) -> Decimal {
    Decimal::from(n)
}

fn since() -> chrono::DateTime<Utc> {
    Utc::now() - Duration::hours(1)
}

async fn insert_payment(ctx: &TestCtx, new: NewPayment) -> Payment {
    let mut conn = ctx.pool.acquire().await.unwrap();
    Payment::insert(new, &mut conn).await.unwrap()
}

fn momo_success_payload(reference: Uuid, amount: Decimal) -> serde_json::Value {
    json!({
        "externalId": reference.to_string(),
        "amount": amount.to_string(),
        "currency": "GHS",
        "status": "SUCCESSFUL",
        "financialTransactionId": "1308412839"
    })
}

#[tokio::test]
async fn deposit_webhook_credits_wallet_once() {
    let ctx = setup().await;
    let user = create_user_with_balance(&ctx, ghs(0)).await.unwrap();
    let reference = Uuid::new_v4();

    insert_payment(
        &ctx,
        NewPayment {
            direction: PaymentDirection::Collection,
            provider: Provider::MtnMomo,
            channel: PaymentChannel::MobileMoney,
            amount: ghs(40),
            currency: "GHS".to_string(),
            status: GatewayStatus::Pending,
            reference,
            escrow_id: None,
            wallet_id: Some(user.wallet.id),
            transaction_id: None,
            payer_ref: Some("+233244123456".to_string()),
            payee_ref: None,
        },
    )
    .await;

    let payload = momo_success_payload(reference, ghs(40));
    WebhookEvent::insert("mtn_momo", Some(&reference.to_string()), &payload, &ctx.pool)
        .await
        .unwrap();

    let report = reconcile(&ctx.deps, &ctx.engine, since(), 50).await.unwrap();
    assert!(report.processed >= 1);
    assert_eq!(reload_wallet(&ctx, &user).await.unwrap().balance, ghs(40));

    // The same notification delivered again must be a no-op.
    WebhookEvent::insert("mtn_momo", Some(&reference.to_string()), &payload, &ctx.pool)
        .await
        .unwrap();
    reconcile(&ctx.deps, &ctx.engine, since(), 50).await.unwrap();
    assert_eq!(reload_wallet(&ctx, &user).await.unwrap().balance, ghs(40));

    let payment = Payment::find_by_reference(&reference.to_string(), &ctx.pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, "completed");
}

#[tokio::test]
async fn failed_payout_webhook_compensates_the_wallet() {
    let ctx = setup().await;
    let user = create_user_with_balance(&ctx, ghs(100)).await.unwrap();
    let reference = Uuid::new_v4();

    // Withdrawal already debited: balance 40, pending 60.
    let tx = ctx
        .ledger
        .start_withdrawal(
            user.wallet.id,
            ghs(60),
            TxSpec::new(TxType::Withdrawal, format!("withdrawal-{reference}")),
            &ctx.pool,
        )
        .await
        .unwrap();
    insert_payment(
        &ctx,
        NewPayment {
            direction: PaymentDirection::Disbursement,
            provider: Provider::MtnMomo,
            channel: PaymentChannel::MobileMoney,
            amount: ghs(60),
            currency: "GHS".to_string(),
            status: GatewayStatus::Pending,
            reference,
            escrow_id: None,
            wallet_id: Some(user.wallet.id),
            transaction_id: Some(tx.id),
            payer_ref: None,
            payee_ref: Some("+233244123456".to_string()),
        },
    )
    .await;

    let payload = json!({
        "externalId": reference.to_string(),
        "status": "FAILED",
        "reason": "PAYEE_NOT_FOUND"
    });
    WebhookEvent::insert("mtn_momo", Some(&reference.to_string()), &payload, &ctx.pool)
        .await
        .unwrap();
    reconcile(&ctx.deps, &ctx.engine, since(), 50).await.unwrap();

    // Money returned to spendable; withdrawal row failed.
    let wallet = reload_wallet(&ctx, &user).await.unwrap();
    assert_eq!(wallet.balance, ghs(100));
    assert_eq!(wallet.pending_withdrawals, ghs(0));

    let tx = payments_core::domains::wallets::models::Transaction::find_by_id(tx.id, &ctx.pool)
        .await
        .unwrap();
    assert_eq!(tx.status, "failed");
}

#[tokio::test]
async fn successful_payout_webhook_finalizes_the_withdrawal() {
    let ctx = setup().await;
    let user = create_user_with_balance(&ctx, ghs(100)).await.unwrap();
    let reference = Uuid::new_v4();

    let tx = ctx
        .ledger
        .start_withdrawal(
            user.wallet.id,
            ghs(60),
            TxSpec::new(TxType::Withdrawal, format!("withdrawal-{reference}")),
            &ctx.pool,
        )
        .await
        .unwrap();
    insert_payment(
        &ctx,
        NewPayment {
            direction: PaymentDirection::Disbursement,
            provider: Provider::MtnMomo,
            channel: PaymentChannel::MobileMoney,
            amount: ghs(60),
            currency: "GHS".to_string(),
            status: GatewayStatus::Pending,
            reference,
            escrow_id: None,
            wallet_id: Some(user.wallet.id),
            transaction_id: Some(tx.id),
            payer_ref: None,
            payee_ref: Some("+233244123456".to_string()),
        },
    )
    .await;

    let payload = momo_success_payload(reference, ghs(60));
    WebhookEvent::insert("mtn_momo", Some(&reference.to_string()), &payload, &ctx.pool)
        .await
        .unwrap();
    reconcile(&ctx.deps, &ctx.engine, since(), 50).await.unwrap();

    let wallet = reload_wallet(&ctx, &user).await.unwrap();
    assert_eq!(wallet.balance, ghs(40));
    assert_eq!(wallet.pending_withdrawals, ghs(0));

    let tx = payments_core::domains::wallets::models::Transaction::find_by_id(tx.id, &ctx.pool)
        .await
        .unwrap();
    assert_eq!(tx.status, "completed");
}

#[tokio::test]
async fn external_escrow_funding_confirms_via_webhook() {
    let ctx = setup().await;
    let hirer = create_user_with_balance(&ctx, ghs(0)).await.unwrap();
    let worker = create_user_with_balance(&ctx, ghs(0)).await.unwrap();

    let (escrow, _) = ctx
        .engine
        .create(NewEscrow {
            contract_ref: None,
            hirer_id: hirer.user_id,
            worker_id: worker.user_id,
            amount: ghs(200),
            currency: Default::default(),
            funding_source: FundingSource::External,
            auto_release_at: None,
            milestones: vec![],
        })
        .await
        .unwrap();

    // Hirer initiates the momo collection.
    let outcome = ctx
        .engine
        .fund(
            escrow.id,
            hirer.actor(Role::Hirer),
            Some(&payments_core::kernel::gateway::PaymentMethod::MobileMoney {
                msisdn: "0244123456".to_string(),
                network: None,
            }),
        )
        .await
        .unwrap();
    assert_eq!(outcome.escrow.status, "pending");
    let payment = outcome.payment.unwrap();

    // Provider confirms asynchronously.
    let reference = Uuid::parse_str(&payment.reference).unwrap();
    let payload = momo_success_payload(reference, ghs(200));
    WebhookEvent::insert("mtn_momo", Some(&payment.reference), &payload, &ctx.pool)
        .await
        .unwrap();
    reconcile(&ctx.deps, &ctx.engine, since(), 50).await.unwrap();

    let escrow = payments_core::domains::escrows::models::Escrow::find_by_id(escrow.id, &ctx.pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(escrow.status, "funded");
    assert!(escrow.funded_at.is_some());

    // Externally-funded release credits the worker's wallet.
    let released = ctx
        .engine
        .release_funds(escrow.id, None, hirer.actor(Role::Hirer))
        .await
        .unwrap();
    assert_eq!(released.status, "released");
    assert_eq!(reload_wallet(&ctx, &worker).await.unwrap().balance, ghs(200));
}

#[tokio::test]
async fn unknown_reference_stays_unprocessed_with_error() {
    let ctx = setup().await;

    let payload = json!({
        "externalId": Uuid::new_v4().to_string(),
        "status": "SUCCESSFUL"
    });
    let event = WebhookEvent::insert("mtn_momo", None, &payload, &ctx.pool)
        .await
        .unwrap();

    let report = reconcile(&ctx.deps, &ctx.engine, since(), 50).await.unwrap();
    assert!(report.remaining >= 1);

    let events = WebhookEvent::list_recent(false, 100, &ctx.pool).await.unwrap();
    let stuck = events.iter().find(|e| e.id == event.id).expect("still listed");
    assert!(!stuck.processed);
    assert!(stuck.error.as_deref().unwrap_or("").contains("no payment"));
}
