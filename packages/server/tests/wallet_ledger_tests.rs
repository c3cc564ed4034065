//! Ledger properties: non-negativity, conservation, and row-level
//! serialization of concurrent writers.

mod common;

use rust_decimal::Decimal;
use uuid::Uuid;

use common::{create_user_with_balance, reload_wallet, setup};
use payments_core::common::CoreError;
use payments_core::domains::wallets::models::TxType;
use payments_core::domains::wallets::TxSpec;

fn ghs(n: i64) -> Decimal {
    Decimal::from(n)
}

fn spec(tx_type: TxType) -> TxSpec {
    TxSpec::new(tx_type, format!("test-{}", Uuid::new_v4()))
}

#[tokio::test]
async fn concurrent_withdrawals_exactly_one_wins() {
    let ctx = setup().await;
    let user = create_user_with_balance(&ctx, ghs(100)).await.unwrap();

    // Two concurrent 80 GHS withdrawals against a 100 GHS balance.
    let (a, b) = tokio::join!(
        ctx.ledger.start_withdrawal(
            user.wallet.id,
            ghs(80),
            spec(TxType::Withdrawal),
            &ctx.pool
        ),
        ctx.ledger.start_withdrawal(
            user.wallet.id,
            ghs(80),
            spec(TxType::Withdrawal),
            &ctx.pool
        ),
    );

    let succeeded = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1, "exactly one withdrawal may win");
    let losing_error = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
    assert!(matches!(
        losing_error,
        CoreError::InsufficientFunds { .. } | CoreError::Conflict(_)
    ));

    let wallet = reload_wallet(&ctx, &user).await.unwrap();
    assert_eq!(wallet.balance, ghs(20));
    assert_eq!(wallet.pending_withdrawals, ghs(80));
}

#[tokio::test]
async fn overdraw_is_rejected_and_balance_unchanged() {
    let ctx = setup().await;
    let user = create_user_with_balance(&ctx, ghs(50)).await.unwrap();

    let result = ctx
        .ledger
        .debit(user.wallet.id, ghs(80), spec(TxType::Withdrawal), &ctx.pool)
        .await;
    assert!(matches!(
        result,
        Err(CoreError::InsufficientFunds {
            available,
            requested
        }) if available == ghs(50) && requested == ghs(80)
    ));

    let wallet = reload_wallet(&ctx, &user).await.unwrap();
    assert_eq!(wallet.balance, ghs(50));

    // The rejected operation recorded no ledger row.
    let txs = payments_core::domains::wallets::models::Transaction::list_for_wallet(
        user.wallet.id,
        50,
        0,
        &ctx.pool,
    )
    .await
    .unwrap();
    assert_eq!(txs.len(), 1); // only the seed deposit
}

#[tokio::test]
async fn reserve_conserves_wallet_total() {
    let ctx = setup().await;
    let user = create_user_with_balance(&ctx, ghs(100)).await.unwrap();

    let mut conn = ctx.pool.acquire().await.unwrap();
    ctx.ledger
        .reserve_in(user.wallet.id, ghs(60), spec(TxType::EscrowFund), &mut conn)
        .await
        .unwrap();

    let wallet = reload_wallet(&ctx, &user).await.unwrap();
    assert_eq!(wallet.balance, ghs(40));
    assert_eq!(wallet.escrow_amount, ghs(60));
    assert_eq!(wallet.balance + wallet.escrow_amount, ghs(100));
}

#[tokio::test]
async fn transfer_moves_money_and_writes_one_row() {
    let ctx = setup().await;
    let from = create_user_with_balance(&ctx, ghs(100)).await.unwrap();
    let to = create_user_with_balance(&ctx, ghs(0)).await.unwrap();

    let tx = ctx
        .ledger
        .transfer(
            from.wallet.id,
            to.wallet.id,
            ghs(30),
            spec(TxType::EscrowRelease),
            &ctx.pool,
        )
        .await
        .unwrap();
    assert_eq!(tx.status, "completed");
    assert_eq!(tx.wallet_id, to.wallet.id);
    assert_eq!(tx.counterparty_wallet_id, Some(from.wallet.id));

    assert_eq!(reload_wallet(&ctx, &from).await.unwrap().balance, ghs(70));
    assert_eq!(reload_wallet(&ctx, &to).await.unwrap().balance, ghs(30));
}

#[tokio::test]
async fn duplicate_reference_is_a_conflict() {
    let ctx = setup().await;
    let user = create_user_with_balance(&ctx, ghs(100)).await.unwrap();

    let reference = format!("dup-{}", Uuid::new_v4());
    ctx.ledger
        .credit(
            user.wallet.id,
            ghs(10),
            TxSpec::new(TxType::Deposit, reference.clone()),
            &ctx.pool,
        )
        .await
        .unwrap();

    let result = ctx
        .ledger
        .credit(
            user.wallet.id,
            ghs(10),
            TxSpec::new(TxType::Deposit, reference),
            &ctx.pool,
        )
        .await;
    assert!(matches!(result, Err(CoreError::Conflict(_))));

    // The losing call rolled back its balance mutation too.
    let wallet = reload_wallet(&ctx, &user).await.unwrap();
    assert_eq!(wallet.balance, ghs(110));
}

#[tokio::test]
async fn daily_outflow_cap_blocks_excess_withdrawals() {
    let ctx = setup().await;
    let user = create_user_with_balance(&ctx, ghs(10000)).await.unwrap();

    // First withdrawal inside the 5000 GHS cap passes.
    ctx.ledger
        .start_withdrawal(user.wallet.id, ghs(4000), spec(TxType::Withdrawal), &ctx.pool)
        .await
        .unwrap();

    // Second one would take the day's outflow past the cap.
    let result = ctx
        .ledger
        .start_withdrawal(user.wallet.id, ghs(2000), spec(TxType::Withdrawal), &ctx.pool)
        .await;
    assert!(matches!(result, Err(CoreError::LimitExceeded)));

    let wallet = reload_wallet(&ctx, &user).await.unwrap();
    assert_eq!(wallet.balance, ghs(6000));
}

#[tokio::test]
async fn frozen_wallet_rejects_debits_but_accepts_credits() {
    let ctx = setup().await;
    let user = create_user_with_balance(&ctx, ghs(100)).await.unwrap();

    sqlx::query("UPDATE wallets SET status = 'frozen' WHERE id = $1")
        .bind(user.wallet.id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    let debit = ctx
        .ledger
        .debit(user.wallet.id, ghs(10), spec(TxType::Withdrawal), &ctx.pool)
        .await;
    assert!(matches!(debit, Err(CoreError::WalletUnavailable { .. })));

    // Money coming back must always land.
    ctx.ledger
        .credit(user.wallet.id, ghs(5), spec(TxType::Refund), &ctx.pool)
        .await
        .unwrap();
    let wallet = reload_wallet(&ctx, &user).await.unwrap();
    assert_eq!(wallet.balance, ghs(105));
}
