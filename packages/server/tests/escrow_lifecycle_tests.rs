//! End-to-end escrow lifecycle scenarios against a real Postgres.

mod common;

use rust_decimal::Decimal;
use sqlx::Row;

use common::{create_user_with_balance, reload_wallet, setup};
use payments_core::common::{CoreError, Role};
use payments_core::domains::disputes::models::DisputeOutcome;
use payments_core::domains::disputes::ResolutionRequest;
use payments_core::domains::escrows::models::FundingSource;
use payments_core::domains::escrows::{NewEscrow, NewMilestoneSpec};

fn ghs(n: i64) -> Decimal {
    Decimal::from(n)
}

fn wallet_escrow(
    hirer: &common::TestUser,
    worker: &common::TestUser,
    amount: Decimal,
    milestones: Vec<NewMilestoneSpec>,
) -> NewEscrow {
    NewEscrow {
        contract_ref: Some("job-42".to_string()),
        hirer_id: hirer.user_id,
        worker_id: worker.user_id,
        amount,
        currency: Default::default(),
        funding_source: FundingSource::Wallet,
        auto_release_at: None,
        milestones,
    }
}

#[tokio::test]
async fn fund_then_full_release() {
    let ctx = setup().await;
    let hirer = create_user_with_balance(&ctx, ghs(150)).await.unwrap();
    let worker = create_user_with_balance(&ctx, ghs(0)).await.unwrap();

    let (escrow, _) = ctx
        .engine
        .create(wallet_escrow(&hirer, &worker, ghs(100), vec![]))
        .await
        .unwrap();
    assert_eq!(escrow.status, "pending");

    let outcome = ctx
        .engine
        .fund(escrow.id, hirer.actor(Role::Hirer), None)
        .await
        .unwrap();
    assert_eq!(outcome.escrow.status, "funded");
    assert!(outcome.escrow.auto_release_at.is_some());

    // Funding reserved the money: spendable down, escrow holding up.
    let hirer_wallet = reload_wallet(&ctx, &hirer).await.unwrap();
    assert_eq!(hirer_wallet.balance, ghs(50));
    assert_eq!(hirer_wallet.escrow_amount, ghs(100));

    let released = ctx
        .engine
        .release_funds(escrow.id, Some(ghs(100)), hirer.actor(Role::Hirer))
        .await
        .unwrap();
    assert_eq!(released.status, "released");
    assert_eq!(released.released_amount, ghs(100));
    assert_eq!(released.remaining_amount, ghs(0));
    // Conservation after every committed transition.
    assert_eq!(
        released.released_amount + released.remaining_amount,
        released.amount
    );

    let worker_wallet = reload_wallet(&ctx, &worker).await.unwrap();
    assert_eq!(worker_wallet.balance, ghs(100));
    let hirer_wallet = reload_wallet(&ctx, &hirer).await.unwrap();
    assert_eq!(hirer_wallet.escrow_amount, ghs(0));

    // Exactly one completed escrow_release transaction for this escrow.
    let count: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM transactions
         WHERE escrow_id = $1 AND tx_type = 'escrow_release' AND status = 'completed'",
    )
    .bind(escrow.id)
    .fetch_one(&ctx.pool)
    .await
    .unwrap()
    .get("n");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn release_before_funding_is_an_invalid_transition() {
    let ctx = setup().await;
    let hirer = create_user_with_balance(&ctx, ghs(100)).await.unwrap();
    let worker = create_user_with_balance(&ctx, ghs(0)).await.unwrap();

    let (escrow, _) = ctx
        .engine
        .create(wallet_escrow(&hirer, &worker, ghs(100), vec![]))
        .await
        .unwrap();

    let result = ctx
        .engine
        .release_funds(escrow.id, None, hirer.actor(Role::Hirer))
        .await;
    assert!(matches!(
        result,
        Err(CoreError::InvalidTransition { entity: "escrow", .. })
    ));
}

#[tokio::test]
async fn funding_twice_fails_and_moves_no_money() {
    let ctx = setup().await;
    let hirer = create_user_with_balance(&ctx, ghs(300)).await.unwrap();
    let worker = create_user_with_balance(&ctx, ghs(0)).await.unwrap();

    let (escrow, _) = ctx
        .engine
        .create(wallet_escrow(&hirer, &worker, ghs(100), vec![]))
        .await
        .unwrap();
    ctx.engine
        .fund(escrow.id, hirer.actor(Role::Hirer), None)
        .await
        .unwrap();

    let result = ctx.engine.fund(escrow.id, hirer.actor(Role::Hirer), None).await;
    assert!(matches!(result, Err(CoreError::InvalidTransition { .. })));

    let wallet = reload_wallet(&ctx, &hirer).await.unwrap();
    assert_eq!(wallet.escrow_amount, ghs(100));
    assert_eq!(wallet.balance, ghs(200));
}

#[tokio::test]
async fn underfunded_wallet_cannot_fund() {
    let ctx = setup().await;
    let hirer = create_user_with_balance(&ctx, ghs(40)).await.unwrap();
    let worker = create_user_with_balance(&ctx, ghs(0)).await.unwrap();

    let (escrow, _) = ctx
        .engine
        .create(wallet_escrow(&hirer, &worker, ghs(100), vec![]))
        .await
        .unwrap();
    let result = ctx.engine.fund(escrow.id, hirer.actor(Role::Hirer), None).await;
    assert!(matches!(result, Err(CoreError::InsufficientFunds { .. })));

    // Nothing moved, escrow still pending.
    let wallet = reload_wallet(&ctx, &hirer).await.unwrap();
    assert_eq!(wallet.balance, ghs(40));
    assert_eq!(wallet.escrow_amount, ghs(0));
}

#[tokio::test]
async fn worker_refund_returns_remaining_to_hirer() {
    let ctx = setup().await;
    let hirer = create_user_with_balance(&ctx, ghs(100)).await.unwrap();
    let worker = create_user_with_balance(&ctx, ghs(0)).await.unwrap();

    let (escrow, _) = ctx
        .engine
        .create(wallet_escrow(&hirer, &worker, ghs(100), vec![]))
        .await
        .unwrap();
    ctx.engine
        .fund(escrow.id, hirer.actor(Role::Hirer), None)
        .await
        .unwrap();

    let refunded = ctx
        .engine
        .refund(escrow.id, worker.actor(Role::Worker), "cannot take the job")
        .await
        .unwrap();
    assert_eq!(refunded.status, "refunded");
    assert_eq!(refunded.remaining_amount, ghs(0));

    let wallet = reload_wallet(&ctx, &hirer).await.unwrap();
    assert_eq!(wallet.balance, ghs(100));
    assert_eq!(wallet.escrow_amount, ghs(0));
}

#[tokio::test]
async fn milestone_release_then_dispute_split() {
    let ctx = setup().await;
    let hirer = create_user_with_balance(&ctx, ghs(100)).await.unwrap();
    let worker = create_user_with_balance(&ctx, ghs(0)).await.unwrap();

    // Escrow with two 50 GHS milestones.
    let (escrow, milestones) = ctx
        .engine
        .create(wallet_escrow(
            &hirer,
            &worker,
            ghs(100),
            vec![
                NewMilestoneSpec {
                    title: "first deliverable".to_string(),
                    amount: ghs(50),
                },
                NewMilestoneSpec {
                    title: "second deliverable".to_string(),
                    amount: ghs(50),
                },
            ],
        ))
        .await
        .unwrap();
    ctx.engine
        .fund(escrow.id, hirer.actor(Role::Hirer), None)
        .await
        .unwrap();

    // Worker finishes milestone 1, hirer releases it.
    ctx.engine
        .complete_milestone(milestones[0].id, worker.actor(Role::Worker))
        .await
        .unwrap();
    let (after_m1, m1) = ctx
        .engine
        .release_milestone(milestones[0].id, hirer.actor(Role::Hirer))
        .await
        .unwrap();
    assert_eq!(after_m1.status, "partial_release");
    assert_eq!(after_m1.remaining_amount, ghs(50));
    assert_eq!(m1.status, "released");

    // Hirer disputes the rest.
    let dispute = ctx
        .disputes
        .open(escrow.id, hirer.actor(Role::Hirer), "second half not delivered")
        .await
        .unwrap();
    assert_eq!(dispute.status, "pending");

    // Frozen: no release while disputed.
    let frozen = ctx
        .engine
        .release_funds(escrow.id, Some(ghs(50)), hirer.actor(Role::Hirer))
        .await;
    assert!(matches!(frozen, Err(CoreError::InvalidTransition { .. })));

    // Moderator resolves 25/25.
    let moderator = create_user_with_balance(&ctx, ghs(0)).await.unwrap();
    ctx.disputes
        .accept_for_review(dispute.id, moderator.actor(Role::Moderator))
        .await
        .unwrap();
    let resolved = ctx
        .disputes
        .resolve(
            dispute.id,
            ResolutionRequest {
                outcome: DisputeOutcome::Split,
                hirer_amount: Some(ghs(25)),
                worker_amount: Some(ghs(25)),
            },
            moderator.actor(Role::Moderator),
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, "resolved");
    assert_eq!(resolved.outcome.as_deref(), Some("split"));

    let escrow = payments_core::domains::escrows::models::Escrow::find_by_id(escrow.id, &ctx.pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(escrow.remaining_amount, ghs(0));
    assert_eq!(escrow.status, "released");
    assert!(escrow.dispute_id.is_none());

    // Worker got milestone 1 plus the split share; hirer got 25 back.
    let worker_wallet = reload_wallet(&ctx, &worker).await.unwrap();
    assert_eq!(worker_wallet.balance, ghs(75));
    let hirer_wallet = reload_wallet(&ctx, &hirer).await.unwrap();
    assert_eq!(hirer_wallet.balance, ghs(25));
    assert_eq!(hirer_wallet.escrow_amount, ghs(0));
}

#[tokio::test]
async fn split_with_wrong_sum_is_rejected() {
    let ctx = setup().await;
    let hirer = create_user_with_balance(&ctx, ghs(100)).await.unwrap();
    let worker = create_user_with_balance(&ctx, ghs(0)).await.unwrap();
    let moderator = create_user_with_balance(&ctx, ghs(0)).await.unwrap();

    let (escrow, _) = ctx
        .engine
        .create(wallet_escrow(&hirer, &worker, Decimal::new(9999, 2), vec![]))
        .await
        .unwrap();
    ctx.engine
        .fund(escrow.id, hirer.actor(Role::Hirer), None)
        .await
        .unwrap();
    let dispute = ctx
        .disputes
        .open(escrow.id, worker.actor(Role::Worker), "payment disagreement")
        .await
        .unwrap();
    ctx.disputes
        .accept_for_review(dispute.id, moderator.actor(Role::Moderator))
        .await
        .unwrap();

    // 30 + 50 against 99.99 misses the tolerance.
    let bad = ctx
        .disputes
        .resolve(
            dispute.id,
            ResolutionRequest {
                outcome: DisputeOutcome::Split,
                hirer_amount: Some(ghs(30)),
                worker_amount: Some(ghs(50)),
            },
            moderator.actor(Role::Moderator),
        )
        .await;
    assert!(matches!(bad, Err(CoreError::Validation(_))));

    // 30 + 69.99 is exact and passes.
    let good = ctx
        .disputes
        .resolve(
            dispute.id,
            ResolutionRequest {
                outcome: DisputeOutcome::Split,
                hirer_amount: Some(ghs(30)),
                worker_amount: Some(Decimal::new(6999, 2)),
            },
            moderator.actor(Role::Moderator),
        )
        .await
        .unwrap();
    assert_eq!(good.status, "resolved");

    let worker_wallet = reload_wallet(&ctx, &worker).await.unwrap();
    assert_eq!(worker_wallet.balance, Decimal::new(6999, 2));
}

#[tokio::test]
async fn cancelled_dispute_returns_escrow_to_funded() {
    let ctx = setup().await;
    let hirer = create_user_with_balance(&ctx, ghs(100)).await.unwrap();
    let worker = create_user_with_balance(&ctx, ghs(0)).await.unwrap();

    let (escrow, _) = ctx
        .engine
        .create(wallet_escrow(&hirer, &worker, ghs(100), vec![]))
        .await
        .unwrap();
    ctx.engine
        .fund(escrow.id, hirer.actor(Role::Hirer), None)
        .await
        .unwrap();
    let dispute = ctx
        .disputes
        .open(escrow.id, hirer.actor(Role::Hirer), "wrong deliverable")
        .await
        .unwrap();

    // Only the initiator may cancel.
    let not_initiator = ctx
        .disputes
        .cancel(dispute.id, worker.actor(Role::Worker))
        .await;
    assert!(matches!(not_initiator, Err(CoreError::Forbidden(_))));

    let cancelled = ctx
        .disputes
        .cancel(dispute.id, hirer.actor(Role::Hirer))
        .await
        .unwrap();
    assert_eq!(cancelled.status, "cancelled");

    let escrow = payments_core::domains::escrows::models::Escrow::find_by_id(escrow.id, &ctx.pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(escrow.status, "funded");
    assert!(escrow.dispute_id.is_none());

    // Release works again after the dispute is gone.
    let released = ctx
        .engine
        .release_funds(escrow.id, None, hirer.actor(Role::Hirer))
        .await
        .unwrap();
    assert_eq!(released.status, "released");
}

#[tokio::test]
async fn second_dispute_on_same_escrow_conflicts() {
    let ctx = setup().await;
    let hirer = create_user_with_balance(&ctx, ghs(100)).await.unwrap();
    let worker = create_user_with_balance(&ctx, ghs(0)).await.unwrap();

    let (escrow, _) = ctx
        .engine
        .create(wallet_escrow(&hirer, &worker, ghs(100), vec![]))
        .await
        .unwrap();
    ctx.engine
        .fund(escrow.id, hirer.actor(Role::Hirer), None)
        .await
        .unwrap();
    ctx.disputes
        .open(escrow.id, hirer.actor(Role::Hirer), "first")
        .await
        .unwrap();

    let second = ctx
        .disputes
        .open(escrow.id, worker.actor(Role::Worker), "second")
        .await;
    // Either the state guard or the partial unique index stops it.
    assert!(matches!(
        second,
        Err(CoreError::InvalidTransition { .. }) | Err(CoreError::Conflict(_))
    ));
}
