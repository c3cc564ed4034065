//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Four periodic jobs keep the money state converged without any caller in
//! the loop:
//! - auto-release: funded escrows past their deadline release to the worker
//! - reconciliation: drains unprocessed provider webhook events
//! - payment sweep: asks providers about stale unsettled payments whose
//!   webhooks never arrived
//! - dispute expiry: unattended disputes expire as no_action_required
//!
//! Each job logs and swallows its own errors; a failing sweep never takes
//! the scheduler down.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::disputes::DisputeWorkflow;
use crate::domains::escrows::EscrowEngine;
use crate::domains::payments::models::Payment;
use crate::domains::payments::reconciliation;
use crate::kernel::deps::ServerDeps;

const RECONCILE_LOOKBACK_DAYS: i64 = 7;
const RECONCILE_BATCH_LIMIT: i64 = 200;
const SWEEP_MIN_AGE_MINUTES: i64 = 10;
const SWEEP_BATCH_LIMIT: i64 = 50;
const AUTO_RELEASE_BATCH_LIMIT: i64 = 100;
const DISPUTE_EXPIRY_BATCH_LIMIT: i64 = 100;
/// Pending escrows older than this were never funded and expire.
const PENDING_ESCROW_TTL_DAYS: i64 = 30;

/// Start all scheduled tasks
pub async fn start_scheduler(
    deps: Arc<ServerDeps>,
    engine: Arc<EscrowEngine>,
    disputes: Arc<DisputeWorkflow>,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Auto-release sweep - runs every hour. Also expires pending escrows
    // that were never funded.
    let release_engine = engine.clone();
    let release_deps = deps.clone();
    let release_job = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let engine = release_engine.clone();
        let deps = release_deps.clone();
        Box::pin(async move {
            match engine.auto_release_due(AUTO_RELEASE_BATCH_LIMIT).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "auto-release sweep released escrows"),
                Err(e) => tracing::error!("Auto-release sweep failed: {}", e),
            }
            let cutoff = Utc::now() - Duration::days(PENDING_ESCROW_TTL_DAYS);
            match crate::domains::escrows::models::Escrow::expire_stale_pending(
                cutoff,
                &deps.db_pool,
            )
            .await
            {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "expired never-funded escrows"),
                Err(e) => tracing::error!("Pending-escrow expiry failed: {}", e),
            }
        })
    })?;
    scheduler.add(release_job).await?;

    // Webhook reconciliation - runs every 5 minutes
    let reconcile_deps = deps.clone();
    let reconcile_engine = engine.clone();
    let reconcile_job = Job::new_async("0 */5 * * * *", move |_uuid, _lock| {
        let deps = reconcile_deps.clone();
        let engine = reconcile_engine.clone();
        Box::pin(async move {
            let since = Utc::now() - Duration::days(RECONCILE_LOOKBACK_DAYS);
            match reconciliation::reconcile(&deps, &engine, since, RECONCILE_BATCH_LIMIT).await
            {
                Ok(report) if report.remaining > 0 => {
                    tracing::warn!(
                        processed = report.processed,
                        remaining = report.remaining,
                        "reconciliation left a backlog"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Reconciliation run failed: {}", e),
            }
        })
    })?;
    scheduler.add(reconcile_job).await?;

    // Stale payment sweep - runs every 15 minutes. Catches payments whose
    // webhook was missed entirely by asking the provider directly.
    let sweep_deps = deps.clone();
    let sweep_engine = engine.clone();
    let sweep_job = Job::new_async("0 */15 * * * *", move |_uuid, _lock| {
        let deps = sweep_deps.clone();
        let engine = sweep_engine.clone();
        Box::pin(async move {
            if let Err(e) = sweep_unsettled_payments(&deps, &engine).await {
                tracing::error!("Payment sweep failed: {}", e);
            }
        })
    })?;
    scheduler.add(sweep_job).await?;

    // Dispute expiry - runs daily at 02:00
    let expiry_disputes = disputes.clone();
    let expiry_job = Job::new_async("0 0 2 * * *", move |_uuid, _lock| {
        let disputes = expiry_disputes.clone();
        Box::pin(async move {
            match disputes.expire_due(DISPUTE_EXPIRY_BATCH_LIMIT).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "expired unattended disputes"),
                Err(e) => tracing::error!("Dispute expiry sweep failed: {}", e),
            }
        })
    })?;
    scheduler.add(expiry_job).await?;

    scheduler.start().await?;
    tracing::info!(
        "Scheduled tasks started (auto-release hourly, reconciliation every 5m, \
         payment sweep every 15m, dispute expiry daily)"
    );
    Ok(scheduler)
}

/// Ask providers about unsettled payments old enough that their webhook
/// should have arrived, and settle whatever they report.
async fn sweep_unsettled_payments(deps: &ServerDeps, engine: &EscrowEngine) -> Result<()> {
    let older_than = Utc::now() - Duration::minutes(SWEEP_MIN_AGE_MINUTES);
    let stale = Payment::find_unsettled(older_than, SWEEP_BATCH_LIMIT, &deps.db_pool).await?;
    if stale.is_empty() {
        return Ok(());
    }

    tracing::info!(count = stale.len(), "checking stale unsettled payments");
    for payment in stale {
        let Some(provider) = payment.provider_enum() else {
            continue;
        };
        let Some(reference) = payment.reference_uuid() else {
            continue;
        };
        match deps
            .gateway
            .check_status(provider, payment.direction_enum(), reference)
            .await
        {
            Ok(status) => {
                if let Err(e) =
                    reconciliation::settle_payment(deps, engine, &payment, status, None, None)
                        .await
                {
                    tracing::error!(
                        payment_id = %payment.id,
                        error = %e,
                        "failed to settle swept payment"
                    );
                }
            }
            // Breaker open or provider down; the next sweep retries.
            Err(e) => {
                tracing::warn!(payment_id = %payment.id, error = %e, "status check failed");
            }
        }
    }
    Ok(())
}
