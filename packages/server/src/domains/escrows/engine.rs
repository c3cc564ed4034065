//! Escrow state machine.
//!
//! Owns every escrow transition. Money moves through the Ledger (wallet
//! funding) or the gateway router (external funding); both kinds of funding
//! release the same way. Gateway calls happen outside the database
//! transaction — an initiated-but-unconfirmed collection leaves the escrow
//! in 'pending' until reconciliation confirms it.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::common::{
    money_tolerance, Actor, CoreError, CoreResult, Currency, DisputeId, EscrowId, MilestoneId,
    UserId,
};
use crate::domains::escrows::models::{
    Escrow, EscrowStatus, FundingSource, Milestone, MilestoneStatus,
};
use crate::domains::payments::models::{NewPayment, Payment};
use crate::domains::wallets::models::{TxType, Wallet};
use crate::domains::wallets::TxSpec;
use crate::kernel::deps::ServerDeps;
use crate::kernel::gateway::{GatewayStatus, PaymentDirection, PaymentMethod};
use crate::kernel::notifications::{notify_best_effort, Notification};

/// Default time a funded escrow waits before the system releases it.
const AUTO_RELEASE_DAYS: i64 = 14;

#[derive(Debug, Clone)]
pub struct NewMilestoneSpec {
    pub title: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewEscrow {
    pub contract_ref: Option<String>,
    pub hirer_id: UserId,
    pub worker_id: UserId,
    pub amount: Decimal,
    pub currency: Currency,
    pub funding_source: FundingSource,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub milestones: Vec<NewMilestoneSpec>,
}

/// Result of a funding request. External funding usually returns with the
/// escrow still 'pending' and a checkout/approval flow for the payer.
#[derive(Debug, Clone)]
pub struct FundOutcome {
    pub escrow: Escrow,
    pub payment: Option<Payment>,
    pub redirect_url: Option<String>,
}

pub struct EscrowEngine {
    deps: Arc<ServerDeps>,
}

impl EscrowEngine {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self { deps }
    }

    fn guard(
        escrow: &Escrow,
        allowed: &[EscrowStatus],
        attempted: &'static str,
    ) -> CoreResult<()> {
        if allowed.contains(&escrow.status_enum()) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                entity: "escrow",
                from: escrow.status.clone(),
                attempted,
            })
        }
    }

    async fn load(&self, escrow_id: EscrowId) -> CoreResult<Escrow> {
        Escrow::find_by_id(escrow_id, &self.deps.db_pool)
            .await?
            .ok_or(CoreError::NotFound("escrow"))
    }

    /// Move escrowed money to the worker, inside the caller's transaction.
    async fn move_to_worker_in(
        &self,
        escrow: &Escrow,
        amount: Decimal,
        spec: TxSpec,
        conn: &mut PgConnection,
    ) -> CoreResult<()> {
        match escrow.funding_source.parse().unwrap_or(FundingSource::Wallet) {
            FundingSource::Wallet => {
                self.deps
                    .ledger
                    .settle_transfer_in(
                        escrow.hirer_wallet_id,
                        escrow.worker_wallet_id,
                        amount,
                        spec,
                        conn,
                    )
                    .await?;
            }
            // Externally-collected money is platform-held; it enters the
            // worker's wallet as a plain credit.
            FundingSource::External => {
                self.deps
                    .ledger
                    .credit_in(escrow.worker_wallet_id, amount, spec, conn)
                    .await?;
            }
        }
        Ok(())
    }

    /// Return escrowed money to the hirer, inside the caller's transaction.
    async fn move_back_to_hirer_in(
        &self,
        escrow: &Escrow,
        amount: Decimal,
        spec: TxSpec,
        conn: &mut PgConnection,
    ) -> CoreResult<()> {
        match escrow.funding_source.parse().unwrap_or(FundingSource::Wallet) {
            FundingSource::Wallet => {
                self.deps
                    .ledger
                    .release_reservation_in(escrow.hirer_wallet_id, amount, spec, conn)
                    .await?;
            }
            FundingSource::External => {
                self.deps
                    .ledger
                    .credit_in(escrow.hirer_wallet_id, amount, spec, conn)
                    .await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Lifecycle operations
    // =========================================================================

    /// Create a 'pending' escrow (and its milestones).
    pub async fn create(&self, new: NewEscrow) -> CoreResult<(Escrow, Vec<Milestone>)> {
        if new.amount <= Decimal::ZERO {
            return Err(CoreError::validation("escrow amount must be positive"));
        }
        if new.hirer_id == new.worker_id {
            return Err(CoreError::validation("hirer and worker must differ"));
        }
        if !new.milestones.is_empty() {
            if new.milestones.iter().any(|m| m.amount <= Decimal::ZERO) {
                return Err(CoreError::validation("milestone amounts must be positive"));
            }
            let sum: Decimal = new.milestones.iter().map(|m| m.amount).sum();
            if (sum - new.amount).abs() > money_tolerance() {
                return Err(CoreError::validation(format!(
                    "milestone amounts sum to {sum}, escrow amount is {}",
                    new.amount
                )));
            }
        }

        let hirer_wallet =
            Wallet::create(new.hirer_id, new.currency.as_str(), &self.deps.db_pool).await?;
        let worker_wallet =
            Wallet::create(new.worker_id, new.currency.as_str(), &self.deps.db_pool).await?;

        let mut db_tx = self.deps.db_pool.begin().await?;
        let escrow = Escrow::insert(
            EscrowId::new(),
            new.contract_ref.as_deref(),
            new.hirer_id,
            new.worker_id,
            hirer_wallet.id,
            worker_wallet.id,
            new.amount,
            new.currency.as_str(),
            new.funding_source,
            new.auto_release_at,
            &mut db_tx,
        )
        .await?;

        let mut milestones = Vec::with_capacity(new.milestones.len());
        for (i, spec) in new.milestones.iter().enumerate() {
            milestones.push(
                Milestone::insert(escrow.id, i as i32 + 1, &spec.title, spec.amount, &mut db_tx)
                    .await?,
            );
        }
        db_tx.commit().await?;

        tracing::info!(escrow_id = %escrow.id, amount = %escrow.amount, "escrow created");
        Ok((escrow, milestones))
    }

    /// Fund a pending escrow from the hirer's wallet or an external method.
    pub async fn fund(
        &self,
        escrow_id: EscrowId,
        actor: Actor,
        method: Option<&PaymentMethod>,
    ) -> CoreResult<FundOutcome> {
        let escrow = self.load(escrow_id).await?;
        Self::guard(&escrow, &[EscrowStatus::Pending], "fund")?;
        if actor.user_id != escrow.hirer_id && !actor.is_staff() {
            return Err(CoreError::Forbidden(
                "only the hirer can fund this escrow".to_string(),
            ));
        }
        let milestones = Milestone::list_for_escrow(escrow.id, &self.deps.db_pool).await?;
        if !milestones.is_empty() {
            let sum: Decimal = milestones.iter().map(|m| m.amount).sum();
            if (sum - escrow.amount).abs() > money_tolerance() {
                return Err(CoreError::validation(
                    "milestone amounts must sum to the escrow amount before funding",
                ));
            }
        }

        let auto_release_at = Utc::now() + Duration::days(AUTO_RELEASE_DAYS);

        match escrow.funding_source.parse().unwrap_or(FundingSource::Wallet) {
            FundingSource::Wallet => {
                let mut db_tx = self.deps.db_pool.begin().await?;
                self.deps
                    .ledger
                    .reserve_in(
                        escrow.hirer_wallet_id,
                        escrow.amount,
                        TxSpec::new(TxType::EscrowFund, format!("escrow-fund-{}", escrow.id))
                            .escrow(escrow.id),
                        &mut db_tx,
                    )
                    .await?;
                if Escrow::try_mark_funded(escrow.id, auto_release_at, &mut db_tx).await? == 0 {
                    return Err(CoreError::Conflict(
                        "escrow was funded concurrently".to_string(),
                    ));
                }
                db_tx.commit().await?;

                let escrow = self.load(escrow_id).await?;
                notify_best_effort(
                    self.deps.notifier.as_ref(),
                    escrow.worker_id,
                    Notification::EscrowFunded {
                        escrow_id: escrow.id,
                        amount: escrow.amount,
                    },
                )
                .await;
                Ok(FundOutcome {
                    escrow,
                    payment: None,
                    redirect_url: None,
                })
            }
            FundingSource::External => {
                let method = method.ok_or_else(|| {
                    CoreError::validation("externally funded escrows need a payment method")
                })?;
                let reference = Uuid::new_v4();
                // Network call first, outside any database transaction. A
                // timed-out initiation may still have reached the provider,
                // so it gets a pending payment row and reconciliation
                // settles it; other failures surface before anything is
                // recorded.
                let (provider, status, payer_ref, redirect_url) = match self
                    .deps
                    .gateway
                    .initiate_collection(
                        method,
                        escrow.amount,
                        &escrow.currency,
                        reference,
                        "escrow funding",
                    )
                    .await
                {
                    Ok(initiated) => (
                        initiated.provider,
                        initiated.status,
                        Some(initiated.counterparty_ref),
                        initiated.redirect_url,
                    ),
                    Err(CoreError::ProviderTimeout { .. }) => (
                        self.deps.gateway.provider_for(method)?,
                        GatewayStatus::Pending,
                        None,
                        None,
                    ),
                    Err(e) => return Err(e),
                };

                let mut db_tx = self.deps.db_pool.begin().await?;
                let payment = Payment::insert(
                    NewPayment {
                        direction: PaymentDirection::Collection,
                        provider,
                        channel: method.channel(),
                        amount: escrow.amount,
                        currency: escrow.currency.clone(),
                        status,
                        reference,
                        escrow_id: Some(escrow.id),
                        wallet_id: None,
                        transaction_id: None,
                        payer_ref,
                        payee_ref: None,
                    },
                    &mut db_tx,
                )
                .await?;
                // A synchronously-completed collection funds the escrow now;
                // anything else waits for the webhook/reconciliation.
                if status == GatewayStatus::Completed {
                    Escrow::try_mark_funded(escrow.id, auto_release_at, &mut db_tx).await?;
                }
                db_tx.commit().await?;

                let escrow = self.load(escrow_id).await?;
                Ok(FundOutcome {
                    escrow,
                    payment: Some(payment),
                    redirect_url,
                })
            }
        }
    }

    /// Complete an externally-funded escrow's collection. Called from
    /// reconciliation when the provider confirms; idempotent.
    pub async fn confirm_external_funding_in(
        &self,
        escrow_id: EscrowId,
        conn: &mut PgConnection,
    ) -> CoreResult<bool> {
        let auto_release_at = Utc::now() + Duration::days(AUTO_RELEASE_DAYS);
        Ok(Escrow::try_mark_funded(escrow_id, auto_release_at, conn).await? > 0)
    }

    /// Release funds to the worker. `amount` of `None` releases the whole
    /// remaining balance.
    pub async fn release_funds(
        &self,
        escrow_id: EscrowId,
        amount: Option<Decimal>,
        actor: Actor,
    ) -> CoreResult<Escrow> {
        let escrow = self.load(escrow_id).await?;
        Self::guard(
            &escrow,
            &[EscrowStatus::Funded, EscrowStatus::PartialRelease],
            "release_funds",
        )?;
        if actor.user_id != escrow.hirer_id && !actor.is_staff() {
            return Err(CoreError::Forbidden(
                "only the hirer can release escrow funds".to_string(),
            ));
        }
        let amount = amount.unwrap_or(escrow.remaining_amount);
        if amount <= Decimal::ZERO || amount > escrow.remaining_amount {
            return Err(CoreError::validation(format!(
                "release amount must be within (0, {}]",
                escrow.remaining_amount
            )));
        }

        let mut db_tx = self.deps.db_pool.begin().await?;
        self.move_to_worker_in(
            &escrow,
            amount,
            TxSpec::new(
                TxType::EscrowRelease,
                format!("escrow-release-{}", Uuid::new_v4()),
            )
            .escrow(escrow.id),
            &mut db_tx,
        )
        .await?;
        let updated = Escrow::try_apply_outflow(
            escrow.id,
            amount,
            &["funded", "partial_release"],
            EscrowStatus::Released,
            &mut db_tx,
        )
        .await?
        .ok_or_else(|| CoreError::Conflict("escrow changed concurrently".to_string()))?;
        db_tx.commit().await?;

        tracing::info!(
            escrow_id = %escrow.id,
            amount = %amount,
            status = %updated.status,
            "escrow funds released"
        );
        notify_best_effort(
            self.deps.notifier.as_ref(),
            escrow.worker_id,
            Notification::EscrowReleased {
                escrow_id: escrow.id,
                amount,
            },
        )
        .await;
        Ok(updated)
    }

    /// Return the remaining balance to the hirer. Terminal.
    pub async fn refund(
        &self,
        escrow_id: EscrowId,
        actor: Actor,
        reason: &str,
    ) -> CoreResult<Escrow> {
        let escrow = self.load(escrow_id).await?;
        // A disputed escrow refunds only through the dispute resolution path.
        Self::guard(
            &escrow,
            &[EscrowStatus::Funded, EscrowStatus::PartialRelease],
            "refund",
        )?;
        if actor.user_id != escrow.worker_id && !actor.is_staff() {
            return Err(CoreError::Forbidden(
                "only the worker or staff can refund an escrow".to_string(),
            ));
        }

        let amount = escrow.remaining_amount;
        let mut db_tx = self.deps.db_pool.begin().await?;
        self.move_back_to_hirer_in(
            &escrow,
            amount,
            TxSpec::new(TxType::Refund, format!("escrow-refund-{}", escrow.id))
                .escrow(escrow.id)
                .note(reason),
            &mut db_tx,
        )
        .await?;
        let updated = Escrow::try_apply_outflow(
            escrow.id,
            amount,
            &["funded", "partial_release"],
            EscrowStatus::Refunded,
            &mut db_tx,
        )
        .await?
        .ok_or_else(|| CoreError::Conflict("escrow changed concurrently".to_string()))?;
        db_tx.commit().await?;

        tracing::info!(escrow_id = %escrow.id, amount = %amount, reason, "escrow refunded");
        notify_best_effort(
            self.deps.notifier.as_ref(),
            escrow.hirer_id,
            Notification::EscrowRefunded {
                escrow_id: escrow.id,
                amount,
            },
        )
        .await;
        Ok(updated)
    }

    /// Cancel a never-funded escrow.
    pub async fn cancel(&self, escrow_id: EscrowId, actor: Actor) -> CoreResult<()> {
        let escrow = self.load(escrow_id).await?;
        Self::guard(&escrow, &[EscrowStatus::Pending], "cancel")?;
        if actor.user_id != escrow.hirer_id && !actor.is_staff() {
            return Err(CoreError::Forbidden(
                "only the hirer can cancel this escrow".to_string(),
            ));
        }
        let mut db_tx = self.deps.db_pool.begin().await?;
        if Escrow::try_cancel(escrow.id, &mut db_tx).await? == 0 {
            return Err(CoreError::Conflict(
                "escrow changed concurrently".to_string(),
            ));
        }
        db_tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Dispute entry points (called by the dispute workflow)
    // =========================================================================

    /// funded|partial_release -> disputed, freezing release and refund.
    pub async fn open_dispute_in(
        &self,
        escrow: &Escrow,
        dispute_id: DisputeId,
        conn: &mut PgConnection,
    ) -> CoreResult<()> {
        Self::guard(
            escrow,
            &[EscrowStatus::Funded, EscrowStatus::PartialRelease],
            "open_dispute",
        )?;
        if Escrow::try_open_dispute(escrow.id, dispute_id, conn).await? == 0 {
            return Err(CoreError::Conflict(
                "escrow changed concurrently".to_string(),
            ));
        }
        Ok(())
    }

    /// Execute a dispute resolution's fund movements. `worker_amount` +
    /// `hirer_amount` must equal the escrow's remaining amount (the workflow
    /// validates this); the escrow leaves 'disputed' in the same transaction.
    pub async fn resolve_dispute_in(
        &self,
        escrow: &Escrow,
        dispute_id: DisputeId,
        worker_amount: Decimal,
        hirer_amount: Decimal,
        conn: &mut PgConnection,
    ) -> CoreResult<Escrow> {
        Self::guard(escrow, &[EscrowStatus::Disputed], "resolve_dispute")?;

        if worker_amount > Decimal::ZERO {
            self.move_to_worker_in(
                escrow,
                worker_amount,
                TxSpec::new(
                    TxType::DisputeResolution,
                    format!("dispute-worker-{dispute_id}"),
                )
                .escrow(escrow.id)
                .dispute(dispute_id),
                conn,
            )
            .await?;
        }
        if hirer_amount > Decimal::ZERO {
            self.move_back_to_hirer_in(
                escrow,
                hirer_amount,
                TxSpec::new(
                    TxType::DisputeResolution,
                    format!("dispute-hirer-{dispute_id}"),
                )
                .escrow(escrow.id)
                .dispute(dispute_id),
                conn,
            )
            .await?;
        }

        // Everything to the hirer reads as a refund; any worker share reads
        // as a release.
        let final_status = if worker_amount > Decimal::ZERO {
            EscrowStatus::Released
        } else {
            EscrowStatus::Refunded
        };
        Escrow::try_apply_outflow(
            escrow.id,
            worker_amount + hirer_amount,
            &["disputed"],
            final_status,
            conn,
        )
        .await?
        .ok_or_else(|| CoreError::Conflict("escrow changed concurrently".to_string()))
    }

    /// disputed -> funded/partial_release (dispute cancelled or expired).
    pub async fn return_from_dispute_in(
        &self,
        escrow: &Escrow,
        dispute_id: DisputeId,
        conn: &mut PgConnection,
    ) -> CoreResult<()> {
        Self::guard(escrow, &[EscrowStatus::Disputed], "return_from_dispute")?;
        if Escrow::try_return_from_dispute(escrow.id, dispute_id, conn).await? == 0 {
            return Err(CoreError::Conflict(
                "escrow changed concurrently".to_string(),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Milestones
    // =========================================================================

    /// Append a milestone to a not-yet-funded escrow.
    pub async fn add_milestone(
        &self,
        escrow_id: EscrowId,
        title: &str,
        amount: Decimal,
        actor: Actor,
    ) -> CoreResult<Milestone> {
        let escrow = self.load(escrow_id).await?;
        Self::guard(&escrow, &[EscrowStatus::Pending], "add_milestone")?;
        if actor.user_id != escrow.hirer_id && !actor.is_staff() {
            return Err(CoreError::Forbidden(
                "only the hirer can add milestones".to_string(),
            ));
        }
        if amount <= Decimal::ZERO {
            return Err(CoreError::validation("milestone amount must be positive"));
        }
        let existing = Milestone::list_for_escrow(escrow.id, &self.deps.db_pool).await?;
        let sum: Decimal = existing.iter().map(|m| m.amount).sum();
        if sum + amount > escrow.amount + money_tolerance() {
            return Err(CoreError::validation(format!(
                "milestones would sum to {}, escrow amount is {}",
                sum + amount,
                escrow.amount
            )));
        }

        let mut db_tx = self.deps.db_pool.begin().await?;
        let position = Milestone::max_position(escrow.id, &mut db_tx).await? + 1;
        let milestone =
            Milestone::insert(escrow.id, position, title, amount, &mut db_tx).await?;
        db_tx.commit().await?;
        Ok(milestone)
    }

    /// Worker marks a milestone's deliverable as done.
    pub async fn complete_milestone(
        &self,
        milestone_id: MilestoneId,
        actor: Actor,
    ) -> CoreResult<Milestone> {
        let milestone = Milestone::find_by_id(milestone_id, &self.deps.db_pool)
            .await?
            .ok_or(CoreError::NotFound("milestone"))?;
        let escrow = self.load(milestone.escrow_id).await?;
        Self::guard(
            &escrow,
            &[EscrowStatus::Funded, EscrowStatus::PartialRelease],
            "complete_milestone",
        )?;
        if actor.user_id != escrow.worker_id && !actor.is_staff() {
            return Err(CoreError::Forbidden(
                "only the worker can complete a milestone".to_string(),
            ));
        }
        let mut db_tx = self.deps.db_pool.begin().await?;
        if Milestone::try_complete(milestone.id, &mut db_tx).await? == 0 {
            return Err(CoreError::InvalidTransition {
                entity: "milestone",
                from: milestone.status,
                attempted: "complete_milestone",
            });
        }
        db_tx.commit().await?;
        Milestone::find_by_id(milestone_id, &self.deps.db_pool)
            .await?
            .ok_or(CoreError::NotFound("milestone"))
    }

    /// Release one completed milestone's amount to the worker. Releasing the
    /// last milestone drives the parent escrow to 'released'.
    pub async fn release_milestone(
        &self,
        milestone_id: MilestoneId,
        actor: Actor,
    ) -> CoreResult<(Escrow, Milestone)> {
        let milestone = Milestone::find_by_id(milestone_id, &self.deps.db_pool)
            .await?
            .ok_or(CoreError::NotFound("milestone"))?;
        let escrow = self.load(milestone.escrow_id).await?;
        Self::guard(
            &escrow,
            &[EscrowStatus::Funded, EscrowStatus::PartialRelease],
            "release_milestone",
        )?;
        if actor.user_id != escrow.hirer_id && !actor.is_staff() {
            return Err(CoreError::Forbidden(
                "only the hirer can release a milestone".to_string(),
            ));
        }
        if milestone.status.parse::<MilestoneStatus>().ok() != Some(MilestoneStatus::Completed)
        {
            return Err(CoreError::InvalidTransition {
                entity: "milestone",
                from: milestone.status.clone(),
                attempted: "release_milestone",
            });
        }

        let mut db_tx = self.deps.db_pool.begin().await?;
        if Milestone::try_release(milestone.id, &mut db_tx).await? == 0 {
            return Err(CoreError::Conflict(
                "milestone changed concurrently".to_string(),
            ));
        }
        self.move_to_worker_in(
            &escrow,
            milestone.amount,
            TxSpec::new(
                TxType::EscrowRelease,
                format!("milestone-release-{}", milestone.id),
            )
            .escrow(escrow.id),
            &mut db_tx,
        )
        .await?;
        let updated = Escrow::try_apply_outflow(
            escrow.id,
            milestone.amount,
            &["funded", "partial_release"],
            EscrowStatus::Released,
            &mut db_tx,
        )
        .await?
        .ok_or_else(|| CoreError::Conflict("escrow changed concurrently".to_string()))?;
        db_tx.commit().await?;

        notify_best_effort(
            self.deps.notifier.as_ref(),
            escrow.worker_id,
            Notification::EscrowReleased {
                escrow_id: escrow.id,
                amount: milestone.amount,
            },
        )
        .await;
        let milestone = Milestone::find_by_id(milestone_id, &self.deps.db_pool)
            .await?
            .ok_or(CoreError::NotFound("milestone"))?;
        Ok((updated, milestone))
    }

    // =========================================================================
    // Auto-release sweep
    // =========================================================================

    /// Release funded escrows whose auto-release deadline passed and which
    /// have no open dispute. One failure does not stop the sweep.
    pub async fn auto_release_due(&self, limit: i64) -> CoreResult<usize> {
        let due = Escrow::find_due_for_auto_release(limit, &self.deps.db_pool).await?;
        let mut released = 0;
        for escrow in due {
            match self
                .release_funds(escrow.id, None, Actor::system())
                .await
            {
                Ok(_) => {
                    tracing::info!(escrow_id = %escrow.id, "auto-released escrow");
                    released += 1;
                }
                Err(e) => {
                    tracing::error!(escrow_id = %escrow.id, error = %e, "auto-release failed");
                }
            }
        }
        Ok(released)
    }
}
