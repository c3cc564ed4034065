//! Dispute workflow.
//!
//! Sub-state-machine over a contested escrow: pending -> in_review ->
//! resolved|escalated, with cancellation (initiator, pre-review) and
//! expiry (unattended past the deadline). Resolution delegates the fund
//! movements back to the escrow engine inside one database transaction, so
//! a dispute is never 'resolved' while its escrow is still 'disputed'.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use crate::common::{
    money_tolerance, Actor, CoreError, CoreResult, DisputeId, EscrowId,
};
use crate::domains::disputes::models::{
    Dispute, DisputeEvidence, DisputeOutcome, DisputeStatus, EvidenceKind,
};
use crate::domains::escrows::models::Escrow;
use crate::domains::escrows::EscrowEngine;
use crate::kernel::deps::ServerDeps;
use crate::kernel::notifications::{notify_best_effort, Notification};

/// How long the respondent gets before the dispute is flagged overdue.
const RESPONSE_DUE_DAYS: i64 = 3;
/// Unattended past this, a pending dispute expires as no_action_required.
const AUTO_RESOLVE_DAYS: i64 = 14;

/// A moderator's resolution decision.
#[derive(Debug, Clone)]
pub struct ResolutionRequest {
    pub outcome: DisputeOutcome,
    /// Required for split outcomes; ignored otherwise.
    pub hirer_amount: Option<Decimal>,
    pub worker_amount: Option<Decimal>,
}

pub struct DisputeWorkflow {
    deps: Arc<ServerDeps>,
    engine: Arc<EscrowEngine>,
}

impl DisputeWorkflow {
    pub fn new(deps: Arc<ServerDeps>, engine: Arc<EscrowEngine>) -> Self {
        Self { deps, engine }
    }

    fn guard(
        dispute: &Dispute,
        allowed: &[DisputeStatus],
        attempted: &'static str,
    ) -> CoreResult<()> {
        if allowed.contains(&dispute.status_enum()) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                entity: "dispute",
                from: dispute.status.clone(),
                attempted,
            })
        }
    }

    async fn load(&self, dispute_id: DisputeId) -> CoreResult<Dispute> {
        Dispute::find_by_id(dispute_id, &self.deps.db_pool)
            .await?
            .ok_or(CoreError::NotFound("dispute"))
    }

    async fn load_escrow(&self, escrow_id: EscrowId) -> CoreResult<Escrow> {
        Escrow::find_by_id(escrow_id, &self.deps.db_pool)
            .await?
            .ok_or(CoreError::NotFound("escrow"))
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Open a dispute against a funded escrow. Only a party to the escrow may
    /// open one, and only one dispute can be active per escrow.
    pub async fn open(
        &self,
        escrow_id: EscrowId,
        initiator: Actor,
        reason: &str,
    ) -> CoreResult<Dispute> {
        if reason.trim().is_empty() {
            return Err(CoreError::validation("a dispute needs a reason"));
        }
        let escrow = self.load_escrow(escrow_id).await?;
        if !escrow.is_party(initiator.user_id) {
            return Err(CoreError::Forbidden(
                "only the hirer or worker can open a dispute".to_string(),
            ));
        }
        let respondent_id = if initiator.user_id == escrow.hirer_id {
            escrow.worker_id
        } else {
            escrow.hirer_id
        };

        let now = Utc::now();
        let dispute_id = DisputeId::new();
        let mut db_tx = self.deps.db_pool.begin().await?;
        let dispute = Dispute::insert(
            dispute_id,
            escrow.id,
            initiator.user_id,
            respondent_id,
            reason,
            now + Duration::days(RESPONSE_DUE_DAYS),
            now + Duration::days(AUTO_RESOLVE_DAYS),
            &mut db_tx,
        )
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                CoreError::Conflict("escrow already has an active dispute".to_string())
            }
            _ => CoreError::Database(e),
        })?;
        self.engine
            .open_dispute_in(&escrow, dispute.id, &mut db_tx)
            .await?;
        db_tx.commit().await?;

        tracing::info!(dispute_id = %dispute.id, escrow_id = %escrow.id, "dispute opened");
        notify_best_effort(
            self.deps.notifier.as_ref(),
            respondent_id,
            Notification::DisputeOpened {
                dispute_id: dispute.id,
                escrow_id: escrow.id,
            },
        )
        .await;
        Ok(dispute)
    }

    /// pending -> in_review, claiming the dispute for a moderator.
    pub async fn accept_for_review(
        &self,
        dispute_id: DisputeId,
        moderator: Actor,
    ) -> CoreResult<Dispute> {
        if !moderator.is_staff() {
            return Err(CoreError::Forbidden(
                "only moderators can review disputes".to_string(),
            ));
        }
        let dispute = self.load(dispute_id).await?;
        Self::guard(&dispute, &[DisputeStatus::Pending], "accept_for_review")?;

        let mut db_tx = self.deps.db_pool.begin().await?;
        if Dispute::try_accept(dispute.id, moderator.user_id, &mut db_tx).await? == 0 {
            return Err(CoreError::Conflict(
                "dispute changed concurrently".to_string(),
            ));
        }
        db_tx.commit().await?;
        self.load(dispute_id).await
    }

    /// in_review -> escalated, parking the dispute for an admin decision.
    pub async fn escalate(
        &self,
        dispute_id: DisputeId,
        moderator: Actor,
        note: &str,
    ) -> CoreResult<Dispute> {
        if !moderator.is_staff() {
            return Err(CoreError::Forbidden(
                "only moderators can escalate disputes".to_string(),
            ));
        }
        let dispute = self.load(dispute_id).await?;
        Self::guard(&dispute, &[DisputeStatus::InReview], "escalate")?;

        let mut db_tx = self.deps.db_pool.begin().await?;
        if Dispute::try_escalate(dispute.id, &mut db_tx).await? == 0 {
            return Err(CoreError::Conflict(
                "dispute changed concurrently".to_string(),
            ));
        }
        if !note.trim().is_empty() {
            DisputeEvidence::insert(
                dispute.id,
                moderator.user_id,
                EvidenceKind::Comment,
                note,
                None,
                &mut db_tx,
            )
            .await?;
        }
        db_tx.commit().await?;
        self.load(dispute_id).await
    }

    /// Decide the dispute and execute its fund movements.
    ///
    /// Split amounts must cover the escrow's *remaining* amount within the
    /// 0.01 tolerance; the worker side absorbs any sub-pesewa rounding so the
    /// ledger movements sum exactly.
    pub async fn resolve(
        &self,
        dispute_id: DisputeId,
        request: ResolutionRequest,
        moderator: Actor,
    ) -> CoreResult<Dispute> {
        if !moderator.is_staff() {
            return Err(CoreError::Forbidden(
                "only moderators can resolve disputes".to_string(),
            ));
        }
        let dispute = self.load(dispute_id).await?;
        Self::guard(
            &dispute,
            &[DisputeStatus::InReview, DisputeStatus::Escalated],
            "resolve",
        )?;
        if dispute.status_enum() == DisputeStatus::Escalated && !moderator.is_admin() {
            return Err(CoreError::Forbidden(
                "escalated disputes need an admin".to_string(),
            ));
        }
        let escrow = self.load_escrow(dispute.escrow_id).await?;
        let remaining = escrow.remaining_amount;

        let (hirer_amount, worker_amount) = match request.outcome {
            DisputeOutcome::HirerFavor => (remaining, Decimal::ZERO),
            DisputeOutcome::WorkerFavor => (Decimal::ZERO, remaining),
            DisputeOutcome::Split => {
                let hirer = request.hirer_amount.ok_or_else(|| {
                    CoreError::validation("split resolution needs a hirer amount")
                })?;
                let worker = request.worker_amount.ok_or_else(|| {
                    CoreError::validation("split resolution needs a worker amount")
                })?;
                if hirer < Decimal::ZERO || worker < Decimal::ZERO {
                    return Err(CoreError::validation("split amounts must be non-negative"));
                }
                if (hirer + worker - remaining).abs() > money_tolerance() {
                    return Err(CoreError::validation(format!(
                        "split amounts sum to {}, remaining escrow amount is {remaining}",
                        hirer + worker
                    )));
                }
                // The worker side absorbs sub-pesewa rounding so the two
                // movements sum exactly to the remaining amount.
                let hirer = hirer.min(remaining);
                (hirer, remaining - hirer)
            }
            DisputeOutcome::NoActionRequired => {
                return Err(CoreError::validation(
                    "no_action_required is reserved for expiry",
                ))
            }
        };

        let mut db_tx = self.deps.db_pool.begin().await?;
        self.engine
            .resolve_dispute_in(&escrow, dispute.id, worker_amount, hirer_amount, &mut db_tx)
            .await?;
        if Dispute::try_resolve(
            dispute.id,
            request.outcome,
            hirer_amount,
            worker_amount,
            moderator.user_id,
            &mut db_tx,
        )
        .await?
            == 0
        {
            return Err(CoreError::Conflict(
                "dispute changed concurrently".to_string(),
            ));
        }
        db_tx.commit().await?;

        tracing::info!(
            dispute_id = %dispute.id,
            outcome = %request.outcome,
            hirer_amount = %hirer_amount,
            worker_amount = %worker_amount,
            "dispute resolved"
        );
        for party in [dispute.initiator_id, dispute.respondent_id] {
            notify_best_effort(
                self.deps.notifier.as_ref(),
                party,
                Notification::DisputeResolved {
                    dispute_id: dispute.id,
                    outcome: request.outcome.to_string(),
                },
            )
            .await;
        }
        self.load(dispute_id).await
    }

    /// Initiator withdraws a dispute that nobody has picked up yet; the
    /// escrow returns to its releasable state.
    pub async fn cancel(&self, dispute_id: DisputeId, actor: Actor) -> CoreResult<Dispute> {
        let dispute = self.load(dispute_id).await?;
        if dispute.initiator_id != actor.user_id {
            return Err(CoreError::Forbidden(
                "only the initiator can cancel a dispute".to_string(),
            ));
        }
        Self::guard(&dispute, &[DisputeStatus::Pending], "cancel")?;
        let escrow = self.load_escrow(dispute.escrow_id).await?;

        let mut db_tx = self.deps.db_pool.begin().await?;
        if Dispute::try_cancel(dispute.id, &mut db_tx).await? == 0 {
            return Err(CoreError::Conflict(
                "dispute changed concurrently".to_string(),
            ));
        }
        self.engine
            .return_from_dispute_in(&escrow, dispute.id, &mut db_tx)
            .await?;
        db_tx.commit().await?;
        self.load(dispute_id).await
    }

    /// Append evidence or a comment. Allowed for the parties and staff while
    /// the dispute is still open to argument.
    pub async fn add_evidence(
        &self,
        dispute_id: DisputeId,
        actor: Actor,
        kind: &str,
        body: &str,
        attachment_url: Option<&str>,
    ) -> CoreResult<DisputeEvidence> {
        let kind = EvidenceKind::from_str(kind)
            .map_err(|e| CoreError::validation(e.to_string()))?;
        if body.trim().is_empty() {
            return Err(CoreError::validation("evidence body cannot be empty"));
        }
        let dispute = self.load(dispute_id).await?;
        if !dispute.is_party(actor.user_id) && !actor.is_staff() {
            return Err(CoreError::Forbidden(
                "only dispute parties can add evidence".to_string(),
            ));
        }
        if !dispute.status_enum().accepts_evidence() {
            return Err(CoreError::InvalidTransition {
                entity: "dispute",
                from: dispute.status.clone(),
                attempted: "add_evidence",
            });
        }

        let mut db_tx = self.deps.db_pool.begin().await?;
        let evidence = DisputeEvidence::insert(
            dispute.id,
            actor.user_id,
            kind,
            body,
            attachment_url,
            &mut db_tx,
        )
        .await?;
        db_tx.commit().await?;
        Ok(evidence)
    }

    /// Expire unattended pending disputes past their deadline; each returns
    /// its escrow to 'funded' so the auto-release clock decides the rest.
    pub async fn expire_due(&self, limit: i64) -> CoreResult<usize> {
        let due = Dispute::find_due_for_expiry(limit, &self.deps.db_pool).await?;
        let mut expired = 0;
        for dispute in due {
            let result = async {
                let escrow = self.load_escrow(dispute.escrow_id).await?;
                let mut db_tx = self.deps.db_pool.begin().await?;
                if Dispute::try_expire(dispute.id, &mut db_tx).await? == 0 {
                    return Err(CoreError::Conflict(
                        "dispute changed concurrently".to_string(),
                    ));
                }
                self.engine
                    .return_from_dispute_in(&escrow, dispute.id, &mut db_tx)
                    .await?;
                db_tx.commit().await?;
                Ok::<_, CoreError>(())
            }
            .await;
            match result {
                Ok(()) => {
                    tracing::info!(dispute_id = %dispute.id, "dispute expired unattended");
                    expired += 1;
                }
                Err(e) => {
                    tracing::error!(dispute_id = %dispute.id, error = %e, "dispute expiry failed");
                }
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_amounts(
        remaining: Decimal,
        hirer: Decimal,
        worker: Decimal,
    ) -> CoreResult<(Decimal, Decimal)> {
        if (hirer + worker - remaining).abs() > money_tolerance() {
            return Err(CoreError::validation("split amounts do not cover escrow"));
        }
        Ok((hirer, remaining - hirer))
    }

    #[test]
    fn split_within_tolerance_is_accepted() {
        // 30 + 69.99 against 99.99 is exact.
        let (hirer, worker) = split_amounts(
            Decimal::new(9999, 2),
            Decimal::new(3000, 2),
            Decimal::new(6999, 2),
        )
        .unwrap();
        assert_eq!(hirer, Decimal::new(3000, 2));
        assert_eq!(worker, Decimal::new(6999, 2));

        // A one-pesewa discrepancy is absorbed on the worker side.
        let (hirer, worker) = split_amounts(
            Decimal::new(10000, 2),
            Decimal::new(3000, 2),
            Decimal::new(6999, 2),
        )
        .unwrap();
        assert_eq!(hirer + worker, Decimal::new(10000, 2));
    }

    #[test]
    fn split_outside_tolerance_is_rejected() {
        // 30 + 50 against 99.99 misses by 19.99.
        let result = split_amounts(
            Decimal::new(9999, 2),
            Decimal::from(30),
            Decimal::from(50),
        );
        assert!(result.is_err());
    }
}
