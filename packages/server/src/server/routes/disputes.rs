//! Dispute endpoints: thin wrappers over the dispute workflow.

use axum::extract::{Extension, Path};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::common::{CoreError, CoreResult, DisputeId, EscrowId};
use crate::domains::disputes::models::{Dispute, DisputeEvidence, DisputeOutcome};
use crate::domains::disputes::ResolutionRequest;
use crate::server::app::AxumAppState;
use crate::server::middleware::AuthUser;

#[derive(Deserialize)]
pub struct OpenDisputeRequest {
    pub escrow_id: EscrowId,
    pub reason: String,
}

/// POST /disputes
pub async fn open_dispute(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Json(body): Json<OpenDisputeRequest>,
) -> CoreResult<Json<Dispute>> {
    let dispute = state
        .disputes
        .open(body.escrow_id, auth.actor(), &body.reason)
        .await?;
    Ok(Json(dispute))
}

#[derive(Serialize)]
pub struct DisputeDetailResponse {
    #[serde(flatten)]
    pub dispute: Dispute,
    pub evidence: Vec<DisputeEvidence>,
}

/// GET /disputes/:id
pub async fn get_dispute(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(dispute_id): Path<DisputeId>,
) -> CoreResult<Json<DisputeDetailResponse>> {
    let dispute = Dispute::find_by_id(dispute_id, &state.deps.db_pool)
        .await?
        .ok_or(CoreError::NotFound("dispute"))?;
    if !dispute.is_party(auth.user_id) && !auth.is_staff() {
        return Err(CoreError::Forbidden(
            "not a party to this dispute".to_string(),
        ));
    }
    let evidence = DisputeEvidence::list_for_dispute(dispute.id, &state.deps.db_pool).await?;
    Ok(Json(DisputeDetailResponse { dispute, evidence }))
}

/// POST /disputes/:id/review
pub async fn accept_for_review(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(dispute_id): Path<DisputeId>,
) -> CoreResult<Json<Dispute>> {
    let dispute = state
        .disputes
        .accept_for_review(dispute_id, auth.actor())
        .await?;
    Ok(Json(dispute))
}

#[derive(Deserialize, Default)]
pub struct EscalateRequest {
    #[serde(default)]
    pub note: String,
}

/// POST /disputes/:id/escalate
pub async fn escalate_dispute(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(dispute_id): Path<DisputeId>,
    body: Option<Json<EscalateRequest>>,
) -> CoreResult<Json<Dispute>> {
    let note = body.map(|Json(b)| b.note).unwrap_or_default();
    let dispute = state
        .disputes
        .escalate(dispute_id, auth.actor(), &note)
        .await?;
    Ok(Json(dispute))
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    /// 'hirer_favor', 'worker_favor', or 'split'.
    pub outcome: String,
    pub hirer_amount: Option<Decimal>,
    pub worker_amount: Option<Decimal>,
}

/// POST /disputes/:id/resolve
pub async fn resolve_dispute(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(dispute_id): Path<DisputeId>,
    Json(body): Json<ResolveRequest>,
) -> CoreResult<Json<Dispute>> {
    let outcome = DisputeOutcome::from_str(&body.outcome)
        .map_err(|e| CoreError::validation(e.to_string()))?;
    let dispute = state
        .disputes
        .resolve(
            dispute_id,
            ResolutionRequest {
                outcome,
                hirer_amount: body.hirer_amount,
                worker_amount: body.worker_amount,
            },
            auth.actor(),
        )
        .await?;
    Ok(Json(dispute))
}

/// POST /disputes/:id/cancel
pub async fn cancel_dispute(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(dispute_id): Path<DisputeId>,
) -> CoreResult<Json<Dispute>> {
    let dispute = state.disputes.cancel(dispute_id, auth.actor()).await?;
    Ok(Json(dispute))
}

#[derive(Deserialize)]
pub struct EvidenceRequest {
    /// 'evidence' or 'comment'.
    pub kind: String,
    pub body: String,
    pub attachment_url: Option<String>,
}

/// POST /disputes/:id/evidence
pub async fn add_evidence(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(dispute_id): Path<DisputeId>,
    Json(body): Json<EvidenceRequest>,
) -> CoreResult<Json<DisputeEvidence>> {
    let evidence = state
        .disputes
        .add_evidence(
            dispute_id,
            auth.actor(),
            &body.kind,
            &body.body,
            body.attachment_url.as_deref(),
        )
        .await?;
    Ok(Json(evidence))
}
