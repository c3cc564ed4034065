//! Escrow endpoints: thin wrappers over the escrow engine.

use axum::extract::{Extension, Path};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::{CoreError, CoreResult, Currency, EscrowId, MilestoneId, UserId};
use crate::domains::escrows::models::{Escrow, FundingSource, Milestone};
use crate::domains::escrows::{NewEscrow, NewMilestoneSpec};
use crate::kernel::gateway::PaymentMethod;
use crate::server::app::AxumAppState;
use crate::server::middleware::AuthUser;

#[derive(Serialize)]
pub struct EscrowResponse {
    #[serde(flatten)]
    pub escrow: Escrow,
    pub milestones: Vec<Milestone>,
}

async fn load_escrow_for(
    state: &AxumAppState,
    auth: &AuthUser,
    escrow_id: EscrowId,
) -> CoreResult<Escrow> {
    let escrow = Escrow::find_by_id(escrow_id, &state.deps.db_pool)
        .await?
        .ok_or(CoreError::NotFound("escrow"))?;
    if !escrow.is_party(auth.user_id) && !auth.is_staff() {
        return Err(CoreError::Forbidden(
            "not a party to this escrow".to_string(),
        ));
    }
    Ok(escrow)
}

#[derive(Deserialize)]
pub struct MilestoneSpec {
    pub title: String,
    pub amount: Decimal,
}

#[derive(Deserialize)]
pub struct CreateEscrowRequest {
    pub worker_id: UserId,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Currency,
    pub contract_ref: Option<String>,
    /// 'wallet' (default) or 'external'.
    pub funding_source: Option<String>,
    pub auto_release_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub milestones: Vec<MilestoneSpec>,
}

/// POST /escrows — the authenticated caller becomes the hirer.
pub async fn create_escrow(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Json(body): Json<CreateEscrowRequest>,
) -> CoreResult<Json<EscrowResponse>> {
    let funding_source = match body.funding_source.as_deref() {
        None => FundingSource::Wallet,
        Some(raw) => raw
            .parse()
            .map_err(|_| CoreError::validation(format!("invalid funding source: {raw}")))?,
    };
    let (escrow, milestones) = state
        .engine
        .create(NewEscrow {
            contract_ref: body.contract_ref,
            hirer_id: auth.user_id,
            worker_id: body.worker_id,
            amount: body.amount,
            currency: body.currency,
            funding_source,
            auto_release_at: body.auto_release_at,
            milestones: body
                .milestones
                .into_iter()
                .map(|m| NewMilestoneSpec {
                    title: m.title,
                    amount: m.amount,
                })
                .collect(),
        })
        .await?;
    Ok(Json(EscrowResponse { escrow, milestones }))
}

/// GET /escrows/:id
pub async fn get_escrow(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(escrow_id): Path<EscrowId>,
) -> CoreResult<Json<EscrowResponse>> {
    let escrow = load_escrow_for(&state, &auth, escrow_id).await?;
    let milestones = Milestone::list_for_escrow(escrow.id, &state.deps.db_pool).await?;
    Ok(Json(EscrowResponse { escrow, milestones }))
}

#[derive(Deserialize, Default)]
pub struct FundRequest {
    /// Required when the escrow is externally funded.
    pub method: Option<PaymentMethod>,
}

#[derive(Serialize)]
pub struct FundResponse {
    #[serde(flatten)]
    pub escrow: Escrow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

/// POST /escrows/:id/fund
pub async fn fund_escrow(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(escrow_id): Path<EscrowId>,
    body: Option<Json<FundRequest>>,
) -> CoreResult<Json<FundResponse>> {
    let method = body.and_then(|Json(b)| b.method);
    let outcome = state
        .engine
        .fund(escrow_id, auth.actor(), method.as_ref())
        .await?;
    Ok(Json(FundResponse {
        escrow: outcome.escrow,
        payment_reference: outcome.payment.map(|p| p.reference),
        redirect_url: outcome.redirect_url,
    }))
}

#[derive(Deserialize, Default)]
pub struct ReleaseRequest {
    /// Omitted = release everything remaining.
    pub amount: Option<Decimal>,
}

/// POST /escrows/:id/release
pub async fn release_funds(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(escrow_id): Path<EscrowId>,
    body: Option<Json<ReleaseRequest>>,
) -> CoreResult<Json<Escrow>> {
    let amount = body.and_then(|Json(b)| b.amount);
    let escrow = state
        .engine
        .release_funds(escrow_id, amount, auth.actor())
        .await?;
    Ok(Json(escrow))
}

#[derive(Deserialize)]
pub struct RefundRequest {
    pub reason: String,
}

/// POST /escrows/:id/refund
pub async fn refund_escrow(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(escrow_id): Path<EscrowId>,
    Json(body): Json<RefundRequest>,
) -> CoreResult<Json<Escrow>> {
    let escrow = state
        .engine
        .refund(escrow_id, auth.actor(), &body.reason)
        .await?;
    Ok(Json(escrow))
}

/// POST /escrows/:id/cancel
pub async fn cancel_escrow(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(escrow_id): Path<EscrowId>,
) -> CoreResult<Json<serde_json::Value>> {
    state.engine.cancel(escrow_id, auth.actor()).await?;
    Ok(Json(serde_json::json!({ "cancelled": true })))
}

/// POST /escrows/:id/milestones
pub async fn add_milestone(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(escrow_id): Path<EscrowId>,
    Json(body): Json<MilestoneSpec>,
) -> CoreResult<Json<Milestone>> {
    let milestone = state
        .engine
        .add_milestone(escrow_id, &body.title, body.amount, auth.actor())
        .await?;
    Ok(Json(milestone))
}

/// POST /escrows/:id/milestones/:mid/complete
pub async fn complete_milestone(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path((escrow_id, milestone_id)): Path<(EscrowId, MilestoneId)>,
) -> CoreResult<Json<Milestone>> {
    // The path escrow id is advisory; the milestone row is authoritative.
    let _ = load_escrow_for(&state, &auth, escrow_id).await?;
    let milestone = state
        .engine
        .complete_milestone(milestone_id, auth.actor())
        .await?;
    Ok(Json(milestone))
}

#[derive(Serialize)]
pub struct MilestoneReleaseResponse {
    pub escrow: Escrow,
    pub milestone: Milestone,
}

/// POST /escrows/:id/milestones/:mid/release
pub async fn release_milestone(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path((escrow_id, milestone_id)): Path<(EscrowId, MilestoneId)>,
) -> CoreResult<Json<MilestoneReleaseResponse>> {
    let _ = load_escrow_for(&state, &auth, escrow_id).await?;
    let (escrow, milestone) = state
        .engine
        .release_milestone(milestone_id, auth.actor())
        .await?;
    Ok(Json(MilestoneReleaseResponse { escrow, milestone }))
}
