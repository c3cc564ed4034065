//! Operator endpoints: reconciliation trigger and webhook backlog view.

use axum::extract::{Extension, Path, Query};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::common::{CoreError, CoreResult, EscrowId, Role};
use crate::domains::escrows::models::Escrow;
use crate::domains::payments::models::WebhookEvent;
use crate::domains::payments::reconciliation::{self, ReconcileReport};
use crate::server::app::AxumAppState;
use crate::server::middleware::AuthUser;

fn require_admin(auth: &AuthUser) -> CoreResult<()> {
    if auth.role != Role::Admin {
        return Err(CoreError::Forbidden("admin only".to_string()));
    }
    Ok(())
}

#[derive(Deserialize, Default)]
pub struct ReconcileParams {
    /// Defaults to 7 days back.
    pub since: Option<DateTime<Utc>>,
    /// Defaults to 200, capped at 1000.
    pub limit: Option<i64>,
}

/// POST /admin/reconcile
pub async fn trigger_reconcile(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    params: Option<Json<ReconcileParams>>,
) -> CoreResult<Json<ReconcileReport>> {
    require_admin(&auth)?;
    let params = params.map(|Json(p)| p).unwrap_or_default();
    let since = params.since.unwrap_or_else(|| Utc::now() - Duration::days(7));
    let limit = params.limit.unwrap_or(200).clamp(1, 1000);

    let report = reconciliation::reconcile(&state.deps, &state.engine, since, limit).await?;
    Ok(Json(report))
}

#[derive(Deserialize, Default)]
pub struct BacklogParams {
    #[serde(default)]
    pub include_processed: bool,
    pub limit: Option<i64>,
}

/// POST /admin/escrows/:id/archive
///
/// Soft-delete a terminal escrow. Rejected while the escrow still holds or
/// owes money.
pub async fn archive_escrow(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(escrow_id): Path<EscrowId>,
) -> CoreResult<Json<serde_json::Value>> {
    require_admin(&auth)?;
    let archived = Escrow::archive(escrow_id, &state.deps.db_pool).await?;
    if archived == 0 {
        return Err(CoreError::Conflict(
            "escrow is not in a terminal state".to_string(),
        ));
    }
    Ok(Json(serde_json::json!({ "archived": true })))
}

/// GET /admin/webhook-events
pub async fn list_webhook_events(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Query(params): Query<BacklogParams>,
) -> CoreResult<Json<Vec<WebhookEvent>>> {
    require_admin(&auth)?;
    let limit = params.limit.unwrap_or(100).clamp(1, 500);
    let events =
        WebhookEvent::list_recent(params.include_processed, limit, &state.deps.db_pool).await?;
    Ok(Json(events))
}
