//! Provider webhook intake.
//!
//! One endpoint per provider name. The handler authenticates the shared
//! secret, persists the raw payload, and answers 200 immediately — no
//! payment state is touched here. Interpretation belongs to the
//! reconciliation loop, which can retry; a webhook response cannot.

use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::Value as JsonValue;

use crate::common::{CoreError, CoreResult};
use crate::domains::payments::models::WebhookEvent;
use crate::kernel::gateway::Provider;
use crate::server::app::AxumAppState;

const SECRET_HEADER: &str = "x-webhook-secret";

/// Best-effort reference extraction so operators can eyeball the backlog;
/// reconciliation re-parses the payload properly.
fn extract_reference(provider: Provider, payload: &JsonValue) -> Option<String> {
    match provider {
        Provider::MtnMomo | Provider::TelecelCash | Provider::AtMoney => payload
            .get("externalId")
            .and_then(|v| v.as_str())
            .map(String::from),
        Provider::Paystack => payload
            .get("data")
            .and_then(|d| d.get("reference"))
            .and_then(|v| v.as_str())
            .map(String::from),
    }
}

/// POST /webhooks/:provider
pub async fn receive_webhook(
    Extension(state): Extension<AxumAppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> CoreResult<(StatusCode, Json<JsonValue>)> {
    let provider: Provider = provider
        .parse()
        .map_err(|_| CoreError::NotFound("webhook provider"))?;

    let presented = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != state.webhook_shared_secret {
        return Err(CoreError::Forbidden("bad webhook secret".to_string()));
    }

    let reference = extract_reference(provider, &payload);
    let event = WebhookEvent::insert(
        &provider.to_string(),
        reference.as_deref(),
        &payload,
        &state.deps.db_pool,
    )
    .await?;

    tracing::info!(
        event_id = %event.id,
        provider = %provider,
        reference = reference.as_deref().unwrap_or("-"),
        "webhook received"
    );
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "received": true })),
    ))
}
