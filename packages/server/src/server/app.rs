//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::domains::disputes::DisputeWorkflow;
use crate::domains::escrows::EscrowEngine;
use crate::kernel::deps::ServerDeps;
use crate::server::auth::JwtService;
use crate::server::middleware::jwt_auth_middleware;
use crate::server::routes::{admin, disputes, escrows, health, wallets, webhooks};

/// Shared application state
#[derive(Clone)]
pub struct AxumAppState {
    pub deps: Arc<ServerDeps>,
    pub engine: Arc<EscrowEngine>,
    pub disputes: Arc<DisputeWorkflow>,
    pub jwt_service: Arc<JwtService>,
    pub webhook_shared_secret: String,
}

impl AxumAppState {
    pub fn new(deps: Arc<ServerDeps>, jwt_service: Arc<JwtService>, webhook_secret: &str) -> Self {
        let engine = Arc::new(EscrowEngine::new(deps.clone()));
        let disputes = Arc::new(DisputeWorkflow::new(deps.clone(), engine.clone()));
        Self {
            deps,
            engine,
            disputes,
            jwt_service,
            webhook_shared_secret: webhook_secret.to_string(),
        }
    }
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}

/// Build the Axum application router
///
/// Returns (Router, AxumAppState) - the state is also needed to start the
/// scheduled tasks.
pub fn build_app(config: &Config, pool: PgPool) -> (Router, AxumAppState) {
    let deps = Arc::new(ServerDeps::from_config(config, pool));
    let jwt_service = Arc::new(JwtService::new(&config.jwt_secret, config.jwt_issuer.clone()));
    let state = AxumAppState::new(deps, jwt_service.clone(), &config.webhook_shared_secret);

    let app = Router::new()
        // Health
        .route("/health", get(health::health_handler))
        // Wallet API
        .route("/wallets/me", get(wallets::get_wallet))
        .route("/wallets/me/transactions", get(wallets::list_transactions))
        .route("/wallets/me/deposit", post(wallets::deposit))
        .route(
            "/wallets/me/deposit/:reference/verify",
            post(wallets::verify_deposit),
        )
        .route("/wallets/me/withdraw", post(wallets::withdraw))
        // Escrow API
        .route("/escrows", post(escrows::create_escrow))
        .route("/escrows/:id", get(escrows::get_escrow))
        .route("/escrows/:id/fund", post(escrows::fund_escrow))
        .route("/escrows/:id/release", post(escrows::release_funds))
        .route("/escrows/:id/refund", post(escrows::refund_escrow))
        .route("/escrows/:id/cancel", post(escrows::cancel_escrow))
        .route("/escrows/:id/milestones", post(escrows::add_milestone))
        .route(
            "/escrows/:id/milestones/:mid/complete",
            post(escrows::complete_milestone),
        )
        .route(
            "/escrows/:id/milestones/:mid/release",
            post(escrows::release_milestone),
        )
        // Dispute API
        .route("/disputes", post(disputes::open_dispute))
        .route("/disputes/:id", get(disputes::get_dispute))
        .route("/disputes/:id/review", post(disputes::accept_for_review))
        .route("/disputes/:id/escalate", post(disputes::escalate_dispute))
        .route("/disputes/:id/resolve", post(disputes::resolve_dispute))
        .route("/disputes/:id/cancel", post(disputes::cancel_dispute))
        .route("/disputes/:id/evidence", post(disputes::add_evidence))
        // Provider webhooks (authenticated by shared secret, not JWT)
        .route("/webhooks/:provider", post(webhooks::receive_webhook))
        // Operator endpoints
        .route("/admin/reconcile", post(admin::trigger_reconcile))
        .route("/admin/webhook-events", get(admin::list_webhook_events))
        .route("/admin/escrows/:id/archive", post(admin::archive_escrow))
        // Middleware (inner-to-outer: auth runs after tracing)
        .layer(middleware::from_fn(move |request, next| {
            jwt_auth_middleware(jwt_service.clone(), request, next)
        }))
        .layer(Extension(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(&config.allowed_origins));

    (app, state)
}
