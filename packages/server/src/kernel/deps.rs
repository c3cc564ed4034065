//! Server dependencies (using traits for testability)
//!
//! Central dependency container handed to the services and background jobs.
//! External providers sit behind the `Base*` traits so tests inject mocks
//! and production wires the real clients.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use momo::models::MomoTransaction;
use momo::{MomoClient, MomoNetwork, MomoOptions};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::domains::wallets::Ledger;
use crate::kernel::circuit_breaker::BreakerConfig;
use crate::kernel::gateway::GatewayRouter;
use crate::kernel::notifications::LoggingNotificationService;
use crate::kernel::paystack_client::PaystackClient;
use crate::kernel::traits::{BaseCardProcessor, BaseMomoClient, BaseNotificationService};

// =============================================================================
// MomoClient Adapter (implements BaseMomoClient trait)
// =============================================================================

/// Wrapper around the momo crate's client that implements BaseMomoClient
pub struct MomoAdapter(pub MomoClient);

impl MomoAdapter {
    pub fn new(client: MomoClient) -> Self {
        Self(client)
    }

    fn wire_amount(amount: Decimal) -> String {
        amount.round_dp(2).to_string()
    }
}

#[async_trait]
impl BaseMomoClient for MomoAdapter {
    fn network(&self) -> MomoNetwork {
        self.0.network()
    }

    async fn request_to_pay(
        &self,
        reference: Uuid,
        amount: Decimal,
        currency: &str,
        payer_msisdn: &str,
        note: &str,
    ) -> Result<()> {
        self.0
            .request_to_pay(
                reference,
                &Self::wire_amount(amount),
                currency,
                payer_msisdn,
                note,
            )
            .await
            .map_err(Into::into)
    }

    async fn transfer(
        &self,
        reference: Uuid,
        amount: Decimal,
        currency: &str,
        payee_msisdn: &str,
        note: &str,
    ) -> Result<()> {
        self.0
            .transfer(
                reference,
                &Self::wire_amount(amount),
                currency,
                payee_msisdn,
                note,
            )
            .await
            .map_err(Into::into)
    }

    async fn collection_status(&self, reference: Uuid) -> Result<MomoTransaction> {
        self.0.collection_status(reference).await.map_err(Into::into)
    }

    async fn disbursement_status(&self, reference: Uuid) -> Result<MomoTransaction> {
        self.0
            .disbursement_status(reference)
            .await
            .map_err(Into::into)
    }
}

// =============================================================================
// ServerDeps
// =============================================================================

/// Server dependencies accessible to services and scheduled jobs
#[derive(Clone)]
pub struct ServerDeps {
    pub db_pool: PgPool,
    pub ledger: Ledger,
    pub gateway: Arc<GatewayRouter>,
    pub notifier: Arc<dyn BaseNotificationService>,
}

impl ServerDeps {
    /// Production wiring: one momo client per network, the card processor,
    /// and a breaker per provider.
    pub fn from_config(config: &Config, db_pool: PgPool) -> Self {
        let breaker_config = BreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            cooldown: Duration::from_secs(config.breaker_cooldown_secs),
            call_timeout: Duration::from_secs(config.breaker_call_timeout_secs),
        };

        let momo_clients: Vec<Arc<dyn BaseMomoClient>> = [
            MomoNetwork::Mtn,
            MomoNetwork::Telecel,
            MomoNetwork::AirtelTigo,
        ]
        .into_iter()
        .map(|network| {
            Arc::new(MomoAdapter::new(MomoClient::new(MomoOptions {
                network,
                base_url: None,
                subscription_key: config.momo_subscription_key.clone(),
                api_user: config.momo_api_user.clone(),
                api_key: config.momo_api_key.clone(),
                target_environment: config.momo_target_environment.clone(),
            }))) as Arc<dyn BaseMomoClient>
        })
        .collect();

        let processor: Arc<dyn BaseCardProcessor> = Arc::new(PaystackClient::new(
            config.processor_secret_key.clone(),
            config.processor_base_url.clone(),
        ));

        Self {
            db_pool,
            ledger: Ledger::new(config.daily_outflow_limit),
            gateway: Arc::new(GatewayRouter::new(momo_clients, processor, breaker_config)),
            notifier: Arc::new(LoggingNotificationService),
        }
    }

    /// Test wiring with injected provider doubles.
    pub fn with_providers(
        db_pool: PgPool,
        ledger: Ledger,
        momo_clients: Vec<Arc<dyn BaseMomoClient>>,
        processor: Arc<dyn BaseCardProcessor>,
        breaker_config: BreakerConfig,
    ) -> Self {
        Self {
            db_pool,
            ledger,
            gateway: Arc::new(GatewayRouter::new(momo_clients, processor, breaker_config)),
            notifier: Arc::new(LoggingNotificationService),
        }
    }
}
