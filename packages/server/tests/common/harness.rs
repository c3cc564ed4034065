//! Test harness with testcontainers for integration testing.
//!
//! One Postgres container is started for the whole test run; migrations run
//! once. Tests isolate by creating their own users/wallets/escrows, so they
//! can share the database freely.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

use momo::MomoNetwork;
use payments_core::domains::disputes::DisputeWorkflow;
use payments_core::domains::escrows::EscrowEngine;
use payments_core::domains::wallets::Ledger;
use payments_core::kernel::circuit_breaker::BreakerConfig;
use payments_core::kernel::deps::ServerDeps;
use payments_core::kernel::test_support::{MockCardProcessor, MockMomoClient};
use payments_core::kernel::traits::{BaseCardProcessor, BaseMomoClient};

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

/// Global shared infrastructure - initialized once, reused by all tests.
static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }
}

/// Per-test context: a pool plus fully-wired services with mock providers.
pub struct TestCtx {
    pub pool: PgPool,
    pub deps: Arc<ServerDeps>,
    pub engine: Arc<EscrowEngine>,
    pub disputes: Arc<DisputeWorkflow>,
    pub ledger: Ledger,
    pub mtn: Arc<MockMomoClient>,
    pub processor: Arc<MockCardProcessor>,
}

/// Default daily outflow cap used across tests.
pub fn test_daily_limit() -> Decimal {
    Decimal::from(5000)
}

pub async fn setup() -> TestCtx {
    let infra = SHARED_INFRA
        .get_or_init(|| async { SharedTestInfra::init().await.expect("test infra") })
        .await;

    let pool = PgPool::connect(&infra.db_url).await.expect("connect");

    let mtn = Arc::new(MockMomoClient::new(MomoNetwork::Mtn));
    let telecel = Arc::new(MockMomoClient::new(MomoNetwork::Telecel));
    let processor = Arc::new(MockCardProcessor::new());
    let ledger = Ledger::new(test_daily_limit());

    let deps = Arc::new(ServerDeps::with_providers(
        pool.clone(),
        ledger.clone(),
        vec![
            mtn.clone() as Arc<dyn BaseMomoClient>,
            telecel as Arc<dyn BaseMomoClient>,
        ],
        processor.clone() as Arc<dyn BaseCardProcessor>,
        BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            call_timeout: Duration::from_secs(5),
        },
    ));
    let engine = Arc::new(EscrowEngine::new(deps.clone()));
    let disputes = Arc::new(DisputeWorkflow::new(deps.clone(), engine.clone()));

    TestCtx {
        pool,
        deps,
        engine,
        disputes,
        ledger,
        mtn,
        processor,
    }
}
