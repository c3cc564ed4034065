//! Test fixtures for creating test data.
//!
//! Fixtures use the model and service methods directly, the same paths
//! production takes.

use anyhow::Result;
use rust_decimal::Decimal;
use uuid::Uuid;

use payments_core::common::{Actor, Role, UserId};
use payments_core::domains::wallets::models::{TxType, Wallet};
use payments_core::domains::wallets::TxSpec;

use super::TestCtx;

/// A funded test identity: user id plus their wallet.
pub struct TestUser {
    pub user_id: UserId,
    pub wallet: Wallet,
}

impl TestUser {
    pub fn actor(&self, role: Role) -> Actor {
        Actor::new(self.user_id, role)
    }
}

/// Create a user wallet and optionally seed it with spendable balance.
pub async fn create_user_with_balance(ctx: &TestCtx, balance: Decimal) -> Result<TestUser> {
    let user_id = UserId::new();
    let wallet = Wallet::create(user_id, "GHS", &ctx.pool).await?;
    if balance > Decimal::ZERO {
        ctx.ledger
            .credit(
                wallet.id,
                balance,
                TxSpec::new(TxType::Deposit, format!("seed-{}", Uuid::new_v4())),
                &ctx.pool,
            )
            .await?;
    }
    let wallet = Wallet::find_by_id(wallet.id, &ctx.pool).await?;
    Ok(TestUser { user_id, wallet })
}

pub async fn reload_wallet(ctx: &TestCtx, user: &TestUser) -> Result<Wallet> {
    Ok(Wallet::find_by_id(user.wallet.id, &ctx.pool).await?)
}
