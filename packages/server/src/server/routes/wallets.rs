//! Wallet endpoints: balance, statement, deposit in, withdraw out.
//!
//! Deposits and withdrawals are the two places external money meets the
//! ledger. A deposit credits the wallet only once the provider confirms the
//! collection (webhook, sweep, or the verify endpoint). A withdrawal debits
//! atomically up front and is confirmed or compensated by reconciliation.

use axum::extract::{Extension, Path, Query};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::{CoreError, CoreResult};
use crate::domains::payments::models::{NewPayment, Payment};
use crate::domains::payments::reconciliation;
use crate::domains::wallets::models::{Transaction, TxType, Wallet};
use crate::domains::wallets::TxSpec;
use crate::kernel::gateway::{GatewayStatus, PaymentDirection, PaymentMethod};
use crate::server::app::AxumAppState;
use crate::server::middleware::AuthUser;

#[derive(Serialize)]
pub struct WalletResponse {
    pub id: crate::common::WalletId,
    pub currency: String,
    pub balance: Decimal,
    pub escrow_amount: Decimal,
    pub pending_withdrawals: Decimal,
    pub status: String,
}

impl From<Wallet> for WalletResponse {
    fn from(w: Wallet) -> Self {
        Self {
            id: w.id,
            currency: w.currency,
            balance: w.balance,
            escrow_amount: w.escrow_amount,
            pending_withdrawals: w.pending_withdrawals,
            status: w.status,
        }
    }
}

async fn my_wallet(state: &AxumAppState, auth: &AuthUser) -> CoreResult<Wallet> {
    // Wallets are created on first use.
    Ok(Wallet::create(auth.user_id, "GHS", &state.deps.db_pool).await?)
}

/// GET /wallets/me
pub async fn get_wallet(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
) -> CoreResult<Json<WalletResponse>> {
    let wallet = my_wallet(&state, &auth).await?;
    Ok(Json(wallet.into()))
}

#[derive(Deserialize)]
pub struct StatementParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /wallets/me/transactions
pub async fn list_transactions(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Query(params): Query<StatementParams>,
) -> CoreResult<Json<Vec<Transaction>>> {
    let wallet = my_wallet(&state, &auth).await?;
    let limit = params.limit.clamp(1, 200);
    let transactions =
        Transaction::list_for_wallet(wallet.id, limit, params.offset.max(0), &state.deps.db_pool)
            .await?;
    Ok(Json(transactions))
}

#[derive(Deserialize)]
pub struct DepositRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
}

#[derive(Serialize)]
pub struct DepositResponse {
    pub reference: String,
    pub status: GatewayStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

/// POST /wallets/me/deposit
///
/// Initiates an external collection into the wallet. The balance moves when
/// the provider confirms, never here.
pub async fn deposit(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Json(body): Json<DepositRequest>,
) -> CoreResult<Json<DepositResponse>> {
    let wallet = my_wallet(&state, &auth).await?;
    let reference = Uuid::new_v4();

    let initiated = state
        .deps
        .gateway
        .initiate_collection(
            &body.method,
            body.amount,
            &wallet.currency,
            reference,
            "wallet deposit",
        )
        .await?;

    let mut db_tx = state.deps.db_pool.begin().await?;
    let payment = Payment::insert(
        NewPayment {
            direction: PaymentDirection::Collection,
            provider: initiated.provider,
            channel: body.method.channel(),
            amount: body.amount,
            currency: wallet.currency.clone(),
            status: initiated.status,
            reference,
            escrow_id: None,
            wallet_id: Some(wallet.id),
            transaction_id: None,
            payer_ref: Some(initiated.counterparty_ref.clone()),
            payee_ref: None,
        },
        &mut db_tx,
    )
    .await?;
    db_tx.commit().await?;

    // A synchronously-completed collection (rare) can settle right away.
    if initiated.status == GatewayStatus::Completed {
        reconciliation::settle_payment(
            &state.deps,
            &state.engine,
            &payment,
            GatewayStatus::Completed,
            None,
            None,
        )
        .await?;
    }

    Ok(Json(DepositResponse {
        reference: reference.to_string(),
        status: initiated.status,
        redirect_url: initiated.redirect_url,
    }))
}

/// POST /wallets/me/deposit/:reference/verify
///
/// Synchronous re-check of a deposit's provider status; credits the wallet
/// when the provider reports the collection complete.
pub async fn verify_deposit(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Path(reference): Path<String>,
) -> CoreResult<Json<DepositResponse>> {
    let wallet = my_wallet(&state, &auth).await?;
    let payment = Payment::find_by_reference(&reference, &state.deps.db_pool)
        .await?
        .ok_or(CoreError::NotFound("payment"))?;
    if payment.wallet_id != Some(wallet.id) {
        return Err(CoreError::Forbidden(
            "payment belongs to another wallet".to_string(),
        ));
    }

    let status = if payment.status_enum().is_terminal() {
        payment.status_enum()
    } else {
        let provider = payment
            .provider_enum()
            .ok_or_else(|| CoreError::validation("payment has an unknown provider"))?;
        let reference_uuid = payment
            .reference_uuid()
            .ok_or_else(|| CoreError::validation("malformed payment reference"))?;
        let status = state
            .deps
            .gateway
            .check_status(provider, payment.direction_enum(), reference_uuid)
            .await?;
        reconciliation::settle_payment(&state.deps, &state.engine, &payment, status, None, None)
            .await?;
        status
    };

    Ok(Json(DepositResponse {
        reference,
        status,
        redirect_url: None,
    }))
}

#[derive(Deserialize)]
pub struct WithdrawRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
}

#[derive(Serialize)]
pub struct WithdrawResponse {
    pub reference: String,
    pub status: GatewayStatus,
    pub wallet: WalletResponse,
}

/// POST /wallets/me/withdraw
///
/// Atomic balance check + deduct, then the payout is initiated. If the
/// provider rejects the initiation outright the debit is compensated before
/// the caller sees the error; an accepted payout settles via reconciliation.
pub async fn withdraw(
    Extension(state): Extension<AxumAppState>,
    auth: AuthUser,
    Json(body): Json<WithdrawRequest>,
) -> CoreResult<Json<WithdrawResponse>> {
    let wallet = my_wallet(&state, &auth).await?;
    let reference = Uuid::new_v4();

    // Money leaves the spendable balance first; the row-level predicate
    // serializes concurrent withdrawals.
    let tx = state
        .deps
        .ledger
        .start_withdrawal(
            wallet.id,
            body.amount,
            TxSpec::new(TxType::Withdrawal, format!("withdrawal-{reference}")),
            &state.deps.db_pool,
        )
        .await?;

    let (provider, status, payee_ref) = match state
        .deps
        .gateway
        .initiate_disbursement(
            &body.method,
            body.amount,
            &wallet.currency,
            reference,
            "wallet withdrawal",
        )
        .await
    {
        Ok(initiated) => (
            initiated.provider,
            initiated.status,
            Some(initiated.counterparty_ref),
        ),
        // A timed-out initiation may still have landed provider-side. The
        // debit stays, the payment row stays pending, and reconciliation
        // settles it either way. Never assume a timeout means "didn't
        // happen".
        Err(CoreError::ProviderTimeout { provider }) => {
            tracing::warn!(reference = %reference, provider, "payout initiation timed out");
            (
                state.deps.gateway.provider_for(&body.method)?,
                GatewayStatus::Pending,
                None,
            )
        }
        Err(e) => {
            // Initiation definitely did not happen (validation, breaker
            // open) or was rejected outright: give the money back.
            state
                .deps
                .ledger
                .cancel_withdrawal(
                    wallet.id,
                    body.amount,
                    tx.id,
                    &format!("payout initiation failed: {}", e.code()),
                    &state.deps.db_pool,
                )
                .await?;
            return Err(e);
        }
    };

    let mut db_tx = state.deps.db_pool.begin().await?;
    Payment::insert(
        NewPayment {
            direction: PaymentDirection::Disbursement,
            provider,
            channel: body.method.channel(),
            amount: body.amount,
            currency: wallet.currency.clone(),
            status,
            reference,
            escrow_id: None,
            wallet_id: Some(wallet.id),
            transaction_id: Some(tx.id),
            payer_ref: None,
            payee_ref,
        },
        &mut db_tx,
    )
    .await?;
    db_tx.commit().await?;

    let wallet = Wallet::find_by_id(wallet.id, &state.deps.db_pool).await?;
    Ok(Json(WithdrawResponse {
        reference: reference.to_string(),
        status,
        wallet: wallet.into(),
    }))
}
