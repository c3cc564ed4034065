//! The wallet ledger.
//!
//! Every balance-affecting operation in the system lands here. Each operation
//! is a single atomic unit: a conditional UPDATE on the wallet row plus
//! exactly one transaction row, inside one database transaction. The wallet
//! row is the serialization point — a concurrent writer that loses the race
//! observes zero rows affected and gets a typed error, never a corrupt
//! balance. This module performs no network I/O.

use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use std::str::FromStr;

use crate::common::{CoreError, CoreResult, DisputeId, EscrowId, PaymentId, WalletId};
use crate::domains::wallets::models::{
    transaction::NewTransaction, Transaction, TxStatus, TxType, Wallet, WalletStatus,
};

/// What to record in the ledger for an operation.
#[derive(Debug, Clone)]
pub struct TxSpec {
    pub tx_type: TxType,
    pub reference: String,
    pub escrow_id: Option<EscrowId>,
    pub dispute_id: Option<DisputeId>,
    pub payment_id: Option<PaymentId>,
    pub note: Option<String>,
}

impl TxSpec {
    pub fn new(tx_type: TxType, reference: impl Into<String>) -> Self {
        Self {
            tx_type,
            reference: reference.into(),
            escrow_id: None,
            dispute_id: None,
            payment_id: None,
            note: None,
        }
    }

    pub fn escrow(mut self, escrow_id: EscrowId) -> Self {
        self.escrow_id = Some(escrow_id);
        self
    }

    pub fn dispute(mut self, dispute_id: DisputeId) -> Self {
        self.dispute_id = Some(dispute_id);
        self
    }

    pub fn payment(mut self, payment_id: PaymentId) -> Self {
        self.payment_id = Some(payment_id);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Ledger {
    daily_outflow_limit: Decimal,
}

impl Ledger {
    pub fn new(daily_outflow_limit: Decimal) -> Self {
        Self {
            daily_outflow_limit,
        }
    }

    fn ensure_positive(amount: Decimal) -> CoreResult<()> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::validation("amount must be positive"));
        }
        Ok(())
    }

    async fn load_wallet(wallet_id: WalletId, conn: &mut PgConnection) -> CoreResult<Wallet> {
        match Wallet::find_by_id_in(wallet_id, conn).await {
            Ok(wallet) => Ok(wallet),
            Err(sqlx::Error::RowNotFound) => Err(CoreError::NotFound("wallet")),
            Err(e) => Err(CoreError::Database(e)),
        }
    }

    /// Works out why a conditional debit-side update affected zero rows.
    /// `check_limit` is set only for withdrawals, whose predicate includes
    /// the daily outflow cap.
    async fn classify_rejection(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        check_limit: bool,
        conn: &mut PgConnection,
    ) -> CoreError {
        let wallet = match Wallet::find_by_id_in(wallet_id, conn).await {
            Ok(w) => w,
            Err(sqlx::Error::RowNotFound) => return CoreError::NotFound("wallet"),
            Err(e) => return CoreError::Database(e),
        };
        match WalletStatus::from_str(&wallet.status) {
            Ok(WalletStatus::Active) => {}
            _ => {
                return CoreError::WalletUnavailable {
                    status: wallet.status,
                }
            }
        }
        if wallet.balance < amount {
            return CoreError::InsufficientFunds {
                available: wallet.balance,
                requested: amount,
            };
        }
        if check_limit {
            let spent_today = if wallet.daily_out_date == chrono::Utc::now().date_naive() {
                wallet.daily_out_total
            } else {
                Decimal::ZERO
            };
            if spent_today + amount > self.daily_outflow_limit {
                return CoreError::LimitExceeded;
            }
        }
        CoreError::Conflict("wallet update lost a concurrent race".to_string())
    }

    async fn record(
        &self,
        wallet_id: WalletId,
        counterparty: Option<WalletId>,
        amount: Decimal,
        status: TxStatus,
        spec: TxSpec,
        currency: &str,
        conn: &mut PgConnection,
    ) -> CoreResult<Transaction> {
        let tx = Transaction::insert(
            NewTransaction {
                wallet_id,
                counterparty_wallet_id: counterparty,
                tx_type: spec.tx_type,
                amount,
                currency: currency.to_string(),
                status,
                reference: spec.reference,
                escrow_id: spec.escrow_id,
                dispute_id: spec.dispute_id,
                payment_id: spec.payment_id,
                note: spec.note,
            },
            conn,
        )
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                CoreError::Conflict("duplicate transaction reference".to_string())
            }
            _ => CoreError::Database(e),
        })?;
        Ok(tx)
    }

    // =========================================================================
    // In-transaction operations. The caller owns the database transaction;
    // these compose into larger atomic units (escrow release, reconciliation).
    // =========================================================================

    /// Move spendable balance into the wallet's reserved escrow amount.
    pub async fn reserve_in(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        spec: TxSpec,
        conn: &mut PgConnection,
    ) -> CoreResult<Transaction> {
        Self::ensure_positive(amount)?;
        let wallet = Self::load_wallet(wallet_id, conn).await?;
        if Wallet::try_reserve(wallet_id, amount, conn).await? == 0 {
            return Err(self.classify_rejection(wallet_id, amount, false, conn).await);
        }
        self.record(
            wallet_id,
            None,
            amount,
            TxStatus::Completed,
            spec,
            &wallet.currency,
            conn,
        )
        .await
    }

    /// Reverse a reservation: escrow amount returns to spendable balance.
    pub async fn release_reservation_in(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        spec: TxSpec,
        conn: &mut PgConnection,
    ) -> CoreResult<Transaction> {
        Self::ensure_positive(amount)?;
        let wallet = Self::load_wallet(wallet_id, conn).await?;
        if Wallet::try_release_reservation(wallet_id, amount, conn).await? == 0 {
            return Err(CoreError::Conflict(
                "reserved amount is smaller than requested".to_string(),
            ));
        }
        self.record(
            wallet_id,
            None,
            amount,
            TxStatus::Completed,
            spec,
            &wallet.currency,
            conn,
        )
        .await
    }

    pub async fn credit_in(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        spec: TxSpec,
        conn: &mut PgConnection,
    ) -> CoreResult<Transaction> {
        Self::ensure_positive(amount)?;
        let wallet = Self::load_wallet(wallet_id, conn).await?;
        if Wallet::try_credit(wallet_id, amount, conn).await? == 0 {
            return Err(CoreError::NotFound("wallet"));
        }
        self.record(
            wallet_id,
            None,
            amount,
            TxStatus::Completed,
            spec,
            &wallet.currency,
            conn,
        )
        .await
    }

    pub async fn debit_in(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        spec: TxSpec,
        conn: &mut PgConnection,
    ) -> CoreResult<Transaction> {
        Self::ensure_positive(amount)?;
        let wallet = Self::load_wallet(wallet_id, conn).await?;
        if Wallet::try_debit(wallet_id, amount, conn).await? == 0 {
            return Err(self.classify_rejection(wallet_id, amount, false, conn).await);
        }
        self.record(
            wallet_id,
            None,
            amount,
            TxStatus::Completed,
            spec,
            &wallet.currency,
            conn,
        )
        .await
    }

    /// Spendable-to-spendable move between two wallets; one ledger row on the
    /// receiving side with the source as counterparty.
    pub async fn transfer_in(
        &self,
        from: WalletId,
        to: WalletId,
        amount: Decimal,
        spec: TxSpec,
        conn: &mut PgConnection,
    ) -> CoreResult<Transaction> {
        Self::ensure_positive(amount)?;
        if from == to {
            return Err(CoreError::validation("cannot transfer to the same wallet"));
        }
        let receiving = Self::load_wallet(to, conn).await?;
        if Wallet::try_debit(from, amount, conn).await? == 0 {
            return Err(self.classify_rejection(from, amount, false, conn).await);
        }
        if Wallet::try_credit(to, amount, conn).await? == 0 {
            return Err(CoreError::NotFound("wallet"));
        }
        self.record(
            to,
            Some(from),
            amount,
            TxStatus::Completed,
            spec,
            &receiving.currency,
            conn,
        )
        .await
    }

    /// Move money held in `from`'s escrow reservation into `to`'s spendable
    /// balance (escrow release for wallet-funded escrows).
    pub async fn settle_transfer_in(
        &self,
        from: WalletId,
        to: WalletId,
        amount: Decimal,
        spec: TxSpec,
        conn: &mut PgConnection,
    ) -> CoreResult<Transaction> {
        Self::ensure_positive(amount)?;
        let receiving = Self::load_wallet(to, conn).await?;
        if Wallet::try_settle_reservation(from, amount, conn).await? == 0 {
            return Err(CoreError::Conflict(
                "reserved amount is smaller than requested".to_string(),
            ));
        }
        if Wallet::try_credit(to, amount, conn).await? == 0 {
            return Err(CoreError::NotFound("wallet"));
        }
        self.record(
            to,
            Some(from),
            amount,
            TxStatus::Completed,
            spec,
            &receiving.currency,
            conn,
        )
        .await
    }

    /// Atomically move balance into pending withdrawal and open a
    /// 'processing' ledger row; the payout is confirmed or compensated later
    /// by reconciliation.
    pub async fn start_withdrawal_in(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        spec: TxSpec,
        conn: &mut PgConnection,
    ) -> CoreResult<Transaction> {
        Self::ensure_positive(amount)?;
        let wallet = Self::load_wallet(wallet_id, conn).await?;
        if Wallet::try_start_withdrawal(wallet_id, amount, self.daily_outflow_limit, conn).await?
            == 0
        {
            return Err(self.classify_rejection(wallet_id, amount, true, conn).await);
        }
        self.record(
            wallet_id,
            None,
            amount,
            TxStatus::Processing,
            spec,
            &wallet.currency,
            conn,
        )
        .await
    }

    /// Provider confirmed the payout: drop the pending amount and complete
    /// the withdrawal row. No-op when the row was already completed.
    pub async fn finish_withdrawal_in(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        tx_id: crate::common::TransactionId,
        conn: &mut PgConnection,
    ) -> CoreResult<bool> {
        if Transaction::try_complete(tx_id, conn).await? == 0 {
            return Ok(false);
        }
        if Wallet::try_finish_withdrawal(wallet_id, amount, conn).await? == 0 {
            return Err(CoreError::Conflict(
                "pending withdrawals smaller than payout amount".to_string(),
            ));
        }
        Ok(true)
    }

    /// Provider rejected the payout: money returns to spendable balance and
    /// the withdrawal row is marked failed. No-op when already settled.
    pub async fn cancel_withdrawal_in(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        tx_id: crate::common::TransactionId,
        reason: &str,
        conn: &mut PgConnection,
    ) -> CoreResult<bool> {
        if Transaction::try_fail(tx_id, reason, conn).await? == 0 {
            return Ok(false);
        }
        if Wallet::try_cancel_withdrawal(wallet_id, amount, conn).await? == 0 {
            return Err(CoreError::Conflict(
                "pending withdrawals smaller than payout amount".to_string(),
            ));
        }
        Ok(true)
    }


    // =========================================================================
    // Pool-level wrappers: one operation, one database transaction.
    // =========================================================================

    pub async fn credit(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        spec: TxSpec,
        pool: &PgPool,
    ) -> CoreResult<Transaction> {
        let mut db_tx = pool.begin().await?;
        let tx = self.credit_in(wallet_id, amount, spec, &mut db_tx).await?;
        db_tx.commit().await?;
        Ok(tx)
    }

    pub async fn debit(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        spec: TxSpec,
        pool: &PgPool,
    ) -> CoreResult<Transaction> {
        let mut db_tx = pool.begin().await?;
        let tx = self.debit_in(wallet_id, amount, spec, &mut db_tx).await?;
        db_tx.commit().await?;
        Ok(tx)
    }

    pub async fn transfer(
        &self,
        from: WalletId,
        to: WalletId,
        amount: Decimal,
        spec: TxSpec,
        pool: &PgPool,
    ) -> CoreResult<Transaction> {
        let mut db_tx = pool.begin().await?;
        let tx = self.transfer_in(from, to, amount, spec, &mut db_tx).await?;
        db_tx.commit().await?;
        Ok(tx)
    }

    pub async fn start_withdrawal(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        spec: TxSpec,
        pool: &PgPool,
    ) -> CoreResult<Transaction> {
        let mut db_tx = pool.begin().await?;
        let tx = self
            .start_withdrawal_in(wallet_id, amount, spec, &mut db_tx)
            .await?;
        db_tx.commit().await?;
        Ok(tx)
    }

    pub async fn cancel_withdrawal(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        tx_id: crate::common::TransactionId,
        reason: &str,
        pool: &PgPool,
    ) -> CoreResult<bool> {
        let mut db_tx = pool.begin().await?;
        let reverted = self
            .cancel_withdrawal_in(wallet_id, amount, tx_id, reason, &mut db_tx)
            .await?;
        db_tx.commit().await?;
        Ok(reverted)
    }
}
