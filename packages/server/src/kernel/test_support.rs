// Mock provider implementations for testing
//
// Programmable doubles for the Base* infrastructure traits. Used by unit
// tests here and by the integration tests under tests/.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use momo::models::{MomoStatus, MomoTransaction};
use momo::MomoNetwork;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::traits::{
    BaseCardProcessor, BaseMomoClient, ProcessorCharge, ProcessorTransaction,
};

// =============================================================================
// Mock momo client
// =============================================================================

pub struct MockMomoClient {
    network: MomoNetwork,
    /// When set, initiation calls fail with this message.
    fail_with: Arc<Mutex<Option<String>>>,
    /// Status returned by status lookups.
    status: Arc<Mutex<MomoStatus>>,
    pub collect_calls: Arc<Mutex<Vec<(Uuid, Decimal, String)>>>,
    pub transfer_calls: Arc<Mutex<Vec<(Uuid, Decimal, String)>>>,
}

impl MockMomoClient {
    pub fn new(network: MomoNetwork) -> Self {
        Self {
            network,
            fail_with: Arc::new(Mutex::new(None)),
            status: Arc::new(Mutex::new(MomoStatus::Successful)),
            collect_calls: Arc::new(Mutex::new(Vec::new())),
            transfer_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(self, message: &str) -> Self {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn with_status(self, status: MomoStatus) -> Self {
        *self.status.lock().unwrap() = status;
        self
    }

    pub fn set_status(&self, status: MomoStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn check_failure(&self) -> Result<()> {
        if let Some(message) = self.fail_with.lock().unwrap().as_ref() {
            return Err(anyhow!("{message}"));
        }
        Ok(())
    }

    fn transaction(&self, reference: Uuid) -> MomoTransaction {
        let status = *self.status.lock().unwrap();
        MomoTransaction {
            amount: "0".to_string(),
            currency: "GHS".to_string(),
            external_id: reference.to_string(),
            status,
            reason: matches!(status, MomoStatus::Failed)
                .then(|| "PAYER_NOT_FOUND".to_string()),
            financial_transaction_id: Some("mock-ft-id".to_string()),
        }
    }
}

#[async_trait]
impl BaseMomoClient for MockMomoClient {
    fn network(&self) -> MomoNetwork {
        self.network
    }

    async fn request_to_pay(
        &self,
        reference: Uuid,
        amount: Decimal,
        _currency: &str,
        payer_msisdn: &str,
        _note: &str,
    ) -> Result<()> {
        self.check_failure()?;
        self.collect_calls
            .lock()
            .unwrap()
            .push((reference, amount, payer_msisdn.to_string()));
        Ok(())
    }

    async fn transfer(
        &self,
        reference: Uuid,
        amount: Decimal,
        _currency: &str,
        payee_msisdn: &str,
        _note: &str,
    ) -> Result<()> {
        self.check_failure()?;
        self.transfer_calls
            .lock()
            .unwrap()
            .push((reference, amount, payee_msisdn.to_string()));
        Ok(())
    }

    async fn collection_status(&self, reference: Uuid) -> Result<MomoTransaction> {
        self.check_failure()?;
        Ok(self.transaction(reference))
    }

    async fn disbursement_status(&self, reference: Uuid) -> Result<MomoTransaction> {
        self.check_failure()?;
        Ok(self.transaction(reference))
    }
}

// =============================================================================
// Mock card processor
// =============================================================================

pub struct MockCardProcessor {
    fail_with: Arc<Mutex<Option<String>>>,
    status: Arc<Mutex<String>>,
    pub charge_calls: Arc<Mutex<Vec<(Uuid, Decimal)>>>,
    pub transfer_calls: Arc<Mutex<Vec<(Uuid, Decimal)>>>,
}

impl MockCardProcessor {
    pub fn new() -> Self {
        Self {
            fail_with: Arc::new(Mutex::new(None)),
            status: Arc::new(Mutex::new("success".to_string())),
            charge_calls: Arc::new(Mutex::new(Vec::new())),
            transfer_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(self, message: &str) -> Self {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn with_status(self, status: &str) -> Self {
        *self.status.lock().unwrap() = status.to_string();
        self
    }

    fn check_failure(&self) -> Result<()> {
        if let Some(message) = self.fail_with.lock().unwrap().as_ref() {
            return Err(anyhow!("{message}"));
        }
        Ok(())
    }
}

impl Default for MockCardProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseCardProcessor for MockCardProcessor {
    async fn initialize_charge(
        &self,
        reference: Uuid,
        amount: Decimal,
        _currency: &str,
        _customer_email: &str,
    ) -> Result<ProcessorCharge> {
        self.check_failure()?;
        self.charge_calls.lock().unwrap().push((reference, amount));
        Ok(ProcessorCharge {
            status: "pending".to_string(),
            authorization_url: Some(format!("https://checkout.test/{reference}")),
        })
    }

    async fn create_transfer(
        &self,
        reference: Uuid,
        amount: Decimal,
        _currency: &str,
        _recipient_code: &str,
        _note: &str,
    ) -> Result<()> {
        self.check_failure()?;
        self.transfer_calls.lock().unwrap().push((reference, amount));
        Ok(())
    }

    async fn verify(&self, _reference: Uuid) -> Result<ProcessorTransaction> {
        self.check_failure()?;
        Ok(ProcessorTransaction {
            status: self.status.lock().unwrap().clone(),
            amount_minor: 0,
            currency: "GHS".to_string(),
            failure_reason: None,
        })
    }
}
