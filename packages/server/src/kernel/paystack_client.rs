//! Card/bank processor client (Paystack-compatible API surface).
//!
//! Collections run through hosted checkout (`/transaction/initialize`),
//! payouts through `/transfer`, and both sides are re-checked with
//! `/transaction/verify/:reference`. Amounts go over the wire in minor units
//! (pesewas).

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::kernel::traits::{BaseCardProcessor, ProcessorCharge, ProcessorTransaction};

const DEFAULT_BASE_URL: &str = "https://api.paystack.co";

pub struct PaystackClient {
    secret_key: String,
    base_url: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    #[allow(dead_code)]
    access_code: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    currency: String,
    gateway_response: Option<String>,
}

impl PaystackClient {
    pub fn new(secret_key: String, base_url: Option<String>) -> Self {
        Self {
            secret_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http: Client::new(),
        }
    }

    fn minor_units(amount: Decimal) -> Result<i64> {
        (amount * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| anyhow!("amount out of range: {amount}"))
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;

        let status = response.status();
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .with_context(|| format!("POST {path}: unparseable response"))?;

        if !status.is_success() || !envelope.status {
            return Err(anyhow!("processor rejected {path}: {}", envelope.message));
        }
        envelope
            .data
            .ok_or_else(|| anyhow!("processor returned no data for {path}"))
    }
}

#[async_trait::async_trait]
impl BaseCardProcessor for PaystackClient {
    async fn initialize_charge(
        &self,
        reference: Uuid,
        amount: Decimal,
        currency: &str,
        customer_email: &str,
    ) -> Result<ProcessorCharge> {
        let data: InitializeData = self
            .post(
                "/transaction/initialize",
                json!({
                    "email": customer_email,
                    "amount": Self::minor_units(amount)?,
                    "currency": currency,
                    "reference": reference.to_string(),
                }),
            )
            .await?;

        Ok(ProcessorCharge {
            status: "pending".to_string(),
            authorization_url: Some(data.authorization_url),
        })
    }

    async fn create_transfer(
        &self,
        reference: Uuid,
        amount: Decimal,
        currency: &str,
        recipient_code: &str,
        note: &str,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .post(
                "/transfer",
                json!({
                    "source": "balance",
                    "amount": Self::minor_units(amount)?,
                    "currency": currency,
                    "recipient": recipient_code,
                    "reference": reference.to_string(),
                    "reason": note,
                }),
            )
            .await?;
        Ok(())
    }

    async fn verify(&self, reference: Uuid) -> Result<ProcessorTransaction> {
        let response = self
            .http
            .get(format!(
                "{}/transaction/verify/{}",
                self.base_url, reference
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .context("GET /transaction/verify failed")?;

        let status = response.status();
        let envelope: ApiEnvelope<VerifyData> = response
            .json()
            .await
            .context("verify: unparseable response")?;

        if !status.is_success() || !envelope.status {
            return Err(anyhow!("processor rejected verify: {}", envelope.message));
        }
        let data = envelope
            .data
            .ok_or_else(|| anyhow!("processor returned no data for verify"))?;

        Ok(ProcessorTransaction {
            status: data.status,
            amount_minor: data.amount,
            currency: data.currency,
            failure_reason: data.gateway_response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_major_to_minor_units() {
        assert_eq!(
            PaystackClient::minor_units(Decimal::new(9999, 2)).unwrap(),
            9999
        );
        assert_eq!(PaystackClient::minor_units(Decimal::from(100)).unwrap(), 10000);
    }
}
