//! Gateway router: logical payment method -> concrete provider client.
//!
//! Every outbound call goes through the provider's own circuit breaker, so a
//! degraded mobile-money network cannot cascade into unrelated providers.
//! Provider status vocabularies are normalized into the closed
//! [`GatewayStatus`] set at this boundary; raw provider errors are logged
//! here and wrapped, never surfaced verbatim.

use std::sync::Arc;

use anyhow::Result;
use momo::models::MomoStatus;
use momo::MomoNetwork;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::{CoreError, CoreResult};
use crate::kernel::circuit_breaker::{BreakerConfig, CircuitBreaker};
use crate::kernel::phone;
use crate::kernel::traits::{BaseCardProcessor, BaseMomoClient};

/// Concrete providers this deployment can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    MtnMomo,
    TelecelCash,
    AtMoney,
    Paystack,
}

impl Provider {
    pub fn from_network(network: MomoNetwork) -> Self {
        match network {
            MomoNetwork::Mtn => Provider::MtnMomo,
            MomoNetwork::Telecel => Provider::TelecelCash,
            MomoNetwork::AirtelTigo => Provider::AtMoney,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::MtnMomo => write!(f, "mtn_momo"),
            Provider::TelecelCash => write!(f, "telecel_cash"),
            Provider::AtMoney => write!(f, "at_money"),
            Provider::Paystack => write!(f, "paystack"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mtn_momo" => Ok(Provider::MtnMomo),
            "telecel_cash" => Ok(Provider::TelecelCash),
            "at_money" => Ok(Provider::AtMoney),
            "paystack" => Ok(Provider::Paystack),
            _ => Err(anyhow::anyhow!("Unknown provider: {}", s)),
        }
    }
}

/// Which way the money moves, from the platform's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    Collection,
    Disbursement,
}

impl std::fmt::Display for PaymentDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentDirection::Collection => write!(f, "collection"),
            PaymentDirection::Disbursement => write!(f, "disbursement"),
        }
    }
}

impl std::str::FromStr for PaymentDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "collection" => Ok(PaymentDirection::Collection),
            "disbursement" => Ok(PaymentDirection::Disbursement),
            _ => Err(anyhow::anyhow!("Unknown payment direction: {}", s)),
        }
    }
}

/// Channel a payment method belongs to (stored on the payment row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    MobileMoney,
    Card,
    Bank,
}

impl std::fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentChannel::MobileMoney => write!(f, "mobile_money"),
            PaymentChannel::Card => write!(f, "card"),
            PaymentChannel::Bank => write!(f, "bank"),
        }
    }
}

/// Logical payment method as callers submit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    MobileMoney {
        msisdn: String,
        /// "mtn", "telecel", "airteltigo", or omitted to route by prefix.
        #[serde(default)]
        network: Option<String>,
    },
    Card {
        email: String,
    },
    Bank {
        /// Processor-side recipient code for payouts, customer email for
        /// collections.
        recipient_code: String,
    },
}

impl PaymentMethod {
    pub fn channel(&self) -> PaymentChannel {
        match self {
            PaymentMethod::MobileMoney { .. } => PaymentChannel::MobileMoney,
            PaymentMethod::Card { .. } => PaymentChannel::Card,
            PaymentMethod::Bank { .. } => PaymentChannel::Bank,
        }
    }
}

/// Closed status vocabulary every provider response collapses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl GatewayStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GatewayStatus::Completed | GatewayStatus::Failed | GatewayStatus::Cancelled
        )
    }

    pub fn from_momo(status: MomoStatus) -> Self {
        match status {
            MomoStatus::Pending => GatewayStatus::Pending,
            MomoStatus::Ongoing => GatewayStatus::Processing,
            MomoStatus::Successful => GatewayStatus::Completed,
            MomoStatus::Failed | MomoStatus::Timeout => GatewayStatus::Failed,
            MomoStatus::Rejected => GatewayStatus::Cancelled,
        }
    }

    pub fn from_processor(status: &str) -> Self {
        match status {
            "success" => GatewayStatus::Completed,
            "failed" | "reversed" => GatewayStatus::Failed,
            "abandoned" => GatewayStatus::Cancelled,
            "ongoing" | "processing" | "queued" => GatewayStatus::Processing,
            "pending" | "send_otp" => GatewayStatus::Pending,
            other => {
                tracing::warn!(status = other, "unknown processor status, treating as pending");
                GatewayStatus::Pending
            }
        }
    }
}

impl std::fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayStatus::Pending => write!(f, "pending"),
            GatewayStatus::Processing => write!(f, "processing"),
            GatewayStatus::Completed => write!(f, "completed"),
            GatewayStatus::Failed => write!(f, "failed"),
            GatewayStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for GatewayStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(GatewayStatus::Pending),
            "processing" => Ok(GatewayStatus::Processing),
            "completed" => Ok(GatewayStatus::Completed),
            "failed" => Ok(GatewayStatus::Failed),
            "cancelled" => Ok(GatewayStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Unknown gateway status: {}", s)),
        }
    }
}

/// What the router hands back after initiating a payment.
#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub provider: Provider,
    pub reference: Uuid,
    pub status: GatewayStatus,
    /// Hosted checkout URL for card collections.
    pub redirect_url: Option<String>,
    /// Normalized payer/payee handle (e.g. the +233 msisdn).
    pub counterparty_ref: String,
}

struct MomoSlot {
    client: Arc<dyn BaseMomoClient>,
    breaker: CircuitBreaker,
}

pub struct GatewayRouter {
    momo: Vec<MomoSlot>,
    processor: Arc<dyn BaseCardProcessor>,
    processor_breaker: CircuitBreaker,
}

impl GatewayRouter {
    pub fn new(
        momo_clients: Vec<Arc<dyn BaseMomoClient>>,
        processor: Arc<dyn BaseCardProcessor>,
        breaker_config: BreakerConfig,
    ) -> Self {
        let momo = momo_clients
            .into_iter()
            .map(|client| MomoSlot {
                breaker: CircuitBreaker::new(
                    Provider::from_network(client.network()).to_string(),
                    breaker_config.clone(),
                ),
                client,
            })
            .collect();
        Self {
            momo,
            processor,
            processor_breaker: CircuitBreaker::new(
                Provider::Paystack.to_string(),
                breaker_config,
            ),
        }
    }

    fn momo_slot(&self, network: MomoNetwork) -> CoreResult<&MomoSlot> {
        self.momo
            .iter()
            .find(|slot| slot.client.network() == network)
            .ok_or_else(|| {
                CoreError::validation(format!("no client configured for network {network}"))
            })
    }

    fn resolve_network(msisdn: &str, requested: Option<&str>) -> CoreResult<MomoNetwork> {
        match requested {
            None | Some("auto") => phone::network_for(msisdn),
            Some("mtn") => Ok(MomoNetwork::Mtn),
            Some("telecel") | Some("vodafone") => Ok(MomoNetwork::Telecel),
            Some("airteltigo") | Some("at") => Ok(MomoNetwork::AirtelTigo),
            Some(other) => Err(CoreError::validation(format!(
                "unknown mobile-money network: {other}"
            ))),
        }
    }

    /// Which provider a method would route to, without calling anyone.
    pub fn provider_for(&self, method: &PaymentMethod) -> CoreResult<Provider> {
        match method {
            PaymentMethod::MobileMoney { msisdn, network } => {
                let msisdn = phone::normalize_msisdn(msisdn)?;
                let network = Self::resolve_network(&msisdn, network.as_deref())?;
                Ok(Provider::from_network(network))
            }
            PaymentMethod::Card { .. } | PaymentMethod::Bank { .. } => Ok(Provider::Paystack),
        }
    }

    fn wrap_provider_error(provider: Provider, err: anyhow::Error) -> CoreError {
        // Detail stays in the logs; callers only see the provider name.
        tracing::warn!(provider = %provider, error = format!("{err:#}"), "provider call failed");
        CoreError::Provider {
            provider: provider.to_string(),
            detail: format!("{err:#}"),
        }
    }

    /// Pull money in from a payer.
    pub async fn initiate_collection(
        &self,
        method: &PaymentMethod,
        amount: Decimal,
        currency: &str,
        reference: Uuid,
        note: &str,
    ) -> CoreResult<InitiatedPayment> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::validation("amount must be positive"));
        }
        match method {
            PaymentMethod::MobileMoney { msisdn, network } => {
                let msisdn = phone::normalize_msisdn(msisdn)?;
                let network = Self::resolve_network(&msisdn, network.as_deref())?;
                let provider = Provider::from_network(network);
                let slot = self.momo_slot(network)?;

                slot.breaker
                    .call(async {
                        slot.client
                            .request_to_pay(reference, amount, currency, &msisdn, note)
                            .await
                            .map_err(|e| Self::wrap_provider_error(provider, e))
                    })
                    .await?;

                Ok(InitiatedPayment {
                    provider,
                    reference,
                    status: GatewayStatus::Pending,
                    redirect_url: None,
                    counterparty_ref: msisdn,
                })
            }
            PaymentMethod::Card { email } | PaymentMethod::Bank {
                recipient_code: email,
            } => {
                let charge = self
                    .processor_breaker
                    .call(async {
                        self.processor
                            .initialize_charge(reference, amount, currency, email)
                            .await
                            .map_err(|e| Self::wrap_provider_error(Provider::Paystack, e))
                    })
                    .await?;

                Ok(InitiatedPayment {
                    provider: Provider::Paystack,
                    reference,
                    status: GatewayStatus::from_processor(&charge.status),
                    redirect_url: charge.authorization_url,
                    counterparty_ref: email.clone(),
                })
            }
        }
    }

    /// Push money out to a payee.
    pub async fn initiate_disbursement(
        &self,
        method: &PaymentMethod,
        amount: Decimal,
        currency: &str,
        reference: Uuid,
        note: &str,
    ) -> CoreResult<InitiatedPayment> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::validation("amount must be positive"));
        }
        match method {
            PaymentMethod::MobileMoney { msisdn, network } => {
                let msisdn = phone::normalize_msisdn(msisdn)?;
                let network = Self::resolve_network(&msisdn, network.as_deref())?;
                let provider = Provider::from_network(network);
                let slot = self.momo_slot(network)?;

                slot.breaker
                    .call(async {
                        slot.client
                            .transfer(reference, amount, currency, &msisdn, note)
                            .await
                            .map_err(|e| Self::wrap_provider_error(provider, e))
                    })
                    .await?;

                Ok(InitiatedPayment {
                    provider,
                    reference,
                    status: GatewayStatus::Pending,
                    redirect_url: None,
                    counterparty_ref: msisdn,
                })
            }
            PaymentMethod::Card { .. } => Err(CoreError::validation(
                "card methods cannot receive disbursements; use a bank recipient",
            )),
            PaymentMethod::Bank { recipient_code } => {
                self.processor_breaker
                    .call(async {
                        self.processor
                            .create_transfer(reference, amount, currency, recipient_code, note)
                            .await
                            .map_err(|e| Self::wrap_provider_error(Provider::Paystack, e))
                    })
                    .await?;

                Ok(InitiatedPayment {
                    provider: Provider::Paystack,
                    reference,
                    status: GatewayStatus::Pending,
                    redirect_url: None,
                    counterparty_ref: recipient_code.clone(),
                })
            }
        }
    }

    /// Re-derive a payment's status from the provider.
    pub async fn check_status(
        &self,
        provider: Provider,
        direction: PaymentDirection,
        reference: Uuid,
    ) -> CoreResult<GatewayStatus> {
        match provider {
            Provider::MtnMomo | Provider::TelecelCash | Provider::AtMoney => {
                let network = match provider {
                    Provider::MtnMomo => MomoNetwork::Mtn,
                    Provider::TelecelCash => MomoNetwork::Telecel,
                    _ => MomoNetwork::AirtelTigo,
                };
                let slot = self.momo_slot(network)?;
                let tx = slot
                    .breaker
                    .call(async {
                        let result = match direction {
                            PaymentDirection::Collection => {
                                slot.client.collection_status(reference).await
                            }
                            PaymentDirection::Disbursement => {
                                slot.client.disbursement_status(reference).await
                            }
                        };
                        result.map_err(|e| Self::wrap_provider_error(provider, e))
                    })
                    .await?;
                Ok(GatewayStatus::from_momo(tx.status))
            }
            Provider::Paystack => {
                let tx = self
                    .processor_breaker
                    .call(async {
                        self.processor
                            .verify(reference)
                            .await
                            .map_err(|e| Self::wrap_provider_error(Provider::Paystack, e))
                    })
                    .await?;
                Ok(GatewayStatus::from_processor(&tx.status))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn momo_vocabulary_collapses_into_closed_set() {
        assert_eq!(
            GatewayStatus::from_momo(MomoStatus::Successful),
            GatewayStatus::Completed
        );
        assert_eq!(
            GatewayStatus::from_momo(MomoStatus::Ongoing),
            GatewayStatus::Processing
        );
        assert_eq!(
            GatewayStatus::from_momo(MomoStatus::Timeout),
            GatewayStatus::Failed
        );
        assert_eq!(
            GatewayStatus::from_momo(MomoStatus::Rejected),
            GatewayStatus::Cancelled
        );
    }

    #[test]
    fn processor_vocabulary_collapses_into_closed_set() {
        assert_eq!(GatewayStatus::from_processor("success"), GatewayStatus::Completed);
        assert_eq!(GatewayStatus::from_processor("abandoned"), GatewayStatus::Cancelled);
        assert_eq!(GatewayStatus::from_processor("reversed"), GatewayStatus::Failed);
        assert_eq!(GatewayStatus::from_processor("queued"), GatewayStatus::Processing);
        // Unknown strings never escape the closed set.
        assert_eq!(
            GatewayStatus::from_processor("something_new"),
            GatewayStatus::Pending
        );
    }

    #[test]
    fn explicit_network_beats_prefix_routing() {
        let network =
            GatewayRouter::resolve_network("+233201234567", Some("mtn")).unwrap();
        assert_eq!(network, MomoNetwork::Mtn);

        let network = GatewayRouter::resolve_network("+233201234567", None).unwrap();
        assert_eq!(network, MomoNetwork::Telecel);
    }

    #[test]
    fn payment_method_deserializes_from_tagged_json() {
        let method: PaymentMethod = serde_json::from_str(
            r#"{"type": "mobile_money", "msisdn": "0244123456"}"#,
        )
        .unwrap();
        assert!(matches!(
            method,
            PaymentMethod::MobileMoney { network: None, .. }
        ));
        assert_eq!(method.channel(), PaymentChannel::MobileMoney);
    }
}
