// Client for the Ghanaian mobile-money wallet APIs. MTN MoMo, Telecel Cash
// and AT Money expose the same OpenAPI surface (token, request-to-pay,
// transfer, status lookup), differing only in host and subscription product,
// so a single client covers all three networks.

pub mod models;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::{header, Client, StatusCode};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    MomoTransaction, PartyIdType, RequestToPayRequest, TokenResponse, TransactionParty,
    TransferRequest,
};

#[derive(Debug, thiserror::Error)]
pub enum MomoError {
    #[error("momo request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("momo api error ({status}): {body}")]
    Api { status: StatusCode, body: String },

    #[error("momo token request rejected ({status})")]
    Token { status: StatusCode },
}

/// Which wallet network this client instance talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MomoNetwork {
    Mtn,
    Telecel,
    AirtelTigo,
}

impl MomoNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            MomoNetwork::Mtn => "mtn",
            MomoNetwork::Telecel => "telecel",
            MomoNetwork::AirtelTigo => "airteltigo",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            MomoNetwork::Mtn => "https://proxy.momoapi.mtn.com",
            MomoNetwork::Telecel => "https://api.telecel.com.gh/cash",
            MomoNetwork::AirtelTigo => "https://api.atmoney.com.gh",
        }
    }
}

impl std::fmt::Display for MomoNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct MomoOptions {
    pub network: MomoNetwork,
    /// Overrides the network's production host (sandbox, tests).
    pub base_url: Option<String>,
    pub subscription_key: String,
    pub api_user: String,
    pub api_key: String,
    /// "mtnghana" in production, "sandbox" otherwise.
    pub target_environment: String,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// One client per network. Holds its own OAuth token cache so instances are
/// independently injectable and testable.
#[derive(Clone)]
pub struct MomoClient {
    options: MomoOptions,
    http: Client,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl MomoClient {
    pub fn new(options: MomoOptions) -> Self {
        Self {
            options,
            http: Client::new(),
            token: Arc::new(Mutex::new(None)),
        }
    }

    pub fn network(&self) -> MomoNetwork {
        self.options.network
    }

    fn base_url(&self) -> &str {
        self.options
            .base_url
            .as_deref()
            .unwrap_or_else(|| self.options.network.default_base_url())
    }

    /// Returns a cached token, refreshing through `POST /collection/token/`
    /// when missing or within a minute of expiry.
    async fn access_token(&self) -> Result<String, MomoError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Utc::now() + Duration::seconds(60) {
                return Ok(cached.access_token.clone());
            }
        }

        let url = format!("{}/collection/token/", self.base_url());
        let response = self
            .http
            .post(url)
            .basic_auth(&self.options.api_user, Some(&self.options.api_key))
            .header(
                "Ocp-Apim-Subscription-Key",
                &self.options.subscription_key,
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MomoError::Token {
                status: response.status(),
            });
        }

        let token: TokenResponse = response.json().await?;
        let access_token = token.access_token.clone();
        *guard = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        });
        Ok(access_token)
    }

    fn authed(
        &self,
        builder: reqwest::RequestBuilder,
        token: &str,
        reference: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut builder = builder
            .bearer_auth(token)
            .header("Ocp-Apim-Subscription-Key", &self.options.subscription_key)
            .header("X-Target-Environment", &self.options.target_environment)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(reference) = reference {
            builder = builder.header("X-Reference-Id", reference);
        }
        builder
    }

    /// Ask the wallet holder to approve a debit (collection). The network
    /// answers 202 and settles asynchronously; poll `collection_status` or
    /// wait for the callback.
    pub async fn request_to_pay(
        &self,
        reference: Uuid,
        amount: &str,
        currency: &str,
        payer_msisdn: &str,
        note: &str,
    ) -> Result<(), MomoError> {
        let token = self.access_token().await?;
        let url = format!("{}/collection/v1_0/requesttopay", self.base_url());
        let body = RequestToPayRequest {
            amount: amount.to_string(),
            currency: currency.to_string(),
            external_id: reference.to_string(),
            payer: TransactionParty {
                party_id_type: PartyIdType::Msisdn,
                party_id: payer_msisdn.to_string(),
            },
            payer_message: note.to_string(),
            payee_note: note.to_string(),
        };

        let response = self
            .authed(self.http.post(url), &token, Some(&reference.to_string()))
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::ACCEPTED => Ok(()),
            status => Err(MomoError::Api {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Push money to a wallet holder (disbursement).
    pub async fn transfer(
        &self,
        reference: Uuid,
        amount: &str,
        currency: &str,
        payee_msisdn: &str,
        note: &str,
    ) -> Result<(), MomoError> {
        let token = self.access_token().await?;
        let url = format!("{}/disbursement/v1_0/transfer", self.base_url());
        let body = TransferRequest {
            amount: amount.to_string(),
            currency: currency.to_string(),
            external_id: reference.to_string(),
            payee: TransactionParty {
                party_id_type: PartyIdType::Msisdn,
                party_id: payee_msisdn.to_string(),
            },
            payer_message: note.to_string(),
            payee_note: note.to_string(),
        };

        let response = self
            .authed(self.http.post(url), &token, Some(&reference.to_string()))
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::ACCEPTED => Ok(()),
            status => Err(MomoError::Api {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    pub async fn collection_status(&self, reference: Uuid) -> Result<MomoTransaction, MomoError> {
        self.transaction_status("collection/v1_0/requesttopay", reference)
            .await
    }

    pub async fn disbursement_status(
        &self,
        reference: Uuid,
    ) -> Result<MomoTransaction, MomoError> {
        self.transaction_status("disbursement/v1_0/transfer", reference)
            .await
    }

    async fn transaction_status(
        &self,
        path: &str,
        reference: Uuid,
    ) -> Result<MomoTransaction, MomoError> {
        let token = self.access_token().await?;
        let url = format!("{}/{}/{}", self.base_url(), path, reference);

        let response = self.authed(self.http.get(url), &token, None).send().await?;

        if !response.status().is_success() {
            return Err(MomoError::Api {
                status: response.status(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }
}
