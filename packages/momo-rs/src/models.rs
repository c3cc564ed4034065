use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyIdType {
    Msisdn,
    Email,
    PartyCode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionParty {
    #[serde(rename = "partyIdType")]
    pub party_id_type: PartyIdType,
    #[serde(rename = "partyId")]
    pub party_id: String,
}

#[derive(Debug, Serialize)]
pub struct RequestToPayRequest {
    pub amount: String,
    pub currency: String,
    #[serde(rename = "externalId")]
    pub external_id: String,
    pub payer: TransactionParty,
    #[serde(rename = "payerMessage")]
    pub payer_message: String,
    #[serde(rename = "payeeNote")]
    pub payee_note: String,
}

#[derive(Debug, Serialize)]
pub struct TransferRequest {
    pub amount: String,
    pub currency: String,
    #[serde(rename = "externalId")]
    pub external_id: String,
    pub payee: TransactionParty,
    #[serde(rename = "payerMessage")]
    pub payer_message: String,
    #[serde(rename = "payeeNote")]
    pub payee_note: String,
}

/// Status vocabulary the wallet networks report. `Timeout` shows up when the
/// payer never answered the USSD prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MomoStatus {
    Pending,
    Successful,
    Failed,
    Timeout,
    Rejected,
    Ongoing,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MomoTransaction {
    pub amount: String,
    pub currency: String,
    #[serde(rename = "externalId")]
    pub external_id: String,
    pub status: MomoStatus,
    /// Failure reason code, present when `status` is FAILED or REJECTED.
    pub reason: Option<String>,
    #[serde(rename = "financialTransactionId")]
    pub financial_transaction_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_parses_network_payload() {
        let payload = r#"{
            "amount": "100.00",
            "currency": "GHS",
            "externalId": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
            "status": "SUCCESSFUL",
            "financialTransactionId": "1308412839"
        }"#;

        let tx: MomoTransaction = serde_json::from_str(payload).unwrap();
        assert_eq!(tx.status, MomoStatus::Successful);
        assert_eq!(tx.amount, "100.00");
        assert!(tx.reason.is_none());
    }

    #[test]
    fn failed_transaction_carries_reason() {
        let payload = r#"{
            "amount": "25.00",
            "currency": "GHS",
            "externalId": "ref-1",
            "status": "FAILED",
            "reason": "PAYER_NOT_FOUND"
        }"#;

        let tx: MomoTransaction = serde_json::from_str(payload).unwrap();
        assert_eq!(tx.status, MomoStatus::Failed);
        assert_eq!(tx.reason.as_deref(), Some("PAYER_NOT_FOUND"));
    }
}
