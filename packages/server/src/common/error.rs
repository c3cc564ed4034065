use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Error taxonomy for the payments core.
///
/// Money-moving operations either succeed fully or fail with one of these
/// before any partial mutation is visible. Raw provider errors never appear
/// here; the gateway router wraps them into `Provider`/`ProviderTimeout`/
/// `CircuitOpen` with the detail kept for logs.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid {entity} transition: cannot {attempted} from '{from}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        attempted: &'static str,
    },

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    #[error("wallet is {status}")]
    WalletUnavailable { status: String },

    #[error("daily outflow limit exceeded")]
    LimitExceeded,

    #[error("{provider} circuit open until {retry_at}")]
    CircuitOpen {
        provider: String,
        retry_at: DateTime<Utc>,
    },

    #[error("{provider} call timed out")]
    ProviderTimeout { provider: String },

    #[error("{provider} rejected the request")]
    Provider { provider: String, detail: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Short machine-readable code, used in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::InvalidTransition { .. } => "invalid_transition",
            CoreError::InsufficientFunds { .. } => "insufficient_funds",
            CoreError::WalletUnavailable { .. } => "wallet_unavailable",
            CoreError::LimitExceeded => "limit_exceeded",
            CoreError::CircuitOpen { .. } => "circuit_open",
            CoreError::ProviderTimeout { .. } => "provider_timeout",
            CoreError::Provider { .. } => "provider_error",
            CoreError::Conflict(_) => "conflict",
            CoreError::NotFound(_) => "not_found",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::Database(_) => "database_error",
            CoreError::Internal(_) => "internal_error",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
