use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub allowed_origins: Vec<String>,

    // Mobile money networks (MTN MoMo, Telecel Cash, AT Money)
    pub momo_subscription_key: String,
    pub momo_api_user: String,
    pub momo_api_key: String,
    pub momo_target_environment: String,

    // Card/bank processor
    pub processor_secret_key: String,
    pub processor_base_url: Option<String>,

    // Inbound webhook authentication
    pub webhook_shared_secret: String,

    // Circuit breaker tuning
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    pub breaker_call_timeout_secs: u64,

    // Per-wallet daily outflow cap, in wallet currency
    pub daily_outflow_limit: rust_decimal::Decimal,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "sikawork".to_string()),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),

            momo_subscription_key: env::var("MOMO_SUBSCRIPTION_KEY")
                .context("MOMO_SUBSCRIPTION_KEY must be set")?,
            momo_api_user: env::var("MOMO_API_USER").context("MOMO_API_USER must be set")?,
            momo_api_key: env::var("MOMO_API_KEY").context("MOMO_API_KEY must be set")?,
            momo_target_environment: env::var("MOMO_TARGET_ENVIRONMENT")
                .unwrap_or_else(|_| "sandbox".to_string()),

            processor_secret_key: env::var("PROCESSOR_SECRET_KEY")
                .context("PROCESSOR_SECRET_KEY must be set")?,
            processor_base_url: env::var("PROCESSOR_BASE_URL").ok(),

            webhook_shared_secret: env::var("WEBHOOK_SHARED_SECRET")
                .context("WEBHOOK_SHARED_SECRET must be set")?,

            breaker_failure_threshold: env::var("BREAKER_FAILURE_THRESHOLD")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("BREAKER_FAILURE_THRESHOLD must be a number")?,
            breaker_cooldown_secs: env::var("BREAKER_COOLDOWN_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("BREAKER_COOLDOWN_SECS must be a number")?,
            breaker_call_timeout_secs: env::var("BREAKER_CALL_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("BREAKER_CALL_TIMEOUT_SECS must be a number")?,

            daily_outflow_limit: env::var("DAILY_OUTFLOW_LIMIT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("DAILY_OUTFLOW_LIMIT must be a decimal amount")?,
        })
    }
}
