// SikaWork Payments Core
//
// Backend for marketplace money movement: escrow between hirers and workers,
// the wallet ledger behind every balance change, multi-provider payment
// gateways behind per-provider circuit breakers, and the webhook
// reconciliation loop that repairs drift against external providers.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
