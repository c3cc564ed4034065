pub mod models;
pub mod reconciliation;

pub use models::{Payment, WebhookEvent};
pub use reconciliation::{reconcile, ReconcileReport};
