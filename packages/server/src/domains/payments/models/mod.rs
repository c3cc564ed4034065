pub mod payment;
pub mod webhook_event;

pub use payment::{NewPayment, Payment};
pub use webhook_event::WebhookEvent;
