pub mod circuit_breaker;
pub mod deps;
pub mod gateway;
pub mod notifications;
pub mod paystack_client;
pub mod phone;
pub mod scheduled_tasks;
pub mod test_support;
pub mod traits;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker};
pub use deps::ServerDeps;
pub use gateway::{GatewayRouter, GatewayStatus, InitiatedPayment, PaymentChannel, PaymentMethod};
pub use notifications::{LoggingNotificationService, Notification};
pub use paystack_client::PaystackClient;
pub use traits::{BaseCardProcessor, BaseMomoClient, BaseNotificationService};
