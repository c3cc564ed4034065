pub mod engine;
pub mod models;

pub use engine::{EscrowEngine, FundOutcome, NewEscrow, NewMilestoneSpec};
