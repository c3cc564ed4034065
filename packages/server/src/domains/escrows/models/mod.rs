pub mod escrow;
pub mod milestone;

pub use escrow::{Escrow, EscrowStatus, FundingSource};
pub use milestone::{Milestone, MilestoneStatus};
