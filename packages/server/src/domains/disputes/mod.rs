pub mod models;
pub mod workflow;

pub use models::{Dispute, DisputeEvidence, DisputeOutcome, DisputeStatus, EvidenceKind};
pub use workflow::{DisputeWorkflow, ResolutionRequest};
