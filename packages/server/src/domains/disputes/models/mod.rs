pub mod dispute;
pub mod evidence;

pub use dispute::{Dispute, DisputeOutcome, DisputeStatus};
pub use evidence::{DisputeEvidence, EvidenceKind};
