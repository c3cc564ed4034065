pub mod entity_ids;
pub mod error;
pub mod id;
pub mod types;

pub use entity_ids::*;
pub use error::{CoreError, CoreResult};
pub use types::*;
