pub mod ledger;
pub mod models;

pub use ledger::{Ledger, TxSpec};
