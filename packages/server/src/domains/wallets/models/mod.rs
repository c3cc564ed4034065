pub mod transaction;
pub mod wallet;

pub use transaction::{Transaction, TxStatus, TxType};
pub use wallet::{Wallet, WalletStatus};
