//! Bitcoin-family chain support for the watch-only wallet.
//!
//! Provides the static coin parameter table, the exact transaction and PSBT
//! wire codecs, standard script templates, address encoding for the three
//! single-key account types, and the fee-aware coin selection state machine.

pub mod account_type;
pub mod address;
pub mod encoding;
pub mod error;
pub mod network;
pub mod psbt;
pub mod script;
pub mod transaction;
pub mod utxo;

pub use account_type::{AccountType, InputScriptType, OutputScriptType};
pub use error::BtcError;
pub use network::{Coin, CoinParams};
pub use psbt::Psbt;
pub use transaction::{Transaction, TxInput, TxOutput};
