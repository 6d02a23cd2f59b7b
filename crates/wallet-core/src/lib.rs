//! Watch-only wallet engine for Bitcoin-family coins.
//!
//! An [`Account`] is built from an account-level extended public key and a
//! [`Backend`](blockbook_client::Backend). It derives addresses, discovers
//! activity with a gap limit, selects coins and prepares unsigned
//! transactions. Signing is delegated to an external device through a
//! [`SigningRequest`] or a PSBT.

pub mod account;
pub mod config;
pub mod error;
pub mod hd_derivation;
pub mod logging;
pub mod signing;
pub mod types;

#[cfg(test)]
mod testing;

pub use account::{Account, GAP_LIMIT};
pub use config::WalletConfig;
pub use error::WalletError;
pub use hd_derivation::{DerivationPath, ExtendedKey, HARDENED_FLAG};
pub use signing::{
    make_psbt, make_transaction, signing_request, signing_request_from_psbt, Signer,
    SignerOutput, SigningRequest,
};
pub use types::{Address, FundedTx, PreparedTx, Progress, Utxo};
