use blockbook_client::BackendError;
use chain_btc::BtcError;
use crypto_utils::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("hardened index {0:#x} cannot be derived from a public key")]
    HardenedDerivationUnsupported(u32),

    #[error("key at depth 255 has no children")]
    MaxDepthExceeded,

    #[error("invalid curve point: {0}")]
    InvalidPoint(String),

    #[error("invalid extended key: {0}")]
    InvalidExtendedKey(String),

    #[error("extended private keys are not supported")]
    PrivateKeyNotSupported,

    #[error("invalid derivation path: {0}")]
    InvalidPath(String),

    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("invalid signing request: {0}")]
    InvalidSigningRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Btc(BtcError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl From<BtcError> for WalletError {
    fn from(e: BtcError) -> Self {
        match e {
            BtcError::InsufficientFunds { needed, available } => {
                WalletError::InsufficientFunds { needed, available }
            }
            other => WalletError::Btc(other),
        }
    }
}
