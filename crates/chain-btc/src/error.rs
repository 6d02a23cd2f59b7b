use thiserror::Error;

/// Bitcoin chain operation errors.
#[derive(Debug, Error)]
pub enum BtcError {
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("malformed PSBT: {0}")]
    MalformedPsbt(String),

    #[error("duplicate PSBT key {key} in {map} map")]
    DuplicateKey { map: &'static str, key: String },

    #[error("PSBT map count mismatch: expected {expected}, found {found}")]
    PsbtLengthMismatch { expected: usize, found: usize },

    #[error("uncompressed public keys are not supported")]
    UncompressedKeyNotSupported,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("unrecognized address: {0}")]
    UnrecognizedAddress(String),

    #[error("unsupported script: {0}")]
    UnsupportedScript(String),

    #[error("invalid txid: {0}")]
    InvalidTxid(String),

    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("unknown coin: {0}")]
    UnknownCoin(String),

    #[error("unknown account type: {0}")]
    UnknownAccountType(String),

    #[error("amount overflow: {0}")]
    AmountOverflow(&'static str),
}
