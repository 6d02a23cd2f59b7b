use async_trait::async_trait;

use crate::error::BackendError;
use crate::types::{AccountInfo, AccountUtxo, TransactionData};

/// Blockchain data source used by the wallet engine.
///
/// `connect` and `disconnect` nest: only the outermost `disconnect` may tear
/// down the underlying transport.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn connect(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn get_address_data(&self, address: &str) -> Result<AccountInfo, BackendError>;

    async fn get_utxos(&self, address: &str) -> Result<Vec<AccountUtxo>, BackendError>;

    async fn get_transaction(&self, txid: &str) -> Result<TransactionData, BackendError>;

    /// Fee rate in minor units per kilobyte for confirmation within `blocks`.
    async fn estimate_fee(&self, blocks: u32) -> Result<u64, BackendError>;

    /// Submit a signed transaction, returning its txid.
    async fn broadcast(&self, tx_hex: &str) -> Result<String, BackendError>;
}
