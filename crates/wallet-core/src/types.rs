use std::hash::{Hash, Hasher};

use blockbook_client::AccountInfo;
use chain_btc::{AccountType, Transaction};

/// One derived address of an account.
#[derive(Debug, Clone)]
pub struct Address {
    /// Path relative to the account node: `[branch, index]`.
    pub path: Vec<u32>,
    pub change: bool,
    pub account_type: AccountType,
    pub public_key: [u8; 33],
    pub address: String,
    /// Backend summary, filled in during discovery.
    pub data: Option<AccountInfo>,
}

impl Address {
    pub fn index(&self) -> u32 {
        self.path.last().copied().unwrap_or_default()
    }

    pub fn total_received(&self) -> u64 {
        self.data.as_ref().map_or(0, |d| d.total_received)
    }

    pub fn balance(&self) -> u64 {
        self.data.as_ref().map_or(0, |d| d.balance)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// A spendable output together with the transaction that created it.
#[derive(Debug, Clone)]
pub struct Utxo {
    pub address: Address,
    pub prev_tx: Transaction,
    pub vout: u32,
    pub value: u64,
}

impl Utxo {
    /// Txid in the usual display (reversed) byte order.
    pub fn txid_hex(&self) -> String {
        self.prev_tx.txid_hex()
    }

    pub fn script_pubkey(&self) -> Option<&[u8]> {
        self.prev_tx
            .outputs
            .get(self.vout as usize)
            .map(|o| o.script_pubkey.as_slice())
    }
}

/// Running counts reported during UTXO discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub addresses: usize,
    pub transactions: usize,
}

/// Result of coin selection.
#[derive(Debug, Clone)]
pub struct FundedTx {
    pub utxos: Vec<Utxo>,
    /// Change amount, `None` when no change output is created.
    pub change: Option<u64>,
    pub fee: u64,
}

impl FundedTx {
    pub fn total_in(&self) -> u64 {
        self.utxos.iter().map(|u| u.value).sum()
    }
}

/// A funded transaction with its change address resolved.
#[derive(Debug, Clone)]
pub struct PreparedTx {
    pub utxos: Vec<Utxo>,
    pub recipients: Vec<(String, u64)>,
    /// Change address and amount.
    pub change: Option<(Address, u64)>,
    pub fee: u64,
}
