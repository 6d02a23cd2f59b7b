//! In-memory backend for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use blockbook_client::{AccountInfo, AccountUtxo, Backend, BackendError, TransactionData};
use chain_btc::{Transaction, TxInput, TxOutput};

// all-all-all seed, m/84'/0'/15'
pub(crate) const ZPUB: &str = "zpub6rszzdAK6RubKxxKxydVq6Bpjz1mt8BBitik5JMBy3QZeegBLHYp9Nw5UR6xa6PrMdn4hfF79rQcfri7pvqo5jJdrYj1WowiVDtGBjD9nbS";
// all-all-all seed, m/49'/2'/15'
pub(crate) const MTUB: &str = "Mtub2syZtptY6mWDbfUYxStNwpWfnC1GCjgn94i7LACu9euPviukSSVptfWu8kC7LKjD2pEUAf4Tk78zEG3eNEeFp1vdCuEaWu4thgYCiTP5fiA";
// all-all-all seed, m/44'/3'/15'
pub(crate) const DGUB: &str = "dgub8sbe5Mi8LA4eBLHDvNhQWYu8awPXZThRPr4B4o3yzUYx4HswUunt8C5pTCQS45ZGcEaTbeJ1NuwyTfD8hERktZw3r3r3iypBnAAxhNxQLFM";

/// A transaction paying `values` to `script_pubkey`; `salt` keeps txids apart.
pub(crate) fn funding_tx(script_pubkey: &[u8], values: &[u64], salt: u8) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            prev_hash: [salt; 32],
            prev_index: 0,
            script_sig: vec![0x51],
            sequence: 0xffff_ffff,
        }],
        outputs: values
            .iter()
            .map(|&value| TxOutput {
                value,
                script_pubkey: script_pubkey.to_vec(),
            })
            .collect(),
        witness: None,
        lock_time: 0,
    }
}

#[derive(Default)]
pub(crate) struct MockBackend {
    pub infos: Mutex<HashMap<String, AccountInfo>>,
    pub utxos: Mutex<HashMap<String, Vec<AccountUtxo>>>,
    pub txs: Mutex<HashMap<String, String>>,
    /// `None` makes fee estimation fail.
    pub fee: Mutex<Option<u64>>,
    pub broadcasts: Mutex<Vec<String>>,
    pub address_calls: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl MockBackend {
    pub fn with_fee(fee: u64) -> Self {
        let backend = Self::default();
        *backend.fee.lock().unwrap() = Some(fee);
        backend
    }

    /// Record every output of `tx` as unspent at `address`.
    pub fn fund(&self, address: &str, tx: &Transaction) {
        let txid = tx.txid_hex();
        let total: u64 = tx.outputs.iter().map(|o| o.value).sum();
        {
            let mut infos = self.infos.lock().unwrap();
            let info = infos.entry(address.to_string()).or_default();
            info.address = address.to_string();
            info.balance += total;
            info.total_received += total;
            info.txs += 1;
        }
        let mut utxos = self.utxos.lock().unwrap();
        let entry = utxos.entry(address.to_string()).or_default();
        for (vout, output) in tx.outputs.iter().enumerate() {
            entry.push(AccountUtxo {
                txid: txid.clone(),
                vout: vout as u32,
                value: output.value,
                height: Some(100),
                confirmations: 6,
            });
        }
        self.txs
            .lock()
            .unwrap()
            .insert(txid, hex::encode(tx.serialize().unwrap()));
    }

    /// Mark `address` as used but empty.
    pub fn mark_used(&self, address: &str) {
        let mut infos = self.infos.lock().unwrap();
        let info = infos.entry(address.to_string()).or_default();
        info.address = address.to_string();
        info.total_received += 1;
        info.total_sent += 1;
        info.txs += 2;
    }

    pub fn address_calls(&self) -> usize {
        self.address_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn connect(&self) -> Result<(), BackendError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn get_address_data(&self, address: &str) -> Result<AccountInfo, BackendError> {
        self.address_calls.fetch_add(1, Ordering::SeqCst);
        let infos = self.infos.lock().unwrap();
        Ok(infos.get(address).cloned().unwrap_or_else(|| AccountInfo {
            address: address.to_string(),
            ..Default::default()
        }))
    }

    async fn get_utxos(&self, address: &str) -> Result<Vec<AccountUtxo>, BackendError> {
        Ok(self
            .utxos
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_transaction(&self, txid: &str) -> Result<TransactionData, BackendError> {
        let hex = self
            .txs
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| BackendError::Rpc(format!("transaction {txid} not found")))?;
        Ok(TransactionData {
            txid: txid.to_string(),
            hex,
        })
    }

    async fn estimate_fee(&self, _blocks: u32) -> Result<u64, BackendError> {
        self.fee
            .lock()
            .unwrap()
            .ok_or_else(|| BackendError::Rpc("fee estimation unavailable".into()))
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<String, BackendError> {
        let tx = Transaction::parse(&hex::decode(tx_hex).unwrap())
            .map_err(|e| BackendError::Rpc(e.to_string()))?;
        self.broadcasts.lock().unwrap().push(tx_hex.to_string());
        Ok(tx.txid_hex())
    }
}
