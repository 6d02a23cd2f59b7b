//! Watch-only account: address discovery, balance, UTXO lookup and coin
//! selection against a [`Backend`].

use std::collections::HashMap;
use std::future::Future;

use blockbook_client::{Backend, BackendError};
use chain_btc::address::derive_output_script;
use chain_btc::utxo::CoinSelector;
use chain_btc::{AccountType, BtcError, Coin, CoinParams, Transaction, TxOutput};
use futures_util::future::try_join_all;
use tracing::{debug, info, warn};

use crate::error::WalletError;
use crate::hd_derivation::{DerivationPath, ExtendedKey, HARDENED_FLAG};
use crate::types::{Address, FundedTx, PreparedTx, Progress, Utxo};

/// Consecutive unused addresses that end discovery on a branch.
pub const GAP_LIMIT: usize = 20;
/// Addresses queried concurrently per discovery round.
pub const DISCOVERY_BATCH_SIZE: usize = 20;
/// Confirmation target for fee estimation, in blocks.
pub const FEE_TARGET_BLOCKS: u32 = 5;

const RECEIVE_BRANCH: u32 = 0;
const CHANGE_BRANCH: u32 = 1;

pub struct Account<B> {
    coin: Coin,
    account_type: AccountType,
    node: ExtendedKey,
    receive_node: ExtendedKey,
    change_node: ExtendedKey,
    path: DerivationPath,
    backend: B,
}

/// Endless sequence of addresses on one branch, in index order.
pub struct AddressIter<'a, B> {
    account: &'a Account<B>,
    change: bool,
    next: u32,
}

impl<B> Iterator for AddressIter<'_, B> {
    type Item = Result<Address, WalletError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next & HARDENED_FLAG != 0 {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.account.address_at(self.change, index))
    }
}

impl<B> Account<B> {
    /// Build an account from its account-level node.
    ///
    /// `path` is the account node's absolute path, used to give the signer
    /// full paths; it may be empty when unknown.
    pub fn new(
        coin: Coin,
        node: ExtendedKey,
        account_type: AccountType,
        path: DerivationPath,
        backend: B,
    ) -> Result<Self, WalletError> {
        let params = coin.params();
        if account_type.is_segwit() && !params.segwit {
            return Err(BtcError::UnsupportedScript(format!(
                "{coin} does not support {account_type} accounts"
            ))
            .into());
        }
        if account_type == AccountType::NativeSegwit && params.bech32_prefix.is_none() {
            return Err(BtcError::UnsupportedScript(format!(
                "{coin} has no {}",
                account_type.address_version_field()
            ))
            .into());
        }

        let receive_node = node.derive_child(RECEIVE_BRANCH)?;
        let change_node = node.derive_child(CHANGE_BRANCH)?;
        Ok(Self {
            coin,
            account_type,
            node,
            receive_node,
            change_node,
            path,
            backend,
        })
    }

    /// Build an account from a serialised extended public key. The account
    /// type follows from the key's version magic.
    pub fn from_xpub(coin: Coin, xpub: &str, backend: B) -> Result<Self, WalletError> {
        let params = coin.params();
        let (magic, node) = ExtendedKey::from_xpub(xpub)?;
        let account_type = AccountType::from_xpub_magic(params, magic).ok_or_else(|| {
            WalletError::InvalidExtendedKey(format!("version {magic:#010x} is not a {coin} key"))
        })?;

        // An account-level key sits at m/purpose'/coin'/account'.
        let path = if node.depth == 3 {
            DerivationPath::new(vec![
                account_type.purpose() | HARDENED_FLAG,
                params.slip44 | HARDENED_FLAG,
                node.child_number,
            ])
        } else {
            DerivationPath::default()
        };
        Self::new(coin, node, account_type, path, backend)
    }

    pub fn coin(&self) -> Coin {
        self.coin
    }

    pub fn params(&self) -> &'static CoinParams {
        self.coin.params()
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    pub fn node(&self) -> &ExtendedKey {
        &self.node
    }

    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Absolute path of `address`.
    pub fn full_path(&self, address: &Address) -> DerivationPath {
        self.path.extend(&address.path)
    }

    pub fn address_at(&self, change: bool, index: u32) -> Result<Address, WalletError> {
        let (branch, branch_node) = if change {
            (CHANGE_BRANCH, &self.change_node)
        } else {
            (RECEIVE_BRANCH, &self.receive_node)
        };
        let node = branch_node.derive_child(index)?;
        let address = self.account_type.address(self.params(), &node.public_key)?;
        Ok(Address {
            path: vec![branch, index],
            change,
            account_type: self.account_type,
            public_key: node.public_key,
            address,
            data: None,
        })
    }

    pub fn addresses(&self, change: bool) -> AddressIter<'_, B> {
        AddressIter {
            account: self,
            change,
            next: 0,
        }
    }
}

impl<B: Backend> Account<B> {
    /// Run `op` on a held backend connection.
    async fn with_connection<T, F>(&self, op: F) -> Result<T, WalletError>
    where
        F: Future<Output = Result<T, WalletError>>,
    {
        self.backend.connect().await?;
        let result = op.await;
        self.backend.disconnect().await;
        result
    }

    async fn scan_branch(&self, change: bool) -> Result<Vec<Address>, WalletError> {
        let mut active = Vec::new();
        let mut unused = 0;
        let mut addresses = self.addresses(change);

        loop {
            let batch = addresses
                .by_ref()
                .take(DISCOVERY_BATCH_SIZE)
                .collect::<Result<Vec<_>, _>>()?;
            if batch.is_empty() {
                break;
            }
            let data = try_join_all(
                batch
                    .iter()
                    .map(|address| self.backend.get_address_data(&address.address)),
            )
            .await?;

            for (mut address, info) in batch.into_iter().zip(data) {
                if info.is_active() {
                    unused = 0;
                    address.data = Some(info);
                    active.push(address);
                } else {
                    unused += 1;
                }
            }
            if unused >= GAP_LIMIT {
                break;
            }
        }

        debug!(change, active = active.len(), "branch scanned");
        Ok(active)
    }

    /// Addresses on one branch that have ever received funds, with their
    /// backend summaries.
    pub async fn active_address_data(&self, change: bool) -> Result<Vec<Address>, WalletError> {
        self.with_connection(self.scan_branch(change)).await
    }

    async fn first_unused(&self, change: bool) -> Result<Address, WalletError> {
        for address in self.addresses(change) {
            let mut address = address?;
            let info = self.backend.get_address_data(&address.address).await?;
            if info.total_received == 0 {
                address.data = Some(info);
                return Ok(address);
            }
        }
        Err(WalletError::InvalidPath("address space exhausted".into()))
    }

    /// First address on the branch that has never received anything.
    pub async fn get_unused_address(&self, change: bool) -> Result<Address, WalletError> {
        self.with_connection(self.first_unused(change)).await
    }

    /// Confirmed plus unconfirmed balance over both branches.
    pub async fn balance(&self) -> Result<u64, WalletError> {
        self.with_connection(async {
            let mut total = 0u64;
            for change in [false, true] {
                for address in self.scan_branch(change).await? {
                    total = total
                        .checked_add(address.balance())
                        .ok_or(BtcError::AmountOverflow("account balance"))?;
                }
            }
            Ok(total)
        })
        .await
    }

    async fn collect_utxos(
        &self,
        mut progress: impl FnMut(Progress),
    ) -> Result<Vec<Utxo>, WalletError> {
        let mut counts = Progress::default();
        let mut transactions: HashMap<String, Transaction> = HashMap::new();
        let mut utxos = Vec::new();

        for change in [false, true] {
            for address in self.scan_branch(change).await? {
                counts.addresses += 1;
                progress(counts);

                for found in self.backend.get_utxos(&address.address).await? {
                    let prev_tx = match transactions.get(&found.txid) {
                        Some(tx) => tx.clone(),
                        None => {
                            let tx = self.fetch_transaction(&found.txid).await?;
                            transactions.insert(found.txid.clone(), tx.clone());
                            counts.transactions += 1;
                            progress(counts);
                            tx
                        }
                    };
                    let output = prev_tx.outputs.get(found.vout as usize).ok_or_else(|| {
                        BackendError::Protocol(format!(
                            "{} has no output {}",
                            found.txid, found.vout
                        ))
                    })?;
                    if output.value != found.value {
                        warn!(
                            txid = %found.txid,
                            vout = found.vout,
                            reported = found.value,
                            actual = output.value,
                            "utxo value differs from transaction output"
                        );
                    }
                    let value = output.value;
                    utxos.push(Utxo {
                        address: address.clone(),
                        prev_tx,
                        vout: found.vout,
                        value,
                    });
                }
            }
        }
        Ok(utxos)
    }

    async fn fetch_transaction(&self, txid: &str) -> Result<Transaction, WalletError> {
        let data = self.backend.get_transaction(txid).await?;
        let raw = hex::decode(&data.hex)
            .map_err(|e| BackendError::Protocol(format!("transaction {txid}: {e}")))?;
        let tx = Transaction::parse(&raw)?;
        if tx.txid_hex() != txid {
            return Err(BackendError::Protocol(format!(
                "asked for {txid}, got {}",
                tx.txid_hex()
            ))
            .into());
        }
        Ok(tx)
    }

    /// Every unspent output of the account's active addresses, receive
    /// branch first. `progress` sees running counts as discovery proceeds.
    pub async fn find_utxos(
        &self,
        progress: impl FnMut(Progress),
    ) -> Result<Vec<Utxo>, WalletError> {
        self.with_connection(self.collect_utxos(progress)).await
    }

    /// Fee rate per 1000 bytes. Falls back to the coin's default when the
    /// backend has no answer.
    pub async fn estimate_fee(&self) -> u64 {
        let estimate = self
            .with_connection(async {
                Ok(self.backend.estimate_fee(FEE_TARGET_BLOCKS).await?)
            })
            .await;
        let fallback = self.params().default_fee_per_kb;
        match estimate {
            Ok(fee) if fee > 0 => fee,
            Ok(_) => {
                warn!(fallback, "backend returned no fee estimate");
                fallback
            }
            Err(e) => {
                warn!(error = %e, fallback, "fee estimation failed");
                fallback
            }
        }
    }

    /// Pick UTXOs, in discovery order, covering `recipients` plus fee.
    pub async fn fund_tx(&self, recipients: &[(String, u64)]) -> Result<FundedTx, WalletError> {
        let params = self.params();
        let outputs = recipients
            .iter()
            .map(|(address, amount)| {
                Ok(TxOutput {
                    value: *amount,
                    script_pubkey: derive_output_script(params, address)?,
                })
            })
            .collect::<Result<Vec<_>, BtcError>>()?;

        self.with_connection(async {
            let fee_per_kb = self.estimate_fee().await;
            let utxos = self.collect_utxos(|_| {}).await?;
            let mut selector =
                CoinSelector::new(self.account_type, outputs, fee_per_kb, params.dust_limit)?;

            let mut selected = Vec::new();
            for utxo in utxos {
                let done = selector.add(
                    utxo.prev_tx.txid(),
                    utxo.vout,
                    utxo.value,
                    &utxo.address.public_key,
                )?;
                selected.push(utxo);
                if let Some(selection) = done {
                    info!(
                        inputs = selected.len(),
                        fee = selection.fee,
                        change = ?selection.change,
                        fee_per_kb,
                        "transaction funded"
                    );
                    return Ok(FundedTx {
                        utxos: selected,
                        change: selection.change,
                        fee: selection.fee,
                    });
                }
            }
            Err(selector.insufficient_funds().into())
        })
        .await
    }

    /// Fund a payment and resolve the change address.
    pub async fn prepare_transaction(
        &self,
        recipients: &[(String, u64)],
    ) -> Result<PreparedTx, WalletError> {
        let funded = self.fund_tx(recipients).await?;
        let change = match funded.change {
            Some(amount) => Some((self.get_unused_address(true).await?, amount)),
            None => None,
        };
        Ok(PreparedTx {
            utxos: funded.utxos,
            recipients: recipients.to_vec(),
            change,
            fee: funded.fee,
        })
    }

    /// Submit a signed transaction; returns its txid.
    pub async fn broadcast(&self, signed_tx: &[u8]) -> Result<String, WalletError> {
        let tx_hex = hex::encode(signed_tx);
        let txid = self
            .with_connection(async { Ok(self.backend.broadcast(&tx_hex).await?) })
            .await?;
        info!(%txid, "transaction broadcast");
        Ok(txid)
    }
}
