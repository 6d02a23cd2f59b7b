//! Hand-off to an external signer.
//!
//! A prepared transaction is exported two ways: as a [`SigningRequest`]
//! in the JSON shape hardware signers accept, and as a BIP-174 PSBT.

use std::collections::{BTreeMap, BTreeSet};

use chain_btc::address::{derive_address, derive_output_script, p2wpkh_redeem_script};
use chain_btc::psbt::{Bip32Derivation, Psbt};
use chain_btc::script::{get_op_return_data, is_p2pkh, is_p2sh, is_witness};
use chain_btc::utxo::RBF_SEQUENCE;
use chain_btc::{
    AccountType, Coin, InputScriptType, OutputScriptType, Transaction, TxInput, TxOutput,
};
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::error::WalletError;
use crate::types::PreparedTx;

const TX_VERSION: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    pub coin_name: String,
    pub details: SignDetails,
    pub inputs: Vec<SignInput>,
    pub outputs: Vec<SignOutput>,
    /// Previous transactions keyed by display txid.
    pub prev_txes: BTreeMap<String, PrevTx>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignDetails {
    pub version: i32,
    pub lock_time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInput {
    pub address_n: Vec<u32>,
    pub prev_hash: String,
    pub prev_index: u32,
    pub amount: u64,
    pub script_type: InputScriptType,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_n: Option<Vec<u32>>,
    pub amount: u64,
    pub script_type: OutputScriptType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_return_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrevTx {
    pub version: i32,
    pub lock_time: u32,
    pub inputs: Vec<PrevInput>,
    pub bin_outputs: Vec<PrevOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrevInput {
    pub prev_hash: String,
    pub prev_index: u32,
    pub script_sig: String,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrevOutput {
    pub amount: u64,
    pub script_pubkey: String,
}

impl From<&Transaction> for PrevTx {
    fn from(tx: &Transaction) -> Self {
        PrevTx {
            version: tx.version,
            lock_time: tx.lock_time,
            inputs: tx
                .inputs
                .iter()
                .map(|input| {
                    let mut prev_hash = input.prev_hash;
                    prev_hash.reverse();
                    PrevInput {
                        prev_hash: hex::encode(prev_hash),
                        prev_index: input.prev_index,
                        script_sig: hex::encode(&input.script_sig),
                        sequence: input.sequence,
                    }
                })
                .collect(),
            bin_outputs: tx
                .outputs
                .iter()
                .map(|output| PrevOutput {
                    amount: output.value,
                    script_pubkey: hex::encode(&output.script_pubkey),
                })
                .collect(),
        }
    }
}

/// What a signer hands back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignerOutput {
    /// One signature per input, DER plus sighash byte.
    pub signatures: Vec<Vec<u8>>,
    pub serialized_tx: Vec<u8>,
}

/// An external signing device.
pub trait Signer {
    fn sign_tx(&self, request: &SigningRequest) -> Result<SignerOutput, WalletError>;
}

/// Unsigned transaction spending `prepared.utxos`: recipients first, change last.
pub fn make_transaction(coin: Coin, prepared: &PreparedTx) -> Result<Transaction, WalletError> {
    let params = coin.params();
    let inputs = prepared
        .utxos
        .iter()
        .map(|utxo| TxInput {
            prev_hash: utxo.prev_tx.txid(),
            prev_index: utxo.vout,
            script_sig: Vec::new(),
            sequence: RBF_SEQUENCE,
        })
        .collect();

    let mut outputs = prepared
        .recipients
        .iter()
        .map(|(address, amount)| {
            Ok(TxOutput {
                value: *amount,
                script_pubkey: derive_output_script(params, address)?,
            })
        })
        .collect::<Result<Vec<_>, WalletError>>()?;
    if let Some((address, amount)) = &prepared.change {
        outputs.push(TxOutput {
            value: *amount,
            script_pubkey: address.account_type.output_script(&address.public_key)?,
        });
    }

    Ok(Transaction {
        version: TX_VERSION,
        inputs,
        outputs,
        witness: None,
        lock_time: 0,
    })
}

/// Signer request for a prepared transaction of `account`.
pub fn signing_request<B>(
    account: &Account<B>,
    prepared: &PreparedTx,
) -> Result<SigningRequest, WalletError> {
    let account_type = account.account_type();
    let tx = make_transaction(account.coin(), prepared)?;

    let inputs = prepared
        .utxos
        .iter()
        .map(|utxo| SignInput {
            address_n: account.full_path(&utxo.address).into_inner(),
            prev_hash: utxo.txid_hex(),
            prev_index: utxo.vout,
            amount: utxo.value,
            script_type: account_type.input_script_type(),
            sequence: RBF_SEQUENCE,
        })
        .collect();

    let mut outputs: Vec<SignOutput> = prepared
        .recipients
        .iter()
        .map(|(address, amount)| SignOutput {
            address: Some(address.clone()),
            address_n: None,
            amount: *amount,
            script_type: OutputScriptType::PayToAddress,
            op_return_data: None,
        })
        .collect();
    if let Some((address, amount)) = &prepared.change {
        outputs.push(SignOutput {
            address: None,
            address_n: Some(account.full_path(address).into_inner()),
            amount: *amount,
            script_type: account_type.output_script_type(),
            op_return_data: None,
        });
    }

    let prev_txes = prepared
        .utxos
        .iter()
        .map(|utxo| (utxo.txid_hex(), PrevTx::from(&utxo.prev_tx)))
        .collect();

    Ok(SigningRequest {
        coin_name: account.params().coin_name.to_string(),
        details: SignDetails {
            version: tx.version,
            lock_time: tx.lock_time,
        },
        inputs,
        outputs,
        prev_txes,
    })
}

/// PSBT for a prepared transaction, with key origins under `master_fingerprint`.
pub fn make_psbt<B>(
    account: &Account<B>,
    prepared: &PreparedTx,
    master_fingerprint: [u8; 4],
) -> Result<Psbt, WalletError> {
    let account_type = account.account_type();
    let tx = make_transaction(account.coin(), prepared)?;
    let mut psbt = Psbt::new(tx);

    for (input, utxo) in psbt.inputs.iter_mut().zip(&prepared.utxos) {
        input.non_witness_utxo = Some(utxo.prev_tx.clone());
        if account_type.is_segwit() {
            input.witness_utxo = utxo.prev_tx.outputs.get(utxo.vout as usize).cloned();
        }
        if account_type == AccountType::P2shSegwit {
            input.redeem_script = Some(p2wpkh_redeem_script(&utxo.address.public_key)?);
        }
        input.bip32_derivation.insert(
            utxo.address.public_key.to_vec(),
            Bip32Derivation {
                fingerprint: master_fingerprint,
                path: account.full_path(&utxo.address).into_inner(),
            },
        );
    }

    if let Some((address, _)) = &prepared.change {
        if let Some(output) = psbt.outputs.last_mut() {
            if account_type == AccountType::P2shSegwit {
                output.redeem_script = Some(p2wpkh_redeem_script(&address.public_key)?);
            }
            output.bip32_derivation.insert(
                address.public_key.to_vec(),
                Bip32Derivation {
                    fingerprint: master_fingerprint,
                    path: account.full_path(address).into_inner(),
                },
            );
        }
    }
    Ok(psbt)
}

fn find_path(
    derivations: &BTreeMap<Vec<u8>, Bip32Derivation>,
    fingerprint: [u8; 4],
) -> Option<Vec<u32>> {
    derivations
        .values()
        .find(|d| d.fingerprint == fingerprint)
        .map(|d| d.path.clone())
}

/// Convert a PSBT into a signer request. All key origins must share one
/// master fingerprint, and every input must carry its previous transaction.
pub fn signing_request_from_psbt(psbt: &Psbt, coin: Coin) -> Result<SigningRequest, WalletError> {
    let params = coin.params();
    let tx = &psbt.global.unsigned_tx;

    let fingerprints: BTreeSet<[u8; 4]> = psbt
        .inputs
        .iter()
        .flat_map(|i| i.bip32_derivation.values())
        .chain(psbt.outputs.iter().flat_map(|o| o.bip32_derivation.values()))
        .map(|d| d.fingerprint)
        .collect();
    let fingerprint = match fingerprints.len() {
        0 => return Err(WalletError::InvalidSigningRequest("nothing to sign".into())),
        1 => fingerprints.into_iter().next().unwrap_or_default(),
        _ => {
            let all: Vec<String> = fingerprints.iter().map(hex::encode).collect();
            return Err(WalletError::InvalidSigningRequest(format!(
                "more than one signer fingerprint: {}",
                all.join(", ")
            )));
        }
    };

    let mut inputs = Vec::with_capacity(tx.inputs.len());
    let mut prev_txes = BTreeMap::new();
    for (n, (tx_in, psbt_in)) in tx.inputs.iter().zip(&psbt.inputs).enumerate() {
        let invalid = |reason: &str| {
            WalletError::InvalidSigningRequest(format!("input #{}: {reason}", n + 1))
        };
        let prev_tx = psbt_in
            .non_witness_utxo
            .as_ref()
            .ok_or_else(|| invalid("previous transaction not provided"))?;
        if prev_tx.txid() != tx_in.prev_hash {
            return Err(invalid("previous transaction does not match"));
        }
        let spent = prev_tx
            .outputs
            .get(tx_in.prev_index as usize)
            .ok_or_else(|| invalid("previous output out of range"))?;
        let address_n = find_path(&psbt_in.bip32_derivation, fingerprint)
            .ok_or_else(|| invalid("signing path not provided"))?;
        let script_type = if is_p2pkh(&spent.script_pubkey) {
            InputScriptType::SpendAddress
        } else if is_p2sh(&spent.script_pubkey) {
            InputScriptType::SpendP2shWitness
        } else if is_witness(&spent.script_pubkey) {
            InputScriptType::SpendWitness
        } else {
            return Err(invalid("unsupported script type"));
        };

        let prev_hash = prev_tx.txid_hex();
        inputs.push(SignInput {
            address_n,
            prev_hash: prev_hash.clone(),
            prev_index: tx_in.prev_index,
            amount: spent.value,
            script_type,
            sequence: tx_in.sequence,
        });
        prev_txes.insert(prev_hash, PrevTx::from(prev_tx));
    }

    let mut outputs = Vec::with_capacity(tx.outputs.len());
    for (n, (tx_out, psbt_out)) in tx.outputs.iter().zip(&psbt.outputs).enumerate() {
        let invalid = |reason: &str| {
            WalletError::InvalidSigningRequest(format!("output #{}: {reason}", n + 1))
        };
        let script = &tx_out.script_pubkey;
        let op_return = get_op_return_data(script);
        let output = match (find_path(&psbt_out.bip32_derivation, fingerprint), op_return) {
            (Some(_), Some(_)) => return Err(invalid("OP_RETURN must not have a BIP32 path")),
            (None, Some(data)) => SignOutput {
                address: None,
                address_n: None,
                amount: tx_out.value,
                script_type: OutputScriptType::PayToOpReturn,
                op_return_data: Some(hex::encode(data)),
            },
            (Some(address_n), None) => {
                let script_type = if is_p2pkh(script) {
                    OutputScriptType::PayToAddress
                } else if is_p2sh(script) {
                    OutputScriptType::PayToP2shWitness
                } else if is_witness(script) {
                    OutputScriptType::PayToWitness
                } else {
                    return Err(invalid("unsupported script type"));
                };
                SignOutput {
                    address: None,
                    address_n: Some(address_n),
                    amount: tx_out.value,
                    script_type,
                    op_return_data: None,
                }
            }
            (None, None) => SignOutput {
                address: Some(derive_address(params, script)?),
                address_n: None,
                amount: tx_out.value,
                script_type: OutputScriptType::PayToAddress,
                op_return_data: None,
            },
        };
        outputs.push(output);
    }

    Ok(SigningRequest {
        coin_name: params.coin_name.to_string(),
        details: SignDetails {
            version: tx.version,
            lock_time: tx.lock_time,
        },
        inputs,
        outputs,
        prev_txes,
    })
}

impl<B: blockbook_client::Backend> Account<B> {
    /// Sign a prepared transaction with `signer` and broadcast the result.
    pub async fn send(
        &self,
        signer: &impl Signer,
        prepared: &PreparedTx,
    ) -> Result<String, WalletError> {
        let request = signing_request(self, prepared)?;
        let signed = signer.sign_tx(&request)?;
        if signed.serialized_tx.is_empty() {
            return Err(WalletError::InvalidSigningRequest(
                "signer returned no transaction".into(),
            ));
        }
        self.broadcast(&signed.serialized_tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hd_derivation::HARDENED_FLAG;
    use crate::testing::{funding_tx, MockBackend, MTUB, ZPUB};
    use crate::types::Utxo;
    use chain_btc::script::{push_data, OP_RETURN};

    const FINGERPRINT: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];
    const RECIPIENT: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

    fn prepared(account: &Account<MockBackend>) -> PreparedTx {
        let owner = account.address_at(false, 2).unwrap();
        let script = account.account_type().output_script(&owner.public_key).unwrap();
        let prev_tx = funding_tx(&script, &[5_000, 20_000], 7);
        let change = account.address_at(true, 1).unwrap();
        PreparedTx {
            utxos: vec![Utxo {
                address: owner,
                prev_tx,
                vout: 1,
                value: 20_000,
            }],
            recipients: vec![(RECIPIENT.to_string(), 12_000)],
            change: Some((change, 7_800)),
            fee: 200,
        }
    }

    fn zpub_account() -> Account<MockBackend> {
        Account::from_xpub(Coin::Bitcoin, ZPUB, MockBackend::default()).unwrap()
    }

    #[test]
    fn transaction_layout() {
        let account = zpub_account();
        let prepared = prepared(&account);
        let tx = make_transaction(Coin::Bitcoin, &prepared).unwrap();

        assert_eq!(tx.version, 2);
        assert_eq!(tx.lock_time, 0);
        assert!(tx.witness.is_none());
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.inputs[0].prev_hash, prepared.utxos[0].prev_tx.txid());
        assert_eq!(tx.inputs[0].prev_index, 1);
        assert_eq!(tx.inputs[0].sequence, 0xffff_fffd);
        assert!(tx.inputs[0].script_sig.is_empty());

        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, 12_000);
        assert_eq!(
            hex::encode(&tx.outputs[0].script_pubkey),
            "0014751e76e8199196d454941c45d1b3a323f1433bd6"
        );
        assert_eq!(tx.outputs[1].value, 7_800);
        let (change, _) = prepared.change.as_ref().unwrap();
        assert_eq!(
            derive_address(Coin::Bitcoin.params(), &tx.outputs[1].script_pubkey).unwrap(),
            change.address
        );
    }

    #[test]
    fn request_shape() {
        let account = zpub_account();
        let prepared = prepared(&account);
        let request = signing_request(&account, &prepared).unwrap();

        assert_eq!(request.coin_name, "Bitcoin");
        assert_eq!(request.details, SignDetails { version: 2, lock_time: 0 });

        let input = &request.inputs[0];
        assert_eq!(
            input.address_n,
            [84 | HARDENED_FLAG, HARDENED_FLAG, 15 | HARDENED_FLAG, 0, 2]
        );
        assert_eq!(input.amount, 20_000);
        assert_eq!(input.prev_index, 1);
        assert_eq!(input.script_type, InputScriptType::SpendWitness);
        assert_eq!(input.prev_hash, prepared.utxos[0].txid_hex());

        assert_eq!(request.outputs[0].address.as_deref(), Some(RECIPIENT));
        assert_eq!(request.outputs[0].script_type, OutputScriptType::PayToAddress);
        assert_eq!(
            request.outputs[1].address_n.as_deref(),
            Some(&[84 | HARDENED_FLAG, HARDENED_FLAG, 15 | HARDENED_FLAG, 1, 1][..])
        );
        assert_eq!(request.outputs[1].script_type, OutputScriptType::PayToWitness);

        let prev = &request.prev_txes[&input.prev_hash];
        assert_eq!(prev.bin_outputs.len(), 2);
        assert_eq!(prev.bin_outputs[1].amount, 20_000);
    }

    #[test]
    fn request_json() {
        let account = zpub_account();
        let request = signing_request(&account, &prepared(&account)).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["inputs"][0]["script_type"], "SPENDWITNESS");
        assert_eq!(json["outputs"][0]["script_type"], "PAYTOADDRESS");
        assert!(json["outputs"][0].get("address_n").is_none());
        assert!(json["outputs"][1].get("address").is_none());

        let back: SigningRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn psbt_annotations() {
        let account = zpub_account();
        let prepared = prepared(&account);
        let psbt = make_psbt(&account, &prepared, FINGERPRINT).unwrap();

        let input = &psbt.inputs[0];
        assert_eq!(input.non_witness_utxo.as_ref(), Some(&prepared.utxos[0].prev_tx));
        assert_eq!(input.witness_utxo.as_ref().map(|o| o.value), Some(20_000));
        assert!(input.redeem_script.is_none());
        let origin = &input.bip32_derivation[&prepared.utxos[0].address.public_key.to_vec()];
        assert_eq!(origin.fingerprint, FINGERPRINT);
        assert_eq!(origin.path.len(), 5);

        assert!(psbt.outputs[0].bip32_derivation.is_empty());
        assert_eq!(psbt.outputs[1].bip32_derivation.len(), 1);

        let bytes = psbt.serialize().unwrap();
        assert_eq!(&bytes[..5], b"psbt\xff");
        assert_eq!(Psbt::parse(&bytes).unwrap(), psbt);
    }

    #[test]
    fn p2sh_psbt_carries_redeem_scripts() {
        let account = Account::from_xpub(Coin::Litecoin, MTUB, MockBackend::default()).unwrap();
        let owner = account.address_at(false, 0).unwrap();
        let script = account.account_type().output_script(&owner.public_key).unwrap();
        let change = account.address_at(true, 0).unwrap();
        let prepared = PreparedTx {
            utxos: vec![Utxo {
                address: owner.clone(),
                prev_tx: funding_tx(&script, &[50_000], 3),
                vout: 0,
                value: 50_000,
            }],
            recipients: vec![("MAKwjwSPUsrjkWopYEQTCdu9HVkaGNV8Ja".into(), 10_000)],
            change: Some((change.clone(), 30_000)),
            fee: 10_000,
        };
        let psbt = make_psbt(&account, &prepared, FINGERPRINT).unwrap();
        assert_eq!(
            psbt.inputs[0].redeem_script,
            Some(p2wpkh_redeem_script(&owner.public_key).unwrap())
        );
        assert_eq!(
            psbt.outputs[1].redeem_script,
            Some(p2wpkh_redeem_script(&change.public_key).unwrap())
        );

        let request = signing_request_from_psbt(&psbt, Coin::Litecoin).unwrap();
        assert_eq!(request.inputs[0].script_type, InputScriptType::SpendP2shWitness);
        assert_eq!(request.outputs[1].script_type, OutputScriptType::PayToP2shWitness);
    }

    #[test]
    fn psbt_converts_back_to_request() {
        let account = zpub_account();
        let prepared = prepared(&account);
        let direct = signing_request(&account, &prepared).unwrap();

        let psbt = make_psbt(&account, &prepared, FINGERPRINT).unwrap();
        let parsed = Psbt::parse(&psbt.serialize().unwrap()).unwrap();
        let from_psbt = signing_request_from_psbt(&parsed, Coin::Bitcoin).unwrap();

        assert_eq!(from_psbt, direct);
    }

    #[test]
    fn psbt_request_needs_previous_transaction() {
        let account = zpub_account();
        let mut psbt = make_psbt(&account, &prepared(&account), FINGERPRINT).unwrap();
        psbt.inputs[0].non_witness_utxo = None;
        let err = signing_request_from_psbt(&psbt, Coin::Bitcoin).unwrap_err();
        assert!(err.to_string().contains("previous transaction not provided"));
    }

    #[test]
    fn psbt_request_rejects_mixed_signers() {
        let account = zpub_account();
        let mut psbt = make_psbt(&account, &prepared(&account), FINGERPRINT).unwrap();
        for derivation in psbt.outputs[1].bip32_derivation.values_mut() {
            derivation.fingerprint = [1, 2, 3, 4];
        }
        let err = signing_request_from_psbt(&psbt, Coin::Bitcoin).unwrap_err();
        assert!(err.to_string().contains("more than one signer fingerprint"));
    }

    #[test]
    fn psbt_request_without_origins() {
        let account = zpub_account();
        let tx = make_transaction(Coin::Bitcoin, &prepared(&account)).unwrap();
        let err = signing_request_from_psbt(&Psbt::new(tx), Coin::Bitcoin).unwrap_err();
        assert!(err.to_string().contains("nothing to sign"));
    }

    #[test]
    fn op_return_output() {
        let account = zpub_account();
        let mut psbt = make_psbt(&account, &prepared(&account), FINGERPRINT).unwrap();
        let mut script = vec![OP_RETURN];
        script.extend(push_data(b"hello"));
        psbt.global.unsigned_tx.outputs[0] = TxOutput {
            value: 0,
            script_pubkey: script,
        };

        let request = signing_request_from_psbt(&psbt, Coin::Bitcoin).unwrap();
        let output = &request.outputs[0];
        assert_eq!(output.script_type, OutputScriptType::PayToOpReturn);
        assert_eq!(output.op_return_data.as_deref(), Some("68656c6c6f"));
        assert!(output.address.is_none());
    }

    struct FixedSigner(Vec<u8>);

    impl Signer for FixedSigner {
        fn sign_tx(&self, request: &SigningRequest) -> Result<SignerOutput, WalletError> {
            assert_eq!(request.inputs.len(), 1);
            Ok(SignerOutput {
                signatures: vec![vec![0x30; 71]],
                serialized_tx: self.0.clone(),
            })
        }
    }

    #[tokio::test]
    async fn send_broadcasts_signed_transaction() {
        let account = zpub_account();
        let prepared = prepared(&account);
        let signed = make_transaction(Coin::Bitcoin, &prepared)
            .unwrap()
            .serialize()
            .unwrap();

        let txid = account
            .send(&FixedSigner(signed.clone()), &prepared)
            .await
            .unwrap();
        assert_eq!(txid, Transaction::parse(&signed).unwrap().txid_hex());

        let err = account
            .send(&FixedSigner(Vec::new()), &prepared)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidSigningRequest(_)));
    }
}
