//! Partially Signed Bitcoin Transactions (BIP-174), version 0.
//!
//! Every map is decoded against a closed field table. Proprietary keys
//! (type `0xFC`) and unrecognised keys are kept in insertion order so that
//! re-encoding loses nothing. Encoding emits known fields in table order,
//! then unknown fields, then proprietary fields.

use std::collections::{BTreeMap, HashSet};

use crate::encoding::{write_compact_size, write_var_bytes, DecodeError, Reader};
use crate::error::BtcError;
use crate::transaction::{Transaction, TxOutput};

const PSBT_MAGIC: [u8; 5] = *b"psbt\xff";

const PSBT_GLOBAL_UNSIGNED_TX: u64 = 0x00;
const PSBT_GLOBAL_XPUB: u64 = 0x01;
const PSBT_GLOBAL_VERSION: u64 = 0xfb;

const PSBT_IN_NON_WITNESS_UTXO: u64 = 0x00;
const PSBT_IN_WITNESS_UTXO: u64 = 0x01;
const PSBT_IN_PARTIAL_SIG: u64 = 0x02;
const PSBT_IN_SIGHASH_TYPE: u64 = 0x03;
const PSBT_IN_REDEEM_SCRIPT: u64 = 0x04;
const PSBT_IN_WITNESS_SCRIPT: u64 = 0x05;
const PSBT_IN_BIP32_DERIVATION: u64 = 0x06;
const PSBT_IN_FINAL_SCRIPTSIG: u64 = 0x07;
const PSBT_IN_FINAL_SCRIPTWITNESS: u64 = 0x08;

const PSBT_OUT_REDEEM_SCRIPT: u64 = 0x00;
const PSBT_OUT_WITNESS_SCRIPT: u64 = 0x01;
const PSBT_OUT_BIP32_DERIVATION: u64 = 0x02;

const PSBT_PROPRIETARY: u64 = 0xfc;

/// Extended key serialization length, the key of a global xpub entry.
const XPUB_LEN: usize = 78;

/// Master key fingerprint plus the full derivation path of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bip32Derivation {
    pub fingerprint: [u8; 4],
    pub path: Vec<u32>,
}

/// A vendor-specific field: `0xFC <prefix> <subtype> <key data>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProprietaryField {
    pub prefix: Vec<u8>,
    pub subtype: u64,
    pub key_data: Vec<u8>,
    pub value: Vec<u8>,
}

/// A field this codec does not interpret, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField {
    pub key_type: u64,
    pub key_data: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsbtGlobal {
    pub unsigned_tx: Transaction,
    /// Serialized extended public key to its origin.
    pub xpubs: BTreeMap<Vec<u8>, Bip32Derivation>,
    pub version: Option<u32>,
    pub proprietary: Vec<ProprietaryField>,
    pub unknown: Vec<UnknownField>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsbtInput {
    pub non_witness_utxo: Option<Transaction>,
    pub witness_utxo: Option<TxOutput>,
    pub partial_sigs: BTreeMap<Vec<u8>, Vec<u8>>,
    pub sighash_type: Option<u32>,
    pub redeem_script: Option<Vec<u8>>,
    pub witness_script: Option<Vec<u8>>,
    pub bip32_derivation: BTreeMap<Vec<u8>, Bip32Derivation>,
    pub final_script_sig: Option<Vec<u8>>,
    pub final_script_witness: Option<Vec<Vec<u8>>>,
    pub proprietary: Vec<ProprietaryField>,
    pub unknown: Vec<UnknownField>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsbtOutput {
    pub redeem_script: Option<Vec<u8>>,
    pub witness_script: Option<Vec<u8>>,
    pub bip32_derivation: BTreeMap<Vec<u8>, Bip32Derivation>,
    pub proprietary: Vec<ProprietaryField>,
    pub unknown: Vec<UnknownField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Psbt {
    pub global: PsbtGlobal,
    pub inputs: Vec<PsbtInput>,
    pub outputs: Vec<PsbtOutput>,
}

impl Psbt {
    /// Wrap an unsigned transaction with one empty map per input and output.
    pub fn new(unsigned_tx: Transaction) -> Self {
        let inputs = vec![PsbtInput::default(); unsigned_tx.inputs.len()];
        let outputs = vec![PsbtOutput::default(); unsigned_tx.outputs.len()];
        Self {
            global: PsbtGlobal {
                unsigned_tx,
                xpubs: BTreeMap::new(),
                version: None,
                proprietary: Vec::new(),
                unknown: Vec::new(),
            },
            inputs,
            outputs,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, BtcError> {
        read_psbt(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, BtcError> {
        write_psbt(self)
    }
}

fn malformed(err: DecodeError) -> BtcError {
    BtcError::MalformedPsbt(err.to_string())
}

/// One undecoded key-value pair.
struct RawPair<'a> {
    key_type: u64,
    key_data: &'a [u8],
    value: &'a [u8],
}

impl RawPair<'_> {
    fn unkeyed(&self, field: &str) -> Result<(), BtcError> {
        if self.key_data.is_empty() {
            Ok(())
        } else {
            Err(BtcError::MalformedPsbt(format!(
                "{field} carries {} bytes of key data",
                self.key_data.len()
            )))
        }
    }

    fn keyed(&self, field: &str) -> Result<Vec<u8>, BtcError> {
        if self.key_data.is_empty() {
            return Err(BtcError::MalformedPsbt(format!("{field} is missing its key")));
        }
        Ok(self.key_data.to_vec())
    }

    fn into_unknown(self) -> UnknownField {
        UnknownField {
            key_type: self.key_type,
            key_data: self.key_data.to_vec(),
            value: self.value.to_vec(),
        }
    }

    fn into_proprietary(self) -> Result<ProprietaryField, BtcError> {
        let mut reader = Reader::new(self.key_data);
        let prefix = reader.read_var_bytes().map_err(malformed)?.to_vec();
        let subtype = reader.read_compact_size().map_err(malformed)?;
        let key_data = reader.read_bytes(reader.remaining()).map_err(malformed)?.to_vec();
        Ok(ProprietaryField {
            prefix,
            subtype,
            key_data,
            value: self.value.to_vec(),
        })
    }
}

fn read_map<'a>(reader: &mut Reader<'a>, map: &'static str) -> Result<Vec<RawPair<'a>>, BtcError> {
    let mut pairs = Vec::new();
    let mut seen = HashSet::new();
    loop {
        let key = reader.read_var_bytes().map_err(malformed)?;
        if key.is_empty() {
            return Ok(pairs);
        }
        let mut key_reader = Reader::new(key);
        let key_type = key_reader.read_compact_size().map_err(malformed)?;
        let key_data = key_reader
            .read_bytes(key_reader.remaining())
            .map_err(malformed)?;
        let value = reader.read_var_bytes().map_err(malformed)?;

        if !seen.insert((key_type, key_data)) {
            return Err(BtcError::DuplicateKey {
                map,
                key: hex::encode(key),
            });
        }
        pairs.push(RawPair {
            key_type,
            key_data,
            value,
        });
    }
}

fn read_value<T>(
    value: &[u8],
    field: &str,
    decode: impl FnOnce(&mut Reader<'_>) -> Result<T, DecodeError>,
) -> Result<T, BtcError> {
    let mut reader = Reader::new(value);
    let decoded =
        decode(&mut reader).map_err(|e| BtcError::MalformedPsbt(format!("{field}: {e}")))?;
    if !reader.is_empty() {
        return Err(BtcError::MalformedPsbt(format!(
            "{field}: {} trailing bytes",
            reader.remaining()
        )));
    }
    Ok(decoded)
}

fn read_u32_value(value: &[u8], field: &str) -> Result<u32, BtcError> {
    read_value(value, field, |r| r.read_u32_le())
}

fn read_transaction(value: &[u8], field: &str) -> Result<Transaction, BtcError> {
    Transaction::parse(value).map_err(|e| BtcError::MalformedPsbt(format!("{field}: {e}")))
}

fn read_derivation(value: &[u8]) -> Result<Bip32Derivation, BtcError> {
    if value.len() < 4 || value.len() % 4 != 0 {
        return Err(BtcError::MalformedPsbt(format!(
            "BIP32 derivation of {} bytes",
            value.len()
        )));
    }
    read_value(value, "BIP32 derivation", |r| {
        let fingerprint = r.read_array()?;
        let mut path = Vec::with_capacity(r.remaining() / 4);
        while !r.is_empty() {
            path.push(r.read_u32_le()?);
        }
        Ok(Bip32Derivation { fingerprint, path })
    })
}

fn read_witness_stack(value: &[u8]) -> Result<Vec<Vec<u8>>, BtcError> {
    read_value(value, "final script witness", |r| {
        let count = r.read_length()?;
        let mut items = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            items.push(r.read_var_bytes()?.to_vec());
        }
        Ok(items)
    })
}

fn decode_global(pairs: Vec<RawPair<'_>>) -> Result<PsbtGlobal, BtcError> {
    let mut unsigned_tx = None;
    let mut xpubs = BTreeMap::new();
    let mut version = None;
    let mut proprietary = Vec::new();
    let mut unknown = Vec::new();

    for pair in pairs {
        match pair.key_type {
            PSBT_GLOBAL_UNSIGNED_TX => {
                pair.unkeyed("unsigned transaction")?;
                let tx = read_transaction(pair.value, "unsigned transaction")?;
                if tx.witness.is_some() {
                    return Err(BtcError::MalformedPsbt(
                        "unsigned transaction uses the witness serialization".into(),
                    ));
                }
                unsigned_tx = Some(tx);
            }
            PSBT_GLOBAL_XPUB => {
                let xpub = pair.keyed("xpub")?;
                if xpub.len() != XPUB_LEN {
                    return Err(BtcError::MalformedPsbt(format!(
                        "xpub key of {} bytes",
                        xpub.len()
                    )));
                }
                xpubs.insert(xpub, read_derivation(pair.value)?);
            }
            PSBT_GLOBAL_VERSION => {
                pair.unkeyed("version")?;
                version = Some(read_u32_value(pair.value, "version")?);
            }
            PSBT_PROPRIETARY => proprietary.push(pair.into_proprietary()?),
            _ => unknown.push(pair.into_unknown()),
        }
    }

    let unsigned_tx = unsigned_tx
        .ok_or_else(|| BtcError::MalformedPsbt("missing unsigned transaction".into()))?;
    Ok(PsbtGlobal {
        unsigned_tx,
        xpubs,
        version,
        proprietary,
        unknown,
    })
}

fn decode_input(pairs: Vec<RawPair<'_>>) -> Result<PsbtInput, BtcError> {
    let mut input = PsbtInput::default();
    for pair in pairs {
        match pair.key_type {
            PSBT_IN_NON_WITNESS_UTXO => {
                pair.unkeyed("non-witness UTXO")?;
                input.non_witness_utxo = Some(read_transaction(pair.value, "non-witness UTXO")?);
            }
            PSBT_IN_WITNESS_UTXO => {
                pair.unkeyed("witness UTXO")?;
                input.witness_utxo =
                    Some(read_value(pair.value, "witness UTXO", TxOutput::read_from)?);
            }
            PSBT_IN_PARTIAL_SIG => {
                let pubkey = pair.keyed("partial signature")?;
                input.partial_sigs.insert(pubkey, pair.value.to_vec());
            }
            PSBT_IN_SIGHASH_TYPE => {
                pair.unkeyed("sighash type")?;
                input.sighash_type = Some(read_u32_value(pair.value, "sighash type")?);
            }
            PSBT_IN_REDEEM_SCRIPT => {
                pair.unkeyed("redeem script")?;
                input.redeem_script = Some(pair.value.to_vec());
            }
            PSBT_IN_WITNESS_SCRIPT => {
                pair.unkeyed("witness script")?;
                input.witness_script = Some(pair.value.to_vec());
            }
            PSBT_IN_BIP32_DERIVATION => {
                let pubkey = pair.keyed("BIP32 derivation")?;
                input
                    .bip32_derivation
                    .insert(pubkey, read_derivation(pair.value)?);
            }
            PSBT_IN_FINAL_SCRIPTSIG => {
                pair.unkeyed("final scriptSig")?;
                input.final_script_sig = Some(pair.value.to_vec());
            }
            PSBT_IN_FINAL_SCRIPTWITNESS => {
                pair.unkeyed("final script witness")?;
                input.final_script_witness = Some(read_witness_stack(pair.value)?);
            }
            PSBT_PROPRIETARY => input.proprietary.push(pair.into_proprietary()?),
            _ => input.unknown.push(pair.into_unknown()),
        }
    }
    Ok(input)
}

fn decode_output(pairs: Vec<RawPair<'_>>) -> Result<PsbtOutput, BtcError> {
    let mut output = PsbtOutput::default();
    for pair in pairs {
        match pair.key_type {
            PSBT_OUT_REDEEM_SCRIPT => {
                pair.unkeyed("redeem script")?;
                output.redeem_script = Some(pair.value.to_vec());
            }
            PSBT_OUT_WITNESS_SCRIPT => {
                pair.unkeyed("witness script")?;
                output.witness_script = Some(pair.value.to_vec());
            }
            PSBT_OUT_BIP32_DERIVATION => {
                let pubkey = pair.keyed("BIP32 derivation")?;
                output
                    .bip32_derivation
                    .insert(pubkey, read_derivation(pair.value)?);
            }
            PSBT_PROPRIETARY => output.proprietary.push(pair.into_proprietary()?),
            _ => output.unknown.push(pair.into_unknown()),
        }
    }
    Ok(output)
}

/// Decode a binary PSBT.
pub fn read_psbt(bytes: &[u8]) -> Result<Psbt, BtcError> {
    let mut reader = Reader::new(bytes);
    let magic = reader.read_bytes(PSBT_MAGIC.len()).map_err(malformed)?;
    if magic != PSBT_MAGIC {
        return Err(BtcError::MalformedPsbt("missing psbt magic".into()));
    }

    let global = decode_global(read_map(&mut reader, "global")?)?;
    let input_count = global.unsigned_tx.inputs.len();
    let output_count = global.unsigned_tx.outputs.len();

    let mut inputs = Vec::with_capacity(input_count);
    let mut outputs = Vec::with_capacity(output_count);
    let mut found = 1;
    while !reader.is_empty() {
        if found <= input_count {
            inputs.push(decode_input(read_map(&mut reader, "input")?)?);
        } else {
            outputs.push(decode_output(read_map(&mut reader, "output")?)?);
        }
        found += 1;
    }

    let expected = 1 + input_count + output_count;
    if found != expected {
        return Err(BtcError::PsbtLengthMismatch { expected, found });
    }

    Ok(Psbt {
        global,
        inputs,
        outputs,
    })
}

fn write_pair(buf: &mut Vec<u8>, key_type: u64, key_data: &[u8], value: &[u8]) {
    let mut key = Vec::with_capacity(key_data.len() + 1);
    write_compact_size(&mut key, key_type);
    key.extend_from_slice(key_data);
    write_var_bytes(buf, &key);
    write_var_bytes(buf, value);
}

fn encode_derivation(derivation: &Bip32Derivation) -> Vec<u8> {
    let mut value = Vec::with_capacity(4 + 4 * derivation.path.len());
    value.extend_from_slice(&derivation.fingerprint);
    for index in &derivation.path {
        value.extend_from_slice(&index.to_le_bytes());
    }
    value
}

fn write_trailer(buf: &mut Vec<u8>, unknown: &[UnknownField], proprietary: &[ProprietaryField]) {
    for field in unknown {
        write_pair(buf, field.key_type, &field.key_data, &field.value);
    }
    for field in proprietary {
        let mut key_data = Vec::new();
        write_var_bytes(&mut key_data, &field.prefix);
        write_compact_size(&mut key_data, field.subtype);
        key_data.extend_from_slice(&field.key_data);
        write_pair(buf, PSBT_PROPRIETARY, &key_data, &field.value);
    }
    buf.push(0x00);
}

fn write_global(buf: &mut Vec<u8>, global: &PsbtGlobal) -> Result<(), BtcError> {
    if global.unsigned_tx.witness.is_some() {
        return Err(BtcError::MalformedPsbt(
            "unsigned transaction must not carry witness data".into(),
        ));
    }
    let tx = global.unsigned_tx.serialize_without_witness();
    write_pair(buf, PSBT_GLOBAL_UNSIGNED_TX, &[], &tx);
    for (xpub, derivation) in &global.xpubs {
        write_pair(buf, PSBT_GLOBAL_XPUB, xpub, &encode_derivation(derivation));
    }
    if let Some(version) = global.version {
        write_pair(buf, PSBT_GLOBAL_VERSION, &[], &version.to_le_bytes());
    }
    write_trailer(buf, &global.unknown, &global.proprietary);
    Ok(())
}

fn write_input(buf: &mut Vec<u8>, input: &PsbtInput) -> Result<(), BtcError> {
    if let Some(tx) = &input.non_witness_utxo {
        write_pair(buf, PSBT_IN_NON_WITNESS_UTXO, &[], &tx.serialize()?);
    }
    if let Some(utxo) = &input.witness_utxo {
        let mut value = Vec::new();
        utxo.write_to(&mut value);
        write_pair(buf, PSBT_IN_WITNESS_UTXO, &[], &value);
    }
    for (pubkey, signature) in &input.partial_sigs {
        write_pair(buf, PSBT_IN_PARTIAL_SIG, pubkey, signature);
    }
    if let Some(sighash) = input.sighash_type {
        write_pair(buf, PSBT_IN_SIGHASH_TYPE, &[], &sighash.to_le_bytes());
    }
    if let Some(script) = &input.redeem_script {
        write_pair(buf, PSBT_IN_REDEEM_SCRIPT, &[], script);
    }
    if let Some(script) = &input.witness_script {
        write_pair(buf, PSBT_IN_WITNESS_SCRIPT, &[], script);
    }
    for (pubkey, derivation) in &input.bip32_derivation {
        write_pair(buf, PSBT_IN_BIP32_DERIVATION, pubkey, &encode_derivation(derivation));
    }
    if let Some(script) = &input.final_script_sig {
        write_pair(buf, PSBT_IN_FINAL_SCRIPTSIG, &[], script);
    }
    if let Some(stack) = &input.final_script_witness {
        let mut value = Vec::new();
        write_compact_size(&mut value, stack.len() as u64);
        for item in stack {
            write_var_bytes(&mut value, item);
        }
        write_pair(buf, PSBT_IN_FINAL_SCRIPTWITNESS, &[], &value);
    }
    write_trailer(buf, &input.unknown, &input.proprietary);
    Ok(())
}

fn write_output(buf: &mut Vec<u8>, output: &PsbtOutput) {
    if let Some(script) = &output.redeem_script {
        write_pair(buf, PSBT_OUT_REDEEM_SCRIPT, &[], script);
    }
    if let Some(script) = &output.witness_script {
        write_pair(buf, PSBT_OUT_WITNESS_SCRIPT, &[], script);
    }
    for (pubkey, derivation) in &output.bip32_derivation {
        write_pair(buf, PSBT_OUT_BIP32_DERIVATION, pubkey, &encode_derivation(derivation));
    }
    write_trailer(buf, &output.unknown, &output.proprietary);
}

/// Encode a PSBT. The per-input and per-output maps must match the
/// unsigned transaction.
pub fn write_psbt(psbt: &Psbt) -> Result<Vec<u8>, BtcError> {
    let tx = &psbt.global.unsigned_tx;
    if psbt.inputs.len() != tx.inputs.len() || psbt.outputs.len() != tx.outputs.len() {
        return Err(BtcError::PsbtLengthMismatch {
            expected: 1 + tx.inputs.len() + tx.outputs.len(),
            found: 1 + psbt.inputs.len() + psbt.outputs.len(),
        });
    }

    let mut buf = PSBT_MAGIC.to_vec();
    write_global(&mut buf, &psbt.global)?;
    for input in &psbt.inputs {
        write_input(&mut buf, input)?;
    }
    for output in &psbt.outputs {
        write_output(&mut buf, output);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script;
    use crate::transaction::TxInput;

    const PUBKEY: &str = "02b2740e316bc5736e9a4c6eff461a20ee16661ba22bd0cb6d715a9d51e46d685c";

    fn unsigned_tx(inputs: usize, outputs: usize) -> Transaction {
        Transaction {
            version: 2,
            inputs: (0..inputs)
                .map(|i| TxInput {
                    prev_hash: [i as u8 + 1; 32],
                    prev_index: i as u32,
                    script_sig: vec![],
                    sequence: 0xFFFF_FFFD,
                })
                .collect(),
            outputs: (0..outputs)
                .map(|i| TxOutput {
                    value: 10_000 * (i as u64 + 1),
                    script_pubkey: script::p2wpkh_script(&[i as u8; 20]),
                })
                .collect(),
            witness: None,
            lock_time: 0,
        }
    }

    fn derivation(path: &[u32]) -> Bip32Derivation {
        Bip32Derivation {
            fingerprint: [0xd4, 0xc3, 0xec, 0xa0],
            path: path.to_vec(),
        }
    }

    fn populated() -> Psbt {
        let pubkey = hex::decode(PUBKEY).unwrap();
        let mut psbt = Psbt::new(unsigned_tx(2, 2));
        psbt.global.xpubs.insert(vec![0x04; XPUB_LEN], derivation(&[0x8000_0054]));
        psbt.global.version = Some(0);
        psbt.global.unknown.push(UnknownField {
            key_type: 0x20,
            key_data: vec![1, 2, 3],
            value: vec![4, 5],
        });
        psbt.global.proprietary.push(ProprietaryField {
            prefix: b"vendor".to_vec(),
            subtype: 7,
            key_data: vec![0xaa],
            value: vec![0xbb],
        });

        let input = &mut psbt.inputs[0];
        input.non_witness_utxo = Some(unsigned_tx(1, 3));
        input.witness_utxo = Some(TxOutput {
            value: 30_000,
            script_pubkey: script::p2wpkh_script(&[2; 20]),
        });
        input.partial_sigs.insert(pubkey.clone(), vec![0x30; 71]);
        input.sighash_type = Some(1);
        input.redeem_script = Some(vec![0x00, 0x14]);
        input.witness_script = Some(vec![0x51]);
        input
            .bip32_derivation
            .insert(pubkey.clone(), derivation(&[0x8000_0054, 0x8000_0000, 0x8000_000f, 0, 3]));
        input.final_script_sig = Some(vec![]);
        input.final_script_witness = Some(vec![vec![1; 72], vec![], pubkey.clone()]);

        psbt.outputs[1].redeem_script = Some(vec![0x00, 0x14]);
        psbt.outputs[1].witness_script = Some(vec![0x52]);
        psbt.outputs[1]
            .bip32_derivation
            .insert(pubkey, derivation(&[0x8000_0054, 0x8000_0000, 0x8000_000f, 1, 0]));
        psbt.outputs[1].unknown.push(UnknownField {
            key_type: 0x99,
            key_data: vec![],
            value: vec![9; 3],
        });
        psbt
    }

    #[test]
    fn roundtrip_all_field_types() {
        let psbt = populated();
        let bytes = write_psbt(&psbt).unwrap();
        assert_eq!(&bytes[..5], b"psbt\xff");
        let decoded = read_psbt(&bytes).unwrap();
        assert_eq!(decoded, psbt);
        assert_eq!(write_psbt(&decoded).unwrap(), bytes);
    }

    #[test]
    fn empty_maps_roundtrip() {
        let psbt = Psbt::new(unsigned_tx(1, 1));
        let bytes = psbt.serialize().unwrap();
        // Magic, one unsigned tx pair plus terminator, then two empty maps.
        assert_eq!(&bytes[bytes.len() - 3..], &[0x00, 0x00, 0x00]);
        assert_eq!(Psbt::parse(&bytes).unwrap(), psbt);
    }

    #[test]
    fn unknown_fields_keep_insertion_order() {
        let mut psbt = Psbt::new(unsigned_tx(1, 1));
        for key_type in [0x40, 0x30, 0x50] {
            psbt.inputs[0].unknown.push(UnknownField {
                key_type,
                key_data: vec![],
                value: vec![key_type as u8],
            });
        }
        let decoded = read_psbt(&write_psbt(&psbt).unwrap()).unwrap();
        let order: Vec<u64> = decoded.inputs[0].unknown.iter().map(|f| f.key_type).collect();
        assert_eq!(order, vec![0x40, 0x30, 0x50]);
    }

    #[test]
    fn extra_map_is_length_mismatch() {
        let mut bytes = write_psbt(&Psbt::new(unsigned_tx(1, 1))).unwrap();
        bytes.push(0x00);
        assert!(matches!(
            read_psbt(&bytes),
            Err(BtcError::PsbtLengthMismatch {
                expected: 3,
                found: 4
            })
        ));
    }

    #[test]
    fn missing_map_is_length_mismatch() {
        let mut bytes = write_psbt(&Psbt::new(unsigned_tx(2, 1))).unwrap();
        bytes.pop();
        assert!(matches!(
            read_psbt(&bytes),
            Err(BtcError::PsbtLengthMismatch {
                expected: 4,
                found: 3
            })
        ));
    }

    #[test]
    fn write_rejects_map_count_mismatch() {
        let mut psbt = Psbt::new(unsigned_tx(1, 1));
        psbt.outputs.push(PsbtOutput::default());
        assert!(matches!(
            write_psbt(&psbt),
            Err(BtcError::PsbtLengthMismatch { .. })
        ));
    }

    #[test]
    fn duplicate_key_rejected() {
        let tx = unsigned_tx(1, 1);
        let mut bytes = PSBT_MAGIC.to_vec();
        write_pair(&mut bytes, PSBT_GLOBAL_UNSIGNED_TX, &[], &tx.serialize_without_witness());
        bytes.push(0x00);
        write_pair(&mut bytes, PSBT_IN_SIGHASH_TYPE, &[], &1u32.to_le_bytes());
        write_pair(&mut bytes, PSBT_IN_SIGHASH_TYPE, &[], &2u32.to_le_bytes());
        bytes.push(0x00);
        bytes.push(0x00);

        let err = read_psbt(&bytes).unwrap_err();
        assert!(matches!(err, BtcError::DuplicateKey { map: "input", ref key } if key == "03"));
    }

    #[test]
    fn same_type_different_key_data_is_not_duplicate() {
        let mut psbt = Psbt::new(unsigned_tx(1, 1));
        psbt.inputs[0].partial_sigs.insert(vec![0x02; 33], vec![1]);
        psbt.inputs[0].partial_sigs.insert(vec![0x03; 33], vec![2]);
        let decoded = read_psbt(&write_psbt(&psbt).unwrap()).unwrap();
        assert_eq!(decoded.inputs[0].partial_sigs.len(), 2);
    }

    #[test]
    fn key_data_on_unkeyed_field_rejected() {
        let tx = unsigned_tx(1, 1);
        let mut bytes = PSBT_MAGIC.to_vec();
        write_pair(&mut bytes, PSBT_GLOBAL_UNSIGNED_TX, &[0x01], &tx.serialize_without_witness());
        bytes.extend([0x00, 0x00, 0x00]);
        assert!(matches!(read_psbt(&bytes), Err(BtcError::MalformedPsbt(_))));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = write_psbt(&Psbt::new(unsigned_tx(1, 1))).unwrap();
        bytes[4] = 0x00;
        assert!(matches!(read_psbt(&bytes), Err(BtcError::MalformedPsbt(_))));
    }

    #[test]
    fn missing_unsigned_tx_rejected() {
        let mut bytes = PSBT_MAGIC.to_vec();
        bytes.push(0x00);
        let err = read_psbt(&bytes).unwrap_err();
        assert!(err.to_string().contains("missing unsigned transaction"));
    }

    #[test]
    fn truncated_map_rejected() {
        let bytes = write_psbt(&populated()).unwrap();
        let err = read_psbt(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, BtcError::MalformedPsbt(_)));
    }

    #[test]
    fn derivation_value_must_be_whole_indices() {
        assert!(read_derivation(&[1, 2, 3]).is_err());
        assert!(read_derivation(&[1, 2, 3, 4, 5]).is_err());
        let d = read_derivation(&[1, 2, 3, 4, 0x54, 0, 0, 0x80]).unwrap();
        assert_eq!(d.fingerprint, [1, 2, 3, 4]);
        assert_eq!(d.path, vec![0x8000_0054]);
    }

    #[test]
    fn witness_tx_in_global_rejected_on_write() {
        let mut psbt = Psbt::new(unsigned_tx(1, 1));
        psbt.global.unsigned_tx.witness = Some(vec![vec![]]);
        assert!(matches!(write_psbt(&psbt), Err(BtcError::MalformedPsbt(_))));
    }

    #[test]
    fn interoperates_with_bitcoin_crate() {
        let pubkey = hex::decode(PUBKEY).unwrap();
        let mut psbt = Psbt::new(unsigned_tx(1, 2));
        psbt.inputs[0].witness_utxo = Some(TxOutput {
            value: 50_000,
            script_pubkey: script::p2wpkh_script(&[9; 20]),
        });
        psbt.inputs[0]
            .bip32_derivation
            .insert(pubkey.clone(), derivation(&[0x8000_0054, 0x8000_0000, 0x8000_0000, 0, 1]));
        psbt.inputs[0].unknown.push(UnknownField {
            key_type: 0x70,
            key_data: vec![1],
            value: vec![2],
        });
        psbt.outputs[1]
            .bip32_derivation
            .insert(pubkey, derivation(&[0x8000_0054, 0x8000_0000, 0x8000_0000, 1, 0]));
        psbt.outputs[1].proprietary.push(ProprietaryField {
            prefix: b"acme".to_vec(),
            subtype: 1,
            key_data: vec![],
            value: vec![0xff],
        });

        let ours = write_psbt(&psbt).unwrap();
        let reference = bitcoin::Psbt::deserialize(&ours).unwrap();
        assert_eq!(
            reference.unsigned_tx.compute_txid().to_string(),
            psbt.global.unsigned_tx.txid_hex()
        );
        let utxo = reference.inputs[0].witness_utxo.as_ref().unwrap();
        assert_eq!(utxo.value.to_sat(), 50_000);
        assert_eq!(reference.inputs[0].bip32_derivation.len(), 1);

        assert_eq!(read_psbt(&reference.serialize()).unwrap(), psbt);
    }
}
