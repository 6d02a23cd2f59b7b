use crypto_utils::hash::double_sha256;

use crate::encoding::{write_compact_size, write_var_bytes, DecodeError, Reader};
use crate::error::BtcError;

/// Marker and flag bytes announcing a witness section.
const SEGWIT_MARKER: [u8; 2] = [0x00, 0x01];

/// A transaction input spending `prev_index` of `prev_hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Previous transaction id in internal (little-endian) byte order.
    pub prev_hash: [u8; 32],
    pub prev_index: u32,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

/// A transaction in its exact wire shape.
///
/// `witness` is `None` for the legacy serialization. When present it holds one
/// stack per input; an empty stack is valid and distinct from no witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub witness: Option<Vec<Vec<Vec<u8>>>>,
    pub lock_time: u32,
}

fn malformed(err: DecodeError) -> BtcError {
    BtcError::MalformedTransaction(err.to_string())
}

impl TxOutput {
    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(buf, &self.script_pubkey);
    }

    pub(crate) fn read_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let value = reader.read_u64_le()?;
        let script_pubkey = reader.read_var_bytes()?.to_vec();
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

impl Transaction {
    /// Decode a complete transaction. Trailing bytes are an error.
    pub fn parse(bytes: &[u8]) -> Result<Self, BtcError> {
        let mut reader = Reader::new(bytes);
        let tx = Self::read_from(&mut reader).map_err(malformed)?;
        if !reader.is_empty() {
            return Err(BtcError::MalformedTransaction(format!(
                "{} trailing bytes after lock time",
                reader.remaining()
            )));
        }
        Ok(tx)
    }

    fn read_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let version = reader.read_i32_le()?;

        let segwit = reader.peek(2) == Some(&SEGWIT_MARKER[..]);
        if segwit {
            reader.read_bytes(2)?;
        }

        let input_count = reader.read_length()?;
        let mut inputs = Vec::with_capacity(input_count.min(reader.remaining() / 41));
        for _ in 0..input_count {
            inputs.push(TxInput {
                prev_hash: reader.read_array()?,
                prev_index: reader.read_u32_le()?,
                script_sig: reader.read_var_bytes()?.to_vec(),
                sequence: reader.read_u32_le()?,
            });
        }

        let output_count = reader.read_length()?;
        let mut outputs = Vec::with_capacity(output_count.min(reader.remaining() / 9));
        for _ in 0..output_count {
            outputs.push(TxOutput::read_from(reader)?);
        }

        let witness = if segwit {
            let mut stacks = Vec::with_capacity(inputs.len());
            for _ in 0..inputs.len() {
                let item_count = reader.read_length()?;
                let mut stack = Vec::with_capacity(item_count.min(reader.remaining()));
                for _ in 0..item_count {
                    stack.push(reader.read_var_bytes()?.to_vec());
                }
                stacks.push(stack);
            }
            Some(stacks)
        } else {
            None
        };

        let lock_time = reader.read_u32_le()?;

        Ok(Self {
            version,
            inputs,
            outputs,
            witness,
            lock_time,
        })
    }

    /// Serialize with the witness section when one is present.
    pub fn serialize(&self) -> Result<Vec<u8>, BtcError> {
        if let Some(witness) = &self.witness {
            if witness.len() != self.inputs.len() {
                return Err(BtcError::MalformedTransaction(format!(
                    "{} witness stacks for {} inputs",
                    witness.len(),
                    self.inputs.len()
                )));
            }
        }
        Ok(self.encode(true))
    }

    /// Serialize in the legacy format, as hashed for the transaction id.
    pub fn serialize_without_witness(&self) -> Vec<u8> {
        self.encode(false)
    }

    fn encode(&self, include_witness: bool) -> Vec<u8> {
        let witness = self.witness.as_ref().filter(|_| include_witness);

        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_le_bytes());
        if witness.is_some() {
            buf.extend_from_slice(&SEGWIT_MARKER);
        }

        write_compact_size(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            buf.extend_from_slice(&input.prev_hash);
            buf.extend_from_slice(&input.prev_index.to_le_bytes());
            write_var_bytes(&mut buf, &input.script_sig);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }

        write_compact_size(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(&mut buf);
        }

        if let Some(stacks) = witness {
            for stack in stacks {
                write_compact_size(&mut buf, stack.len() as u64);
                for item in stack {
                    write_var_bytes(&mut buf, item);
                }
            }
        }

        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf
    }

    /// Transaction id in internal byte order.
    pub fn txid(&self) -> [u8; 32] {
        double_sha256(&self.serialize_without_witness())
    }

    /// Transaction id as displayed by explorers (byte-reversed hex).
    pub fn txid_hex(&self) -> String {
        let mut id = self.txid();
        id.reverse();
        hex::encode(id)
    }
}

/// Parse a hex txid string (big-endian display) to internal byte order (little-endian).
pub fn parse_txid(txid_hex: &str) -> Result<[u8; 32], BtcError> {
    let bytes =
        hex::decode(txid_hex).map_err(|e| BtcError::InvalidTxid(format!("invalid hex: {e}")))?;
    let mut result: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
        BtcError::InvalidTxid(format!("txid must be 32 bytes, got {}", b.len()))
    })?;
    result.reverse();
    Ok(result)
}
