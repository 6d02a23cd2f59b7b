use crate::account_type::AccountType;
use crate::error::BtcError;
use crate::transaction::{Transaction, TxInput, TxOutput};

/// Longest DER signature plus sighash byte, used for size estimation.
pub const PLACEHOLDER_SIGNATURE_LEN: usize = 72;

/// Sequence number for inputs: final for locktime, signals replaceability.
pub const RBF_SEQUENCE: u32 = 0xFFFF_FFFD;

/// Outcome of a successful coin selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Change to return to the wallet, `None` when the leftover goes to fees.
    pub change: Option<u64>,
    pub fee: u64,
}

/// Fee-relevant size of `tx`: the raw length, or for segwit spends the
/// discounted `(3 * base + total) / 4`, truncated.
pub fn tx_size(tx: &Transaction, segwit: bool) -> Result<u64, BtcError> {
    let base = tx.serialize_without_witness().len() as u64;
    if !segwit {
        return Ok(base);
    }
    let total = tx.serialize()?.len() as u64;
    Ok((3 * base + total) / 4)
}

/// Fee for `size` bytes at `fee_per_kb` minor units per 1000 bytes, truncated.
pub fn fee_for_size(size: u64, fee_per_kb: u64) -> u64 {
    size.saturating_mul(fee_per_kb) / 1000
}

/// Accumulates inputs in the order they are offered until they cover the
/// outputs plus fee.
///
/// Each added input is given a placeholder signature so that candidate
/// transactions have their final size.
#[derive(Debug, Clone)]
pub struct CoinSelector {
    account_type: AccountType,
    fee_per_kb: u64,
    dust_limit: u64,
    required: u64,
    total: u64,
    tx: Transaction,
    change_output: TxOutput,
}

impl CoinSelector {
    pub fn new(
        account_type: AccountType,
        outputs: Vec<TxOutput>,
        fee_per_kb: u64,
        dust_limit: u64,
    ) -> Result<Self, BtcError> {
        let required = outputs
            .iter()
            .try_fold(0u64, |sum, o| sum.checked_add(o.value))
            .ok_or(BtcError::AmountOverflow("sum of outputs"))?;
        Ok(Self {
            account_type,
            fee_per_kb,
            dust_limit,
            required,
            total: 0,
            tx: Transaction {
                version: 2,
                inputs: Vec::new(),
                outputs,
                witness: account_type.is_segwit().then(Vec::new),
                lock_time: 0,
            },
            change_output: TxOutput {
                value: 0,
                script_pubkey: account_type.output_script_for_hash(&[0u8; 20]),
            },
        })
    }

    /// Sum of the requested outputs.
    pub fn required(&self) -> u64 {
        self.required
    }

    /// Sum of the inputs added so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn input_count(&self) -> usize {
        self.tx.inputs.len()
    }

    pub fn fee_without_change(&self) -> Result<u64, BtcError> {
        let size = tx_size(&self.tx, self.account_type.is_segwit())?;
        Ok(fee_for_size(size, self.fee_per_kb))
    }

    pub fn fee_with_change(&self) -> Result<u64, BtcError> {
        let mut tx = self.tx.clone();
        tx.outputs.push(self.change_output.clone());
        let size = tx_size(&tx, self.account_type.is_segwit())?;
        Ok(fee_for_size(size, self.fee_per_kb))
    }

    /// Add one input and report whether the selection is now complete.
    pub fn add(
        &mut self,
        prev_hash: [u8; 32],
        prev_index: u32,
        value: u64,
        public_key: &[u8],
    ) -> Result<Option<Selection>, BtcError> {
        let total = self
            .total
            .checked_add(value)
            .ok_or(BtcError::AmountOverflow("sum of inputs"))?;
        let signature = [0u8; PLACEHOLDER_SIGNATURE_LEN];
        let (script_sig, witness) = self.account_type.script_sig(public_key, &signature)?;
        self.tx.inputs.push(TxInput {
            prev_hash,
            prev_index,
            script_sig,
            sequence: RBF_SEQUENCE,
        });
        if let Some(stacks) = self.tx.witness.as_mut() {
            stacks.push(witness);
        }
        self.total = total;

        if self.total < self.required {
            return Ok(None);
        }
        let overfund = self.total - self.required;
        let fee_without_change = self.fee_without_change()?;

        if overfund == fee_without_change {
            return Ok(Some(Selection {
                change: None,
                fee: fee_without_change,
            }));
        }
        if overfund < fee_without_change {
            return Ok(None);
        }

        let fee_with_change = self.fee_with_change()?;
        match overfund.checked_sub(fee_with_change) {
            Some(change) if change >= self.dust_limit => Ok(Some(Selection {
                change: Some(change),
                fee: fee_with_change,
            })),
            _ => Ok(Some(Selection {
                change: None,
                fee: overfund,
            })),
        }
    }

    /// Error describing the shortfall once no more inputs are available.
    pub fn insufficient_funds(&self) -> BtcError {
        let fee = self.fee_without_change().unwrap_or(0);
        BtcError::InsufficientFunds {
            needed: self.required.saturating_add(fee),
            available: self.total,
        }
    }
}
