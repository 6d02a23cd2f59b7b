use serde::{Deserialize, Serialize};

/// Exact parsing of monetary amounts.
///
/// Blockbook sends amounts as decimal strings of minor units; integers are
/// accepted too. Fractions and floats are rejected, an empty string is zero.
pub mod amount {
    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    pub fn parse(s: &str) -> Result<u64, String> {
        if s.is_empty() {
            return Ok(0);
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid amount {s:?}"));
        }
        s.parse::<u64>().map_err(|e| format!("invalid amount {s:?}: {e}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Int(value) => Ok(value),
            Raw::Str(s) => parse(&s).map_err(de::Error::custom),
        }
    }
}

/// `getAccountInfo` summary of a single address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub address: String,
    #[serde(default, deserialize_with = "amount::deserialize")]
    pub balance: u64,
    #[serde(default, deserialize_with = "amount::deserialize")]
    pub total_received: u64,
    #[serde(default, deserialize_with = "amount::deserialize")]
    pub total_sent: u64,
    #[serde(default)]
    pub txs: u64,
}

impl AccountInfo {
    /// An address is active once it has ever received funds.
    pub fn is_active(&self) -> bool {
        self.total_received > 0
    }
}

/// One unspent output from `getAccountUtxo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUtxo {
    pub txid: String,
    pub vout: u32,
    #[serde(deserialize_with = "amount::deserialize")]
    pub value: u64,
    #[serde(default)]
    pub height: Option<u64>,
    #[serde(default)]
    pub confirmations: u64,
}

/// Raw transaction from `getTransactionSpecific`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
    pub txid: String,
    pub hex: String,
}

/// One entry of an `estimateFee` answer, in minor units per kilobyte.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeeEstimate {
    #[serde(deserialize_with = "amount::deserialize")]
    pub fee_per_unit: u64,
}
