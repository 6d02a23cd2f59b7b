use std::fmt;
use std::str::FromStr;

use crypto_utils::hash::hash160;
use serde::{Deserialize, Serialize};

use crate::address;
use crate::error::BtcError;
use crate::network::CoinParams;
use crate::script;

/// How a signing device should spend an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputScriptType {
    #[serde(rename = "SPENDADDRESS")]
    SpendAddress,
    #[serde(rename = "SPENDP2SHWITNESS")]
    SpendP2shWitness,
    #[serde(rename = "SPENDWITNESS")]
    SpendWitness,
}

/// How a signing device should construct an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputScriptType {
    #[serde(rename = "PAYTOADDRESS")]
    PayToAddress,
    #[serde(rename = "PAYTOP2SHWITNESS")]
    PayToP2shWitness,
    #[serde(rename = "PAYTOWITNESS")]
    PayToWitness,
    #[serde(rename = "PAYTOOPRETURN")]
    PayToOpReturn,
}

/// Single-key account flavours, named after their BIP-44 style purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountType {
    /// BIP-44, pay-to-pubkey-hash.
    Legacy,
    /// BIP-49, P2WPKH nested in P2SH.
    P2shSegwit,
    /// BIP-84, bech32 P2WPKH.
    NativeSegwit,
}

impl AccountType {
    pub fn purpose(self) -> u32 {
        match self {
            AccountType::Legacy => 44,
            AccountType::P2shSegwit => 49,
            AccountType::NativeSegwit => 84,
        }
    }

    /// Whether spends from this account get the witness size discount.
    pub fn is_segwit(self) -> bool {
        !matches!(self, AccountType::Legacy)
    }

    /// Name of the coin parameter that supplies this account's address version.
    pub fn address_version_field(self) -> &'static str {
        match self {
            AccountType::Legacy => "address_type",
            AccountType::P2shSegwit => "address_type_p2sh",
            AccountType::NativeSegwit => "bech32_prefix",
        }
    }

    pub fn input_script_type(self) -> InputScriptType {
        match self {
            AccountType::Legacy => InputScriptType::SpendAddress,
            AccountType::P2shSegwit => InputScriptType::SpendP2shWitness,
            AccountType::NativeSegwit => InputScriptType::SpendWitness,
        }
    }

    pub fn output_script_type(self) -> OutputScriptType {
        match self {
            AccountType::Legacy => OutputScriptType::PayToAddress,
            AccountType::P2shSegwit => OutputScriptType::PayToP2shWitness,
            AccountType::NativeSegwit => OutputScriptType::PayToWitness,
        }
    }

    /// Default account type for a coin: nested segwit where available.
    pub fn default_for(params: &CoinParams) -> Self {
        if params.segwit {
            AccountType::P2shSegwit
        } else {
            AccountType::Legacy
        }
    }

    /// Account type announced by an extended public key's version magic.
    pub fn from_xpub_magic(params: &CoinParams, magic: u32) -> Option<Self> {
        if magic == params.xpub_magic {
            Some(AccountType::Legacy)
        } else if Some(magic) == params.xpub_magic_segwit_p2sh {
            Some(AccountType::P2shSegwit)
        } else if Some(magic) == params.xpub_magic_segwit_native {
            Some(AccountType::NativeSegwit)
        } else {
            None
        }
    }

    /// Encode `pubkey` as an address of this type.
    pub fn address(self, params: &CoinParams, pubkey: &[u8]) -> Result<String, BtcError> {
        match self {
            AccountType::Legacy => address::address_p2pkh(params.address_type, pubkey),
            AccountType::P2shSegwit => {
                address::address_p2sh_p2wpkh(params.address_type_p2sh, pubkey)
            }
            AccountType::NativeSegwit => {
                let hrp = params.bech32_prefix.ok_or_else(|| {
                    BtcError::UnsupportedScript(format!(
                        "{} has no {}",
                        params.coin_name,
                        self.address_version_field()
                    ))
                })?;
                address::address_p2wpkh(hrp, pubkey)
            }
        }
    }

    /// Output script paying to a key hash under this account type.
    pub fn output_script_for_hash(self, pubkey_hash: &[u8; 20]) -> Vec<u8> {
        match self {
            AccountType::Legacy => script::p2pkh_script(pubkey_hash),
            AccountType::P2shSegwit => {
                script::p2sh_script(&hash160(&script::p2wpkh_script(pubkey_hash)))
            }
            AccountType::NativeSegwit => script::p2wpkh_script(pubkey_hash),
        }
    }

    pub fn output_script(self, pubkey: &[u8]) -> Result<Vec<u8>, BtcError> {
        let pubkey = address::check_compressed(pubkey)?;
        Ok(self.output_script_for_hash(&hash160(pubkey)))
    }

    /// Unlocking data for a spend signed with `signature`: the script_sig and
    /// the witness stack (empty for legacy inputs).
    pub fn script_sig(
        self,
        pubkey: &[u8],
        signature: &[u8],
    ) -> Result<(Vec<u8>, Vec<Vec<u8>>), BtcError> {
        let pubkey = address::check_compressed(pubkey)?;
        Ok(match self {
            AccountType::Legacy => {
                let mut script_sig = script::push_data(signature);
                script_sig.extend(script::push_data(pubkey));
                (script_sig, Vec::new())
            }
            AccountType::P2shSegwit => {
                let redeem_script = script::p2wpkh_script(&hash160(pubkey));
                (
                    script::push_data(&redeem_script),
                    vec![signature.to_vec(), pubkey.to_vec()],
                )
            }
            AccountType::NativeSegwit => {
                (Vec::new(), vec![signature.to_vec(), pubkey.to_vec()])
            }
        })
    }
}

impl FromStr for AccountType {
    type Err = BtcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" | "44" => Ok(AccountType::Legacy),
            "p2sh-segwit" | "49" => Ok(AccountType::P2shSegwit),
            "native-segwit" | "segwit" | "84" => Ok(AccountType::NativeSegwit),
            _ => Err(BtcError::UnknownAccountType(s.to_string())),
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountType::Legacy => write!(f, "legacy"),
            AccountType::P2shSegwit => write!(f, "p2sh-segwit"),
            AccountType::NativeSegwit => write!(f, "native-segwit"),
        }
    }
}
