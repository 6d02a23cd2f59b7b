use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BtcError;

/// Static per-coin constants consumed by address encoding, coin selection and
/// backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinParams {
    /// Canonical coin name, as understood by signing devices.
    pub coin_name: &'static str,
    pub shortcut: &'static str,
    pub decimals: u8,
    /// Version prefix of legacy (P2PKH) addresses.
    pub address_type: u32,
    /// Version prefix of script-hash (P2SH) addresses.
    pub address_type_p2sh: u32,
    /// Human-readable part of native segwit addresses, if the coin has them.
    pub bech32_prefix: Option<&'static str>,
    pub segwit: bool,
    pub xpub_magic: u32,
    pub xpub_magic_segwit_p2sh: Option<u32>,
    pub xpub_magic_segwit_native: Option<u32>,
    pub slip44: u32,
    /// Outputs below this value are never created as change.
    pub dust_limit: u64,
    /// Fallback fee rate in minor units per 1000 bytes.
    pub default_fee_per_kb: u64,
    pub blockbook: &'static [&'static str],
}

const BITCOIN: CoinParams = CoinParams {
    coin_name: "Bitcoin",
    shortcut: "BTC",
    decimals: 8,
    address_type: 0,
    address_type_p2sh: 5,
    bech32_prefix: Some("bc"),
    segwit: true,
    xpub_magic: 0x0488_b21e,
    xpub_magic_segwit_p2sh: Some(0x049d_7cb2),
    xpub_magic_segwit_native: Some(0x04b2_4746),
    slip44: 0,
    dust_limit: 546,
    default_fee_per_kb: 10_000,
    blockbook: &[
        "https://btc1.trezor.io",
        "https://btc2.trezor.io",
        "https://btc3.trezor.io",
        "https://btc4.trezor.io",
        "https://btc5.trezor.io",
    ],
};

const TESTNET: CoinParams = CoinParams {
    coin_name: "Testnet",
    shortcut: "TEST",
    decimals: 8,
    address_type: 111,
    address_type_p2sh: 196,
    bech32_prefix: Some("tb"),
    segwit: true,
    xpub_magic: 0x0435_87cf,
    xpub_magic_segwit_p2sh: Some(0x044a_5262),
    xpub_magic_segwit_native: Some(0x045f_1cf6),
    slip44: 1,
    dust_limit: 546,
    default_fee_per_kb: 1_000,
    blockbook: &["https://tbtc1.trezor.io", "https://tbtc2.trezor.io"],
};

const LITECOIN: CoinParams = CoinParams {
    coin_name: "Litecoin",
    shortcut: "LTC",
    decimals: 8,
    address_type: 48,
    address_type_p2sh: 50,
    bech32_prefix: Some("ltc"),
    segwit: true,
    xpub_magic: 0x019d_a462,
    xpub_magic_segwit_p2sh: Some(0x01b2_6ef6),
    xpub_magic_segwit_native: Some(0x04b2_4746),
    slip44: 2,
    dust_limit: 54_600,
    default_fee_per_kb: 10_000,
    blockbook: &[
        "https://ltc1.trezor.io",
        "https://ltc2.trezor.io",
        "https://ltc3.trezor.io",
        "https://ltc4.trezor.io",
        "https://ltc5.trezor.io",
    ],
};

const DOGECOIN: CoinParams = CoinParams {
    coin_name: "Dogecoin",
    shortcut: "DOGE",
    decimals: 8,
    address_type: 30,
    address_type_p2sh: 22,
    bech32_prefix: None,
    segwit: false,
    xpub_magic: 0x02fa_cafd,
    xpub_magic_segwit_p2sh: None,
    xpub_magic_segwit_native: None,
    slip44: 3,
    dust_limit: 10_000_000,
    default_fee_per_kb: 1_000_000,
    blockbook: &[
        "https://doge1.trezor.io",
        "https://doge2.trezor.io",
        "https://doge3.trezor.io",
        "https://doge4.trezor.io",
        "https://doge5.trezor.io",
    ],
};

/// Supported coins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Coin {
    Bitcoin,
    Testnet,
    Litecoin,
    Dogecoin,
}

impl Coin {
    pub const ALL: [Coin; 4] = [Coin::Bitcoin, Coin::Testnet, Coin::Litecoin, Coin::Dogecoin];

    /// Return the static parameter record for this coin.
    pub fn params(self) -> &'static CoinParams {
        match self {
            Coin::Bitcoin => &BITCOIN,
            Coin::Testnet => &TESTNET,
            Coin::Litecoin => &LITECOIN,
            Coin::Dogecoin => &DOGECOIN,
        }
    }

    /// Look up a coin by its canonical name or ticker, ignoring case.
    pub fn by_name(name: &str) -> Result<Coin, BtcError> {
        Coin::ALL
            .into_iter()
            .find(|coin| {
                let params = coin.params();
                params.coin_name.eq_ignore_ascii_case(name)
                    || params.shortcut.eq_ignore_ascii_case(name)
            })
            .ok_or_else(|| BtcError::UnknownCoin(name.to_string()))
    }
}

impl FromStr for Coin {
    type Err = BtcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Coin::by_name(s)
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.params().coin_name)
    }
}
