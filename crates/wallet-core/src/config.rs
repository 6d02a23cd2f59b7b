//! Wallet configuration.
//!
//! A [`WalletConfig`] can be deserialised from JSON and then overlaid with
//! environment variables (`WALLET_COIN`, `BLOCKBOOK_URL`).

use std::time::Duration;

use blockbook_client::{BlockbookClient, ClientConfig};
use chain_btc::{AccountType, Coin};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::hd_derivation::{DerivationPath, HARDENED_FLAG};

fn default_coin() -> Coin {
    Coin::Bitcoin
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_coin")]
    pub coin: Coin,
    /// Blockbook endpoint; a random one of the coin's defaults when unset.
    #[serde(default)]
    pub backend_url: Option<String>,
    /// Account type; the coin's default when unset.
    #[serde(default)]
    pub account_type: Option<AccountType>,
    #[serde(default)]
    pub account: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            coin: default_coin(),
            backend_url: None,
            account_type: None,
            account: 0,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Settings taken from the environment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub coin: Option<String>,
    pub backend_url: Option<String>,
}

impl ConfigOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            coin: non_empty("WALLET_COIN"),
            backend_url: non_empty("BLOCKBOOK_URL"),
        }
    }
}

impl WalletConfig {
    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        serde_json::from_str(json).map_err(|e| WalletError::Config(e.to_string()))
    }

    /// Defaults overlaid with the environment.
    pub fn from_env() -> Result<Self, WalletError> {
        Self::default().with_overrides(ConfigOverrides::from_env())
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Result<Self, WalletError> {
        if let Some(coin) = overrides.coin {
            self.coin = coin.parse()?;
        }
        if let Some(url) = overrides.backend_url {
            self.backend_url = Some(url);
        }
        Ok(self)
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
            .unwrap_or_else(|| AccountType::default_for(self.coin.params()))
    }

    /// Path of the configured account: `m/purpose'/slip44'/account'`.
    pub fn account_path(&self) -> DerivationPath {
        DerivationPath::new(vec![
            self.account_type().purpose() | HARDENED_FLAG,
            self.coin.params().slip44 | HARDENED_FLAG,
            self.account | HARDENED_FLAG,
        ])
    }

    /// The configured backend URL, or one of the coin's endpoints at random.
    pub fn backend_url(&self) -> Result<String, WalletError> {
        if let Some(url) = &self.backend_url {
            return Ok(url.clone());
        }
        self.coin
            .params()
            .blockbook
            .choose(&mut rand::thread_rng())
            .map(|url| url.to_string())
            .ok_or_else(|| WalletError::Config(format!("no backend known for {}", self.coin)))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..ClientConfig::default()
        }
    }

    pub fn build_client(&self) -> Result<BlockbookClient, WalletError> {
        Ok(BlockbookClient::with_config(
            &self.backend_url()?,
            self.client_config(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(vars: &[(&str, &str)]) -> ConfigOverrides {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigOverrides::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = WalletConfig::default();
        assert_eq!(config.coin, Coin::Bitcoin);
        assert_eq!(config.account_type(), AccountType::P2shSegwit);
        assert_eq!(config.account_path().to_string(), "m/49'/0'/0'");
        assert_eq!(config.client_config().request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn legacy_default_for_non_segwit_coin() {
        let config = WalletConfig {
            coin: Coin::Dogecoin,
            account: 2,
            ..Default::default()
        };
        assert_eq!(config.account_type(), AccountType::Legacy);
        assert_eq!(config.account_path().to_string(), "m/44'/3'/2'");
    }

    #[test]
    fn from_json_fills_defaults() {
        let config = WalletConfig::from_json(
            r#"{"coin": "Litecoin", "account_type": "native-segwit", "account": 1}"#,
        )
        .unwrap();
        assert_eq!(config.coin, Coin::Litecoin);
        assert_eq!(config.account_type(), AccountType::NativeSegwit);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.backend_url.is_none());

        assert!(WalletConfig::from_json(r#"{"coin": "Namecoin"}"#).is_err());
    }

    #[test]
    fn environment_overrides() {
        let config = WalletConfig::default()
            .with_overrides(overrides(&[
                ("WALLET_COIN", "ltc"),
                ("BLOCKBOOK_URL", "https://ltc1.trezor.io"),
            ]))
            .unwrap();
        assert_eq!(config.coin, Coin::Litecoin);
        assert_eq!(config.backend_url().unwrap(), "https://ltc1.trezor.io");

        let client = config.build_client().unwrap();
        assert_eq!(client.url(), "wss://ltc1.trezor.io/websocket");
    }

    #[test]
    fn empty_variables_are_ignored() {
        let o = overrides(&[("WALLET_COIN", ""), ("BLOCKBOOK_URL", "  ")]);
        assert_eq!(o, ConfigOverrides::default());
    }

    #[test]
    fn unknown_coin_override_fails() {
        let err = WalletConfig::default()
            .with_overrides(overrides(&[("WALLET_COIN", "Namecoin")]))
            .unwrap_err();
        assert!(matches!(err, WalletError::Btc(_)));
    }

    #[test]
    fn random_backend_from_coin_table() {
        let config = WalletConfig {
            coin: Coin::Dogecoin,
            ..Default::default()
        };
        for _ in 0..10 {
            let url = config.backend_url().unwrap();
            assert!(Coin::Dogecoin.params().blockbook.contains(&url.as_str()));
        }
    }
}
