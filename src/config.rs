use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::{Addr, Gas, Share};
use crate::core::params::{CORE_ASSET_PRECISION, CORE_ASSET_SYMBOL};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// An account registered (and funded in the core asset) at genesis.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub addr: Addr,
    #[serde(default)]
    pub pubkey: String,
    #[serde(default)]
    pub balance: Share,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub core_asset_symbol: String,
    /// Number of decimal digits of the core asset.
    pub core_asset_precision: u32,
    pub genesis_time: u64,
    /// Gas available to a read-only contract call.
    pub offline_gas_limit: Gas,
    pub genesis_accounts: Vec<GenesisAccount>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            core_asset_symbol: CORE_ASSET_SYMBOL.to_string(),
            core_asset_precision: CORE_ASSET_PRECISION,
            genesis_time: 0,
            offline_gas_limit: 1_000_000,
            genesis_accounts: Vec::new(),
        }
    }
}

impl ChainConfig {
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_asset_symbol.is_empty() {
            return Err(ConfigError::Invalid(
                "core asset symbol can't be empty".into(),
            ))
        }
        if self.offline_gas_limit == 0 {
            return Err(ConfigError::Invalid(
                "offline gas limit must be positive".into(),
            ))
        }
        for acc in self.genesis_accounts.iter() {
            if !acc.addr.is_valid() || acc.addr.is_contract() {
                return Err(ConfigError::Invalid(format!(
                    "invalid genesis account {}",
                    acc.addr
                )))
            }
        }
        Ok(())
    }
}

#[test]
fn test_config_defaults() {
    let c = ChainConfig::from_json("{}").unwrap();
    assert_eq!(c, ChainConfig::default());
    assert_eq!(c.core_asset_symbol, "COIN");
    assert_eq!(c.core_asset_precision, 5);
    let c = ChainConfig::from_json(
        r#"{"core_asset_symbol": "XYZ", "genesis_accounts": [{"addr": "SPLa", "balance": 7}]}"#,
    )
    .unwrap();
    assert_eq!(c.core_asset_symbol, "XYZ");
    assert_eq!(c.genesis_accounts[0].balance, 7);
    assert!(matches!(
        ChainConfig::from_json(r#"{"core_asset_symbol": ""}"#),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        ChainConfig::from_json("{"),
        Err(ConfigError::Json(_))
    ));
}
