//! `packdag.toml`, read from the data directory.
//!
//! Every section and field is optional; anything missing takes its default,
//! and an unreadable file is reported and ignored.

use num_bigint::BigUint;
use serde::Deserialize;
use std::path::Path;

use crate::state::Genesis;
use crate::{Address, PublicKeyBytes};

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE: &str = "packdag.toml";

/// Errors turning configuration values into protocol types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid hex in {0}")]
    InvalidHex(&'static str),
    #[error("invalid amount in {0}: {1}")]
    InvalidAmount(&'static str, String),
    #[error("genesis public key not configured")]
    MissingGenesisKey,
}

/// Contents of `packdag.toml`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub consensus: ConsensusConfig,
    pub vm: VmConfig,
    pub network: NetworkConfig,
    pub genesis: GenesisConfig,
}

/// `[node]`: where the ledger lives and whether to relay.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Ledger database directory. Empty means `db` inside the CLI data directory.
    pub data_dir: String,
    /// Broadcast locally submitted packs.
    pub relay: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: String::new(),
            relay: true,
        }
    }
}

/// Consensus engine tuning.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Entries kept in the sequentiality anchor cache.
    pub sequence_cache_size: usize,
    /// Check milestone signatures against every stabilizer's key on admission.
    pub verify_milestones: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            sequence_cache_size: 1024,
            verify_milestones: false,
        }
    }
}

/// VM limits.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub max_gas_per_call: u64,
    pub max_ops_per_call: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_gas_per_call: crate::constants::MAX_ENCODABLE_GAS,
            max_ops_per_call: 1_000_000,
        }
    }
}

/// Transport settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Attempts per parent query before the pack is rejected.
    pub query_retries: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig { query_retries: 3 }
    }
}

/// Genesis ledger contents. Keys and addresses are hex, amounts decimal strings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    pub public_key: String,
    pub supply: String,
    pub stabilizers: Vec<StabilizerEntry>,
    pub balances: Vec<BalanceEntry>,
    pub accounts: Vec<String>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        GenesisConfig {
            public_key: String::new(),
            supply: "500000".into(),
            stabilizers: Vec::new(),
            balances: Vec::new(),
            accounts: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct StabilizerEntry {
    pub public_key: String,
    pub support: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BalanceEntry {
    pub address: String,
    pub amount: String,
}

fn parse_amount(field: &'static str, text: &str) -> Result<BigUint, ConfigError> {
    text.parse()
        .map_err(|_| ConfigError::InvalidAmount(field, text.to_string()))
}

fn parse_public_key(field: &'static str, text: &str) -> Result<PublicKeyBytes, ConfigError> {
    hex::decode(text)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(ConfigError::InvalidHex(field))
}

fn parse_address(field: &'static str, text: &str) -> Result<Address, ConfigError> {
    hex::decode(text)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(ConfigError::InvalidHex(field))
}

impl GenesisConfig {
    /// Build the genesis record. `fallback_key` is used when no key is configured.
    pub fn to_genesis(&self, fallback_key: Option<PublicKeyBytes>) -> Result<Genesis, ConfigError> {
        let public_key = if self.public_key.is_empty() {
            fallback_key.ok_or(ConfigError::MissingGenesisKey)?
        } else {
            parse_public_key("genesis.public_key", &self.public_key)?
        };
        let stabilizers = if self.stabilizers.is_empty() {
            vec![(public_key, BigUint::from(100u8))]
        } else {
            self.stabilizers
                .iter()
                .map(|s| {
                    Ok((
                        parse_public_key("genesis.stabilizers.public_key", &s.public_key)?,
                        parse_amount("genesis.stabilizers.support", &s.support)?,
                    ))
                })
                .collect::<Result<_, ConfigError>>()?
        };
        Ok(Genesis {
            public_key,
            supply: parse_amount("genesis.supply", &self.supply)?,
            stabilizers,
            balances: self
                .balances
                .iter()
                .map(|b| {
                    Ok((
                        parse_address("genesis.balances.address", &b.address)?,
                        parse_amount("genesis.balances.amount", &b.amount)?,
                    ))
                })
                .collect::<Result<_, ConfigError>>()?,
            accounts: self
                .accounts
                .iter()
                .map(|a| parse_public_key("genesis.accounts", a))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl Config {
    /// Load configuration from `packdag.toml` in the given directory.
    /// Defaults when the file is absent or fails to parse.
    pub fn load(data_dir: &Path) -> Self {
        let config_path = data_dir.join(CONFIG_FILE);
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse {}: {}, using defaults",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_valid() {
        let config = Config::default();
        assert_eq!(config.consensus.sequence_cache_size, 1024);
        assert!(!config.consensus.verify_milestones);
        assert_eq!(config.vm.max_gas_per_call, 1 << 24);
        assert!(config.node.relay);
        assert!(config.node.data_dir.is_empty());
    }

    #[test]
    fn parse_toml_config() {
        let key = hex::encode([2u8; 33]);
        let toml_str = format!(
            r#"
[node]
relay = false

[vm]
max_ops_per_call = 5000

[network]
query_retries = 7

[genesis]
public_key = "{key}"
supply = "1000000000000000000000000"

[[genesis.stabilizers]]
public_key = "{key}"
support = "100"
"#
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(!config.node.relay);
        assert_eq!(config.vm.max_ops_per_call, 5000);
        assert_eq!(config.vm.max_gas_per_call, 1 << 24);
        assert_eq!(config.network.query_retries, 7);

        let genesis = config.genesis.to_genesis(None).unwrap();
        assert_eq!(genesis.public_key, [2u8; 33]);
        assert_eq!(genesis.stabilizers.len(), 1);
        assert_eq!(
            genesis.supply,
            "1000000000000000000000000".parse::<BigUint>().unwrap()
        );
    }

    #[test]
    fn genesis_needs_a_key() {
        let config = GenesisConfig::default();
        assert!(matches!(
            config.to_genesis(None),
            Err(ConfigError::MissingGenesisKey)
        ));
        let genesis = config.to_genesis(Some([3u8; 33])).unwrap();
        assert_eq!(genesis.stabilizers, vec![([3u8; 33], BigUint::from(100u8))]);
    }

    #[test]
    fn bad_hex_rejected() {
        let config = GenesisConfig {
            public_key: "zz".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.to_genesis(None),
            Err(ConfigError::InvalidHex("genesis.public_key"))
        ));
    }

    #[test]
    fn missing_config_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path());
        assert_eq!(config.network.query_retries, 3);
    }

    #[test]
    fn malformed_config_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[vm\nmax_ops_per_call = ").unwrap();
        let config = Config::load(dir.path());
        assert_eq!(config.vm.max_ops_per_call, 1_000_000);
    }
}
