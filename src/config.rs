//! Network consensus parameters and node configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::consensus::{EmissionSchedule, PowAlgorithm};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Network selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    LocalNet,
}

impl Network {
    /// Wire magic identifying the network
    pub fn magic(&self) -> [u8; 4] {
        match self {
            Network::Mainnet => *b"MWCM",
            Network::Testnet => *b"MWCT",
            Network::LocalNet => *b"MWCL",
        }
    }
}

/// Per-network consensus parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsensusConstants {
    pub network: Network,
    /// Combined target block interval `T` in seconds
    pub target_block_interval: u64,
    /// LWMA window `N`
    pub difficulty_window: usize,
    /// Percentage of blocks targeted at the primary algorithm
    pub primary_share: u64,
    /// Percentage of blocks targeted at the secondary algorithm
    pub secondary_share: u64,
    pub min_difficulty_primary: u64,
    pub min_difficulty_secondary: u64,
    pub initial_difficulty_primary: u64,
    pub initial_difficulty_secondary: u64,
    /// Solve times are clamped at this multiple of `T`
    pub max_block_time_multiplier: u64,
    /// Blocks of history retained; also the maximum reorg depth
    pub pruning_horizon: u64,
    /// Coinbase outputs cannot be spent for this many blocks
    pub coinbase_lock_height: u64,
    pub emission: EmissionSchedule,
    pub orphan_pool_size: usize,
    /// Maximum serialized covenant length in bytes
    pub max_covenant_size: usize,
    pub genesis_timestamp: u64,
}

impl ConsensusConstants {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self {
                network,
                target_block_interval: 120,
                difficulty_window: 90,
                primary_share: 60,
                secondary_share: 40,
                min_difficulty_primary: 60_000,
                min_difficulty_secondary: 60_000,
                initial_difficulty_primary: 1_000_000,
                initial_difficulty_secondary: 1_000_000,
                max_block_time_multiplier: 6,
                pruning_horizon: 2_880,
                coinbase_lock_height: 720,
                emission: EmissionSchedule::new(21_000_000_000_000_000, 1_000, 800_000_000),
                orphan_pool_size: 720,
                max_covenant_size: 4_096,
                genesis_timestamp: 1_767_225_600,
            },
            Network::Testnet => Self {
                network,
                target_block_interval: 120,
                difficulty_window: 90,
                primary_share: 60,
                secondary_share: 40,
                min_difficulty_primary: 1_000,
                min_difficulty_secondary: 1_000,
                initial_difficulty_primary: 10_000,
                initial_difficulty_secondary: 10_000,
                max_block_time_multiplier: 6,
                pruning_horizon: 1_440,
                coinbase_lock_height: 60,
                emission: EmissionSchedule::new(21_000_000_000_000_000, 1_000, 800_000_000),
                orphan_pool_size: 360,
                max_covenant_size: 4_096,
                genesis_timestamp: 1_767_229_200,
            },
            Network::LocalNet => Self {
                network,
                target_block_interval: 120,
                difficulty_window: 90,
                primary_share: 60,
                secondary_share: 40,
                min_difficulty_primary: 1,
                min_difficulty_secondary: 1,
                initial_difficulty_primary: 1,
                initial_difficulty_secondary: 1,
                max_block_time_multiplier: 6,
                pruning_horizon: 20,
                coinbase_lock_height: 2,
                emission: EmissionSchedule::new(1_000_000_000, 10_000, 1_000),
                orphan_pool_size: 32,
                max_covenant_size: 4_096,
                genesis_timestamp: 1_700_000_000,
            },
        }
    }

    /// Future time limit `T·N/20`
    pub fn future_time_limit(&self) -> u64 {
        self.target_block_interval * self.difficulty_window as u64 / 20
    }

    /// Target interval between two blocks of the same algorithm
    pub fn algorithm_target_time(&self, algorithm: PowAlgorithm) -> u64 {
        let share = match algorithm {
            PowAlgorithm::Primary => self.primary_share,
            PowAlgorithm::Secondary => self.secondary_share,
        };
        self.target_block_interval * 100 / share.max(1)
    }

    pub fn max_block_time(&self) -> u64 {
        self.target_block_interval * self.max_block_time_multiplier
    }

    pub fn min_difficulty(&self, algorithm: PowAlgorithm) -> u64 {
        match algorithm {
            PowAlgorithm::Primary => self.min_difficulty_primary,
            PowAlgorithm::Secondary => self.min_difficulty_secondary,
        }
    }

    pub fn initial_difficulty(&self, algorithm: PowAlgorithm) -> u64 {
        match algorithm {
            PowAlgorithm::Primary => self.initial_difficulty_primary,
            PowAlgorithm::Secondary => self.initial_difficulty_secondary,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_share + self.secondary_share != 100 {
            return Err(ConfigError::Invalid(
                "algorithm shares must sum to 100".to_string(),
            ));
        }
        if self.primary_share == 0 || self.secondary_share == 0 {
            return Err(ConfigError::Invalid("algorithm share cannot be zero".to_string()));
        }
        if self.difficulty_window < 2 {
            return Err(ConfigError::Invalid("difficulty window too small".to_string()));
        }
        if self.pruning_horizon == 0 {
            return Err(ConfigError::Invalid("pruning horizon cannot be zero".to_string()));
        }
        Ok(())
    }
}

/// Node runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub network: Network,
    pub data_dir: PathBuf,
    pub listen_addr: String,
    pub peers: Vec<String>,
    pub sync_interval_secs: u64,
    pub liveness_interval_secs: u64,
    pub request_timeout_ms: u64,
    /// Misbehaviour points at which a peer is denylisted
    pub denylist_threshold: u32,
    pub mining_enabled: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::LocalNet,
            data_dir: PathBuf::from("data"),
            listen_addr: "0.0.0.0:18189".to_string(),
            peers: Vec::new(),
            sync_interval_secs: 30,
            liveness_interval_secs: 15,
            request_timeout_ms: 10_000,
            denylist_threshold: 100,
            mining_enabled: false,
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(json)?;
        if config.denylist_threshold == 0 {
            return Err(ConfigError::Invalid("denylist threshold cannot be zero".to_string()));
        }
        Ok(config)
    }

    pub fn consensus_constants(&self) -> ConsensusConstants {
        ConsensusConstants::for_network(self.network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_future_time_limit() {
        let constants = ConsensusConstants::for_network(Network::Mainnet);
        assert_eq!(constants.future_time_limit(), 120 * 90 / 20);
    }

    #[test]
    fn test_algorithm_target_times() {
        let constants = ConsensusConstants::for_network(Network::Mainnet);
        assert_eq!(constants.algorithm_target_time(PowAlgorithm::Primary), 200);
        assert_eq!(constants.algorithm_target_time(PowAlgorithm::Secondary), 300);
    }

    #[test]
    fn test_all_networks_validate() {
        for network in [Network::Mainnet, Network::Testnet, Network::LocalNet] {
            assert!(ConsensusConstants::for_network(network).validate().is_ok());
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = NodeConfig::from_json(r#"{"network": "testnet", "mining_enabled": true}"#).unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert!(config.mining_enabled);
        assert_eq!(config.denylist_threshold, 100);
    }

    #[test]
    fn test_bad_json_rejected() {
        assert!(matches!(
            NodeConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
