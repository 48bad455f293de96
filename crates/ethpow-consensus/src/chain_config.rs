//! Forkable chain configuration.
//!
//! A chain is described by a closed set of [`Fork`]s, each mapped to an
//! optional activation height, plus a handful of engine knobs. Consensus
//! code reads the configuration through the [`ChainRules`] trait so that
//! callers can supply their own schedule source.
//!
//! Presets live in [`presets`]:
//! - `ChainConfig::classic()` for Ethereum Classic
//! - `ChainConfig::mainnet()` for pre-merge Ethereum
//! - `ChainConfig::mintme()` for the Lyra2 network
//! - `ChainConfig::developer(engine)` for tests

use crate::params;
use alloy_primitives::{B256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub mod presets;

// ============================================================================
// Forks
// ============================================================================

/// Every rule change the engine knows about.
///
/// Variants are declared in activation order for the chains that use them,
/// which is also the order compatibility checks walk them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fork {
    // Homestead and the 2016 repricing forks
    Eip2,
    Eip7,
    Eip150,
    Eip155,
    Eip160,
    Eip161,
    Eip170,
    /// Uncle-aware difficulty adjustment (Byzantium).
    Eip100B,
    // Byzantium
    Eip140,
    Eip198,
    Eip211,
    Eip212,
    Eip213,
    Eip214,
    Eip658,
    /// Byzantium bomb delay and 3 ETH reward.
    Eip649,
    // Constantinople
    Eip145,
    Eip1014,
    Eip1052,
    Eip1283,
    /// Constantinople bomb delay and 2 ETH reward.
    Eip1234,
    Petersburg,
    // Istanbul
    Eip152,
    Eip1108,
    Eip1344,
    Eip1884,
    Eip2028,
    Eip2200,
    Eip2384,
    // Berlin
    Eip2565,
    Eip2718,
    Eip2929,
    Eip2930,
    // London
    Eip1559,
    Eip3198,
    Eip3529,
    Eip3541,
    Eip3554,
    Eip4345,
    Eip5133,
    // Shanghai
    Eip3651,
    Eip3855,
    Eip3860,
    Eip4895,
    Eip6049,
    // Cancun
    Eip1153,
    Eip4788,
    Eip4844,
    Eip5656,
    Eip6780,
    Eip7516,
    /// DAO rescue hard fork.
    Eip779,
    /// Difficulty bomb pause.
    Ecip1010Pause,
    /// Monetary policy eras.
    Ecip1017,
    /// Difficulty bomb removal.
    Ecip1041,
    /// Doubled ethash epoch length.
    Ecip1099,
    Ecbp1100,
    Ecbp1100Deactivate,
    /// Lyra2 nonce switches from little-endian to big-endian.
    Lyra2NonceTransition,
}

impl Fork {
    /// All forks, in declaration order.
    pub const ALL: &'static [Fork] = &[
        Fork::Eip2,
        Fork::Eip7,
        Fork::Eip150,
        Fork::Eip155,
        Fork::Eip160,
        Fork::Eip161,
        Fork::Eip170,
        Fork::Eip100B,
        Fork::Eip140,
        Fork::Eip198,
        Fork::Eip211,
        Fork::Eip212,
        Fork::Eip213,
        Fork::Eip214,
        Fork::Eip658,
        Fork::Eip649,
        Fork::Eip145,
        Fork::Eip1014,
        Fork::Eip1052,
        Fork::Eip1283,
        Fork::Eip1234,
        Fork::Petersburg,
        Fork::Eip152,
        Fork::Eip1108,
        Fork::Eip1344,
        Fork::Eip1884,
        Fork::Eip2028,
        Fork::Eip2200,
        Fork::Eip2384,
        Fork::Eip2565,
        Fork::Eip2718,
        Fork::Eip2929,
        Fork::Eip2930,
        Fork::Eip1559,
        Fork::Eip3198,
        Fork::Eip3529,
        Fork::Eip3541,
        Fork::Eip3554,
        Fork::Eip4345,
        Fork::Eip5133,
        Fork::Eip3651,
        Fork::Eip3855,
        Fork::Eip3860,
        Fork::Eip4895,
        Fork::Eip6049,
        Fork::Eip1153,
        Fork::Eip4788,
        Fork::Eip4844,
        Fork::Eip5656,
        Fork::Eip6780,
        Fork::Eip7516,
        Fork::Eip779,
        Fork::Ecip1010Pause,
        Fork::Ecip1017,
        Fork::Ecip1041,
        Fork::Ecip1099,
        Fork::Ecbp1100,
        Fork::Ecbp1100Deactivate,
        Fork::Lyra2NonceTransition,
    ];

    /// Configuration key for this fork.
    pub fn name(self) -> &'static str {
        match self {
            Fork::Eip2 => "eip2",
            Fork::Eip7 => "eip7",
            Fork::Eip150 => "eip150",
            Fork::Eip155 => "eip155",
            Fork::Eip160 => "eip160",
            Fork::Eip161 => "eip161",
            Fork::Eip170 => "eip170",
            Fork::Eip100B => "eip100b",
            Fork::Eip140 => "eip140",
            Fork::Eip198 => "eip198",
            Fork::Eip211 => "eip211",
            Fork::Eip212 => "eip212",
            Fork::Eip213 => "eip213",
            Fork::Eip214 => "eip214",
            Fork::Eip658 => "eip658",
            Fork::Eip649 => "eip649",
            Fork::Eip145 => "eip145",
            Fork::Eip1014 => "eip1014",
            Fork::Eip1052 => "eip1052",
            Fork::Eip1283 => "eip1283",
            Fork::Eip1234 => "eip1234",
            Fork::Petersburg => "petersburg",
            Fork::Eip152 => "eip152",
            Fork::Eip1108 => "eip1108",
            Fork::Eip1344 => "eip1344",
            Fork::Eip1884 => "eip1884",
            Fork::Eip2028 => "eip2028",
            Fork::Eip2200 => "eip2200",
            Fork::Eip2384 => "eip2384",
            Fork::Eip2565 => "eip2565",
            Fork::Eip2718 => "eip2718",
            Fork::Eip2929 => "eip2929",
            Fork::Eip2930 => "eip2930",
            Fork::Eip1559 => "eip1559",
            Fork::Eip3198 => "eip3198",
            Fork::Eip3529 => "eip3529",
            Fork::Eip3541 => "eip3541",
            Fork::Eip3554 => "eip3554",
            Fork::Eip4345 => "eip4345",
            Fork::Eip5133 => "eip5133",
            Fork::Eip3651 => "eip3651",
            Fork::Eip3855 => "eip3855",
            Fork::Eip3860 => "eip3860",
            Fork::Eip4895 => "eip4895",
            Fork::Eip6049 => "eip6049",
            Fork::Eip1153 => "eip1153",
            Fork::Eip4788 => "eip4788",
            Fork::Eip4844 => "eip4844",
            Fork::Eip5656 => "eip5656",
            Fork::Eip6780 => "eip6780",
            Fork::Eip7516 => "eip7516",
            Fork::Eip779 => "eip779",
            Fork::Ecip1010Pause => "ecip1010",
            Fork::Ecip1017 => "ecip1017",
            Fork::Ecip1041 => "ecip1041",
            Fork::Ecip1099 => "ecip1099",
            Fork::Ecbp1100 => "ecbp1100",
            Fork::Ecbp1100Deactivate => "ecbp1100-deactivate",
            Fork::Lyra2NonceTransition => "lyra2-nonce-transition",
        }
    }
}

impl fmt::Display for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Fork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Fork::ALL
            .iter()
            .copied()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| format!("unknown fork '{}'", s))
    }
}

impl Serialize for Fork {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Fork {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Engine kind
// ============================================================================

/// Which proof-of-work primitive seals the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    #[default]
    Ethash,
    EthashB3,
    Keccak,
    /// Proof-of-authority; recognised in configs but not implemented here.
    Clique,
    Lyra2,
}

impl EngineKind {
    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Ethash => "ethash",
            EngineKind::EthashB3 => "ethash-b3",
            EngineKind::Keccak => "keccak",
            EngineKind::Clique => "clique",
            EngineKind::Lyra2 => "lyra2",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Chain rules seam
// ============================================================================

/// Read-only view of a chain's fork schedule.
///
/// Everything the verifier needs to know about a chain goes through this
/// trait. [`ChainConfig`] is the stock implementation.
pub trait ChainRules: Send + Sync {
    fn engine(&self) -> EngineKind;

    fn chain_id(&self) -> u64;

    /// Activation height of `fork`, `None` if it never activates.
    fn activation(&self, fork: Fork) -> Option<u64>;

    /// Activation timestamp for time-keyed forks.
    fn activation_time(&self, fork: Fork) -> Option<u64>;

    fn is_enabled(&self, fork: Fork, height: u64) -> bool {
        self.activation(fork).is_some_and(|at| at <= height)
    }

    fn is_enabled_by_time(&self, fork: Fork, time: u64) -> bool {
        self.activation_time(fork).is_some_and(|at| at <= time)
    }

    /// Base block reward at `height`, before any era reduction.
    ///
    /// An active EIP-1234 or EIP-649 fork overrides the reward schedule.
    /// Otherwise the schedule entry with the greatest key at or below
    /// `height` applies, falling back to the Frontier reward.
    fn block_reward(&self, height: u64) -> U256;

    /// Total configured bomb delay that has activated at or below `height`.
    fn difficulty_bomb_delay(&self, height: u64) -> U256;

    /// Whether an explicit bomb delay schedule is configured.
    fn has_bomb_delay_schedule(&self) -> bool;

    fn max_extra_data_size(&self, _height: u64) -> u64 {
        params::MAX_EXTRA_DATA_SIZE
    }

    /// Hash the block at `height` is required to have, if pinned.
    fn fork_canonical_hash(&self, height: u64) -> Option<B256>;

    fn ecip1010_length(&self) -> Option<u64>;

    fn ecip1017_era_rounds(&self) -> Option<u64>;

    fn terminal_total_difficulty(&self) -> Option<U256>;

    fn minimum_difficulty(&self) -> Option<U256>;

    fn difficulty_bound_divisor(&self) -> Option<U256>;

    fn duration_limit(&self) -> Option<u64>;

    /// Reject schedules that cannot be evaluated.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.activation(Fork::Ecip1010Pause).is_some()
            && !self.ecip1010_length().is_some_and(|l| l > 0)
        {
            return Err(ConfigError {
                field: "ecip1010_length",
                message: "ECIP-1010 pause requires a positive length".to_string(),
            });
        }
        if self.activation(Fork::Ecip1017).is_some()
            && !self.ecip1017_era_rounds().is_some_and(|r| r > 0)
        {
            return Err(ConfigError {
                field: "ecip1017_era_rounds",
                message: "ECIP-1017 requires a positive era length".to_string(),
            });
        }
        if self.difficulty_bound_divisor().is_some_and(|d| d.is_zero()) {
            return Err(ConfigError {
                field: "difficulty_bound_divisor",
                message: "divisor cannot be zero".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// ChainConfig
// ============================================================================

/// Error produced when a chain configuration cannot be loaded or is malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("chain config error for '{field}': {message}")]
pub struct ConfigError {
    /// The field (or file) that is missing or invalid.
    pub field: &'static str,
    /// Description of the error.
    pub message: String,
}

/// A concrete fork schedule plus engine knobs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub engine: EngineKind,
    /// Block-keyed fork activations.
    pub forks: BTreeMap<Fork, u64>,
    /// Time-keyed fork activations.
    pub fork_times: BTreeMap<Fork, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecip1010_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecip1017_era_rounds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_total_difficulty: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_difficulty: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_bound_divisor: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_limit: Option<u64>,
    /// Height to reward overrides. Lookups take the greatest key at or below a height.
    #[serde(with = "height_keyed")]
    pub block_reward_schedule: BTreeMap<u64, U256>,
    /// Height to bomb delay. Delays compound.
    #[serde(with = "height_keyed")]
    pub difficulty_bomb_delays: BTreeMap<u64, U256>,
    /// Heights whose block hash is pinned.
    #[serde(with = "height_keyed")]
    pub require_block_hashes: BTreeMap<u64, B256>,
}

impl ChainConfig {
    /// Empty schedule for the given engine. Every fork is inactive.
    pub fn new(chain_id: u64, engine: EngineKind) -> Self {
        Self {
            chain_id,
            engine,
            ..Default::default()
        }
    }

    /// Builder-style fork activation.
    pub fn with_fork(mut self, fork: Fork, height: u64) -> Self {
        self.forks.insert(fork, height);
        self
    }

    /// Activate several forks at the same height.
    pub fn with_forks(mut self, forks: &[Fork], height: u64) -> Self {
        for fork in forks {
            self.forks.insert(*fork, height);
        }
        self
    }

    pub fn set_fork(&mut self, fork: Fork, height: Option<u64>) {
        match height {
            Some(h) => {
                self.forks.insert(fork, h);
            }
            None => {
                self.forks.remove(&fork);
            }
        }
    }

    /// Load and validate a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError {
            field: "file",
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError {
            field: "file",
            message: format!("failed to parse: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError {
            field: "file",
            message: format!("failed to serialize: {}", e),
        })?;
        std::fs::write(path, content).map_err(|e| ConfigError {
            field: "file",
            message: format!("failed to write {}: {}", path.display(), e),
        })
    }
}

impl ChainRules for ChainConfig {
    fn engine(&self) -> EngineKind {
        self.engine
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn activation(&self, fork: Fork) -> Option<u64> {
        self.forks.get(&fork).copied()
    }

    fn activation_time(&self, fork: Fork) -> Option<u64> {
        self.fork_times.get(&fork).copied()
    }

    fn block_reward(&self, height: u64) -> U256 {
        // Forks win over the schedule.
        if self.is_enabled(Fork::Eip1234, height) {
            return params::EIP1234_BLOCK_REWARD;
        }
        if self.is_enabled(Fork::Eip649, height) {
            return params::EIP649_BLOCK_REWARD;
        }
        self.block_reward_schedule
            .range(..=height)
            .next_back()
            .map(|(_, reward)| *reward)
            .unwrap_or(params::FRONTIER_BLOCK_REWARD)
    }

    fn difficulty_bomb_delay(&self, height: u64) -> U256 {
        self.difficulty_bomb_delays
            .range(..=height)
            .fold(U256::ZERO, |acc, (_, delay)| acc.saturating_add(*delay))
    }

    fn has_bomb_delay_schedule(&self) -> bool {
        !self.difficulty_bomb_delays.is_empty()
    }

    fn fork_canonical_hash(&self, height: u64) -> Option<B256> {
        self.require_block_hashes.get(&height).copied()
    }

    fn ecip1010_length(&self) -> Option<u64> {
        self.ecip1010_length
    }

    fn ecip1017_era_rounds(&self) -> Option<u64> {
        self.ecip1017_era_rounds
    }

    fn terminal_total_difficulty(&self) -> Option<U256> {
        self.terminal_total_difficulty
    }

    fn minimum_difficulty(&self) -> Option<U256> {
        self.minimum_difficulty
    }

    fn difficulty_bound_divisor(&self) -> Option<U256> {
        self.difficulty_bound_divisor
    }

    fn duration_limit(&self) -> Option<u64> {
        self.duration_limit
    }
}

/// TOML tables only take string keys, so height-keyed maps are written
/// with the height rendered as a decimal string.
mod height_keyed {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<V, S>(map: &BTreeMap<u64, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        V: Serialize,
        S: Serializer,
    {
        let keyed: BTreeMap<String, &V> = map.iter().map(|(k, v)| (k.to_string(), v)).collect();
        keyed.serialize(serializer)
    }

    pub fn deserialize<'de, V, D>(deserializer: D) -> Result<BTreeMap<u64, V>, D::Error>
    where
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let keyed = BTreeMap::<String, V>::deserialize(deserializer)?;
        keyed
            .into_iter()
            .map(|(k, v)| {
                k.trim()
                    .parse::<u64>()
                    .map(|h| (h, v))
                    .map_err(|e| D::Error::custom(format!("invalid height '{}': {}", k, e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_names_round_trip() {
        for fork in Fork::ALL {
            assert_eq!(fork.name().parse::<Fork>(), Ok(*fork), "fork {:?}", fork);
        }
        assert!("eip9999".parse::<Fork>().is_err());
    }

    #[test]
    fn test_fork_all_is_sorted_and_complete() {
        let mut sorted = Fork::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, Fork::ALL, "ALL must follow declaration order");
        assert_eq!(Fork::ALL.len(), 59);
    }

    #[test]
    fn test_is_enabled_boundaries() {
        let config = ChainConfig::new(1, EngineKind::Ethash).with_fork(Fork::Eip2, 100);
        assert!(!config.is_enabled(Fork::Eip2, 99));
        assert!(config.is_enabled(Fork::Eip2, 100));
        assert!(config.is_enabled(Fork::Eip2, 101));
        assert!(!config.is_enabled(Fork::Eip7, u64::MAX), "absent fork never activates");
    }

    #[test]
    fn test_block_reward_precedence() {
        let mut config = ChainConfig::new(1, EngineKind::Ethash)
            .with_fork(Fork::Eip649, 100)
            .with_fork(Fork::Eip1234, 200);
        config
            .block_reward_schedule
            .insert(50, U256::from(4_000_000_000_000_000_000u128));

        assert_eq!(config.block_reward(10), params::FRONTIER_BLOCK_REWARD);
        assert_eq!(config.block_reward(50), U256::from(4_000_000_000_000_000_000u128));
        assert_eq!(config.block_reward(150), params::EIP649_BLOCK_REWARD);
        assert_eq!(config.block_reward(250), params::EIP1234_BLOCK_REWARD);

        // A later schedule entry does not override an active fork.
        config
            .block_reward_schedule
            .insert(300, U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(config.block_reward(350), params::EIP1234_BLOCK_REWARD);
    }

    #[test]
    fn test_bomb_delay_sums_activated_entries() {
        let mut config = ChainConfig::new(1, EngineKind::Ethash);
        config.difficulty_bomb_delays.insert(100, U256::from(3_000_000u64));
        config.difficulty_bomb_delays.insert(200, U256::from(2_000_000u64));

        assert_eq!(config.difficulty_bomb_delay(99), U256::ZERO);
        assert_eq!(config.difficulty_bomb_delay(100), U256::from(3_000_000u64));
        assert_eq!(config.difficulty_bomb_delay(500), U256::from(5_000_000u64));
    }

    #[test]
    fn test_validate_rejects_missing_knobs() {
        let config = ChainConfig::new(61, EngineKind::Ethash).with_fork(Fork::Ecip1017, 5);
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "ecip1017_era_rounds");

        let config = ChainConfig::new(61, EngineKind::Ethash).with_fork(Fork::Ecip1010Pause, 5);
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "ecip1010_length");

        let mut config = ChainConfig::new(61, EngineKind::Ethash);
        config.difficulty_bound_divisor = Some(U256::ZERO);
        assert_eq!(config.validate().unwrap_err().field, "difficulty_bound_divisor");
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ChainConfig::classic();
        let content = toml::to_string_pretty(&config).unwrap();
        let parsed = ChainConfig::from_toml(&content).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chain.toml");
        let config = ChainConfig::mainnet();
        config.save(&path).unwrap();
        assert_eq!(ChainConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let content = r#"
chain_id = 7
engine = "ethash-b3"

[forks]
eip2 = 0
ecip1041 = 0
"#;
        let config = ChainConfig::from_toml(content).unwrap();
        assert_eq!(config.chain_id, 7);
        assert_eq!(config.engine, EngineKind::EthashB3);
        assert!(config.is_enabled(Fork::Eip2, 0));
        assert!(config.is_enabled(Fork::Ecip1041, 0));
    }

    #[test]
    fn test_load_rejects_unknown_fork() {
        let content = r#"
[forks]
eip31337 = 5
"#;
        let err = ChainConfig::from_toml(content).unwrap_err();
        assert_eq!(err.field, "file");
        assert!(err.message.contains("unknown fork"));
    }
}
