//! Engine configuration.
//!
//! Loaded from TOML alongside the chain configuration. Every field has a
//! default so an empty file yields a working verifier.

use crate::chain_config::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How seals are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowMode {
    /// Full verification with production-sized caches.
    #[default]
    Normal,
    /// Full verification with tiny caches (1 KiB cache, 32 KiB dataset).
    Test,
    /// Accept every seal after the optional fake delay.
    Fake,
    /// Like `Fake`, but the seal of the given block number is rejected.
    FakeFail(u64),
    /// Like `Fake`, with an exponentially distributed delay whose mean is
    /// the fake delay.
    PoissonFake,
    /// Accept everything without running any header rule.
    FullFake,
}

impl PowMode {
    /// Whether seals are accepted without hashing.
    pub fn is_fake(self) -> bool {
        matches!(
            self,
            PowMode::Fake | PowMode::FakeFail(_) | PowMode::PoissonFake | PowMode::FullFake
        )
    }
}

/// Configuration of one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for light-cache dumps. `None` keeps caches in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Light caches kept in memory.
    #[serde(default = "default_caches_in_mem")]
    pub caches_in_mem: usize,
    /// Cache dumps kept on disk, counted in epochs back from the newest.
    #[serde(default = "default_caches_on_disk")]
    pub caches_on_disk: usize,
    /// Full datasets kept in memory once generated.
    #[serde(default = "default_datasets_in_mem")]
    pub datasets_in_mem: usize,
    #[serde(default)]
    pub pow_mode: PowMode,
    /// Sleep before accepting a fake seal, in milliseconds.
    #[serde(default)]
    pub fake_delay_ms: u64,
}

fn default_caches_in_mem() -> usize {
    2
}

fn default_caches_on_disk() -> usize {
    3
}

fn default_datasets_in_mem() -> usize {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            caches_in_mem: default_caches_in_mem(),
            caches_on_disk: default_caches_on_disk(),
            datasets_in_mem: default_datasets_in_mem(),
            pow_mode: PowMode::Normal,
            fake_delay_ms: 0,
        }
    }
}

impl EngineConfig {
    /// Tiny caches, real hashing.
    pub fn test() -> Self {
        Self::with_mode(PowMode::Test)
    }

    /// Accept every seal.
    pub fn fake() -> Self {
        Self::with_mode(PowMode::Fake)
    }

    /// Accept every seal except the one at `number`.
    pub fn fake_fail(number: u64) -> Self {
        Self::with_mode(PowMode::FakeFail(number))
    }

    /// Skip verification entirely.
    pub fn full_fake() -> Self {
        Self::with_mode(PowMode::FullFake)
    }

    pub fn with_mode(pow_mode: PowMode) -> Self {
        Self {
            pow_mode,
            ..Default::default()
        }
    }

    pub fn fake_delay(&self) -> Duration {
        Duration::from_millis(self.fake_delay_ms)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError {
            field: "file",
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError {
            field: "file",
            message: format!("failed to parse: {}", e),
        })
    }

    /// Write as TOML.
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
