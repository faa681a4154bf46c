use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wc_core::{
    AppMetadata, KeyValueStorage, MemoryStorage, RelayProtocolOptions, SqliteStorage, StorageError,
};

const ONE_HOUR: u64 = 60 * 60;
const ONE_DAY: u64 = 24 * ONE_HOUR;

/// Lifetimes, in seconds, of a sequence in each phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TtlConfig {
    /// Proposal topic waiting for a response.
    pub proposed: u64,
    /// Responded or pre-settled records waiting for an acknowledgement.
    pub pending: u64,
    pub settled: u64,
}

impl TtlConfig {
    pub const PAIRING: TtlConfig =
        TtlConfig { proposed: ONE_HOUR, pending: ONE_DAY, settled: 30 * ONE_DAY };
    pub const SESSION: TtlConfig =
        TtlConfig { proposed: ONE_HOUR, pending: ONE_DAY, settled: 7 * ONE_DAY };

    fn validate(&self, name: &str) -> Result<(), String> {
        if self.proposed == 0 || self.pending == 0 || self.settled == 0 {
            return Err(format!("{name}: ttl values must be greater than zero"));
        }
        if self.proposed > self.settled || self.pending > self.settled {
            return Err(format!("{name}: settled ttl must be the longest"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub relay: RelayProtocolOptions,
    /// Role this client takes in pairings it proposes.
    pub controller: bool,
    pub metadata: Option<AppMetadata>,
    pub pairing_ttl: TtlConfig,
    pub session_ttl: TtlConfig,
    pub sweep_interval_secs: u64,
    pub request_timeout_ms: u64,
    pub storage_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relay: RelayProtocolOptions::default(),
            controller: false,
            metadata: None,
            pairing_ttl: TtlConfig::PAIRING,
            session_ttl: TtlConfig::SESSION,
            sweep_interval_secs: 60,
            request_timeout_ms: 10_000,
            storage_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EngineConfigRaw {
    #[serde(default)]
    relay: Option<RelayProtocolOptions>,
    #[serde(default)]
    controller: bool,
    #[serde(default)]
    metadata: Option<AppMetadata>,
    #[serde(default)]
    pairing_ttl: Option<TtlConfig>,
    #[serde(default)]
    session_ttl: Option<TtlConfig>,
    #[serde(default)]
    sweep_interval_secs: Option<u64>,
    #[serde(default)]
    request_timeout_ms: Option<u64>,
    #[serde(default)]
    storage_path: Option<PathBuf>,
}

impl<'de> Deserialize<'de> for EngineConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = EngineConfigRaw::deserialize(deserializer)?;
        let defaults = EngineConfig::default();
        let mut relay = raw.relay.unwrap_or(defaults.relay);
        relay.protocol = relay.protocol.trim().to_string();
        let config = EngineConfig {
            relay,
            controller: raw.controller,
            metadata: raw.metadata,
            pairing_ttl: raw.pairing_ttl.unwrap_or(defaults.pairing_ttl),
            session_ttl: raw.session_ttl.unwrap_or(defaults.session_ttl),
            sweep_interval_secs: raw.sweep_interval_secs.unwrap_or(defaults.sweep_interval_secs),
            request_timeout_ms: raw.request_timeout_ms.unwrap_or(defaults.request_timeout_ms),
            storage_path: raw.storage_path,
        };
        config.validate().map_err(D::Error::custom)?;
        Ok(config)
    }
}

impl EngineConfig {
    pub fn from_toml(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.relay.protocol.is_empty() {
            return Err("relay.protocol must not be empty".to_string());
        }
        if let Some(metadata) = &self.metadata {
            if metadata.name.trim().is_empty() {
                return Err("metadata.name must not be empty".to_string());
            }
        }
        self.pairing_ttl.validate("pairing_ttl")?;
        self.session_ttl.validate("session_ttl")?;
        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be greater than zero".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be greater than zero".to_string());
        }
        Ok(())
    }

    /// SQLite at `storage_path` when set, otherwise process-local memory.
    pub fn open_storage(&self) -> Result<Arc<dyn KeyValueStorage>, StorageError> {
        match &self.storage_path {
            Some(path) => {
                log::info!("opening state store at {}", path.display());
                Ok(Arc::new(SqliteStorage::open(path)?))
            }
            None => Ok(Arc::new(MemoryStorage::new())),
        }
    }
}
