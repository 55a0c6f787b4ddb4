//! Configuration system for fedwire.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FEDWIRE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/fedwire/config.toml
//!   3. ~/.config/fedwire/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::element::DType;
use crate::rate::DataRate;
use crate::wire::max_chunk_elements;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FedwireConfig {
    pub network: NetworkConfig,
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP address the receiver binds. The sender binds an ephemeral port.
    pub bind_addr: String,
    /// SO_RCVBUF request for the chunk socket. 0 = OS default.
    pub recv_buffer_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Elements per chunk. The last chunk of a tensor may be shorter.
    pub max_payload_elements: usize,
    /// Pacing rate. Absent = send every chunk immediately.
    pub data_rate: Option<DataRate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub policy: MergePolicy,
    /// How often the daemon assembles and reports. 0 = only on shutdown.
    pub assemble_interval_secs: u64,
    /// Largest run, in elements, a receiver will reassemble. Chunks of
    /// longer runs are rejected before anything is allocated.
    pub max_elements: usize,
}

/// How repeated contributions to the same sequence slot are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Running mean of every contribution (federated averaging).
    #[default]
    Average,
    /// Last arrival wins (federated update).
    Update,
}

impl std::str::FromStr for MergePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "average" | "avg" => Ok(MergePolicy::Average),
            "update" => Ok(MergePolicy::Update),
            other => Err(ConfigError::Invalid(format!("unknown merge policy: {other}"))),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7700".to_string(),
            recv_buffer_bytes: 4 * 1024 * 1024, // 4 MiB
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_payload_elements: 256,
            data_rate: Some(DataRate::from_bps(100_000_000)),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            policy: MergePolicy::Average,
            assemble_interval_secs: 5,
            max_elements: 64 * 1024 * 1024, // 256 MiB of f32
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("fedwire")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FedwireConfig {
    /// Load config: env vars → file → defaults, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            FedwireConfig::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FEDWIRE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&FedwireConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings no chunk could be sent with. The daemon carries f32.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let k = self.sender.max_payload_elements;
        if k == 0 {
            return Err(ConfigError::Invalid(
                "sender.max_payload_elements must be non-zero".into(),
            ));
        }
        let limit = max_chunk_elements(DType::F32);
        if k > limit {
            return Err(ConfigError::Invalid(format!(
                "sender.max_payload_elements {k} exceeds the {limit} that fit in one datagram"
            )));
        }
        if self.receiver.max_elements == 0 {
            return Err(ConfigError::Invalid(
                "receiver.max_elements must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Apply FEDWIRE_* env var overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("FEDWIRE_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Ok(v) = std::env::var("FEDWIRE_SENDER__MAX_PAYLOAD_ELEMENTS") {
            self.sender.max_payload_elements = v.parse().map_err(|_| {
                ConfigError::Invalid(format!("FEDWIRE_SENDER__MAX_PAYLOAD_ELEMENTS={v}"))
            })?;
        }
        if let Ok(v) = std::env::var("FEDWIRE_SENDER__DATA_RATE") {
            self.sender.data_rate = match v.as_str() {
                "" | "none" | "0" => None,
                s => Some(
                    s.parse()
                        .map_err(|e| ConfigError::Invalid(format!("FEDWIRE_SENDER__DATA_RATE: {e}")))?,
                ),
            };
        }
        if let Ok(v) = std::env::var("FEDWIRE_RECEIVER__POLICY") {
            self.receiver.policy = v.parse()?;
        }
        if let Ok(v) = std::env::var("FEDWIRE_RECEIVER__MAX_ELEMENTS") {
            self.receiver.max_elements = v.parse().map_err(|_| {
                ConfigError::Invalid(format!("FEDWIRE_RECEIVER__MAX_ELEMENTS={v}"))
            })?;
        }
        Ok(())
    }
}
