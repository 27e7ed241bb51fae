/*!
 * KME configuration
 *
 * Policy bounds for newly registered KMEs, pairing behaviour, request
 * defaults and the master secret the wrapping-key vault is derived from.
 */

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{KmeError, KmeResult};

/// Per-KME capacity and size bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmePolicy {
    /// Maximum number of keys the KME may hold
    pub max_key_count: u64,
    /// Maximum number of keys in one generation request
    pub max_key_per_request: u32,
    /// Maximum key size in bits
    pub max_key_size: u32,
    /// Minimum key size in bits
    pub min_key_size: u32,
    /// Default key size in bits
    pub key_size: u32,
    /// Maximum number of additional SAEs in a multicast request
    #[serde(alias = "max_SAE_ID_count")]
    pub max_additional_target_count: u32,
}

impl Default for KmePolicy {
    fn default() -> Self {
        Self {
            max_key_count: 100_000,
            max_key_per_request: 128,
            max_key_size: 1024,
            min_key_size: 64,
            key_size: 352,
            max_additional_target_count: 0,
        }
    }
}

impl KmePolicy {
    /// Check the internal consistency of the bounds
    pub fn validate(&self) -> KmeResult<()> {
        if self.min_key_size == 0 || self.min_key_size > self.max_key_size {
            return Err(KmeError::config_error(
                "min_key_size",
                &format!(
                    "must be in 1..={} (got {})",
                    self.max_key_size, self.min_key_size
                ),
            ));
        }
        if self.key_size < self.min_key_size || self.key_size > self.max_key_size {
            return Err(KmeError::config_error(
                "key_size",
                &format!(
                    "must be in {}..={} (got {})",
                    self.min_key_size, self.max_key_size, self.key_size
                ),
            ));
        }
        if self.max_key_per_request == 0 {
            return Err(KmeError::config_error(
                "max_key_per_request",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// What `pair` does when one side is already paired with someone else
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingPolicy {
    /// Detach the previous partners and link the new pair
    #[default]
    Overwrite,
    /// Refuse with `AlreadyPaired` until the SAE is explicitly unpaired
    RequireUnpaired,
}

/// Values used when a generation request omits them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestDefaults {
    pub number: u32,
    /// Key size in bits; `None` falls back to the KME's negotiated `key_size`
    pub size: Option<u32>,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            number: 1,
            size: None,
        }
    }
}

/// Top-level KME configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KmeConfig {
    /// Policy applied to KMEs registered without an explicit one
    pub default_policy: KmePolicy,
    pub pairing_policy: PairingPolicy,
    pub request_defaults: RequestDefaults,
    /// Hex-encoded secret the per-KME vault keys are derived from
    pub master_secret_hex: String,
}

impl std::fmt::Debug for KmeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmeConfig")
            .field("default_policy", &self.default_policy)
            .field("pairing_policy", &self.pairing_policy)
            .field("request_defaults", &self.request_defaults)
            .field("master_secret_hex", &"[REDACTED]")
            .finish()
    }
}

impl Default for KmeConfig {
    fn default() -> Self {
        Self {
            default_policy: KmePolicy::default(),
            pairing_policy: PairingPolicy::default(),
            request_defaults: RequestDefaults::default(),
            master_secret_hex: String::new(),
        }
    }
}

/// Minimum master secret length in bytes
pub const MIN_MASTER_SECRET_LEN: usize = 16;

impl KmeConfig {
    /// Parse a configuration from JSON and validate it
    pub fn from_json_str(json: &str) -> KmeResult<Self> {
        let config: KmeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: &Path) -> KmeResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        log::info!("Loading KME configuration from {}", path.display());
        Self::from_json_str(&contents)
    }

    /// Default location: `<platform config dir>/qkd-kme/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("qkd-kme").join("config.json"))
    }

    pub fn with_master_secret(mut self, secret: &[u8]) -> Self {
        self.master_secret_hex = hex::encode(secret);
        self
    }

    pub fn validate(&self) -> KmeResult<()> {
        self.default_policy.validate()?;
        if self.request_defaults.number == 0 {
            return Err(KmeError::config_error(
                "request_defaults.number",
                "must be positive",
            ));
        }
        if matches!(self.request_defaults.size, Some(size) if size == 0 || size % 8 != 0) {
            return Err(KmeError::config_error(
                "request_defaults.size",
                "must be a positive multiple of 8",
            ));
        }
        if !self.master_secret_hex.is_empty() {
            self.master_secret()?;
        }
        Ok(())
    }

    /// Decode the master secret. An empty secret is a configuration error.
    pub fn master_secret(&self) -> KmeResult<Zeroizing<Vec<u8>>> {
        let secret = hex::decode(&self.master_secret_hex)
            .map(Zeroizing::new)
            .map_err(|e| KmeError::config_error("master_secret_hex", &e.to_string()))?;
        if secret.len() < MIN_MASTER_SECRET_LEN {
            return Err(KmeError::config_error(
                "master_secret_hex",
                &format!("must decode to at least {} bytes", MIN_MASTER_SECRET_LEN),
            ));
        }
        Ok(secret)
    }
}
