//! Configuration schema for lifecycle-cache
//!
//! Configuration is stored at `~/.config/lifecycle-cache/config.toml`

use crate::api::{ApiVersion, PLATFORM_API_LATEST};
use crate::cache::CorruptMetadataPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Layer restoration settings
    pub restore: RestoreConfig,

    /// Cache settings
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// How buildpacks on a deprecated API are reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeprecationMode {
    /// Log a warning and continue
    #[default]
    Warn,
    /// Fail the restore
    Error,
    /// Continue silently
    Quiet,
}

impl fmt::Display for DeprecationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Layer restoration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Platform API the restore runs under
    pub platform_api: ApiVersion,

    /// Only restore store.toml, never layer metadata
    pub skip_layers: bool,

    /// Handling of buildpacks on a deprecated API
    pub deprecation_mode: DeprecationMode,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            platform_api: PLATFORM_API_LATEST,
            skip_layers: false,
            deprecation_mode: DeprecationMode::Warn,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// What to do with cache metadata that cannot be decoded
    pub corrupt_metadata: CorruptMetadataPolicy,
}
