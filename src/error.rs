//! Error types for the lifecycle cache
//!
//! All modules use `LifecycleResult<T>` as their return type.

use crate::image::SaveError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for lifecycle cache operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// All errors that can occur in the cache and restoration engine
#[derive(Error, Debug)]
pub enum LifecycleError {
    // Cache errors
    #[error("Cache directory not found: {0}")]
    CacheNotFound(PathBuf),

    #[error("Cache cannot be modified after commit")]
    CacheCommitted,

    #[error("Failed to read cached layer {digest}: {reason}")]
    LayerRead { digest: String, reason: String },

    #[error("Rolling back cache {path} after failed commit: {source}")]
    CacheRollback {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid layer digest: {0}")]
    InvalidDigest(String),

    // Metadata errors
    #[error("Malformed metadata in {origin}: {reason}")]
    MetadataMalformed { origin: String, reason: String },

    #[error("Buildpack {id} uses deprecated Buildpack API {version}")]
    DeprecatedApi { id: String, version: String },

    #[error("Invalid API version: {0}")]
    InvalidApiVersion(String),

    // Image errors
    #[error("{0}")]
    ImageSave(SaveError),

    #[error("Image {image} has no layer with diff ID {digest}")]
    ImageLayerNotFound { image: String, digest: String },

    #[error("Image {image}: {reason}")]
    Image { image: String, reason: String },

    #[error("Restoring layer: previous image not found for {0:?}")]
    PreviousImageMissing(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path: {path}: {reason}")]
    PathInvalid { path: PathBuf, reason: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    User(String),
}

impl LifecycleError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a layer read error
    pub fn layer_read(digest: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LayerRead {
            digest: digest.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed metadata error
    pub fn malformed(origin: impl Into<String>, reason: impl ToString) -> Self {
        Self::MetadataMalformed {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error means a layer could not be read, as opposed to a
    /// generic failure. Callers treat these as "not cached".
    pub fn is_read_err(&self) -> bool {
        matches!(
            self,
            Self::LayerRead { .. } | Self::ImageLayerNotFound { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::CacheNotFound(_) => Some("Create the cache directory or mount a cache volume"),
            Self::CacheRollback { .. } => {
                Some("The cache has no committed state; the next build starts from an empty cache")
            }
            Self::DeprecatedApi { .. } => Some("Set restore.deprecation_mode = \"warn\" to continue"),
            _ => None,
        }
    }
}
