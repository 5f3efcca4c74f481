//! Layer metadata documents
//!
//! Two documents describe previously built layers:
//!
//! - [`LayersMetadata`], stored as a label on the previous app image
//! - [`CacheMetadata`], stored as a label on a cache image or as a file in a
//!   volume cache
//!
//! Both carry the same per-buildpack section ([`BuildpackLayersMetadata`]).
//! The same buildpack may appear in one document and not the other, for
//! example when all of its layers are build-only.

use crate::error::{LifecycleError, LifecycleResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label holding [`LayersMetadata`] on an app image
pub const LAYERS_METADATA_LABEL: &str = "io.buildpacks.lifecycle.metadata";

/// Label (or file name) holding [`CacheMetadata`]
pub const CACHE_METADATA_LABEL: &str = "io.buildpacks.lifecycle.cache.metadata";

/// Reference to a single layer by digest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRef {
    #[serde(default)]
    pub sha: String,
}

impl LayerRef {
    pub fn new(sha: impl Into<String>) -> Self {
        Self { sha: sha.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.sha.is_empty()
    }
}

/// Metadata for one buildpack-contributed layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildpackLayerMetadata {
    /// Digest of the layer tar
    pub sha: String,

    /// Arbitrary data the buildpack attached to the layer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Layer is available to subsequent buildpacks during build
    pub build: bool,

    /// Layer is exported into the app image
    pub launch: bool,

    /// Layer is persisted to the cache
    pub cache: bool,
}

/// Persistent key/value data a buildpack keeps across builds (`store.toml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildpackStore {
    #[serde(rename = "metadata", default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Layer metadata for one buildpack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildpackLayersMetadata {
    #[serde(rename = "key")]
    pub id: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub layers: BTreeMap<String, BuildpackLayerMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<BuildpackStore>,
}

impl BuildpackLayersMetadata {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Add a layer entry, replacing any entry with the same name
    pub fn with_layer(mut self, name: impl Into<String>, layer: BuildpackLayerMetadata) -> Self {
        self.layers.insert(name.into(), layer);
        self
    }
}

/// Run image reference kept for rebase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunImageForRebase {
    #[serde(rename = "topLayer")]
    pub top_layer: String,

    pub reference: String,
}

/// Metadata label of a previously exported app image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayersMetadata {
    pub app: Vec<LayerRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sbom: Option<LayerRef>,

    pub buildpacks: Vec<BuildpackLayersMetadata>,

    pub config: LayerRef,

    pub launcher: LayerRef,

    #[serde(rename = "process-types")]
    pub process_types: LayerRef,

    #[serde(rename = "runImage")]
    pub run_image: RunImageForRebase,
}

impl LayersMetadata {
    /// Decode from the JSON label value
    pub fn from_json(json: &str, origin: &str) -> LifecycleResult<Self> {
        serde_json::from_str(json).map_err(|e| LifecycleError::malformed(origin, e))
    }

    /// Section for a buildpack, if the image recorded one
    pub fn metadata_for(&self, id: &str) -> Option<&BuildpackLayersMetadata> {
        self.buildpacks.iter().find(|bp| bp.id == id)
    }

    /// Digest of the SBOM layer, empty when none was exported
    pub fn sbom_sha(&self) -> &str {
        self.sbom.as_ref().map(|s| s.sha.as_str()).unwrap_or("")
    }
}

/// Metadata document of a cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheMetadata {
    pub sbom: LayerRef,

    pub buildpacks: Vec<BuildpackLayersMetadata>,
}

impl CacheMetadata {
    /// Decode from the JSON document
    pub fn from_json(json: &str, origin: &str) -> LifecycleResult<Self> {
        serde_json::from_str(json).map_err(|e| LifecycleError::malformed(origin, e))
    }

    /// Section for a buildpack, if the cache recorded one
    pub fn metadata_for(&self, id: &str) -> Option<&BuildpackLayersMetadata> {
        self.buildpacks.iter().find(|bp| bp.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.sbom.is_empty() && self.buildpacks.is_empty()
    }
}
