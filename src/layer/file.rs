//! Layer metadata files (`<layer>.toml`)
//!
//! The on-disk format depends on the buildpack API:
//!
//! - before 0.6 the `build`, `launch` and `cache` flags sit at the top level
//! - from 0.6 they move into a `[types]` table, which is omitted when all
//!   three flags are false
//!
//! Buildpack data always lives in the `[metadata]` table.

use crate::api::{ApiVersion, BUILDPACK_API_TYPES_TABLE};
use crate::error::{LifecycleError, LifecycleResult};
use crate::metadata::BuildpackLayerMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Contents of a `<layer>.toml` file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerMetadataFile {
    pub data: Option<Value>,
    pub build: bool,
    pub launch: bool,
    pub cache: bool,
}

impl From<&BuildpackLayerMetadata> for LayerMetadataFile {
    fn from(layer: &BuildpackLayerMetadata) -> Self {
        Self {
            data: layer.data.clone(),
            build: layer.build,
            launch: layer.launch,
            cache: layer.cache,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LayerTypes {
    #[serde(default)]
    build: bool,
    #[serde(default)]
    launch: bool,
    #[serde(default)]
    cache: bool,
}

#[derive(Serialize)]
struct FlatLayerToml<'a> {
    build: bool,
    launch: bool,
    cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Value>,
}

#[derive(Serialize)]
struct TypedLayerToml<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    types: Option<LayerTypes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Value>,
}

#[derive(Deserialize)]
struct LayerTomlIn {
    #[serde(default)]
    build: bool,
    #[serde(default)]
    launch: bool,
    #[serde(default)]
    cache: bool,
    types: Option<LayerTypes>,
    metadata: Option<Value>,
}

impl LayerMetadataFile {
    fn any_flag(&self) -> bool {
        self.build || self.launch || self.cache
    }

    /// Encode for a buildpack implementing `api`
    pub fn to_toml(&self, api: &ApiVersion) -> LifecycleResult<String> {
        let data = self.data.as_ref().and_then(strip_nulls);
        let encoded = if api.less_than(&BUILDPACK_API_TYPES_TABLE) {
            toml::to_string(&FlatLayerToml {
                build: self.build,
                launch: self.launch,
                cache: self.cache,
                metadata: data.as_ref(),
            })?
        } else {
            let types = self.any_flag().then_some(LayerTypes {
                build: self.build,
                launch: self.launch,
                cache: self.cache,
            });
            toml::to_string(&TypedLayerToml {
                types,
                metadata: data.as_ref(),
            })?
        };
        Ok(encoded)
    }

    /// Decode a file written by a buildpack implementing `api`.
    ///
    /// Top-level flags are ignored from 0.6 on, as are `[types]` before it.
    pub fn from_toml(content: &str, api: &ApiVersion, origin: &str) -> LifecycleResult<Self> {
        let parsed: LayerTomlIn =
            toml::from_str(content).map_err(|e| LifecycleError::malformed(origin, e))?;

        let (build, launch, cache) = if api.less_than(&BUILDPACK_API_TYPES_TABLE) {
            (parsed.build, parsed.launch, parsed.cache)
        } else {
            let types = parsed.types.unwrap_or_default();
            (types.build, types.launch, types.cache)
        };

        Ok(Self {
            data: parsed.metadata,
            build,
            launch,
            cache,
        })
    }
}

/// TOML has no null; drop null values recursively. `None` when the value
/// itself is null.
pub(crate) fn strip_nulls(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => Some(Value::Object(
            map.iter()
                .filter_map(|(k, v)| strip_nulls(v).map(|v| (k.clone(), v)))
                .collect(),
        )),
        Value::Array(items) => Some(Value::Array(items.iter().filter_map(strip_nulls).collect())),
        other => Some(other.clone()),
    }
}
