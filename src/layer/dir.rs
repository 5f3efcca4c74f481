//! A buildpack's layers directory
//!
//! For buildpack `B` and layer `L`:
//!
//! ```text
//! <layers>/<escaped-B>/<L>.toml   layer metadata
//! <layers>/<escaped-B>/<L>.sha    layer digest
//! <layers>/<escaped-B>/store.toml persistent buildpack data
//! ```

use crate::api::ApiVersion;
use crate::buildpack::GroupElement;
use crate::error::{LifecycleError, LifecycleResult};
use crate::layer::file::{strip_nulls, LayerMetadataFile};
use crate::metadata::BuildpackStore;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File names in a buildpack directory that are never layers
pub const RESERVED_NAMES: &[&str] = &["store", "launch", "build"];

/// Whether `name` is reserved and cannot be a layer
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

fn validate_layer_name(name: &str) -> LifecycleResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(LifecycleError::PathInvalid {
            path: PathBuf::from(name),
            reason: "layer names must be a single path component".to_string(),
        });
    }
    Ok(())
}

/// Layers directory of one detected buildpack
#[derive(Debug, Clone)]
pub struct BuildpackLayersDir {
    path: PathBuf,
    id: String,
    api: ApiVersion,
}

impl BuildpackLayersDir {
    pub fn new(layers_dir: &Path, buildpack: &GroupElement) -> Self {
        Self {
            path: layers_dir.join(buildpack.dir_name()),
            id: buildpack.id.clone(),
            api: buildpack.api.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buildpack_id(&self) -> &str {
        &self.id
    }

    /// `<buildpack>:<layer>` for log messages
    pub fn identifier(&self, layer: &str) -> String {
        format!("{}:{}", self.id, layer)
    }

    fn ensure_exists(&self) -> LifecycleResult<()> {
        fs::create_dir_all(&self.path).map_err(|e| {
            LifecycleError::io(
                format!("creating buildpack layers directory {}", self.path.display()),
                e,
            )
        })
    }

    fn layer_path(&self, name: &str, extension: &str) -> LifecycleResult<PathBuf> {
        validate_layer_name(name)?;
        Ok(self.path.join(format!("{name}.{extension}")))
    }

    /// Write `<name>.toml` in the format of this buildpack's API
    pub fn write_layer_metadata(&self, name: &str, file: &LayerMetadataFile) -> LifecycleResult<()> {
        let path = self.layer_path(name, "toml")?;
        self.ensure_exists()?;
        let content = file.to_toml(&self.api)?;
        fs::write(&path, content).map_err(|e| {
            LifecycleError::io(
                format!("writing layer metadata for {}", self.identifier(name)),
                e,
            )
        })
    }

    /// Write `<name>.sha`
    pub fn write_layer_sha(&self, name: &str, sha: &str) -> LifecycleResult<()> {
        let path = self.layer_path(name, "sha")?;
        self.ensure_exists()?;
        fs::write(&path, sha).map_err(|e| {
            LifecycleError::io(format!("writing layer sha for {}", self.identifier(name)), e)
        })
    }

    /// Read `<name>.toml`, `None` when absent
    pub fn read_layer_metadata(&self, name: &str) -> LifecycleResult<Option<LayerMetadataFile>> {
        let path = self.layer_path(name, "toml")?;
        match fs::read_to_string(&path) {
            Ok(content) => LayerMetadataFile::from_toml(
                &content,
                &self.api,
                &path.display().to_string(),
            )
            .map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LifecycleError::io(
                format!("reading layer metadata for {}", self.identifier(name)),
                e,
            )),
        }
    }

    /// Read `<name>.sha`, `None` when absent
    pub fn read_layer_sha(&self, name: &str) -> LifecycleResult<Option<String>> {
        let path = self.layer_path(name, "sha")?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LifecycleError::io(
                format!("reading layer sha for {}", self.identifier(name)),
                e,
            )),
        }
    }

    /// Write `store.toml`
    pub fn write_store(&self, store: &BuildpackStore) -> LifecycleResult<()> {
        self.ensure_exists()?;
        let path = self.path.join("store.toml");
        let data = match strip_nulls(&serde_json::Value::Object(store.data.clone())) {
            Some(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        let content = toml::to_string(&BuildpackStore { data })?;
        fs::write(&path, content).map_err(|e| {
            LifecycleError::io(format!("writing store.toml for {}", self.id), e)
        })
    }
}
