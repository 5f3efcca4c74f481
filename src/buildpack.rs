//! Detected buildpack group
//!
//! The group is the ordered list of buildpacks that passed detection for
//! the current build. It is the authoritative filter for what may be
//! restored: metadata for any other buildpack is ignored.

use crate::api::ApiVersion;
use crate::error::{LifecycleError, LifecycleResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A buildpack that passed detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupElement {
    /// Buildpack ID (e.g. `heroku/nodejs`)
    pub id: String,

    /// Buildpack version
    #[serde(default)]
    pub version: String,

    /// Buildpack API the buildpack implements
    pub api: ApiVersion,
}

impl GroupElement {
    /// Create a group element
    pub fn new(id: impl Into<String>, version: impl Into<String>, api: ApiVersion) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            api,
        }
    }

    /// Directory name for this buildpack under the layers directory
    pub fn dir_name(&self) -> String {
        escape_id(&self.id)
    }
}

/// Contents of `group.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub group: Vec<GroupElement>,
}

impl Group {
    /// Read a group from a `group.toml` file
    pub fn from_file(path: &Path) -> LifecycleResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| LifecycleError::io(format!("reading group {}", path.display()), e))?;
        toml::from_str(&content).map_err(|e| LifecycleError::malformed(path.display().to_string(), e))
    }
}

/// Escape a buildpack ID for use as a directory name
pub fn escape_id(id: &str) -> String {
    id.replace('/', "_")
}
