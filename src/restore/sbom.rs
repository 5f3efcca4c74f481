//! SBOM restoration
//!
//! SBOM files from a previous build travel as a single layer whose tar
//! entries are relative to the layers directory:
//!
//! ```text
//! sbom/launch/<escaped-bp>/<layer>/sbom.<format>
//! sbom/cache/<escaped-bp>/<layer>/sbom.<format>
//! ```
//!
//! The layer is first unpacked under `<layers>/sbom`, then fanned out into
//! each detected buildpack's directory as `<layer>.sbom.<format>`.

use crate::api::{ApiVersion, PLATFORM_API_SBOM};
use crate::buildpack::GroupElement;
use crate::cache::Cache;
use crate::error::{LifecycleError, LifecycleResult};
use crate::image::Image;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, info, warn};

const SBOM_DIR: &str = "sbom";
const SBOM_SOURCES: &[&str] = &["launch", "cache"];
const SBOM_FILE_PREFIX: &str = "sbom.";

/// Restores SBOM files from a previous image or a cache
pub trait SbomRestorer {
    /// Unpack the SBOM layer `digest` of the previous app image
    fn restore_from_previous(&self, image: Option<&dyn Image>, digest: &str) -> LifecycleResult<()>;

    /// Unpack the SBOM layer `digest` from the cache
    fn restore_from_cache(&self, cache: &dyn Cache, digest: &str) -> LifecycleResult<()>;

    /// Move unpacked SBOM files into the layers directories of `group`
    fn restore_to_buildpack_layers(&self, group: &[GroupElement]) -> LifecycleResult<()>;
}

/// Pick the restorer for `platform_api`
pub fn new_sbom_restorer(layers_dir: &Path, platform_api: &ApiVersion) -> Box<dyn SbomRestorer> {
    if platform_api.less_than(&PLATFORM_API_SBOM) {
        debug!(platform_api = %platform_api, "SBOM restoration not supported");
        Box::new(NopSbomRestorer)
    } else {
        Box::new(DefaultSbomRestorer::new(layers_dir))
    }
}

/// Restorer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NopSbomRestorer;

impl SbomRestorer for NopSbomRestorer {
    fn restore_from_previous(&self, _image: Option<&dyn Image>, _digest: &str) -> LifecycleResult<()> {
        Ok(())
    }

    fn restore_from_cache(&self, _cache: &dyn Cache, _digest: &str) -> LifecycleResult<()> {
        Ok(())
    }

    fn restore_to_buildpack_layers(&self, _group: &[GroupElement]) -> LifecycleResult<()> {
        Ok(())
    }
}

/// Restorer writing into a layers directory
#[derive(Debug, Clone)]
pub struct DefaultSbomRestorer {
    layers_dir: PathBuf,
}

impl DefaultSbomRestorer {
    pub fn new(layers_dir: impl Into<PathBuf>) -> Self {
        Self {
            layers_dir: layers_dir.into(),
        }
    }

    fn sbom_dir(&self) -> PathBuf {
        self.layers_dir.join(SBOM_DIR)
    }

    /// Unpack `reader` into the layers directory
    fn extract<R: Read>(&self, reader: R, digest: &str) -> LifecycleResult<()> {
        let context = || format!("extracting SBOM layer {digest}");
        let mut archive = Archive::new(reader);
        fs::create_dir_all(&self.layers_dir).map_err(|e| LifecycleError::io(context(), e))?;

        for entry in archive.entries().map_err(|e| LifecycleError::io(context(), e))? {
            let mut entry = entry.map_err(|e| LifecycleError::io(context(), e))?;
            let path = entry
                .path()
                .map_err(|e| LifecycleError::io(context(), e))?
                .into_owned();

            if !is_contained(&path) {
                warn!(path = %path.display(), "Skipping SBOM entry outside the layers directory");
                continue;
            }

            let kind = entry.header().entry_type();
            if !matches!(kind, EntryType::Regular | EntryType::Continuous | EntryType::Directory) {
                warn!(path = %path.display(), kind = ?kind, "Skipping SBOM entry that is not a file or directory");
                continue;
            }

            let unpacked = entry
                .unpack_in(&self.layers_dir)
                .map_err(|e| LifecycleError::io(context(), e))?;
            if !unpacked {
                warn!(path = %path.display(), "Skipping SBOM entry outside the layers directory");
            }
        }

        Ok(())
    }

    /// Copy `sbom/<source>/<bp>/<layer>/sbom.<fmt>` for one buildpack
    fn fan_out(&self, source_dir: &Path, buildpack: &GroupElement) -> LifecycleResult<()> {
        let bp_sbom_dir = source_dir.join(buildpack.dir_name());
        let bp_layers_dir = self.layers_dir.join(buildpack.dir_name());
        if !bp_sbom_dir.is_dir() {
            return Ok(());
        }
        if !bp_layers_dir.is_dir() {
            debug!(buildpack = %buildpack.id, "No layers directory, dropping SBOM files");
            return Ok(());
        }

        for layer in read_dir(&bp_sbom_dir)? {
            if !is_real(&layer, fs::FileType::is_dir) {
                continue;
            }
            let Some(layer_name) = layer.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            for file in read_dir(&layer)? {
                if !is_real(&file, fs::FileType::is_file) {
                    continue;
                }
                let Some(format) = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix(SBOM_FILE_PREFIX))
                else {
                    continue;
                };

                let dest = bp_layers_dir.join(format!("{layer_name}.sbom.{format}"));
                debug!(buildpack = %buildpack.id, layer = %layer_name, format = %format, "Restoring SBOM");
                fs::copy(&file, &dest).map_err(|e| {
                    LifecycleError::io(format!("restoring SBOM {}", dest.display()), e)
                })?;
            }
        }

        Ok(())
    }
}

impl SbomRestorer for DefaultSbomRestorer {
    fn restore_from_previous(&self, image: Option<&dyn Image>, digest: &str) -> LifecycleResult<()> {
        if digest.is_empty() {
            return Ok(());
        }
        let image = image.ok_or_else(|| LifecycleError::PreviousImageMissing(digest.to_string()))?;

        match image.get_layer(digest) {
            Ok(reader) => {
                info!(image = %image.name(), layer = %digest, "Restoring SBOM from previous image");
                self.extract(reader, digest)
            }
            Err(e) if e.is_read_err() => {
                warn!(image = %image.name(), layer = %digest, "SBOM layer not found in previous image");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn restore_from_cache(&self, cache: &dyn Cache, digest: &str) -> LifecycleResult<()> {
        if digest.is_empty() {
            return Ok(());
        }

        match cache.retrieve_layer(digest) {
            Ok(reader) => {
                info!(cache = %cache.name(), layer = %digest, "Restoring SBOM from cache");
                self.extract(reader, digest)
            }
            Err(e) if e.is_read_err() => {
                warn!(cache = %cache.name(), layer = %digest, "SBOM layer not found in cache");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn restore_to_buildpack_layers(&self, group: &[GroupElement]) -> LifecycleResult<()> {
        let sbom_dir = self.sbom_dir();
        if !sbom_dir.exists() {
            return Ok(());
        }

        let result = SBOM_SOURCES.iter().try_for_each(|source| {
            let source_dir = sbom_dir.join(source);
            group.iter().try_for_each(|bp| self.fan_out(&source_dir, bp))
        });

        if let Err(e) = fs::remove_dir_all(&sbom_dir) {
            warn!(path = %sbom_dir.display(), error = %e, "Failed to remove SBOM staging directory");
        }
        result
    }
}

/// Whether a tar entry path stays inside the extraction root
fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Whether `path` itself, not a symlink target, has the wanted type
fn is_real(path: &Path, kind: fn(&fs::FileType) -> bool) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| kind(&meta.file_type()))
        .unwrap_or(false)
}

fn read_dir(dir: &Path) -> LifecycleResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| LifecycleError::io(format!("reading {}", dir.display()), e))?;
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| LifecycleError::io(format!("reading {}", dir.display()), e))?;
    paths.sort();
    Ok(paths)
}
