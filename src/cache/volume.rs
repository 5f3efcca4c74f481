//! Directory-backed cache
//!
//! Layout relative to the cache root:
//!
//! ```text
//! staging/<digest>.tar            uncommitted layers
//! staging/<metadata-file>         uncommitted metadata
//! committed/<digest>.tar          durable layers
//! committed/<metadata-file>       durable metadata
//! committed-backup/               only exists mid-commit
//! ```
//!
//! Opening a cache wipes any `staging/` or `committed-backup/` left behind
//! by a crashed build. Commit swaps `staging/` in with two renames, so a
//! readable `committed/` exists at every point except between them.

use crate::cache::{Cache, CorruptMetadataPolicy};
use crate::error::{LifecycleError, LifecycleResult};
use crate::layer::LayerStore;
use crate::metadata::{CacheMetadata, CACHE_METADATA_LABEL};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const STAGING_DIR: &str = "staging";
const COMMITTED_DIR: &str = "committed";
const BACKUP_DIR: &str = "committed-backup";

type RenameFn = fn(&Path, &Path) -> io::Result<()>;

/// A cache kept in a local directory
#[derive(Debug)]
pub struct VolumeCache {
    dir: PathBuf,
    name: String,
    staging: LayerStore,
    committed: LayerStore,
    backup_dir: PathBuf,
    metadata_policy: CorruptMetadataPolicy,
    is_committed: bool,
    rename: RenameFn,
}

impl VolumeCache {
    /// Open the cache rooted at `dir`, which must already exist
    pub fn open(dir: impl Into<PathBuf>) -> LifecycleResult<Self> {
        let dir = dir.into();
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(LifecycleError::PathInvalid {
                    path: dir,
                    reason: "cache location is not a directory".to_string(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LifecycleError::CacheNotFound(dir))
            }
            Err(e) => {
                return Err(LifecycleError::io(
                    format!("inspecting cache directory {}", dir.display()),
                    e,
                ))
            }
        }

        let cache = Self {
            name: dir.display().to_string(),
            staging: LayerStore::new(dir.join(STAGING_DIR)),
            committed: LayerStore::new(dir.join(COMMITTED_DIR)),
            backup_dir: dir.join(BACKUP_DIR),
            dir,
            metadata_policy: CorruptMetadataPolicy::default(),
            is_committed: false,
            rename: rename_dir,
        };

        cache.setup_staging_dir()?;
        remove_dir_if_present(&cache.backup_dir).map_err(|e| {
            LifecycleError::io(
                format!("removing stale backup {}", cache.backup_dir.display()),
                e,
            )
        })?;
        fs::create_dir_all(cache.committed.dir()).map_err(|e| {
            LifecycleError::io(
                format!("creating committed directory {}", cache.committed.dir().display()),
                e,
            )
        })?;

        debug!(cache = %cache.name, "Opened volume cache");
        Ok(cache)
    }

    /// Choose how undecodable committed metadata is handled
    pub fn with_metadata_policy(mut self, policy: CorruptMetadataPolicy) -> Self {
        self.metadata_policy = policy;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.dir()
    }

    pub fn committed_dir(&self) -> &Path {
        self.committed.dir()
    }

    /// Path of a committed layer tar. A missing layer is a read error.
    pub fn retrieve_layer_file(&self, diff_id: &str) -> LifecycleResult<PathBuf> {
        let path = self.committed.path_for(diff_id)?;
        if !path.is_file() {
            return Err(LifecycleError::layer_read(
                diff_id,
                "failed to find cache layer",
            ));
        }
        Ok(path)
    }

    /// Rehash a committed layer and compare with its digest
    pub fn verify_layer(&self, diff_id: &str) -> LifecycleResult<()> {
        self.committed.verify(diff_id)
    }

    /// Digests of all committed layers
    pub fn committed_layers(&self) -> LifecycleResult<Vec<String>> {
        self.committed.digests()
    }

    fn setup_staging_dir(&self) -> LifecycleResult<()> {
        let staging = self.staging.dir();
        remove_dir_if_present(staging)
            .and_then(|_| fs::create_dir_all(staging))
            .map_err(|e| {
                LifecycleError::io(
                    format!("initializing staging directory {}", staging.display()),
                    e,
                )
            })
    }

    fn ensure_writable(&self) -> LifecycleResult<()> {
        if self.is_committed {
            return Err(LifecycleError::CacheCommitted);
        }
        Ok(())
    }

    fn metadata_path(dir: &Path) -> PathBuf {
        dir.join(CACHE_METADATA_LABEL)
    }

    #[cfg(test)]
    fn with_rename(mut self, rename: RenameFn) -> Self {
        self.rename = rename;
        self
    }
}

fn rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    fs::rename(from, to)
}

fn remove_dir_if_present(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl Cache for VolumeCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self) -> bool {
        self.committed.dir().is_dir()
    }

    fn set_metadata(&mut self, metadata: &CacheMetadata) -> LifecycleResult<()> {
        self.ensure_writable()?;
        let path = Self::metadata_path(self.staging.dir());
        let content = serde_json::to_vec(metadata)?;
        fs::write(&path, content).map_err(|e| {
            LifecycleError::io(format!("writing cache metadata {}", path.display()), e)
        })
    }

    fn retrieve_metadata(&self) -> LifecycleResult<CacheMetadata> {
        let path = Self::metadata_path(self.committed.dir());
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(cache = %self.name, "No committed cache metadata");
                return Ok(CacheMetadata::default());
            }
            Err(e) => {
                return Err(LifecycleError::io(
                    format!("reading cache metadata {}", path.display()),
                    e,
                ))
            }
        };

        match CacheMetadata::from_json(&content, &path.display().to_string()) {
            Ok(metadata) => Ok(metadata),
            Err(e) if self.metadata_policy == CorruptMetadataPolicy::TreatAsEmpty => {
                warn!(cache = %self.name, error = %e, "Ignoring malformed cache metadata");
                Ok(CacheMetadata::default())
            }
            Err(e) => Err(e),
        }
    }

    fn add_layer_file(&mut self, tar_path: &Path, diff_id: &str) -> LifecycleResult<()> {
        self.ensure_writable()?;
        self.staging.insert_file(tar_path, diff_id)
    }

    fn add_layer(&mut self, reader: &mut dyn Read, diff_id: &str) -> LifecycleResult<()> {
        self.ensure_writable()?;
        self.staging.insert_reader(reader, diff_id)
    }

    fn reuse_layer(&mut self, diff_id: &str) -> LifecycleResult<()> {
        self.ensure_writable()?;
        self.staging.link_from(&self.committed, diff_id)
    }

    fn retrieve_layer(&self, diff_id: &str) -> LifecycleResult<Box<dyn Read>> {
        Ok(Box::new(self.committed.open(diff_id)?))
    }

    fn has_layer(&self, diff_id: &str) -> LifecycleResult<bool> {
        Ok(self.committed.path_for(diff_id)?.is_file())
    }

    fn layer_file(&self, diff_id: &str) -> Option<PathBuf> {
        self.retrieve_layer_file(diff_id).ok()
    }

    fn commit(&mut self) -> LifecycleResult<()> {
        self.ensure_writable()?;
        self.is_committed = true;

        let committed = self.committed.dir().to_path_buf();
        let staging = self.staging.dir().to_path_buf();

        (self.rename)(&committed, &self.backup_dir)
            .map_err(|e| LifecycleError::io(format!("backing up cache {}", self.name), e))?;

        if let Err(commit_err) = (self.rename)(&staging, &committed) {
            if let Err(rollback_err) = (self.rename)(&self.backup_dir, &committed) {
                return Err(LifecycleError::CacheRollback {
                    path: self.dir.clone(),
                    source: rollback_err,
                });
            }
            warn!(
                cache = %self.name,
                error = %commit_err,
                "Failed to commit cache, kept previous state"
            );
            return self.setup_staging_dir();
        }

        if let Err(e) = remove_dir_if_present(&self.backup_dir) {
            warn!(cache = %self.name, error = %e, "Failed to remove cache backup");
        }
        self.setup_staging_dir()?;

        info!(cache = %self.name, "Committed cache");
        Ok(())
    }
}
