//! Content-addressed layer storage
//!
//! Maps a layer digest to a single tar file `<dir>/<digest>.tar`. Both cache
//! backends and the caching image share the digest helpers here, and the
//! volume cache keeps one store for `staging/` and one for `committed/`.

use crate::error::{LifecycleError, LifecycleResult};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Digest algorithm used for layer identities
pub const DIGEST_ALGORITHM: &str = "sha256";

/// Compute the digest of everything readable from `reader`
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{}:{}", DIGEST_ALGORITHM, hex::encode(hasher.finalize())))
}

/// Compute the digest of a layer tar on disk
pub fn digest_file(path: &Path) -> LifecycleResult<String> {
    let file = File::open(path)
        .map_err(|e| LifecycleError::io(format!("opening layer {}", path.display()), e))?;
    digest_reader(BufReader::new(file))
        .map_err(|e| LifecycleError::io(format!("hashing layer {}", path.display()), e))
}

/// Check that a digest is `<algorithm>:<lowercase hex>`.
///
/// Digests become file names, so anything else (separators, `..`, empty
/// parts) is rejected.
pub fn validate_digest(digest: &str) -> LifecycleResult<()> {
    let invalid = || LifecycleError::InvalidDigest(digest.to_string());
    let (algorithm, hex_part) = digest.split_once(':').ok_or_else(invalid)?;

    if algorithm.is_empty() || !algorithm.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(invalid());
    }
    if hex_part.is_empty()
        || !hex_part
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(invalid());
    }
    Ok(())
}

fn file_name_for(digest: &str) -> String {
    if cfg!(windows) {
        format!("{}.tar", digest.replace(':', "-"))
    } else {
        format!("{digest}.tar")
    }
}

fn digest_for_file_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(".tar")?;
    let digest = if cfg!(windows) {
        stem.replacen('-', ":", 1)
    } else {
        stem.to_string()
    };
    validate_digest(&digest).ok().map(|_| digest)
}

/// A directory of layer tars keyed by digest
#[derive(Debug, Clone)]
pub struct LayerStore {
    dir: PathBuf,
}

impl LayerStore {
    /// Create a store rooted at `dir`. The directory is not created.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the tar for `digest`
    pub fn path_for(&self, digest: &str) -> LifecycleResult<PathBuf> {
        validate_digest(digest)?;
        Ok(self.dir.join(file_name_for(digest)))
    }

    /// Whether a tar for `digest` is present
    pub fn contains(&self, digest: &str) -> bool {
        self.path_for(digest).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Copy the tar at `src` into the store.
    ///
    /// The copy goes through a temporary file in the store directory so a
    /// crash never leaves a truncated blob under its final name. A blob that
    /// is already present is not rewritten.
    pub fn insert_file(&self, src: &Path, digest: &str) -> LifecycleResult<()> {
        let dest = self.path_for(digest)?;
        if dest.is_file() {
            debug!(digest = %digest, "Layer already stored, skipping copy");
            return Ok(());
        }

        let file = File::open(src).map_err(|e| {
            LifecycleError::io(format!("caching layer {digest} from {}", src.display()), e)
        })?;
        self.write_blob(BufReader::new(file), digest, &dest)
    }

    /// Stream a tar into the store
    pub fn insert_reader<R: Read>(&self, reader: R, digest: &str) -> LifecycleResult<()> {
        let dest = self.path_for(digest)?;
        if dest.is_file() {
            debug!(digest = %digest, "Layer already stored, skipping write");
            return Ok(());
        }
        self.write_blob(reader, digest, &dest)
    }

    fn write_blob<R: Read>(&self, mut reader: R, digest: &str, dest: &Path) -> LifecycleResult<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| LifecycleError::io(format!("caching layer {digest}"), e))?;
        io::copy(&mut reader, tmp.as_file_mut())
            .map_err(|e| LifecycleError::io(format!("caching layer {digest}"), e))?;
        tmp.persist(dest)
            .map_err(|e| LifecycleError::io(format!("caching layer {digest}"), e.error))?;
        Ok(())
    }

    /// Make a blob from `other` available in this store.
    ///
    /// Hard-links when possible and falls back to a copy. A missing source
    /// blob is a read error.
    pub fn link_from(&self, other: &LayerStore, digest: &str) -> LifecycleResult<()> {
        let src = other.path_for(digest)?;
        if !src.is_file() {
            return Err(LifecycleError::layer_read(
                digest,
                format!("no cached layer in {}", other.dir.display()),
            ));
        }

        let dest = self.path_for(digest)?;
        match fs::hard_link(&src, &dest) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => {
                debug!(digest = %digest, error = %e, "Hard link failed, copying layer");
                self.insert_file(&src, digest)
            }
        }
    }

    /// Open the tar for `digest`. A missing blob is a read error.
    pub fn open(&self, digest: &str) -> LifecycleResult<File> {
        let path = self.path_for(digest)?;
        File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LifecycleError::layer_read(digest, "failed to find cache layer")
            } else {
                LifecycleError::io(format!("retrieving layer {digest}"), e)
            }
        })
    }

    /// Rehash a stored blob and compare with its name
    pub fn verify(&self, digest: &str) -> LifecycleResult<()> {
        let file = self.open(digest)?;
        let actual = digest_reader(BufReader::new(file))
            .map_err(|e| LifecycleError::io(format!("hashing layer {digest}"), e))?;
        if actual != digest {
            return Err(LifecycleError::layer_read(
                digest,
                format!("content hashes to {actual}"),
            ));
        }
        Ok(())
    }

    /// Digests of all stored blobs, sorted
    pub fn digests(&self) -> LifecycleResult<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LifecycleError::io(
                    format!("listing layers in {}", self.dir.display()),
                    e,
                ))
            }
        };

        let mut digests = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                LifecycleError::io(format!("listing layers in {}", self.dir.display()), e)
            })?;
            if let Some(digest) = entry.file_name().to_str().and_then(digest_for_file_name) {
                digests.push(digest);
            }
        }
        digests.sort();
        Ok(digests)
    }
}
