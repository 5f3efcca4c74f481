//! Durable build cache
//!
//! A cache holds layer tars keyed by digest plus one [`CacheMetadata`]
//! document. Writes are staged and only become visible to reads after
//! [`Cache::commit`]; once committed, a cache refuses further writes.
//!
//! # Backends
//!
//! | Backend | Writes go to | Reads come from |
//! |---------|--------------|-----------------|
//! | [`VolumeCache`] | `staging/` | `committed/` |
//! | [`ImageCache`] | new image | original image |
//!
//! A cache is owned by a single build process; there is no locking.

pub mod image;
pub mod volume;

pub use image::ImageCache;
pub use volume::VolumeCache;

use crate::error::LifecycleResult;
use crate::metadata::CacheMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

/// What to do when committed cache metadata cannot be decoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorruptMetadataPolicy {
    /// Log a warning and continue as if the cache were empty; the build
    /// rebuilds its layers from scratch
    #[default]
    TreatAsEmpty,
    /// Fail the read
    Fail,
}

impl fmt::Display for CorruptMetadataPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TreatAsEmpty => write!(f, "treat-as-empty"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// A durable layer cache
pub trait Cache {
    /// Location of the cache (directory path or image reference)
    fn name(&self) -> &str;

    /// Whether committed state from a previous build exists
    fn exists(&self) -> bool;

    fn set_metadata(&mut self, metadata: &CacheMetadata) -> LifecycleResult<()>;

    /// Committed metadata; empty when the cache has none
    fn retrieve_metadata(&self) -> LifecycleResult<CacheMetadata>;

    /// Stage the layer tar at `tar_path`
    fn add_layer_file(&mut self, tar_path: &Path, diff_id: &str) -> LifecycleResult<()>;

    /// Stage a layer from a stream
    fn add_layer(&mut self, reader: &mut dyn Read, diff_id: &str) -> LifecycleResult<()>;

    /// Carry a committed layer over into the staged state
    fn reuse_layer(&mut self, diff_id: &str) -> LifecycleResult<()>;

    /// Stream a committed layer. A missing layer is a read error.
    fn retrieve_layer(&self, diff_id: &str) -> LifecycleResult<Box<dyn Read>>;

    /// Whether the committed state holds `diff_id`
    fn has_layer(&self, diff_id: &str) -> LifecycleResult<bool>;

    /// Path of a committed layer on the local filesystem, when the backend
    /// keeps one
    fn layer_file(&self, _diff_id: &str) -> Option<PathBuf> {
        None
    }

    /// Make the staged state durable
    fn commit(&mut self) -> LifecycleResult<()>;
}

impl<T: Cache + ?Sized> Cache for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn exists(&self) -> bool {
        (**self).exists()
    }

    fn set_metadata(&mut self, metadata: &CacheMetadata) -> LifecycleResult<()> {
        (**self).set_metadata(metadata)
    }

    fn retrieve_metadata(&self) -> LifecycleResult<CacheMetadata> {
        (**self).retrieve_metadata()
    }

    fn add_layer_file(&mut self, tar_path: &Path, diff_id: &str) -> LifecycleResult<()> {
        (**self).add_layer_file(tar_path, diff_id)
    }

    fn add_layer(&mut self, reader: &mut dyn Read, diff_id: &str) -> LifecycleResult<()> {
        (**self).add_layer(reader, diff_id)
    }

    fn reuse_layer(&mut self, diff_id: &str) -> LifecycleResult<()> {
        (**self).reuse_layer(diff_id)
    }

    fn retrieve_layer(&self, diff_id: &str) -> LifecycleResult<Box<dyn Read>> {
        (**self).retrieve_layer(diff_id)
    }

    fn has_layer(&self, diff_id: &str) -> LifecycleResult<bool> {
        (**self).has_layer(diff_id)
    }

    fn layer_file(&self, diff_id: &str) -> Option<PathBuf> {
        (**self).layer_file(diff_id)
    }

    fn commit(&mut self) -> LifecycleResult<()> {
        (**self).commit()
    }
}
