//! Write-through caching image
//!
//! [`CachingImage`] wraps an image and mirrors every layer added to or
//! reused by it into a [`Cache`], so the cache ends up holding exactly the
//! layers of the exported image. The cache is committed only when the image
//! was saved under its own name.

use crate::cache::Cache;
use crate::error::{LifecycleError, LifecycleResult};
use crate::image::{is_save_succeeded, Image};
use std::io::{self, Read};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// An image whose layer writes are mirrored into a cache
pub struct CachingImage<I, C> {
    image: I,
    cache: C,
}

impl<I: Image, C: Cache> CachingImage<I, C> {
    pub fn new(image: I, cache: C) -> Self {
        Self { image, cache }
    }

    pub fn inner(&self) -> &I {
        &self.image
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn into_parts(self) -> (I, C) {
        (self.image, self.cache)
    }

    /// Add a committed cache layer to the image
    fn add_cached_layer(&mut self, diff_id: &str) -> LifecycleResult<()> {
        if let Some(path) = self.cache.layer_file(diff_id) {
            return self.image.add_layer_with_diff_id(&path, diff_id);
        }

        let mut reader = self.cache.retrieve_layer(diff_id)?;
        let mut spool = NamedTempFile::new()
            .map_err(|e| LifecycleError::io(format!("spooling layer {diff_id}"), e))?;
        io::copy(&mut reader, spool.as_file_mut())
            .map_err(|e| LifecycleError::io(format!("spooling layer {diff_id}"), e))?;
        self.image.add_layer_with_diff_id(spool.path(), diff_id)
    }
}

impl<I: Image, C: Cache> Image for CachingImage<I, C> {
    fn name(&self) -> &str {
        self.image.name()
    }

    fn found(&self) -> bool {
        self.image.found()
    }

    fn identifier(&self) -> LifecycleResult<String> {
        self.image.identifier()
    }

    fn label(&self, key: &str) -> LifecycleResult<Option<String>> {
        self.image.label(key)
    }

    fn set_label(&mut self, key: &str, value: &str) -> LifecycleResult<()> {
        self.image.set_label(key, value)
    }

    fn add_layer_with_diff_id(&mut self, path: &Path, diff_id: &str) -> LifecycleResult<()> {
        self.cache.add_layer_file(path, diff_id)?;
        self.image.add_layer_with_diff_id(path, diff_id)
    }

    fn reuse_layer(&mut self, diff_id: &str) -> LifecycleResult<()> {
        if self.cache.has_layer(diff_id)? {
            debug!(layer = %diff_id, "Reusing layer from cache");
            self.cache.reuse_layer(diff_id)?;
            return self.add_cached_layer(diff_id);
        }

        debug!(layer = %diff_id, "Layer not cached, reusing from image");
        self.image.reuse_layer(diff_id)?;
        let mut reader = self.image.get_layer(diff_id)?;
        self.cache.add_layer(&mut reader, diff_id)
    }

    fn get_layer(&self, diff_id: &str) -> LifecycleResult<Box<dyn Read>> {
        match self.cache.retrieve_layer(diff_id) {
            Ok(reader) => Ok(reader),
            Err(e) if e.is_read_err() => {
                debug!(layer = %diff_id, "Layer not in cache, reading from image");
                self.image.get_layer(diff_id)
            }
            Err(e) => Err(e),
        }
    }

    fn save(&mut self, additional_names: &[String]) -> LifecycleResult<()> {
        let result = self.image.save(additional_names);

        if !is_save_succeeded(&result, self.image.name()) {
            warn!(image = %self.image.name(), "Image not saved, leaving cache uncommitted");
            return result;
        }

        self.cache.commit()?;
        result
    }

    fn delete(&mut self) -> LifecycleResult<()> {
        self.image.delete()
    }
}
