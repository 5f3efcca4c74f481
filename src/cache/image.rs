//! Image-backed cache
//!
//! The cached layers are the layers of an OCI image and the metadata is a
//! label on it. Reads come from the image saved by the previous build
//! (`orig`); writes build up a new image that replaces it on commit.

use crate::cache::{Cache, CorruptMetadataPolicy};
use crate::error::{LifecycleError, LifecycleResult};
use crate::image::Image;
use crate::metadata::{CacheMetadata, CACHE_METADATA_LABEL};
use std::io::{self, Read};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// A cache stored as an OCI image
pub struct ImageCache {
    orig: Box<dyn Image>,
    new: Box<dyn Image>,
    metadata_policy: CorruptMetadataPolicy,
    committed: bool,
}

impl ImageCache {
    /// Wrap the previous cache image and the image that will replace it
    pub fn new(orig: Box<dyn Image>, new: Box<dyn Image>) -> Self {
        Self {
            orig,
            new,
            metadata_policy: CorruptMetadataPolicy::default(),
            committed: false,
        }
    }

    /// Choose how an undecodable metadata label is handled
    pub fn with_metadata_policy(mut self, policy: CorruptMetadataPolicy) -> Self {
        self.metadata_policy = policy;
        self
    }

    /// The image reads currently come from
    pub fn origin(&self) -> &dyn Image {
        self.orig.as_ref()
    }

    fn ensure_writable(&self) -> LifecycleResult<()> {
        if self.committed {
            return Err(LifecycleError::CacheCommitted);
        }
        Ok(())
    }
}

impl Cache for ImageCache {
    fn name(&self) -> &str {
        self.orig.name()
    }

    fn exists(&self) -> bool {
        self.orig.found()
    }

    fn set_metadata(&mut self, metadata: &CacheMetadata) -> LifecycleResult<()> {
        self.ensure_writable()?;
        let json = serde_json::to_string(metadata)?;
        self.new.set_label(CACHE_METADATA_LABEL, &json)
    }

    fn retrieve_metadata(&self) -> LifecycleResult<CacheMetadata> {
        if !self.orig.found() {
            info!(cache = %self.orig.name(), "Cache image not found");
            return Ok(CacheMetadata::default());
        }

        let Some(label) = self.orig.label(CACHE_METADATA_LABEL)? else {
            debug!(cache = %self.orig.name(), "Cache image has no metadata label");
            return Ok(CacheMetadata::default());
        };

        match CacheMetadata::from_json(&label, self.orig.name()) {
            Ok(metadata) => Ok(metadata),
            Err(e) if self.metadata_policy == CorruptMetadataPolicy::TreatAsEmpty => {
                warn!(cache = %self.orig.name(), error = %e, "Ignoring malformed cache metadata");
                Ok(CacheMetadata::default())
            }
            Err(e) => Err(e),
        }
    }

    fn add_layer_file(&mut self, tar_path: &Path, diff_id: &str) -> LifecycleResult<()> {
        self.ensure_writable()?;
        self.new.add_layer_with_diff_id(tar_path, diff_id)
    }

    fn add_layer(&mut self, reader: &mut dyn Read, diff_id: &str) -> LifecycleResult<()> {
        self.ensure_writable()?;
        let mut spool = NamedTempFile::new()
            .map_err(|e| LifecycleError::io(format!("spooling layer {diff_id}"), e))?;
        io::copy(reader, spool.as_file_mut())
            .map_err(|e| LifecycleError::io(format!("spooling layer {diff_id}"), e))?;
        self.new.add_layer_with_diff_id(spool.path(), diff_id)
    }

    fn reuse_layer(&mut self, diff_id: &str) -> LifecycleResult<()> {
        self.ensure_writable()?;
        self.new.reuse_layer(diff_id)
    }

    fn retrieve_layer(&self, diff_id: &str) -> LifecycleResult<Box<dyn Read>> {
        self.orig
            .get_layer(diff_id)
            .map_err(|e| LifecycleError::layer_read(diff_id, e.to_string()))
    }

    fn has_layer(&self, diff_id: &str) -> LifecycleResult<bool> {
        Ok(self.orig.found() && self.orig.get_layer(diff_id).is_ok())
    }

    fn commit(&mut self) -> LifecycleResult<()> {
        self.ensure_writable()?;

        self.new.save(&[])?;
        self.committed = true;

        // The new image is the cache from here on, even if cleanup fails
        let deleted = if self.orig.found() {
            match self.new.identifier() {
                Ok(new_id) if self.orig.identifier().ok().as_deref() == Some(new_id.as_str()) => {
                    debug!(cache = %self.new.name(), "Cache image unchanged, keeping it");
                    Ok(())
                }
                Ok(_) => self.orig.delete(),
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        };

        std::mem::swap(&mut self.orig, &mut self.new);
        info!(cache = %self.orig.name(), "Committed cache image");
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{MemoryImage, MemoryRegistry};
    use crate::layer::digest_reader;
    use crate::metadata::BuildpackLayersMetadata;
    use std::fs;
    use tempfile::TempDir;

    const CACHE_REF: &str = "registry.test/app-cache";

    fn cache_for(registry: &MemoryRegistry) -> ImageCache {
        ImageCache::new(
            Box::new(MemoryImage::open(registry, CACHE_REF)),
            Box::new(MemoryImage::empty(registry, CACHE_REF).with_previous_image(CACHE_REF)),
        )
    }

    fn read_all(mut reader: Box<dyn Read>) -> Vec<u8> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        buf
    }

    fn metadata_for(id: &str) -> CacheMetadata {
        CacheMetadata {
            buildpacks: vec![BuildpackLayersMetadata::new(id, "1.0.0")],
            ..Default::default()
        }
    }

    /// Commit one layer with content `content` and return its digest
    fn seed(registry: &MemoryRegistry, dir: &TempDir, content: &[u8]) -> String {
        let path = dir.path().join("seed.tar");
        fs::write(&path, content).unwrap();
        let digest = digest_reader(content).unwrap();

        let mut cache = cache_for(registry);
        cache.add_layer_file(&path, &digest).unwrap();
        cache.set_metadata(&metadata_for("old.bp")).unwrap();
        cache.commit().unwrap();
        digest
    }

    #[test]
    fn missing_image_reads_as_empty() {
        let registry = MemoryRegistry::new();
        let cache = cache_for(&registry);
        assert!(!cache.exists());
        assert_eq!(cache.retrieve_metadata().unwrap(), CacheMetadata::default());
    }

    #[test]
    fn commit_makes_layers_readable() {
        let dir = TempDir::new().unwrap();
        let registry = MemoryRegistry::new();
        let digest = seed(&registry, &dir, b"cached bytes");

        let cache = cache_for(&registry);
        assert!(cache.exists());
        assert!(cache.has_layer(&digest).unwrap());
        assert_eq!(read_all(cache.retrieve_layer(&digest).unwrap()), b"cached bytes");
        assert_eq!(cache.retrieve_metadata().unwrap().buildpacks[0].id, "old.bp");
    }

    #[test]
    fn reads_come_from_original_image() {
        let dir = TempDir::new().unwrap();
        let registry = MemoryRegistry::new();
        seed(&registry, &dir, b"old");

        let mut cache = cache_for(&registry);
        cache.set_metadata(&metadata_for("new.bp")).unwrap();
        cache.add_layer(&mut &b"new"[..], "sha256:0e").unwrap();

        assert_eq!(cache.retrieve_metadata().unwrap().buildpacks[0].id, "old.bp");
        match cache.retrieve_layer("sha256:0e") {
            Err(e) => assert!(e.is_read_err()),
            Ok(_) => panic!("uncommitted layer must not be readable"),
        }
    }

    #[test]
    fn reuse_then_commit_replaces_original() {
        let dir = TempDir::new().unwrap();
        let registry = MemoryRegistry::new();
        let digest = seed(&registry, &dir, b"keep me");
        let old_id = registry.identifier_of(CACHE_REF).unwrap();

        let mut cache = cache_for(&registry);
        cache.reuse_layer(&digest).unwrap();
        cache.set_metadata(&metadata_for("new.bp")).unwrap();
        cache.commit().unwrap();

        assert!(!registry.has_manifest(&old_id));
        assert_eq!(registry.manifest_count(), 1);
        assert_eq!(read_all(cache.retrieve_layer(&digest).unwrap()), b"keep me");
        assert_eq!(cache.retrieve_metadata().unwrap().buildpacks[0].id, "new.bp");
    }

    #[test]
    fn unchanged_image_is_not_deleted() {
        let dir = TempDir::new().unwrap();
        let registry = MemoryRegistry::new();
        let digest = seed(&registry, &dir, b"same");

        let mut cache = cache_for(&registry);
        cache.reuse_layer(&digest).unwrap();
        cache.set_metadata(&metadata_for("old.bp")).unwrap();
        cache.commit().unwrap();

        assert!(registry.contains(CACHE_REF));
        assert_eq!(cache.retrieve_metadata().unwrap().buildpacks[0].id, "old.bp");
    }

    #[test]
    fn second_commit_and_late_writes_fail() {
        let registry = MemoryRegistry::new();
        let mut cache = cache_for(&registry);
        cache.commit().unwrap();

        assert!(matches!(cache.commit(), Err(LifecycleError::CacheCommitted)));
        assert!(matches!(
            cache.set_metadata(&CacheMetadata::default()),
            Err(LifecycleError::CacheCommitted)
        ));
        assert!(matches!(
            cache.reuse_layer("sha256:aa"),
            Err(LifecycleError::CacheCommitted)
        ));
    }

    /// Saves normally but cannot report its identifier
    struct UnidentifiedImage(MemoryImage);

    impl Image for UnidentifiedImage {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn found(&self) -> bool {
            self.0.found()
        }

        fn identifier(&self) -> LifecycleResult<String> {
            Err(LifecycleError::Image {
                image: self.0.name().to_string(),
                reason: "digest unavailable".to_string(),
            })
        }

        fn label(&self, key: &str) -> LifecycleResult<Option<String>> {
            self.0.label(key)
        }

        fn set_label(&mut self, key: &str, value: &str) -> LifecycleResult<()> {
            self.0.set_label(key, value)
        }

        fn add_layer_with_diff_id(&mut self, path: &Path, diff_id: &str) -> LifecycleResult<()> {
            self.0.add_layer_with_diff_id(path, diff_id)
        }

        fn reuse_layer(&mut self, diff_id: &str) -> LifecycleResult<()> {
            self.0.reuse_layer(diff_id)
        }

        fn get_layer(&self, diff_id: &str) -> LifecycleResult<Box<dyn Read>> {
            self.0.get_layer(diff_id)
        }

        fn save(&mut self, additional_names: &[String]) -> LifecycleResult<()> {
            self.0.save(additional_names)
        }

        fn delete(&mut self) -> LifecycleResult<()> {
            self.0.delete()
        }
    }

    #[test]
    fn identifier_failure_still_switches_to_new_image() {
        let dir = TempDir::new().unwrap();
        let registry = MemoryRegistry::new();
        seed(&registry, &dir, b"old bytes");

        let mut cache = ImageCache::new(
            Box::new(MemoryImage::open(&registry, CACHE_REF)),
            Box::new(UnidentifiedImage(
                MemoryImage::empty(&registry, CACHE_REF).with_previous_image(CACHE_REF),
            )),
        );
        cache.set_metadata(&metadata_for("new.bp")).unwrap();

        assert!(matches!(cache.commit(), Err(LifecycleError::Image { .. })));
        assert!(cache.origin().identifier().is_err());
        assert_eq!(cache.retrieve_metadata().unwrap(), metadata_for("new.bp"));
        assert!(matches!(cache.commit(), Err(LifecycleError::CacheCommitted)));
    }

    #[test]
    fn failed_save_leaves_cache_uncommitted() {
        let registry = MemoryRegistry::new();
        registry.reject_saves_to(CACHE_REF);

        let mut cache = cache_for(&registry);
        assert!(matches!(cache.commit(), Err(LifecycleError::ImageSave(_))));
        cache.set_metadata(&CacheMetadata::default()).unwrap();
    }

    #[test]
    fn failed_delete_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let registry = MemoryRegistry::new();
        seed(&registry, &dir, b"old");
        registry.reject_deletes_of(CACHE_REF);

        let mut cache = cache_for(&registry);
        cache.set_metadata(&metadata_for("new.bp")).unwrap();
        assert!(cache.commit().is_err());

        // Reads already see the new image
        assert_eq!(cache.retrieve_metadata().unwrap().buildpacks[0].id, "new.bp");
    }

    #[test]
    fn malformed_label_follows_policy() {
        let registry = MemoryRegistry::new();
        let mut image = MemoryImage::empty(&registry, CACHE_REF);
        image.set_label(CACHE_METADATA_LABEL, "{oops").unwrap();
        image.save(&[]).unwrap();

        assert_eq!(
            cache_for(&registry).retrieve_metadata().unwrap(),
            CacheMetadata::default()
        );
        let strict = cache_for(&registry).with_metadata_policy(CorruptMetadataPolicy::Fail);
        assert!(strict.retrieve_metadata().is_err());
    }
}
