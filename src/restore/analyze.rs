//! One restore pass
//!
//! Reads the metadata documents of the previous app image and the cache,
//! restores layer metadata, then restores SBOM files. A missing previous
//! image or cache means there is nothing to restore from; it is not an
//! error.

use crate::api::ApiVersion;
use crate::buildpack::GroupElement;
use crate::cache::Cache;
use crate::config::schema::RestoreConfig;
use crate::config::DeprecationMode;
use crate::error::LifecycleResult;
use crate::image::Image;
use crate::metadata::{CacheMetadata, LayersMetadata, LAYERS_METADATA_LABEL};
use crate::restore::{new_sbom_restorer, LayerMetadataRestorer, ShaStore};
use std::path::PathBuf;
use tracing::{debug, info};

/// Layer metadata of the previous app image, empty when there is none
pub fn read_app_metadata(previous: Option<&dyn Image>) -> LifecycleResult<LayersMetadata> {
    let Some(image) = previous.filter(|image| image.found()) else {
        info!("Previous image not found, no app layers to restore");
        return Ok(LayersMetadata::default());
    };

    match image.label(LAYERS_METADATA_LABEL)? {
        Some(label) => LayersMetadata::from_json(&label, image.name()),
        None => {
            debug!(image = %image.name(), "Previous image has no layers metadata");
            Ok(LayersMetadata::default())
        }
    }
}

/// Committed metadata of the cache, empty when there is no cache
pub fn read_cache_metadata(cache: Option<&dyn Cache>) -> LifecycleResult<CacheMetadata> {
    match cache {
        Some(cache) => cache.retrieve_metadata(),
        None => {
            info!("No cache provided, no cached layers to restore");
            Ok(CacheMetadata::default())
        }
    }
}

/// Runs the restore steps for one build
#[derive(Debug, Clone)]
pub struct Analyzer {
    layers_dir: PathBuf,
    platform_api: ApiVersion,
    skip_layers: bool,
    deprecation_mode: DeprecationMode,
}

impl Analyzer {
    pub fn new(layers_dir: impl Into<PathBuf>, config: &RestoreConfig) -> Self {
        Self {
            layers_dir: layers_dir.into(),
            platform_api: config.platform_api.clone(),
            skip_layers: config.skip_layers,
            deprecation_mode: config.deprecation_mode,
        }
    }

    /// Restore layer metadata and SBOMs for `group`.
    ///
    /// `app` is the previous image's layers metadata; `previous` supplies its
    /// SBOM layer when available. Returns the layers restored.
    pub fn restore(
        &self,
        group: &[GroupElement],
        app: &LayersMetadata,
        previous: Option<&dyn Image>,
        cache: Option<&dyn Cache>,
    ) -> LifecycleResult<ShaStore> {
        let cache_metadata = read_cache_metadata(cache)?;

        let mut shas = ShaStore::new();
        LayerMetadataRestorer::new(&self.layers_dir, self.platform_api.clone())
            .with_skip_layers(self.skip_layers)
            .with_deprecation_mode(self.deprecation_mode)
            .restore(group, app, &cache_metadata, &mut shas)?;

        let sbom = new_sbom_restorer(&self.layers_dir, &self.platform_api);
        match previous {
            Some(image) => sbom.restore_from_previous(Some(image), app.sbom_sha())?,
            None if !app.sbom_sha().is_empty() => {
                debug!("No previous image handle, skipping SBOM restore from app image")
            }
            None => {}
        }
        if let Some(cache) = cache {
            sbom.restore_from_cache(cache, &cache_metadata.sbom.sha)?;
        }
        sbom.restore_to_buildpack_layers(group)?;

        info!(layers = shas.len(), "Restored layer metadata");
        Ok(shas)
    }
}
