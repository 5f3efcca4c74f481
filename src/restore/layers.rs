//! Layer metadata restoration
//!
//! Rebuilds each detected buildpack's layers directory from the metadata of
//! the previous app image and of the cache. Only metadata is restored
//! (`<layer>.toml`, `<layer>.sha` and `store.toml`); layer contents are
//! restored separately.
//!
//! App image layers are written before cache layers. A cache entry never
//! overwrites a layer already restored from the app image.

use crate::api::{ApiVersion, BUILDPACK_API_DEPRECATED_BELOW, PLATFORM_API_CACHED_LAUNCH_LAYERS};
use crate::buildpack::GroupElement;
use crate::config::DeprecationMode;
use crate::error::{LifecycleError, LifecycleResult};
use crate::layer::{is_reserved_name, BuildpackLayersDir, LayerMetadataFile};
use crate::metadata::{BuildpackLayerMetadata, BuildpackLayersMetadata, CacheMetadata, LayersMetadata};
use crate::restore::ShaStore;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Restores layer metadata into a layers directory
#[derive(Debug, Clone)]
pub struct LayerMetadataRestorer {
    layers_dir: PathBuf,
    skip_layers: bool,
    platform_api: ApiVersion,
    deprecation_mode: DeprecationMode,
}

impl LayerMetadataRestorer {
    pub fn new(layers_dir: impl Into<PathBuf>, platform_api: ApiVersion) -> Self {
        Self {
            layers_dir: layers_dir.into(),
            skip_layers: false,
            platform_api,
            deprecation_mode: DeprecationMode::default(),
        }
    }

    /// Restore only `store.toml`, no layer metadata
    pub fn with_skip_layers(mut self, skip_layers: bool) -> Self {
        self.skip_layers = skip_layers;
        self
    }

    pub fn with_deprecation_mode(mut self, mode: DeprecationMode) -> Self {
        self.deprecation_mode = mode;
        self
    }

    pub fn layers_dir(&self) -> &Path {
        &self.layers_dir
    }

    /// Restore metadata for every buildpack in `group`.
    ///
    /// Buildpacks outside `group` are ignored even when either document
    /// has metadata for them. The first error aborts the call.
    pub fn restore(
        &self,
        group: &[GroupElement],
        app: &LayersMetadata,
        cache: &CacheMetadata,
        shas: &mut ShaStore,
    ) -> LifecycleResult<()> {
        for buildpack in group {
            self.check_api(buildpack)?;
        }

        for buildpack in group {
            self.restore_store(buildpack, app, cache)?;
        }

        if self.skip_layers {
            info!("Skipping layer metadata restoration");
            return Ok(());
        }

        for buildpack in group {
            let dir = BuildpackLayersDir::new(&self.layers_dir, buildpack);
            let app_bp = app.metadata_for(&buildpack.id);
            let cache_bp = cache.metadata_for(&buildpack.id);

            let restored = match app_bp {
                Some(app_bp) => self.restore_app_layers(&dir, app_bp, cache_bp, shas)?,
                None => HashSet::new(),
            };

            if let Some(cache_bp) = cache_bp {
                self.restore_cache_layers(&dir, cache_bp, app_bp, &restored, shas)?;
            }
        }

        Ok(())
    }

    fn check_api(&self, buildpack: &GroupElement) -> LifecycleResult<()> {
        if !buildpack.api.less_than(&BUILDPACK_API_DEPRECATED_BELOW) {
            return Ok(());
        }

        match self.deprecation_mode {
            DeprecationMode::Quiet => Ok(()),
            DeprecationMode::Warn => {
                warn!(
                    buildpack = %buildpack.id,
                    api = %buildpack.api,
                    "Buildpack API is deprecated and will be removed in a future release"
                );
                Ok(())
            }
            DeprecationMode::Error => Err(LifecycleError::DeprecatedApi {
                id: buildpack.id.clone(),
                version: buildpack.api.to_string(),
            }),
        }
    }

    fn restore_store(
        &self,
        buildpack: &GroupElement,
        app: &LayersMetadata,
        cache: &CacheMetadata,
    ) -> LifecycleResult<()> {
        let store = app
            .metadata_for(&buildpack.id)
            .and_then(|bp| bp.store.as_ref())
            .or_else(|| cache.metadata_for(&buildpack.id).and_then(|bp| bp.store.as_ref()));

        if let Some(store) = store {
            debug!(buildpack = %buildpack.id, "Restoring store.toml");
            BuildpackLayersDir::new(&self.layers_dir, buildpack).write_store(store)?;
        }
        Ok(())
    }

    /// Launch layers recorded on the app image. Returns the names written.
    fn restore_app_layers(
        &self,
        dir: &BuildpackLayersDir,
        app_bp: &BuildpackLayersMetadata,
        cache_bp: Option<&BuildpackLayersMetadata>,
        shas: &mut ShaStore,
    ) -> LifecycleResult<HashSet<String>> {
        let mut restored = HashSet::new();

        for (name, layer) in &app_bp.layers {
            let id = dir.identifier(name);

            if !layer.launch {
                debug!(layer = %id, "Not restoring non-launch layer from app image");
                continue;
            }
            if layer.build && !layer.cache {
                debug!(layer = %id, "Not restoring launch=true, build=true, cache=false layer");
                continue;
            }
            if layer.cache {
                let cached = cache_bp.and_then(|bp| bp.layers.get(name));
                let consistent = cached.is_some_and(|c| c.cache && c.sha == layer.sha);
                if !consistent {
                    info!(layer = %id, "Cache metadata disagrees with app image, not restoring");
                    continue;
                }
            }

            if self.write_layer(dir, name, layer, shas)? {
                restored.insert(name.clone());
            }
        }

        Ok(restored)
    }

    /// Cache layers not already restored from the app image
    fn restore_cache_layers(
        &self,
        dir: &BuildpackLayersDir,
        cache_bp: &BuildpackLayersMetadata,
        app_bp: Option<&BuildpackLayersMetadata>,
        restored: &HashSet<String>,
        shas: &mut ShaStore,
    ) -> LifecycleResult<()> {
        for (name, layer) in &cache_bp.layers {
            let id = dir.identifier(name);

            if !layer.cache {
                debug!(layer = %id, "Not restoring non-cache layer from cache");
                continue;
            }
            if restored.contains(name) {
                continue;
            }

            let app_layer = app_bp.and_then(|bp| bp.layers.get(name));
            if let Some(app_layer) = app_layer {
                if app_layer.cache != layer.cache || app_layer.sha != layer.sha {
                    info!(layer = %id, "App image disagrees with cache metadata, not restoring");
                    continue;
                }
            }

            if layer.launch {
                if self.platform_api.less_than(&PLATFORM_API_CACHED_LAUNCH_LAYERS) {
                    debug!(layer = %id, platform_api = %self.platform_api, "Not restoring cached launch layer");
                    continue;
                }
                if app_layer.is_some() {
                    continue;
                }
            }

            self.write_layer(dir, name, layer, shas)?;
        }

        Ok(())
    }

    /// Write `<name>.toml` and `<name>.sha`. Returns false when skipped.
    fn write_layer(
        &self,
        dir: &BuildpackLayersDir,
        name: &str,
        layer: &BuildpackLayerMetadata,
        shas: &mut ShaStore,
    ) -> LifecycleResult<bool> {
        let id = dir.identifier(name);

        if is_reserved_name(name) {
            warn!(layer = %id, "Layer name is reserved, not restoring");
            return Ok(false);
        }
        if shas.contains(dir.buildpack_id(), name, &layer.sha) {
            debug!(layer = %id, "Layer already restored");
            return Ok(false);
        }

        debug!(layer = %id, sha = %layer.sha, "Restoring layer metadata");
        dir.write_layer_metadata(name, &LayerMetadataFile::from(layer))?;
        dir.write_layer_sha(name, &layer.sha)?;
        shas.add(dir.buildpack_id(), name, &layer.sha);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::BuildpackStore;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    const BP: &str = "example/node";
    const SHA_A: &str = "sha256:aaaa";
    const SHA_B: &str = "sha256:bbbb";

    fn group(api: ApiVersion) -> Vec<GroupElement> {
        vec![GroupElement::new(BP, "1.0.0", api)]
    }

    fn layer(sha: &str, build: bool, launch: bool, cache: bool) -> BuildpackLayerMetadata {
        BuildpackLayerMetadata {
            sha: sha.to_string(),
            data: None,
            build,
            launch,
            cache,
        }
    }

    fn with_data(mut layer: BuildpackLayerMetadata, k: &str) -> BuildpackLayerMetadata {
        layer.data = Some(json!({ "k": k }));
        layer
    }

    fn app_with(bp: BuildpackLayersMetadata) -> LayersMetadata {
        LayersMetadata {
            buildpacks: vec![bp],
            ..Default::default()
        }
    }

    fn cache_with(bp: BuildpackLayersMetadata) -> CacheMetadata {
        CacheMetadata {
            buildpacks: vec![bp],
            ..Default::default()
        }
    }

    fn restore(
        root: &TempDir,
        platform_api: ApiVersion,
        app: &LayersMetadata,
        cache: &CacheMetadata,
    ) -> LifecycleResult<ShaStore> {
        let mut shas = ShaStore::new();
        LayerMetadataRestorer::new(root.path(), platform_api).restore(
            &group(ApiVersion::new(0, 9)),
            app,
            cache,
            &mut shas,
        )?;
        Ok(shas)
    }

    fn bp_path(root: &TempDir) -> PathBuf {
        root.path().join("example_node")
    }

    #[test]
    fn undetected_buildpacks_are_ignored() {
        let root = TempDir::new().unwrap();
        let stale = BuildpackLayersMetadata::new("other/bp", "1.0.0")
            .with_layer("deps", layer(SHA_A, false, true, false));
        let mut stale_cached = stale.clone();
        stale_cached.store = Some(BuildpackStore::default());

        restore(
            &root,
            ApiVersion::new(0, 14),
            &app_with(stale),
            &cache_with(stale_cached),
        )
        .unwrap();

        assert!(!root.path().join("other_bp").exists());
    }

    #[test]
    fn app_layer_wins_over_cache_layer() {
        let root = TempDir::new().unwrap();
        let app = app_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("deps", with_data(layer(SHA_A, false, true, true), "app")),
        );
        let cache = cache_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("deps", with_data(layer(SHA_A, false, true, true), "cache")),
        );

        let shas = restore(&root, ApiVersion::new(0, 14), &app, &cache).unwrap();

        let toml = fs::read_to_string(bp_path(&root).join("deps.toml")).unwrap();
        assert!(toml.contains("\"app\""));
        assert!(!toml.contains("\"cache\""));
        assert_eq!(shas.get(BP, "deps"), Some(SHA_A));
    }

    #[test]
    fn launch_only_app_layer_is_not_clobbered() {
        let root = TempDir::new().unwrap();
        let app = app_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("deps", with_data(layer(SHA_A, false, true, false), "app")),
        );
        let cache = cache_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("deps", with_data(layer(SHA_A, false, false, true), "cache")),
        );

        restore(&root, ApiVersion::new(0, 14), &app, &cache).unwrap();

        let toml = fs::read_to_string(bp_path(&root).join("deps.toml")).unwrap();
        assert!(toml.contains("\"app\""));
    }

    #[test]
    fn cache_flag_mismatch_restores_nothing() {
        let root = TempDir::new().unwrap();
        let app = app_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("deps", layer(SHA_A, false, true, true)),
        );
        let cache = cache_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("deps", layer(SHA_A, false, true, false)),
        );

        restore(&root, ApiVersion::new(0, 14), &app, &cache).unwrap();

        assert!(!bp_path(&root).join("deps.toml").exists());
        assert!(!bp_path(&root).join("deps.sha").exists());
    }

    #[test]
    fn sha_mismatch_restores_nothing() {
        let root = TempDir::new().unwrap();
        let app = app_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("deps", layer(SHA_A, false, true, true)),
        );
        let cache = cache_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("deps", layer(SHA_B, false, true, true)),
        );

        restore(&root, ApiVersion::new(0, 14), &app, &cache).unwrap();

        assert!(!bp_path(&root).join("deps.toml").exists());
        assert!(!bp_path(&root).join("deps.sha").exists());
    }

    #[test]
    fn build_only_layers_come_from_cache() {
        let root = TempDir::new().unwrap();
        let app = app_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("tools", layer(SHA_B, true, true, false)),
        );
        let cache = cache_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("build-cache", layer(SHA_A, true, false, true))
                .with_layer("scratch", layer(SHA_B, true, false, false)),
        );

        restore(&root, ApiVersion::new(0, 14), &app, &cache).unwrap();

        let dir = bp_path(&root);
        assert_eq!(fs::read_to_string(dir.join("build-cache.sha")).unwrap(), SHA_A);
        assert!(!dir.join("scratch.toml").exists());
        assert!(!dir.join("tools.toml").exists());
    }

    #[test]
    fn cached_launch_layers_need_recent_platform() {
        let cache = cache_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("runtime", layer(SHA_A, false, true, true)),
        );

        let old = TempDir::new().unwrap();
        restore(&old, ApiVersion::new(0, 13), &LayersMetadata::default(), &cache).unwrap();
        assert!(!bp_path(&old).join("runtime.toml").exists());

        let new = TempDir::new().unwrap();
        restore(&new, ApiVersion::new(0, 14), &LayersMetadata::default(), &cache).unwrap();
        assert!(bp_path(&new).join("runtime.toml").exists());
    }

    #[test]
    fn skip_layers_still_restores_store() {
        let root = TempDir::new().unwrap();
        let mut bp = BuildpackLayersMetadata::new(BP, "1.0.0")
            .with_layer("deps", layer(SHA_A, false, true, false));
        let mut store = BuildpackStore::default();
        store.data.insert("runs".to_string(), json!(3));
        bp.store = Some(store);

        let mut shas = ShaStore::new();
        LayerMetadataRestorer::new(root.path(), ApiVersion::new(0, 14))
            .with_skip_layers(true)
            .restore(
                &group(ApiVersion::new(0, 9)),
                &app_with(bp),
                &CacheMetadata::default(),
                &mut shas,
            )
            .unwrap();

        let dir = bp_path(&root);
        let store = fs::read_to_string(dir.join("store.toml")).unwrap();
        assert!(store.contains("[metadata]"));
        assert!(store.contains("runs = 3"));
        assert!(!dir.join("deps.toml").exists());
        assert!(shas.is_empty());
    }

    #[test]
    fn null_store_values_do_not_abort_restore() {
        let root = TempDir::new().unwrap();
        let mut bp = BuildpackLayersMetadata::new(BP, "1.0.0");
        let mut store = BuildpackStore::default();
        store.data.insert("k".to_string(), json!(null));
        store.data.insert("ok".to_string(), json!(1));
        bp.store = Some(store);

        let mut shas = ShaStore::new();
        LayerMetadataRestorer::new(root.path(), ApiVersion::new(0, 14))
            .with_skip_layers(true)
            .restore(
                &group(ApiVersion::new(0, 9)),
                &app_with(bp),
                &CacheMetadata::default(),
                &mut shas,
            )
            .unwrap();

        let store = fs::read_to_string(bp_path(&root).join("store.toml")).unwrap();
        assert!(store.contains("ok = 1"));
        assert!(!store.contains("k ="));
    }

    #[test]
    fn store_falls_back_to_cache() {
        let root = TempDir::new().unwrap();
        let mut bp = BuildpackLayersMetadata::new(BP, "1.0.0");
        let mut store = BuildpackStore::default();
        store.data.insert("from".to_string(), json!("cache"));
        bp.store = Some(store);

        restore(&root, ApiVersion::new(0, 14), &LayersMetadata::default(), &cache_with(bp))
            .unwrap();

        let store = fs::read_to_string(bp_path(&root).join("store.toml")).unwrap();
        assert!(store.contains("from = \"cache\""));
    }

    #[test]
    fn toml_format_follows_buildpack_api() {
        let app = app_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("deps", layer(SHA_A, false, true, false)),
        );

        for (api, expect_types) in [(ApiVersion::new(0, 5), false), (ApiVersion::new(0, 9), true)] {
            let root = TempDir::new().unwrap();
            LayerMetadataRestorer::new(root.path(), ApiVersion::new(0, 14))
                .with_deprecation_mode(DeprecationMode::Quiet)
                .restore(&group(api), &app, &CacheMetadata::default(), &mut ShaStore::new())
                .unwrap();

            let toml = fs::read_to_string(bp_path(&root).join("deps.toml")).unwrap();
            assert_eq!(toml.contains("[types]"), expect_types, "api {toml}");
        }
    }

    #[test]
    fn reserved_names_are_skipped() {
        let root = TempDir::new().unwrap();
        let app = app_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("launch", layer(SHA_A, false, true, false)),
        );

        restore(&root, ApiVersion::new(0, 14), &app, &CacheMetadata::default()).unwrap();
        assert!(!bp_path(&root).join("launch.toml").exists());
    }

    #[test]
    fn path_like_layer_name_aborts_restore() {
        let root = TempDir::new().unwrap();
        let app = app_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("../escape", layer(SHA_A, false, true, false)),
        );

        assert!(restore(&root, ApiVersion::new(0, 14), &app, &CacheMetadata::default()).is_err());
        assert!(!root.path().join("escape.toml").exists());
    }

    #[test]
    fn known_sha_is_not_rewritten() {
        let root = TempDir::new().unwrap();
        let app = app_with(
            BuildpackLayersMetadata::new(BP, "1.0.0")
                .with_layer("deps", layer(SHA_A, false, true, false)),
        );

        let mut shas = ShaStore::new();
        shas.add(BP, "deps", SHA_A);
        LayerMetadataRestorer::new(root.path(), ApiVersion::new(0, 14))
            .restore(&group(ApiVersion::new(0, 9)), &app, &CacheMetadata::default(), &mut shas)
            .unwrap();

        assert!(!bp_path(&root).join("deps.toml").exists());
    }

    #[test]
    fn deprecated_api_follows_mode() {
        let root = TempDir::new().unwrap();
        let restorer = LayerMetadataRestorer::new(root.path(), ApiVersion::new(0, 14));
        let old = group(ApiVersion::new(0, 6));
        let empty = (LayersMetadata::default(), CacheMetadata::default());

        restorer
            .clone()
            .restore(&old, &empty.0, &empty.1, &mut ShaStore::new())
            .unwrap();

        let err = restorer
            .with_deprecation_mode(DeprecationMode::Error)
            .restore(&old, &empty.0, &empty.1, &mut ShaStore::new())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::DeprecatedApi { .. }));
    }
}
