//! Restore command - seed a layers directory from a previous build

use crate::api::ApiVersion;
use crate::buildpack::Group;
use crate::cache::{Cache, VolumeCache};
use crate::cli::args::RestoreArgs;
use crate::config::Config;
use crate::error::{LifecycleError, LifecycleResult};
use crate::metadata::LayersMetadata;
use crate::restore::Analyzer;
use console::style;
use std::fs;
use std::path::Path;

/// Execute the restore command
pub fn execute(args: RestoreArgs, config: &Config) -> LifecycleResult<()> {
    let mut restore_config = config.restore.clone();
    if let Some(ref version) = args.platform_api {
        restore_config.platform_api = version.parse::<ApiVersion>()?;
    }
    restore_config.skip_layers |= args.skip_layers;

    let group = Group::from_file(&args.group)?;
    let app = match args.app_metadata {
        Some(ref path) => read_app_metadata(path)?,
        None => LayersMetadata::default(),
    };
    let cache = match args.cache_dir {
        Some(ref dir) => {
            Some(VolumeCache::open(dir)?.with_metadata_policy(config.cache.corrupt_metadata))
        }
        None => None,
    };

    fs::create_dir_all(&args.layers).map_err(|e| {
        LifecycleError::io(format!("creating layers directory {}", args.layers.display()), e)
    })?;

    let shas = Analyzer::new(&args.layers, &restore_config).restore(
        &group.group,
        &app,
        None,
        cache.as_ref().map(|c| c as &dyn Cache),
    )?;

    println!(
        "{} Restored {} layer(s) for {} buildpack(s) into {}",
        style("✓").green(),
        shas.len(),
        group.group.len(),
        args.layers.display()
    );
    Ok(())
}

fn read_app_metadata(path: &Path) -> LifecycleResult<LayersMetadata> {
    let content = fs::read_to_string(path)
        .map_err(|e| LifecycleError::io(format!("reading app metadata {}", path.display()), e))?;
    LayersMetadata::from_json(&content, &path.display().to_string())
}
