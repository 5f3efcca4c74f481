//! Inspect command - show what a volume cache holds

use crate::cache::{Cache, VolumeCache};
use crate::cli::args::{InspectArgs, OutputFormat};
use crate::config::Config;
use crate::error::LifecycleResult;
use crate::metadata::CacheMetadata;
use console::style;
use serde::Serialize;

/// A committed layer and what the metadata says about it
#[derive(Debug, Serialize)]
struct LayerRow {
    buildpack: String,
    layer: String,
    sha: String,
    build: bool,
    launch: bool,
    cache: bool,
    present: bool,
}

#[derive(Debug, Serialize)]
struct CacheReport {
    name: String,
    sbom: String,
    layers: Vec<LayerRow>,
    /// Committed blobs no metadata entry points at
    unreferenced: Vec<String>,
}

/// Execute the inspect command
pub fn execute(args: InspectArgs, config: &Config) -> LifecycleResult<()> {
    let cache = VolumeCache::open(&args.dir)?.with_metadata_policy(config.cache.corrupt_metadata);
    let metadata = cache.retrieve_metadata()?;
    let blobs = cache.committed_layers()?;
    let report = build_report(cache.name(), &metadata, &blobs);

    match args.format {
        OutputFormat::Table => print_table(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => print_plain(&report),
    }

    Ok(())
}

fn build_report(name: &str, metadata: &CacheMetadata, blobs: &[String]) -> CacheReport {
    let mut layers = Vec::new();
    for bp in &metadata.buildpacks {
        for (layer, entry) in &bp.layers {
            layers.push(LayerRow {
                buildpack: bp.id.clone(),
                layer: layer.clone(),
                sha: entry.sha.clone(),
                build: entry.build,
                launch: entry.launch,
                cache: entry.cache,
                present: blobs.contains(&entry.sha),
            });
        }
    }

    let unreferenced = blobs
        .iter()
        .filter(|digest| {
            **digest != metadata.sbom.sha && !layers.iter().any(|row| &row.sha == *digest)
        })
        .cloned()
        .collect();

    CacheReport {
        name: name.to_string(),
        sbom: metadata.sbom.sha.clone(),
        layers,
        unreferenced,
    }
}

fn flags(row: &LayerRow) -> String {
    [(row.build, "build"), (row.launch, "launch"), (row.cache, "cache")]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(",")
}

fn print_table(report: &CacheReport) {
    println!("Cache: {}", report.name);
    if !report.sbom.is_empty() {
        println!("SBOM:  {}", report.sbom);
    }
    println!();

    if report.layers.is_empty() {
        println!("No layers recorded in cache metadata.");
    } else {
        println!(
            "{:<30} {:<20} {:<20} {:<16} {:<8}",
            "BUILDPACK", "LAYER", "SHA", "FLAGS", "BLOB"
        );
        println!("{}", "-".repeat(98));

        for row in &report.layers {
            let blob = if row.present {
                style("ok").green().to_string()
            } else {
                style("missing").red().to_string()
            };
            println!(
                "{:<30} {:<20} {:<20} {:<16} {:<8}",
                row.buildpack,
                row.layer,
                short_sha(&row.sha),
                flags(row),
                blob
            );
        }
    }

    if !report.unreferenced.is_empty() {
        println!();
        println!("Unreferenced blobs:");
        for digest in &report.unreferenced {
            println!("  {} {}", style("•").dim(), digest);
        }
    }

    println!();
    println!("Total: {} layer(s)", report.layers.len());
}

fn print_plain(report: &CacheReport) {
    for row in &report.layers {
        println!("{}:{} {}", row.buildpack, row.layer, row.sha);
    }
}

fn short_sha(sha: &str) -> &str {
    let end = sha.char_indices().nth(19).map(|(i, _)| i).unwrap_or(sha.len());
    &sha[..end]
}
