//! Restoration of a previous build's state
//!
//! Before buildpacks run, the layers directory is seeded with what the
//! previous build left behind: layer metadata from the previous app image
//! and the cache ([`layers`]), and SBOM files ([`sbom`]). [`analyze`] runs
//! both for one build.

pub mod analyze;
pub mod layers;
pub mod sbom;
pub mod sha_store;

pub use analyze::{read_app_metadata, read_cache_metadata, Analyzer};
pub use layers::LayerMetadataRestorer;
pub use sbom::{new_sbom_restorer, DefaultSbomRestorer, NopSbomRestorer, SbomRestorer};
pub use sha_store::ShaStore;
