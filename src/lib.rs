//! lifecycle-cache - build cache and layer metadata restoration for a
//! Cloud Native Buildpacks lifecycle
//!
//! Keeps layers produced by one build available to the next, either in a
//! volume directory or in a cache image, and rebuilds the buildpack layers
//! directory from the metadata of the previous app image and the cache.

pub mod api;
pub mod buildpack;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod layer;
pub mod metadata;
pub mod restore;

pub use error::{LifecycleError, LifecycleResult};
