//! Layer storage and on-disk layer metadata
//!
//! Layers are identified by the digest of their uncompressed tar. The
//! [`store`] module keeps tars keyed by digest; [`file`] and [`dir`] handle
//! the metadata files buildpacks read from their layers directory.

pub mod dir;
pub mod file;
pub mod store;

pub use dir::{is_reserved_name, BuildpackLayersDir};
pub use file::LayerMetadataFile;
pub use store::{digest_file, digest_reader, validate_digest, LayerStore};
