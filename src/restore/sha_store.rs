//! Digests restored during one pass

use std::collections::HashMap;

/// `(buildpack, layer) -> sha` for the layers already restored
#[derive(Debug, Default)]
pub struct ShaStore {
    shas: HashMap<(String, String), String>,
}

impl ShaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the digest restored for a layer, replacing any previous one
    pub fn add(&mut self, buildpack_id: &str, layer: &str, sha: &str) {
        self.shas
            .insert((buildpack_id.to_string(), layer.to_string()), sha.to_string());
    }

    pub fn get(&self, buildpack_id: &str, layer: &str) -> Option<&str> {
        self.shas
            .get(&(buildpack_id.to_string(), layer.to_string()))
            .map(String::as_str)
    }

    /// Whether the layer was restored with exactly this digest
    pub fn contains(&self, buildpack_id: &str, layer: &str, sha: &str) -> bool {
        self.get(buildpack_id, layer) == Some(sha)
    }

    pub fn len(&self) -> usize {
        self.shas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shas.is_empty()
    }
}
