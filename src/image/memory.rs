//! In-memory image registry
//!
//! Images are stored by identifier with tags pointing at them, the way a
//! registry keeps manifests and tags. Saving a changed image under an
//! existing name moves the tag and leaves the old manifest addressable by
//! identifier until it is deleted.
//!
//! Saves and deletes can be rejected per name to exercise failure paths.

use crate::error::{LifecycleError, LifecycleResult};
use crate::image::{Image, SaveDiagnostic, SaveError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize)]
struct StoredImage {
    labels: BTreeMap<String, String>,
    layers: Vec<String>,
    #[serde(skip)]
    blobs: HashMap<String, Vec<u8>>,
}

impl StoredImage {
    fn identifier(&self) -> LifecycleResult<String> {
        let config = serde_json::to_vec(self)?;
        Ok(format!("sha256:{}", hex::encode(Sha256::digest(&config))))
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    manifests: HashMap<String, StoredImage>,
    tags: HashMap<String, String>,
    rejected_saves: HashSet<String>,
    rejected_deletes: HashSet<String>,
}

/// Shared handle to an in-memory registry
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every save to `name` fail
    pub fn reject_saves_to(&self, name: &str) {
        self.lock().rejected_saves.insert(name.to_string());
    }

    /// Make deleting the image tagged `name` fail
    pub fn reject_deletes_of(&self, name: &str) {
        self.lock().rejected_deletes.insert(name.to_string());
    }

    /// Whether a tag exists for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.lock().tags.contains_key(name)
    }

    /// Identifier the tag `name` points at
    pub fn identifier_of(&self, name: &str) -> Option<String> {
        self.lock().tags.get(name).cloned()
    }

    /// Whether a manifest with this identifier is stored
    pub fn has_manifest(&self, identifier: &str) -> bool {
        self.lock().manifests.contains_key(identifier)
    }

    /// Number of stored manifests
    pub fn manifest_count(&self) -> usize {
        self.lock().manifests.len()
    }

    fn load(&self, name: &str) -> Option<(String, StoredImage)> {
        let state = self.lock();
        let id = state.tags.get(name)?;
        state.manifests.get(id).map(|img| (id.clone(), img.clone()))
    }
}

/// An image handle backed by a [`MemoryRegistry`]
#[derive(Debug)]
pub struct MemoryImage {
    registry: MemoryRegistry,
    name: String,
    found: bool,
    identifier: Option<String>,
    working: StoredImage,
    previous: Option<StoredImage>,
}

impl MemoryImage {
    /// Handle to the image tagged `name`, loading its content if it exists
    pub fn open(registry: &MemoryRegistry, name: &str) -> Self {
        let loaded = registry.load(name);
        let found = loaded.is_some();
        let (identifier, working) = match loaded {
            Some((id, img)) => (Some(id), img),
            None => (None, StoredImage::default()),
        };
        Self {
            registry: registry.clone(),
            name: name.to_string(),
            found,
            identifier,
            working,
            previous: None,
        }
    }

    /// A new, empty image that will be saved as `name`
    pub fn empty(registry: &MemoryRegistry, name: &str) -> Self {
        Self {
            registry: registry.clone(),
            name: name.to_string(),
            found: false,
            identifier: None,
            working: StoredImage::default(),
            previous: None,
        }
    }

    /// Allow layers of the image tagged `name` to be reused
    pub fn with_previous_image(mut self, name: &str) -> Self {
        self.previous = self.registry.load(name).map(|(_, img)| img);
        self
    }

    /// Diff IDs of the layers, in order
    pub fn layers(&self) -> &[String] {
        &self.working.layers
    }

    fn push_layer(&mut self, diff_id: &str, bytes: Vec<u8>) {
        self.working.layers.push(diff_id.to_string());
        self.working.blobs.insert(diff_id.to_string(), bytes);
    }
}

impl Image for MemoryImage {
    fn name(&self) -> &str {
        &self.name
    }

    fn found(&self) -> bool {
        self.found
    }

    fn identifier(&self) -> LifecycleResult<String> {
        self.identifier.clone().ok_or_else(|| LifecycleError::Image {
            image: self.name.clone(),
            reason: "image has not been saved".to_string(),
        })
    }

    fn label(&self, key: &str) -> LifecycleResult<Option<String>> {
        Ok(self.working.labels.get(key).cloned())
    }

    fn set_label(&mut self, key: &str, value: &str) -> LifecycleResult<()> {
        self.working
            .labels
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn add_layer_with_diff_id(&mut self, path: &Path, diff_id: &str) -> LifecycleResult<()> {
        let bytes = fs::read(path).map_err(|e| {
            LifecycleError::io(format!("adding layer {diff_id} to {}", self.name), e)
        })?;
        self.push_layer(diff_id, bytes);
        Ok(())
    }

    fn reuse_layer(&mut self, diff_id: &str) -> LifecycleResult<()> {
        let bytes = self
            .previous
            .as_ref()
            .and_then(|prev| prev.blobs.get(diff_id))
            .or_else(|| self.working.blobs.get(diff_id))
            .cloned()
            .ok_or_else(|| LifecycleError::ImageLayerNotFound {
                image: self.name.clone(),
                digest: diff_id.to_string(),
            })?;
        self.push_layer(diff_id, bytes);
        Ok(())
    }

    fn get_layer(&self, diff_id: &str) -> LifecycleResult<Box<dyn Read>> {
        match self.working.blobs.get(diff_id) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(LifecycleError::ImageLayerNotFound {
                image: self.name.clone(),
                digest: diff_id.to_string(),
            }),
        }
    }

    fn save(&mut self, additional_names: &[String]) -> LifecycleResult<()> {
        let identifier = self.working.identifier()?;
        let mut diagnostics = Vec::new();
        let mut saved_own_name = false;

        {
            let mut state = self.registry.lock();
            state
                .manifests
                .insert(identifier.clone(), self.working.clone());

            let names = std::iter::once(self.name.as_str())
                .chain(additional_names.iter().map(String::as_str));
            for name in names {
                if state.rejected_saves.contains(name) {
                    diagnostics.push(SaveDiagnostic {
                        image_name: name.to_string(),
                        cause: "registry rejected write".to_string(),
                    });
                    continue;
                }
                state.tags.insert(name.to_string(), identifier.clone());
                saved_own_name |= name == self.name;
            }
        }

        if saved_own_name {
            debug!(image = %self.name, identifier = %identifier, "Saved image");
            self.identifier = Some(identifier);
            self.found = true;
        }

        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::ImageSave(SaveError { diagnostics }))
        }
    }

    fn delete(&mut self) -> LifecycleResult<()> {
        let identifier = self.identifier()?;
        let mut state = self.registry.lock();
        if state.rejected_deletes.contains(&self.name) {
            return Err(LifecycleError::Image {
                image: self.name.clone(),
                reason: "registry rejected delete".to_string(),
            });
        }

        state.manifests.remove(&identifier);
        state.tags.retain(|_, id| *id != identifier);
        drop(state);

        debug!(image = %self.name, identifier = %identifier, "Deleted image");
        self.found = false;
        Ok(())
    }
}
