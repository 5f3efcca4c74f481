//! OCI image handles
//!
//! The cache engine does not build images itself. It talks to them through
//! the [`Image`] trait, which covers the handful of operations the cache
//! needs: labels, layer add/reuse/get, save and delete.
//!
//! [`memory`] provides a registry-backed implementation kept in memory, and
//! [`caching`] the write-through decorator that mirrors layers into a cache.

pub mod caching;
pub mod memory;

pub use caching::CachingImage;
pub use memory::{MemoryImage, MemoryRegistry};

use crate::error::{LifecycleError, LifecycleResult};
use crate::layer::digest_file;
use std::fmt;
use std::io::Read;
use std::path::Path;

/// An OCI image handle
pub trait Image {
    /// Reference the image is saved under
    fn name(&self) -> &str;

    /// Whether the image existed when the handle was created (or has since
    /// been saved)
    fn found(&self) -> bool;

    /// Digest identifying the saved image
    fn identifier(&self) -> LifecycleResult<String>;

    fn label(&self, key: &str) -> LifecycleResult<Option<String>>;

    fn set_label(&mut self, key: &str, value: &str) -> LifecycleResult<()>;

    /// Add a layer, computing its diff ID from the file content
    fn add_layer(&mut self, path: &Path) -> LifecycleResult<()> {
        let diff_id = digest_file(path)?;
        self.add_layer_with_diff_id(path, &diff_id)
    }

    fn add_layer_with_diff_id(&mut self, path: &Path, diff_id: &str) -> LifecycleResult<()>;

    /// Reuse a layer from the image this one was based on
    fn reuse_layer(&mut self, diff_id: &str) -> LifecycleResult<()>;

    /// Stream the uncompressed tar of a layer
    fn get_layer(&self, diff_id: &str) -> LifecycleResult<Box<dyn Read>>;

    /// Save under the image's own name plus `additional_names`.
    ///
    /// Failures are reported per name through [`SaveError`].
    fn save(&mut self, additional_names: &[String]) -> LifecycleResult<()>;

    fn delete(&mut self) -> LifecycleResult<()>;
}

impl<T: Image + ?Sized> Image for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn found(&self) -> bool {
        (**self).found()
    }

    fn identifier(&self) -> LifecycleResult<String> {
        (**self).identifier()
    }

    fn label(&self, key: &str) -> LifecycleResult<Option<String>> {
        (**self).label(key)
    }

    fn set_label(&mut self, key: &str, value: &str) -> LifecycleResult<()> {
        (**self).set_label(key, value)
    }

    fn add_layer(&mut self, path: &Path) -> LifecycleResult<()> {
        (**self).add_layer(path)
    }

    fn add_layer_with_diff_id(&mut self, path: &Path, diff_id: &str) -> LifecycleResult<()> {
        (**self).add_layer_with_diff_id(path, diff_id)
    }

    fn reuse_layer(&mut self, diff_id: &str) -> LifecycleResult<()> {
        (**self).reuse_layer(diff_id)
    }

    fn get_layer(&self, diff_id: &str) -> LifecycleResult<Box<dyn Read>> {
        (**self).get_layer(diff_id)
    }

    fn save(&mut self, additional_names: &[String]) -> LifecycleResult<()> {
        (**self).save(additional_names)
    }

    fn delete(&mut self) -> LifecycleResult<()> {
        (**self).delete()
    }
}

/// Why saving to one name failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveDiagnostic {
    pub image_name: String,
    pub cause: String,
}

/// Save failure broken down per name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveError {
    pub diagnostics: Vec<SaveDiagnostic>,
}

impl SaveError {
    /// Whether saving to `name` failed
    pub fn failed_for(&self, name: &str) -> bool {
        self.diagnostics.iter().any(|d| d.image_name == name)
    }
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to write image to the following tags:")?;
        for d in &self.diagnostics {
            write!(f, " [{}: {}]", d.image_name, d.cause)?;
        }
        Ok(())
    }
}

/// Whether a save result means the image was written under `name`.
///
/// A [`SaveError`] that only names other tags still counts as success for
/// `name`; any other error does not.
pub fn is_save_succeeded(result: &LifecycleResult<()>, name: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(LifecycleError::ImageSave(e)) => !e.failed_for(name),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn save_error(names: &[&str]) -> LifecycleError {
        LifecycleError::ImageSave(SaveError {
            diagnostics: names
                .iter()
                .map(|n| SaveDiagnostic {
                    image_name: n.to_string(),
                    cause: "denied".to_string(),
                })
                .collect(),
        })
    }

    #[test]
    fn save_succeeded_for_own_name() {
        assert!(is_save_succeeded(&Ok(()), "app"));
        assert!(is_save_succeeded(&Err(save_error(&["app:latest"])), "app"));
        assert!(!is_save_succeeded(&Err(save_error(&["app", "app:latest"])), "app"));
        assert!(!is_save_succeeded(
            &Err(LifecycleError::User("daemon gone".to_string())),
            "app"
        ));
    }

    #[test]
    fn save_error_lists_tags() {
        let err = save_error(&["a", "b"]);
        let msg = err.to_string();
        assert!(msg.contains("[a: denied]"));
        assert!(msg.contains("[b: denied]"));
    }
}
