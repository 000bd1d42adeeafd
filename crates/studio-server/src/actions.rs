//! Non-turn actions: saving files and loading the host editor.
//!
//! These run synchronously on the requesting connection and are refused while
//! a turn is in flight.

use std::path::{Path, PathBuf};

use studio_core::ActionError;
use tracing::info;

/// File and editor collaborators.
pub trait StudioActions: Send + Sync {
    /// Write `content` to `path`, returning the path actually written.
    fn save_as(&self, path: &Path, content: &str) -> Result<PathBuf, ActionError>;

    /// Overwrite the existing file at `path`.
    fn save_over(&self, path: &Path, content: &str) -> Result<(), ActionError>;

    /// Load `content` into the host's editor.
    fn send_to_editor(&self, content: &str) -> Result<(), ActionError>;
}

/// Filesystem-backed actions with no editor attached.
///
/// Relative paths resolve against `base_dir`.
#[derive(Clone, Debug)]
pub struct FileActions {
    base_dir: PathBuf,
}

impl FileActions {
    /// Resolve relative paths against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl StudioActions for FileActions {
    fn save_as(&self, path: &Path, content: &str) -> Result<PathBuf, ActionError> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, content)?;
        info!(path = %target.display(), bytes = content.len(), "saved document");
        Ok(target)
    }

    fn save_over(&self, path: &Path, content: &str) -> Result<(), ActionError> {
        let target = self.resolve(path);
        if !target.is_file() {
            return Err(ActionError::Unavailable(format!(
                "{} no longer exists",
                target.display()
            )));
        }
        std::fs::write(&target, content)?;
        info!(path = %target.display(), bytes = content.len(), "overwrote document");
        Ok(())
    }

    fn send_to_editor(&self, _content: &str) -> Result<(), ActionError> {
        Err(ActionError::Unavailable("no editor is attached".into()))
    }
}
