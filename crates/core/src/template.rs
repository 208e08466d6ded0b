//! Job template store.
//!
//! Templates are ComfyUI API-format workflow documents stored as JSON
//! files under a configured root directory. Every [`TemplateStore::load`]
//! call reads and parses the document again so callers always receive a
//! private, mutable copy.

use std::path::{Component, Path, PathBuf};

use crate::error::CoreError;
use crate::graph::JobGraph;

/// Directory name that marks the start of the logical part of a stored
/// template path (e.g. `C:/old/install/workflows/comfyui_real.json`).
const WORKFLOWS_DIR: &str = "workflows";

/// Loads job graph templates from a root directory.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    root: PathBuf,
}

impl TemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load and parse the template at `logical_path`.
    ///
    /// Paths that carry a `workflows/` segment are re-rooted at that
    /// segment, so paths saved by an install in another directory keep
    /// working. The resolved file must live under the store root.
    pub fn load(&self, logical_path: &str) -> Result<JobGraph, CoreError> {
        let path = self.resolve(logical_path)?;

        let text = std::fs::read_to_string(&path)
            .map_err(|_| CoreError::TemplateNotFound { path: path.clone() })?;

        let graph: JobGraph =
            serde_json::from_str(&text).map_err(|e| CoreError::TemplateMalformed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if graph.is_empty() {
            return Err(CoreError::TemplateMalformed {
                path,
                reason: "template contains no nodes".to_string(),
            });
        }

        tracing::debug!(path = %path.display(), nodes = graph.len(), "Loaded job template");
        Ok(graph)
    }

    /// Map a logical path onto a file below the root.
    fn resolve(&self, logical_path: &str) -> Result<PathBuf, CoreError> {
        let not_found = || CoreError::TemplateNotFound {
            path: PathBuf::from(logical_path),
        };

        let normalized = logical_path.replace('\\', "/");
        let relative = match normalized.find(&format!("{WORKFLOWS_DIR}/")) {
            Some(idx) => &normalized[idx..],
            None => normalized.as_str(),
        };
        let relative = Path::new(relative);

        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.as_os_str().is_empty() || escapes {
            return Err(not_found());
        }

        let candidate = self.root.join(relative);
        let root = self.root.canonicalize().map_err(|_| not_found())?;
        let resolved = candidate.canonicalize().map_err(|_| CoreError::TemplateNotFound {
            path: candidate.clone(),
        })?;

        // Symlinks may still point outside the root.
        if !resolved.starts_with(&root) || !resolved.is_file() {
            return Err(CoreError::TemplateNotFound { path: candidate });
        }

        Ok(resolved)
    }
}
