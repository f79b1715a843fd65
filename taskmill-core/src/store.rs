//! Persistence for the feature list document.
//!
//! The feature list lives as a single JSON array at
//! `<project>/feature_list.json` and is rewritten wholesale on every
//! mutation. Loading degrades to an empty list when the file is absent or
//! unparsable; a strict loader is available for callers that need to tell
//! a corrupt store apart from a missing one. Saves go through a sibling
//! temp file and a rename so a crash mid-write cannot truncate the list.

use crate::error::{Error, Result};
use crate::feature::Feature;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of the feature list document inside a project directory.
pub const FEATURE_LIST_FILE: &str = "feature_list.json";

/// Handle to a project's persisted feature list.
///
/// The store is an explicitly constructed handle: callers create one per
/// project directory and pass it down, rather than reaching for shared
/// global state.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    path: PathBuf,
}

impl FeatureStore {
    /// Create a store for the feature list inside `project_dir`.
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            path: project_dir.as_ref().join(FEATURE_LIST_FILE),
        }
    }

    /// The path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing document exists on disk.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the ordered feature list.
    ///
    /// An absent file yields an empty list. Unreadable or unparsable
    /// content also degrades to an empty list (with a warning) so queue
    /// operations always have something to work on.
    pub fn load(&self) -> Vec<Feature> {
        match self.try_load() {
            Ok(features) => features,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "feature list unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    /// Load the ordered feature list, surfacing read and parse failures.
    ///
    /// An absent file still yields `Ok` with an empty list; only a file
    /// that exists but cannot be read or parsed is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreRead`] if the file cannot be read and
    /// [`Error::CorruptStore`] if its content is not a valid feature list.
    pub fn try_load(&self) -> Result<Vec<Feature>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|source| Error::StoreRead {
            path: self.path.clone(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| Error::CorruptStore {
            path: self.path.clone(),
            source,
        })
    }

    /// Persist the full feature list, replacing the document.
    ///
    /// The list is serialized to a sibling temp file and renamed into
    /// place so readers never observe a partial write.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails.
    pub fn save(&self, features: &[Feature]) -> Result<()> {
        let content =
            serde_json::to_string_pretty(features).map_err(|source| Error::StoreSerialize {
                path: self.path.clone(),
                source,
            })?;

        write_atomic(&self.path, &content).map_err(|source| Error::StoreWrite {
            path: self.path.clone(),
            source,
        })
    }
}

/// Write `content` to `path` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_absent_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new(dir.path());

        assert!(!store.exists());
        assert!(store.load().is_empty());
        assert!(store.try_load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new(dir.path());

        let features = vec![
            Feature::new("First", vec!["step".to_string()]),
            Feature::new("Second", vec!["step".to_string()]),
        ];
        store.save(&features).unwrap();

        assert!(store.exists());
        let loaded = store.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].description, "First");
        assert_eq!(loaded[1].description, "Second");
    }

    #[test]
    fn test_load_corrupt_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new(dir.path());

        std::fs::write(store.path(), "{not valid json").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_try_load_corrupt_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new(dir.path());

        std::fs::write(store.path(), "[{\"description\": }]").unwrap();
        let err = store.try_load().unwrap_err();
        assert!(matches!(err, Error::CorruptStore { .. }));
    }

    #[test]
    fn test_save_replaces_document() {
        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new(dir.path());

        store
            .save(&[Feature::new("One", vec!["s".to_string()])])
            .unwrap();
        store.save(&[]).unwrap();

        assert!(store.load().is_empty());
        // No temp file left behind
        assert!(!dir.path().join(format!("{FEATURE_LIST_FILE}.tmp")).exists());
    }
}
