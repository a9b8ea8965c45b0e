//! Per-version settings that survive a restart

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{UpdaterError, UpdaterResult};
use crate::version::{VersionId, VersionPurpose};

/// File name of the per-version settings document
const SETTINGS_FILE: &str = "settings.json";

/// Key/value sidecar holding priority and purpose per version
pub trait SettingsStore: Send {
    /// Persist the redundancy priority of a version
    fn store_priority(&mut self, id: &VersionId, priority: u8) -> UpdaterResult<()>;

    /// Persisted redundancy priority, if any
    fn restore_priority(&self, id: &VersionId) -> Option<u8>;

    /// Persist the purpose of a version
    fn store_purpose(&mut self, id: &VersionId, purpose: VersionPurpose) -> UpdaterResult<()>;

    /// Persisted purpose, if any
    fn restore_purpose(&self, id: &VersionId) -> Option<VersionPurpose>;

    /// Drop everything persisted for a version
    fn remove(&mut self, id: &VersionId) -> UpdaterResult<()>;
}

/// Settings document for one version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSettings {
    /// Redundancy priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    /// Version purpose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<VersionPurpose>,
    /// When the document was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// [`SettingsStore`] writing one JSON document per version
///
/// Documents live at `<root>/<id>/settings.json` and are replaced atomically
/// (write to a temporary file, then rename).
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    root: PathBuf,
}

impl JsonSettingsStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding a version's persisted data
    pub fn version_dir(&self, id: &VersionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn settings_path(&self, id: &VersionId) -> PathBuf {
        self.version_dir(id).join(SETTINGS_FILE)
    }

    /// Load a version's settings, empty when nothing was stored
    pub fn load(&self, id: &VersionId) -> UpdaterResult<VersionSettings> {
        let path = self.settings_path(id);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(VersionSettings::default()),
            Err(e) => Err(UpdaterError::Persistence(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    fn save(&self, id: &VersionId, mut settings: VersionSettings) -> UpdaterResult<()> {
        settings.updated_at = Some(chrono::Utc::now());
        let dir = self.version_dir(id);
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(&settings)?;
        write_atomic(&dir.join(SETTINGS_FILE), &content)
    }

    fn update(
        &self,
        id: &VersionId,
        apply: impl FnOnce(&mut VersionSettings),
    ) -> UpdaterResult<()> {
        let mut settings = self.load(id).unwrap_or_else(|e| {
            warn!(version_id = %id, error = %e, "Discarding unreadable settings");
            VersionSettings::default()
        });
        apply(&mut settings);
        self.save(id, settings)
    }

    fn load_logged(&self, id: &VersionId) -> Option<VersionSettings> {
        match self.load(id) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!(version_id = %id, error = %e, "Failed to load persisted settings");
                None
            }
        }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn store_priority(&mut self, id: &VersionId, priority: u8) -> UpdaterResult<()> {
        self.update(id, |s| s.priority = Some(priority))
    }

    fn restore_priority(&self, id: &VersionId) -> Option<u8> {
        self.load_logged(id)?.priority
    }

    fn store_purpose(&mut self, id: &VersionId, purpose: VersionPurpose) -> UpdaterResult<()> {
        self.update(id, |s| s.purpose = Some(purpose))
    }

    fn restore_purpose(&self, id: &VersionId) -> Option<VersionPurpose> {
        self.load_logged(id)?.purpose
    }

    fn remove(&mut self, id: &VersionId) -> UpdaterResult<()> {
        let dir = self.version_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UpdaterError::Persistence(format!(
                "failed to remove {}: {e}",
                dir.display()
            ))),
        }
    }
}

/// Replace `path` with `content` through a temporary file and rename
pub fn write_atomic(path: &Path, content: &str) -> UpdaterResult<()> {
    debug!(path = %path.display(), "Writing file atomically");
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content).map_err(|e| {
        UpdaterError::Persistence(format!("failed to write {}: {e}", temp_path.display()))
    })?;
    fs::rename(&temp_path, path).map_err(|e| {
        UpdaterError::Persistence(format!("failed to rename to {}: {e}", path.display()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_priority_and_purpose_round_trip_separately() -> UpdaterResult<()> {
        let dir = TempDir::new()?;
        let mut store = JsonSettingsStore::new(dir.path());
        let id = VersionId::from_version("2.12.0");

        assert_eq!(store.restore_priority(&id), None);
        store.store_priority(&id, 1)?;
        store.store_purpose(&id, VersionPurpose::Host)?;
        store.store_priority(&id, 2)?;

        assert_eq!(store.restore_priority(&id), Some(2));
        assert_eq!(store.restore_purpose(&id), Some(VersionPurpose::Host));
        Ok(())
    }

    #[test]
    fn test_remove_clears_everything() -> UpdaterResult<()> {
        let dir = TempDir::new()?;
        let mut store = JsonSettingsStore::new(dir.path());
        let id = VersionId::from_version("2.12.0");

        store.store_priority(&id, 0)?;
        store.remove(&id)?;
        store.remove(&id)?;

        assert_eq!(store.restore_priority(&id), None);
        assert!(!store.version_dir(&id).exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_document_reads_as_missing() -> UpdaterResult<()> {
        let dir = TempDir::new()?;
        let mut store = JsonSettingsStore::new(dir.path());
        let id = VersionId::from_version("corrupt");

        fs::create_dir_all(store.version_dir(&id))?;
        fs::write(store.version_dir(&id).join(SETTINGS_FILE), "{not json")?;
        assert_eq!(store.restore_priority(&id), None);

        store.store_priority(&id, 7)?;
        assert_eq!(store.restore_priority(&id), Some(7));
        Ok(())
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_file() -> UpdaterResult<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("state.json");
        write_atomic(&path, "{}")?;
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        Ok(())
    }
}
