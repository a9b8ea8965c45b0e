//! Write-side collaborators: the flasher and the image store
//!
//! Writing an image has two halves. The updater copies the class artifacts
//! into the class staging directory through an [`ImageStore`], then, for
//! classes with a write unit, asks the [`Flasher`] to start that unit. The
//! unit's outcome comes back later as a
//! [`UnitStateChange`](crate::UnitStateChange).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::UpdaterResult;
use crate::version::VersionId;

/// Starts external write services
pub trait Flasher: Send {
    /// Start `unit` and return immediately; completion is signaled later
    fn start_unit(&self, unit: &str) -> UpdaterResult<()>;
}

/// Filesystem operations on uploaded and resident images
pub trait ImageStore: Send {
    /// Whether `source` contains the artifact `name`
    fn has_artifact(&self, source: &Path, name: &str) -> bool;

    /// Copy artifact `name` from `source` into `dest_dir`, replacing any
    /// previous copy
    fn stage(&self, source: &Path, name: &str, dest_dir: &Path) -> UpdaterResult<()>;

    /// Remove a consumed upload directory
    fn retire_upload(&self, source: &Path) -> UpdaterResult<()>;

    /// Remove the read-only copy of a resident version
    fn remove_read_only(&self, id: &VersionId) -> UpdaterResult<()>;
}

/// [`ImageStore`] backed by the local filesystem
#[derive(Debug, Clone)]
pub struct FsImageStore {
    media_dir: PathBuf,
    rofs_prefix: String,
}

impl FsImageStore {
    /// Create a store for read-only mounts named `<media_dir>/<rofs_prefix><id>`
    pub fn new(media_dir: impl Into<PathBuf>, rofs_prefix: impl Into<String>) -> Self {
        Self {
            media_dir: media_dir.into(),
            rofs_prefix: rofs_prefix.into(),
        }
    }

    /// Read-only directory of a version
    pub fn read_only_dir(&self, id: &VersionId) -> PathBuf {
        self.media_dir.join(format!("{}{}", self.rofs_prefix, id))
    }

    fn remove_dir_if_present(path: &Path) -> UpdaterResult<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Nothing to remove");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl ImageStore for FsImageStore {
    fn has_artifact(&self, source: &Path, name: &str) -> bool {
        source.join(name).is_file()
    }

    fn stage(&self, source: &Path, name: &str, dest_dir: &Path) -> UpdaterResult<()> {
        fs::create_dir_all(dest_dir)?;
        let from = source.join(name);
        let to = dest_dir.join(name);
        let bytes = fs::copy(&from, &to)?;
        info!(from = %from.display(), to = %to.display(), bytes, "Staged image artifact");
        Ok(())
    }

    fn retire_upload(&self, source: &Path) -> UpdaterResult<()> {
        Self::remove_dir_if_present(source)
    }

    fn remove_read_only(&self, id: &VersionId) -> UpdaterResult<()> {
        Self::remove_dir_if_present(&self.read_only_dir(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stage_overwrites_previous_copy() -> Result<(), Box<dyn std::error::Error>> {
        let upload = TempDir::new()?;
        let staging = TempDir::new()?;
        let store = FsImageStore::new(staging.path(), "rofs-");

        fs::write(upload.path().join("image-bios"), b"new")?;
        fs::write(staging.path().join("image-bios"), b"old")?;

        assert!(store.has_artifact(upload.path(), "image-bios"));
        store.stage(upload.path(), "image-bios", staging.path())?;
        assert_eq!(fs::read(staging.path().join("image-bios"))?, b"new");
        Ok(())
    }

    #[test]
    fn test_stage_missing_artifact_errors() -> Result<(), Box<dyn std::error::Error>> {
        let upload = TempDir::new()?;
        let store = FsImageStore::new(upload.path(), "rofs-");
        let result = store.stage(upload.path(), "image-mcu", &upload.path().join("out"));
        assert!(matches!(result, Err(crate::UpdaterError::Io(_))));
        Ok(())
    }

    #[test]
    fn test_remove_read_only_tolerates_missing() -> Result<(), Box<dyn std::error::Error>> {
        let media = TempDir::new()?;
        let store = FsImageStore::new(media.path(), "rofs-");
        let id = VersionId::new("0badf00d");

        store.remove_read_only(&id)?;

        fs::create_dir_all(store.read_only_dir(&id).join("etc"))?;
        store.remove_read_only(&id)?;
        assert!(!store.read_only_dir(&id).exists());
        Ok(())
    }
}
