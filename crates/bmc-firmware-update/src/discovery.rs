//! Filesystem scanning for images already resident on the device

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::UpdaterResult;
use crate::version::{VersionId, read_release_version};

/// One read-only BMC mount found under the media directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidentMount {
    /// Mount directory
    pub dir: PathBuf,
    /// Id taken from the directory name suffix
    pub suffix_id: VersionId,
    /// Version read from the mount's release file
    pub version: Option<String>,
}

/// Path of the release file inside a mount
pub fn release_in_mount(mount: &Path, os_release_file: &Path) -> PathBuf {
    let relative = os_release_file.strip_prefix("/").unwrap_or(os_release_file);
    mount.join(relative)
}

/// List `<media_dir>/<prefix>*` directories, sorted by name
///
/// The media directory is created when missing.
pub fn scan_read_only_mounts(
    media_dir: &Path,
    prefix: &str,
    os_release_file: &Path,
) -> UpdaterResult<Vec<ResidentMount>> {
    if !media_dir.is_dir() {
        info!(path = %media_dir.display(), "Creating media directory");
        fs::create_dir_all(media_dir)?;
    }

    let mut mounts = Vec::new();
    for entry in fs::read_dir(media_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(suffix) = name.to_str().and_then(|n| n.strip_prefix(prefix)) else {
            continue;
        };
        let dir = entry.path();
        let release = release_in_mount(&dir, os_release_file);
        let version = if release.is_file() {
            read_release_version(&release)
        } else {
            None
        };
        mounts.push(ResidentMount {
            suffix_id: VersionId::new(suffix),
            dir,
            version,
        });
    }
    mounts.sort_by(|a, b| a.dir.cmp(&b.dir));
    Ok(mounts)
}

/// Materialize `<media_dir>/<prefix><id>` with a link to the running
/// release file
///
/// Returns `false` when the mount already has a release file.
pub fn create_placeholder_mount(
    media_dir: &Path,
    prefix: &str,
    id: &VersionId,
    os_release_file: &Path,
) -> UpdaterResult<bool> {
    let mount = media_dir.join(format!("{prefix}{id}"));
    let release = release_in_mount(&mount, os_release_file);
    if release.exists() {
        debug!(path = %release.display(), "Placeholder release already present");
        return Ok(false);
    }
    if let Some(parent) = release.parent() {
        fs::create_dir_all(parent)?;
    }
    link_release(os_release_file, &release)?;
    info!(mount = %mount.display(), "Created placeholder mount for running image");
    Ok(true)
}

#[cfg(unix)]
fn link_release(target: &Path, link: &Path) -> UpdaterResult<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(not(unix))]
fn link_release(target: &Path, link: &Path) -> UpdaterResult<()> {
    fs::copy(target, link)?;
    Ok(())
}
