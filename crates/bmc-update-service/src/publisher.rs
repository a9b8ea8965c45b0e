//! Object snapshot published as a JSON file

use bmc_firmware_update::persist::write_atomic;
use bmc_firmware_update::{
    Association, ObjectPublisher, UpdaterResult, VersionId, VersionObject,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Everything other processes can observe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Version objects keyed by id
    pub objects: BTreeMap<VersionId, VersionObject>,
    /// Lifecycle associations, in publication order
    pub associations: Vec<Association>,
    /// When the snapshot was last written
    pub generated_at: Option<DateTime<Utc>>,
}

/// [`ObjectPublisher`] keeping the snapshot in memory and mirroring it to a
/// file after every change
#[derive(Debug)]
pub struct SnapshotPublisher {
    path: PathBuf,
    snapshot: Snapshot,
}

impl SnapshotPublisher {
    /// Create a publisher writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: Snapshot::default(),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Read a snapshot file written by a publisher
    pub fn load(path: &Path) -> UpdaterResult<Snapshot> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn flush(&mut self) {
        self.snapshot.generated_at = Some(Utc::now());
        if let Err(e) = self.write() {
            warn!(path = %self.path.display(), error = %e, "Failed to write object snapshot");
        }
    }

    fn write(&self) -> UpdaterResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.snapshot)?;
        write_atomic(&self.path, &content)
    }
}

impl ObjectPublisher for SnapshotPublisher {
    fn publish_associations(&mut self, associations: &[Association]) {
        self.snapshot.associations = associations.to_vec();
        self.flush();
    }

    fn publish_object(&mut self, object: &VersionObject) {
        self.snapshot
            .objects
            .insert(object.version.id.clone(), object.clone());
        self.flush();
    }

    fn withdraw_object(&mut self, id: &VersionId) {
        if self.snapshot.objects.remove(id).is_some() {
            self.flush();
        }
    }
}
