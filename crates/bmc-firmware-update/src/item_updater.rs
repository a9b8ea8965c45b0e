//! Orchestrator owning every version, activation and association
//!
//! All mutation happens through `&mut ItemUpdater` on a single dispatch
//! thread. Activations never hold a reference back to the orchestrator;
//! instead every transition goes through
//! [`ItemUpdater::set_activation_state`], which can reach the allocator, the
//! eviction policy and the association set directly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::activation::{Activation, ActivationState, ActivationStatus, UnitStateChange};
use crate::association::{Association, AssociationSet, RelationKind};
use crate::boot_env::BootEnv;
use crate::config::UpdaterConfig;
use crate::discovery::{create_placeholder_mount, scan_read_only_mounts};
use crate::error::{UpdaterError, UpdaterResult};
use crate::flash::{Flasher, ImageStore};
use crate::images::{ImageValidator, SignatureVerifier, artifacts_to_stage, full_image};
use crate::inventory::InventoryLookup;
use crate::persist::SettingsStore;
use crate::priority::{
    EvictionCandidate, FAILED_EVICTION_PRIORITY, eviction_order, lowest_priority,
    resolve_collisions,
};
use crate::publish::{ObjectPublisher, VersionObject};
use crate::version::{
    ImageClass, ImageNotification, Version, VersionId, VersionPurpose, object_path,
    read_release_version,
};

/// External collaborators wired into the orchestrator
pub struct Collaborators {
    /// Checks uploaded images
    pub validator: Box<dyn ImageValidator>,
    /// Checks image signatures when verification is enabled
    pub verifier: Option<Box<dyn SignatureVerifier>>,
    /// Starts write services
    pub flasher: Box<dyn Flasher>,
    /// Stages and removes image files
    pub images: Box<dyn ImageStore>,
    /// Persists per-version priority and purpose
    pub settings: Box<dyn SettingsStore>,
    /// Boot-loader environment
    pub boot_env: Box<dyn BootEnv>,
    /// Inventory anchor lookup
    pub inventory: Box<dyn InventoryLookup>,
    /// Object-model publication
    pub publisher: Box<dyn ObjectPublisher>,
}

/// Top-level owner of the version and activation catalogs
pub struct ItemUpdater {
    config: UpdaterConfig,
    io: Collaborators,
    versions: BTreeMap<VersionId, Version>,
    activations: BTreeMap<VersionId, Activation>,
    associations: AssociationSet,
    inventory_anchors: BTreeMap<ImageClass, String>,
    running: BTreeMap<ImageClass, VersionId>,
    field_mode: bool,
}

impl ItemUpdater {
    /// Create an orchestrator with empty catalogs
    pub fn new(config: UpdaterConfig, io: Collaborators) -> UpdaterResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            io,
            versions: BTreeMap::new(),
            activations: BTreeMap::new(),
            associations: AssociationSet::new(),
            inventory_anchors: BTreeMap::new(),
            running: BTreeMap::new(),
            field_mode: false,
        })
    }

    /// Look up inventory anchors, restore field mode and discover resident
    /// images
    pub fn init(&mut self) {
        self.lookup_inventory();
        if let Err(e) = self.restore_field_mode() {
            error!(error = %e, "Failed to restore field mode");
        }
        self.discover_bmc_images();
        self.discover_running_image(ImageClass::Host, VersionPurpose::Host);
        self.discover_running_image(ImageClass::Auxiliary, VersionPurpose::Auxiliary);
        info!(
            versions = self.versions.len(),
            field_mode = self.field_mode,
            "Item updater initialized"
        );
    }

    /// Flush every held priority and purpose to the settings store
    pub fn shutdown(&mut self) -> UpdaterResult<()> {
        let mut first_error = None;
        for (id, activation) in &self.activations {
            if let Some(priority) = activation.priority()
                && let Err(e) = self.io.settings.store_priority(id, priority.value())
            {
                warn!(version_id = %id, error = %e, "Failed to flush priority");
                first_error.get_or_insert(e);
            }
        }
        for (id, version) in &self.versions {
            if let Err(e) = self.io.settings.store_purpose(id, version.purpose) {
                warn!(version_id = %id, error = %e, "Failed to flush purpose");
                first_error.get_or_insert(e);
            }
        }
        info!("Item updater shut down");
        first_error.map_or(Ok(()), Err)
    }

    // ---- snapshot accessors ----

    /// Configuration in use
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Every known version
    pub fn versions(&self) -> impl Iterator<Item = &Version> {
        self.versions.values()
    }

    /// Every activation
    pub fn activations(&self) -> impl Iterator<Item = &Activation> {
        self.activations.values()
    }

    /// Published lifecycle associations
    pub fn associations(&self) -> &[Association] {
        self.associations.as_slice()
    }

    /// Look up a version
    pub fn version(&self, id: &VersionId) -> Option<&Version> {
        self.versions.get(id)
    }

    /// Look up an activation
    pub fn activation(&self, id: &VersionId) -> Option<&Activation> {
        self.activations.get(id)
    }

    /// Whether `id` is the running version of its class
    pub fn is_functional(&self, id: &VersionId) -> bool {
        self.running.values().any(|running| running == id)
    }

    /// Running version of a class
    pub fn running_version(&self, class: ImageClass) -> Option<&VersionId> {
        self.running.get(&class)
    }

    /// Whether the field-mode latch is set
    pub fn field_mode(&self) -> bool {
        self.field_mode
    }

    /// Published snapshot of one version
    pub fn object(&self, id: &VersionId) -> Option<VersionObject> {
        let version = self.versions.get(id)?;
        let activation = self.activations.get(id)?;
        Some(VersionObject {
            version: version.clone(),
            activation: activation.clone(),
            functional: self.is_functional(id),
        })
    }

    // ---- creation ----

    /// Handle an intake notification; malformed ones are ignored
    pub fn handle_notification(&mut self, notification: &ImageNotification) -> Option<VersionId> {
        let Some(purpose) = notification.accepted_purpose() else {
            debug!(
                purpose = %notification.purpose,
                version = %notification.version,
                "Ignoring malformed image notification"
            );
            return None;
        };
        self.create_version(&notification.file_path, purpose, &notification.version)
    }

    /// Create a version and its activation from an uploaded image
    ///
    /// Returns the new id, or `None` when the version is already known or
    /// the purpose has no image class.
    pub fn create_version(
        &mut self,
        source: &Path,
        purpose: VersionPurpose,
        version: &str,
    ) -> Option<VersionId> {
        let Some(class) = purpose.class() else {
            debug!(purpose = %purpose, "Ignoring image without an image class");
            return None;
        };
        let id = VersionId::from_version(version);
        if self.versions.contains_key(&id) || self.activations.contains_key(&id) {
            debug!(version_id = %id, "Version already known");
            return None;
        }

        let status = self.io.validator.validate(source, purpose);
        let mut owned = Vec::new();
        if status == ActivationStatus::Ready
            && let Some(anchor) = self.inventory_anchors.get(&class)
        {
            owned.push(Association::inventory(anchor.clone()));
        }

        let entry = Version::new(version, purpose, &self.config.software_root, source);
        let activation = Activation::new(
            id.clone(),
            entry.path.clone(),
            purpose,
            status.initial_state(),
            owned,
        );
        info!(
            version_id = %id,
            version = %version,
            purpose = %purpose,
            state = %activation.state(),
            "Created version"
        );
        self.versions.insert(id.clone(), entry);
        self.activations.insert(id.clone(), activation);
        self.publish_object(&id);
        Some(id)
    }

    // ---- activation state machine ----

    /// Request an activation state change
    ///
    /// Returns the state the activation settled in. Requesting `Activating`
    /// starts the write; when the class write completes synchronously the
    /// activation finishes straight away and `Active` is returned.
    pub fn set_activation_state(
        &mut self,
        id: &VersionId,
        requested: ActivationState,
    ) -> UpdaterResult<ActivationState> {
        let activation = self
            .activations
            .get_mut(id)
            .ok_or_else(|| UpdaterError::catalog(format!("no activation for {id}")))?;

        if requested != ActivationState::Activating {
            if activation.settle(requested).is_some() {
                debug!(version_id = %id, state = %requested, "Released redundancy priority");
            }
            self.publish_object(id);
            return Ok(requested);
        }

        if activation.is_flashed() {
            return self.finish_activation(id);
        }

        if activation.state() == ActivationState::Invalid {
            return Err(UpdaterError::NotAllowed(format!(
                "version {id} failed validation and cannot be activated"
            )));
        }

        // completion signals carry only the unit name
        if let Some(unit) = self.pending_unit_for(id)
            && let Some(busy) = self
                .activations
                .values()
                .find(|a| a.version_id != *id && a.expects_unit(&unit))
        {
            return Err(UpdaterError::NotAllowed(format!(
                "{unit} is still writing version {}",
                busy.version_id
            )));
        }

        if self.config.verify_signatures && !self.signature_valid(id) {
            error!(version_id = %id, "Image signature verification failed");
            if self.field_mode {
                return self.set_activation_state(id, ActivationState::Failed);
            }
        }

        if let Some(activation) = self.activations.get_mut(id) {
            activation.begin_write();
        }
        self.free_space(id);
        self.publish_object(id);

        match self.write_image(id) {
            Ok(unit) => {
                let synchronous = unit.is_none();
                if let Some(activation) = self.activations.get_mut(id) {
                    activation.write_dispatched(unit);
                    if synchronous {
                        activation.mark_flashed();
                    }
                }
                if synchronous {
                    return self.finish_activation(id);
                }
                self.publish_object(id);
                Ok(ActivationState::Activating)
            }
            Err(e) => {
                error!(version_id = %id, error = %e, "Image write failed");
                self.set_activation_state(id, ActivationState::Failed)?;
                Err(e)
            }
        }
    }

    /// Deliver a write-service completion signal
    ///
    /// Returns the activations the signal was delivered to; signals no
    /// activation is waiting for are ignored.
    pub fn handle_unit_state(&mut self, change: &UnitStateChange) -> Vec<VersionId> {
        let waiting: Vec<VersionId> = self
            .activations
            .values()
            .filter(|a| a.expects_unit(&change.unit))
            .map(|a| a.version_id.clone())
            .collect();

        if waiting.is_empty() {
            debug!(unit = %change.unit, result = %change.result, "Ignoring stale unit signal");
            return waiting;
        }

        for id in &waiting {
            if change.result.is_success() {
                if let Some(activation) = self.activations.get_mut(id) {
                    activation.mark_flashed();
                }
                if let Err(e) = self.set_activation_state(id, ActivationState::Activating) {
                    error!(version_id = %id, error = %e, "Failed to complete activation");
                }
            } else {
                let failure = UpdaterError::WriteServiceSignaledFailure {
                    unit: change.unit.clone(),
                    result: change.result.to_string(),
                };
                error!(version_id = %id, error = %failure, "Write service failed");
                if let Err(e) = self.set_activation_state(id, ActivationState::Failed) {
                    error!(version_id = %id, error = %e, "Failed to mark activation failed");
                }
            }
        }
        waiting
    }

    /// Write unit the class of `id` signals completion through
    fn pending_unit_for(&self, id: &VersionId) -> Option<String> {
        let class = self.versions.get(id)?.purpose.class()?;
        self.config.class(class).write_unit.clone()
    }

    fn signature_valid(&self, id: &VersionId) -> bool {
        let Some(verifier) = self.io.verifier.as_ref() else {
            error!(version_id = %id, "Signature verification enabled without a verifier");
            return false;
        };
        let image_dir = self
            .versions
            .get(id)
            .filter(|v| !v.source_consumed())
            .map_or_else(|| self.config.upload_path(id), |v| v.source_path.clone());
        verifier.verify(&image_dir, &self.config.signed_image_conf)
    }

    /// Stage the class artifacts and start the write unit, if any
    fn write_image(&mut self, id: &VersionId) -> UpdaterResult<Option<String>> {
        let version = self
            .versions
            .get(id)
            .ok_or_else(|| UpdaterError::catalog(format!("no version for {id}")))?;
        let class = version
            .purpose
            .class()
            .ok_or_else(|| UpdaterError::write_failed(id, "version has no image class"))?;
        let source: PathBuf = if version.source_consumed() {
            self.config.upload_path(id)
        } else {
            version.source_path.clone()
        };
        let settings = self.config.class(class);

        let images = &self.io.images;
        let artifacts = artifacts_to_stage(class, |name| images.has_artifact(&source, name));
        if artifacts.is_empty() {
            return Err(UpdaterError::write_failed(
                id,
                format!("cannot find {} in {}", full_image(class), source.display()),
            ));
        }
        for name in artifacts {
            images
                .stage(&source, name, &settings.staging_dir)
                .map_err(|e| UpdaterError::write_failed(id, e.to_string()))?;
        }

        match &settings.write_unit {
            Some(unit) => {
                self.io
                    .flasher
                    .start_unit(unit)
                    .map_err(|e| UpdaterError::write_failed(id, e.to_string()))?;
                info!(version_id = %id, unit = %unit, "Started write service");
                Ok(Some(unit.clone()))
            }
            None => {
                info!(version_id = %id, class = %class, "Image staged for next boot");
                Ok(None)
            }
        }
    }

    /// Second half of Activating: priority, associations, settle Active
    fn finish_activation(&mut self, id: &VersionId) -> UpdaterResult<ActivationState> {
        let activation = self
            .activations
            .get_mut(id)
            .ok_or_else(|| UpdaterError::catalog(format!("no activation for {id}")))?;
        let allocated = activation.complete();
        let purpose = activation.purpose;
        let path = activation.path.clone();

        // entries that became resident while the write ran
        self.free_space(id);

        if allocated {
            self.reserve_priority(0, id);
            self.persist_priority(id, 0);
        }

        if let Some(version) = self.versions.get_mut(id)
            && !version.source_consumed()
        {
            let source = std::mem::take(&mut version.source_path);
            if let Err(e) = self.io.images.retire_upload(&source) {
                warn!(version_id = %id, error = %e, "Failed to remove upload directory");
            }
        }

        let mut changed = self.associations.add(RelationKind::Active, &path);
        if let Some(class) = purpose.class()
            && class.functional_on_write()
        {
            changed |= self.mark_running(class, id);
        }
        if changed {
            self.publish_associations();
        }

        if let Err(e) = self.io.settings.store_purpose(id, purpose) {
            warn!(version_id = %id, error = %e, "Failed to persist purpose");
        }
        self.publish_object(id);
        info!(version_id = %id, purpose = %purpose, "Activation complete");
        Ok(ActivationState::Active)
    }

    /// Make `id` the running version of `class`, moving the functional
    /// association off the previous one
    fn mark_running(&mut self, class: ImageClass, id: &VersionId) -> bool {
        let mut changed = false;
        if let Some(previous) = self.running.insert(class, id.clone())
            && previous != *id
        {
            let previous_path = object_path(&self.config.software_root, &previous);
            changed |= self.associations.remove(RelationKind::Functional, &previous_path);
            self.publish_object(&previous);
        }
        let path = object_path(&self.config.software_root, id);
        changed |= self.associations.add(RelationKind::Functional, &path);
        changed
    }

    // ---- priorities ----

    /// Give `id` the priority `value` and resolve collisions
    ///
    /// Entries bumped out of the way are updated and persisted, then the
    /// boot pointer is moved to the lowest-priority version.
    pub fn reserve_priority(&mut self, value: u8, id: &VersionId) {
        let holders: Vec<(VersionId, u8)> = self
            .activations
            .iter()
            .filter_map(|(vid, a)| a.priority().map(|p| (vid.clone(), p.value())))
            .collect();
        let resolution = resolve_collisions(value, id, &holders);

        for (bumped, priority) in &resolution.bumped {
            if let Some(activation) = self.activations.get_mut(bumped) {
                activation.set_priority(*priority);
            }
            debug!(version_id = %bumped, priority, "Bumped redundancy priority");
            self.persist_priority(bumped, *priority);
            self.publish_object(bumped);
        }
        self.set_boot_pointer(Some(&resolution.boot_target));
    }

    /// External priority write on an active version
    pub fn set_priority(&mut self, id: &VersionId, value: u8) -> UpdaterResult<()> {
        let activation = self
            .activations
            .get(id)
            .ok_or_else(|| UpdaterError::catalog(format!("no activation for {id}")))?;
        if activation.priority().is_none() {
            return Err(UpdaterError::NotAllowed(format!(
                "version {id} holds no redundancy priority"
            )));
        }

        self.reserve_priority(value, id);
        if let Some(activation) = self.activations.get_mut(id) {
            activation.set_priority(value);
        }
        self.persist_priority(id, value);
        self.publish_object(id);
        info!(version_id = %id, priority = value, "Redundancy priority set");
        Ok(())
    }

    fn persist_priority(&mut self, id: &VersionId, priority: u8) {
        if let Err(e) = self.io.settings.store_priority(id, priority) {
            warn!(version_id = %id, error = %e, "Failed to persist priority");
        }
        if let Err(e) = self.io.boot_env.set_priority_entry(id, priority) {
            warn!(version_id = %id, error = %e, "Failed to record priority in boot environment");
        }
    }

    fn set_boot_pointer(&mut self, target: Option<&VersionId>) {
        match self.io.boot_env.set_boot_pointer(target) {
            Ok(()) => match target {
                Some(id) => debug!(version_id = %id, "Boot pointer updated"),
                None => debug!("Boot pointer cleared"),
            },
            Err(e) => error!(error = %e, "Failed to update boot pointer"),
        }
    }

    /// Point the boot loader at the lowest-priority remaining version
    fn reset_boot_pointer(&mut self) {
        let target = lowest_priority(
            self.activations
                .iter()
                .filter_map(|(id, a)| a.priority().map(|p| (id, p.value()))),
        );
        self.set_boot_pointer(target.as_ref());
    }

    // ---- eviction and removal ----

    /// Evict same-purpose versions until a new one fits under the class cap
    ///
    /// Called when `caller` enters Activating, before its write starts, and
    /// again when the write completes.
    pub fn free_space(&mut self, caller: &VersionId) {
        let Some(purpose) = self.versions.get(caller).map(|v| v.purpose) else {
            warn!(version_id = %caller, "Cannot free space for unknown version");
            return;
        };
        let Some(class) = purpose.class() else {
            return;
        };
        let cap = self.config.residency_cap(class);

        let mut resident = 0usize;
        let mut candidates = Vec::new();
        for (id, activation) in &self.activations {
            if id == caller || !activation.state().is_resident() {
                continue;
            }
            let Some(version) = self.versions.get(id) else {
                error!(version_id = %id, "Activation without a version");
                continue;
            };
            if version.purpose != purpose {
                continue;
            }
            resident = resident.saturating_add(1);
            if cap > 1 && self.is_functional(id) {
                continue;
            }
            let sort_priority = match (activation.state(), activation.priority()) {
                (ActivationState::Active, Some(p)) => u16::from(p.value()),
                _ => FAILED_EVICTION_PRIORITY,
            };
            candidates.push(EvictionCandidate {
                version_id: id.clone(),
                sort_priority,
            });
        }

        for id in eviction_order(candidates, resident, cap) {
            info!(version_id = %id, caller = %caller, cap, "Evicting version to free space");
            if let Err(e) = self.erase(&id) {
                warn!(version_id = %id, error = %e, "Eviction refused");
            }
        }
    }

    /// Remove a version and everything attached to it
    ///
    /// The boot pointer is recomputed from the remaining activations before
    /// any image data is deleted. Missing catalog entries are logged and the
    /// remaining steps still run.
    pub fn erase(&mut self, id: &VersionId) -> UpdaterResult<()> {
        if let Some(class) = self.versions.get(id).and_then(|v| v.purpose.class())
            && self.is_functional(id)
            && self.config.residency_cap(class) > 1
        {
            error!(version_id = %id, "Version is currently running. Unable to remove.");
            return Err(UpdaterError::FunctionalVersionProtected(id.clone()));
        }

        match self.activations.get(id).map(|a| a.path.clone()) {
            Some(path) => {
                if self.associations.remove_path(&path) > 0 {
                    self.publish_associations();
                }
                self.activations.remove(id);
            }
            None => {
                let missing = UpdaterError::catalog(format!("no activation for {id}"));
                error!(version_id = %id, error = %missing, "Unable to remove activation");
            }
        }

        self.reset_boot_pointer();

        if let Err(e) = self.io.images.remove_read_only(id) {
            warn!(version_id = %id, error = %e, "Failed to remove read-only image");
        }
        if let Err(e) = self.io.settings.remove(id) {
            warn!(version_id = %id, error = %e, "Failed to remove persisted data");
        }

        if self.versions.remove(id).is_none() {
            let missing = UpdaterError::catalog(format!("no version for {id}"));
            error!(version_id = %id, error = %missing, "Unable to remove version");
        }

        if let Err(e) = self.io.boot_env.clear_entry(id) {
            warn!(version_id = %id, error = %e, "Failed to clear boot environment entry");
        }
        self.running.retain(|_, running| running != id);
        self.io.publisher.withdraw_object(id);
        info!(version_id = %id, "Version erased");
        Ok(())
    }

    /// Delete a known version on request
    pub fn delete(&mut self, id: &VersionId) -> UpdaterResult<()> {
        if !self.versions.contains_key(id) {
            return Err(UpdaterError::catalog(format!("unknown version {id}")));
        }
        self.erase(id)
    }

    /// Delete every version that is not running, then clean up the boot
    /// environment
    pub fn delete_all(&mut self) -> Vec<VersionId> {
        let deletable: Vec<VersionId> = self
            .versions
            .keys()
            .filter(|id| !self.is_functional(id))
            .cloned()
            .collect();

        let mut erased = Vec::with_capacity(deletable.len());
        for id in deletable {
            match self.erase(&id) {
                Ok(()) => erased.push(id),
                Err(e) => warn!(version_id = %id, error = %e, "Failed to delete version"),
            }
        }
        if let Err(e) = self.io.boot_env.cleanup() {
            warn!(error = %e, "Boot environment cleanup failed");
        }
        erased
    }

    // ---- host version intake ----

    /// Replace the catalog entry of the running host firmware
    ///
    /// Used when the host reports its version outside the upload flow. The
    /// old entry is dropped from the catalog only; no image data is erased
    /// and the boot pointer is left alone.
    pub fn update_host_version(&mut self, version: &str) -> UpdaterResult<()> {
        if version.is_empty() {
            error!("Host version must contain data");
            return Err(UpdaterError::ValidationFailed(
                "host version is empty".to_string(),
            ));
        }
        info!(version = %version, "Updating host version");
        let new_id = VersionId::from_version(version);

        let mut active_host = None;
        let mut inactive_hosts = Vec::new();
        for (id, activation) in &self.activations {
            let Some(entry) = self.versions.get(id) else {
                error!(version_id = %id, "Cannot find mapping version data");
                continue;
            };
            if entry.purpose != VersionPurpose::Host {
                continue;
            }
            if activation.state() == ActivationState::Active {
                active_host = Some(id.clone());
            } else {
                inactive_hosts.push(id.clone());
            }
        }
        debug!(
            active = ?active_host,
            inactive = inactive_hosts.len(),
            "Host catalog entries"
        );

        match active_host {
            Some(active) if active != new_id => {
                self.drop_catalog_entry(&active);
                // an uploaded copy of the reported version would block the running entry
                if inactive_hosts.contains(&new_id) {
                    info!(version_id = %new_id, "Replacing staged entry with running host version");
                    self.drop_catalog_entry(&new_id);
                }
                self.create_running_version(ImageClass::Host, VersionPurpose::Host, version);
            }
            Some(_) => debug!(version_id = %new_id, "Host version unchanged"),
            None if inactive_hosts.is_empty() => {
                self.create_running_version(ImageClass::Host, VersionPurpose::Host, version);
            }
            None => {
                let inconsistent =
                    UpdaterError::catalog("host entries exist but none is active");
                error!(error = %inconsistent, "Expected one active host version");
                if inactive_hosts.contains(&new_id) {
                    info!(version_id = %new_id, "Not recreating host version already in catalog");
                } else {
                    self.create_running_version(ImageClass::Host, VersionPurpose::Host, version);
                }
            }
        }
        Ok(())
    }

    /// Drop catalog entries without touching image data or the boot pointer
    fn drop_catalog_entry(&mut self, id: &VersionId) {
        if let Some(activation) = self.activations.remove(id)
            && self.associations.remove_path(&activation.path) > 0
        {
            self.publish_associations();
        }
        self.versions.remove(id);
        self.running.retain(|_, running| running != id);
        self.io.publisher.withdraw_object(id);
        debug!(version_id = %id, "Dropped catalog entry");
    }

    /// Synthesize an Active, functional entry for an image already running
    fn create_running_version(
        &mut self,
        class: ImageClass,
        purpose: VersionPurpose,
        version: &str,
    ) -> Option<VersionId> {
        let id = VersionId::from_version(version);
        if self.versions.contains_key(&id) {
            warn!(version_id = %id, "Running version already in catalog");
            return None;
        }

        let entry = Version::new(version, purpose, &self.config.software_root, PathBuf::new());
        let mut owned = Vec::new();
        if let Some(anchor) = self.inventory_anchors.get(&class) {
            owned.push(Association::inventory(anchor.clone()));
        }
        let mut activation = Activation::new(
            id.clone(),
            entry.path.clone(),
            purpose,
            ActivationState::Active,
            owned,
        );
        activation.set_priority(self.io.settings.restore_priority(&id).unwrap_or(0));

        let path = entry.path.clone();
        self.versions.insert(id.clone(), entry);
        self.activations.insert(id.clone(), activation);
        self.mark_running(class, &id);
        self.associations.add(RelationKind::Active, &path);
        self.publish_associations();
        self.publish_object(&id);
        info!(version_id = %id, version = %version, class = %class, "Created running version");
        Some(id)
    }

    // ---- discovery ----

    fn lookup_inventory(&mut self) {
        for class in ImageClass::ALL {
            match self.io.inventory.anchor(class) {
                Ok(anchor) if !anchor.is_empty() => {
                    self.inventory_anchors.insert(class, anchor);
                }
                Ok(_) => debug!(class = %class, "Empty inventory anchor"),
                Err(e) => error!(class = %class, error = %e, "Inventory lookup failed"),
            }
        }
    }

    fn discover_running_image(&mut self, class: ImageClass, purpose: VersionPurpose) {
        let Some(release) = self.config.class(class).release_file.clone() else {
            return;
        };
        if !release.is_file() {
            info!(class = %class, path = %release.display(), "No release file");
            return;
        }
        match read_release_version(&release) {
            Some(version) => {
                self.create_running_version(class, purpose, &version);
            }
            None => info!(class = %class, "Invalid version, skipping running version"),
        }
    }

    fn bmc_version_count(&self) -> usize {
        self.versions
            .values()
            .filter(|v| v.purpose.class() == Some(ImageClass::Bmc))
            .count()
    }

    /// Rebuild BMC entries from the read-only mounts
    fn discover_bmc_images(&mut self) {
        let running_release = read_release_version(&self.config.os_release_file);
        self.scan_bmc_mounts(running_release.as_deref());

        if self.bmc_version_count() < 2
            && let Some(running) = running_release.as_deref()
        {
            let id = VersionId::from_version(running);
            match create_placeholder_mount(
                &self.config.media_dir,
                &self.config.rofs_prefix,
                &id,
                &self.config.os_release_file,
            ) {
                Ok(true) => self.scan_bmc_mounts(Some(running)),
                Ok(false) => {}
                Err(e) => error!(version_id = %id, error = %e, "Failed to create placeholder mount"),
            }
        }

        if let Err(e) = self.io.boot_env.mirror_to_alternate() {
            warn!(error = %e, "Failed to mirror boot environment");
        }
    }

    fn scan_bmc_mounts(&mut self, running_release: Option<&str>) {
        if let Some(running) = running_release {
            self.running
                .insert(ImageClass::Bmc, VersionId::from_version(running));
        }

        let mounts = match scan_read_only_mounts(
            &self.config.media_dir,
            &self.config.rofs_prefix,
            &self.config.os_release_file,
        ) {
            Ok(mounts) => mounts,
            Err(e) => {
                error!(error = %e, "Failed to scan media directory");
                return;
            }
        };

        let mut changed = false;
        for mount in mounts {
            let Some(version) = mount.version else {
                error!(path = %mount.dir.display(), "Failed to read version from mount");
                if let Err(e) = self.erase(&mount.suffix_id) {
                    warn!(version_id = %mount.suffix_id, error = %e, "Failed to erase unreadable mount");
                }
                continue;
            };

            let id = VersionId::from_version(&version);
            if self.versions.contains_key(&id) {
                continue;
            }

            let purpose = self
                .io
                .settings
                .restore_purpose(&id)
                .unwrap_or(VersionPurpose::Bmc);
            let entry = Version::new(
                version.as_str(),
                purpose,
                &self.config.software_root,
                PathBuf::new(),
            );
            let path = entry.path.clone();
            let functional = running_release == Some(version.as_str());
            if functional {
                changed |= self.associations.add(RelationKind::Functional, &path);
            }

            let mut owned = Vec::new();
            if let Some(anchor) = self.inventory_anchors.get(&ImageClass::Bmc) {
                owned.push(Association::inventory(anchor.clone()));
            }
            changed |= self.associations.add(RelationKind::Active, &path);
            changed |= self.associations.add(RelationKind::Updateable, &path);

            let mut activation =
                Activation::new(id.clone(), path, purpose, ActivationState::Active, owned);
            let priority = match self.io.settings.restore_priority(&id) {
                Some(priority) => priority,
                None if functional => 0,
                None => {
                    error!(version_id = %id, "Unable to restore priority from file");
                    u8::MAX
                }
            };
            activation.set_priority(priority);

            self.versions.insert(id.clone(), entry);
            self.activations.insert(id.clone(), activation);
            self.publish_object(&id);
            info!(version_id = %id, version = %version, functional, priority, "Discovered BMC image");
        }

        if changed {
            self.publish_associations();
        }
    }

    // ---- device-level operations ----

    /// Request a factory reset and wait for the environment to settle
    ///
    /// Blocks the calling thread for the configured settle interval.
    pub fn factory_reset(&mut self) -> UpdaterResult<()> {
        self.io.boot_env.factory_reset()?;
        let settle = self.config.factory_reset_settle();
        info!(seconds = settle.as_secs(), "Waiting for factory reset to settle");
        std::thread::sleep(settle);
        info!("Factory reset will take effect upon reboot");
        Ok(())
    }

    /// Set or clear the field-mode latch
    ///
    /// Enabling is one way; clearing an enabled latch fails with
    /// [`UpdaterError::NotAllowed`].
    pub fn set_field_mode(&mut self, enabled: bool) -> UpdaterResult<bool> {
        if enabled && !self.field_mode {
            self.io.boot_env.enable_field_mode()?;
            self.field_mode = true;
            info!("Field mode enabled");
        } else if !enabled && self.field_mode {
            return Err(UpdaterError::NotAllowed(
                "field mode is not allowed to be cleared".to_string(),
            ));
        }
        Ok(self.field_mode)
    }

    /// Restore the field-mode latch from the boot environment
    pub fn restore_field_mode(&mut self) -> UpdaterResult<bool> {
        if self.io.boot_env.field_mode_enabled()? {
            self.set_field_mode(true)?;
        }
        Ok(self.field_mode)
    }

    // ---- publication ----

    fn publish_object(&mut self, id: &VersionId) {
        if let Some(object) = self.object(id) {
            self.io.publisher.publish_object(&object);
        }
    }

    fn publish_associations(&mut self) {
        self.io
            .publisher
            .publish_associations(self.associations.as_slice());
    }
}

impl std::fmt::Debug for ItemUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemUpdater")
            .field("versions", &self.versions.len())
            .field("activations", &self.activations.len())
            .field("associations", &self.associations.len())
            .field("running", &self.running)
            .field("field_mode", &self.field_mode)
            .finish()
    }
}
