//! In-memory collaborators shared by the integration tests

#![allow(dead_code, reason = "each test binary uses a different subset")]

use bmc_firmware_update::discovery::release_in_mount;
use bmc_firmware_update::prelude::*;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything the fakes observe or are told to do
#[derive(Debug, Default)]
pub struct DeviceState {
    // validator / image store
    pub invalid_sources: BTreeSet<PathBuf>,
    pub missing_artifacts: BTreeSet<String>,
    pub staged: Vec<(PathBuf, String, PathBuf)>,
    pub retired: Vec<PathBuf>,
    pub removed_read_only: Vec<VersionId>,

    // flasher
    pub started_units: Vec<String>,
    pub fail_unit_start: bool,

    // signature verifier
    pub signatures_valid: bool,

    // settings
    pub priorities: BTreeMap<VersionId, u8>,
    pub purposes: BTreeMap<VersionId, VersionPurpose>,
    pub removed_settings: Vec<VersionId>,

    // boot environment
    pub boot_pointer: Option<VersionId>,
    pub boot_pointer_history: Vec<Option<VersionId>>,
    pub priority_entries: BTreeMap<VersionId, u8>,
    pub cleared_entries: Vec<VersionId>,
    pub mirrors: usize,
    pub factory_resets: usize,
    pub env_field_mode: bool,
    pub cleanups: usize,

    // publisher
    pub published_associations: Vec<Association>,
    pub association_publications: usize,
    pub objects: BTreeMap<VersionId, VersionObject>,
    pub withdrawn: Vec<VersionId>,

    // ordering of erase side effects
    pub events: Vec<String>,
}

pub type Shared = Arc<Mutex<DeviceState>>;

pub struct FakeValidator(pub Shared);

impl ImageValidator for FakeValidator {
    fn validate(&self, source: &Path, _purpose: VersionPurpose) -> ActivationStatus {
        if self.0.lock().invalid_sources.contains(source) {
            ActivationStatus::Invalid
        } else {
            ActivationStatus::Ready
        }
    }
}

pub struct FakeVerifier(pub Shared);

impl SignatureVerifier for FakeVerifier {
    fn verify(&self, _image_dir: &Path, _key_config: &Path) -> bool {
        self.0.lock().signatures_valid
    }
}

pub struct FakeFlasher(pub Shared);

impl Flasher for FakeFlasher {
    fn start_unit(&self, unit: &str) -> UpdaterResult<()> {
        let mut state = self.0.lock();
        if state.fail_unit_start {
            return Err(UpdaterError::Io(std::io::Error::other("unit start refused")));
        }
        state.started_units.push(unit.to_string());
        Ok(())
    }
}

pub struct FakeImages(pub Shared);

impl ImageStore for FakeImages {
    fn has_artifact(&self, _source: &Path, name: &str) -> bool {
        !self.0.lock().missing_artifacts.contains(name)
    }

    fn stage(&self, source: &Path, name: &str, dest_dir: &Path) -> UpdaterResult<()> {
        self.0
            .lock()
            .staged
            .push((source.to_path_buf(), name.to_string(), dest_dir.to_path_buf()));
        Ok(())
    }

    fn retire_upload(&self, source: &Path) -> UpdaterResult<()> {
        self.0.lock().retired.push(source.to_path_buf());
        Ok(())
    }

    fn remove_read_only(&self, id: &VersionId) -> UpdaterResult<()> {
        let mut state = self.0.lock();
        state.events.push(format!("remove_read_only:{id}"));
        state.removed_read_only.push(id.clone());
        Ok(())
    }
}

pub struct FakeSettings(pub Shared);

impl SettingsStore for FakeSettings {
    fn store_priority(&mut self, id: &VersionId, priority: u8) -> UpdaterResult<()> {
        self.0.lock().priorities.insert(id.clone(), priority);
        Ok(())
    }

    fn restore_priority(&self, id: &VersionId) -> Option<u8> {
        self.0.lock().priorities.get(id).copied()
    }

    fn store_purpose(&mut self, id: &VersionId, purpose: VersionPurpose) -> UpdaterResult<()> {
        self.0.lock().purposes.insert(id.clone(), purpose);
        Ok(())
    }

    fn restore_purpose(&self, id: &VersionId) -> Option<VersionPurpose> {
        self.0.lock().purposes.get(id).copied()
    }

    fn remove(&mut self, id: &VersionId) -> UpdaterResult<()> {
        let mut state = self.0.lock();
        state.priorities.remove(id);
        state.purposes.remove(id);
        state.removed_settings.push(id.clone());
        Ok(())
    }
}

pub struct FakeBootEnv(pub Shared);

impl BootEnv for FakeBootEnv {
    fn set_boot_pointer(&mut self, id: Option<&VersionId>) -> UpdaterResult<()> {
        let mut state = self.0.lock();
        state.events.push(format!(
            "boot_pointer:{}",
            id.map(VersionId::as_str).unwrap_or("")
        ));
        state.boot_pointer = id.cloned();
        state.boot_pointer_history.push(id.cloned());
        Ok(())
    }

    fn set_priority_entry(&mut self, id: &VersionId, priority: u8) -> UpdaterResult<()> {
        self.0.lock().priority_entries.insert(id.clone(), priority);
        Ok(())
    }

    fn clear_entry(&mut self, id: &VersionId) -> UpdaterResult<()> {
        let mut state = self.0.lock();
        state.priority_entries.remove(id);
        state.cleared_entries.push(id.clone());
        Ok(())
    }

    fn mirror_to_alternate(&mut self) -> UpdaterResult<()> {
        self.0.lock().mirrors += 1;
        Ok(())
    }

    fn factory_reset(&mut self) -> UpdaterResult<()> {
        self.0.lock().factory_resets += 1;
        Ok(())
    }

    fn enable_field_mode(&mut self) -> UpdaterResult<()> {
        self.0.lock().env_field_mode = true;
        Ok(())
    }

    fn field_mode_enabled(&self) -> UpdaterResult<bool> {
        Ok(self.0.lock().env_field_mode)
    }

    fn cleanup(&mut self) -> UpdaterResult<()> {
        self.0.lock().cleanups += 1;
        Ok(())
    }
}

pub struct FakePublisher(pub Shared);

impl ObjectPublisher for FakePublisher {
    fn publish_associations(&mut self, associations: &[Association]) {
        let mut state = self.0.lock();
        state.published_associations = associations.to_vec();
        state.association_publications += 1;
    }

    fn publish_object(&mut self, object: &VersionObject) {
        self.0
            .lock()
            .objects
            .insert(object.version.id.clone(), object.clone());
    }

    fn withdraw_object(&mut self, id: &VersionId) {
        let mut state = self.0.lock();
        state.objects.remove(id);
        state.withdrawn.push(id.clone());
    }
}

/// Configuration rooted in a scratch directory so discovery stays hermetic
pub fn config_in(root: &Path) -> UpdaterConfig {
    let mut config = UpdaterConfig {
        upload_dir: root.join("images"),
        media_dir: root.join("media"),
        os_release_file: root.join("etc/os-release"),
        persist_dir: root.join("persist"),
        factory_reset_settle_secs: 0,
        ..UpdaterConfig::default()
    };
    config.bmc.staging_dir = root.join("run/initramfs");
    config.host.staging_dir = root.join("tmp");
    config.host.release_file = Some(root.join("share/bios-release"));
    config.auxiliary.staging_dir = root.join("tmp");
    config.auxiliary.release_file = Some(root.join("share/mcu-release"));
    config
}

/// Build an updater wired to fresh fakes
pub fn updater_with(config: UpdaterConfig) -> UpdaterResult<(ItemUpdater, Shared)> {
    let state: Shared = Arc::new(Mutex::new(DeviceState {
        signatures_valid: true,
        ..DeviceState::default()
    }));
    let inventory = StaticInventory::from_config(&config);
    let io = Collaborators {
        validator: Box::new(FakeValidator(state.clone())),
        verifier: Some(Box::new(FakeVerifier(state.clone()))),
        flasher: Box::new(FakeFlasher(state.clone())),
        images: Box::new(FakeImages(state.clone())),
        settings: Box::new(FakeSettings(state.clone())),
        boot_env: Box::new(FakeBootEnv(state.clone())),
        inventory: Box::new(inventory),
        publisher: Box::new(FakePublisher(state.clone())),
    };
    let updater = ItemUpdater::new(config, io)?;
    Ok((updater, state))
}

/// Build and initialize an updater in `root`
pub fn init_updater(root: &Path) -> UpdaterResult<(ItemUpdater, Shared)> {
    let (mut updater, state) = updater_with(config_in(root))?;
    updater.init();
    Ok((updater, state))
}

/// Write a release file declaring `version`
pub fn write_release(path: &Path, version: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("ID=openbmc\nVERSION_ID=\"{version}\"\n"))
}

/// Lay down a read-only BMC mount holding `version`
pub fn seed_bmc_mount(config: &UpdaterConfig, version: &str) -> std::io::Result<VersionId> {
    let id = VersionId::from_version(version);
    let mount = config
        .media_dir
        .join(format!("{}{}", config.rofs_prefix, id));
    write_release(&release_in_mount(&mount, &config.os_release_file), version)?;
    Ok(id)
}

/// Upload an image and return its id
pub fn upload(
    updater: &mut ItemUpdater,
    purpose: VersionPurpose,
    version: &str,
) -> UpdaterResult<VersionId> {
    let source = updater
        .config()
        .upload_path(&VersionId::from_version(version));
    updater
        .create_version(&source, purpose, version)
        .ok_or_else(|| UpdaterError::CatalogInconsistency(format!("{version} already known")))
}

/// Upload, activate and complete a Host image
pub fn activate_host(updater: &mut ItemUpdater, version: &str) -> UpdaterResult<VersionId> {
    let id = upload(updater, VersionPurpose::Host, version)?;
    updater.set_activation_state(&id, ActivationState::Activating)?;
    updater.handle_unit_state(&UnitStateChange::new("obmc-flash-host-bios.service", "done"));
    Ok(id)
}

pub fn state_of(updater: &ItemUpdater, id: &VersionId) -> Option<ActivationState> {
    updater.activation(id).map(Activation::state)
}

pub fn priority_of(updater: &ItemUpdater, id: &VersionId) -> Option<u8> {
    updater
        .activation(id)
        .and_then(Activation::priority)
        .map(RedundancyPriority::value)
}
