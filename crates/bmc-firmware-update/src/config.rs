//! Site layout and per-class policy

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{UpdaterError, UpdaterResult};
use crate::version::ImageClass;

/// Settings for one image class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassConfig {
    /// Directory the write step copies artifacts into
    pub staging_dir: PathBuf,
    /// Service unit that performs the write; `None` means the write finishes
    /// when staging completes
    pub write_unit: Option<String>,
    /// Maximum number of Active or Failed versions kept at once
    pub residency_cap: usize,
    /// Inventory object used when lookup finds nothing
    pub inventory_anchor: String,
    /// Release file describing the running image, if the class has one
    pub release_file: Option<PathBuf>,
}

/// Updater configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Object root versions are published under
    pub software_root: String,
    /// Directory uploaded images are unpacked into, one subdirectory per id
    pub upload_dir: PathBuf,
    /// Directory holding the read-only BMC mounts
    pub media_dir: PathBuf,
    /// Name prefix of read-only BMC mount directories
    pub rofs_prefix: String,
    /// Release file of the running BMC image
    pub os_release_file: PathBuf,
    /// Directory holding per-version persisted settings
    pub persist_dir: PathBuf,
    /// Verify image signatures before writing
    pub verify_signatures: bool,
    /// Key configuration handed to the signature verifier
    pub signed_image_conf: PathBuf,
    /// Seconds to wait after requesting a factory reset
    pub factory_reset_settle_secs: u64,
    /// BMC and System images
    pub bmc: ClassConfig,
    /// Host firmware
    pub host: ClassConfig,
    /// Auxiliary controller firmware
    pub auxiliary: ClassConfig,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            software_root: "/xyz/openbmc_project/software".to_string(),
            upload_dir: PathBuf::from("/tmp/images"),
            media_dir: PathBuf::from("/media"),
            rofs_prefix: "rofs-".to_string(),
            os_release_file: PathBuf::from("/etc/os-release"),
            persist_dir: PathBuf::from("/var/lib/phosphor-bmc-code-mgmt"),
            verify_signatures: false,
            signed_image_conf: PathBuf::from("/etc/activationdata"),
            factory_reset_settle_secs: 10,
            bmc: ClassConfig {
                staging_dir: PathBuf::from("/run/initramfs"),
                write_unit: None,
                residency_cap: 2,
                inventory_anchor: "/xyz/openbmc_project/inventory/system/chassis/motherboard/bmc"
                    .to_string(),
                release_file: None,
            },
            host: ClassConfig {
                staging_dir: PathBuf::from("/tmp"),
                write_unit: Some("obmc-flash-host-bios.service".to_string()),
                residency_cap: 1,
                inventory_anchor: "/xyz/openbmc_project/inventory/system".to_string(),
                release_file: Some(PathBuf::from(
                    "/usr/share/phosphor-bmc-code-mgmt/bios-release",
                )),
            },
            auxiliary: ClassConfig {
                staging_dir: PathBuf::from("/tmp"),
                write_unit: Some("mcu-update.service".to_string()),
                residency_cap: 1,
                inventory_anchor: "/xyz/openbmc_project/inventory/system/chassis/motherboard/mcu"
                    .to_string(),
                release_file: Some(PathBuf::from(
                    "/usr/share/phosphor-bmc-code-mgmt/mcu-release",
                )),
            },
        }
    }
}

impl UpdaterConfig {
    /// Settings for a class
    pub fn class(&self, class: ImageClass) -> &ClassConfig {
        match class {
            ImageClass::Bmc => &self.bmc,
            ImageClass::Host => &self.host,
            ImageClass::Auxiliary => &self.auxiliary,
        }
    }

    /// Residency cap for a class
    pub fn residency_cap(&self, class: ImageClass) -> usize {
        self.class(class).residency_cap
    }

    /// Settle interval after a factory reset request
    pub fn factory_reset_settle(&self) -> Duration {
        Duration::from_secs(self.factory_reset_settle_secs)
    }

    /// Upload directory of a version
    pub fn upload_path(&self, id: &crate::VersionId) -> PathBuf {
        self.upload_dir.join(id.as_str())
    }

    /// Validate the configuration
    pub fn validate(&self) -> UpdaterResult<()> {
        if self.software_root.trim().is_empty() {
            return Err(UpdaterError::Config("software root is empty".to_string()));
        }

        if self.rofs_prefix.is_empty() {
            return Err(UpdaterError::Config("rofs prefix is empty".to_string()));
        }

        for class in ImageClass::ALL {
            let settings = self.class(class);
            if settings.residency_cap == 0 {
                return Err(UpdaterError::Config(format!(
                    "residency cap for {class} must be at least 1"
                )));
            }
            if settings.write_unit.as_deref().is_some_and(str::is_empty) {
                return Err(UpdaterError::Config(format!(
                    "write unit for {class} is empty"
                )));
            }
        }

        if self.bmc.write_unit.is_some() {
            tracing::warn!("BMC write unit configured; BMC images will wait for a unit signal");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_is_valid() -> UpdaterResult<()> {
        let config = UpdaterConfig::default();
        config.validate()?;
        assert_eq!(config.residency_cap(ImageClass::Bmc), 2);
        assert_eq!(config.residency_cap(ImageClass::Host), 1);
        assert_eq!(config.factory_reset_settle(), Duration::from_secs(10));
        assert!(config.bmc.write_unit.is_none());
        Ok(())
    }

    #[test]
    fn test_zero_cap_rejected() {
        let mut config = UpdaterConfig::default();
        config.auxiliary.residency_cap = 0;
        assert!(matches!(config.validate(), Err(UpdaterError::Config(_))));
    }

    #[test]
    fn test_empty_root_rejected() {
        let config = UpdaterConfig {
            software_root: "  ".to_string(),
            ..UpdaterConfig::default()
        };
        assert!(matches!(config.validate(), Err(UpdaterError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() -> Result<(), serde_json::Error> {
        let config: UpdaterConfig =
            serde_json::from_str(r#"{ "upload_dir": "/var/images", "verify_signatures": true }"#)?;
        assert_eq!(config.upload_dir, PathBuf::from("/var/images"));
        assert!(config.verify_signatures);
        assert_eq!(config.host.write_unit.as_deref(), Some("obmc-flash-host-bios.service"));
        Ok(())
    }
}
