//! U-Boot environment driven through systemd helper units

use bmc_firmware_update::{BootEnv, UpdaterError, UpdaterResult, VersionId};
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

const UPDATE_VARS_UNIT: &str = "obmc-flash-bmc-updateubootvars@";
const SETENV_UNIT: &str = "obmc-flash-bmc-setenv@";
const MIRROR_UNIT: &str = "obmc-flash-bmc-mirroruboot.service";
const CLEANUP_UNIT: &str = "obmc-flash-bmc-cleanup.service";
const USR_LOCAL_MOUNT: &str = "usr-local.mount";

/// `key=value` inside a unit instance name, escaped the way systemd expects
fn setenv_unit(assignment: &str) -> String {
    format!("{SETENV_UNIT}{}.service", assignment.replace('=', "\\x3d"))
}

/// [`BootEnv`] backed by the flash helper units and `fw_printenv`
#[derive(Debug, Clone)]
pub struct UbootEnv {
    systemctl: PathBuf,
    fw_printenv: PathBuf,
}

impl UbootEnv {
    /// Create an environment using the given programs
    pub fn new(systemctl: impl Into<PathBuf>, fw_printenv: impl Into<PathBuf>) -> Self {
        Self {
            systemctl: systemctl.into(),
            fw_printenv: fw_printenv.into(),
        }
    }

    fn systemctl(&self, verb: &str, unit: &str) -> UpdaterResult<()> {
        debug!(verb, unit, "Running systemctl");
        let status = Command::new(&self.systemctl).args([verb, unit]).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(UpdaterError::BootEnvironment(format!(
                "systemctl {verb} {unit} exited with {status}"
            )))
        }
    }

    fn start(&self, unit: &str) -> UpdaterResult<()> {
        self.systemctl("start", unit)
    }
}

impl BootEnv for UbootEnv {
    fn set_boot_pointer(&mut self, id: Option<&VersionId>) -> UpdaterResult<()> {
        match id {
            Some(id) => self.start(&format!("{UPDATE_VARS_UNIT}{id}.service")),
            None => {
                debug!("No version left to boot from");
                Ok(())
            }
        }
    }

    fn set_priority_entry(&mut self, id: &VersionId, priority: u8) -> UpdaterResult<()> {
        self.start(&setenv_unit(&format!("{id}={priority}")))
    }

    fn clear_entry(&mut self, id: &VersionId) -> UpdaterResult<()> {
        self.start(&setenv_unit(id.as_str()))
    }

    fn mirror_to_alternate(&mut self) -> UpdaterResult<()> {
        self.start(MIRROR_UNIT)
    }

    fn factory_reset(&mut self) -> UpdaterResult<()> {
        info!("Requesting factory reset on next boot");
        self.start(&setenv_unit("rwreset=true"))
    }

    fn enable_field_mode(&mut self) -> UpdaterResult<()> {
        self.start(&setenv_unit("fieldmode=true"))?;
        self.systemctl("stop", USR_LOCAL_MOUNT)?;
        self.systemctl("mask", USR_LOCAL_MOUNT)
    }

    fn field_mode_enabled(&self) -> UpdaterResult<bool> {
        let output = Command::new(&self.fw_printenv).output()?;
        if !output.status.success() {
            return Err(UpdaterError::BootEnvironment(format!(
                "fw_printenv exited with {}",
                output.status
            )));
        }
        let env = String::from_utf8_lossy(&output.stdout);
        Ok(env.lines().any(|line| line.trim() == "fieldmode=true"))
    }

    fn cleanup(&mut self) -> UpdaterResult<()> {
        self.start(CLEANUP_UNIT)
    }
}
