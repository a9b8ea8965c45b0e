//! Write-service and signature-check adapters backed by external programs

use bmc_firmware_update::{Flasher, SignatureVerifier, UnitStateChange, UpdaterResult};
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dispatch::Command as DispatchCommand;

/// [`Flasher`] that runs `systemctl start <unit>` and reports the unit's
/// result back to the dispatcher once it finishes
#[derive(Debug, Clone)]
pub struct SystemdFlasher {
    systemctl: PathBuf,
    runtime: Handle,
    events: mpsc::Sender<DispatchCommand>,
}

impl SystemdFlasher {
    /// Create a flasher spawning on `runtime` and posting results to `events`
    pub fn new(
        systemctl: impl Into<PathBuf>,
        runtime: Handle,
        events: mpsc::Sender<DispatchCommand>,
    ) -> Self {
        Self {
            systemctl: systemctl.into(),
            runtime,
            events,
        }
    }
}

impl Flasher for SystemdFlasher {
    fn start_unit(&self, unit: &str) -> UpdaterResult<()> {
        let mut child = {
            let _guard = self.runtime.enter();
            Command::new(&self.systemctl)
                .args(["start", unit])
                .kill_on_drop(false)
                .spawn()?
        };
        info!(unit, "Write service started");

        let events = self.events.clone();
        let unit = unit.to_string();
        self.runtime.spawn(async move {
            let result = match child.wait().await {
                Ok(status) if status.success() => "done",
                Ok(status) => {
                    warn!(unit = %unit, %status, "Write service exited unsuccessfully");
                    "failed"
                }
                Err(e) => {
                    error!(unit = %unit, error = %e, "Failed to wait for write service");
                    "failed"
                }
            };
            debug!(unit = %unit, result, "Write service finished");
            let change = UnitStateChange::new(unit, result);
            if events.send(DispatchCommand::UnitState(change)).await.is_err() {
                warn!("Dispatcher gone; dropping unit result");
            }
        });
        Ok(())
    }
}

/// [`SignatureVerifier`] running `<program> <image dir> <key config>`
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    program: PathBuf,
}

impl CommandVerifier {
    /// Create a verifier running `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SignatureVerifier for CommandVerifier {
    fn verify(&self, image_dir: &Path, key_config: &Path) -> bool {
        match StdCommand::new(&self.program)
            .arg(image_dir)
            .arg(key_config)
            .status()
        {
            Ok(status) => status.success(),
            Err(e) => {
                error!(program = %self.program.display(), error = %e, "Failed to run signature verifier");
                false
            }
        }
    }
}
