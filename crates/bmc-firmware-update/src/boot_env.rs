//! Boot-loader environment collaborator

use crate::error::UpdaterResult;
use crate::version::VersionId;

/// Boot-loader variables and related device-level operations
///
/// The boot pointer names the version the boot loader tries first. Every
/// other operation is opaque to the updater.
pub trait BootEnv: Send {
    /// Point the boot loader at `id`, or clear the pointer with `None`
    fn set_boot_pointer(&mut self, id: Option<&VersionId>) -> UpdaterResult<()>;

    /// Record the priority of a version in the environment
    fn set_priority_entry(&mut self, id: &VersionId, priority: u8) -> UpdaterResult<()>;

    /// Remove every environment entry kept for a version
    fn clear_entry(&mut self, id: &VersionId) -> UpdaterResult<()>;

    /// Copy the environment to the alternate flash bank
    fn mirror_to_alternate(&mut self) -> UpdaterResult<()>;

    /// Request a factory reset on next boot
    fn factory_reset(&mut self) -> UpdaterResult<()>;

    /// Persist field mode and lock down the writable overlay
    fn enable_field_mode(&mut self) -> UpdaterResult<()>;

    /// Whether the environment records field mode as enabled
    fn field_mode_enabled(&self) -> UpdaterResult<bool>;

    /// Drop leftovers after every non-running version was deleted
    fn cleanup(&mut self) -> UpdaterResult<()>;
}
