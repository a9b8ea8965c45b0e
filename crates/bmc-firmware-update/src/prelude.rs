//! Convenience re-exports for common updater types

pub use crate::activation::{
    Activation, ActivationState, ActivationStatus, RedundancyPriority, UnitResult,
    UnitStateChange,
};
pub use crate::association::{Association, AssociationSet, RelationKind};
pub use crate::boot_env::BootEnv;
pub use crate::config::{ClassConfig, UpdaterConfig};
pub use crate::error::{UpdaterError, UpdaterResult};
pub use crate::flash::{Flasher, FsImageStore, ImageStore};
pub use crate::images::{FileImageValidator, ImageValidator, SignatureVerifier};
pub use crate::inventory::{InventoryLookup, StaticInventory};
pub use crate::item_updater::{Collaborators, ItemUpdater};
pub use crate::persist::{JsonSettingsStore, SettingsStore};
pub use crate::publish::{ObjectPublisher, VersionObject};
pub use crate::version::{ImageClass, ImageNotification, Version, VersionId, VersionPurpose};
