//! Firmware version and activation lifecycle engine for BMC-managed images
//!
//! This crate tracks every firmware image known to a board management
//! controller and drives each one through validation, write and activation:
//! - Per-version activation state machine with class-specific write paths
//! - Redundancy-priority allocation with deterministic collision resolution
//! - Residency caps per image class, enforced by eviction
//! - Published active/functional/updateable associations
//! - Boot-pointer maintenance that never names a deleted image
//!
//! # Architecture
//!
//! - [`item_updater`]: Orchestrator owning the catalogs
//! - [`activation`]: Activation states, progress and completion signals
//! - [`priority`]: Priority collision resolution and eviction ordering
//! - [`association`]: Lifecycle association set
//! - [`version`]: Version identity, purpose and release files
//! - [`images`], [`flash`], [`persist`], [`boot_env`], [`inventory`],
//!   [`publish`]: Collaborator interfaces and file-backed defaults
//! - [`discovery`]: Scanning for images already on the device
//! - [`config`]: Site layout and per-class policy
//! - [`error`]: Error types
//!
//! # Concurrency
//!
//! [`ItemUpdater`] is not internally synchronized. It expects to be driven
//! from a single dispatch loop that feeds requests and write-service
//! completion signals in arrival order.
//!
//! # Example
//!
//! ```ignore
//! use bmc_firmware_update::prelude::*;
//!
//! let mut updater = ItemUpdater::new(UpdaterConfig::default(), collaborators)?;
//! updater.init();
//!
//! let id = updater
//!     .create_version(Path::new("/tmp/images/1a2b3c4d"), VersionPurpose::Host, "2.7.1")
//!     .ok_or("already known")?;
//! updater.set_activation_state(&id, ActivationState::Activating)?;
//!
//! // later, from the write service
//! updater.handle_unit_state(&UnitStateChange::new("obmc-flash-host-bios.service", "done"));
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod activation;
pub mod association;
pub mod boot_env;
pub mod config;
pub mod discovery;
pub mod error;
pub mod flash;
pub mod images;
pub mod inventory;
pub mod item_updater;
pub mod persist;
pub mod prelude;
pub mod priority;
pub mod publish;
pub mod version;

pub use activation::{
    Activation, ActivationState, ActivationStatus, RedundancyPriority, UnitResult,
    UnitStateChange,
};
pub use association::{Association, AssociationSet, RelationKind};
pub use boot_env::BootEnv;
pub use config::{ClassConfig, UpdaterConfig};
pub use error::{UpdaterError, UpdaterResult};
pub use flash::{Flasher, FsImageStore, ImageStore};
pub use images::{FileImageValidator, ImageValidator, SignatureVerifier};
pub use inventory::{InventoryLookup, StaticInventory};
pub use item_updater::{Collaborators, ItemUpdater};
pub use persist::{JsonSettingsStore, SettingsStore, VersionSettings};
pub use priority::{PriorityResolution, resolve_collisions};
pub use publish::{ObjectPublisher, VersionObject};
pub use version::{ImageClass, ImageNotification, Version, VersionId, VersionPurpose};
