//! BMC firmware update daemon
//!
//! Hosts one [`bmc_firmware_update::ItemUpdater`] on a dedicated dispatch
//! thread and exposes it over a Unix domain socket. Write services run as
//! systemd units; their results come back through the same dispatch queue
//! as client requests, so the updater only ever sees one event at a time.

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod boot_env;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod flasher;
pub mod ipc;
pub mod protocol;
pub mod publisher;

pub use config::ServiceConfig;
pub use daemon::ServiceDaemon;
pub use dispatch::{Command, Dispatcher};
pub use protocol::{Request, Response};
pub use publisher::{Snapshot, SnapshotPublisher};
