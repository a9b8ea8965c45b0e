//! Single-threaded dispatch loop owning the item updater
//!
//! Socket handlers and write-service watchers never touch the updater. They
//! post [`Command`]s to one queue, and the dispatcher applies them in arrival
//! order on a dedicated thread.

use bmc_firmware_update::{
    ActivationState, ImageNotification, ItemUpdater, UnitStateChange, VersionObject,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::protocol::{Request, Response};

/// Work item for the dispatch thread
#[derive(Debug)]
pub enum Command {
    /// Client request and the channel its reply goes to
    Request {
        /// Decoded request
        request: Request,
        /// Reply channel
        reply: oneshot::Sender<Response>,
    },
    /// Write-service completion signal
    UnitState(UnitStateChange),
    /// Flush state and stop
    Shutdown,
}

/// Payload of a `list` request
#[derive(Debug, Serialize)]
struct Listing<'a> {
    objects: Vec<VersionObject>,
    associations: &'a [bmc_firmware_update::Association],
    field_mode: bool,
}

/// Owner of the updater on the dispatch thread
#[derive(Debug)]
pub struct Dispatcher {
    updater: ItemUpdater,
}

impl Dispatcher {
    /// Wrap an initialized updater
    pub fn new(updater: ItemUpdater) -> Self {
        Self { updater }
    }

    /// Updater being driven
    pub fn updater(&self) -> &ItemUpdater {
        &self.updater
    }

    /// Apply one request
    pub fn handle(&mut self, request: Request) -> Response {
        debug!(?request, "Handling request");
        match request {
            Request::Create {
                purpose,
                version,
                file_path,
            } => {
                let notification = ImageNotification {
                    purpose,
                    version,
                    file_path,
                };
                Response::with_data(&self.updater.handle_notification(&notification))
            }
            Request::Activate { id } => self.set_state(&id, ActivationState::Activating),
            Request::SetState { id, state } => self.set_state(&id, state),
            Request::SetPriority { id, priority } => {
                match self.updater.set_priority(&id, priority) {
                    Ok(()) => Response::ok(),
                    Err(e) => e.into(),
                }
            }
            Request::Delete { id } => match self.updater.delete(&id) {
                Ok(()) => Response::ok(),
                Err(e) => e.into(),
            },
            Request::DeleteAll => Response::with_data(&self.updater.delete_all()),
            Request::FactoryReset => match self.updater.factory_reset() {
                Ok(()) => Response::ok(),
                Err(e) => e.into(),
            },
            Request::FieldMode { enabled } => match self.updater.set_field_mode(enabled) {
                Ok(latched) => Response::with_data(&latched),
                Err(e) => e.into(),
            },
            Request::HostVersion { version } => match self.updater.update_host_version(&version) {
                Ok(()) => Response::ok(),
                Err(e) => e.into(),
            },
            Request::UnitState { unit, result } => {
                let change = UnitStateChange::new(unit, &result);
                Response::with_data(&self.updater.handle_unit_state(&change))
            }
            Request::List => {
                let objects = self
                    .updater
                    .versions()
                    .filter_map(|v| self.updater.object(&v.id))
                    .collect();
                Response::with_data(&Listing {
                    objects,
                    associations: self.updater.associations(),
                    field_mode: self.updater.field_mode(),
                })
            }
            Request::Get { id } => match self.updater.object(&id) {
                Some(object) => Response::with_data(&object),
                None => Response::error("not_found", format!("unknown version {id}")),
            },
        }
    }

    fn set_state(
        &mut self,
        id: &bmc_firmware_update::VersionId,
        state: ActivationState,
    ) -> Response {
        match self.updater.set_activation_state(id, state) {
            Ok(settled) => Response::with_data(&settled),
            Err(e) => e.into(),
        }
    }

    /// Drain `commands` until shutdown, then flush the updater
    ///
    /// Blocks the calling thread; run it on a dedicated thread.
    pub fn run(mut self, mut commands: mpsc::Receiver<Command>) -> ItemUpdater {
        info!("Dispatcher started");
        while let Some(command) = commands.blocking_recv() {
            match command {
                Command::Request { request, reply } => {
                    let response = self.handle(request);
                    if reply.send(response).is_err() {
                        debug!("Client went away before the reply");
                    }
                }
                Command::UnitState(change) => {
                    self.updater.handle_unit_state(&change);
                }
                Command::Shutdown => break,
            }
        }
        if let Err(e) = self.updater.shutdown() {
            error!(error = %e, "Failed to flush updater state");
        }
        info!("Dispatcher stopped");
        self.updater
    }
}
