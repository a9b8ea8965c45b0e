//! Wiring of the updater, dispatch thread and socket server

use anyhow::{Context, Result};
use bmc_firmware_update::{
    Collaborators, FileImageValidator, FsImageStore, ItemUpdater, JsonSettingsStore,
    SignatureVerifier, StaticInventory,
};
use std::thread::JoinHandle;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::boot_env::UbootEnv;
use crate::config::ServiceConfig;
use crate::dispatch::{Command, Dispatcher};
use crate::flasher::{CommandVerifier, SystemdFlasher};
use crate::ipc::{IpcConfig, IpcServer};
use crate::publisher::SnapshotPublisher;

/// Running daemon: dispatch thread plus the channels feeding it
#[derive(Debug)]
pub struct ServiceDaemon {
    config: ServiceConfig,
    commands: mpsc::Sender<Command>,
    shutdown_tx: broadcast::Sender<()>,
    dispatcher: Option<JoinHandle<ItemUpdater>>,
}

impl ServiceDaemon {
    /// Build the updater, initialize it and start the dispatch thread
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let (commands, queue) = mpsc::channel(config.command_buffer);
        let (shutdown_tx, _) = broadcast::channel(1);

        let updater_config = config.updater.clone();
        let verifier = config
            .verify_program
            .as_ref()
            .map(|program| Box::new(CommandVerifier::new(program)) as Box<dyn SignatureVerifier>);
        let io = Collaborators {
            validator: Box::new(FileImageValidator),
            verifier,
            flasher: Box::new(SystemdFlasher::new(
                &config.systemctl,
                Handle::current(),
                commands.clone(),
            )),
            images: Box::new(FsImageStore::new(
                &updater_config.media_dir,
                updater_config.rofs_prefix.clone(),
            )),
            settings: Box::new(JsonSettingsStore::new(&updater_config.persist_dir)),
            boot_env: Box::new(UbootEnv::new(&config.systemctl, &config.fw_printenv)),
            inventory: Box::new(StaticInventory::from_config(&updater_config)),
            publisher: Box::new(SnapshotPublisher::new(&config.snapshot_path)),
        };

        let mut updater =
            ItemUpdater::new(updater_config, io).context("Failed to create item updater")?;
        updater.init();

        let dispatcher = std::thread::Builder::new()
            .name("updater-dispatch".to_string())
            .spawn(move || Dispatcher::new(updater).run(queue))
            .context("Failed to spawn dispatch thread")?;

        Ok(Self {
            config,
            commands,
            shutdown_tx,
            dispatcher: Some(dispatcher),
        })
    }

    /// Queue feeding the dispatch thread
    pub fn commands(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }

    /// Serve requests until the shutdown handle fires or Ctrl-C
    pub async fn run(&mut self) -> Result<()> {
        let server = IpcServer::new(
            IpcConfig {
                socket_path: self.config.socket_path.clone(),
                socket_mode: self.config.socket_mode,
                max_request_bytes: self.config.max_request_bytes,
            },
            self.commands.clone(),
        );
        let shutdown = self.shutdown_tx.subscribe();
        let mut stop_requested = self.shutdown_tx.subscribe();
        let serving = tokio::spawn(async move { server.serve(shutdown).await });

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Received Ctrl-C");
            }
            result = stop_requested.recv() => {
                if let Err(e) = result {
                    error!("Shutdown channel failed: {}", e);
                }
            }
        }

        self.stop().await?;
        match serving.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("Socket server task failed: {e}")),
        }
    }

    /// Sender that stops [`ServiceDaemon::run`] when fired
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Stop the socket server and the dispatch thread, returning the
    /// flushed updater
    pub async fn stop(&mut self) -> Result<Option<ItemUpdater>> {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Socket server already stopped");
        }
        if self.commands.send(Command::Shutdown).await.is_err() {
            info!("Dispatcher already stopped");
        }
        let Some(handle) = self.dispatcher.take() else {
            return Ok(None);
        };
        let updater = tokio::task::spawn_blocking(move || handle.join())
            .await
            .context("Failed to join dispatch thread")?
            .map_err(|panic| anyhow::anyhow!("Dispatch thread panicked: {panic:?}"))?;
        info!("Service stopped");
        Ok(Some(updater))
    }
}
